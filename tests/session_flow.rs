mod common;

use alloy::primitives::{B256, U256};
use common::*;
use reality_mirror::error::{MirrorError, RpcError};
use reality_mirror::model::SyncWatermark;
use reality_mirror::status::{StatusDetail, StatusLabel};
use reality_mirror::sync::{SyncEvent, SyncPhase};
use reality_mirror::testing::{MockChain, MockConnector};
use reality_mirror::utils::rpc::round_robin_handler;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

/// A inside the one-day window and open, B older than the window, C inside and settled.
fn seed(chain: &MockChain) {
    chain.add_proposal(&proposal(1, "QmAlpha", vec![B256::repeat_byte(0x11)], 13_000));
    chain.add_proposal(&proposal(2, "QmBeta", vec![B256::repeat_byte(0x22)], 10_000));
    chain.add_proposal(&proposal(3, "QmGamma", vec![B256::repeat_byte(0x33)], 14_000));
    chain.set_question(ORACLE, qid(1), &open_question(10));
    chain.set_question(ORACLE, qid(2), &open_question(10));
    chain.set_question(ORACLE, qid(3), &settled_yes(20));
    chain.add_answer(ORACLE, &answer(qid(1), user(0xaa), 10, 13_100, 0));
    chain.add_answer(ORACLE, &answer(qid(2), user(0xbb), 10, 15_000, 0));
    chain.add_answer(ORACLE, &answer(qid(3), user(0xcc), 20, 14_100, 0));
}

#[tokio::test]
async fn test_backfill_indexes_the_lookback_window() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_backfill");

    assert_eq!(h.session.phase(), SyncPhase::Disconnected);
    h.session.connect("primary").await.expect("connect");
    assert_eq!(h.session.phase(), SyncPhase::Connecting);

    let report = h.session.sync().await.expect("backfill");
    assert_eq!(report.ranges, vec![(ONE_DAY_START, HEAD)]);
    assert_eq!(report.new_proposals, vec![qid(1), qid(3)]);
    // B's answer belongs to a question outside the window.
    assert_eq!(report.new_answers, 2);
    assert!(report.failed_states.is_empty());
    assert_eq!(h.session.phase(), SyncPhase::Synced);

    let expected = SyncWatermark {
        last_processed_block: Some(HEAD),
        earliest_indexed_block: Some(ONE_DAY_START),
        answer_cache_ready: true,
    };
    assert_eq!(h.session.watermark().await, expected);
    assert_eq!(h.db.load_watermark().expect("watermark"), expected);

    assert!(h.db.proposal(qid(2)).expect("lookup").is_none());
    let alpha = h.db.proposal(qid(1)).expect("lookup").expect("stored");
    assert_eq!(alpha.proposal_id.found().map(String::as_str), Some("QmAlpha"));
    assert_eq!(alpha.tx_hashes.found(), Some(&vec![B256::repeat_byte(0x11)]));
    assert!(alpha.question_text.is_found());
    assert_eq!(
        alpha.created_timestamp.found().copied(),
        Some(chain.timestamp_of(13_000))
    );
    assert_eq!(h.db.answers_for(qid(1)).expect("answers").len(), 1);
    assert!(h.db.answers_for(qid(2)).expect("answers").is_empty());

    let statuses = h.session.proposal_statuses().await.expect("statuses");
    let labels: Vec<(B256, StatusLabel)> = statuses
        .iter()
        .map(|(proposal, status)| (proposal.question_id, status.label))
        .collect();
    assert_eq!(
        labels,
        vec![
            (qid(1), StatusLabel::Pending),
            (qid(3), StatusLabel::Executable)
        ]
    );
    assert!(matches!(
        statuses[0].1.detail,
        StatusDetail::FinalizesIn { .. }
    ));
    assert!(statuses[1].1.executable);
}

#[tokio::test]
async fn test_incremental_sync_refreshes_only_active_questions() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_incremental");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");

    chain.add_answer(ORACLE, &answer(qid(1), user(0xdd), 20, 20_050, 0));
    chain.set_question(ORACLE, qid(1), &open_question(20));
    // Settled questions are not re-read, so this change must stay invisible.
    chain.set_question(ORACLE, qid(3), &settled_yes(99));
    chain.add_proposal(&proposal(4, "QmDelta", vec![B256::repeat_byte(0x44)], 20_060));
    chain.set_question(ORACLE, qid(4), &open_question(5));
    chain.set_head(20_100);

    let report = h.session.incremental_sync().await.expect("incremental");
    assert_eq!(report.ranges, vec![(HEAD + 1, 20_100)]);
    assert_eq!(report.new_proposals, vec![qid(4)]);
    assert_eq!(report.new_answers, 1);
    assert!(report.changed.contains(&qid(1)));
    assert!(report.changed.contains(&qid(4)));
    assert!(!report.changed.contains(&qid(3)));

    let settled = h.db.question_state(qid(3)).expect("lookup").expect("stored");
    assert_eq!(settled.bond, U256::from(20));
    let alpha = h.db.question_state(qid(1)).expect("lookup").expect("stored");
    assert_eq!(alpha.bond, U256::from(20));
    assert_eq!(h.db.answers_for(qid(1)).expect("answers").len(), 2);
    assert_eq!(
        h.session.watermark().await.last_processed_block,
        Some(20_100)
    );

    let quiet = h.session.incremental_sync().await.expect("quiet pass");
    assert!(quiet.ranges.is_empty());
    assert!(quiet.changed.is_empty());
    assert_eq!(quiet.new_answers, 0);
}

#[tokio::test]
async fn test_failed_range_scan_leaves_watermark_untouched() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_scan_failure");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");

    chain.set_head(20_100);
    chain.fail_logs_between(HEAD + 1, 20_100, "upstream gateway timeout");
    let err = h
        .session
        .incremental_sync()
        .await
        .expect_err("scan must fail");
    assert!(matches!(err, MirrorError::RangeScanFailed { .. }));
    assert!(err.is_transient());
    assert!(err.user_message().starts_with("temporary failure"));
    assert_eq!(h.session.watermark().await.last_processed_block, Some(HEAD));
    assert_eq!(
        h.db.load_watermark().expect("watermark").last_processed_block,
        Some(HEAD)
    );
    assert_eq!(h.session.phase(), SyncPhase::Synced);

    chain.clear_log_failures();
    let report = h.session.incremental_sync().await.expect("retry");
    assert_eq!(report.ranges, vec![(HEAD + 1, 20_100)]);
    assert_eq!(
        h.db.load_watermark().expect("watermark").last_processed_block,
        Some(20_100)
    );
}

#[tokio::test]
async fn test_longer_lookback_expands_coverage_backwards() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_expand");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");
    assert!(h.db.proposal(qid(2)).expect("lookup").is_none());

    h.session.set_lookback_days(2).await.expect("lookback");
    let report = h.session.sync().await.expect("expand");
    let two_day_start = HEAD - 14_400;
    assert_eq!(report.ranges, vec![(two_day_start, ONE_DAY_START - 1)]);
    assert_eq!(report.new_proposals, vec![qid(2)]);

    // The answer sits in the range covered before B was known.
    assert_eq!(h.db.answers_for(qid(2)).expect("answers").len(), 1);
    assert!(h.db.question_state(qid(2)).expect("lookup").is_some());

    let watermark = h.session.watermark().await;
    assert_eq!(watermark.earliest_indexed_block, Some(two_day_start));
    assert_eq!(watermark.last_processed_block, Some(HEAD));
    assert!(watermark.answer_cache_ready);
    assert_eq!(h.session.phase(), SyncPhase::Synced);

    let again = h.session.sync().await.expect("nothing to expand");
    assert!(again.ranges.is_empty());
    assert!(again.new_proposals.is_empty());
}

#[tokio::test]
async fn test_retried_expansion_backfills_answers_of_already_stored_proposals() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_expand_retry");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");

    h.session.set_lookback_days(2).await.expect("lookback");
    // B's answer at 15_000 lives in the already covered range.
    chain.fail_logs_between(14_900, 15_100, "upstream gateway timeout");
    let err = h.session.sync().await.expect_err("expansion must fail");
    assert!(matches!(err, MirrorError::RangeScanFailed { .. }));
    // Stored before the phase failed.
    assert!(h.db.proposal(qid(2)).expect("lookup").is_some());
    assert_eq!(
        h.db.load_watermark().expect("watermark").earliest_indexed_block,
        Some(ONE_DAY_START)
    );

    chain.clear_log_failures();
    let report = h.session.sync().await.expect("retry");
    let two_day_start = HEAD - 14_400;
    assert_eq!(report.ranges, vec![(two_day_start, ONE_DAY_START - 1)]);
    assert!(report.new_proposals.is_empty());

    assert_eq!(h.db.answers_for(qid(2)).expect("answers").len(), 1);
    let history = h
        .session
        .fetch_answer_history(qid(2))
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user, user(0xbb));
    assert!(h.db.question_state(qid(2)).expect("lookup").is_some());
    assert_eq!(
        h.session.watermark().await.earliest_indexed_block,
        Some(two_day_start)
    );
}

#[tokio::test]
async fn test_polling_reports_changes_and_stops_cleanly() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_polling");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");

    let (sink, mut events) = mpsc::channel(8);
    h.session.start_polling(Duration::from_millis(20), sink);
    assert!(h.session.is_polling());
    assert_eq!(h.session.phase(), SyncPhase::Polling);

    chain.set_question(ORACLE, qid(1), &open_question(55));
    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("poll tick in time")
        .expect("sink open");
    assert_eq!(event, SyncEvent::Updated(vec![qid(1)]));

    chain.fail_next("eth_blockNumber", 2, "connection reset by peer");
    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("poll tick in time")
        .expect("sink open");
    match event {
        SyncEvent::Failed(message) => assert!(message.starts_with("temporary failure")),
        other => panic!("expected a failure event, got {other:?}"),
    }

    h.session.stop_polling();
    assert!(!h.session.is_polling());
    assert_eq!(h.session.phase(), SyncPhase::Synced);
    h.session.stop_polling();
    assert_eq!(h.session.phase(), SyncPhase::Synced);

    chain.set_question(ORACLE, qid(1), &open_question(77));
    sleep(Duration::from_millis(100)).await;
    assert!(!matches!(events.try_recv(), Ok(SyncEvent::Updated(_))));
}

#[tokio::test]
async fn test_unconnected_session_and_bad_endpoint() {
    let chain = chain();
    let h = harness(&chain, "session_unconnected");

    assert!(matches!(
        h.session.sync().await,
        Err(MirrorError::NotConnected)
    ));
    assert!(matches!(
        h.session.proposal_statuses().await,
        Err(MirrorError::NotConnected)
    ));
    assert!(matches!(
        h.session
            .transaction_status(&format!("0x{}", "ab".repeat(32)))
            .await,
        Err(MirrorError::NotConnected)
    ));

    let err = h.session.connect("nowhere").await.expect_err("unknown endpoint");
    assert!(matches!(err, MirrorError::Rpc(RpcError::Connect { .. })));
    assert_eq!(h.session.phase(), SyncPhase::Disconnected);
    assert_eq!(h.session.endpoint().await, None);

    h.session.connect("primary").await.expect("connect");
    assert_eq!(h.session.endpoint().await.as_deref(), Some("primary"));
    let module = h.session.module_config().await.expect("module loaded");
    assert_eq!(module.oracle, ORACLE);
    assert_eq!(module.minimum_bond, U256::from(MODULE_MIN_BOND));
}

#[tokio::test]
async fn test_reset_cache_forces_fresh_backfill_and_keeps_preferences() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_reset");
    h.session.connect("primary").await.expect("connect");
    h.session.sync().await.expect("backfill");
    h.session
        .set_poll_interval(Duration::from_millis(250))
        .await
        .expect("interval");

    h.session.reset_cache().await.expect("reset");
    assert!(h.session.watermark().await.is_empty());
    assert!(h.session.proposals().await.expect("proposals").is_empty());
    assert_eq!(h.db.answer_count().expect("count"), 0);
    assert_eq!(
        h.session.poll_interval().await.expect("interval"),
        Duration::from_millis(250)
    );

    let report = h.session.sync().await.expect("backfill again");
    assert_eq!(report.ranges, vec![(ONE_DAY_START, HEAD)]);
    assert_eq!(report.new_proposals, vec![qid(1), qid(3)]);
    assert_eq!(h.db.answer_count().expect("count"), 2);
}

#[tokio::test]
async fn test_exhausted_scan_fails_over_to_backup_endpoint() {
    let primary = chain();
    let backup = chain();
    seed(&primary);
    seed(&backup);
    let connector =
        MockConnector::single("primary", primary.clone()).with("backup", backup.clone());
    let h = harness_with(connector, "session_failover");
    h.session
        .set_exhaustion_handler(round_robin_handler(vec![
            "primary".to_string(),
            "backup".to_string(),
        ]))
        .await;
    h.session.connect("primary").await.expect("connect");

    primary.fail_next("eth_getLogs", 2, "connection reset by peer");
    let err = h.session.sync().await.expect_err("primary exhausted");
    assert!(err.is_transient());
    assert_eq!(h.session.endpoint().await.as_deref(), Some("backup"));
    assert!(h.session.watermark().await.is_empty());

    let report = h.session.sync().await.expect("backup serves the retry");
    assert_eq!(report.new_proposals, vec![qid(1), qid(3)]);
    assert!(backup.call_count("eth_getLogs") > 0);
    assert_eq!(
        h.session.watermark().await.last_processed_block,
        Some(HEAD)
    );
}

#[tokio::test]
async fn test_unrecoverable_calldata_degrades_to_unavailable() {
    let chain = chain();
    let wrapped = proposal(5, "QmWrapped", vec![B256::repeat_byte(0x55)], 15_000);
    chain.add_proposal(&wrapped);
    // Routed through a wrapper contract: the outer calldata is not an addProposal call.
    chain.add_transaction(wrapped.tx_hash, vec![0xde, 0xad, 0xbe, 0xef].into());
    chain.set_question(ORACLE, qid(5), &open_question(10));
    let h = harness(&chain, "session_wrapped");
    h.session.connect("primary").await.expect("connect");

    let report = h.session.sync().await.expect("backfill");
    assert_eq!(report.new_proposals, vec![qid(5)]);
    let stored = h.db.proposal(qid(5)).expect("lookup").expect("stored");
    assert!(!stored.proposal_id.is_found());
    assert!(!stored.tx_hashes.is_found());
    assert!(!stored.question_text.is_found());

    assert!(matches!(
        h.session.execution_progress(qid(5)).await,
        Err(MirrorError::MissingCommitments(id)) if id == qid(5)
    ));
    assert_eq!(
        h.session.proposal_status(qid(5)).await.expect("status").label,
        StatusLabel::Pending
    );
}

#[tokio::test]
async fn test_shared_handle_serializes_phases() {
    let chain = chain();
    seed(&chain);
    let h = harness(&chain, "session_shared");
    h.session.connect("primary").await.expect("connect");

    let (a, b) = tokio::join!(h.session.sync(), h.session.sync());
    let a = a.expect("first");
    let b = b.expect("second");
    // Whichever ran second saw the committed watermark and only did an incremental pass.
    assert_eq!(a.new_proposals.len() + b.new_proposals.len(), 2);
    assert_eq!(h.db.proposals().expect("proposals").len(), 2);
    assert_eq!(h.db.answer_count().expect("count"), 2);
}
