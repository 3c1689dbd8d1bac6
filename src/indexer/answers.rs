use super::range_scan::{scan_logs, ScanProgress};
use crate::chain::{LogQuery, RawLog};
use crate::contracts::{self, IRealitio};
use crate::error::{DecodeError, MirrorError};
use crate::model::AnswerEvent;
use crate::storage::MirrorDb;
use crate::utils::rpc::RpcAccess;
use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use std::collections::HashSet;

const ANSWER_DATA_LEN: usize = 5 * 32;

/// Strict `LogNewAnswer` decoder.
///
/// Topics are `[signature, question_id, user]`; data is exactly five words
/// `answer, history_hash, bond, ts, is_commitment`.
pub fn parse_answer_log(log: &RawLog) -> Result<AnswerEvent, DecodeError> {
    contracts::check_event_topics(&log.topics, contracts::new_answer_topic(), 3)?;
    if log.data.len() != ANSWER_DATA_LEN {
        return Err(DecodeError::DataLength {
            expected: ANSWER_DATA_LEN,
            got: log.data.len(),
        });
    }
    // Topic detokenizing keeps the low 20 bytes without looking at the rest.
    let user_topic = log.topics[2];
    if user_topic[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::InvalidField {
            field: "user",
            reason: format!("{user_topic:#x} has dirty high bytes"),
        });
    }
    let event =
        IRealitio::LogNewAnswer::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|err| DecodeError::Event(err.to_string()))?;
    let timestamp = u64::try_from(event.ts).map_err(|_| DecodeError::InvalidField {
        field: "ts",
        reason: format!("{} does not fit in 64 bits", event.ts),
    })?;
    Ok(AnswerEvent {
        question_id: event.question_id,
        answer: event.answer,
        user: event.user,
        bond: event.bond,
        history_hash: event.history_hash,
        timestamp,
        block_number: log.block_number,
        log_index: log.log_index,
        transaction_index: log.transaction_index,
        is_commitment: event.is_commitment,
    })
}

fn parse_batch(logs: &[RawLog]) -> Vec<AnswerEvent> {
    logs.iter()
        .filter_map(|log| match parse_answer_log(log) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::debug!(
                    "[SCAN] Skipping malformed answer log at #{}:{}: {}",
                    log.block_number,
                    log.log_index,
                    err
                );
                None
            }
        })
        .collect()
}

pub struct AnswerIndexer<'a> {
    rpc: &'a RpcAccess,
    db: &'a MirrorDb,
    oracle: Address,
    chunk_blocks: u64,
}

impl<'a> AnswerIndexer<'a> {
    pub fn new(rpc: &'a RpcAccess, db: &'a MirrorDb, oracle: Address, chunk_blocks: u64) -> Self {
        Self {
            rpc,
            db,
            oracle,
            chunk_blocks,
        }
    }

    fn query(&self) -> LogQuery {
        LogQuery::new(self.oracle, contracts::new_answer_topic())
    }

    /// Contract-wide scan of `[from, to]`, keeping answers to `known` questions only.
    /// Returns how many answers were new.
    pub async fn index_range<F>(
        &self,
        from: u64,
        to: u64,
        known: &HashSet<B256>,
        on_progress: F,
    ) -> Result<usize, MirrorError>
    where
        F: FnMut(ScanProgress),
    {
        let logs = scan_logs(
            self.rpc,
            self.query(),
            from,
            to,
            self.chunk_blocks,
            on_progress,
        )
        .await?;
        let events: Vec<AnswerEvent> = parse_batch(&logs)
            .into_iter()
            .filter(|event| known.contains(&event.question_id))
            .collect();
        let fresh = self.db.upsert_answers(&events)?;
        tracing::debug!(
            "[SCAN] Answers [{}..={}]: {} matched, {} new",
            from,
            to,
            events.len(),
            fresh
        );
        Ok(fresh)
    }

    /// Narrow per-question scan. Returns the full chronological history after the upsert.
    pub async fn index_question(
        &self,
        question_id: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<AnswerEvent>, MirrorError> {
        let logs = scan_logs(
            self.rpc,
            self.query().with_topic1(question_id),
            from,
            to,
            self.chunk_blocks,
            |_| {},
        )
        .await?;
        let events: Vec<AnswerEvent> = parse_batch(&logs)
            .into_iter()
            .filter(|event| event.question_id == question_id)
            .collect();
        self.db.upsert_answers(&events)?;
        Ok(self.db.answers_for(question_id)?)
    }
}
