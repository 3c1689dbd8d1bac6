use super::poller::Poller;
use super::{plan_coverage_expansion, SyncEvent, SyncPhase, SyncReport, TxStatus};
use crate::bundle::{
    self, encode_execute_proposal_with_index, BundleTransaction, CommitmentDomain,
    ExecutionProgress, TxBundle,
};
use crate::chain::{Connector, LogQuery};
use crate::claims::{self, ClaimArrays, ClaimableEntry};
use crate::config::chains::ChainConfig;
use crate::contracts;
use crate::error::MirrorError;
use crate::indexer::{
    build_question_text, estimate_block, load_question_state, parse_creation_log,
    refresh_states, scan_logs, AnswerIndexer, ModuleConfig, ProposalDecoder,
};
use crate::model::{AnswerEvent, Proposal, QuestionState, SyncWatermark};
use crate::status::{derive_status, ProposalStatus};
use crate::storage::mirror_db::{KEY_LOOKBACK_DAYS, KEY_POLL_INTERVAL_MS};
use crate::storage::MirrorDb;
use crate::utils::clock::unix_now;
use crate::utils::config::Config;
use crate::utils::rpc::{ExhaustionHandler, RpcAccess};
use alloy::primitives::{Address, Bytes, B256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;

const SECONDS_PER_DAY: u64 = 86_400;

/// Calldata for the next unexecuted transaction of a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCall {
    pub index: usize,
    pub to: Address,
    pub data: Bytes,
}

/// Caller-facing handle over one mirror database and one endpoint.
///
/// Phases run one at a time behind an async mutex. Polling re-enters through the same
/// mutex, so a manual sync and a poll tick never interleave.
pub struct SyncSession {
    core: Arc<tokio::sync::Mutex<SyncCore>>,
    phase: Arc<Mutex<SyncPhase>>,
    polling: Arc<AtomicBool>,
    poller: Mutex<Option<Poller>>,
}

impl SyncSession {
    pub fn new(config: Config, db: MirrorDb, connector: Arc<dyn Connector>) -> Self {
        let phase = Arc::new(Mutex::new(SyncPhase::Disconnected));
        let polling = Arc::new(AtomicBool::new(false));
        let core = SyncCore {
            config,
            db,
            connector,
            rpc: None,
            module: None,
            oracle: None,
            watermark: SyncWatermark::default(),
            known: HashSet::new(),
            on_exhausted: None,
            phase: phase.clone(),
            polling: polling.clone(),
        };
        Self {
            core: Arc::new(tokio::sync::Mutex::new(core)),
            phase,
            polling,
            poller: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn watermark(&self) -> SyncWatermark {
        self.core.lock().await.watermark
    }

    pub async fn module_config(&self) -> Option<ModuleConfig> {
        self.core.lock().await.module
    }

    pub async fn set_exhaustion_handler(&self, handler: Option<ExhaustionHandler>) {
        self.core.lock().await.set_exhaustion_handler(handler);
    }

    pub async fn connect(&self, endpoint: &str) -> Result<(), MirrorError> {
        self.core.lock().await.connect(endpoint).await
    }

    pub async fn endpoint(&self) -> Option<String> {
        self.core.lock().await.rpc.as_ref().map(RpcAccess::endpoint)
    }

    /// Runs whichever phases the watermark calls for, then an incremental pass.
    pub async fn sync(&self) -> Result<SyncReport, MirrorError> {
        self.core.lock().await.sync().await
    }

    pub async fn backfill(&self) -> Result<SyncReport, MirrorError> {
        self.core.lock().await.backfill().await
    }

    pub async fn expand_coverage(&self, desired_start: u64) -> Result<SyncReport, MirrorError> {
        self.core.lock().await.expand_coverage(desired_start).await
    }

    pub async fn fill_answer_cache(&self) -> Result<SyncReport, MirrorError> {
        self.core.lock().await.fill_answer_cache().await
    }

    pub async fn incremental_sync(&self) -> Result<SyncReport, MirrorError> {
        self.core.lock().await.incremental_sync().await
    }

    /// Arms the poller, replacing any previous one. Must run inside a tokio runtime.
    pub fn start_polling(&self, interval: Duration, sink: mpsc::Sender<SyncEvent>) {
        self.stop_polling();
        let core = self.core.clone();
        let poller = Poller::spawn(interval, sink, move || {
            let core = core.clone();
            async move { core.lock().await.incremental_sync().await }
        });
        *self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(poller);
        self.polling.store(true, Ordering::SeqCst);
        let mut phase = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *phase == SyncPhase::Synced {
            *phase = SyncPhase::Polling;
        }
        tracing::info!("[SYNC] Polling every {}ms", interval.as_millis());
    }

    /// No-op when not polling.
    pub fn stop_polling(&self) {
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(poller) = previous else {
            return;
        };
        poller.stop();
        self.polling.store(false, Ordering::SeqCst);
        let mut phase = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *phase == SyncPhase::Polling {
            *phase = SyncPhase::Synced;
        }
        tracing::info!("[SYNC] Polling stopped");
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|poller| !poller.is_finished())
            .unwrap_or(false)
    }

    /// Stored preference, falling back to the configured interval.
    pub async fn poll_interval(&self) -> Result<Duration, MirrorError> {
        let core = self.core.lock().await;
        let ms = core
            .setting_u64(KEY_POLL_INTERVAL_MS)?
            .unwrap_or(core.config.poll_interval_ms)
            .max(1);
        Ok(Duration::from_millis(ms))
    }

    pub async fn set_poll_interval(&self, interval: Duration) -> Result<(), MirrorError> {
        let ms = (interval.as_millis() as u64).max(1);
        self.core
            .lock()
            .await
            .db
            .set_setting(KEY_POLL_INTERVAL_MS, &ms.to_string())?;
        Ok(())
    }

    /// Takes effect on the next [`SyncSession::sync`] as a coverage expansion.
    pub async fn set_lookback_days(&self, days: u64) -> Result<(), MirrorError> {
        self.core
            .lock()
            .await
            .db
            .set_setting(KEY_LOOKBACK_DAYS, &days.to_string())?;
        Ok(())
    }

    pub async fn proposals(&self) -> Result<Vec<Proposal>, MirrorError> {
        Ok(self.core.lock().await.db.proposals()?)
    }

    pub async fn load_question_state(&self, question_id: B256) -> Result<QuestionState, MirrorError> {
        self.core.lock().await.load_question_state(question_id).await
    }

    pub async fn fetch_answer_history(
        &self,
        question_id: B256,
    ) -> Result<Vec<AnswerEvent>, MirrorError> {
        self.core.lock().await.fetch_answer_history(question_id).await
    }

    pub async fn compute_claimable(
        &self,
        question_id: B256,
        user: Address,
    ) -> Result<Vec<ClaimableEntry>, MirrorError> {
        let mut core = self.core.lock().await;
        let history = core.fetch_answer_history(question_id).await?;
        let state = core.load_question_state(question_id).await?;
        Ok(claims::compute_claimable(&history, &state, user, unix_now()))
    }

    pub fn build_claim_arrays(&self, history: &[AnswerEvent]) -> ClaimArrays {
        claims::build_claim_arrays(history)
    }

    /// `claimWinnings` calldata over the full answer history.
    pub async fn claim_winnings_call(&self, question_id: B256) -> Result<Bytes, MirrorError> {
        let history = self.fetch_answer_history(question_id).await?;
        Ok(claims::encode_claim_winnings(
            question_id,
            &claims::build_claim_arrays(&history),
        ))
    }

    pub async fn proposal_status(&self, question_id: B256) -> Result<ProposalStatus, MirrorError> {
        self.core.lock().await.proposal_status(question_id)
    }

    /// Every mirrored proposal with its current verdict, oldest first.
    pub async fn proposal_statuses(&self) -> Result<Vec<(Proposal, ProposalStatus)>, MirrorError> {
        let core = self.core.lock().await;
        let module = core.module.ok_or(MirrorError::NotConnected)?;
        let states: HashMap<B256, QuestionState> = core
            .db
            .question_states()?
            .into_iter()
            .map(|state| (state.question_id, state))
            .collect();
        let now = unix_now();
        Ok(core
            .db
            .proposals()?
            .into_iter()
            .map(|proposal| {
                let status = derive_status(states.get(&proposal.question_id), &module, now);
                (proposal, status)
            })
            .collect())
    }

    /// Hashes `transactions` under the module's commitment domain and stores them once they
    /// match the proposal's on-chain commitments. A re-import replaces the stored bundle.
    pub async fn import_bundle(
        &self,
        proposal_id: &str,
        transactions: Vec<BundleTransaction>,
    ) -> Result<TxBundle, MirrorError> {
        self.core
            .lock()
            .await
            .import_bundle(proposal_id, transactions)
    }

    pub fn verify_bundle(&self, bundle: &TxBundle, expected: &[B256]) -> Result<(), MirrorError> {
        bundle::verify_bundle(bundle, expected)?;
        Ok(())
    }

    pub async fn transaction_status(&self, hash: &str) -> Result<TxStatus, MirrorError> {
        let tx_hash = parse_tx_hash(hash)?;
        let core = self.core.lock().await;
        let rpc = core.rpc.as_ref().ok_or(MirrorError::NotConnected)?;
        Ok(match rpc.receipt_status(tx_hash).await? {
            None => TxStatus::Pending,
            Some(true) => TxStatus::Succeeded,
            Some(false) => TxStatus::Reverted,
        })
    }

    pub async fn execution_progress(
        &self,
        question_id: B256,
    ) -> Result<ExecutionProgress, MirrorError> {
        self.core.lock().await.execution_progress(question_id).await
    }

    /// `None` once every transaction has executed.
    pub async fn next_execution_call(
        &self,
        question_id: B256,
    ) -> Result<Option<ExecutionCall>, MirrorError> {
        let core = self.core.lock().await;
        let progress = core.execution_progress(question_id).await?;
        let Some(index) = progress.next_index else {
            return Ok(None);
        };
        let proposal = core.proposal(question_id)?;
        let (proposal_id, tx_hashes) = commitments(&proposal)?;
        let bundle = core
            .db
            .bundle(proposal_id)?
            .ok_or_else(|| MirrorError::MissingBundle(proposal_id.clone()))?;
        bundle::verify_bundle(&bundle, tx_hashes)?;
        let tx = bundle
            .transactions
            .get(index)
            .ok_or_else(|| MirrorError::MissingBundle(proposal_id.clone()))?;
        Ok(Some(ExecutionCall {
            index,
            to: core.config.module_address,
            data: encode_execute_proposal_with_index(proposal_id, tx_hashes, tx, index),
        }))
    }

    /// Wipes cached chain data and the watermark. The next sync starts with a backfill.
    pub async fn reset_cache(&self) -> Result<(), MirrorError> {
        let mut core = self.core.lock().await;
        core.db.reset_cache()?;
        core.invalidate_mirrors();
        Ok(())
    }

    /// Call after changing the database behind the session's back.
    pub async fn invalidate_mirrors(&self) {
        self.core.lock().await.invalidate_mirrors();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Accepts 64 hex digits with or without the `0x` prefix.
pub fn parse_tx_hash(raw: &str) -> Result<B256, MirrorError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != 64 {
        return Err(MirrorError::MalformedTxHash(raw.to_string()));
    }
    let bytes = hex::decode(digits).map_err(|_| MirrorError::MalformedTxHash(raw.to_string()))?;
    Ok(B256::from_slice(&bytes))
}

fn commitments(proposal: &Proposal) -> Result<(&String, &Vec<B256>), MirrorError> {
    match (proposal.proposal_id.found(), proposal.tx_hashes.found()) {
        (Some(id), Some(hashes)) => Ok((id, hashes)),
        _ => Err(MirrorError::MissingCommitments(proposal.question_id)),
    }
}

struct Connection<'a> {
    rpc: &'a RpcAccess,
    oracle: Address,
}

/// Everything a phase reads or writes. Only reachable through the session's mutex.
struct SyncCore {
    config: Config,
    db: MirrorDb,
    connector: Arc<dyn Connector>,
    rpc: Option<RpcAccess>,
    module: Option<ModuleConfig>,
    oracle: Option<Address>,
    /// In-memory mirror of the persisted watermark.
    watermark: SyncWatermark,
    known: HashSet<B256>,
    on_exhausted: Option<ExhaustionHandler>,
    phase: Arc<Mutex<SyncPhase>>,
    polling: Arc<AtomicBool>,
}

impl SyncCore {
    fn set_phase(&self, next: SyncPhase) -> SyncPhase {
        let mut phase = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *phase;
        if previous != next {
            tracing::debug!("[SYNC] Phase {} -> {}", previous.as_str(), next.as_str());
        }
        *phase = next;
        previous
    }

    fn settled_phase(&self) -> SyncPhase {
        if self.polling.load(Ordering::SeqCst) {
            SyncPhase::Polling
        } else {
            SyncPhase::Synced
        }
    }

    fn set_exhaustion_handler(&mut self, handler: Option<ExhaustionHandler>) {
        if let Some(rpc) = self.rpc.as_mut() {
            rpc.set_exhaustion_handler(handler.clone());
        }
        self.on_exhausted = handler;
    }

    fn connection(&self) -> Result<Connection<'_>, MirrorError> {
        match (self.rpc.as_ref(), self.oracle) {
            (Some(rpc), Some(oracle)) => Ok(Connection { rpc, oracle }),
            _ => Err(MirrorError::NotConnected),
        }
    }

    fn setting_u64(&self, key: &str) -> Result<Option<u64>, MirrorError> {
        Ok(self
            .db
            .setting(key)?
            .and_then(|raw| raw.trim().parse::<u64>().ok()))
    }

    fn reload_mirrors(&mut self) -> Result<(), MirrorError> {
        self.watermark = self.db.load_watermark()?;
        self.known = self.db.proposal_question_ids()?;
        Ok(())
    }

    fn invalidate_mirrors(&mut self) {
        self.watermark = SyncWatermark::default();
        self.known.clear();
        tracing::info!("[SYNC] In-memory mirrors invalidated");
    }

    async fn open_connection(
        &self,
        endpoint: &str,
    ) -> Result<(RpcAccess, ModuleConfig), MirrorError> {
        let mut rpc = RpcAccess::connect(self.connector.clone(), endpoint, self.config.retry)?;
        rpc.set_exhaustion_handler(self.on_exhausted.clone());
        let module = ModuleConfig::load(&rpc, self.config.module_address).await?;
        Ok((rpc, module))
    }

    async fn connect(&mut self, endpoint: &str) -> Result<(), MirrorError> {
        self.set_phase(SyncPhase::Connecting);
        let (rpc, module) = match self.open_connection(endpoint).await {
            Ok(opened) => opened,
            Err(err) => {
                tracing::warn!("[SYNC] Connect to {} failed: {}", endpoint, err);
                self.rpc = None;
                self.module = None;
                self.oracle = None;
                self.set_phase(SyncPhase::Disconnected);
                return Err(err);
            }
        };
        let oracle = match self.config.oracle_address {
            Some(configured) if configured != module.oracle => {
                tracing::warn!(
                    "[SYNC] Configured oracle {:#x} differs from module oracle {:#x}; using configured",
                    configured,
                    module.oracle
                );
                configured
            }
            Some(configured) => configured,
            None => module.oracle,
        };
        self.rpc = Some(rpc);
        self.module = Some(module);
        self.oracle = Some(oracle);
        self.reload_mirrors()?;
        tracing::info!(
            "[SYNC] Connected to {} (chain {}, module {:#x}, oracle {:#x})",
            endpoint,
            self.config.chain_id,
            self.config.module_address,
            oracle
        );
        Ok(())
    }

    fn lookback_seconds(&self) -> Result<u64, MirrorError> {
        let days = self
            .setting_u64(KEY_LOOKBACK_DAYS)?
            .unwrap_or(self.config.lookback_days);
        Ok(days.saturating_mul(SECONDS_PER_DAY))
    }

    async fn desired_start(&self, conn: &Connection<'_>) -> Result<u64, MirrorError> {
        let block_time_ms = ChainConfig::get(self.config.chain_id).block_time_ms;
        Ok(estimate_block(conn.rpc, self.lookback_seconds()?, block_time_ms).await?)
    }

    /// Commits a phase: the watermark is persisted only when the whole phase succeeded.
    fn finish_phase(
        &mut self,
        previous: SyncPhase,
        outcome: Result<(SyncReport, SyncWatermark), MirrorError>,
    ) -> Result<SyncReport, MirrorError> {
        let committed = outcome.and_then(|(report, watermark)| {
            self.db.save_watermark(&watermark)?;
            Ok((report, watermark))
        });
        match committed {
            Ok((report, watermark)) => {
                self.watermark = watermark;
                self.known = self.db.proposal_question_ids()?;
                self.set_phase(self.settled_phase());
                Ok(report)
            }
            Err(err) => {
                tracing::warn!("[SYNC] {}", err.user_message());
                self.set_phase(previous);
                Err(err)
            }
        }
    }

    async fn sync(&mut self) -> Result<SyncReport, MirrorError> {
        self.connection()?;
        self.reload_mirrors()?;
        if self.watermark.is_empty() {
            return self.backfill().await;
        }

        let mut report = SyncReport::default();
        let desired_start = {
            let conn = self.connection()?;
            self.desired_start(&conn).await?
        };
        if plan_coverage_expansion(&self.watermark, desired_start).is_some() {
            report.merge(self.expand_coverage(desired_start).await?);
        }
        if !self.watermark.answer_cache_ready {
            report.merge(self.fill_answer_cache().await?);
        }
        report.merge(self.incremental_sync().await?);
        Ok(report)
    }

    async fn backfill(&mut self) -> Result<SyncReport, MirrorError> {
        self.connection()?;
        self.reload_mirrors()?;
        let previous = self.set_phase(SyncPhase::Backfilling);
        let outcome = self.run_backfill().await;
        self.finish_phase(previous, outcome)
    }

    async fn expand_coverage(&mut self, desired_start: u64) -> Result<SyncReport, MirrorError> {
        self.connection()?;
        self.reload_mirrors()?;
        if plan_coverage_expansion(&self.watermark, desired_start).is_none() {
            return Ok(SyncReport::default());
        }
        let previous = self.set_phase(SyncPhase::CoverageExpansion);
        let outcome = self.run_expand_coverage(desired_start).await;
        self.finish_phase(previous, outcome)
    }

    async fn fill_answer_cache(&mut self) -> Result<SyncReport, MirrorError> {
        self.connection()?;
        self.reload_mirrors()?;
        let previous = self.set_phase(SyncPhase::AnswerCacheFill);
        let outcome = self.run_fill_answer_cache().await;
        self.finish_phase(previous, outcome)
    }

    async fn incremental_sync(&mut self) -> Result<SyncReport, MirrorError> {
        self.connection()?;
        self.reload_mirrors()?;
        if self.watermark.last_processed_block.is_none() {
            tracing::info!("[SYNC] No watermark yet; running backfill instead");
            return self.backfill().await;
        }
        let previous = *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let outcome = self.run_incremental().await;
        self.finish_phase(previous, outcome)
    }

    async fn run_backfill(&self) -> Result<(SyncReport, SyncWatermark), MirrorError> {
        let conn = self.connection()?;
        let head = conn.rpc.block_number().await?;
        let start = self.desired_start(&conn).await?.min(head);
        tracing::info!("[SYNC] Backfilling blocks [{}..={}]", start, head);

        let mut known = self.known.clone();
        let mut report = SyncReport {
            ranges: vec![(start, head)],
            ..SyncReport::default()
        };
        report.new_proposals = self.scan_proposals(&conn, start, head, &mut known).await?;

        let every: Vec<B256> = self
            .db
            .proposals()?
            .iter()
            .map(|proposal| proposal.question_id)
            .collect();
        report.absorb_refresh(refresh_states(conn.rpc, &self.db, conn.oracle, &every).await);

        report.new_answers = self.index_answers(&conn, start, head, &known).await?;

        let mut watermark = self.watermark;
        watermark.cover(start, head);
        watermark.answer_cache_ready = true;
        tracing::info!(
            "[SYNC] Backfill done: {} proposal(s), {} answer(s), {} state failure(s)",
            report.new_proposals.len(),
            report.new_answers,
            report.failed_states.len()
        );
        Ok((report, watermark))
    }

    async fn run_expand_coverage(
        &self,
        desired_start: u64,
    ) -> Result<(SyncReport, SyncWatermark), MirrorError> {
        let conn = self.connection()?;
        let mut watermark = self.watermark;
        let Some((from, to)) = plan_coverage_expansion(&watermark, desired_start) else {
            return Ok((SyncReport::default(), watermark));
        };
        tracing::info!("[SYNC] Expanding coverage to [{}..={}]", from, to);

        let mut known = self.known.clone();
        let mut report = SyncReport {
            ranges: vec![(from, to)],
            ..SyncReport::default()
        };
        report.new_proposals = self.scan_proposals(&conn, from, to, &mut known).await?;
        report.new_answers = self.index_answers(&conn, from, to, &known).await?;

        // Taken from the db rather than this attempt's scan: a failed earlier attempt
        // may already have stored some of these proposals.
        let expanded: Vec<B256> = self
            .db
            .proposals()?
            .into_iter()
            .filter(|proposal| (from..=to).contains(&proposal.created_block))
            .map(|proposal| proposal.question_id)
            .collect();

        // Answers to these questions inside the already covered range were dropped as
        // unknown when that range was scanned.
        if let Some(covered_to) = watermark.last_processed_block.filter(|last| *last > to) {
            let indexer = AnswerIndexer::new(
                conn.rpc,
                &self.db,
                conn.oracle,
                self.config.log_chunk_blocks,
            );
            for question_id in &expanded {
                indexer.index_question(*question_id, to + 1, covered_to).await?;
            }
        }
        let refresh = refresh_states(conn.rpc, &self.db, conn.oracle, &expanded).await;
        report.absorb_refresh(refresh);

        watermark.cover(from, to);
        Ok((report, watermark))
    }

    async fn run_fill_answer_cache(&self) -> Result<(SyncReport, SyncWatermark), MirrorError> {
        let conn = self.connection()?;
        let mut watermark = self.watermark;
        let mut report = SyncReport::default();
        if let (Some(from), Some(to)) = (
            watermark.earliest_indexed_block,
            watermark.last_processed_block,
        ) {
            tracing::info!("[SYNC] Filling answer cache over [{}..={}]", from, to);
            report.ranges.push((from, to));
            report.new_answers = self.index_answers(&conn, from, to, &self.known).await?;
        }
        watermark.answer_cache_ready = true;
        Ok((report, watermark))
    }

    async fn run_incremental(&self) -> Result<(SyncReport, SyncWatermark), MirrorError> {
        let conn = self.connection()?;
        let mut watermark = self.watermark;
        let last = watermark.last_processed_block.unwrap_or_default();
        let head = conn.rpc.block_number().await?;

        let mut report = SyncReport::default();
        if head > last {
            let from = last + 1;
            let mut known = self.known.clone();
            report.ranges.push((from, head));
            report.new_proposals = self.scan_proposals(&conn, from, head, &mut known).await?;
            report.new_answers = self.index_answers(&conn, from, head, &known).await?;
            watermark.cover(from, head);
        }

        let active = self.active_set()?;
        report.absorb_refresh(refresh_states(conn.rpc, &self.db, conn.oracle, &active).await);
        tracing::debug!(
            "[SYNC] Incremental up to #{}: {} new proposal(s), {} new answer(s), {}/{} active changed",
            head.max(last),
            report.new_proposals.len(),
            report.new_answers,
            report.changed.len(),
            active.len()
        );
        Ok((report, watermark))
    }

    /// Unsettled questions: not finalized, under arbitration, or never loaded.
    fn active_set(&self) -> Result<Vec<B256>, MirrorError> {
        let states: HashMap<B256, QuestionState> = self
            .db
            .question_states()?
            .into_iter()
            .map(|state| (state.question_id, state))
            .collect();
        Ok(self
            .db
            .proposals()?
            .into_iter()
            .map(|proposal| proposal.question_id)
            .filter(|id| states.get(id).map(QuestionState::is_active).unwrap_or(true))
            .collect())
    }

    /// Decodes and stores proposals created in `[from, to]`. Returns the new question ids.
    async fn scan_proposals(
        &self,
        conn: &Connection<'_>,
        from: u64,
        to: u64,
        known: &mut HashSet<B256>,
    ) -> Result<Vec<B256>, MirrorError> {
        let query = LogQuery::new(
            self.config.module_address,
            contracts::proposal_created_topic(),
        );
        let logs = scan_logs(
            conn.rpc,
            query,
            from,
            to,
            self.config.log_chunk_blocks,
            |progress| {
                tracing::debug!(
                    "[SCAN] Proposals {}% ({} log(s), through #{})",
                    progress.percent,
                    progress.logs_found,
                    progress.chunk_to
                )
            },
        )
        .await?;

        let decoder = ProposalDecoder::new(conn.rpc, self.config.module_address);
        let mut fresh = Vec::new();
        for log in &logs {
            if let Ok(creation) = parse_creation_log(log) {
                if known.contains(&creation.question_id) {
                    continue;
                }
            }
            let proposal = match decoder.decode(log).await {
                Ok(proposal) => proposal,
                Err(MirrorError::DecodeFailed(err)) => {
                    tracing::warn!(
                        "[SCAN] Skipping creation log at #{}:{}: {}",
                        log.block_number,
                        log.log_index,
                        err
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            if self.db.insert_proposal(&proposal)? {
                known.insert(proposal.question_id);
                fresh.push(proposal.question_id);
            }
        }
        if !fresh.is_empty() {
            tracing::info!(
                "[SCAN] {} new proposal(s) in [{}..={}]",
                fresh.len(),
                from,
                to
            );
        }
        Ok(fresh)
    }

    async fn index_answers(
        &self,
        conn: &Connection<'_>,
        from: u64,
        to: u64,
        known: &HashSet<B256>,
    ) -> Result<usize, MirrorError> {
        if known.is_empty() {
            return Ok(0);
        }
        AnswerIndexer::new(conn.rpc, &self.db, conn.oracle, self.config.log_chunk_blocks)
            .index_range(from, to, known, |progress| {
                tracing::debug!(
                    "[SCAN] Answers {}% ({} log(s), through #{})",
                    progress.percent,
                    progress.logs_found,
                    progress.chunk_to
                )
            })
            .await
    }

    async fn load_question_state(&self, question_id: B256) -> Result<QuestionState, MirrorError> {
        let conn = self.connection()?;
        load_question_state(conn.rpc, &self.db, conn.oracle, question_id).await
    }

    async fn fetch_answer_history(
        &mut self,
        question_id: B256,
    ) -> Result<Vec<AnswerEvent>, MirrorError> {
        self.reload_mirrors()?;
        if self.watermark.answer_cache_ready && self.known.contains(&question_id) {
            return Ok(self.db.answers_for(question_id)?);
        }
        let conn = self.connection()?;
        let head = conn.rpc.block_number().await?;
        let from = match self
            .db
            .proposal(question_id)?
            .map(|proposal| proposal.created_block)
            .or(self.watermark.earliest_indexed_block)
        {
            Some(from) => from,
            None => self.desired_start(&conn).await?,
        };
        AnswerIndexer::new(conn.rpc, &self.db, conn.oracle, self.config.log_chunk_blocks)
            .index_question(question_id, from.min(head), head)
            .await
    }

    fn proposal(&self, question_id: B256) -> Result<Proposal, MirrorError> {
        self.db
            .proposal(question_id)?
            .ok_or_else(|| MirrorError::UnknownProposal(format!("{question_id:#x}")))
    }

    fn proposal_status(&self, question_id: B256) -> Result<ProposalStatus, MirrorError> {
        let module = self.module.ok_or(MirrorError::NotConnected)?;
        let state = self.db.question_state(question_id)?;
        Ok(derive_status(state.as_ref(), &module, unix_now()))
    }

    fn import_bundle(
        &self,
        proposal_id: &str,
        transactions: Vec<BundleTransaction>,
    ) -> Result<TxBundle, MirrorError> {
        let proposal = self
            .db
            .proposal_by_id(proposal_id)?
            .ok_or_else(|| MirrorError::UnknownProposal(proposal_id.to_string()))?;
        let domain = CommitmentDomain::new(self.config.chain_id, self.config.module_address);
        let bundle = domain.build_bundle(proposal_id, transactions);
        match proposal.tx_hashes.found() {
            Some(expected) => bundle::verify_bundle(&bundle, expected)?,
            None => tracing::warn!(
                "[SYNC] Storing bundle for `{}` unverified; on-chain commitments unavailable",
                proposal_id
            ),
        }
        self.db.save_bundle(&bundle)?;
        tracing::info!(
            "[SYNC] Imported bundle for `{}` ({} transaction(s))",
            proposal_id,
            bundle.transactions.len()
        );
        Ok(bundle)
    }

    async fn execution_progress(&self, question_id: B256) -> Result<ExecutionProgress, MirrorError> {
        let conn = self.connection()?;
        let proposal = self.proposal(question_id)?;
        let (proposal_id, tx_hashes) = commitments(&proposal)?;
        let question_text = match proposal.question_text.found() {
            Some(text) => text.clone(),
            None => build_question_text(proposal_id, tx_hashes),
        };
        Ok(bundle::load_execution_progress(
            conn.rpc,
            self.config.module_address,
            &question_text,
            tx_hashes,
        )
        .await?)
    }
}
