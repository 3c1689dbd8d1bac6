//! In-memory chain used by unit and integration tests.

use crate::chain::{ChainReader, Connector, LogQuery, RawLog};
use crate::contracts::{self, IRealityModule, IRealitio};
use crate::indexer::proposals::build_question_text;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    head: u64,
    genesis_ts: u64,
    block_time_secs: u64,
    missing_blocks: HashSet<u64>,
    logs: Vec<RawLog>,
    transactions: HashMap<B256, Bytes>,
    calls: HashMap<(Address, Bytes), Result<Bytes, String>>,
    receipts: HashMap<B256, bool>,
    queued_failures: HashMap<&'static str, VecDeque<String>>,
    failing_log_ranges: Vec<(u64, u64, String)>,
    call_counts: HashMap<&'static str, usize>,
    log_queries: Vec<LogQuery>,
}

/// Deterministic chain: block `n` has timestamp `genesis_ts + n * block_time_secs`.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(head: u64, genesis_ts: u64, block_time_secs: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                head,
                genesis_ts,
                block_time_secs,
                ..MockState::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn set_head(&self, head: u64) {
        self.with_state(|s| s.head = head);
    }

    pub fn head(&self) -> u64 {
        self.with_state(|s| s.head)
    }

    pub fn timestamp_of(&self, block: u64) -> u64 {
        self.with_state(|s| s.genesis_ts + block * s.block_time_secs)
    }

    pub fn remove_block(&self, block: u64) {
        self.with_state(|s| {
            s.missing_blocks.insert(block);
        });
    }

    pub fn push_log(&self, log: RawLog) {
        self.with_state(|s| s.logs.push(log));
    }

    pub fn recorded_logs(&self) -> Vec<RawLog> {
        self.with_state(|s| s.logs.clone())
    }

    pub fn add_transaction(&self, hash: B256, input: Bytes) {
        self.with_state(|s| {
            s.transactions.insert(hash, input);
        });
    }

    pub fn set_call(&self, to: Address, data: Bytes, result: Bytes) {
        self.with_state(|s| {
            s.calls.insert((to, data), Ok(result));
        });
    }

    pub fn set_call_revert(&self, to: Address, data: Bytes, reason: &str) {
        self.with_state(|s| {
            s.calls.insert((to, data), Err(reason.to_string()));
        });
    }

    pub fn set_receipt(&self, hash: B256, success: bool) {
        self.with_state(|s| {
            s.receipts.insert(hash, success);
        });
    }

    /// The next `count` calls of `method` fail with `message`.
    pub fn fail_next(&self, method: &'static str, count: usize, message: &str) {
        self.with_state(|s| {
            let queue = s.queued_failures.entry(method).or_default();
            for _ in 0..count {
                queue.push_back(message.to_string());
            }
        });
    }

    /// Every `eth_getLogs` overlapping `[from, to]` fails until cleared.
    pub fn fail_logs_between(&self, from: u64, to: u64, message: &str) {
        self.with_state(|s| s.failing_log_ranges.push((from, to, message.to_string())));
    }

    pub fn clear_log_failures(&self) {
        self.with_state(|s| s.failing_log_ranges.clear());
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.with_state(|s| s.call_counts.get(method).copied().unwrap_or(0))
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.with_state(|s| s.log_queries.clone())
    }

    pub fn clear_log_queries(&self) {
        self.with_state(|s| s.log_queries.clear());
    }

    fn enter(&self, method: &'static str) -> anyhow::Result<()> {
        self.with_state(|s| {
            *s.call_counts.entry(method).or_default() += 1;
            match s
                .queued_failures
                .get_mut(method)
                .and_then(VecDeque::pop_front)
            {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        })
    }

    /// Registers a proposal exactly as the module would emit it: creation log, originating
    /// transaction input and the `buildQuestion` view.
    pub fn add_proposal(&self, fixture: &ProposalFixture) {
        let input = IRealityModule::addProposalCall {
            proposalId: fixture.proposal_id.clone(),
            txHashes: fixture.tx_hashes.clone(),
        }
        .abi_encode();
        self.add_transaction(fixture.tx_hash, input.into());
        self.push_log(RawLog {
            address: fixture.module,
            topics: vec![
                contracts::proposal_created_topic(),
                fixture.question_id,
                contracts::proposal_id_topic(&fixture.proposal_id),
            ],
            data: Bytes::new(),
            block_number: fixture.block,
            log_index: fixture.log_index,
            transaction_hash: fixture.tx_hash,
            transaction_index: 0,
        });
        let question_text = fixture.question_text();
        self.set_call(
            fixture.module,
            contracts::encode_build_question(&fixture.proposal_id, &fixture.tx_hashes),
            IRealityModule::buildQuestionCall::abi_encode_returns(&(question_text,)).into(),
        );
    }

    pub fn add_answer(&self, oracle: Address, answer: &AnswerFixture) {
        let mut data = Vec::with_capacity(5 * 32);
        data.extend_from_slice(answer.answer.as_slice());
        data.extend_from_slice(answer.history_hash.as_slice());
        data.extend_from_slice(&answer.bond.to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(answer.timestamp).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(u8::from(answer.is_commitment)).to_be_bytes::<32>());
        self.push_log(RawLog {
            address: oracle,
            topics: vec![
                contracts::new_answer_topic(),
                answer.question_id,
                answer.user.into_word(),
            ],
            data: data.into(),
            block_number: answer.block,
            log_index: answer.log_index,
            transaction_hash: B256::from(U256::from(answer.block * 1_000 + answer.log_index)),
            transaction_index: answer.log_index,
        });
    }

    pub fn set_question(&self, oracle: Address, question_id: B256, state: &QuestionFixture) {
        self.set_call(
            oracle,
            contracts::encode_questions(question_id),
            IRealitio::questionsCall::abi_encode_returns(&(
                B256::ZERO,
                Address::ZERO,
                0u32,
                86_400u32,
                state.finalize_ts,
                state.is_pending_arbitration,
                U256::ZERO,
                state.best_answer,
                state.history_hash,
                state.bond,
                state.min_bond,
            ))
            .into(),
        );
        self.set_call(
            oracle,
            contracts::encode_is_finalized(question_id),
            IRealitio::isFinalizedCall::abi_encode_returns(&(state.is_finalized,)).into(),
        );
        match state.result {
            Some(result) => self.set_call(
                oracle,
                contracts::encode_result_for(question_id),
                IRealitio::resultForCall::abi_encode_returns(&(result,)).into(),
            ),
            None => self.set_call_revert(
                oracle,
                contracts::encode_result_for(question_id),
                "execution reverted: question must be finalized",
            ),
        }
    }

    pub fn set_module_config(
        &self,
        module: Address,
        oracle: Address,
        cooldown: u32,
        expiration: u32,
        minimum_bond: U256,
    ) {
        self.set_call(
            module,
            contracts::encode_question_cooldown(),
            IRealityModule::questionCooldownCall::abi_encode_returns(&(cooldown,)).into(),
        );
        self.set_call(
            module,
            contracts::encode_answer_expiration(),
            IRealityModule::answerExpirationCall::abi_encode_returns(&(expiration,)).into(),
        );
        self.set_call(
            module,
            contracts::encode_minimum_bond(),
            IRealityModule::minimumBondCall::abi_encode_returns(&(minimum_bond,)).into(),
        );
        self.set_call(
            module,
            contracts::encode_oracle(),
            IRealityModule::oracleCall::abi_encode_returns(&(oracle,)).into(),
        );
    }

    pub fn set_executed(&self, module: Address, question_text: &str, tx_hash: B256, done: bool) {
        self.set_call(
            module,
            contracts::encode_executed_transaction(keccak256(question_text.as_bytes()), tx_hash),
            IRealityModule::executedProposalTransactionsCall::abi_encode_returns(&(done,)).into(),
        );
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> anyhow::Result<u64> {
        self.enter("eth_blockNumber")?;
        Ok(self.head())
    }

    async fn block_timestamp(&self, number: u64) -> anyhow::Result<Option<u64>> {
        self.enter("eth_getBlockByNumber")?;
        Ok(self.with_state(|s| {
            if number > s.head || s.missing_blocks.contains(&number) {
                None
            } else {
                Some(s.genesis_ts + number * s.block_time_secs)
            }
        }))
    }

    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>> {
        self.enter("eth_getLogs")?;
        self.with_state(|s| {
            s.log_queries.push(*query);
            if let Some((_, _, message)) = s
                .failing_log_ranges
                .iter()
                .find(|(from, to, _)| *from <= query.to_block && query.from_block <= *to)
            {
                return Err(anyhow::anyhow!(message.clone()));
            }
            let mut out: Vec<RawLog> = s
                .logs
                .iter()
                .filter(|log| query.matches(log) && log.block_number <= s.head)
                .cloned()
                .collect();
            out.sort_by_key(RawLog::ordering_key);
            Ok(out)
        })
    }

    async fn transaction_input(&self, hash: B256) -> anyhow::Result<Option<Bytes>> {
        self.enter("eth_getTransactionByHash")?;
        Ok(self.with_state(|s| s.transactions.get(&hash).cloned()))
    }

    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes> {
        self.enter("eth_call")?;
        self.with_state(|s| match s.calls.get(&(to, data)) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(reason)) => Err(anyhow::anyhow!(reason.clone())),
            None => Err(anyhow::anyhow!("execution reverted")),
        })
    }

    async fn receipt_status(&self, hash: B256) -> anyhow::Result<Option<bool>> {
        self.enter("eth_getTransactionReceipt")?;
        Ok(self.with_state(|s| s.receipts.get(&hash).copied()))
    }
}

/// Maps endpoint names to in-memory chains.
pub struct MockConnector {
    chains: HashMap<String, Arc<MockChain>>,
}

impl MockConnector {
    pub fn single(endpoint: &str, chain: Arc<MockChain>) -> Self {
        let mut chains = HashMap::new();
        chains.insert(endpoint.to_string(), chain);
        Self { chains }
    }

    pub fn with(mut self, endpoint: &str, chain: Arc<MockChain>) -> Self {
        self.chains.insert(endpoint.to_string(), chain);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ChainReader>> {
        let chain = self
            .chains
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mock chain behind `{endpoint}`"))?;
        Ok(chain)
    }
}

#[derive(Debug, Clone)]
pub struct ProposalFixture {
    pub module: Address,
    pub question_id: B256,
    pub proposal_id: String,
    pub tx_hashes: Vec<B256>,
    pub block: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl ProposalFixture {
    pub fn question_text(&self) -> String {
        build_question_text(&self.proposal_id, &self.tx_hashes)
    }
}

#[derive(Debug, Clone)]
pub struct AnswerFixture {
    pub question_id: B256,
    pub answer: B256,
    pub user: Address,
    pub bond: U256,
    pub history_hash: B256,
    pub timestamp: u64,
    pub block: u64,
    pub log_index: u64,
    pub is_commitment: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionFixture {
    pub best_answer: B256,
    pub bond: U256,
    pub min_bond: U256,
    pub finalize_ts: u32,
    pub is_finalized: bool,
    pub result: Option<B256>,
    pub is_pending_arbitration: bool,
    pub history_hash: B256,
}

pub fn temp_db_path(prefix: &str) -> std::path::PathBuf {
    static SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "{prefix}_{}_{nanos}_{seq}.db",
        std::process::id()
    ))
}
