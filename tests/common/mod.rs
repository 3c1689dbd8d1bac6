#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use reality_mirror::contracts::YES_ANSWER;
use reality_mirror::storage::MirrorDb;
use reality_mirror::sync::SyncSession;
use reality_mirror::testing::{
    temp_db_path, AnswerFixture, MockChain, MockConnector, ProposalFixture, QuestionFixture,
};
use reality_mirror::utils::clock::unix_now;
use reality_mirror::utils::config::Config;
use reality_mirror::utils::rpc::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;

pub const MODULE: Address = Address::repeat_byte(0x4d);
pub const ORACLE: Address = Address::repeat_byte(0x0e);
pub const GENESIS_TS: u64 = 1_600_000_000;
/// Mainnet preset block time, so one lookback day spans 7_200 blocks.
pub const BLOCK_TIME_SECS: u64 = 12;
pub const HEAD: u64 = 20_000;
/// First block of a one-day lookback from `HEAD`.
pub const ONE_DAY_START: u64 = HEAD - 7_200;
pub const MODULE_MIN_BOND: u64 = 10;
pub const COOLDOWN_SECS: u32 = 3_600;

pub fn chain() -> Arc<MockChain> {
    let chain = Arc::new(MockChain::new(HEAD, GENESIS_TS, BLOCK_TIME_SECS));
    chain.set_module_config(MODULE, ORACLE, COOLDOWN_SECS, 0, U256::from(MODULE_MIN_BOND));
    chain
}

pub fn config(db_path: PathBuf) -> Config {
    let mut config = Config::new("primary", 1, MODULE);
    config.db_path = db_path;
    config.lookback_days = 1;
    config.log_chunk_blocks = 2_000;
    config.poll_interval_ms = 20;
    config.retry = RetryPolicy {
        attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
        call_timeout_ms: 1_000,
    };
    config
}

pub struct Harness {
    pub session: SyncSession,
    pub db: MirrorDb,
    pub db_path: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

pub fn harness_with(connector: MockConnector, prefix: &str) -> Harness {
    let db_path = temp_db_path(prefix);
    let db = MirrorDb::open(&db_path).expect("open mirror db");
    let session = SyncSession::new(config(db_path.clone()), db.clone(), Arc::new(connector));
    Harness {
        session,
        db,
        db_path,
    }
}

pub fn harness(chain: &Arc<MockChain>, prefix: &str) -> Harness {
    harness_with(MockConnector::single("primary", chain.clone()), prefix)
}

pub fn qid(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn user(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn proposal(byte: u8, proposal_id: &str, tx_hashes: Vec<B256>, block: u64) -> ProposalFixture {
    ProposalFixture {
        module: MODULE,
        question_id: qid(byte),
        proposal_id: proposal_id.to_string(),
        tx_hashes,
        block,
        log_index: 0,
        tx_hash: B256::repeat_byte(0xf0 ^ byte),
    }
}

pub fn answer(question: B256, who: Address, bond: u64, block: u64, log_index: u64) -> AnswerFixture {
    AnswerFixture {
        question_id: question,
        answer: YES_ANSWER,
        user: who,
        bond: U256::from(bond),
        history_hash: B256::from(U256::from(block * 10 + log_index)),
        timestamp: GENESIS_TS + block * BLOCK_TIME_SECS,
        block,
        log_index,
        is_commitment: false,
    }
}

/// Answered, finalizes a day from now.
pub fn open_question(bond: u64) -> QuestionFixture {
    QuestionFixture {
        best_answer: YES_ANSWER,
        bond: U256::from(bond),
        min_bond: U256::from(1),
        finalize_ts: (unix_now() + 86_400) as u32,
        ..QuestionFixture::default()
    }
}

/// Finalized to yes long enough ago that the cooldown has passed.
pub fn settled_yes(bond: u64) -> QuestionFixture {
    QuestionFixture {
        best_answer: YES_ANSWER,
        bond: U256::from(bond),
        min_bond: U256::from(1),
        finalize_ts: (unix_now() - 10_000) as u32,
        is_finalized: true,
        result: Some(YES_ANSWER),
        ..QuestionFixture::default()
    }
}
