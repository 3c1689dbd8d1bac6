//! Read-only chain access used by the indexing engine.
//!
//! Everything above this module talks to a [`ChainReader`]; the production implementation
//! wraps an alloy HTTP provider ([`alloy_reader::AlloyChainReader`]) and tests plug in the
//! in-memory chain from [`crate::testing`].

pub mod alloy_reader;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use alloy_reader::{AlloyChainReader, AlloyConnector};

/// Event filter over one contract and one event signature, optionally narrowed by the first
/// indexed argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub topic1: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    pub fn new(address: Address, topic0: B256) -> Self {
        Self {
            address,
            topic0,
            topic1: None,
            from_block: 0,
            to_block: 0,
        }
    }

    pub fn with_topic1(mut self, topic1: B256) -> Self {
        self.topic1 = Some(topic1);
        self
    }

    pub fn with_range(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.address == self.address
            && log.topics.first() == Some(&self.topic0)
            && self
                .topic1
                .map(|t| log.topics.get(1) == Some(&t))
                .unwrap_or(true)
            && (self.from_block..=self.to_block).contains(&log.block_number)
    }
}

/// A mined log. Pending logs (no block number or index) never make it past the provider
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
}

impl RawLog {
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> anyhow::Result<u64>;

    /// `Ok(None)` when the node does not know the block.
    async fn block_timestamp(&self, number: u64) -> anyhow::Result<Option<u64>>;

    async fn logs(&self, query: &LogQuery) -> anyhow::Result<Vec<RawLog>>;

    /// Call input of a mined transaction, `Ok(None)` when the node does not know the hash.
    async fn transaction_input(&self, hash: B256) -> anyhow::Result<Option<Bytes>>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes>;

    /// Receipt status, `Ok(None)` while the transaction is not mined.
    async fn receipt_status(&self, hash: B256) -> anyhow::Result<Option<bool>>;
}

/// Turns an endpoint string into a reader. Used on connect and on failover.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ChainReader>>;
}
