use alloy::primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("network error: {0}")]
    Rpc(#[from] RpcError),
    #[error("log scan failed for blocks [{from}..={to}]: {source}")]
    RangeScanFailed {
        from: u64,
        to: u64,
        #[source]
        source: RpcError,
    },
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),
    #[error("state load failed for question {question_id:#x}: {reason}")]
    StateLoadFailed { question_id: B256, reason: String },
    #[error("bundle mismatch: {0}")]
    BundleMismatch(#[from] BundleMismatch),
    #[error("malformed transaction hash `{0}`")]
    MalformedTxHash(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown proposal `{0}`")]
    UnknownProposal(String),
    #[error("transaction hashes for question {0:#x} could not be recovered")]
    MissingCommitments(B256),
    #[error("no bundle imported for proposal `{0}`")]
    MissingBundle(String),
    #[error("session is not connected to an RPC endpoint")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{context} exhausted {attempts} attempt(s): {last_error}")]
    Exhausted {
        context: String,
        attempts: usize,
        last_error: String,
    },
    #[error("{context} rejected by endpoint: {message}")]
    Rejected { context: String, message: String },
    #[error("cannot connect to `{endpoint}`: {reason}")]
    Connect { endpoint: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected event signature {0:#x}")]
    UnexpectedTopic(B256),
    #[error("expected {expected} topic(s), got {got}")]
    TopicCount { expected: usize, got: usize },
    #[error("expected {expected} data byte(s), got {got}")]
    DataLength { expected: usize, got: usize },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("event does not decode: {0}")]
    Event(String),
    #[error("calldata does not match a known proposal call: {0}")]
    Calldata(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleMismatch {
    #[error("bundle has {actual} transaction(s) but the proposal commits to {expected}")]
    Count { expected: usize, actual: usize },
    #[error("transaction {index} hashes to {actual:#x}, proposal commits to {expected:#x}")]
    Hash {
        index: usize,
        expected: B256,
        actual: B256,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl MirrorError {
    /// Whether retrying the same request later can succeed without new input.
    pub fn is_transient(&self) -> bool {
        match self {
            MirrorError::Rpc(RpcError::Exhausted { .. })
            | MirrorError::Rpc(RpcError::Connect { .. })
            | MirrorError::RangeScanFailed { .. }
            | MirrorError::StateLoadFailed { .. }
            | MirrorError::Storage(_)
            | MirrorError::NotConnected => true,
            MirrorError::Rpc(RpcError::Rejected { .. })
            | MirrorError::DecodeFailed(_)
            | MirrorError::BundleMismatch(_)
            | MirrorError::MalformedTxHash(_)
            | MirrorError::Config(_)
            | MirrorError::UnknownProposal(_)
            | MirrorError::MissingCommitments(_)
            | MirrorError::MissingBundle(_) => false,
        }
    }

    /// Human readable reason, prefixed with whether the caller should retry or fix input.
    pub fn user_message(&self) -> String {
        let detail = crate::utils::error::compact_error_message(&self.to_string(), 320);
        if self.is_transient() {
            format!("temporary failure, retry later: {detail}")
        } else {
            format!("cannot proceed with the given input: {detail}")
        }
    }
}

impl From<anyhow::Error> for MirrorError {
    fn from(err: anyhow::Error) -> Self {
        MirrorError::Storage(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_is_transient_and_mismatch_is_not() {
        let exhausted = MirrorError::Rpc(RpcError::Exhausted {
            context: "eth_getLogs".to_string(),
            attempts: 3,
            last_error: "connection reset".to_string(),
        });
        assert!(exhausted.is_transient());
        assert!(exhausted.user_message().starts_with("temporary failure"));

        let mismatch = MirrorError::BundleMismatch(BundleMismatch::Count {
            expected: 2,
            actual: 3,
        });
        assert!(!mismatch.is_transient());
        let message = mismatch.user_message();
        assert!(message.starts_with("cannot proceed"));
        assert!(message.contains("3 transaction(s)"));
    }

    #[test]
    fn test_hash_mismatch_names_the_index() {
        let err = BundleMismatch::Hash {
            index: 4,
            expected: B256::repeat_byte(0x11),
            actual: B256::repeat_byte(0x22),
        };
        assert!(err.to_string().starts_with("transaction 4 hashes to 0x2222"));
    }

    #[test]
    fn test_malformed_tx_hash_needs_new_input() {
        let err = MirrorError::MalformedTxHash("0x12".to_string());
        assert!(!err.is_transient());
        assert!(err.user_message().contains("0x12"));
    }
}
