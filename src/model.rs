//! Plain records handed to callers and persisted by [`crate::storage::MirrorDb`].

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Result of a best-effort enrichment step.
///
/// `Pending` means nothing was attempted yet, `Unavailable` that the lookup ran and could not
/// produce a value. Neither is the same as a legitimately empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Lookup<T> {
    Pending,
    Unavailable,
    Found(T),
}

impl<T> Lookup<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Pending | Lookup::Unavailable => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Lookup::Found(value),
            None => Lookup::Unavailable,
        }
    }
}

impl<T> Default for Lookup<T> {
    fn default() -> Self {
        Lookup::Pending
    }
}

/// One governance proposal, keyed by its oracle question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub question_id: B256,
    pub proposal_id: Lookup<String>,
    /// Execution order. Never re-sorted.
    pub tx_hashes: Lookup<Vec<B256>>,
    pub question_text: Lookup<String>,
    pub created_block: u64,
    pub created_log_index: u64,
    pub created_tx_hash: B256,
    pub created_timestamp: Lookup<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionState {
    pub question_id: B256,
    pub best_answer: B256,
    pub bond: U256,
    pub min_bond: U256,
    /// Zero until the first answer.
    pub finalize_ts: u64,
    pub is_finalized: bool,
    pub final_answer: Option<B256>,
    pub is_pending_arbitration: bool,
    pub history_hash: B256,
}

impl QuestionState {
    /// Needs refreshing on every incremental sync.
    pub fn is_active(&self) -> bool {
        !self.is_finalized || self.is_pending_arbitration
    }

    /// Field-by-field change detection used to decide whether to notify pollers.
    pub fn differs_from(&self, other: &QuestionState) -> bool {
        self.best_answer != other.best_answer
            || self.bond != other.bond
            || self.finalize_ts != other.finalize_ts
            || self.is_finalized != other.is_finalized
            || self.final_answer != other.final_answer
            || self.is_pending_arbitration != other.is_pending_arbitration
            || self.history_hash != other.history_hash
            || self.min_bond != other.min_bond
    }
}

/// One `LogNewAnswer` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEvent {
    pub question_id: B256,
    pub answer: B256,
    pub user: Address,
    pub bond: U256,
    pub history_hash: B256,
    pub timestamp: u64,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_index: u64,
    pub is_commitment: bool,
}

impl AnswerEvent {
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Persisted indexing boundaries. Both bounds only ever widen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub last_processed_block: Option<u64>,
    pub earliest_indexed_block: Option<u64>,
    pub answer_cache_ready: bool,
}

impl SyncWatermark {
    pub fn is_empty(&self) -> bool {
        self.last_processed_block.is_none() && self.earliest_indexed_block.is_none()
    }

    /// Records that `[from, to]` is fully indexed.
    pub fn cover(&mut self, from: u64, to: u64) {
        self.earliest_indexed_block = Some(match self.earliest_indexed_block {
            Some(current) => current.min(from),
            None => from,
        });
        self.last_processed_block = Some(match self.last_processed_block {
            Some(current) => current.max(to),
            None => to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> QuestionState {
        QuestionState {
            question_id: B256::repeat_byte(1),
            best_answer: B256::ZERO,
            bond: U256::ZERO,
            min_bond: U256::ZERO,
            finalize_ts: 0,
            is_finalized: false,
            final_answer: None,
            is_pending_arbitration: false,
            history_hash: B256::ZERO,
        }
    }

    #[test]
    fn test_watermark_only_widens() {
        let mut wm = SyncWatermark::default();
        assert!(wm.is_empty());
        wm.cover(100, 200);
        wm.cover(150, 180);
        assert_eq!(wm.earliest_indexed_block, Some(100));
        assert_eq!(wm.last_processed_block, Some(200));
        wm.cover(50, 250);
        assert_eq!(wm.earliest_indexed_block, Some(50));
        assert_eq!(wm.last_processed_block, Some(250));
    }

    #[test]
    fn test_change_detection_covers_min_bond() {
        let a = state();
        let mut b = state();
        assert!(!a.differs_from(&b));
        b.min_bond = U256::from(1);
        assert!(a.differs_from(&b));
    }

    #[test]
    fn test_active_set_membership() {
        let mut s = state();
        assert!(s.is_active());
        s.is_finalized = true;
        assert!(!s.is_active());
        s.is_pending_arbitration = true;
        assert!(s.is_active());
    }

    #[test]
    fn test_lookup_serializes_tagged() {
        let text = serde_json::to_string(&Lookup::Found(7u64)).expect("serialize");
        assert_eq!(text, r#"{"state":"found","value":7}"#);
        let back: Lookup<u64> =
            serde_json::from_str(r#"{"state":"unavailable"}"#).expect("deserialize");
        assert_eq!(back, Lookup::Unavailable);
    }
}
