//! Session-scoped sync coordination: backfill, coverage expansion, answer-cache fill,
//! incremental sync and polling over one mirror database.

mod poller;
mod session;

pub use session::{parse_tx_hash, ExecutionCall, SyncSession};

use crate::indexer::StateRefresh;
use crate::model::SyncWatermark;
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Disconnected,
    /// Endpoint attached, no sync has completed on it yet.
    Connecting,
    Backfilling,
    CoverageExpansion,
    AnswerCacheFill,
    Synced,
    Polling,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Disconnected => "disconnected",
            SyncPhase::Connecting => "connecting",
            SyncPhase::Backfilling => "backfilling",
            SyncPhase::CoverageExpansion => "coverage_expansion",
            SyncPhase::AnswerCacheFill => "answer_cache_fill",
            SyncPhase::Synced => "synced",
            SyncPhase::Polling => "polling",
        }
    }
}

/// What the poller hands to its sink. Ticks that change nothing are not reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Updated(Vec<B256>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Succeeded,
    Reverted,
}

/// Summary of one or more completed phases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Block ranges scanned, inclusive.
    pub ranges: Vec<(u64, u64)>,
    pub new_proposals: Vec<B256>,
    pub new_answers: usize,
    /// Questions whose state differs from the mirrored one.
    pub changed: Vec<B256>,
    pub failed_states: Vec<(B256, String)>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.ranges.extend(other.ranges);
        self.new_proposals.extend(other.new_proposals);
        self.new_answers += other.new_answers;
        for id in other.changed {
            if !self.changed.contains(&id) {
                self.changed.push(id);
            }
        }
        self.failed_states.extend(other.failed_states);
    }

    fn absorb_refresh(&mut self, refresh: StateRefresh) {
        for id in refresh.changed {
            if !self.changed.contains(&id) {
                self.changed.push(id);
            }
        }
        self.failed_states.extend(refresh.failed);
    }
}

/// Older range to scan so indexing starts at `desired_start`, or `None` when it already does.
pub fn plan_coverage_expansion(
    watermark: &SyncWatermark,
    desired_start: u64,
) -> Option<(u64, u64)> {
    let earliest = watermark.earliest_indexed_block?;
    if desired_start >= earliest {
        return None;
    }
    Some((desired_start, earliest - 1))
}
