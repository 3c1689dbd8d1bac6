//! Bond claim eligibility and the calldata for claiming and answering.

use crate::contracts::IRealitio;
use crate::model::{AnswerEvent, QuestionState};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimReason {
    /// Outbid by a later answer, question finalized.
    OutbidFinalized,
    /// Still the leading answer, question finalized.
    LeadingFinalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableEntry {
    pub answer: AnswerEvent,
    /// Chronological position in the question's history.
    pub position: usize,
    pub reason: ClaimReason,
}

/// Parallel arguments of `claimWinnings`, newest answer first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimArrays {
    pub history_hashes: Vec<B256>,
    pub addrs: Vec<Address>,
    pub bonds: Vec<U256>,
    pub answers: Vec<B256>,
}

impl ClaimArrays {
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

fn chronological(history: &[AnswerEvent]) -> Vec<&AnswerEvent> {
    let mut ordered: Vec<&AnswerEvent> = history.iter().collect();
    ordered.sort_by_key(|answer| answer.ordering_key());
    ordered
}

pub fn finalization_reached(state: &QuestionState, now: u64) -> bool {
    state.is_finalized || (state.finalize_ts > 0 && now >= state.finalize_ts)
}

/// Answers by `user` that can be withdrawn now. Nothing is claimable under arbitration.
pub fn compute_claimable(
    history: &[AnswerEvent],
    state: &QuestionState,
    user: Address,
    now: u64,
) -> Vec<ClaimableEntry> {
    if state.is_pending_arbitration || !finalization_reached(state, now) {
        return Vec::new();
    }
    let ordered = chronological(history);
    let last = ordered.len().saturating_sub(1);
    ordered
        .into_iter()
        .enumerate()
        .filter(|(_, answer)| answer.user == user)
        .map(|(position, answer)| ClaimableEntry {
            answer: answer.clone(),
            position,
            reason: if position == last {
                ClaimReason::LeadingFinalized
            } else {
                ClaimReason::OutbidFinalized
            },
        })
        .collect()
}

pub fn estimate_claimable_amount(entries: &[ClaimableEntry]) -> U256 {
    entries
        .iter()
        .fold(U256::ZERO, |acc, entry| acc.saturating_add(entry.answer.bond))
}

/// Reverses the history to newest-first. `history_hashes[i]` is the history hash that
/// preceded answer `i`, so the oldest answer pairs with the zero hash.
pub fn build_claim_arrays(history: &[AnswerEvent]) -> ClaimArrays {
    let mut newest_first = chronological(history);
    newest_first.reverse();
    let mut arrays = ClaimArrays::default();
    for (i, answer) in newest_first.iter().enumerate() {
        arrays.history_hashes.push(
            newest_first
                .get(i + 1)
                .map(|previous| previous.history_hash)
                .unwrap_or(B256::ZERO),
        );
        arrays.addrs.push(answer.user);
        arrays.bonds.push(answer.bond);
        arrays.answers.push(answer.answer);
    }
    arrays
}

pub fn encode_claim_winnings(question_id: B256, arrays: &ClaimArrays) -> Bytes {
    IRealitio::claimWinningsCall {
        question_id,
        history_hashes: arrays.history_hashes.clone(),
        addrs: arrays.addrs.clone(),
        bonds: arrays.bonds.clone(),
        answers: arrays.answers.clone(),
    }
    .abi_encode()
    .into()
}

/// Smallest bond the oracle accepts for the next answer.
pub fn minimum_next_bond(state: &QuestionState, module_minimum: U256) -> U256 {
    if state.bond.is_zero() {
        return module_minimum.max(state.min_bond);
    }
    state.min_bond.max(state.bond.saturating_mul(U256::from(2)))
}

/// `max_previous` guards against being front-run by a larger bond.
pub fn encode_submit_answer(question_id: B256, answer: B256, max_previous: U256) -> Bytes {
    IRealitio::submitAnswerCall {
        question_id,
        answer,
        max_previous,
    }
    .abi_encode()
    .into()
}
