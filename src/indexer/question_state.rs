use crate::contracts::{self, IRealitio};
use crate::error::{MirrorError, RpcError};
use crate::model::QuestionState;
use crate::storage::MirrorDb;
use crate::utils::rpc::RpcAccess;
use alloy::primitives::{Address, B256};
use alloy::sol_types::SolCall;

fn state_load_failed(question_id: B256, reason: impl Into<String>) -> MirrorError {
    MirrorError::StateLoadFailed {
        question_id,
        reason: reason.into(),
    }
}

/// Reads the oracle record, the finalized flag and, once finalized, the resolved answer.
/// The fresh state always replaces the stored one.
pub async fn load_question_state(
    rpc: &RpcAccess,
    db: &MirrorDb,
    oracle: Address,
    question_id: B256,
) -> Result<QuestionState, MirrorError> {
    let raw = rpc
        .call(oracle, contracts::encode_questions(question_id))
        .await
        .map_err(|err| state_load_failed(question_id, err.to_string()))?;
    let record = contracts::decode_question_record(&raw)
        .ok_or_else(|| state_load_failed(question_id, "questions() returned a malformed record"))?;

    let raw = rpc
        .call(oracle, contracts::encode_is_finalized(question_id))
        .await
        .map_err(|err| state_load_failed(question_id, err.to_string()))?;
    let is_finalized = IRealitio::isFinalizedCall::abi_decode_returns(&raw, true)
        .map(|ret| ret._0)
        .map_err(|err| state_load_failed(question_id, format!("isFinalized(): {err}")))?;

    let final_answer = if is_finalized {
        match rpc
            .call(oracle, contracts::encode_result_for(question_id))
            .await
        {
            Ok(raw) => match IRealitio::resultForCall::abi_decode_returns(&raw, true) {
                Ok(ret) => Some(ret._0),
                Err(err) => {
                    tracing::warn!(
                        "[STATE] resultFor({:#x}) returned undecodable data: {}",
                        question_id,
                        err
                    );
                    None
                }
            },
            // Unresolved and no-bond edge cases revert.
            Err(RpcError::Rejected { .. }) => None,
            Err(err) => return Err(state_load_failed(question_id, err.to_string())),
        }
    } else {
        None
    };

    let state = QuestionState {
        question_id,
        best_answer: record.best_answer,
        bond: record.bond,
        min_bond: record.min_bond,
        finalize_ts: u64::from(record.finalize_ts),
        is_finalized,
        final_answer,
        is_pending_arbitration: record.is_pending_arbitration,
        history_hash: record.history_hash,
    };
    db.replace_question_state(&state)
        .map_err(|err| state_load_failed(question_id, format!("{err:#}")))?;
    Ok(state)
}

/// Outcome of a batch refresh. Failures are per question and never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateRefresh {
    pub changed: Vec<B256>,
    pub unchanged: usize,
    pub failed: Vec<(B256, String)>,
}

pub async fn refresh_states(
    rpc: &RpcAccess,
    db: &MirrorDb,
    oracle: Address,
    question_ids: &[B256],
) -> StateRefresh {
    let mut outcome = StateRefresh::default();
    for question_id in question_ids {
        let previous = db.question_state(*question_id).ok().flatten();
        match load_question_state(rpc, db, oracle, *question_id).await {
            Ok(state) => {
                let changed = previous
                    .as_ref()
                    .map(|prev| prev.differs_from(&state))
                    .unwrap_or(true);
                if changed {
                    outcome.changed.push(*question_id);
                } else {
                    outcome.unchanged += 1;
                }
            }
            Err(err) => {
                tracing::warn!("[STATE] {}", err);
                outcome.failed.push((*question_id, err.to_string()));
            }
        }
    }
    outcome
}
