//! Executability verdicts derived from a question's live state and the module parameters.

use crate::contracts::YES_ANSWER;
use crate::indexer::ModuleConfig;
use crate::model::QuestionState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLabel {
    Unknown,
    Arbitration,
    Pending,
    Finalized,
    Executable,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Unknown => "unknown",
            StatusLabel::Arbitration => "arbitration",
            StatusLabel::Pending => "pending",
            StatusLabel::Finalized => "finalized",
            StatusLabel::Executable => "executable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum StatusDetail {
    NotLoaded,
    UnderArbitration,
    NoAnswers,
    FinalizesIn { seconds: u64 },
    AwaitingFinalization,
    Rejected,
    BondBelowMinimum,
    Cooldown { seconds_left: u64 },
    Expired,
    Ready,
}

impl fmt::Display for StatusDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusDetail::NotLoaded => write!(f, "question state not loaded"),
            StatusDetail::UnderArbitration => write!(f, "pending arbitration"),
            StatusDetail::NoAnswers => write!(f, "no answers yet"),
            StatusDetail::FinalizesIn { seconds } => {
                write!(f, "finalizes in {}", format_duration(*seconds))
            }
            StatusDetail::AwaitingFinalization => write!(f, "awaiting finalization call"),
            StatusDetail::Rejected => write!(f, "resolved to something other than yes"),
            StatusDetail::BondBelowMinimum => write!(f, "bond below module minimum"),
            StatusDetail::Cooldown { seconds_left } => {
                write!(f, "cooldown, {} left", format_duration(*seconds_left))
            }
            StatusDetail::Expired => write!(f, "answer expired"),
            StatusDetail::Ready => write!(f, "ready to execute"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalStatus {
    pub label: StatusLabel,
    pub executable: bool,
    pub detail: StatusDetail,
}

impl ProposalStatus {
    fn new(label: StatusLabel, detail: StatusDetail) -> Self {
        Self {
            label,
            executable: label == StatusLabel::Executable,
            detail,
        }
    }
}

fn format_duration(seconds: u64) -> String {
    let (d, h, m) = (seconds / 86_400, (seconds % 86_400) / 3_600, (seconds % 3_600) / 60);
    if d > 0 {
        format!("{d}d {h}h")
    } else if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m")
    } else {
        format!("{seconds}s")
    }
}

/// Pure verdict. Checks run in a fixed order: arbitration before anything finalize-based,
/// and nothing short of a finalized yes can be executable.
pub fn derive_status(
    state: Option<&QuestionState>,
    module: &ModuleConfig,
    now: u64,
) -> ProposalStatus {
    let Some(state) = state else {
        return ProposalStatus::new(StatusLabel::Unknown, StatusDetail::NotLoaded);
    };
    if state.is_pending_arbitration {
        return ProposalStatus::new(StatusLabel::Arbitration, StatusDetail::UnderArbitration);
    }
    if !state.is_finalized {
        if state.bond.is_zero() && state.best_answer.is_zero() {
            return ProposalStatus::new(StatusLabel::Pending, StatusDetail::NoAnswers);
        }
        if state.finalize_ts > now {
            return ProposalStatus::new(
                StatusLabel::Pending,
                StatusDetail::FinalizesIn {
                    seconds: state.finalize_ts - now,
                },
            );
        }
        return ProposalStatus::new(StatusLabel::Pending, StatusDetail::AwaitingFinalization);
    }

    if state.final_answer != Some(YES_ANSWER) {
        return ProposalStatus::new(StatusLabel::Finalized, StatusDetail::Rejected);
    }
    if state.bond < module.minimum_bond {
        return ProposalStatus::new(StatusLabel::Finalized, StatusDetail::BondBelowMinimum);
    }
    let cooldown_end = state.finalize_ts.saturating_add(module.question_cooldown);
    if cooldown_end > now {
        return ProposalStatus::new(
            StatusLabel::Finalized,
            StatusDetail::Cooldown {
                seconds_left: cooldown_end - now,
            },
        );
    }
    if module.answer_expiration > 0
        && now > state.finalize_ts.saturating_add(module.answer_expiration)
    {
        return ProposalStatus::new(StatusLabel::Finalized, StatusDetail::Expired);
    }
    ProposalStatus::new(StatusLabel::Executable, StatusDetail::Ready)
}
