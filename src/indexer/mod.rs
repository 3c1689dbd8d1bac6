//! Turns chain logs and view calls into mirrored records.

pub mod answers;
pub mod block_time;
pub mod module_config;
pub mod proposals;
pub mod question_state;
pub mod range_scan;

pub use answers::{parse_answer_log, AnswerIndexer};
pub use block_time::estimate_block;
pub use module_config::ModuleConfig;
pub use proposals::{
    build_question_text, parse_creation_log, parse_question_text, ParsedQuestion, ProposalDecoder,
};
pub use question_state::{load_question_state, refresh_states, StateRefresh};
pub use range_scan::{scan_logs, ScanProgress};
