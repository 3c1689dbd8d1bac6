//! Reality mirror library surface.
//!
//! Indexes governance proposals created through a Reality module, the oracle questions
//! gating them and their bonded answer histories into a local SQLite mirror, then derives
//! executability and bond-claim eligibility from the mirrored state.
//! [`sync::SyncSession`] is the caller-facing entry point.

pub mod bundle;
pub mod chain;
pub mod claims;
pub mod contracts;
pub mod error;
pub mod indexer;
pub mod model;
pub mod status;
pub mod storage;
pub mod sync;
pub mod utils;

// In-memory chain and fixtures shared by unit and integration tests.
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

pub mod config {
    pub mod chains;
}
