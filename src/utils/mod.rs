pub mod clock;
pub mod config;
pub mod env_guard;
pub mod error;
pub mod rpc;
