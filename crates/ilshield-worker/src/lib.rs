//! # IL Shield Worker
//!
//! Confidential compute worker: evaluates the payout formula over committed positions and
//! signs the result with its Ed25519 identity. The settlement engine reaches it through
//! `HttpComputeWorker`.

pub mod api;
pub mod config;

pub use api::{router, AppState, IdentityResponse};
pub use config::WorkerConfig;

/// Worker version
pub const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");
