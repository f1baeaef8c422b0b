//! Attestation consensus
//!
//! Quorum rule, per-claim task state machine, and the manager that drives them.

pub mod manager;
pub mod quorum;
pub mod task;

pub use manager::{ConsensusManager, ConsensusOutcome, SubmissionOutcome};
pub use quorum::{QuorumOutcome, QuorumRule};
pub use task::{ConsensusTask, TaskFailure, TaskStatus};
