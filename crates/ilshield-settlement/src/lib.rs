//! # IL Shield Settlement
//!
//! Claim settlement engine for IL Shield impermanent-loss coverage.
//!
//! ## Components
//!
//! - **Store**: policies and the claim lifecycle, one open claim per policy
//! - **Compute**: confidential compute client with signed, retried worker calls
//! - **Consensus**: quorum of staked attestors over the computed payout
//! - **Slashing**: attestor stake arena with evidence-checked penalties
//! - **Reserve**: per-pool premium reserves
//! - **Settlement**: bounded payout from the reserve, partial on shortfall
//! - **Journal**: Merkle-committed log of every lifecycle event
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ClaimEngine                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────────┐  │
//! │  │ PolicyStore│──▶│  Compute   │──▶│    ConsensusManager      │  │
//! │  │            │   │  Client    │   │  (AttestorRegistry)      │  │
//! │  └────────────┘   └────────────┘   └────────────┬─────────────┘  │
//! │        ▲                                        │ decision       │
//! │        │          ┌────────────┐   ┌────────────▼─────────────┐  │
//! │        └──────────│  Reserve   │◀──│   SettlementExecutor     │  │
//! │                   │  Ledger    │   │                          │  │
//! │                   └────────────┘   └──────────────────────────┘  │
//! │                    SettlementJournal (every component)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod compute;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod journal;
pub mod metrics;
pub mod reserve;
pub mod settlement;
pub mod slashing;
pub mod store;

pub use compute::{
    ComputeClient, ComputeWorker, HttpComputeWorker, LocalComputeWorker, PricePoint,
    PriceFeedValidator, SeriesValidation,
};
pub use config::EngineConfig;
pub use consensus::{
    ConsensusManager, ConsensusOutcome, ConsensusTask, QuorumOutcome, QuorumRule,
    SubmissionOutcome, TaskFailure, TaskStatus,
};
pub use engine::{ClaimEngine, ClaimSubmission, SweepReport};
pub use journal::{JournalEntry, LedgerEvent, SettlementJournal};
pub use metrics::EngineMetrics;
pub use reserve::ReserveLedger;
pub use settlement::{payout_bound, SettlementExecutor};
pub use slashing::{AttestorRegistry, Evidence, SlashOutcome};
pub use store::PolicyStore;
