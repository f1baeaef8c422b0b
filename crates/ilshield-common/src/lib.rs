//! # IL Shield Common
//!
//! Shared types, errors, payout math and cryptographic primitives for the IL Shield
//! impermanent-loss insurance engine.
//!
//! ## Core Types
//!
//! - [`Policy`]: coverage terms for one liquidity position
//! - [`Claim`]: a payout request moving through `Requested → Attested → Settled/Rejected`
//! - [`Attestor`]: staked, independently keyed voter on computed payouts
//! - [`ReserveAccount`]: per-pool premium reserve with a balance invariant
//! - [`ComputeRequest`]/[`ComputeResponse`]: confidential compute wire contract
//!
//! ## Math
//!
//! - [`payout`]: the IL / deductible / cap formula shared by the worker and settlement
//!
//! ## Crypto
//!
//! - [`crypto::keys`]: Ed25519 signing identities encoded as `did:key`
//! - [`crypto::merkle`]: BLAKE3 Merkle tree for the settlement journal

pub mod crypto;
pub mod error;
pub mod payout;
pub mod time;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{IlShieldError, Result};
pub use payout::{PayoutBreakdown, PayoutTerms};
pub use time::{Clock, ManualClock, SystemClock};
pub use types::{
    attestation::{SignedAttestation, TaskId},
    attestor::{Attestor, AttestorId, MisbehaviorKind, SlashRecord},
    claim::{Claim, ClaimId, ClaimStatus, RejectionReason},
    compute::{audit_hash, ComputeRequest, ComputeResponse, PriceReference, WorkerId},
    events::{ClaimNotification, SettlementDecision, SettlementReceipt, UnderpaymentNotice},
    policy::{DeactivationReason, Policy, PolicyId, PolicyParams, PoolId},
    position::{PositionCommitment, PositionSnapshot},
    reserve::ReserveAccount,
    Amount,
};

/// IL Shield version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Basis-point denominator (100%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fixed-point scale of prices (9 decimals)
pub const PRICE_SCALE: u128 = 1_000_000_000;
