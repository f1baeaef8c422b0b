//! Claim - a payout request under a policy
//!
//! Lifecycle:
//!
//! ```text
//! None ──request──▶ Requested ──quorum──▶ Attested ──settle──▶ Settled
//!                      │                     │
//!                      └──────failure────────┴──────────────▶ Rejected
//! ```
//!
//! `Settled` and `Rejected` are terminal. A rejected claim can be retried by requesting a
//! new claim under the same (still active) policy.

use super::compute::PriceReference;
use super::policy::PolicyId;
use super::position::PositionCommitment;
use super::uuid_id;
use super::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

uuid_id!(
    /// Claim identifier
    ClaimId
);

/// Claim lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    None,
    Requested,
    Attested,
    Settled,
    Rejected,
}

impl ClaimStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimStatus::Settled | ClaimStatus::Rejected)
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (ClaimStatus::None, ClaimStatus::Requested)
                | (ClaimStatus::Requested, ClaimStatus::Attested)
                | (ClaimStatus::Requested, ClaimStatus::Rejected)
                | (ClaimStatus::Attested, ClaimStatus::Settled)
                | (ClaimStatus::Attested, ClaimStatus::Rejected)
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimStatus::None => "none",
            ClaimStatus::Requested => "requested",
            ClaimStatus::Attested => "attested",
            ClaimStatus::Settled => "settled",
            ClaimStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Why a claim was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    ComputeTimeout,
    InvalidWorkerSignature,
    /// Compute failed for a reason other than timeout or signature
    ComputeFailed(String),
    /// Attestors answered but quorum could not form
    ConsensusFailed,
    DeadlineExpired,
    QuorumUnreachable,
    ConflictingAttestation,
    CalculationOverflow,
    /// A position commitment no longer opens to its snapshot
    MalformedCommitment,
    /// Settlement found no price reference to derive the bound from
    MissingPriceReference,
    Other(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::ComputeTimeout => f.write_str("compute timeout"),
            RejectionReason::InvalidWorkerSignature => f.write_str("invalid worker signature"),
            RejectionReason::ComputeFailed(msg) => write!(f, "compute failed: {}", msg),
            RejectionReason::ConsensusFailed => f.write_str("consensus failed"),
            RejectionReason::DeadlineExpired => f.write_str("attestation deadline expired"),
            RejectionReason::QuorumUnreachable => f.write_str("quorum unreachable"),
            RejectionReason::ConflictingAttestation => f.write_str("conflicting attestation"),
            RejectionReason::CalculationOverflow => f.write_str("calculation overflow"),
            RejectionReason::MalformedCommitment => f.write_str("malformed position commitment"),
            RejectionReason::MissingPriceReference => f.write_str("missing price reference"),
            RejectionReason::Other(msg) => f.write_str(msg),
        }
    }
}

/// A payout request under one policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub policy_id: PolicyId,
    pub status: ClaimStatus,
    /// Creation timestamp (Unix milliseconds)
    pub requested_at: i64,
    pub exit_commitment: PositionCommitment,
    pub claimant: String,
    /// Advisory payout reported by the compute worker (0 until computed)
    pub requested_amount: Amount,
    pub price_reference: Option<PriceReference>,
    pub audit_hash: Option<[u8; 32]>,
    pub attested_payout: Option<Amount>,
    pub final_payout: Option<Amount>,
    pub rejection: Option<RejectionReason>,
    pub updated_at: i64,
}

impl Claim {
    pub fn new(
        policy_id: PolicyId,
        exit_commitment: PositionCommitment,
        claimant: String,
        now_ms: i64,
    ) -> Self {
        Self {
            id: ClaimId::new(),
            policy_id,
            status: ClaimStatus::Requested,
            requested_at: now_ms,
            exit_commitment,
            claimant,
            requested_amount: 0,
            price_reference: None,
            audit_hash: None,
            attested_payout: None,
            final_payout: None,
            rejection: None,
            updated_at: now_ms,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use ClaimStatus::*;
        assert!(Requested.can_transition_to(Attested));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Attested.can_transition_to(Settled));
        assert!(Attested.can_transition_to(Rejected));

        assert!(!Requested.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Rejected));
        assert!(!Settled.can_transition_to(Settled));
        assert!(!Rejected.can_transition_to(Attested));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ClaimStatus::Settled.is_terminal());
        assert!(ClaimStatus::Rejected.is_terminal());
        assert!(!ClaimStatus::Attested.is_terminal());
    }
}
