//! Outbound notifications and settlement messages

use super::attestation::TaskId;
use super::attestor::AttestorId;
use super::claim::{ClaimId, RejectionReason};
use super::policy::PoolId;
use super::Amount;
use serde::{Deserialize, Serialize};

/// Claim lifecycle notification broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaimNotification {
    ClaimRequested {
        claim_id: ClaimId,
        /// Hex digest of the exit position commitment
        exit_commitment: String,
    },
    ClaimAttested {
        claim_id: ClaimId,
    },
    ClaimSettled {
        claim_id: ClaimId,
        payout: Amount,
    },
    ClaimRejected {
        claim_id: ClaimId,
        reason: RejectionReason,
    },
}

impl ClaimNotification {
    pub fn claim_id(&self) -> ClaimId {
        match self {
            ClaimNotification::ClaimRequested { claim_id, .. }
            | ClaimNotification::ClaimAttested { claim_id }
            | ClaimNotification::ClaimSettled { claim_id, .. }
            | ClaimNotification::ClaimRejected { claim_id, .. } => *claim_id,
        }
    }
}

/// Output of a completed consensus task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDecision {
    pub claim_id: ClaimId,
    pub approved_payout: Amount,
    pub participating_attestors: Vec<AttestorId>,
    pub task_id: TaskId,
}

/// Emitted when the reserve could not cover the full entitled payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderpaymentNotice {
    pub claim_id: ClaimId,
    pub pool: PoolId,
    pub entitled: Amount,
    pub paid: Amount,
    pub shortfall: Amount,
}

/// Result of a settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub claim_id: ClaimId,
    pub task_id: TaskId,
    pub pool: PoolId,
    /// Payout approved by the attestors
    pub approved_payout: Amount,
    /// Bound derived independently from the committed positions
    pub calculator_bound: Amount,
    /// Amount actually debited from the reserve
    pub paid: Amount,
    pub underpayment: Option<UnderpaymentNotice>,
    pub settled_at: i64,
}
