//! Error types for IL Shield
//!
//! Provides a unified error type and domain-specific error variants. The domains follow
//! the claim pipeline: validation failures leave state untouched, coordination and
//! integrity failures reject the claim, economic shortfalls degrade to partial payouts.

use crate::types::{
    attestation::TaskId,
    attestor::AttestorId,
    claim::{ClaimId, ClaimStatus},
    compute::WorkerId,
    policy::{PolicyId, PoolId},
    Amount,
};
use thiserror::Error;

/// Result type alias using IlShieldError
pub type Result<T> = std::result::Result<T, IlShieldError>;

/// Unified error type for IL Shield operations
#[derive(Debug, Error)]
pub enum IlShieldError {
    // Policy and claim lifecycle errors
    #[error("Claim error: {0}")]
    Claim(#[from] ClaimError),

    // Confidential compute errors
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    // Attestation consensus errors
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    // Stake and slashing errors
    #[error("Slashing error: {0}")]
    Slashing(#[from] SlashingError),

    // Reserve accounting errors
    #[error("Reserve error: {0}")]
    Reserve(#[from] ReserveError),

    // Payout arithmetic errors
    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    // Crypto errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Policy and claim lifecycle errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Invalid policy parameters: {0}")]
    InvalidParameters(String),

    #[error("Policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("Policy is inactive: {0}")]
    PolicyInactive(PolicyId),

    #[error("A claim is already open for policy {policy_id}: {claim_id}")]
    ClaimAlreadyExists { policy_id: PolicyId, claim_id: ClaimId },

    #[error("Claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("Invalid claim transition for {claim_id}: {from} -> {to}")]
    InvalidClaimStatus {
        claim_id: ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
    },

    #[error("Settlement already in progress for claim {0}")]
    SettlementInProgress(ClaimId),

    #[error("Position commitment does not match its opening")]
    MalformedCommitment,

    #[error("Claim {0} has no recorded price reference")]
    MissingPriceReference(ClaimId),
}

/// Confidential compute errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("Invalid worker signature from {worker_id}")]
    InvalidWorkerSignature { worker_id: WorkerId },

    #[error("Compute worker is not trusted: {0}")]
    UnknownWorker(WorkerId),

    #[error("Compute timed out after {attempts} attempts")]
    ComputeTimeout { attempts: u32 },

    #[error("Worker answered for claim {actual}, expected {expected}")]
    ClaimMismatch { expected: ClaimId, actual: ClaimId },

    #[error("Invalid price reference: {0}")]
    InvalidPriceReference(String),

    #[error("Compute transport error: {0}")]
    Transport(String),

    #[error("Computation failed: {0}")]
    Computation(String),
}

/// Attestation consensus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Consensus task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Consensus task is not pending: {0}")]
    TaskNotPending(TaskId),

    #[error("Consensus task {0} already exists for claim {1}")]
    TaskAlreadyExists(TaskId, ClaimId),

    #[error("Deadline exceeded for task {0}")]
    DeadlineExceeded(TaskId),

    #[error("Attestor {attestor} already voted on task {task_id}")]
    DuplicateAttestation { task_id: TaskId, attestor: AttestorId },

    #[error("Attestor {attestor} signed conflicting statements on task {task_id}")]
    ConflictingAttestation { task_id: TaskId, attestor: AttestorId },

    #[error("Quorum unreachable: {required} approvals required, {active} active attestors")]
    QuorumUnreachable { required: usize, active: usize },

    #[error("Attestor {0} is not eligible for this task")]
    AttestorNotEligible(AttestorId),

    #[error("Invalid attestation signature from {0}")]
    InvalidAttestationSignature(AttestorId),

    #[error("Attestation does not match task {0}")]
    AttestationMismatch(TaskId),
}

/// Stake and slashing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlashingError {
    #[error("Attestor not found: {0}")]
    AttestorNotFound(AttestorId),

    #[error("Attestor already registered: {0}")]
    AlreadyRegistered(AttestorId),

    #[error("Stake {stake} below minimum {minimum}")]
    InsufficientStake { stake: Amount, minimum: Amount },

    #[error("Evidence rejected: {0}")]
    InvalidEvidence(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Stake arithmetic overflow")]
    Overflow,
}

/// Reserve accounting errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReserveError {
    #[error("Vault insolvent for pool {pool}: required {required}, available {available}")]
    VaultInsolvent {
        pool: PoolId,
        required: Amount,
        available: Amount,
    },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Reserve arithmetic overflow")]
    Overflow,

    #[error("Reserve invariant violated for pool {pool}: balance {balance}, collected {collected}, paid {paid}")]
    InvariantViolated {
        pool: PoolId,
        balance: Amount,
        collected: Amount,
        paid: Amount,
    },

    #[error("Reserve pool not found: {0}")]
    PoolNotFound(PoolId),
}

/// Payout calculation errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PayoutError {
    #[error("Payout arithmetic overflow")]
    Overflow,

    #[error("Basis points out of range: {0}")]
    BasisPointsOutOfRange(u16),
}

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    #[error("Merkle proof verification failed")]
    MerkleProofInvalid,
}

// Implement From for common external error types
impl From<serde_json::Error> for IlShieldError {
    fn from(err: serde_json::Error) -> Self {
        IlShieldError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for IlShieldError {
    fn from(err: std::io::Error) -> Self {
        IlShieldError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for IlShieldError {
    fn from(err: anyhow::Error) -> Self {
        IlShieldError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = PolicyId::new();
        let err = IlShieldError::Claim(ClaimError::PolicyNotFound(id));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_quorum_unreachable_display() {
        let err = ConsensusError::QuorumUnreachable {
            required: 4,
            active: 3,
        };
        assert!(err.to_string().contains("4 approvals required, 3 active"));
    }

    #[test]
    fn test_domain_errors_fold_into_unified() {
        let err: IlShieldError = ReserveError::InvalidAmount.into();
        assert!(matches!(err, IlShieldError::Reserve(ReserveError::InvalidAmount)));
    }
}
