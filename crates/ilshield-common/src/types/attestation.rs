//! Signed attestor votes

use super::attestor::AttestorId;
use super::claim::ClaimId;
use super::uuid_id;
use super::Amount;
use crate::crypto::{domain_digest, verify_signature, SigningIdentity};
use crate::error::CryptoError;
use serde::{Deserialize, Serialize};

const ATTESTATION_CONTEXT: &str = "ilshield 2024 attestation v1";

uuid_id!(
    /// Consensus task identifier
    TaskId
);

/// An attestor's signed statement about a computed payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttestation {
    pub task_id: TaskId,
    pub claim_id: ClaimId,
    pub attestor: AttestorId,
    pub approved: bool,
    /// Payout the attestor vouches for
    pub payout: Amount,
    pub signature: Vec<u8>,
}

impl SignedAttestation {
    /// Build and sign a statement as `identity`
    pub fn sign(
        identity: &SigningIdentity,
        task_id: TaskId,
        claim_id: ClaimId,
        approved: bool,
        payout: Amount,
    ) -> Self {
        let signature = identity
            .sign(&statement_digest(&task_id, &claim_id, approved, payout))
            .to_vec();
        Self {
            task_id,
            claim_id,
            attestor: AttestorId(identity.did().to_string()),
            approved,
            payout,
            signature,
        }
    }

    /// Bytes covered by `signature`
    pub fn signing_bytes(&self) -> [u8; 32] {
        statement_digest(&self.task_id, &self.claim_id, self.approved, self.payout)
    }

    pub fn verify(&self, public_key: &[u8; 32]) -> Result<(), CryptoError> {
        verify_signature(public_key, &self.signing_bytes(), &self.signature)
    }

    /// Same task, claim, vote and payout
    pub fn same_statement(&self, other: &SignedAttestation) -> bool {
        self.task_id == other.task_id
            && self.claim_id == other.claim_id
            && self.attestor == other.attestor
            && self.approved == other.approved
            && self.payout == other.payout
    }
}

fn statement_digest(task_id: &TaskId, claim_id: &ClaimId, approved: bool, payout: Amount) -> [u8; 32] {
    domain_digest(
        ATTESTATION_CONTEXT,
        &[
            task_id.as_bytes(),
            claim_id.as_bytes(),
            &payout.to_le_bytes(),
            &[approved as u8],
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_statement_verifies() {
        let identity = SigningIdentity::from_seed([9u8; 32]);
        let att = SignedAttestation::sign(&identity, TaskId::new(), ClaimId::new(), true, 270);
        assert!(att.verify(&identity.public_key()).is_ok());
        assert_eq!(att.attestor.public_key().unwrap(), identity.public_key());
    }

    #[test]
    fn test_flipped_vote_breaks_signature() {
        let identity = SigningIdentity::from_seed([9u8; 32]);
        let mut att = SignedAttestation::sign(&identity, TaskId::new(), ClaimId::new(), true, 270);
        att.approved = false;
        assert!(att.verify(&identity.public_key()).is_err());
    }

    #[test]
    fn test_same_statement_ignores_nothing_but_signature() {
        let identity = SigningIdentity::from_seed([9u8; 32]);
        let task = TaskId::new();
        let claim = ClaimId::new();
        let a = SignedAttestation::sign(&identity, task, claim, true, 270);
        let b = SignedAttestation::sign(&identity, task, claim, true, 270);
        let c = SignedAttestation::sign(&identity, task, claim, true, 300);

        assert!(a.same_statement(&b));
        assert!(!a.same_statement(&c));
    }
}
