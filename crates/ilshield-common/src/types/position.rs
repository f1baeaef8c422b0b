//! Liquidity position snapshots and their commitments
//!
//! A commitment binds a position snapshot to a random blinding factor. The digest is what
//! gets published; the opening (snapshot + blinding) travels only to the compute worker
//! and the settlement bound check.

use super::Amount;
use crate::crypto::domain_digest;
use crate::error::ClaimError;
use serde::{Deserialize, Serialize};

const COMMITMENT_CONTEXT: &str = "ilshield 2024 position commitment v1";

/// Token amounts of an LP position at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub amount_x: Amount,
    pub amount_y: Amount,
    /// Fees accrued by the position (zero at entry)
    pub fees_earned: Amount,
}

impl PositionSnapshot {
    pub fn new(amount_x: Amount, amount_y: Amount, fees_earned: Amount) -> Self {
        Self {
            amount_x,
            amount_y,
            fees_earned,
        }
    }
}

/// Hiding commitment to a position snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCommitment {
    pub digest: [u8; 32],
    pub snapshot: PositionSnapshot,
    pub blinding: [u8; 32],
}

impl PositionCommitment {
    /// Commit to a snapshot with a fresh random blinding factor
    pub fn seal(snapshot: PositionSnapshot) -> Self {
        let mut blinding = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut blinding);
        Self::with_blinding(snapshot, blinding)
    }

    pub fn with_blinding(snapshot: PositionSnapshot, blinding: [u8; 32]) -> Self {
        Self {
            digest: Self::compute_digest(&snapshot, &blinding),
            snapshot,
            blinding,
        }
    }

    fn compute_digest(snapshot: &PositionSnapshot, blinding: &[u8; 32]) -> [u8; 32] {
        domain_digest(
            COMMITMENT_CONTEXT,
            &[
                &snapshot.amount_x.to_le_bytes(),
                &snapshot.amount_y.to_le_bytes(),
                &snapshot.fees_earned.to_le_bytes(),
                blinding,
            ],
        )
    }

    /// Check that the digest opens to the carried snapshot
    pub fn verify(&self) -> Result<(), ClaimError> {
        if Self::compute_digest(&self.snapshot, &self.blinding) == self.digest {
            Ok(())
        } else {
            Err(ClaimError::MalformedCommitment)
        }
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_verifies() {
        let commitment = PositionCommitment::seal(PositionSnapshot::new(10, 20, 0));
        assert!(commitment.verify().is_ok());
    }

    #[test]
    fn test_blinding_hides_equal_positions() {
        let snapshot = PositionSnapshot::new(10, 20, 0);
        let a = PositionCommitment::with_blinding(snapshot, [1u8; 32]);
        let b = PositionCommitment::with_blinding(snapshot, [2u8; 32]);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_tampered_opening_is_malformed() {
        let mut commitment = PositionCommitment::seal(PositionSnapshot::new(10, 20, 0));
        commitment.snapshot.amount_x = 11;
        assert_eq!(commitment.verify(), Err(ClaimError::MalformedCommitment));
    }
}
