//! Confidential compute wire contract
//!
//! The worker receives both position commitments (with openings), the public price
//! reference and the policy terms, evaluates the payout formula and signs the result.
//! Nothing in a response is trusted until the signature checks out under the worker's
//! registered key, and even then the payout is only advisory.

use super::claim::ClaimId;
use super::position::PositionCommitment;
use super::Amount;
use crate::crypto::{decode_did_key, domain_digest, encode_did_key, verify_signature, SigningIdentity};
use crate::error::{ComputeError, CryptoError};
use crate::payout::{compute_payout, PayoutBreakdown, PayoutTerms};
use serde::{Deserialize, Serialize};

const REQUEST_CONTEXT: &str = "ilshield 2024 compute request v1";
const AUDIT_CONTEXT: &str = "ilshield 2024 compute audit v1";
const RESPONSE_CONTEXT: &str = "ilshield 2024 compute response v1";

/// Compute worker identifier (`did:key` of its Ed25519 key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self(encode_did_key(public_key))
    }

    pub fn public_key(&self) -> Result<[u8; 32], CryptoError> {
        decode_did_key(&self.0)
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public price observation used to value both positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReference {
    /// Trading pair, e.g. `ETH/USDC`
    pub pair: String,
    /// Price of X in units of Y, scaled by `PRICE_SCALE`
    pub price: u128,
    /// Observation timestamp (Unix milliseconds)
    pub observed_at: i64,
    pub source: String,
}

/// Request sent to the confidential compute worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub claim_id: ClaimId,
    pub entry_commitment: PositionCommitment,
    pub exit_commitment: PositionCommitment,
    pub public_price_ref: PriceReference,
    pub terms: PayoutTerms,
}

impl ComputeRequest {
    /// Digest binding every input of the computation
    pub fn digest(&self) -> [u8; 32] {
        domain_digest(
            REQUEST_CONTEXT,
            &[
                self.claim_id.as_bytes(),
                &self.entry_commitment.digest,
                &self.exit_commitment.digest,
                self.public_price_ref.pair.as_bytes(),
                &self.public_price_ref.price.to_le_bytes(),
                &self.public_price_ref.observed_at.to_le_bytes(),
                &self.terms.deductible_bps.to_le_bytes(),
                &self.terms.cap_bps.to_le_bytes(),
            ],
        )
    }

    /// Evaluate the payout formula over the opened commitments
    pub fn evaluate(&self) -> Result<PayoutBreakdown, ComputeError> {
        self.entry_commitment
            .verify()
            .and_then(|_| self.exit_commitment.verify())
            .map_err(|e| ComputeError::Computation(e.to_string()))?;

        compute_payout(
            &self.entry_commitment.snapshot,
            &self.exit_commitment.snapshot,
            self.public_price_ref.price,
            self.terms,
        )
        .map_err(|e| ComputeError::Computation(e.to_string()))
    }

    /// Evaluate and sign the result as `identity`
    pub fn answer(&self, identity: &SigningIdentity) -> Result<ComputeResponse, ComputeError> {
        let breakdown = self.evaluate()?;
        let audit_hash = audit_hash(&self.digest(), &breakdown);

        let mut response = ComputeResponse {
            claim_id: self.claim_id,
            payout: breakdown.payout,
            audit_hash,
            worker_signature: Vec::new(),
            worker_id: WorkerId(identity.did().to_string()),
        };
        response.worker_signature = identity.sign(&response.signing_bytes()).to_vec();
        Ok(response)
    }
}

/// `BLAKE3(request digest ‖ breakdown)`
pub fn audit_hash(request_digest: &[u8; 32], breakdown: &PayoutBreakdown) -> [u8; 32] {
    domain_digest(AUDIT_CONTEXT, &[request_digest, &breakdown.canonical_bytes()])
}

/// Signed result returned by the compute worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub claim_id: ClaimId,
    /// Advisory payout; re-validated at settlement
    pub payout: Amount,
    pub audit_hash: [u8; 32],
    pub worker_signature: Vec<u8>,
    pub worker_id: WorkerId,
}

impl ComputeResponse {
    /// Bytes covered by `worker_signature`
    pub fn signing_bytes(&self) -> [u8; 32] {
        domain_digest(
            RESPONSE_CONTEXT,
            &[
                self.claim_id.as_bytes(),
                &self.payout.to_le_bytes(),
                &self.audit_hash,
                self.worker_id.0.as_bytes(),
            ],
        )
    }

    /// Check the worker signature under `public_key`
    pub fn verify(&self, public_key: &[u8; 32]) -> Result<(), CryptoError> {
        verify_signature(public_key, &self.signing_bytes(), &self.worker_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::position::PositionSnapshot;
    use crate::PRICE_SCALE;

    fn request() -> ComputeRequest {
        ComputeRequest {
            claim_id: ClaimId::new(),
            entry_commitment: PositionCommitment::seal(PositionSnapshot::new(1_000, 1_000, 0)),
            exit_commitment: PositionCommitment::seal(PositionSnapshot::new(500, 1_200, 0)),
            public_price_ref: PriceReference {
                pair: "X/Y".into(),
                price: PRICE_SCALE,
                observed_at: 1_700_000_000_000,
                source: "test".into(),
            },
            terms: PayoutTerms {
                deductible_bps: 1000,
                cap_bps: 5000,
            },
        }
    }

    #[test]
    fn test_answer_is_signed_and_verifies() {
        let identity = SigningIdentity::from_seed([3u8; 32]);
        let req = request();
        let response = req.answer(&identity).unwrap();

        assert_eq!(response.claim_id, req.claim_id);
        assert_eq!(response.payout, 270);
        assert_eq!(response.worker_id.public_key().unwrap(), identity.public_key());
        assert!(response.verify(&identity.public_key()).is_ok());
    }

    #[test]
    fn test_tampered_payout_fails_verification() {
        let identity = SigningIdentity::from_seed([3u8; 32]);
        let mut response = request().answer(&identity).unwrap();
        response.payout += 1;
        assert_eq!(
            response.verify(&identity.public_key()),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_malformed_commitment_is_refused() {
        let mut req = request();
        req.exit_commitment.snapshot.amount_y = 2_000;
        assert!(matches!(req.evaluate(), Err(ComputeError::Computation(_))));
    }

    #[test]
    fn test_digest_binds_terms() {
        let req = request();
        let mut other = req.clone();
        other.terms.cap_bps = 4000;
        assert_ne!(req.digest(), other.digest());
    }
}
