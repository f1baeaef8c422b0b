//! Policy - coverage terms for one liquidity position
//!
//! A policy is written when a liquidity provider opts into coverage. Its terms never
//! change afterwards; only `active` flips when the policy is burned, expires, or pays
//! out.

use super::position::PositionCommitment;
use super::uuid_id;
use crate::error::ClaimError;
use crate::payout::PayoutTerms;
use crate::BPS_DENOMINATOR;
use serde::{Deserialize, Serialize};

uuid_id!(
    /// Policy identifier
    PolicyId
);

/// Liquidity pool whose reserve backs a policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coverage parameters chosen at issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParams {
    pub deductible_bps: u16,
    pub cap_bps: u16,
    /// Share of trading fees skimmed into the reserve
    pub premium_bps: u16,
    /// Coverage window in milliseconds
    pub duration_ms: i64,
}

impl PolicyParams {
    pub fn validate(&self) -> Result<(), ClaimError> {
        let checks = [
            ("deductible_bps", self.deductible_bps),
            ("cap_bps", self.cap_bps),
            ("premium_bps", self.premium_bps),
        ];
        for (name, bps) in checks {
            if u128::from(bps) > BPS_DENOMINATOR {
                return Err(ClaimError::InvalidParameters(format!(
                    "{} must be <= {}, got {}",
                    name, BPS_DENOMINATOR, bps
                )));
            }
        }
        if self.duration_ms <= 0 {
            return Err(ClaimError::InvalidParameters(
                "duration must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn terms(&self) -> PayoutTerms {
        PayoutTerms {
            deductible_bps: self.deductible_bps,
            cap_bps: self.cap_bps,
        }
    }
}

/// Why a policy stopped being active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivationReason {
    /// LP position burned before any claim
    Burned,
    /// Coverage window elapsed
    Expired,
    /// A claim under the policy was paid
    Settled,
}

/// Recorded insurance coverage for one liquidity position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub owner: String,
    pub pool: PoolId,
    pub params: PolicyParams,
    pub entry_commitment: PositionCommitment,
    /// Issuance timestamp (Unix milliseconds)
    pub created_at: i64,
    pub active: bool,
    pub deactivation: Option<DeactivationReason>,
}

impl Policy {
    pub fn new(
        owner: String,
        pool: PoolId,
        params: PolicyParams,
        entry_commitment: PositionCommitment,
        created_at: i64,
    ) -> Self {
        Self {
            id: PolicyId::new(),
            owner,
            pool,
            params,
            entry_commitment,
            created_at,
            active: true,
            deactivation: None,
        }
    }

    pub fn expires_at(&self) -> i64 {
        self.created_at.saturating_add(self.params.duration_ms)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    pub fn deactivate(&mut self, reason: DeactivationReason) {
        if self.active {
            self.active = false;
            self.deactivation = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::position::PositionSnapshot;

    fn params() -> PolicyParams {
        PolicyParams {
            deductible_bps: 1000,
            cap_bps: 5000,
            premium_bps: 30,
            duration_ms: 60_000,
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let bad = PolicyParams {
            cap_bps: 10_001,
            ..params()
        };
        assert!(matches!(bad.validate(), Err(ClaimError::InvalidParameters(_))));

        let zero_duration = PolicyParams {
            duration_ms: 0,
            ..params()
        };
        assert!(zero_duration.validate().is_err());
    }

    #[test]
    fn test_expiry_and_deactivation() {
        let commitment = PositionCommitment::seal(PositionSnapshot::new(1, 1, 0));
        let mut policy = Policy::new("lp".into(), PoolId::new("eth-usdc"), params(), commitment, 1_000);

        assert!(!policy.is_expired(60_999));
        assert!(policy.is_expired(61_000));

        policy.deactivate(DeactivationReason::Burned);
        policy.deactivate(DeactivationReason::Settled);
        assert!(!policy.active);
        assert_eq!(policy.deactivation, Some(DeactivationReason::Burned));
    }
}
