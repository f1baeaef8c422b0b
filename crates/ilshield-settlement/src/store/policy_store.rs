//! Policy & Claim Store
//!
//! Holds coverage terms and the claim lifecycle for every insured position. All
//! lifecycle transitions go through [`ClaimStatus::can_transition_to`] under one write
//! lock, so at most one open claim exists per policy and a settled claim is never
//! touched again. Notifications go out on a broadcast channel once the lock is released.

use crate::journal::{LedgerEvent, SettlementJournal};
use crate::metrics::EngineMetrics;
use ilshield_common::{
    error::ClaimError, Amount, Claim, ClaimId, ClaimNotification, ClaimStatus, Clock,
    DeactivationReason, Policy, PolicyId, PolicyParams, PoolId, PositionCommitment,
    PriceReference, RejectionReason,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the notification channel
const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Default)]
struct StoreState {
    policies: HashMap<PolicyId, Policy>,
    claims: HashMap<ClaimId, Claim>,
    /// Non-terminal claim per policy
    open_claims: HashMap<PolicyId, ClaimId>,
}

/// In-memory policy and claim store
pub struct PolicyStore {
    state: RwLock<StoreState>,
    notifications: broadcast::Sender<ClaimNotification>,
    clock: Arc<dyn Clock>,
    journal: Arc<SettlementJournal>,
    metrics: Arc<EngineMetrics>,
}

impl PolicyStore {
    pub fn new(
        clock: Arc<dyn Clock>,
        journal: Arc<SettlementJournal>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            notifications,
            clock,
            journal,
            metrics,
        }
    }

    /// Subscribe to claim lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ClaimNotification> {
        self.notifications.subscribe()
    }

    fn notify(&self, notification: ClaimNotification) {
        // No subscribers is not an error
        let _ = self.notifications.send(notification);
    }

    /// Record a new policy
    pub fn create_policy(
        &self,
        owner: impl Into<String>,
        pool: PoolId,
        params: PolicyParams,
        entry_commitment: PositionCommitment,
    ) -> Result<PolicyId, ClaimError> {
        params.validate()?;
        entry_commitment.verify()?;

        let policy = Policy::new(
            owner.into(),
            pool,
            params,
            entry_commitment,
            self.clock.now_ms(),
        );
        let id = policy.id;

        info!(policy_id = %id, pool = %policy.pool, owner = %policy.owner, "Policy created");
        self.state.write().policies.insert(id, policy);
        Ok(id)
    }

    /// Open a claim under an active policy
    pub fn request_claim(
        &self,
        policy_id: PolicyId,
        exit_commitment: PositionCommitment,
        claimant: impl Into<String>,
    ) -> Result<ClaimId, ClaimError> {
        exit_commitment.verify()?;
        let now = self.clock.now_ms();

        let claim = {
            let mut state = self.state.write();
            let policy = state
                .policies
                .get_mut(&policy_id)
                .ok_or(ClaimError::PolicyNotFound(policy_id))?;

            if policy.active && policy.is_expired(now) {
                policy.deactivate(DeactivationReason::Expired);
                info!(policy_id = %policy_id, "Policy expired");
            }
            if !policy.active {
                return Err(ClaimError::PolicyInactive(policy_id));
            }

            if let Some(open) = state.open_claims.get(&policy_id) {
                return Err(ClaimError::ClaimAlreadyExists {
                    policy_id,
                    claim_id: *open,
                });
            }

            let claim = Claim::new(policy_id, exit_commitment, claimant.into(), now);
            state.open_claims.insert(policy_id, claim.id);
            state.claims.insert(claim.id, claim.clone());
            claim
        };

        let digest = claim.exit_commitment.digest_hex();
        info!(claim_id = %claim.id, policy_id = %policy_id, "Claim requested");
        self.metrics.claims_requested.inc();
        self.journal.record(LedgerEvent::ClaimRequested {
            claim_id: claim.id,
            policy_id,
            exit_commitment: digest.clone(),
        });
        self.notify(ClaimNotification::ClaimRequested {
            claim_id: claim.id,
            exit_commitment: digest,
        });
        Ok(claim.id)
    }

    /// Attach the verified compute result to a requested claim
    pub fn record_compute_result(
        &self,
        claim_id: ClaimId,
        advisory_payout: Amount,
        price_reference: PriceReference,
        audit_hash: [u8; 32],
    ) -> Result<(), ClaimError> {
        let mut state = self.state.write();
        let claim = state
            .claims
            .get_mut(&claim_id)
            .ok_or(ClaimError::ClaimNotFound(claim_id))?;

        if claim.status != ClaimStatus::Requested {
            return Err(ClaimError::InvalidClaimStatus {
                claim_id,
                from: claim.status,
                to: ClaimStatus::Attested,
            });
        }

        claim.requested_amount = advisory_payout;
        claim.price_reference = Some(price_reference);
        claim.audit_hash = Some(audit_hash);
        claim.updated_at = self.clock.now_ms();
        debug!(claim_id = %claim_id, advisory_payout = %advisory_payout, "Compute result recorded");
        Ok(())
    }

    /// Apply a checked transition, returning the updated claim
    fn transition<F>(&self, claim_id: ClaimId, to: ClaimStatus, apply: F) -> Result<Claim, ClaimError>
    where
        F: FnOnce(&mut Claim),
    {
        let now = self.clock.now_ms();
        let mut state = self.state.write();
        let StoreState {
            policies,
            claims,
            open_claims,
        } = &mut *state;

        let claim = claims
            .get_mut(&claim_id)
            .ok_or(ClaimError::ClaimNotFound(claim_id))?;

        if !claim.status.can_transition_to(to) {
            return Err(ClaimError::InvalidClaimStatus {
                claim_id,
                from: claim.status,
                to,
            });
        }

        claim.status = to;
        claim.updated_at = now;
        apply(claim);

        if to.is_terminal() {
            open_claims.remove(&claim.policy_id);
        }
        if to == ClaimStatus::Settled {
            if let Some(policy) = policies.get_mut(&claim.policy_id) {
                policy.deactivate(DeactivationReason::Settled);
            }
        }
        Ok(claim.clone())
    }

    /// `Requested → Attested`
    pub(crate) fn mark_attested(&self, claim_id: ClaimId, payout: Amount) -> Result<Claim, ClaimError> {
        let claim = self.transition(claim_id, ClaimStatus::Attested, |c| {
            c.attested_payout = Some(payout);
        })?;

        info!(claim_id = %claim_id, payout = %payout, "Claim attested");
        self.notify(ClaimNotification::ClaimAttested { claim_id });
        Ok(claim)
    }

    /// `Attested → Settled`; deactivates the policy
    pub(crate) fn mark_settled(&self, claim_id: ClaimId, payout: Amount) -> Result<Claim, ClaimError> {
        let claim = self.transition(claim_id, ClaimStatus::Settled, |c| {
            c.final_payout = Some(payout);
        })?;

        info!(claim_id = %claim_id, payout = %payout, "Claim settled");
        self.metrics.claims_settled.inc();
        self.journal
            .record(LedgerEvent::ClaimSettled { claim_id, payout });
        self.notify(ClaimNotification::ClaimSettled { claim_id, payout });
        Ok(claim)
    }

    /// `Requested | Attested → Rejected`; the policy stays active for a retry
    pub(crate) fn mark_rejected(
        &self,
        claim_id: ClaimId,
        reason: RejectionReason,
    ) -> Result<Claim, ClaimError> {
        let recorded = reason.clone();
        let claim = self.transition(claim_id, ClaimStatus::Rejected, |c| {
            c.rejection = Some(recorded);
        })?;

        warn!(claim_id = %claim_id, reason = %reason, "Claim rejected");
        self.metrics.claims_rejected.inc();
        self.journal.record(LedgerEvent::ClaimRejected {
            claim_id,
            reason: reason.clone(),
        });
        self.notify(ClaimNotification::ClaimRejected { claim_id, reason });
        Ok(claim)
    }

    /// Deactivate a policy, e.g. when its LP position is burned
    pub fn deactivate_policy(
        &self,
        policy_id: PolicyId,
        reason: DeactivationReason,
    ) -> Result<(), ClaimError> {
        let mut state = self.state.write();
        let policy = state
            .policies
            .get_mut(&policy_id)
            .ok_or(ClaimError::PolicyNotFound(policy_id))?;
        policy.deactivate(reason);
        info!(policy_id = %policy_id, reason = ?reason, "Policy deactivated");
        Ok(())
    }

    /// Deactivate every active policy whose window has passed
    pub fn expire_policies(&self) -> Vec<PolicyId> {
        let now = self.clock.now_ms();
        let mut state = self.state.write();
        let expired: Vec<PolicyId> = state
            .policies
            .values_mut()
            .filter(|p| p.active && p.is_expired(now))
            .map(|p| {
                p.deactivate(DeactivationReason::Expired);
                p.id
            })
            .collect();

        if !expired.is_empty() {
            info!(count = expired.len(), "Policies expired");
        }
        expired
    }

    pub fn get_policy(&self, policy_id: &PolicyId) -> Option<Policy> {
        self.state.read().policies.get(policy_id).cloned()
    }

    pub fn get_claim(&self, claim_id: &ClaimId) -> Option<Claim> {
        self.state.read().claims.get(claim_id).cloned()
    }

    /// The non-terminal claim of a policy, if any
    pub fn open_claim_for(&self, policy_id: &PolicyId) -> Option<ClaimId> {
        self.state.read().open_claims.get(policy_id).copied()
    }

    /// Status of the latest claim under a policy (`None` if never claimed)
    pub fn claim_status(&self, policy_id: &PolicyId) -> ClaimStatus {
        let state = self.state.read();
        state
            .claims
            .values()
            .filter(|c| c.policy_id == *policy_id)
            .max_by_key(|c| (c.requested_at, c.id))
            .map(|c| c.status)
            .unwrap_or(ClaimStatus::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilshield_common::{ManualClock, PositionSnapshot};

    struct Fixture {
        clock: Arc<ManualClock>,
        store: PolicyStore,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = PolicyStore::new(
            dyn_clock.clone(),
            Arc::new(SettlementJournal::new(dyn_clock)),
            Arc::new(EngineMetrics::new().unwrap()),
        );
        Fixture { clock, store }
    }

    fn params() -> PolicyParams {
        PolicyParams {
            deductible_bps: 1000,
            cap_bps: 5000,
            premium_bps: 30,
            duration_ms: 10_000,
        }
    }

    fn commitment(x: u128, y: u128) -> PositionCommitment {
        PositionCommitment::seal(PositionSnapshot::new(x, y, 0))
    }

    fn policy(store: &PolicyStore) -> PolicyId {
        store
            .create_policy("lp", PoolId::new("eth-usdc"), params(), commitment(1_000, 1_000))
            .unwrap()
    }

    #[test]
    fn test_create_policy_validates() {
        let f = fixture();
        let bad = PolicyParams {
            deductible_bps: 10_001,
            ..params()
        };
        assert!(matches!(
            f.store
                .create_policy("lp", PoolId::new("p"), bad, commitment(1, 1)),
            Err(ClaimError::InvalidParameters(_))
        ));

        let mut malformed = commitment(1, 1);
        malformed.snapshot.amount_x = 2;
        assert_eq!(
            f.store
                .create_policy("lp", PoolId::new("p"), params(), malformed),
            Err(ClaimError::MalformedCommitment)
        );
    }

    #[test]
    fn test_one_open_claim_per_policy() {
        let f = fixture();
        let policy_id = policy(&f.store);

        let first = f.store.request_claim(policy_id, commitment(500, 1_200), "lp").unwrap();
        let second = f.store.request_claim(policy_id, commitment(500, 1_200), "lp");
        assert_eq!(
            second,
            Err(ClaimError::ClaimAlreadyExists {
                policy_id,
                claim_id: first
            })
        );
        assert_eq!(f.store.open_claim_for(&policy_id), Some(first));
        assert_eq!(f.store.claim_status(&policy_id), ClaimStatus::Requested);
    }

    #[test]
    fn test_unknown_and_expired_policy() {
        let f = fixture();
        let missing = PolicyId::new();
        assert_eq!(
            f.store.request_claim(missing, commitment(1, 1), "lp"),
            Err(ClaimError::PolicyNotFound(missing))
        );

        let policy_id = policy(&f.store);
        f.clock.advance(10_000);
        assert_eq!(
            f.store.request_claim(policy_id, commitment(1, 1), "lp"),
            Err(ClaimError::PolicyInactive(policy_id))
        );
        let policy = f.store.get_policy(&policy_id).unwrap();
        assert_eq!(policy.deactivation, Some(DeactivationReason::Expired));
    }

    #[test]
    fn test_rejected_claim_can_be_retried() {
        let f = fixture();
        let policy_id = policy(&f.store);
        let claim_id = f.store.request_claim(policy_id, commitment(1, 1), "lp").unwrap();

        f.store
            .mark_rejected(claim_id, RejectionReason::ComputeTimeout)
            .unwrap();
        assert!(f.store.get_policy(&policy_id).unwrap().active);
        assert!(f.store.request_claim(policy_id, commitment(1, 1), "lp").is_ok());
    }

    #[test]
    fn test_settled_is_terminal_and_deactivates() {
        let f = fixture();
        let policy_id = policy(&f.store);
        let claim_id = f.store.request_claim(policy_id, commitment(1, 1), "lp").unwrap();

        // Settling straight from Requested is illegal
        assert!(matches!(
            f.store.mark_settled(claim_id, 10),
            Err(ClaimError::InvalidClaimStatus { .. })
        ));

        f.store.mark_attested(claim_id, 10).unwrap();
        let settled = f.store.mark_settled(claim_id, 10).unwrap();
        assert_eq!(settled.final_payout, Some(10));

        assert!(matches!(
            f.store.mark_settled(claim_id, 10),
            Err(ClaimError::InvalidClaimStatus {
                from: ClaimStatus::Settled,
                ..
            })
        ));
        assert!(f.store.mark_rejected(claim_id, RejectionReason::ConsensusFailed).is_err());

        let policy = f.store.get_policy(&policy_id).unwrap();
        assert!(!policy.active);
        assert_eq!(policy.deactivation, Some(DeactivationReason::Settled));
        assert_eq!(
            f.store.request_claim(policy_id, commitment(1, 1), "lp"),
            Err(ClaimError::PolicyInactive(policy_id))
        );
    }

    #[test]
    fn test_compute_result_only_while_requested() {
        let f = fixture();
        let policy_id = policy(&f.store);
        let claim_id = f.store.request_claim(policy_id, commitment(1, 1), "lp").unwrap();
        let price = PriceReference {
            pair: "X/Y".into(),
            price: 1,
            observed_at: 1_000,
            source: "test".into(),
        };

        f.store
            .record_compute_result(claim_id, 270, price.clone(), [1u8; 32])
            .unwrap();
        assert_eq!(f.store.get_claim(&claim_id).unwrap().requested_amount, 270);

        f.store.mark_attested(claim_id, 270).unwrap();
        assert!(f
            .store
            .record_compute_result(claim_id, 1, price, [2u8; 32])
            .is_err());
    }

    #[tokio::test]
    async fn test_notifications_broadcast() {
        let f = fixture();
        let mut rx = f.store.subscribe();
        let policy_id = policy(&f.store);
        let claim_id = f.store.request_claim(policy_id, commitment(1, 1), "lp").unwrap();

        match rx.recv().await.unwrap() {
            ClaimNotification::ClaimRequested { claim_id: id, .. } => assert_eq!(id, claim_id),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_expire_policies() {
        let f = fixture();
        let policy_id = policy(&f.store);
        assert!(f.store.expire_policies().is_empty());

        f.clock.advance(10_000);
        assert_eq!(f.store.expire_policies(), vec![policy_id]);
        assert!(f.store.expire_policies().is_empty());
    }
}
