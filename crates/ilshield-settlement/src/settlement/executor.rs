//! Settlement Executor
//!
//! Pays out attested claims from the pool reserve:
//! 1. Re-derives the payout bound from the committed positions and the recorded price
//! 2. Clamps the attested payout to that bound
//! 3. Debits as much as the reserve holds, emitting an underpayment notice on shortfall
//! 4. Marks the claim `Settled`, which deactivates the policy
//!
//! One settlement per claim runs at a time; a second attempt fails with
//! `SettlementInProgress`, and a repeat after completion fails the status check.

use crate::metrics::EngineMetrics;
use crate::reserve::ReserveLedger;
use crate::store::PolicyStore;
use dashmap::DashMap;
use ilshield_common::{
    error::{ClaimError, PayoutError},
    payout::compute_payout, Amount, Claim, ClaimId, ClaimStatus, Clock,
    IlShieldError, Policy, RejectionReason, Result, SettlementDecision, SettlementReceipt,
    UnderpaymentNotice,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Releases the in-flight marker for a claim when dropped
struct InFlight<'a> {
    claims: &'a DashMap<ClaimId, ()>,
    claim_id: ClaimId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.claim_id);
    }
}

/// Settles attested claims against pool reserves
pub struct SettlementExecutor {
    store: Arc<PolicyStore>,
    ledger: Arc<ReserveLedger>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    in_flight: DashMap<ClaimId, ()>,
}

impl SettlementExecutor {
    pub fn new(
        store: Arc<PolicyStore>,
        ledger: Arc<ReserveLedger>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            metrics,
            in_flight: DashMap::new(),
        }
    }

    /// Settle the claim named by `decision`
    #[instrument(skip(self, decision), fields(claim_id = %decision.claim_id, task_id = %decision.task_id))]
    pub fn settle(&self, decision: &SettlementDecision) -> Result<SettlementReceipt> {
        let claim_id = decision.claim_id;
        let _guard = self.acquire(claim_id)?;

        let claim = self
            .store
            .get_claim(&claim_id)
            .ok_or(ClaimError::ClaimNotFound(claim_id))?;
        if claim.status != ClaimStatus::Attested {
            return Err(ClaimError::InvalidClaimStatus {
                claim_id,
                from: claim.status,
                to: ClaimStatus::Settled,
            }
            .into());
        }
        let policy = self
            .store
            .get_policy(&claim.policy_id)
            .ok_or(ClaimError::PolicyNotFound(claim.policy_id))?;

        let bound = match payout_bound(&policy, &claim) {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Payout bound could not be derived");
                self.store.mark_rejected(claim_id, bound_rejection(&e))?;
                return Err(e);
            }
        };

        let entitled = decision.approved_payout.min(bound);
        if decision.approved_payout > bound {
            warn!(
                approved = %decision.approved_payout,
                bound = %bound,
                "Attested payout exceeds calculator bound, clamping"
            );
        }

        let (paid, shortfall) = self.ledger.debit_up_to(&policy.pool, entitled)?;
        if let Err(e) = self.store.mark_settled(claim_id, paid) {
            error!(error = %e, paid = %paid, "Settlement failed after debit, refunding");
            if paid > 0 {
                self.ledger.refund(&policy.pool, paid)?;
            }
            return Err(e.into());
        }

        self.metrics.record_payout(paid);
        let underpayment = if shortfall > 0 {
            self.metrics.underpayments.inc();
            warn!(
                pool = %policy.pool,
                entitled = %entitled,
                paid = %paid,
                shortfall = %shortfall,
                "Reserve shortfall, claim underpaid"
            );
            Some(UnderpaymentNotice {
                claim_id,
                pool: policy.pool.clone(),
                entitled,
                paid,
                shortfall,
            })
        } else {
            None
        };

        info!(paid = %paid, bound = %bound, "Claim paid out");
        Ok(SettlementReceipt {
            claim_id,
            task_id: decision.task_id,
            pool: policy.pool,
            approved_payout: decision.approved_payout,
            calculator_bound: bound,
            paid,
            underpayment,
            settled_at: self.clock.now_ms(),
        })
    }

    /// Whether a settlement for `claim_id` is running
    pub fn is_settling(&self, claim_id: &ClaimId) -> bool {
        self.in_flight.contains_key(claim_id)
    }

    fn acquire(&self, claim_id: ClaimId) -> Result<InFlight<'_>> {
        match self.in_flight.entry(claim_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ClaimError::SettlementInProgress(claim_id).into())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    claims: &self.in_flight,
                    claim_id,
                })
            }
        }
    }
}

/// Largest payout the committed positions justify at the claim's recorded price
///
/// Both commitments are re-opened first, so a tampered snapshot never reaches
/// the calculator.
pub fn payout_bound(policy: &Policy, claim: &Claim) -> Result<Amount> {
    policy.entry_commitment.verify()?;
    claim.exit_commitment.verify()?;
    let price = claim
        .price_reference
        .as_ref()
        .ok_or(ClaimError::MissingPriceReference(claim.id))?;

    let breakdown = compute_payout(
        &policy.entry_commitment.snapshot,
        &claim.exit_commitment.snapshot,
        price.price,
        policy.params.terms(),
    )?;
    Ok(breakdown.payout)
}

fn bound_rejection(err: &IlShieldError) -> RejectionReason {
    match err {
        IlShieldError::Payout(PayoutError::Overflow) => RejectionReason::CalculationOverflow,
        IlShieldError::Claim(ClaimError::MalformedCommitment) => RejectionReason::MalformedCommitment,
        IlShieldError::Claim(ClaimError::MissingPriceReference(_)) => {
            RejectionReason::MissingPriceReference
        }
        other => RejectionReason::Other(other.to_string()),
    }
}
