//! Prometheus metrics for the settlement engine

use ilshield_common::Amount;
use prometheus::{IntCounter, Registry};

/// Engine counters
pub struct EngineMetrics {
    pub claims_requested: IntCounter,
    pub claims_settled: IntCounter,
    pub claims_rejected: IntCounter,
    pub attestations_recorded: IntCounter,
    pub underpayments: IntCounter,
    pub slashing_events: IntCounter,
    pub payout_total: IntCounter,
}

impl EngineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            claims_requested: IntCounter::new(
                "ilshield_claims_requested_total",
                "Total claims requested",
            )?,
            claims_settled: IntCounter::new(
                "ilshield_claims_settled_total",
                "Total claims settled",
            )?,
            claims_rejected: IntCounter::new(
                "ilshield_claims_rejected_total",
                "Total claims rejected",
            )?,
            attestations_recorded: IntCounter::new(
                "ilshield_attestations_recorded_total",
                "Total attestor votes recorded",
            )?,
            underpayments: IntCounter::new(
                "ilshield_underpayments_total",
                "Settlements paid below entitlement due to reserve shortfall",
            )?,
            slashing_events: IntCounter::new(
                "ilshield_slashing_events_total",
                "Total slashing penalties applied",
            )?,
            payout_total: IntCounter::new(
                "ilshield_payout_amount_total",
                "Sum of amounts paid out of reserves",
            )?,
        })
    }

    /// Register every counter with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.claims_requested.clone()))?;
        registry.register(Box::new(self.claims_settled.clone()))?;
        registry.register(Box::new(self.claims_rejected.clone()))?;
        registry.register(Box::new(self.attestations_recorded.clone()))?;
        registry.register(Box::new(self.underpayments.clone()))?;
        registry.register(Box::new(self.slashing_events.clone()))?;
        registry.register(Box::new(self.payout_total.clone()))?;
        Ok(())
    }

    /// Add a paid amount, saturating at `u64::MAX`
    pub fn record_payout(&self, amount: Amount) {
        self.payout_total
            .inc_by(u64::try_from(amount).unwrap_or(u64::MAX));
    }
}
