//! Stake & Slashing Registry
//!
//! Arena of attestor records keyed by id. Records are never removed; disqualified
//! attestors stay in the arena with `active = false` so their history remains auditable.
//!
//! Penalties are fractions of the *current* stake:
//! - `ConflictingAttestation`: two differing statements on one task, both verifying
//! - `Unavailability`: `unavailability_grace` consecutive missed deadlines
//! - `MaliciousSignature`: a verifying approval above the bound the engine re-derives
//!   from the claim itself; the reporter never supplies the bound

use crate::config::SlashingSettings;
use dashmap::DashMap;
use ilshield_common::{
    error::SlashingError, Amount, Attestor, AttestorId, Clock, MisbehaviorKind,
    SignedAttestation, TaskId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Proof accompanying a misbehavior report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    /// Two differing signed statements on the same task
    ConflictingStatements {
        first: SignedAttestation,
        second: SignedAttestation,
    },
    /// The attestor's own missed-deadline counter is the proof
    MissedDeadlines,
    /// A signed approval whose payout exceeds what the attested claim justifies
    OverApproval { statement: SignedAttestation },
}

/// Applied penalty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOutcome {
    pub attestor: AttestorId,
    pub kind: MisbehaviorKind,
    pub amount: Amount,
    pub remaining_stake: Amount,
    /// Whether this penalty disqualified the attestor
    pub deactivated: bool,
}

/// Registry of attestor stake
pub struct AttestorRegistry {
    attestors: DashMap<AttestorId, Attestor>,
    settings: SlashingSettings,
    clock: Arc<dyn Clock>,
}

impl AttestorRegistry {
    pub fn new(settings: SlashingSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            attestors: DashMap::new(),
            settings,
            clock,
        }
    }

    /// Register an attestor under its verifying key
    pub fn register(&self, verifying_key: [u8; 32], stake: Amount) -> Result<AttestorId, SlashingError> {
        let minimum = Amount::from(self.settings.min_stake);
        if stake < minimum {
            return Err(SlashingError::InsufficientStake { stake, minimum });
        }

        let attestor = Attestor::new(verifying_key, stake, self.clock.now_ms());
        let id = attestor.id.clone();

        match self.attestors.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SlashingError::AlreadyRegistered(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(attestor);
                info!(attestor = %id, stake = %stake, "Attestor registered");
                Ok(id)
            }
        }
    }

    /// Add stake, returning the new stake
    pub fn deposit_stake(&self, id: &AttestorId, amount: Amount) -> Result<Amount, SlashingError> {
        if amount == 0 {
            return Err(SlashingError::InvalidAmount);
        }
        let mut attestor = self
            .attestors
            .get_mut(id)
            .ok_or_else(|| SlashingError::AttestorNotFound(id.clone()))?;

        let stake = attestor.stake.checked_add(amount).ok_or(SlashingError::Overflow)?;
        let deposited = attestor
            .total_deposited
            .checked_add(amount)
            .ok_or(SlashingError::Overflow)?;
        attestor.stake = stake;
        attestor.total_deposited = deposited;
        Ok(stake)
    }

    /// Validate self-contained evidence and apply the penalty for `kind`
    ///
    /// `OverApproval` is refused here: it can only be judged against a payout
    /// bound derived from the claim, which only the claim engine holds.
    pub fn report_misbehavior(
        &self,
        id: &AttestorId,
        kind: MisbehaviorKind,
        evidence: &Evidence,
    ) -> Result<SlashOutcome, SlashingError> {
        self.report(id, kind, evidence, None)
    }

    /// Like `report_misbehavior`, judging over-approval against `derived_bound`
    pub(crate) fn report_with_bound(
        &self,
        id: &AttestorId,
        kind: MisbehaviorKind,
        evidence: &Evidence,
        derived_bound: Amount,
    ) -> Result<SlashOutcome, SlashingError> {
        self.report(id, kind, evidence, Some(derived_bound))
    }

    fn report(
        &self,
        id: &AttestorId,
        kind: MisbehaviorKind,
        evidence: &Evidence,
        derived_bound: Option<Amount>,
    ) -> Result<SlashOutcome, SlashingError> {
        let mut attestor = self
            .attestors
            .get_mut(id)
            .ok_or_else(|| SlashingError::AttestorNotFound(id.clone()))?;

        let task_id = self.check_evidence(&attestor, kind, evidence, derived_bound)?;
        if kind == MisbehaviorKind::Unavailability {
            attestor.missed_tasks = 0;
        }
        Ok(self.apply_slash(&mut attestor, kind, task_id))
    }

    /// Count a deadline-expired task the attestor did not vote on
    ///
    /// Reaching the grace count slashes for unavailability and resets the counter.
    pub fn record_missed(&self, id: &AttestorId, task_id: TaskId) -> Result<Option<SlashOutcome>, SlashingError> {
        let mut attestor = self
            .attestors
            .get_mut(id)
            .ok_or_else(|| SlashingError::AttestorNotFound(id.clone()))?;

        attestor.missed_tasks = attestor.missed_tasks.saturating_add(1);
        if attestor.missed_tasks < self.settings.unavailability_grace {
            return Ok(None);
        }

        attestor.missed_tasks = 0;
        Ok(Some(self.apply_slash(
            &mut attestor,
            MisbehaviorKind::Unavailability,
            Some(task_id),
        )))
    }

    /// Reset the missed-deadline counter after a vote
    pub fn record_participation(&self, id: &AttestorId) {
        if let Some(mut attestor) = self.attestors.get_mut(id) {
            attestor.missed_tasks = 0;
        }
    }

    /// Ids of attestors currently allowed to vote, sorted
    pub fn active_attestors(&self) -> Vec<AttestorId> {
        let minimum = Amount::from(self.settings.min_stake);
        let mut ids: Vec<AttestorId> = self
            .attestors
            .iter()
            .filter(|a| a.active && a.stake >= minimum)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_eligible(&self, id: &AttestorId) -> bool {
        let minimum = Amount::from(self.settings.min_stake);
        self.attestors
            .get(id)
            .map(|a| a.active && a.stake >= minimum)
            .unwrap_or(false)
    }

    pub fn verifying_key(&self, id: &AttestorId) -> Option<[u8; 32]> {
        self.attestors.get(id).map(|a| a.verifying_key)
    }

    pub fn get(&self, id: &AttestorId) -> Option<Attestor> {
        self.attestors.get(id).map(|a| a.clone())
    }

    pub fn len(&self) -> usize {
        self.attestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attestors.is_empty()
    }

    /// Total stake ever slashed across all attestors
    pub fn forfeited_total(&self) -> Amount {
        self.attestors
            .iter()
            .fold(0u128, |acc, a| acc.saturating_add(a.total_slashed))
    }

    fn fraction_bps(&self, kind: MisbehaviorKind) -> u16 {
        match kind {
            MisbehaviorKind::ConflictingAttestation => self.settings.conflicting_attestation_bps,
            MisbehaviorKind::Unavailability => self.settings.unavailability_bps,
            MisbehaviorKind::MaliciousSignature => self.settings.malicious_signature_bps,
        }
    }

    /// Returns the task the evidence refers to, if any
    fn check_evidence(
        &self,
        attestor: &Attestor,
        kind: MisbehaviorKind,
        evidence: &Evidence,
        derived_bound: Option<Amount>,
    ) -> Result<Option<TaskId>, SlashingError> {
        let verifies = |statement: &SignedAttestation| {
            statement.attestor == attestor.id && statement.verify(&attestor.verifying_key).is_ok()
        };

        match (kind, evidence) {
            (MisbehaviorKind::ConflictingAttestation, Evidence::ConflictingStatements { first, second }) => {
                if first.task_id != second.task_id {
                    return Err(SlashingError::InvalidEvidence(
                        "statements refer to different tasks".into(),
                    ));
                }
                if first.same_statement(second) {
                    return Err(SlashingError::InvalidEvidence("statements are identical".into()));
                }
                if !verifies(first) || !verifies(second) {
                    return Err(SlashingError::InvalidEvidence(
                        "statement does not verify under attestor key".into(),
                    ));
                }
                let already = attestor.slashing_history.iter().any(|r| {
                    r.kind == MisbehaviorKind::ConflictingAttestation
                        && r.task_id == Some(first.task_id)
                });
                if already {
                    return Err(SlashingError::InvalidEvidence(format!(
                        "conflict on task {} already slashed",
                        first.task_id
                    )));
                }
                Ok(Some(first.task_id))
            }
            (MisbehaviorKind::Unavailability, Evidence::MissedDeadlines) => {
                if attestor.missed_tasks < self.settings.unavailability_grace {
                    return Err(SlashingError::InvalidEvidence(format!(
                        "{} missed tasks, grace is {}",
                        attestor.missed_tasks, self.settings.unavailability_grace
                    )));
                }
                Ok(None)
            }
            (MisbehaviorKind::MaliciousSignature, Evidence::OverApproval { statement }) => {
                let bound = derived_bound.ok_or_else(|| {
                    SlashingError::InvalidEvidence("no payout bound derived for the claim".into())
                })?;
                if !verifies(statement) {
                    return Err(SlashingError::InvalidEvidence(
                        "statement does not verify under attestor key".into(),
                    ));
                }
                if !statement.approved || statement.payout <= bound {
                    return Err(SlashingError::InvalidEvidence(format!(
                        "approval of {} does not exceed bound {}",
                        statement.payout, bound
                    )));
                }
                Ok(Some(statement.task_id))
            }
            _ => Err(SlashingError::InvalidEvidence(format!(
                "evidence does not support {}",
                kind
            ))),
        }
    }

    fn apply_slash(
        &self,
        attestor: &mut Attestor,
        kind: MisbehaviorKind,
        task_id: Option<TaskId>,
    ) -> SlashOutcome {
        let amount = attestor.slash(kind, self.fraction_bps(kind), task_id, self.clock.now_ms());

        let was_active = attestor.active;
        if attestor.slashed_bps() >= u128::from(self.settings.disqualification_bps) {
            attestor.active = false;
        }
        let deactivated = was_active && !attestor.active;

        warn!(
            attestor = %attestor.id,
            kind = %kind,
            amount = %amount,
            remaining = %attestor.stake,
            deactivated,
            "Attestor slashed"
        );

        SlashOutcome {
            attestor: attestor.id.clone(),
            kind,
            amount,
            remaining_stake: attestor.stake,
            deactivated,
        }
    }
}
