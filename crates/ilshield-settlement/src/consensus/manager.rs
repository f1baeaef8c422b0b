//! Attestation Consensus Manager
//!
//! Coordinates one [`ConsensusTask`] per claim:
//! 1. Snapshots the active attestor set when the task is created
//! 2. Verifies each signed vote against the attestor's registered key
//! 3. Applies the quorum rule under the task lock
//! 4. Marks the claim `Attested` and queues the settlement decision on completion, or
//!    marks it `Rejected` on failure
//!
//! Signature checks happen before the task lock is taken; each attestor occupies one slot
//! per task.

use super::quorum::{QuorumOutcome, QuorumRule};
use super::task::{ConsensusTask, TaskFailure, TaskStatus};
use crate::journal::{LedgerEvent, SettlementJournal};
use crate::metrics::EngineMetrics;
use crate::slashing::{AttestorRegistry, Evidence, SlashOutcome};
use crate::store::PolicyStore;
use dashmap::DashMap;
use ilshield_common::{
    error::{ClaimError, ConsensusError},
    ClaimId, ClaimStatus, Clock, MisbehaviorKind, RejectionReason, Result, SettlementDecision,
    SignedAttestation, TaskId,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Finalized task result queued for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutcome {
    Completed(SettlementDecision),
    Failed {
        task_id: TaskId,
        claim_id: ClaimId,
        reason: RejectionReason,
    },
}

/// Result of an accepted vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Vote recorded, task still pending
    Recorded { received: usize, approvals: usize },
    /// Vote completed the task
    Completed(SettlementDecision),
    /// Vote caused the task to fail
    Failed(RejectionReason),
}

/// Consensus manager over all open tasks
pub struct ConsensusManager {
    tasks: DashMap<TaskId, Arc<Mutex<ConsensusTask>>>,
    by_claim: DashMap<ClaimId, TaskId>,
    registry: Arc<AttestorRegistry>,
    store: Arc<PolicyStore>,
    clock: Arc<dyn Clock>,
    journal: Arc<SettlementJournal>,
    metrics: Arc<EngineMetrics>,
    outcomes: mpsc::UnboundedSender<ConsensusOutcome>,
}

impl ConsensusManager {
    /// Create a manager and the receiving end of its outcome queue
    pub fn new(
        registry: Arc<AttestorRegistry>,
        store: Arc<PolicyStore>,
        clock: Arc<dyn Clock>,
        journal: Arc<SettlementJournal>,
        metrics: Arc<EngineMetrics>,
    ) -> (Self, mpsc::UnboundedReceiver<ConsensusOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let manager = Self {
            tasks: DashMap::new(),
            by_claim: DashMap::new(),
            registry,
            store,
            clock,
            journal,
            metrics,
            outcomes,
        };
        (manager, rx)
    }

    /// Open an attestation task for a requested claim
    #[instrument(skip(self))]
    pub fn create_task(
        &self,
        claim_id: ClaimId,
        required_quorum: usize,
        deadline: i64,
    ) -> Result<TaskId> {
        let claim = self
            .store
            .get_claim(&claim_id)
            .ok_or(ClaimError::ClaimNotFound(claim_id))?;
        if claim.status != ClaimStatus::Requested {
            return Err(ClaimError::InvalidClaimStatus {
                claim_id,
                from: claim.status,
                to: ClaimStatus::Attested,
            }
            .into());
        }

        let eligible: BTreeSet<_> = self.registry.active_attestors().into_iter().collect();
        let rule = QuorumRule::new(required_quorum, eligible.len())?;

        let now = self.clock.now_ms();
        let task = ConsensusTask::new(
            claim_id,
            rule,
            claim.requested_amount,
            eligible,
            deadline,
            now,
        );
        let task_id = task.task_id;

        match self.by_claim.entry(claim_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                return Err(ConsensusError::TaskAlreadyExists(*existing.get(), claim_id).into());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task_id);
            }
        }
        self.tasks.insert(task_id, Arc::new(Mutex::new(task)));

        self.journal.record(LedgerEvent::TaskCreated {
            task_id,
            claim_id,
            required_quorum,
            deadline,
        });
        info!(task_id = %task_id, claim_id = %claim_id, required_quorum, deadline, "Consensus task created");
        Ok(task_id)
    }

    /// Submit a signed vote
    ///
    /// A differing second statement from the same attestor slashes it and returns
    /// `ConflictingAttestation`. While the task is still open the conflict also fails
    /// the task and rejects the claim; a finalized outcome is left as it was.
    #[instrument(skip(self, attestation), fields(task_id = %attestation.task_id, attestor = %attestation.attestor))]
    pub fn submit_attestation(&self, attestation: SignedAttestation) -> Result<SubmissionOutcome> {
        let task_id = attestation.task_id;
        let task = self
            .tasks
            .get(&task_id)
            .map(|t| t.value().clone())
            .ok_or(ConsensusError::TaskNotFound(task_id))?;

        let key = self
            .registry
            .verifying_key(&attestation.attestor)
            .ok_or_else(|| ConsensusError::AttestorNotEligible(attestation.attestor.clone()))?;
        attestation
            .verify(&key)
            .map_err(|_| ConsensusError::InvalidAttestationSignature(attestation.attestor.clone()))?;

        let now = self.clock.now_ms();
        let mut guard = task.lock();

        // Equivocation is slashable for as long as the task is retained, finalized or not
        if let Some(previous) = guard.attestations.get(&attestation.attestor).cloned() {
            if previous.same_statement(&attestation) {
                return Err(ConsensusError::DuplicateAttestation {
                    task_id,
                    attestor: attestation.attestor.clone(),
                }
                .into());
            }

            let attestor = attestation.attestor.clone();
            let open = guard.is_pending() && !guard.is_overdue(now);
            if open {
                guard.fail(TaskFailure::ConflictingAttestation(attestor.clone()), now);
            }
            let claim_id = guard.claim_id;
            drop(guard);

            self.handle_conflict(task_id, claim_id, previous, attestation, open);
            return Err(ConsensusError::ConflictingAttestation { task_id, attestor }.into());
        }

        if !guard.is_pending() {
            return Err(ConsensusError::TaskNotPending(task_id).into());
        }
        if attestation.claim_id != guard.claim_id {
            return Err(ConsensusError::AttestationMismatch(task_id).into());
        }
        if guard.is_overdue(now) {
            debug!("Late vote ignored");
            return Err(ConsensusError::DeadlineExceeded(task_id).into());
        }
        if !guard.is_eligible(&attestation.attestor) {
            return Err(ConsensusError::AttestorNotEligible(attestation.attestor.clone()).into());
        }

        let attestor = attestation.attestor.clone();
        let (approved, payout) = (attestation.approved, attestation.payout);
        let outcome = guard.record(attestation, now);
        let (received, approvals) = (guard.received(), guard.approvals());
        let claim_id = guard.claim_id;
        let decision = guard.decision();
        let failure = match &guard.status {
            TaskStatus::Failed(failure) => Some(failure.clone()),
            _ => None,
        };
        drop(guard);

        self.registry.record_participation(&attestor);
        self.metrics.attestations_recorded.inc();
        self.journal.record(LedgerEvent::AttestationRecorded {
            task_id,
            attestor: attestor.clone(),
            approved,
            payout,
        });
        debug!(approved, received, approvals, "Attestation recorded");

        match outcome {
            QuorumOutcome::Pending => Ok(SubmissionOutcome::Recorded {
                received,
                approvals,
            }),
            QuorumOutcome::Approved => {
                let decision = decision.ok_or_else(|| {
                    ilshield_common::IlShieldError::Internal(format!(
                        "completed task {} has no approving payout",
                        task_id
                    ))
                })?;
                self.complete(decision.clone())?;
                Ok(SubmissionOutcome::Completed(decision))
            }
            QuorumOutcome::Failed => {
                let reason = failure
                    .map(|f| f.rejection_reason())
                    .unwrap_or(RejectionReason::ConsensusFailed);
                self.fail_claim(task_id, claim_id, reason.clone());
                Ok(SubmissionOutcome::Failed(reason))
            }
        }
    }

    /// Fail every pending task past its deadline
    ///
    /// Eligible attestors that stayed silent on an expired task get a missed task
    /// recorded, which may trigger an unavailability slash.
    pub fn expire_overdue(&self) -> Vec<TaskId> {
        let now = self.clock.now_ms();
        let candidates: Vec<Arc<Mutex<ConsensusTask>>> =
            self.tasks.iter().map(|t| t.value().clone()).collect();

        let mut expired = Vec::new();
        for task in candidates {
            let (task_id, claim_id, silent) = {
                let mut guard = task.lock();
                if !guard.is_pending() || !guard.is_overdue(now) {
                    continue;
                }
                guard.fail(TaskFailure::DeadlineExpired, now);
                (guard.task_id, guard.claim_id, guard.silent_attestors())
            };

            info!(task_id = %task_id, claim_id = %claim_id, silent = silent.len(), "Consensus deadline expired");
            for attestor in &silent {
                match self.registry.record_missed(attestor, task_id) {
                    Ok(Some(slash)) => self.record_slash(&slash),
                    Ok(None) => {}
                    Err(e) => warn!(attestor = %attestor, error = %e, "Failed to record missed task"),
                }
            }

            self.fail_claim(task_id, claim_id, RejectionReason::DeadlineExpired);
            expired.push(task_id);
        }
        expired
    }

    /// Drop finalized tasks older than `retention_ms`
    pub fn collect_garbage(&self, retention_ms: i64) -> usize {
        let now = self.clock.now_ms();
        let stale: Vec<(TaskId, ClaimId)> = self
            .tasks
            .iter()
            .filter_map(|entry| {
                let task = entry.value().lock();
                match task.finalized_at {
                    Some(at) if now.saturating_sub(at) >= retention_ms => {
                        Some((task.task_id, task.claim_id))
                    }
                    _ => None,
                }
            })
            .collect();

        for (task_id, claim_id) in &stale {
            self.tasks.remove(task_id);
            self.by_claim.remove(claim_id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "Collected finalized consensus tasks");
        }
        stale.len()
    }

    /// Snapshot of a task
    pub fn task(&self, task_id: &TaskId) -> Option<ConsensusTask> {
        self.tasks.get(task_id).map(|t| t.lock().clone())
    }

    pub fn task_for_claim(&self, claim_id: &ClaimId) -> Option<TaskId> {
        self.by_claim.get(claim_id).map(|t| *t)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.lock().is_pending()).count()
    }

    fn complete(&self, decision: SettlementDecision) -> Result<()> {
        self.store
            .mark_attested(decision.claim_id, decision.approved_payout)?;

        self.journal.record(LedgerEvent::TaskFinalized {
            task_id: decision.task_id,
            claim_id: decision.claim_id,
            completed: true,
        });
        info!(
            task_id = %decision.task_id,
            claim_id = %decision.claim_id,
            approved_payout = %decision.approved_payout,
            attestors = decision.participating_attestors.len(),
            "Consensus reached"
        );

        if self.outcomes.send(ConsensusOutcome::Completed(decision)).is_err() {
            warn!("Consensus outcome receiver dropped");
        }
        Ok(())
    }

    fn fail_claim(&self, task_id: TaskId, claim_id: ClaimId, reason: RejectionReason) {
        self.journal.record(LedgerEvent::TaskFinalized {
            task_id,
            claim_id,
            completed: false,
        });
        if let Err(e) = self.store.mark_rejected(claim_id, reason.clone()) {
            error!(task_id = %task_id, claim_id = %claim_id, error = %e, "Failed to reject claim");
        }
        if self
            .outcomes
            .send(ConsensusOutcome::Failed {
                task_id,
                claim_id,
                reason,
            })
            .is_err()
        {
            warn!("Consensus outcome receiver dropped");
        }
    }

    fn handle_conflict(
        &self,
        task_id: TaskId,
        claim_id: ClaimId,
        first: SignedAttestation,
        second: SignedAttestation,
        fail_task: bool,
    ) {
        let attestor = second.attestor.clone();
        warn!(task_id = %task_id, attestor = %attestor, fail_task, "Conflicting attestation detected");

        let evidence = Evidence::ConflictingStatements { first, second };
        match self.registry.report_misbehavior(
            &attestor,
            MisbehaviorKind::ConflictingAttestation,
            &evidence,
        ) {
            Ok(slash) => self.record_slash(&slash),
            Err(e) => error!(attestor = %attestor, error = %e, "Conflict evidence rejected"),
        }

        if fail_task {
            self.fail_claim(task_id, claim_id, RejectionReason::ConflictingAttestation);
        }
    }

    pub(crate) fn record_slash(&self, slash: &SlashOutcome) {
        self.metrics.slashing_events.inc();
        self.journal.record(LedgerEvent::AttestorSlashed {
            attestor: slash.attestor.clone(),
            kind: slash.kind,
            amount: slash.amount,
            deactivated: slash.deactivated,
        });
    }
}
