//! Consensus task state machine
//!
//! ```text
//! Pending ──quorum──▶ Completed
//!    │
//!    └──80% without quorum / deadline / conflict──▶ Failed
//! ```

use super::quorum::{QuorumOutcome, QuorumRule};
use ilshield_common::{
    Amount, AttestorId, ClaimId, RejectionReason, SettlementDecision, SignedAttestation, TaskId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFailure {
    /// Enough attestors answered but quorum did not form
    QuorumNotReached,
    DeadlineExpired,
    ConflictingAttestation(AttestorId),
}

impl TaskFailure {
    pub fn rejection_reason(&self) -> RejectionReason {
        match self {
            TaskFailure::QuorumNotReached => RejectionReason::ConsensusFailed,
            TaskFailure::DeadlineExpired => RejectionReason::DeadlineExpired,
            TaskFailure::ConflictingAttestation(_) => RejectionReason::ConflictingAttestation,
        }
    }
}

/// Task status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed(TaskFailure),
}

/// Attestation round for one claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusTask {
    pub task_id: TaskId,
    pub claim_id: ClaimId,
    pub required_quorum: usize,
    /// Advisory payout from the compute worker
    pub advisory_payout: Amount,
    /// Active attestors when the task was created
    pub eligible: BTreeSet<AttestorId>,
    pub attestations: HashMap<AttestorId, SignedAttestation>,
    /// Unix milliseconds; votes after this are ignored
    pub deadline: i64,
    pub created_at: i64,
    pub finalized_at: Option<i64>,
    pub status: TaskStatus,
    #[serde(skip)]
    rule: Option<QuorumRule>,
}

impl ConsensusTask {
    pub fn new(
        claim_id: ClaimId,
        rule: QuorumRule,
        advisory_payout: Amount,
        eligible: BTreeSet<AttestorId>,
        deadline: i64,
        now_ms: i64,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            claim_id,
            required_quorum: rule.required(),
            advisory_payout,
            eligible,
            attestations: HashMap::new(),
            deadline,
            created_at: now_ms,
            finalized_at: None,
            status: TaskStatus::Pending,
            rule: Some(rule),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_eligible(&self, attestor: &AttestorId) -> bool {
        self.eligible.contains(attestor)
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        now_ms > self.deadline
    }

    pub fn received(&self) -> usize {
        self.attestations.len()
    }

    pub fn approvals(&self) -> usize {
        self.attestations.values().filter(|a| a.approved).count()
    }

    /// Record a vote and re-evaluate quorum
    pub(crate) fn record(&mut self, attestation: SignedAttestation, now_ms: i64) -> QuorumOutcome {
        self.attestations
            .insert(attestation.attestor.clone(), attestation);

        let outcome = self.evaluate();
        match outcome {
            QuorumOutcome::Approved => self.finalize(TaskStatus::Completed, now_ms),
            QuorumOutcome::Failed => {
                self.finalize(TaskStatus::Failed(TaskFailure::QuorumNotReached), now_ms)
            }
            QuorumOutcome::Pending => {}
        }
        outcome
    }

    pub fn evaluate(&self) -> QuorumOutcome {
        let rule = self.rule.or_else(|| {
            QuorumRule::new(self.required_quorum, self.eligible.len()).ok()
        });
        match rule {
            Some(rule) => rule.evaluate(self.received(), self.approvals()),
            None => QuorumOutcome::Failed,
        }
    }

    pub(crate) fn fail(&mut self, failure: TaskFailure, now_ms: i64) {
        self.finalize(TaskStatus::Failed(failure), now_ms);
    }

    fn finalize(&mut self, status: TaskStatus, now_ms: i64) {
        self.status = status;
        self.finalized_at = Some(now_ms);
    }

    /// Lower median of the payouts signed by approving attestors
    pub fn approved_payout(&self) -> Option<Amount> {
        let mut payouts: Vec<Amount> = self
            .attestations
            .values()
            .filter(|a| a.approved)
            .map(|a| a.payout)
            .collect();
        if payouts.is_empty() {
            return None;
        }
        payouts.sort_unstable();
        Some(payouts[(payouts.len() - 1) / 2])
    }

    /// Approving attestors, sorted
    pub fn participants(&self) -> Vec<AttestorId> {
        let mut ids: Vec<AttestorId> = self
            .attestations
            .values()
            .filter(|a| a.approved)
            .map(|a| a.attestor.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Eligible attestors that never voted
    pub fn silent_attestors(&self) -> Vec<AttestorId> {
        self.eligible
            .iter()
            .filter(|id| !self.attestations.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Settlement decision, once completed
    pub fn decision(&self) -> Option<SettlementDecision> {
        if self.status != TaskStatus::Completed {
            return None;
        }
        Some(SettlementDecision {
            claim_id: self.claim_id,
            approved_payout: self.approved_payout()?,
            participating_attestors: self.participants(),
            task_id: self.task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilshield_common::crypto::SigningIdentity;

    struct Fixture {
        identities: Vec<SigningIdentity>,
        task: ConsensusTask,
    }

    fn fixture(n: usize, required: usize) -> Fixture {
        let identities: Vec<_> = (0..n).map(|_| SigningIdentity::generate()).collect();
        let eligible = identities
            .iter()
            .map(|i| AttestorId(i.did().to_string()))
            .collect();
        let rule = QuorumRule::new(required, n).unwrap();
        let task = ConsensusTask::new(ClaimId::new(), rule, 270, eligible, 10_000, 0);
        Fixture { identities, task }
    }

    fn vote(f: &Fixture, i: usize, approved: bool, payout: Amount) -> SignedAttestation {
        SignedAttestation::sign(&f.identities[i], f.task.task_id, f.task.claim_id, approved, payout)
    }

    #[test]
    fn test_completes_with_lower_median() {
        let mut f = fixture(5, 3);
        for (i, payout) in [(0, 280), (1, 260), (2, 270)] {
            let v = vote(&f, i, true, payout);
            f.task.record(v, 1);
        }

        assert_eq!(f.task.status, TaskStatus::Completed);
        let decision = f.task.decision().unwrap();
        assert_eq!(decision.approved_payout, 270);
        assert_eq!(decision.participating_attestors.len(), 3);
        assert_eq!(f.task.silent_attestors().len(), 2);
    }

    #[test]
    fn test_rejections_excluded_from_median() {
        let mut f = fixture(4, 3);
        let votes = [(0, true, 100), (1, false, 0), (2, true, 300)];
        for (i, approved, payout) in votes {
            let v = vote(&f, i, approved, payout);
            assert_eq!(f.task.record(v, 1), QuorumOutcome::Pending);
        }
        let v = vote(&f, 3, true, 200);
        // 3 approvals of 4: 9 >= 8
        assert_eq!(f.task.record(v, 2), QuorumOutcome::Approved);
        assert_eq!(f.task.approved_payout(), Some(200));
    }

    #[test]
    fn test_fails_at_eighty_percent_without_quorum() {
        let mut f = fixture(5, 3);
        let votes = [(0, true), (1, true), (2, false), (3, false)];
        for (i, approved) in votes {
            let v = vote(&f, i, approved, 270);
            f.task.record(v, 1);
        }
        assert_eq!(
            f.task.status,
            TaskStatus::Failed(TaskFailure::QuorumNotReached)
        );
        assert!(f.task.decision().is_none());
        assert_eq!(f.task.finalized_at, Some(1));
    }
}
