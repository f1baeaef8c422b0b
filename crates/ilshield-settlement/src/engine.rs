//! Claim Engine
//!
//! Facade wiring the store, compute client, consensus manager, slashing registry,
//! reserve ledger and settlement executor into one claim pipeline:
//!
//! ```text
//! submit_claim ─▶ price check ─▶ Requested ─▶ compute ─▶ consensus task
//!                                                              │
//! submit_attestation ─▶ quorum ─▶ Attested ─▶ settle ─▶ Settled
//!                          └──────────▶ Rejected
//! ```
//!
//! Consensus outcomes are queued by the manager and drained here after every vote and on
//! every sweep, so a completed task is settled on the same call that completed it.

use crate::compute::{ComputeClient, ComputeWorker, PriceFeedValidator};
use crate::config::EngineConfig;
use crate::consensus::{ConsensusManager, ConsensusOutcome, SubmissionOutcome};
use crate::journal::{LedgerEvent, SettlementJournal};
use crate::metrics::EngineMetrics;
use crate::reserve::ReserveLedger;
use crate::settlement::{payout_bound, SettlementExecutor};
use crate::slashing::{AttestorRegistry, Evidence, SlashOutcome};
use crate::store::PolicyStore;
use dashmap::DashMap;
use ilshield_common::{
    error::{ClaimError, ComputeError, ConsensusError, SlashingError},
    Amount, AttestorId, ClaimId, ClaimNotification, ClaimStatus, Clock, IlShieldError,
    MisbehaviorKind, PolicyId, PolicyParams, PoolId, PositionCommitment, PriceReference,
    RejectionReason, Result, SettlementReceipt, SignedAttestation, SystemClock, TaskId, WorkerId,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Result of submitting a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSubmission {
    pub claim_id: ClaimId,
    /// `Requested` while attestation is pending, `Rejected` if the pipeline stopped early
    pub status: ClaimStatus,
    pub task_id: Option<TaskId>,
    pub rejection: Option<RejectionReason>,
}

/// Work done by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_tasks: Vec<TaskId>,
    pub expired_policies: Vec<PolicyId>,
    pub collected_tasks: usize,
    pub settlements: Vec<SettlementReceipt>,
}

/// Claim settlement engine
pub struct ClaimEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    journal: Arc<SettlementJournal>,
    metrics: Arc<EngineMetrics>,
    store: Arc<PolicyStore>,
    ledger: Arc<ReserveLedger>,
    registry: Arc<AttestorRegistry>,
    compute: ComputeClient,
    price_feed: PriceFeedValidator,
    consensus: ConsensusManager,
    executor: SettlementExecutor,
    outcomes: Mutex<mpsc::UnboundedReceiver<ConsensusOutcome>>,
    receipts: DashMap<ClaimId, SettlementReceipt>,
    /// Shutdown signal
    shutdown: Arc<RwLock<bool>>,
}

impl ClaimEngine {
    /// Create an engine on the system clock
    pub fn new(config: EngineConfig, worker: Arc<dyn ComputeWorker>) -> Result<Self> {
        Self::with_clock(config, worker, Arc::new(SystemClock))
    }

    /// Create an engine on an explicit clock
    pub fn with_clock(
        config: EngineConfig,
        worker: Arc<dyn ComputeWorker>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let metrics = Arc::new(
            EngineMetrics::new().map_err(|e| IlShieldError::Internal(e.to_string()))?,
        );
        let journal = Arc::new(SettlementJournal::new(clock.clone()));
        let store = Arc::new(PolicyStore::new(
            clock.clone(),
            journal.clone(),
            metrics.clone(),
        ));
        let ledger = Arc::new(ReserveLedger::new(clock.clone(), journal.clone()));
        let registry = Arc::new(AttestorRegistry::new(
            config.slashing.clone(),
            clock.clone(),
        ));
        let (consensus, outcomes) = ConsensusManager::new(
            registry.clone(),
            store.clone(),
            clock.clone(),
            journal.clone(),
            metrics.clone(),
        );
        let executor = SettlementExecutor::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            metrics.clone(),
        );
        if config.price_feed.trusted_sources.is_empty() {
            warn!("No trusted price feeds configured, any price source will be accepted");
        }

        Ok(Self {
            compute: ComputeClient::new(worker, config.compute.clone()),
            price_feed: PriceFeedValidator::new(config.price_feed.clone()),
            config,
            clock,
            journal,
            metrics,
            store,
            ledger,
            registry,
            consensus,
            executor,
            outcomes: Mutex::new(outcomes),
            receipts: DashMap::new(),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    // ---- policies and reserves ----

    pub fn create_policy(
        &self,
        owner: impl Into<String>,
        pool: PoolId,
        params: PolicyParams,
        entry_commitment: PositionCommitment,
    ) -> Result<PolicyId> {
        Ok(self
            .store
            .create_policy(owner, pool, params, entry_commitment)?)
    }

    pub fn credit(&self, pool: &PoolId, amount: Amount) -> Result<Amount> {
        self.ledger.credit(pool, amount)
    }

    /// Credit `premium_bps` of a trading fee to the pool reserve
    pub fn credit_premium(&self, pool: &PoolId, fee_amount: Amount, premium_bps: u16) -> Result<Amount> {
        self.ledger.credit_premium(pool, fee_amount, premium_bps)
    }

    // ---- attestors and workers ----

    pub fn register_attestor(&self, verifying_key: [u8; 32], stake: Amount) -> Result<AttestorId> {
        Ok(self.registry.register(verifying_key, stake)?)
    }

    pub fn deposit_stake(&self, attestor: &AttestorId, amount: Amount) -> Result<Amount> {
        Ok(self.registry.deposit_stake(attestor, amount)?)
    }

    pub fn trust_worker(&self, public_key: [u8; 32]) -> WorkerId {
        self.compute.trust_worker(public_key)
    }

    /// Report attestor misbehavior with supporting evidence
    ///
    /// Over-approval is judged against the bound re-derived from the claim the
    /// statement names: its policy terms, both commitments and the recorded price.
    pub fn report_misbehavior(
        &self,
        attestor: &AttestorId,
        kind: MisbehaviorKind,
        evidence: &Evidence,
    ) -> Result<SlashOutcome> {
        let slash = match evidence {
            Evidence::OverApproval { statement } => {
                let bound = self.derived_bound(&statement.claim_id)?;
                self.registry
                    .report_with_bound(attestor, kind, evidence, bound)?
            }
            _ => self.registry.report_misbehavior(attestor, kind, evidence)?,
        };
        self.consensus.record_slash(&slash);
        Ok(slash)
    }

    fn derived_bound(&self, claim_id: &ClaimId) -> Result<Amount> {
        let claim = self.store.get_claim(claim_id).ok_or_else(|| {
            SlashingError::InvalidEvidence(format!("statement names unknown claim {}", claim_id))
        })?;
        let policy = self
            .store
            .get_policy(&claim.policy_id)
            .ok_or(ClaimError::PolicyNotFound(claim.policy_id))?;

        payout_bound(&policy, &claim).map_err(|e| {
            IlShieldError::from(SlashingError::InvalidEvidence(format!(
                "no payout bound for claim {}: {}",
                claim_id, e
            )))
        })
    }

    /// Record a trusted feed observation that later claim prices are checked against
    pub fn record_price(&self, observation: &PriceReference) -> Result<()> {
        Ok(self.price_feed.record_observation(observation)?)
    }

    // ---- claim pipeline ----

    /// Open a claim and drive it to the attestation stage
    ///
    /// An invalid price reference fails without touching state. Once the claim is
    /// `Requested`, every failure rejects it (releasing the policy for a retry) and is
    /// reported in the returned [`ClaimSubmission`].
    #[instrument(skip(self, exit_commitment, claimant, price_ref))]
    pub async fn submit_claim(
        &self,
        policy_id: PolicyId,
        exit_commitment: PositionCommitment,
        claimant: impl Into<String>,
        price_ref: PriceReference,
    ) -> Result<ClaimSubmission> {
        self.price_feed
            .validate_reference(&price_ref, self.clock.now_ms())?;

        let claim_id = self
            .store
            .request_claim(policy_id, exit_commitment.clone(), claimant)?;
        let policy = self
            .store
            .get_policy(&policy_id)
            .ok_or(ClaimError::PolicyNotFound(policy_id))?;

        let response = match self
            .compute
            .request_computation(
                claim_id,
                policy.entry_commitment.clone(),
                exit_commitment,
                price_ref.clone(),
                policy.params.terms(),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(claim_id = %claim_id, error = %e, "Confidential compute failed");
                return self.reject_submission(claim_id, compute_rejection(&e));
            }
        };

        if let Err(e) = self.store.record_compute_result(
            claim_id,
            response.payout,
            price_ref,
            response.audit_hash,
        ) {
            return self.abandon_submission(claim_id, e.into());
        }
        self.journal.record(LedgerEvent::ComputeAccepted {
            claim_id,
            advisory_payout: response.payout,
            audit_hash: hex::encode(response.audit_hash),
            worker_id: response.worker_id.to_string(),
        });

        let deadline = self
            .clock
            .now_ms()
            .saturating_add(self.config.consensus.deadline_ms);
        let task_id = match self.consensus.create_task(
            claim_id,
            self.config.consensus.required_quorum,
            deadline,
        ) {
            Ok(task_id) => task_id,
            Err(IlShieldError::Consensus(e @ ConsensusError::QuorumUnreachable { .. })) => {
                warn!(claim_id = %claim_id, error = %e, "Attestation quorum unreachable");
                return self.reject_submission(claim_id, RejectionReason::QuorumUnreachable);
            }
            Err(e) => return self.abandon_submission(claim_id, e),
        };

        info!(claim_id = %claim_id, task_id = %task_id, advisory_payout = %response.payout, "Claim awaiting attestation");
        Ok(ClaimSubmission {
            claim_id,
            status: ClaimStatus::Requested,
            task_id: Some(task_id),
            rejection: None,
        })
    }

    /// Submit an attestor vote and settle the claim if it completes the task
    pub fn submit_attestation(&self, attestation: SignedAttestation) -> Result<SubmissionOutcome> {
        let result = self.consensus.submit_attestation(attestation);
        // A conflicting vote fails the task even though the submission errors
        self.drain_outcomes();
        result
    }

    /// Process queued consensus outcomes, returning new settlement receipts
    pub fn drain_outcomes(&self) -> Vec<SettlementReceipt> {
        let mut receipts = Vec::new();
        loop {
            let next = self.outcomes.lock().try_recv();
            let outcome = match next {
                Ok(outcome) => outcome,
                Err(_) => break,
            };

            match outcome {
                ConsensusOutcome::Completed(decision) => match self.executor.settle(&decision) {
                    Ok(receipt) => {
                        self.receipts.insert(receipt.claim_id, receipt.clone());
                        receipts.push(receipt);
                    }
                    Err(e) => {
                        error!(claim_id = %decision.claim_id, error = %e, "Settlement failed");
                    }
                },
                ConsensusOutcome::Failed {
                    task_id,
                    claim_id,
                    reason,
                } => {
                    debug!(task_id = %task_id, claim_id = %claim_id, reason = %reason, "Consensus failed");
                }
            }
        }
        receipts
    }

    /// Expire overdue tasks and policies, collect old tasks, settle completed claims
    pub fn sweep(&self) -> SweepReport {
        let expired_tasks = self.consensus.expire_overdue();
        let expired_policies = self.store.expire_policies();
        let collected_tasks = self
            .consensus
            .collect_garbage(self.config.consensus.retention_ms);
        let settlements = self.drain_outcomes();

        if !expired_tasks.is_empty() || !settlements.is_empty() {
            debug!(
                expired_tasks = expired_tasks.len(),
                expired_policies = expired_policies.len(),
                collected_tasks,
                settlements = settlements.len(),
                "Sweep completed"
            );
        }
        SweepReport {
            expired_tasks,
            expired_policies,
            collected_tasks,
            settlements,
        }
    }

    /// Sweep on the configured interval until [`ClaimEngine::shutdown`]
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.consensus.sweep_interval_ms.max(1));
        info!(interval_ms = interval.as_millis() as u64, "Starting claim engine sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if *self.shutdown.read().await {
                    break;
                }
                self.sweep();
            }
            info!("Claim engine sweeper stopped");
        })
    }

    /// Stop the sweeper
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
    }

    /// Reject a claim the pipeline could not carry past compute
    fn abandon_submission(&self, claim_id: ClaimId, err: IlShieldError) -> Result<ClaimSubmission> {
        error!(claim_id = %claim_id, error = %err, "Claim pipeline failed after request");
        self.reject_submission(claim_id, RejectionReason::Other(err.to_string()))
    }

    fn reject_submission(&self, claim_id: ClaimId, reason: RejectionReason) -> Result<ClaimSubmission> {
        self.store.mark_rejected(claim_id, reason.clone())?;
        Ok(ClaimSubmission {
            claim_id,
            status: ClaimStatus::Rejected,
            task_id: None,
            rejection: Some(reason),
        })
    }

    // ---- accessors ----

    pub fn subscribe(&self) -> broadcast::Receiver<ClaimNotification> {
        self.store.subscribe()
    }

    pub fn receipt(&self, claim_id: &ClaimId) -> Option<SettlementReceipt> {
        self.receipts.get(claim_id).map(|r| r.clone())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn ledger(&self) -> &ReserveLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &AttestorRegistry {
        &self.registry
    }

    pub fn consensus(&self) -> &ConsensusManager {
        &self.consensus
    }

    pub fn journal(&self) -> &SettlementJournal {
        &self.journal
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn price_feed(&self) -> &PriceFeedValidator {
        &self.price_feed
    }
}

fn compute_rejection(err: &ComputeError) -> RejectionReason {
    match err {
        ComputeError::ComputeTimeout { .. } => RejectionReason::ComputeTimeout,
        ComputeError::InvalidWorkerSignature { .. }
        | ComputeError::UnknownWorker(_)
        | ComputeError::ClaimMismatch { .. } => RejectionReason::InvalidWorkerSignature,
        other => RejectionReason::ComputeFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::LocalComputeWorker;
    use async_trait::async_trait;
    use ilshield_common::{
        crypto::SigningIdentity, ComputeRequest, ComputeResponse, ManualClock, PositionSnapshot,
        PRICE_SCALE,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;

    const START: i64 = 1_700_000_000_000;

    /// Answers honestly, but first moves the claim out of `Requested` once
    struct InterferingWorker {
        inner: LocalComputeWorker,
        store: OnceLock<Arc<PolicyStore>>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl ComputeWorker for InterferingWorker {
        async fn compute(&self, request: &ComputeRequest) -> std::result::Result<ComputeResponse, ComputeError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                if let Some(store) = self.store.get() {
                    store.mark_attested(request.claim_id, 0).unwrap();
                }
            }
            self.inner.compute(request).await
        }
    }

    fn price() -> PriceReference {
        PriceReference {
            pair: "ETH/USDC".into(),
            price: PRICE_SCALE,
            observed_at: START,
            source: "twap".into(),
        }
    }

    #[tokio::test]
    async fn test_failure_after_request_rejects_claim() {
        let worker = Arc::new(InterferingWorker {
            inner: LocalComputeWorker::new(SigningIdentity::generate()),
            store: OnceLock::new(),
            armed: AtomicBool::new(true),
        });
        let engine = ClaimEngine::with_clock(
            EngineConfig::default(),
            worker.clone(),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap();
        engine.trust_worker(worker.inner.public_key());
        worker.store.set(engine.store.clone()).ok().unwrap();
        for _ in 0..3 {
            engine
                .register_attestor(SigningIdentity::generate().public_key(), 1_000)
                .unwrap();
        }

        let params = PolicyParams {
            deductible_bps: 1000,
            cap_bps: 5000,
            premium_bps: 30,
            duration_ms: 1_000_000,
        };
        let entry = PositionCommitment::seal(PositionSnapshot::new(1_000, 1_000, 0));
        let policy_id = engine
            .create_policy("0xlp", PoolId::new("eth-usdc"), params, entry)
            .unwrap();
        let exit = || PositionCommitment::seal(PositionSnapshot::new(500, 1_200, 0));

        let submission = engine
            .submit_claim(policy_id, exit(), "0xlp", price())
            .await
            .unwrap();
        assert_eq!(submission.status, ClaimStatus::Rejected);
        assert!(matches!(submission.rejection, Some(RejectionReason::Other(_))));
        assert!(submission.task_id.is_none());
        assert_eq!(
            engine.store().get_claim(&submission.claim_id).unwrap().status,
            ClaimStatus::Rejected
        );

        // The policy is free for a retry
        let retry = engine
            .submit_claim(policy_id, exit(), "0xlp", price())
            .await
            .unwrap();
        assert_eq!(retry.status, ClaimStatus::Requested);
        assert!(retry.task_id.is_some());
    }
}
