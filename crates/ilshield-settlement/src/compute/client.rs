//! Confidential Compute Client
//!
//! Sends a [`ComputeRequest`] to a worker and accepts the answer only if it is for the
//! right claim and carries a valid signature from a trusted worker key. Each attempt is
//! bounded by a timeout; transport failures and timeouts are retried with exponential
//! backoff, integrity failures are not.

use crate::config::ComputeSettings;
use async_trait::async_trait;
use dashmap::DashMap;
use ilshield_common::{
    error::ComputeError, ClaimId, ComputeRequest, ComputeResponse, PayoutTerms,
    PositionCommitment, PriceReference, WorkerId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Transport to a confidential compute worker
#[async_trait]
pub trait ComputeWorker: Send + Sync {
    /// Run the payout computation for `request`
    async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResponse, ComputeError>;
}

/// Client that drives a worker and validates its answers
pub struct ComputeClient {
    worker: Arc<dyn ComputeWorker>,
    /// Trusted worker keys by id
    trusted: DashMap<WorkerId, [u8; 32]>,
    settings: ComputeSettings,
}

impl ComputeClient {
    pub fn new(worker: Arc<dyn ComputeWorker>, settings: ComputeSettings) -> Self {
        let client = Self {
            worker,
            trusted: DashMap::new(),
            settings,
        };

        for did in &client.settings.trusted_workers {
            let id = WorkerId(did.clone());
            match id.public_key() {
                Ok(key) => {
                    client.trusted.insert(id, key);
                }
                Err(e) => warn!(worker_id = %did, error = %e, "Ignoring malformed trusted worker id"),
            }
        }
        client
    }

    /// Accept signatures from the worker holding `public_key`
    pub fn trust_worker(&self, public_key: [u8; 32]) -> WorkerId {
        let id = WorkerId::from_public_key(&public_key);
        self.trusted.insert(id.clone(), public_key);
        info!(worker_id = %id, "Compute worker trusted");
        id
    }

    pub fn is_trusted(&self, worker_id: &WorkerId) -> bool {
        self.trusted.contains_key(worker_id)
    }

    /// Request and validate a payout computation
    #[instrument(skip(self, entry_commitment, exit_commitment, public_price_ref, terms))]
    pub async fn request_computation(
        &self,
        claim_id: ClaimId,
        entry_commitment: PositionCommitment,
        exit_commitment: PositionCommitment,
        public_price_ref: PriceReference,
        terms: PayoutTerms,
    ) -> Result<ComputeResponse, ComputeError> {
        let request = ComputeRequest {
            claim_id,
            entry_commitment,
            exit_commitment,
            public_price_ref,
            terms,
        };

        let attempts = self.settings.max_retries.saturating_add(1);
        let timeout = Duration::from_millis(self.settings.timeout_ms);

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, self.worker.compute(&request)).await {
                Ok(Ok(response)) => return self.validate(&request, response),
                Ok(Err(ComputeError::Transport(e))) => {
                    warn!(attempt, error = %e, "Compute transport failure");
                }
                Ok(Err(ComputeError::ComputeTimeout { .. })) => {
                    warn!(attempt, "Compute worker reported timeout");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(attempt, timeout_ms = self.settings.timeout_ms, "Compute attempt timed out");
                }
            }

            if attempt < attempts {
                let backoff = self
                    .settings
                    .backoff_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(ComputeError::ComputeTimeout { attempts })
    }

    fn validate(
        &self,
        request: &ComputeRequest,
        response: ComputeResponse,
    ) -> Result<ComputeResponse, ComputeError> {
        if response.claim_id != request.claim_id {
            return Err(ComputeError::ClaimMismatch {
                expected: request.claim_id,
                actual: response.claim_id,
            });
        }

        let key = self
            .trusted
            .get(&response.worker_id)
            .map(|k| *k)
            .ok_or_else(|| ComputeError::UnknownWorker(response.worker_id.clone()))?;

        response
            .verify(&key)
            .map_err(|_| ComputeError::InvalidWorkerSignature {
                worker_id: response.worker_id.clone(),
            })?;

        debug!(worker_id = %response.worker_id, payout = %response.payout, "Compute response verified");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::LocalComputeWorker;
    use ilshield_common::{crypto::SigningIdentity, PositionSnapshot, PRICE_SCALE};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> ComputeSettings {
        ComputeSettings {
            timeout_ms: 100,
            max_retries: 2,
            backoff_ms: 10,
            trusted_workers: Vec::new(),
        }
    }

    fn price() -> PriceReference {
        PriceReference {
            pair: "X/Y".into(),
            price: PRICE_SCALE,
            observed_at: 0,
            source: "test".into(),
        }
    }

    fn terms() -> PayoutTerms {
        PayoutTerms {
            deductible_bps: 1000,
            cap_bps: 5000,
        }
    }

    async fn run(client: &ComputeClient) -> Result<ComputeResponse, ComputeError> {
        client
            .request_computation(
                ClaimId::new(),
                PositionCommitment::seal(PositionSnapshot::new(1_000, 1_000, 0)),
                PositionCommitment::seal(PositionSnapshot::new(500, 1_200, 0)),
                price(),
                terms(),
            )
            .await
    }

    /// Worker that never answers
    struct StalledWorker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ComputeWorker for StalledWorker {
        async fn compute(&self, _: &ComputeRequest) -> Result<ComputeResponse, ComputeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    /// Worker answering with a payout it did not sign
    struct TamperingWorker(LocalComputeWorker);

    #[async_trait]
    impl ComputeWorker for TamperingWorker {
        async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResponse, ComputeError> {
            let mut response = self.0.compute(request).await?;
            response.payout *= 10;
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_trusted_worker_accepted() {
        let identity = SigningIdentity::generate();
        let client = ComputeClient::new(
            Arc::new(LocalComputeWorker::new(identity.clone())),
            settings(),
        );
        client.trust_worker(identity.public_key());

        let response = run(&client).await.unwrap();
        assert_eq!(response.payout, 270);
    }

    #[tokio::test]
    async fn test_untrusted_worker_rejected() {
        let client = ComputeClient::new(
            Arc::new(LocalComputeWorker::new(SigningIdentity::generate())),
            settings(),
        );
        assert!(matches!(run(&client).await, Err(ComputeError::UnknownWorker(_))));
    }

    #[tokio::test]
    async fn test_tampered_payout_rejected_without_retry() {
        let identity = SigningIdentity::generate();
        let client = ComputeClient::new(
            Arc::new(TamperingWorker(LocalComputeWorker::new(identity.clone()))),
            settings(),
        );
        client.trust_worker(identity.public_key());

        assert!(matches!(
            run(&client).await,
            Err(ComputeError::InvalidWorkerSignature { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhausts_retries() {
        let worker = Arc::new(StalledWorker {
            calls: AtomicU32::new(0),
        });
        let client = ComputeClient::new(worker.clone(), settings());

        assert_eq!(
            run(&client).await,
            Err(ComputeError::ComputeTimeout { attempts: 3 })
        );
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_trusted_workers_from_settings() {
        let identity = SigningIdentity::generate();
        let mut settings = settings();
        settings.trusted_workers = vec![identity.did().to_string(), "did:web:bogus".into()];

        let client = ComputeClient::new(
            Arc::new(LocalComputeWorker::new(identity.clone())),
            settings,
        );
        assert!(client.is_trusted(&WorkerId(identity.did().to_string())));
        assert!(!client.is_trusted(&WorkerId("did:web:bogus".into())));
    }
}
