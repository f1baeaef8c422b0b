//! In-process compute worker

use super::client::ComputeWorker;
use async_trait::async_trait;
use ilshield_common::{
    crypto::SigningIdentity, error::ComputeError, ComputeRequest, ComputeResponse, WorkerId,
};

/// Worker that evaluates and signs requests in the current process
#[derive(Debug, Clone)]
pub struct LocalComputeWorker {
    identity: SigningIdentity,
}

impl LocalComputeWorker {
    pub fn new(identity: SigningIdentity) -> Self {
        Self { identity }
    }

    pub fn worker_id(&self) -> WorkerId {
        WorkerId(self.identity.did().to_string())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }
}

#[async_trait]
impl ComputeWorker for LocalComputeWorker {
    async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResponse, ComputeError> {
        request.answer(&self.identity)
    }
}
