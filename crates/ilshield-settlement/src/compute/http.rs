//! HTTP transport to a remote compute worker
//!
//! Speaks the worker's JSON API: `POST {endpoint}/v1/compute`. A `422` response means the
//! worker refused the inputs and is not retried; every other failure is a transport error.

use super::client::ComputeWorker;
use async_trait::async_trait;
use ilshield_common::{error::ComputeError, ComputeRequest, ComputeResponse};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Error body returned by the worker
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Compute worker reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpComputeWorker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpComputeWorker {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ComputeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ComputeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ComputeWorker for HttpComputeWorker {
    async fn compute(&self, request: &ComputeRequest) -> Result<ComputeResponse, ComputeError> {
        let url = format!("{}/v1/compute", self.endpoint);
        debug!(url = %url, claim_id = %request.claim_id, "Sending compute request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ComputeError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|e| e.to_string());
            return Err(ComputeError::Computation(message));
        }
        if !status.is_success() {
            return Err(ComputeError::Transport(format!(
                "worker returned HTTP {}",
                status
            )));
        }

        response
            .json::<ComputeResponse>()
            .await
            .map_err(|e| ComputeError::Transport(e.to_string()))
    }
}
