//! Worker HTTP API
//!
//! - `POST /v1/compute`: evaluate a [`ComputeRequest`] and return the signed response
//! - `GET /v1/identity`: worker id and verifying key
//! - `GET /health`

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use ilshield_common::{crypto::SigningIdentity, ComputeRequest, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    identity: Arc<SigningIdentity>,
}

impl AppState {
    pub fn new(identity: SigningIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        WorkerId(self.identity.did().to_string())
    }
}

/// Body of `GET /v1/identity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub worker_id: WorkerId,
    /// Hex-encoded Ed25519 verifying key
    pub public_key: String,
}

/// Build the worker router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/identity", get(identity))
        .route("/v1/compute", post(compute))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn identity(State(state): State<AppState>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        worker_id: state.worker_id(),
        public_key: hex::encode(state.identity.public_key()),
    })
}

async fn compute(State(state): State<AppState>, Json(request): Json<ComputeRequest>) -> Response {
    match request.answer(&state.identity) {
        Ok(response) => {
            info!(claim_id = %request.claim_id, payout = %response.payout, "Computed payout");
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            warn!(claim_id = %request.claim_id, error = %e, "Compute request refused");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use ilshield_common::{
        ClaimId, ComputeResponse, PayoutTerms, PositionCommitment, PositionSnapshot,
        PriceReference, PRICE_SCALE,
    };
    use tower::ServiceExt;

    fn request() -> ComputeRequest {
        ComputeRequest {
            claim_id: ClaimId::new(),
            entry_commitment: PositionCommitment::seal(PositionSnapshot::new(1_000, 1_000, 0)),
            exit_commitment: PositionCommitment::seal(PositionSnapshot::new(500, 1_200, 0)),
            public_price_ref: PriceReference {
                pair: "ETH/USDC".into(),
                price: PRICE_SCALE,
                observed_at: 0,
                source: "test".into(),
            },
            terms: PayoutTerms {
                deductible_bps: 1000,
                cap_bps: 5000,
            },
        }
    }

    fn post_json(body: &ComputeRequest) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/compute")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_compute_returns_signed_payout() {
        let identity = SigningIdentity::generate();
        let public_key = identity.public_key();
        let app = router(AppState::new(identity));
        let req = request();

        let response = app.oneshot(post_json(&req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let answer: ComputeResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(answer.claim_id, req.claim_id);
        assert_eq!(answer.payout, 270);
        assert!(answer.verify(&public_key).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_commitment_is_unprocessable() {
        let app = router(AppState::new(SigningIdentity::generate()));
        let mut req = request();
        req.exit_commitment.snapshot.amount_x = 1;

        let response = app.oneshot(post_json(&req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_identity_and_health() {
        let identity = SigningIdentity::generate();
        let did = identity.did().to_string();
        let key_hex = hex::encode(identity.public_key());
        let app = router(AppState::new(identity));

        let response = app
            .clone()
            .oneshot(Request::get("/v1/identity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: IdentityResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.worker_id.0, did);
        assert_eq!(body.public_key, key_hex);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
