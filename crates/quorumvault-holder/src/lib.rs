//! quorumvault-holder - http surface of a share holder
//!
//! routes:
//!   GET  /        node info (version, epoch, pubkey)
//!   GET  /health  liveness
//!   POST /share   release the share to the store, `?epoch=` or json body

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::{counter, histogram};
use quorumvault::holder::{NodeInfo, ShareHolder, ShareRequest, SignedShare};
use quorumvault::identity::IdentityExtractor;
use quorumvault::{Error, Identity};
use tower_http::trace::TraceLayer;
use tracing::error;

/// app state shared across handlers
pub struct AppState {
    pub holder: ShareHolder,
    /// where the mtls proxy puts the verified peer identity
    pub identity: IdentityExtractor,
}

/// library error rendered as `{error, message}` json
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

fn caller(headers: &HeaderMap, identity: &IdentityExtractor) -> Result<Identity, Error> {
    identity.extract(|name| headers.get(name).and_then(|v| v.to_str().ok()))
}

// === handlers ===

async fn node_info(State(state): State<Arc<AppState>>) -> Json<NodeInfo> {
    Json(state.holder.info())
}

async fn health() -> &'static str {
    "ok"
}

async fn share(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ShareRequest>,
    body: Bytes,
) -> Result<Json<SignedShare>, ApiError> {
    let start = Instant::now();
    counter!("holder_requests_total", "endpoint" => "share").increment(1);

    let result = (|| {
        let caller = caller(&headers, &state.identity)?;
        let epoch = match query.epoch {
            Some(epoch) => Some(epoch),
            None if body.is_empty() => None,
            None => serde_json::from_slice::<ShareRequest>(&body)
                .map_err(|e| Error::InvalidParameters(format!("bad share request: {}", e)))?
                .epoch,
        };
        state.holder.get_share(&caller, epoch)
    })();

    histogram!("holder_request_duration_seconds", "endpoint" => "share")
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(signed) => {
            counter!("holder_shares_released_total").increment(1);
            Ok(Json(signed))
        }
        Err(e) => {
            counter!("holder_errors_total", "endpoint" => "share", "error" => e.kind()).increment(1);
            Err(e.into())
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(node_info))
        .route("/health", get(health))
        .route("/share", post(share))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
