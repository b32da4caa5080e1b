//! quorumvault-server - http surface of the secret store
//!
//! routes:
//!   GET    /health                    liveness, always
//!   GET    /status                    seal and recovery state, always
//!   PUT    /v1/secrets/{*path}        write   { "value": base64 }
//!   GET    /v1/secrets/{*path}        read
//!   DELETE /v1/secrets/{*path}        delete (write permission)
//!   GET    /v1/metadata/{*path}       record metadata (read permission)
//!   GET    /v1/list[/{*prefix}]       list paths under prefix
//!   POST   /v1/sys/unseal             start recovery       super on sys/unseal
//!   POST   /v1/sys/seal               drop the root key    super on sys/seal
//!   GET    /v1/sys/policies           list policies        super on sys/policies
//!   PUT    /v1/sys/policies/{name}    add a policy, `?replace=true` to overwrite
//!                                                        super on sys/policies/<name>
//!   DELETE /v1/sys/policies/{name}    remove a policy      super on sys/policies/<name>
//!
//! every route but /health and /status needs a verified caller identity,
//! forwarded by the mtls-terminating proxy in the one header the
//! configured `IdentityExtractor` trusts.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use metrics::{counter, gauge, histogram};
use quorumvault::api::{
    decode_value, encode_value, ListResponse, PolicyBody, PolicyListResponse, PolicyWriteQuery,
    PutSecretRequest, SecretResponse, StatusResponse, WriteResponse,
};
use quorumvault::identity::IdentityExtractor;
use quorumvault::policy::{Action, Policy, PolicyDocument};
use quorumvault::recovery::RecoveryCoordinator;
use quorumvault::store::{RecordMetadata, RootKey, SecretStore};
use quorumvault::{vss, Error, Identity, Share};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// app state shared across handlers
pub struct AppState {
    pub store: Arc<SecretStore>,
    pub coordinator: Arc<RecoveryCoordinator>,
    pub holders: usize,
    /// where the mtls proxy puts the verified peer identity
    pub identity: IdentityExtractor,
    pub request_timeout: Duration,
    /// held while a recovery runs
    recovery: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        store: Arc<SecretStore>,
        coordinator: Arc<RecoveryCoordinator>,
        holders: usize,
        identity: IdentityExtractor,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            holders,
            identity,
            request_timeout,
            recovery: Arc::new(Mutex::new(())),
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            version: env!("CARGO_PKG_VERSION").into(),
            sealed: self.store.is_sealed(),
            key_id: self.store.key_id(),
            recovery: self.coordinator.state(),
            threshold: self.coordinator.threshold(),
            holders: self.holders,
        }
    }
}

/// kick off recovery in the background
///
/// returns false when the store is already unsealed or a recovery is
/// already running
pub fn start_recovery(state: &Arc<AppState>) -> bool {
    if !state.store.is_sealed() {
        return false;
    }
    let Ok(guard) = state.recovery.clone().try_lock_owned() else {
        return false;
    };

    let state = state.clone();
    tokio::spawn(async move {
        let _guard = guard;
        counter!("store_recoveries_total").increment(1);
        match state.coordinator.recover_into(&state.store).await {
            Ok(()) => gauge!("store_sealed").set(0.0),
            Err(e) => {
                counter!("store_recovery_failures_total").increment(1);
                warn!("recovery did not unseal the store: {}", e);
            }
        }
    });
    true
}

/// apply policy documents from disk
///
/// a document identical to the stored policy of that name is skipped, so
/// restarts are idempotent. a differing same-named policy is a
/// `DuplicateName` error unless `replace` is set. returns the number of
/// policies written.
pub fn apply_policy_files(
    store: &SecretStore,
    files: &[PathBuf],
    replace: bool,
) -> quorumvault::Result<usize> {
    let mut applied = 0;
    for file in files {
        let policy: Policy = PolicyDocument::load(file)?.try_into()?;
        if store.policies().snapshot().get(policy.name()) == Some(&policy) {
            debug!(file = %file.display(), "policy file unchanged");
            continue;
        }
        store.upsert_policy(policy, replace)?;
        info!(file = %file.display(), "policy file applied");
        applied += 1;
    }
    Ok(applied)
}

/// split a fresh root key into per-holder share files
///
/// writes `<out>/holder-<i>/share-<epoch>.json` for every holder and returns
/// the key id with the written paths. the key itself is never written.
pub fn key_ceremony(
    threshold: usize,
    total: usize,
    out: &FsPath,
    epoch: u64,
) -> quorumvault::Result<(String, Vec<PathBuf>)> {
    let key = RootKey::generate();
    let shares = vss::split(key.as_bytes(), threshold, total)?;

    // refuse before writing anything
    for share in &shares {
        let target = Share::file_path(&holder_dir(out, share.index), epoch);
        if target.exists() {
            return Err(Error::InvalidParameters(format!(
                "{} already exists",
                target.display()
            )));
        }
    }

    let check = vss::combine(&shares[total - threshold..], threshold)?;
    if RootKey::from_slice(&check)? != key {
        return Err(Error::Crypto("ceremony split does not reconstruct".into()));
    }

    let mut written = Vec::with_capacity(shares.len());
    for share in &shares {
        let dir = holder_dir(out, share.index);
        std::fs::create_dir_all(&dir)?;
        written.push(share.save(&dir, epoch)?);
    }
    Ok((key.id(), written))
}

fn holder_dir(out: &FsPath, index: u8) -> PathBuf {
    out.join(format!("holder-{}", index))
}

// === errors and extractors ===

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
        if status.is_server_error() && !matches!(self.0, Error::Sealed | Error::Timeout) {
            error!("request failed: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

/// verified identity of the caller
pub struct Caller(pub Identity);

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = state
            .identity
            .extract(|name| parts.headers.get(name).and_then(|v| v.to_str().ok()))?;
        Ok(Caller(identity))
    }
}

/// count and time a request, tagging failures by kind
fn observe<T>(endpoint: &'static str, start: Instant, result: Result<T, Error>) -> Result<T, ApiError> {
    counter!("store_requests_total", "endpoint" => endpoint).increment(1);
    histogram!("store_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
    result.map_err(|e| {
        counter!("store_errors_total", "endpoint" => endpoint, "error" => e.kind()).increment(1);
        ApiError(e)
    })
}

// === handlers ===

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn put_secret(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(path): Path<String>,
    Json(req): Json<PutSecretRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    let start = Instant::now();
    let result = decode_value(&req.value).and_then(|value| {
        let value = zeroize::Zeroizing::new(value);
        state.store.put_until(&caller, &path, &value, Some(state.deadline()))
    });
    let metadata = observe("put_secret", start, result)?;
    Ok(Json(WriteResponse { path, metadata }))
}

async fn get_secret(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(path): Path<String>,
) -> Result<Json<SecretResponse>, ApiError> {
    let start = Instant::now();
    let result = state
        .store
        .get_until(&caller, &path, Some(state.deadline()))
        .and_then(|value| {
            let metadata = state.store.metadata(&caller, &path)?;
            Ok((encode_value(&value), metadata))
        });
    let (value, metadata) = observe("get_secret", start, result)?;
    Ok(Json(SecretResponse {
        path,
        value,
        metadata,
    }))
}

async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let start = Instant::now();
    let result = state.store.delete_until(&caller, &path, Some(state.deadline()));
    observe("delete_secret", start, result)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn secret_metadata(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(path): Path<String>,
) -> Result<Json<RecordMetadata>, ApiError> {
    let start = Instant::now();
    let result = state.store.metadata(&caller, &path);
    Ok(Json(observe("secret_metadata", start, result)?))
}

async fn list_prefix(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(prefix): Path<String>,
) -> Result<Json<ListResponse>, ApiError> {
    list(state, caller, prefix)
}

async fn list_root(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<ListResponse>, ApiError> {
    list(state, caller, String::new())
}

fn list(
    state: Arc<AppState>,
    Caller(caller): Caller,
    prefix: String,
) -> Result<Json<ListResponse>, ApiError> {
    let start = Instant::now();
    let result = state.store.list_until(&caller, &prefix, Some(state.deadline()));
    let paths = observe("list", start, result)?;
    Ok(Json(ListResponse { prefix, paths }))
}

async fn unseal(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let start = Instant::now();
    let result = state.store.authorize(&caller, "sys/unseal", Action::Super);
    observe("unseal", start, result)?;

    if start_recovery(&state) {
        info!(%caller, "recovery requested");
        Ok((StatusCode::ACCEPTED, Json(state.status())))
    } else {
        Ok((StatusCode::OK, Json(state.status())))
    }
}

async fn seal(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<StatusResponse>, ApiError> {
    let start = Instant::now();
    let result = state.store.authorize(&caller, "sys/seal", Action::Super);
    observe("seal", start, result)?;

    state.store.seal();
    gauge!("store_sealed").set(1.0);
    warn!(%caller, "store sealed by operator");
    Ok(Json(state.status()))
}

async fn list_policies(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<PolicyListResponse>, ApiError> {
    let start = Instant::now();
    let result = state
        .store
        .authorize(&caller, "sys/policies", Action::Super)
        .map(|_| state.store.policies().list());
    let policies = observe("list_policies", start, result)?;
    Ok(Json(PolicyListResponse {
        policies: policies.into_iter().map(PolicyDocument::from).collect(),
    }))
}

async fn put_policy(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
    Query(query): Query<PolicyWriteQuery>,
    Json(body): Json<PolicyBody>,
) -> Result<Json<PolicyDocument>, ApiError> {
    let start = Instant::now();
    let result = state
        .store
        .authorize(&caller, &format!("sys/policies/{}", name), Action::Super)
        .and_then(|_| body.into_policy(&name))
        .and_then(|policy| {
            let doc = PolicyDocument::from(policy.clone());
            state.store.upsert_policy(policy, query.replace)?;
            Ok(doc)
        });
    let doc = observe("put_policy", start, result)?;
    info!(%caller, policy = %name, replace = query.replace, "policy applied");
    Ok(Json(doc))
}

async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let start = Instant::now();
    let result = state
        .store
        .authorize(&caller, &format!("sys/policies/{}", name), Action::Super)
        .and_then(|_| state.store.remove_policy(&name));
    observe("delete_policy", start, result)?;
    info!(%caller, policy = %name, "policy removed");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route(
            "/v1/secrets/{*path}",
            put(put_secret).get(get_secret).delete(delete_secret),
        )
        .route("/v1/metadata/{*path}", get(secret_metadata))
        .route("/v1/list", get(list_root))
        .route("/v1/list/{*prefix}", get(list_prefix))
        .route("/v1/sys/unseal", post(unseal))
        .route("/v1/sys/seal", post(seal))
        .route("/v1/sys/policies", get(list_policies))
        .route("/v1/sys/policies/{name}", put(put_policy).delete(delete_policy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
