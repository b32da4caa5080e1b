use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use quorumvault::api::{
    decode_value, encode_value, ListResponse, PolicyListResponse, SecretResponse, StatusResponse,
};
use quorumvault::error::ErrorBody;
use quorumvault::identity::{IdentityExtractor, DEFAULT_IDENTITY_HEADER, XFCC_HEADER};
use quorumvault::policy::{Action, Policy};
use quorumvault::recovery::{RecoveryCoordinator, RecoveryPolicy, RecoveryState, ShareSource};
use quorumvault::store::{RootKey, SecretStore};
use quorumvault::{vss, Share};
use quorumvault_server::{apply_policy_files, key_ceremony, router, AppState};
use tower::ServiceExt;

const ADMIN: &str = "spiffe://example.org/ops/admin";
const WEB: &str = "spiffe://example.org/web-service/api";

/// share kept in memory
struct Fixed(String, Share);

#[async_trait]
impl ShareSource for Fixed {
    fn id(&self) -> &str {
        &self.0
    }

    async fn fetch_share(&self) -> quorumvault::Result<Share> {
        Ok(self.1.clone())
    }
}

/// share read from a holder directory written by the ceremony
struct OnDisk(String, PathBuf, u64);

#[async_trait]
impl ShareSource for OnDisk {
    fn id(&self) -> &str {
        &self.0
    }

    async fn fetch_share(&self) -> quorumvault::Result<Share> {
        Share::load(&self.1, self.2)
    }
}

fn policy() -> RecoveryPolicy {
    RecoveryPolicy {
        holder_timeout: Duration::from_millis(500),
        deadline: Duration::from_secs(5),
        max_attempts: 2,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(2),
    }
}

fn setup_with(sources: Vec<Arc<dyn ShareSource>>, threshold: usize) -> (Router, Arc<AppState>) {
    let store = Arc::new(SecretStore::in_memory());
    store
        .upsert_policy(Policy::new("admin", ADMIN, "**", &[Action::Super]).unwrap(), false)
        .unwrap();
    store
        .upsert_policy(
            Policy::new(
                "web",
                "spiffe://example.org/web-service/*",
                "secrets/web-service/*",
                &[Action::Read, Action::Write],
            )
            .unwrap(),
            false,
        )
        .unwrap();

    let holders = sources.len();
    let coordinator = Arc::new(RecoveryCoordinator::new(sources, threshold, policy()).unwrap());
    let state = Arc::new(AppState::new(
        store,
        coordinator,
        holders,
        IdentityExtractor::default(),
        Duration::from_secs(5),
    ));
    (router(state.clone()), state)
}

fn setup() -> (Router, Arc<AppState>) {
    let key = RootKey::generate();
    let shares = vss::split(key.as_bytes(), 2, 3).unwrap();
    let sources = shares
        .into_iter()
        .enumerate()
        .map(|(i, s)| Arc::new(Fixed(format!("h{}", i + 1), s)) as Arc<dyn ShareSource>)
        .collect();
    setup_with(sources, 2)
}

fn request(method: &str, uri: &str, identity: Option<&str>, body: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = identity {
        builder = builder.header(DEFAULT_IDENTITY_HEADER, id);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn unseal(app: &Router, state: &AppState) {
    // a previous recovery task may still be winding down
    for _ in 0..100 {
        let resp = app
            .clone()
            .oneshot(request("POST", "/v1/sys/unseal", Some(ADMIN), None))
            .await
            .unwrap();
        if resp.status() == StatusCode::ACCEPTED {
            break;
        }
        assert_eq!(resp.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::timeout(Duration::from_secs(5), state.store.wait_unsealed())
        .await
        .unwrap();
}

fn put_body(value: &[u8]) -> Option<String> {
    Some(format!(r#"{{"value":"{}"}}"#, encode_value(value)))
}

#[tokio::test]
async fn test_sealed_until_recovered() {
    let (app, state) = setup();

    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/secrets/secrets/web-service/db", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let err: ErrorBody = json(resp).await;
    assert_eq!(err.error, "sealed");

    let status: StatusResponse = json(
        app.clone()
            .oneshot(request("GET", "/status", None, None))
            .await
            .unwrap(),
    )
    .await;
    assert!(status.sealed);
    assert_eq!(status.recovery, RecoveryState::Uninitialized);

    unseal(&app, &state).await;

    let status: StatusResponse = json(
        app.oneshot(request("GET", "/status", None, None))
            .await
            .unwrap(),
    )
    .await;
    assert!(!status.sealed);
    assert!(status.key_id.is_some());
    assert_eq!(status.threshold, 2);
    assert_eq!(status.holders, 3);
}

#[tokio::test]
async fn test_web_service_scenario() {
    let (app, state) = setup();
    unseal(&app, &state).await;

    let resp = app
        .clone()
        .oneshot(request(
            "PUT",
            "/v1/secrets/secrets/web-service/db-password",
            Some(WEB),
            put_body(b"hunter2"),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/secrets/secrets/web-service/db-password", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let secret: SecretResponse = json(resp).await;
    assert_eq!(decode_value(&secret.value).unwrap(), b"hunter2");
    assert_eq!(secret.metadata.author, WEB);

    // read/write does not include list
    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/list/secrets/web-service/", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // outside the granted subtree
    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/secrets/secrets/billing/key", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // admin holds super, which implies list
    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/list/secrets/", Some(ADMIN), None))
        .await
        .unwrap();
    let listed: ListResponse = json(resp).await;
    assert_eq!(listed.paths, vec!["secrets/web-service/db-password".to_string()]);

    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/list", Some(ADMIN), None))
        .await
        .unwrap();
    let listed: ListResponse = json(resp).await;
    assert_eq!(listed.paths.len(), 1);

    let resp = app
        .clone()
        .oneshot(request("DELETE", "/v1/secrets/secrets/web-service/db-password", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(request("GET", "/v1/secrets/secrets/web-service/db-password", Some(WEB), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_requests_without_identity_rejected() {
    let (app, state) = setup();
    unseal(&app, &state).await;

    let resp = app
        .oneshot(request("GET", "/v1/secrets/secrets/web-service/db", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_identity_header_beside_client_cert_rejected() {
    let (app, state) = setup();
    unseal(&app, &state).await;

    let req = Request::builder()
        .method("GET")
        .uri("/v1/list/secrets/")
        .header(XFCC_HEADER, format!("URI={}", WEB))
        .header(DEFAULT_IDENTITY_HEADER, ADMIN)
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bad_base64_is_bad_request() {
    let (app, state) = setup();
    unseal(&app, &state).await;

    let resp = app
        .oneshot(request(
            "PUT",
            "/v1/secrets/secrets/web-service/x",
            Some(WEB),
            Some(r#"{"value":"***"}"#.into()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_super() {
    let (app, _) = setup();

    for (method, uri) in [
        ("POST", "/v1/sys/unseal"),
        ("POST", "/v1/sys/seal"),
        ("GET", "/v1/sys/policies"),
        ("DELETE", "/v1/sys/policies/web"),
    ] {
        let resp = app
            .clone()
            .oneshot(request(method, uri, Some(WEB), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_policy_management_while_sealed() {
    let (app, state) = setup();

    let body = r#"{"identity":"spiffe://example.org/auditor","path":"secrets/*","permissions":["list"]}"#;
    let resp = app
        .clone()
        .oneshot(request("PUT", "/v1/sys/policies/auditor", Some(ADMIN), Some(body.into())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/sys/policies", Some(ADMIN), None))
        .await
        .unwrap();
    let listed: PolicyListResponse = json(resp).await;
    let names: Vec<&str> = listed.policies.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["admin", "auditor", "web"]);

    // malformed pattern
    let bad = r#"{"identity":"spiffe://**/x","path":"secrets/*","permissions":["read"]}"#;
    let resp = app
        .clone()
        .oneshot(request("PUT", "/v1/sys/policies/bad", Some(ADMIN), Some(bad.into())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .clone()
        .oneshot(request("DELETE", "/v1/sys/policies/auditor", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(request("DELETE", "/v1/sys/policies/auditor", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(state.store.is_sealed());
}

#[tokio::test]
async fn test_policy_name_collision_needs_replace() {
    let (app, state) = setup();
    let body = r#"{"identity":"spiffe://example.org/web-service/*","path":"secrets/web-service/*","permissions":["read"]}"#;

    let resp = app
        .clone()
        .oneshot(request("PUT", "/v1/sys/policies/web", Some(ADMIN), Some(body.into())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let err: ErrorBody = json(resp).await;
    assert_eq!(err.error, "duplicate_name");
    let web = state.store.policies().snapshot();
    assert!(web.get("web").unwrap().permissions().grants(Action::Write));

    let resp = app
        .clone()
        .oneshot(request("PUT", "/v1/sys/policies/web?replace=false", Some(ADMIN), Some(body.into())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app
        .oneshot(request("PUT", "/v1/sys/policies/web?replace=true", Some(ADMIN), Some(body.into())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let web = state.store.policies().snapshot();
    assert!(!web.get("web").unwrap().permissions().grants(Action::Write));
}

#[tokio::test]
async fn test_policy_files_reapply_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("auditor.toml");
    let write = |perms: &str| {
        std::fs::write(
            &file,
            format!(
                "name = \"auditor\"\nidentity = \"spiffe://example.org/auditor\"\npath = \"secrets/**\"\npermissions = [{}]\n",
                perms
            ),
        )
        .unwrap()
    };
    let store = SecretStore::in_memory();
    let files = vec![file.clone()];

    write(r#""list""#);
    assert_eq!(apply_policy_files(&store, &files, false).unwrap(), 1);
    // a restart with the same file changes nothing
    assert_eq!(apply_policy_files(&store, &files, false).unwrap(), 0);

    write(r#""list", "read""#);
    assert!(matches!(
        apply_policy_files(&store, &files, false),
        Err(quorumvault::Error::DuplicateName(name)) if name == "auditor"
    ));
    assert_eq!(apply_policy_files(&store, &files, true).unwrap(), 1);
    let set = store.policies().snapshot();
    assert!(set.get("auditor").unwrap().permissions().grants(Action::Read));
}

#[tokio::test]
async fn test_seal_then_unseal_again() {
    let (app, state) = setup();
    unseal(&app, &state).await;
    let first = state.store.key_id();

    let resp = app
        .clone()
        .oneshot(request("POST", "/v1/sys/seal", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(state.store.is_sealed());

    unseal(&app, &state).await;
    assert_eq!(state.store.key_id(), first);
}

#[tokio::test]
async fn test_failed_recovery_stays_sealed() {
    let key = RootKey::generate();
    let shares = vss::split(key.as_bytes(), 3, 3).unwrap();
    // only two of three holders answer
    let sources: Vec<Arc<dyn ShareSource>> = shares
        .into_iter()
        .take(2)
        .enumerate()
        .map(|(i, s)| Arc::new(Fixed(format!("h{}", i + 1), s)) as Arc<dyn ShareSource>)
        .collect();
    let (app, state) = setup_with(sources, 2);

    // the split needs 3, the coordinator was told 2: every share is rejected
    let resp = app
        .clone()
        .oneshot(request("POST", "/v1/sys/unseal", Some(ADMIN), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let mut rx = state.coordinator.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(state.coordinator.state(), RecoveryState::Failed { .. }));
    assert!(state.store.is_sealed());
}

#[tokio::test]
async fn test_ceremony_output_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let (key_id, written) = key_ceremony(3, 5, dir.path(), 7).unwrap();
    assert_eq!(written.len(), 5);
    assert!(written.iter().all(|p| p.ends_with("share-7.json")));

    // running it again would clobber live shares
    assert!(key_ceremony(3, 5, dir.path(), 7).is_err());

    let sources: Vec<Arc<dyn ShareSource>> = [2u8, 4, 5]
        .iter()
        .map(|i| {
            Arc::new(OnDisk(format!("h{}", i), dir.path().join(format!("holder-{}", i)), 7))
                as Arc<dyn ShareSource>
        })
        .collect();
    let (app, state) = setup_with(sources, 3);
    unseal(&app, &state).await;
    assert_eq!(state.store.key_id(), Some(key_id));

    // nothing but share files in the output
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        assert!(entry.file_type().unwrap().is_dir());
    }
}
