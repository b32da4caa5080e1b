//! encrypted secret store
//!
//! owns the root key once recovered and every secret record. each operation
//! checks the seal first, then asks the policy engine, then touches
//! ciphertext. the root key lives behind a single lock that is written once
//! on unseal; a watch channel tells waiters when it becomes available.

pub mod backend;

use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, ct_eq, KEY_LEN, NONCE_LEN};
use crate::identity::Identity;
use crate::policy::{AccessDecision, Action, Policy, PolicyEngine};
use crate::share::hex_bytes;
use crate::{Error, Result};

pub use backend::{Backend, MemoryBackend, Tree};

#[cfg(feature = "sled")]
pub use backend::SledBackend;

const KEY_VERIFIER: &str = "key_verifier";

/// symmetric key protecting every record, zeroized on drop
#[derive(Clone)]
pub struct RootKey(Zeroizing<[u8; KEY_LEN]>);

impl RootKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn generate() -> Self {
        Self::new(crypto::random_bytes())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidParameters(format!(
                "root key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn id(&self) -> String {
        crypto::key_id(&self.0)
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootKey({})", self.id())
    }
}

impl PartialEq for RootKey {
    fn eq(&self, other: &Self) -> bool {
        ct_eq(self.0.as_slice(), other.0.as_slice())
    }
}

impl Eq for RootKey {}

/// metadata stored in the clear next to each ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub created_at: u64,
    pub updated_at: u64,
    /// identity of the last writer
    pub author: String,
    /// id of the root key that sealed this record
    pub key_id: String,
}

/// persisted form of a secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub path: String,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    pub metadata: RecordMetadata,
}

impl SecretRecord {
    fn decode(path: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            error!(path, "undecodable record: {}", e);
            Error::IntegrityFailure(path.to_string())
        })
    }
}

/// plaintext secret, zeroized on drop
pub type SecretValue = Zeroizing<Vec<u8>>;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// reject empty paths, empty segments and absolute paths
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidParameters("empty secret path".into()));
    }
    if path.starts_with('/') || path.ends_with('/') || path.split('/').any(|s| s.is_empty()) {
        return Err(Error::InvalidParameters(format!("malformed secret path {:?}", path)));
    }
    if path.split('/').any(|s| s == "." || s == "..") {
        return Err(Error::InvalidParameters(format!("relative segment in {:?}", path)));
    }
    Ok(())
}

/// `path` equals `prefix` or lies below it in the segment hierarchy
fn under_prefix(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || prefix.ends_with('/') {
        return path.starts_with(prefix);
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(Error::Timeout),
        _ => Ok(()),
    }
}

/// encrypted, policy-gated secret store
pub struct SecretStore {
    backend: Arc<dyn Backend>,
    policies: PolicyEngine,
    root_key: RwLock<Option<Arc<RootKey>>>,
    unsealed: watch::Sender<bool>,
    /// serializes record mutations so read-modify-write of metadata is atomic
    writes: Mutex<()>,
}

impl SecretStore {
    /// open a sealed store, loading persisted policies from the backend
    pub fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        let policies = PolicyEngine::new();
        for raw in backend.values(Tree::Policies)? {
            let policy: Policy = serde_json::from_slice(&raw)?;
            policies.upsert(policy, true)?;
        }
        if !policies.list().is_empty() {
            info!("loaded {} policies", policies.list().len());
        }

        let (unsealed, _) = watch::channel(false);
        Ok(Self {
            backend,
            policies,
            root_key: RwLock::new(None),
            unsealed,
            writes: Mutex::new(()),
        })
    }

    /// sealed store over an in-memory backend
    pub fn in_memory() -> Self {
        match Self::open(Arc::new(MemoryBackend::new())) {
            Ok(store) => store,
            Err(_) => unreachable!("empty memory backend has no policies to load"),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // === seal state ===

    /// install the root key
    ///
    /// idempotent for the key already held. a different key fails with
    /// `KeyMismatch`, as does a key that does not match the verifier
    /// persisted by an earlier unseal.
    pub fn unseal(&self, key: RootKey) -> Result<()> {
        let mut slot = self.root_key.write();

        if let Some(current) = slot.as_ref() {
            if **current == key {
                debug!("unseal with the key already held");
                return Ok(());
            }
            warn!(held = %current.id(), offered = %key.id(), "refusing to replace root key");
            return Err(Error::KeyMismatch);
        }

        let verifier = crypto::key_verifier(key.as_bytes());
        match self.backend.get(Tree::Meta, KEY_VERIFIER)? {
            Some(stored) if !ct_eq(&stored, &verifier) => {
                error!(offered = %key.id(), "root key does not match persisted verifier");
                return Err(Error::KeyMismatch);
            }
            Some(_) => {}
            None => self.backend.put(Tree::Meta, KEY_VERIFIER, &verifier)?,
        }

        info!(key_id = %key.id(), "store unsealed");
        *slot = Some(Arc::new(key));
        drop(slot);
        self.unsealed.send_replace(true);
        Ok(())
    }

    /// drop the root key; records stay encrypted on the backend
    pub fn seal(&self) {
        let previous = self.root_key.write().take();
        if previous.is_some() {
            info!("store sealed");
        }
        self.unsealed.send_replace(false);
    }

    pub fn is_sealed(&self) -> bool {
        self.root_key.read().is_none()
    }

    /// id of the installed root key
    pub fn key_id(&self) -> Option<String> {
        self.root_key.read().as_ref().map(|k| k.id())
    }

    /// resolves once a root key is installed
    pub async fn wait_unsealed(&self) {
        let mut rx = self.unsealed.subscribe();
        // the sender lives as long as the store, so this cannot fail
        let _ = rx.wait_for(|unsealed| *unsealed).await;
    }

    /// receiver observing seal transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.unsealed.subscribe()
    }

    fn key(&self) -> Result<Arc<RootKey>> {
        self.root_key.read().clone().ok_or(Error::Sealed)
    }

    // === policy ===

    pub fn policies(&self) -> &PolicyEngine {
        &self.policies
    }

    /// evaluate and turn a deny into `Forbidden`
    pub fn authorize(&self, identity: &Identity, path: &str, action: Action) -> Result<AccessDecision> {
        let decision = self.policies.evaluate(identity.as_str(), path, action);
        if decision.allow {
            debug!(%identity, path, %action, policy = ?decision.matched_policy, "allowed");
            Ok(decision)
        } else {
            debug!(%identity, path, %action, "denied");
            Err(Error::Forbidden {
                identity: identity.to_string(),
                path: path.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// insert or replace a policy, persisting it before it takes effect
    pub fn upsert_policy(&self, policy: Policy, replace: bool) -> Result<()> {
        let name = policy.name().to_string();
        self.policies.upsert_with(policy, replace, |p| {
            let bytes = serde_json::to_vec(p)?;
            self.backend.put(Tree::Policies, p.name(), &bytes)
        })?;
        info!(policy = %name, "policy applied");
        Ok(())
    }

    pub fn remove_policy(&self, name: &str) -> Result<Policy> {
        let removed = self.policies.remove_with(name, |n| {
            self.backend.delete(Tree::Policies, n).map(|_| ())
        })?;
        info!(policy = %name, "policy removed");
        Ok(removed)
    }

    // === secrets ===

    pub fn put(&self, identity: &Identity, path: &str, value: &[u8]) -> Result<RecordMetadata> {
        self.put_until(identity, path, value, None)
    }

    /// encrypt and store `value` at `path`, overwriting any prior record
    ///
    /// the deadline is checked again right before the single backend write,
    /// so an expired request never leaves a partial update behind
    pub fn put_until(
        &self,
        identity: &Identity,
        path: &str,
        value: &[u8],
        deadline: Option<Instant>,
    ) -> Result<RecordMetadata> {
        let key = self.key()?;
        validate_path(path)?;
        self.authorize(identity, path, Action::Write)?;
        check_deadline(deadline)?;

        let nonce: [u8; NONCE_LEN] = crypto::random_bytes();
        let ciphertext = crypto::encrypt(key.as_bytes(), &nonce, value, path.as_bytes())?;

        let _guard = self.writes.lock();
        let now = now_secs();
        let created_at = match self.backend.get(Tree::Secrets, path)? {
            Some(raw) => SecretRecord::decode(path, &raw)
                .map(|r| r.metadata.created_at)
                .unwrap_or(now),
            None => now,
        };

        let record = SecretRecord {
            path: path.to_string(),
            nonce: nonce.to_vec(),
            ciphertext,
            metadata: RecordMetadata {
                created_at,
                updated_at: now,
                author: identity.to_string(),
                key_id: key.id(),
            },
        };
        let bytes = serde_json::to_vec(&record)?;

        check_deadline(deadline)?;
        self.backend.put(Tree::Secrets, path, &bytes)?;
        debug!(%identity, path, "secret written");
        Ok(record.metadata)
    }

    pub fn get(&self, identity: &Identity, path: &str) -> Result<SecretValue> {
        self.get_until(identity, path, None)
    }

    /// decrypt the record at `path`
    pub fn get_until(
        &self,
        identity: &Identity,
        path: &str,
        deadline: Option<Instant>,
    ) -> Result<SecretValue> {
        let key = self.key()?;
        validate_path(path)?;
        self.authorize(identity, path, Action::Read)?;

        let raw = self
            .backend
            .get(Tree::Secrets, path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let record = SecretRecord::decode(path, &raw)?;

        let nonce: [u8; NONCE_LEN] = record.nonce.as_slice().try_into().map_err(|_| {
            error!(path, "record nonce has wrong length");
            Error::IntegrityFailure(path.to_string())
        })?;

        let plaintext = crypto::decrypt(key.as_bytes(), &nonce, &record.ciphertext, path.as_bytes())?
            .ok_or_else(|| {
                error!(path, key_id = %record.metadata.key_id, "authentication tag mismatch");
                Error::IntegrityFailure(path.to_string())
            })?;

        check_deadline(deadline)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// metadata of the record at `path`, gated by `read`
    pub fn metadata(&self, identity: &Identity, path: &str) -> Result<RecordMetadata> {
        self.key()?;
        validate_path(path)?;
        self.authorize(identity, path, Action::Read)?;

        let raw = self
            .backend
            .get(Tree::Secrets, path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(SecretRecord::decode(path, &raw)?.metadata)
    }

    pub fn list(&self, identity: &Identity, prefix: &str) -> Result<Vec<String>> {
        self.list_until(identity, prefix, None)
    }

    /// paths under `prefix`, without decrypting anything
    ///
    /// the prefix is matched segment-wise, and only paths the caller may
    /// `list` individually are returned
    pub fn list_until(
        &self,
        identity: &Identity,
        prefix: &str,
        deadline: Option<Instant>,
    ) -> Result<Vec<String>> {
        self.key()?;
        self.authorize(identity, prefix, Action::List)?;

        let policies = self.policies.snapshot();
        let mut paths = self.backend.keys_with_prefix(Tree::Secrets, prefix)?;
        paths.retain(|path| {
            under_prefix(prefix, path)
                && policies.evaluate(identity.as_str(), path, Action::List).allow
        });
        check_deadline(deadline)?;
        Ok(paths)
    }

    pub fn delete(&self, identity: &Identity, path: &str) -> Result<()> {
        self.delete_until(identity, path, None)
    }

    /// remove the record at `path`, gated by `write`
    pub fn delete_until(
        &self,
        identity: &Identity,
        path: &str,
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.key()?;
        validate_path(path)?;
        self.authorize(identity, path, Action::Write)?;

        let _guard = self.writes.lock();
        check_deadline(deadline)?;
        if !self.backend.delete(Tree::Secrets, path)? {
            return Err(Error::NotFound(path.to_string()));
        }
        debug!(%identity, path, "secret deleted");
        Ok(())
    }
}
