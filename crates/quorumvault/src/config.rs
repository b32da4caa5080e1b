//! toml configuration for the store and holder daemons
//!
//! every field has a default so a minimal file only names the holders.
//! `load` always validates before returning.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::identity::{Identity, IdentityExtractor, IdentitySource, DEFAULT_IDENTITY_HEADER};
use crate::recovery::RecoveryPolicy;
use crate::{Error, Result};

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

fn default_identity_header() -> String {
    DEFAULT_IDENTITY_HEADER.to_string()
}

fn default_store_identity() -> String {
    "spiffe://quorumvault/store".to_string()
}

/// a share holder as seen from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HolderEndpoint {
    pub id: String,
    /// base url, e.g. `http://10.0.0.2:8300`
    pub url: String,
    /// hex ed25519 key; when set, unsigned or badly signed shares are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_key: Option<String>,
}

impl HolderEndpoint {
    pub fn verifying_key(&self) -> Result<Option<VerifyingKey>> {
        let Some(hex_key) = &self.verifying_key else {
            return Ok(None);
        };
        let bytes: [u8; 32] = hex::decode(hex_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::Config(format!("holder {}: verifying_key is not 32 hex bytes", self.id)))?;
        VerifyingKey::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| Error::Config(format!("holder {}: {}", self.id, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    pub holder_timeout_ms: u64,
    pub deadline_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let p = RecoveryPolicy::default();
        Self {
            holder_timeout_ms: p.holder_timeout.as_millis() as u64,
            deadline_ms: p.deadline.as_millis() as u64,
            max_attempts: p.max_attempts,
            backoff_base_ms: p.backoff_base.as_millis() as u64,
            backoff_max_ms: p.backoff_max.as_millis() as u64,
        }
    }
}

impl RecoveryConfig {
    pub fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            holder_timeout: Duration::from_millis(self.holder_timeout_ms),
            deadline: Duration::from_millis(self.deadline_ms),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

/// secret store daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// which proxy-set header carries caller identity
    pub identity_source: IdentitySource,
    /// header name when `identity_source = "header"`
    pub identity_header: String,
    /// identity the store presents to share holders
    pub store_identity: String,
    pub threshold: usize,
    pub holders: Vec<HolderEndpoint>,
    pub recovery: RecoveryConfig,
    pub request_timeout_ms: u64,
    /// policy documents applied at startup
    pub policy_files: Vec<PathBuf>,
    /// let `policy_files` overwrite differing same-named stored policies
    pub replace_policies: bool,
    /// start recovery as soon as the daemon is up
    pub auto_unseal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8200)),
            data_dir: PathBuf::from("./data"),
            identity_source: IdentitySource::Header,
            identity_header: default_identity_header(),
            store_identity: default_store_identity(),
            threshold: 2,
            holders: Vec::new(),
            recovery: RecoveryConfig::default(),
            request_timeout_ms: 5_000,
            policy_files: Vec::new(),
            replace_policies: false,
            auto_unseal: true,
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn identity(&self) -> IdentityExtractor {
        IdentityExtractor::new(self.identity_source, self.identity_header.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn store_identity(&self) -> Result<Identity> {
        Identity::new(self.store_identity.clone())
            .map_err(|e| Error::Config(format!("store_identity: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::Config("threshold must be at least 1".into()));
        }
        if self.holders.is_empty() {
            return Err(Error::Config("no share holders configured".into()));
        }
        if self.threshold > self.holders.len() {
            return Err(Error::Config(format!(
                "threshold {} exceeds {} configured holders",
                self.threshold,
                self.holders.len()
            )));
        }

        let mut ids = HashSet::new();
        for holder in &self.holders {
            if !ids.insert(holder.id.as_str()) {
                return Err(Error::Config(format!("duplicate holder id {}", holder.id)));
            }
            if !(holder.url.starts_with("http://") || holder.url.starts_with("https://")) {
                return Err(Error::Config(format!("holder {}: url must be http(s)", holder.id)));
            }
            holder.verifying_key()?;
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        let r = &self.recovery;
        if r.holder_timeout_ms == 0 || r.deadline_ms == 0 {
            return Err(Error::Config("recovery timeouts must be positive".into()));
        }
        if r.max_attempts == 0 {
            return Err(Error::Config("recovery.max_attempts must be at least 1".into()));
        }
        if r.backoff_base_ms > r.backoff_max_ms {
            return Err(Error::Config("recovery.backoff_base_ms exceeds backoff_max_ms".into()));
        }
        if self.identity_header.is_empty() {
            return Err(Error::Config("identity_header is empty".into()));
        }
        self.store_identity()?;
        Ok(())
    }
}

/// share holder daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HolderConfig {
    pub bind: SocketAddr,
    pub share_dir: PathBuf,
    /// epoch served when the request names none
    pub epoch: u64,
    /// the only identity allowed to fetch the share
    pub store_identity: String,
    pub identity_source: IdentitySource,
    pub identity_header: String,
    /// node signing key, defaults to `<share_dir>/node.key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<PathBuf>,
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8300)),
            share_dir: PathBuf::from("./shares"),
            epoch: 0,
            store_identity: default_store_identity(),
            identity_source: IdentitySource::Header,
            identity_header: default_identity_header(),
            signing_key: None,
        }
    }
}

impl HolderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn identity(&self) -> IdentityExtractor {
        IdentityExtractor::new(self.identity_source, self.identity_header.clone())
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.signing_key
            .clone()
            .unwrap_or_else(|| self.share_dir.join("node.key"))
    }

    pub fn store_identity(&self) -> Result<Identity> {
        Identity::new(self.store_identity.clone())
            .map_err(|e| Error::Config(format!("store_identity: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.identity_header.is_empty() {
            return Err(Error::Config("identity_header is empty".into()));
        }
        self.store_identity()?;
        Ok(())
    }
}
