//! share holder logic
//!
//! a holder keeps exactly one share per key epoch and releases it only to
//! the store identity it was configured with. it never sees any other share
//! and never combines anything. every request reads the share file afresh,
//! so the holder carries no state between requests.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::share::Share;
use crate::{Error, Result};

const SIGNATURE_DOMAIN: &[u8] = b"quorumvault:holder_share:v1";

/// body of `POST /share`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShareRequest {
    /// epoch to serve, the holder's configured epoch when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
}

/// a share plus the holder's signature over it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedShare {
    pub epoch: u64,
    pub share: Share,
    /// hex ed25519 public key of the holder
    pub pubkey: String,
    /// hex ed25519 signature over (epoch, share bytes)
    pub signature: String,
}

fn signing_message(epoch: u64, share: &Share) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 8 + 64);
    msg.extend_from_slice(SIGNATURE_DOMAIN);
    msg.extend_from_slice(&epoch.to_le_bytes());
    msg.extend_from_slice(&share.to_bytes());
    msg
}

impl SignedShare {
    pub fn sign(epoch: u64, share: Share, key: &SigningKey) -> Self {
        let signature: Signature = key.sign(&signing_message(epoch, &share));
        Self {
            epoch,
            share,
            pubkey: hex::encode(key.verifying_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// check the signature against a pinned holder key
    ///
    /// the embedded `pubkey` is informational and never trusted here
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let bad = || Error::InconsistentShares {
            suspect: Some(self.share.index),
        };
        let bytes: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(bad)?;
        key.verify(&signing_message(self.epoch, &self.share), &Signature::from_bytes(&bytes))
            .map_err(|_| bad())
    }
}

/// `GET /` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    pub epoch: u64,
    pub pubkey: String,
    /// whether a share exists for the default epoch
    pub provisioned: bool,
}

/// read the node key at `path`, generating and persisting one if absent
pub fn load_or_generate_signing_key(path: &Path) -> Result<SigningKey> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config(format!("{}: node key must be 32 bytes", path.display())))?;
        return Ok(SigningKey::from_bytes(&arr));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let key = SigningKey::generate(&mut OsRng);
    std::fs::write(path, key.to_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(path = %path.display(), "generated node key");
    Ok(key)
}

pub struct ShareHolder {
    share_dir: PathBuf,
    epoch: u64,
    store_identity: Identity,
    signing_key: SigningKey,
}

impl ShareHolder {
    pub fn new(
        share_dir: impl Into<PathBuf>,
        epoch: u64,
        store_identity: Identity,
        signing_key: SigningKey,
    ) -> Self {
        Self {
            share_dir: share_dir.into(),
            epoch,
            store_identity,
            signing_key,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            version: env!("CARGO_PKG_VERSION").into(),
            epoch: self.epoch,
            pubkey: hex::encode(self.verifying_key().to_bytes()),
            provisioned: Share::file_path(&self.share_dir, self.epoch).exists(),
        }
    }

    /// release this holder's share to `caller`
    ///
    /// only the configured store identity is served; anyone else gets
    /// `Unauthorized` regardless of whether a share exists
    pub fn get_share(&self, caller: &Identity, epoch: Option<u64>) -> Result<SignedShare> {
        if caller != &self.store_identity {
            warn!(%caller, "share requested by unexpected peer");
            return Err(Error::Unauthorized(format!("{} may not fetch shares", caller)));
        }

        let epoch = epoch.unwrap_or(self.epoch);
        let share = Share::load(&self.share_dir, epoch)?;
        debug!(epoch, index = share.index, "releasing share");
        Ok(SignedShare::sign(epoch, share, &self.signing_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vss;

    fn store_id() -> Identity {
        Identity::new("spiffe://example.org/store").unwrap()
    }

    fn provisioned(dir: &Path, epoch: u64) -> (ShareHolder, Vec<Share>) {
        let shares = vss::split(&[9u8; 32], 2, 3).unwrap();
        shares[0].save(dir, epoch).unwrap();
        let holder = ShareHolder::new(dir, epoch, store_id(), SigningKey::from_bytes(&[1u8; 32]));
        (holder, shares)
    }

    #[test]
    fn test_serves_store_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (holder, shares) = provisioned(dir.path(), 1);

        let signed = holder.get_share(&store_id(), None).unwrap();
        assert_eq!(signed.epoch, 1);
        assert_eq!(signed.share.value, shares[0].value);
        signed.verify(&holder.verifying_key()).unwrap();
    }

    #[test]
    fn test_rejects_other_identities() {
        let dir = tempfile::tempdir().unwrap();
        let (holder, _) = provisioned(dir.path(), 1);

        let intruder = Identity::new("spiffe://example.org/web-service/api").unwrap();
        assert!(matches!(
            holder.get_share(&intruder, None),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_explicit_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let (holder, _) = provisioned(dir.path(), 1);

        assert!(matches!(
            holder.get_share(&store_id(), Some(2)),
            Err(Error::NotFound(_))
        ));

        let next = vss::split(&[4u8; 32], 2, 3).unwrap();
        next[1].save(dir.path(), 2).unwrap();
        assert_eq!(holder.get_share(&store_id(), Some(2)).unwrap().share.index, 2);
        assert_eq!(holder.get_share(&store_id(), None).unwrap().share.index, 1);
    }

    #[test]
    fn test_signature_binds_epoch_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let (holder, _) = provisioned(dir.path(), 1);
        let signed = holder.get_share(&store_id(), None).unwrap();

        let mut replayed = signed.clone();
        replayed.epoch = 2;
        assert!(matches!(
            replayed.verify(&holder.verifying_key()),
            Err(Error::InconsistentShares { suspect: Some(1) })
        ));

        let other = SigningKey::from_bytes(&[2u8; 32]).verifying_key();
        assert!(signed.verify(&other).is_err());
    }

    #[test]
    fn test_node_key_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/node.key");

        let first = load_or_generate_signing_key(&path).unwrap();
        let second = load_or_generate_signing_key(&path).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());

        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(load_or_generate_signing_key(&path).is_err());
    }

    #[test]
    fn test_info_reports_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let holder = ShareHolder::new(dir.path(), 5, store_id(), SigningKey::from_bytes(&[1u8; 32]));
        assert!(!holder.info().provisioned);

        vss::split(&[1u8; 32], 1, 1).unwrap()[0].save(dir.path(), 5).unwrap();
        assert!(holder.info().provisioned);
    }
}
