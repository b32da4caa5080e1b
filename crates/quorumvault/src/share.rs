//! share container, encodings and on-disk persistence
//!
//! shares can be encoded as:
//! - json (how holders persist them, one file per key epoch)
//! - hex string
//! - base64 string
//!
//! the compact binary layout is
//! `version | index | threshold | total | split_id[16] | len u16 le | value | checksum[8]`
//!
//! `value` is the split of `secret || tag`, so it is `SECRET_TAG_LEN` bytes
//! longer than the secret. nothing derived from the secret is stored in the
//! clear.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{ct_eq, mac};
use crate::{Error, Result};

const SHARE_VERSION: u8 = 2;
const CHECKSUM_LEN: usize = 8;
const HEADER_LEN: usize = 1 + 1 + 1 + 1 + SPLIT_ID_LEN + 2;

/// length of the random identifier shared by every share of one split
pub const SPLIT_ID_LEN: usize = 16;

/// one evaluation point of a threshold split
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// evaluation point, 1-indexed
    pub index: u8,
    /// polynomial evaluations of the secret and its tag
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    /// shares needed to reconstruct
    pub threshold: u8,
    /// shares created by the split
    pub total: u8,
    /// random identifier of the split this share belongs to
    #[serde(with = "hex_array")]
    pub split_id: [u8; SPLIT_ID_LEN],
    /// detects corruption of this share in transit or at rest
    #[serde(with = "hex_bytes")]
    pub checksum: Vec<u8>,
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("total", &self.total)
            .field("value", &"<redacted>")
            .finish()
    }
}

fn checksum(index: u8, threshold: u8, total: u8, split_id: &[u8], value: &[u8]) -> Vec<u8> {
    let tag = mac(
        b"quorumvault:share_checksum:v1",
        &[&[index, threshold, total], split_id, value],
    );
    tag[..CHECKSUM_LEN].to_vec()
}

impl Share {
    pub fn new(
        index: u8,
        value: Vec<u8>,
        threshold: u8,
        total: u8,
        split_id: [u8; SPLIT_ID_LEN],
    ) -> Self {
        let checksum = checksum(index, threshold, total, &split_id, &value);
        Self {
            index,
            value,
            threshold,
            total,
            split_id,
            checksum,
        }
    }

    /// verify the share checksum
    pub fn verify(&self) -> Result<()> {
        let expected = checksum(
            self.index,
            self.threshold,
            self.total,
            &self.split_id,
            &self.value,
        );
        if ct_eq(&self.checksum, &expected) {
            Ok(())
        } else {
            Err(Error::InconsistentShares {
                suspect: Some(self.index),
            })
        }
    }

    /// encode as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// decode from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::Serialization(format!("share hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// encode as base64
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// decode from base64
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(s.trim())
            .map_err(|e| Error::Serialization(format!("share base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// serialize to the compact binary layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.value.len() + self.checksum.len());
        bytes.push(SHARE_VERSION);
        bytes.push(self.index);
        bytes.push(self.threshold);
        bytes.push(self.total);
        bytes.extend_from_slice(&self.split_id);
        // split caps values at u16::MAX, an oversized hand-built share
        // encodes as unparseable rather than aliasing a shorter one
        let len = u16::try_from(self.value.len()).unwrap_or(u16::MAX);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&self.value);
        bytes.extend_from_slice(&self.checksum);
        bytes
    }

    /// deserialize from the compact binary layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(Error::Serialization("share too short".into()));
        }
        if bytes[0] != SHARE_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported share version {}",
                bytes[0]
            )));
        }

        let mut split_id = [0u8; SPLIT_ID_LEN];
        split_id.copy_from_slice(&bytes[4..4 + SPLIT_ID_LEN]);
        let value_len =
            u16::from_le_bytes([bytes[HEADER_LEN - 2], bytes[HEADER_LEN - 1]]) as usize;

        if bytes.len() != HEADER_LEN + value_len + CHECKSUM_LEN {
            return Err(Error::Serialization("share length mismatch".into()));
        }

        let share = Self {
            index: bytes[1],
            threshold: bytes[2],
            total: bytes[3],
            split_id,
            value: bytes[HEADER_LEN..HEADER_LEN + value_len].to_vec(),
            checksum: bytes[HEADER_LEN + value_len..].to_vec(),
        };

        share.verify()?;
        Ok(share)
    }

    /// path of the share file for `epoch` inside `dir`
    pub fn file_path(dir: &Path, epoch: u64) -> PathBuf {
        dir.join(format!("share-{}.json", epoch))
    }

    /// persist as `share-<epoch>.json` in `dir`
    pub fn save(&self, dir: &Path, epoch: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_path(dir, epoch);
        let json = serde_json::to_vec_pretty(self)?;

        // write-then-rename so a crash never leaves a torn share file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// load the share for `epoch` from `dir`
    pub fn load(dir: &Path, epoch: u64) -> Result<Self> {
        let path = Self::file_path(dir, epoch);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("share for epoch {}", epoch)))
            }
            Err(e) => return Err(e.into()),
        };
        let share: Share = serde_json::from_slice(&bytes)?;
        share.verify()?;
        Ok(share)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// hex serialization helper for serde
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// hex serialization for fixed-size arrays
pub(crate) mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}
