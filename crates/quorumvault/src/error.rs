//! error types for quorumvault

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === secret sharing ===
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not enough shares: have {have}, need {need}")]
    InsufficientShares { have: usize, need: usize },

    #[error("inconsistent shares{}", suspect_suffix(.suspect))]
    InconsistentShares { suspect: Option<u8> },

    // === access ===
    #[error("unauthorized caller: {0}")]
    Unauthorized(String),

    #[error("store is sealed")]
    Sealed,

    #[error("forbidden: {identity} may not {action} {path}")]
    Forbidden {
        identity: String,
        path: String,
        action: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity check failed for {0}")]
    IntegrityFailure(String),

    #[error("operation timed out")]
    Timeout,

    #[error("duplicate policy name: {0}")]
    DuplicateName(String),

    #[error("root key does not match the key already in use")]
    KeyMismatch,

    // === recovery ===
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    // === infrastructure ===
    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

fn suspect_suffix(suspect: &Option<u8>) -> String {
    match suspect {
        Some(index) => format!(" (suspect share {})", index),
        None => String::new(),
    }
}

impl Error {
    /// short machine-readable kind, used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidParameters(_) => "invalid_parameters",
            Error::InsufficientShares { .. } => "insufficient_shares",
            Error::InconsistentShares { .. } => "inconsistent_shares",
            Error::Unauthorized(_) => "unauthorized",
            Error::Sealed => "sealed",
            Error::Forbidden { .. } => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::IntegrityFailure(_) => "integrity_failure",
            Error::Timeout => "timeout",
            Error::DuplicateName(_) => "duplicate_name",
            Error::KeyMismatch => "key_mismatch",
            Error::RecoveryFailed(_) => "recovery_failed",
            Error::Network(_) => "network",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Crypto(_) => "crypto",
        }
    }

    /// whether a holder contact failing with this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout)
    }

    /// integrity errors indicate corrupted data or a misbehaving participant
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::InconsistentShares { .. } | Error::IntegrityFailure(_)
        )
    }

    /// http status used by the daemons for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidParameters(_) | Error::InsufficientShares { .. } => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden { .. } => 403,
            Error::NotFound(_) => 404,
            Error::DuplicateName(_) | Error::KeyMismatch => 409,
            Error::Sealed => 503,
            Error::Timeout => 504,
            Error::Network(_) => 502,
            Error::InconsistentShares { .. }
            | Error::IntegrityFailure(_)
            | Error::RecoveryFailed(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Crypto(_) => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (identity, path, action) = match self {
            Error::Forbidden {
                identity,
                path,
                action,
            } => (Some(identity.clone()), Some(path.clone()), Some(action.clone())),
            _ => (None, None, None),
        };
        ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            identity,
            path,
            action,
        }
    }

    /// rebuild an error from a daemon's json error body
    ///
    /// unknown kinds and unparseable bodies become `Network`, since they
    /// usually come from something between us and the daemon
    pub fn from_wire(status: u16, body: Option<ErrorBody>) -> Self {
        let Some(body) = body else {
            return Error::Network(format!("http status {}", status));
        };
        let msg = body.message;
        match body.error.as_str() {
            "invalid_parameters" => Error::InvalidParameters(msg),
            "inconsistent_shares" => Error::InconsistentShares { suspect: None },
            "unauthorized" => Error::Unauthorized(msg),
            "sealed" => Error::Sealed,
            "forbidden" => Error::Forbidden {
                identity: body.identity.unwrap_or_default(),
                path: body.path.unwrap_or_default(),
                action: body.action.unwrap_or_default(),
            },
            "not_found" => Error::NotFound(msg),
            "integrity_failure" => Error::IntegrityFailure(msg),
            "timeout" => Error::Timeout,
            "duplicate_name" => Error::DuplicateName(msg),
            "key_mismatch" => Error::KeyMismatch,
            "recovery_failed" => Error::RecoveryFailed(msg),
            "storage" => Error::Storage(msg),
            "serialization" => Error::Serialization(msg),
            "config" => Error::Config(msg),
            "crypto" => Error::Crypto(msg),
            _ => Error::Network(format!("http status {}: {}", status, msg)),
        }
    }
}

/// json error body returned by both daemons
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
