//! request and response bodies of the store http surface
//!
//! shared by the server routes and `client::StoreClient`. secret values
//! travel as standard base64 so arbitrary bytes survive json.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::policy::{Action, Policy, PolicyDocument};
use crate::recovery::RecoveryState;
use crate::store::RecordMetadata;
use crate::{Error, Result};

pub fn encode_value(value: &[u8]) -> String {
    STANDARD.encode(value)
}

pub fn decode_value(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::InvalidParameters(format!("value is not base64: {}", e)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutSecretRequest {
    /// base64 encoded
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretResponse {
    pub path: String,
    /// base64 encoded
    pub value: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub path: String,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub prefix: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub sealed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub recovery: RecoveryState,
    pub threshold: usize,
    pub holders: usize,
}

/// body of `PUT /v1/sys/policies/{name}`; the name comes from the path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBody {
    #[serde(alias = "identity")]
    pub identity_pattern: String,
    #[serde(alias = "path")]
    pub path_pattern: String,
    pub permissions: Vec<Action>,
}

impl PolicyBody {
    pub fn into_policy(self, name: &str) -> Result<Policy> {
        Policy::new(name, &self.identity_pattern, &self.path_pattern, &self.permissions)
    }
}

/// query of `PUT /v1/sys/policies/{name}`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyWriteQuery {
    /// overwrite a same-named policy instead of failing with duplicate_name
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyListResponse {
    pub policies: Vec<PolicyDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_encoding() {
        let bytes = [0u8, 255, 10, 13];
        assert_eq!(decode_value(&encode_value(&bytes)).unwrap(), bytes);
        assert!(matches!(decode_value("***"), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_policy_body_aliases() {
        let body: PolicyBody = serde_json::from_str(
            r#"{"identity":"spiffe://example.org/web-service/*","path":"secrets/web-service/*","permissions":["read","write"]}"#,
        )
        .unwrap();
        let policy = body.into_policy("web").unwrap();
        assert!(policy.grants(
            "spiffe://example.org/web-service/api",
            "secrets/web-service/db-password",
            Action::Write
        ));
    }
}
