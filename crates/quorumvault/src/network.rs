//! http client for share holders

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use tracing::{debug, error};

use crate::config::HolderEndpoint;
use crate::error::ErrorBody;
use crate::holder::{ShareRequest, SignedShare};
use crate::identity::Identity;
use crate::recovery::ShareSource;
use crate::share::Share;
use crate::{Error, Result};

/// map a reqwest failure onto our taxonomy; everything on the transport
/// level is worth retrying
pub(crate) fn transport_err(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Network(e.to_string())
    }
}

/// turn a non-success response into an error
pub(crate) async fn response_error(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.json::<ErrorBody>().await.ok();
    Error::from_wire(status, body)
}

/// one share holder reachable over http
pub struct HolderClient {
    id: String,
    url: String,
    verifying_key: Option<VerifyingKey>,
    identity_header: Option<String>,
    identity: Identity,
    epoch: Option<u64>,
    http: reqwest::Client,
}

impl HolderClient {
    /// `identity_header` is where we assert our own identity; leave it out
    /// when the holder's proxy derives it from our client certificate
    pub fn new(
        endpoint: &HolderEndpoint,
        identity_header: Option<&str>,
        identity: Identity,
    ) -> Result<Self> {
        Ok(Self {
            id: endpoint.id.clone(),
            url: endpoint.url.trim_end_matches('/').to_string(),
            verifying_key: endpoint.verifying_key()?,
            identity_header: identity_header.map(str::to_string),
            identity,
            epoch: None,
            http: reqwest::Client::new(),
        })
    }

    /// request a specific epoch instead of the holder's default
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub async fn fetch_signed(&self) -> Result<SignedShare> {
        let mut req = self.http.post(format!("{}/share", self.url));
        if let Some(header) = &self.identity_header {
            req = req.header(header.as_str(), self.identity.as_str());
        }
        let resp = req
            .json(&ShareRequest { epoch: self.epoch })
            .send()
            .await
            .map_err(transport_err)?;

        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }

        let signed: SignedShare = resp
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("holder {}: {}", self.id, e)))?;

        if let Some(key) = &self.verifying_key {
            signed.verify(key).inspect_err(|_| {
                error!(holder = %self.id, "share signature does not match pinned key");
            })?;
        }
        if let Some(epoch) = self.epoch {
            if signed.epoch != epoch {
                error!(holder = %self.id, got = signed.epoch, want = epoch, "holder served wrong epoch");
                return Err(Error::InconsistentShares {
                    suspect: Some(signed.share.index),
                });
            }
        }

        debug!(holder = %self.id, index = signed.share.index, epoch = signed.epoch, "share received");
        Ok(signed)
    }
}

#[async_trait]
impl ShareSource for HolderClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_share(&self) -> Result<Share> {
        Ok(self.fetch_signed().await?.share)
    }
}
