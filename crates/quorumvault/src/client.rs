//! typed http client for the secret store
//!
//! the identity header is only honoured by the store when it sits behind the
//! mtls-terminating proxy; this client just sets it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::api::{
    decode_value, encode_value, ListResponse, PolicyBody, PolicyListResponse, PutSecretRequest,
    SecretResponse, StatusResponse, WriteResponse,
};
use crate::identity::{Identity, DEFAULT_IDENTITY_HEADER};
use crate::network::{response_error, transport_err};
use crate::policy::PolicyDocument;
use crate::store::{RecordMetadata, SecretValue};
use crate::{Error, Result};

pub struct StoreClient {
    url: String,
    identity_header: String,
    identity: Identity,
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(url: &str, identity: Identity) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            identity,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_identity_header(mut self, header: &str) -> Self {
        self.identity_header = header.to_string();
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn request(&self, method: reqwest::Method, route: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.url, route))
            .header(self.identity_header.as_str(), self.identity.as_str())
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req.send().await.map_err(transport_err)?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        resp.json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let resp = req.send().await.map_err(transport_err)?;
        if !resp.status().is_success() {
            return Err(response_error(resp).await);
        }
        Ok(())
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        route: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(method, route).json(body)).await
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.send(self.request(reqwest::Method::GET, "/status")).await
    }

    pub async fn put(&self, path: &str, value: &[u8]) -> Result<RecordMetadata> {
        let body = PutSecretRequest {
            value: encode_value(value),
        };
        let resp: WriteResponse = self
            .send_json(reqwest::Method::PUT, &format!("/v1/secrets/{}", path), &body)
            .await?;
        Ok(resp.metadata)
    }

    pub async fn get(&self, path: &str) -> Result<SecretValue> {
        let resp: SecretResponse = self
            .send(self.request(reqwest::Method::GET, &format!("/v1/secrets/{}", path)))
            .await?;
        let encoded = Zeroizing::new(resp.value);
        Ok(Zeroizing::new(decode_value(&encoded)?))
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send_empty(self.request(reqwest::Method::DELETE, &format!("/v1/secrets/{}", path)))
            .await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let route = if prefix.is_empty() {
            "/v1/list".to_string()
        } else {
            format!("/v1/list/{}", prefix)
        };
        let resp: ListResponse = self.send(self.request(reqwest::Method::GET, &route)).await?;
        Ok(resp.paths)
    }

    /// ask the store to run recovery
    pub async fn unseal(&self) -> Result<StatusResponse> {
        self.send(self.request(reqwest::Method::POST, "/v1/sys/unseal"))
            .await
    }

    pub async fn seal(&self) -> Result<StatusResponse> {
        self.send(self.request(reqwest::Method::POST, "/v1/sys/seal"))
            .await
    }

    /// add a policy; with `replace` an existing one of that name is
    /// overwritten instead of failing with `DuplicateName`
    pub async fn put_policy(
        &self,
        name: &str,
        body: &PolicyBody,
        replace: bool,
    ) -> Result<PolicyDocument> {
        let route = format!("/v1/sys/policies/{}?replace={}", name, replace);
        self.send_json(reqwest::Method::PUT, &route, body).await
    }

    pub async fn delete_policy(&self, name: &str) -> Result<()> {
        self.send_empty(self.request(reqwest::Method::DELETE, &format!("/v1/sys/policies/{}", name)))
            .await
    }

    pub async fn policies(&self) -> Result<Vec<PolicyDocument>> {
        let resp: PolicyListResponse = self
            .send(self.request(reqwest::Method::GET, "/v1/sys/policies"))
            .await?;
        Ok(resp.policies)
    }
}
