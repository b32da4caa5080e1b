//! caller identity
//!
//! mutual tls is terminated outside this process. the terminating proxy
//! forwards the verified peer identity either as a plain header or as an
//! envoy-style `x-forwarded-client-cert` element.
//!
//! a deployment trusts exactly one of the two. a request that also carries
//! the other one is refused, since the proxy only sanitizes the header it
//! sets itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// default header carrying the verified identity
pub const DEFAULT_IDENTITY_HEADER: &str = "x-client-identity";

/// envoy forwarded client certificate header
pub const XFCC_HEADER: &str = "x-forwarded-client-cert";

/// verified caller identity, e.g. `spiffe://example.org/web-service/api`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::Unauthorized("empty identity".into()));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::Unauthorized(format!("malformed identity {:?}", value)));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// extract the `URI=` element from an x-forwarded-client-cert value
    ///
    /// with several comma-separated certificate elements the last one is
    /// the immediate peer of the proxy
    pub fn from_xfcc(header: &str) -> Result<Self> {
        let element = header
            .rsplit(',')
            .next()
            .ok_or_else(|| Error::Unauthorized("empty client cert header".into()))?;

        element
            .split(';')
            .filter_map(|kv| kv.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("uri"))
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .ok_or_else(|| Error::Unauthorized("client cert carries no uri".into()))
            .and_then(Identity::new)
    }
}

/// where the verified identity is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// a plain header, `x-client-identity` unless configured otherwise
    #[default]
    Header,
    /// the `URI=` element of `x-forwarded-client-cert`
    Xfcc,
}

/// reads the caller identity from request headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityExtractor {
    source: IdentitySource,
    header: String,
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::header(DEFAULT_IDENTITY_HEADER)
    }
}

impl IdentityExtractor {
    pub fn new(source: IdentitySource, header: impl Into<String>) -> Self {
        Self {
            source,
            header: header.into().to_ascii_lowercase(),
        }
    }

    /// trust only the plain header `name`
    pub fn header(name: impl Into<String>) -> Self {
        Self::new(IdentitySource::Header, name)
    }

    /// trust only `x-forwarded-client-cert`
    pub fn xfcc() -> Self {
        Self::new(IdentitySource::Xfcc, DEFAULT_IDENTITY_HEADER)
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// header a client sets its identity in, none when the proxy asserts it
    pub fn client_header(&self) -> Option<&str> {
        match self.source {
            IdentitySource::Header => Some(self.header.as_str()),
            IdentitySource::Xfcc => None,
        }
    }

    /// resolve the identity from request headers looked up by `get`
    pub fn extract<'a, F>(&self, get: F) -> Result<Identity>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let (trusted, other) = match self.source {
            IdentitySource::Header => (self.header.as_str(), XFCC_HEADER),
            IdentitySource::Xfcc => (XFCC_HEADER, self.header.as_str()),
        };
        if get(other).is_some() {
            return Err(Error::Unauthorized(format!(
                "{} is not accepted, identity comes from {}",
                other, trusted
            )));
        }

        let value = get(trusted)
            .ok_or_else(|| Error::Unauthorized("no verified identity on request".into()))?;
        match self.source {
            IdentitySource::Header => Identity::new(value.trim()),
            IdentitySource::Xfcc => Identity::from_xfcc(value),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Identity::new(value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
