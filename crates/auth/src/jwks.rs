//! Wire format of the identity provider's key endpoint and the sources that fetch it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `{ "keys": [ ... ] }` as served by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default)]
    pub keys: Vec<JwkDescriptor>,
}

/// One key entry. Every field is optional on the wire so that a single odd
/// entry (an EC key, an encryption key) does not fail the whole set; the
/// reconstructor rejects those individually.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkDescriptor {
    #[serde(default)]
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeySourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("key endpoint answered with status {0}")]
    Status(u16),

    #[error("undecodable key set: {0}")]
    Decode(String),
}

/// Where the signing-key cache gets its key set from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, KeySourceError>;

    /// Human-readable origin for log lines.
    fn describe(&self) -> String {
        "key source".to_string()
    }
}

/// Fetches the key set over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    /// `timeout` bounds the whole request, connect through body.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeySourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeySourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, KeySourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| KeySourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeySourceError::Status(status.as_u16()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeySourceError::Decode(e.to_string()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
