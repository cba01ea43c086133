//! Workers KV REST client.
//!
//! Talks to a hosted key-value namespace over its HTTP API:
//!
//! - `GET    {base}/accounts/{account}/storage/kv/namespaces/{ns}/values/{key}`
//! - `PUT    .../values/{key}?expiration_ttl={seconds}` with the raw value as body
//! - `DELETE .../values/{key}`
//! - `GET    .../keys?prefix={prefix}&cursor={cursor}` for listing
//!
//! A 404 on read is a miss, not an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use warden_core::{ConfigError, StorageError};

use super::{KeyValueStore, PutOptions};

/// Default API root for hosted KV namespaces.
pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Connection settings for [`HttpKvStore`].
#[derive(Debug)]
pub struct HttpKvConfig {
    pub account_id: String,
    pub namespace_id: String,
    /// Bearer token, never logged.
    pub api_token: SecretString,
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpKvConfig {
    pub fn new(
        account_id: impl Into<String>,
        namespace_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let token: String = api_token.into();
        Self {
            account_id: account_id.into(),
            namespace_id: namespace_id.into(),
            api_token: SecretString::new(token.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `WARDEN_KV_ACCOUNT_ID` (required)
    /// - `WARDEN_KV_NAMESPACE_ID` (required)
    /// - `WARDEN_KV_API_TOKEN` (required)
    /// - `WARDEN_KV_BASE_URL` (default: the hosted API root)
    pub fn from_env() -> Result<Self, ConfigError> {
        let account_id = required_env("WARDEN_KV_ACCOUNT_ID")?;
        let namespace_id = required_env("WARDEN_KV_NAMESPACE_ID")?;
        let api_token = required_env("WARDEN_KV_API_TOKEN")?;

        let mut config = Self::new(account_id, namespace_id, api_token);
        if let Ok(base_url) = std::env::var("WARDEN_KV_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().to_string();
            }
        }
        Ok(config)
    }

    fn namespace_url(&self) -> String {
        format!(
            "{}/accounts/{}/storage/kv/namespaces/{}",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.namespace_id
        )
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.namespace_url(), urlencoding::encode(key))
    }

    fn keys_url(&self) -> String {
        format!("{}/keys", self.namespace_url())
    }
}

fn required_env(field: &str) -> Result<String, ConfigError> {
    std::env::var(field)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            field: field.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct ListKeysResponse {
    result: Vec<ListedKey>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ListedKey {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursor: Option<String>,
}

/// [`KeyValueStore`] backed by a hosted KV namespace.
pub struct HttpKvStore {
    client: Client,
    config: HttpKvConfig,
}

impl HttpKvStore {
    pub fn new(config: HttpKvConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Remote {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpKvConfig {
        &self.config
    }

    fn token(&self) -> &str {
        self.config.api_token.expose_secret()
    }
}

fn transport_error(e: reqwest::Error) -> StorageError {
    StorageError::Remote {
        reason: e.to_string(),
    }
}

async fn status_error(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StorageError::RemoteStatus { status, message }
}

#[async_trait]
impl KeyValueStore for HttpKvStore {
    fn name(&self) -> &'static str {
        "http-kv"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let response = self
            .client
            .get(self.config.value_url(key))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.text().await.map(Some).map_err(transport_error)
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put(self.config.value_url(key))
            .bearer_auth(self.token())
            .header("Content-Type", "text/plain")
            .body(value.to_string());
        if let Some(ttl_seconds) = options.ttl_seconds {
            request = request.query(&[("expiration_ttl", ttl_seconds)]);
        }

        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .delete(self.config.value_url(key))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(transport_error)?;

        // Deleting an absent key is not an error.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("prefix", prefix)];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }

            let response = self
                .client
                .get(self.config.keys_url())
                .bearer_auth(self.token())
                .query(&query)
                .send()
                .await
                .map_err(transport_error)?;
            if !response.status().is_success() {
                return Err(status_error(response).await);
            }

            let page: ListKeysResponse =
                response
                    .json()
                    .await
                    .map_err(|e| StorageError::Deserialization {
                        reason: e.to_string(),
                    })?;
            keys.extend(page.result.into_iter().map(|listed| listed.name));

            match page.result_info.and_then(|info| info.cursor) {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(keys)
    }
}
