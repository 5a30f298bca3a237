//! HTTP Catalog Client
//!
//! [`VolumeManager`] implementation for a backend catalog reachable over a
//! JSON HTTP API:
//! - `POST {endpoint}/volumes/query` takes a [`QueryFilter`] and returns a
//!   [`QueryResult`] page, or 404 when nothing matches
//! - `POST {endpoint}/volumes/register` takes a [`VolumeSpec`] and returns
//!   the canonical volume ID

use crate::domain::ports::{QueryFilter, QueryResult, VolumeManager, VolumeSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Catalog client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Base URL of the catalog API
    pub endpoint: String,
    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8443".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    volume_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_policy_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    volume_id: String,
}

/// Backend catalog over HTTP
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(Error::Configuration("catalog endpoint is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }
}

#[async_trait]
impl VolumeManager for CatalogClient {
    #[instrument(skip(self, filter), fields(offset = filter.cursor.offset))]
    async fn query_volume(&self, filter: &QueryFilter) -> Result<Option<QueryResult>> {
        let response = self
            .http
            .post(self.url("volumes/query"))
            .json(filter)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Catalog query matched nothing");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(Error::QueryFailed {
                backend: self.backend_name().to_string(),
                reason: format!("HTTP {}: {}", status, response.text().await.unwrap_or_default()),
            }),
        }
    }

    #[instrument(skip(self, spec), fields(volume_path = %spec.volume_path))]
    async fn register_disk(&self, spec: &VolumeSpec) -> Result<String> {
        let request = RegisterRequest {
            volume_path: &spec.volume_path,
            storage_policy_name: spec.storage_policy_name.as_deref(),
        };
        let response = self
            .http
            .post(self.url("volumes/register"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::BackendOperationFailed {
                backend: self.backend_name().to_string(),
                operation: "register_disk".into(),
                reason: format!("HTTP {}: {}", status, response.text().await.unwrap_or_default()),
            });
        }

        let registered: RegisterResponse = response.json().await?;
        debug!(volume_id = %registered.volume_id, "Registered legacy disk");
        Ok(registered.volume_id)
    }

    fn backend_name(&self) -> &str {
        "catalog"
    }
}
