//! Syncer Configuration
//!
//! File-based configuration for the syncer binary. Every field has a
//! default, so a config file only needs the values it changes; command-line
//! flags are applied on top by the binary.

use crate::backend::CatalogConfig;
use crate::domain::constants::QUERY_VOLUME_LIMIT;
use crate::error::{Error, Result};
use crate::featurestate::FeatureStatesConfigInfo;
use crate::migration::MigrationConfig;
use crate::syncer::FullSyncConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Top-level syncer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncerConfig {
    /// Location of the feature-states ConfigMap
    pub feature_states: FeatureStatesConfigInfo,
    /// Cluster ID used to scope catalog queries
    pub cluster_id: Option<String>,
    /// Seconds between full-sync passes
    pub full_sync_interval_secs: u64,
    /// Catalog page size
    pub query_limit: u64,
    /// Upper bound for one full-sync pass, in seconds
    pub query_timeout_secs: u64,
    /// Backend catalog client
    pub catalog: CatalogConfig,
    /// Legacy volume migration
    pub migration: MigrationConfig,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            feature_states: FeatureStatesConfigInfo::default(),
            cluster_id: None,
            full_sync_interval_secs: 1800,
            query_limit: QUERY_VOLUME_LIMIT,
            query_timeout_secs: 300,
            catalog: CatalogConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl SyncerConfig {
    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: SyncerConfig = serde_yaml::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded syncer configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.feature_states.validate()?;
        if self.query_limit == 0 {
            return Err(Error::Configuration("query limit must be greater than zero".into()));
        }
        if self.full_sync_interval_secs == 0 {
            return Err(Error::Configuration(
                "full sync interval must be greater than zero".into(),
            ));
        }
        if self.query_timeout_secs == 0 {
            return Err(Error::Configuration("query timeout must be greater than zero".into()));
        }
        if self.catalog.endpoint.is_empty() {
            return Err(Error::Configuration("catalog endpoint is required".into()));
        }
        Ok(())
    }

    pub fn full_sync(&self) -> FullSyncConfig {
        FullSyncConfig {
            cluster_id: self.cluster_id.clone().filter(|id| !id.is_empty()),
            query_limit: self.query_limit,
            pass_timeout: Duration::from_secs(self.query_timeout_secs),
            interval: Duration::from_secs(self.full_sync_interval_secs),
        }
    }
}
