//! Domain Ports - Core trait definitions for the metadata syncer
//!
//! These traits define the boundaries between the reconciliation core and the
//! systems it talks to: the cluster object cache, the backend volume catalog,
//! the persistent migration mapping and the feature-state source.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolume, PersistentVolumeClaim, Pod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Legacy Volume Identity
// =============================================================================

/// Locator of a volume provisioned by the legacy in-tree plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Datastore path of the backing disk
    pub volume_path: String,
    /// Storage policy the disk was created with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_policy_name: Option<String>,
}

impl VolumeSpec {
    pub fn new(volume_path: impl Into<String>) -> Self {
        Self {
            volume_path: volume_path.into(),
            storage_policy_name: None,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.storage_policy_name = Some(policy.into());
        self
    }
}

impl std::fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.storage_policy_name {
            Some(policy) => write!(f, "{} (policy {})", self.volume_path, policy),
            None => write!(f, "{}", self.volume_path),
        }
    }
}

/// Persisted mapping between a legacy locator and its canonical volume ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub volume_id: String,
    pub volume_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_policy_name: Option<String>,
}

impl MigrationRecord {
    pub fn new(volume_id: impl Into<String>, spec: &VolumeSpec) -> Self {
        Self {
            volume_id: volume_id.into(),
            volume_path: spec.volume_path.clone(),
            storage_policy_name: spec.storage_policy_name.clone(),
        }
    }

    pub fn spec(&self) -> VolumeSpec {
        VolumeSpec {
            volume_path: self.volume_path.clone(),
            storage_policy_name: self.storage_policy_name.clone(),
        }
    }
}

// =============================================================================
// Backend Catalog Query Types
// =============================================================================

/// Pagination cursor assigned by the backend catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub offset: u64,
    pub limit: u64,
    #[serde(default)]
    pub total_records: u64,
}

impl Cursor {
    pub fn first_page(limit: u64) -> Self {
        Self {
            offset: 0,
            limit,
            total_records: 0,
        }
    }

    /// Records the backend still has to return after this cursor
    pub fn remaining(&self) -> u64 {
        self.total_records.saturating_sub(self.offset)
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.total_records
    }
}

/// Filter for a backend catalog query
///
/// An empty `volume_ids` list selects the entire catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    #[serde(default)]
    pub volume_ids: Vec<String>,
    #[serde(default)]
    pub container_cluster_ids: Vec<String>,
    pub cursor: Cursor,
}

impl QueryFilter {
    pub fn is_whole_catalog(&self) -> bool {
        self.volume_ids.is_empty()
    }
}

/// A volume as recorded by the backend catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVolume {
    pub volume_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub container_cluster_ids: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub health_status: Option<String>,
}

/// One page returned by the backend catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub volumes: Vec<CatalogVolume>,
    pub cursor: Cursor,
}

// =============================================================================
// Volume Manager Port (Backend Catalog)
// =============================================================================

/// Port for the storage backend's volume catalog
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Query one page of the catalog. `None` means the backend has nothing more.
    async fn query_volume(&self, filter: &QueryFilter) -> Result<Option<QueryResult>>;

    /// Register a legacy disk with the catalog and return its canonical ID
    async fn register_disk(&self, spec: &VolumeSpec) -> Result<String>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Migration Store Port
// =============================================================================

/// Port for the persistent legacy-to-canonical mapping, keyed by volume ID
#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn get(&self, volume_id: &str) -> Result<Option<MigrationRecord>>;

    async fn put(&self, record: MigrationRecord) -> Result<()>;

    /// Delete a mapping. Deleting an absent mapping is not an error.
    async fn delete(&self, volume_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<MigrationRecord>>;
}

// =============================================================================
// Volume Migration Service Port
// =============================================================================

/// Resolves legacy locators to canonical volume IDs and back
#[async_trait]
pub trait VolumeMigrationService: Send + Sync {
    async fn get_volume_id(&self, spec: &VolumeSpec) -> Result<String>;

    async fn get_volume_path(&self, volume_id: &str) -> Result<VolumeSpec>;
}

// =============================================================================
// Cluster Object Cache Port
// =============================================================================

/// Read-only view of the informer caches
pub trait ClusterCache: Send + Sync {
    fn list_volumes(&self) -> Vec<Arc<PersistentVolume>>;

    fn list_claims(&self) -> Vec<Arc<PersistentVolumeClaim>>;

    fn list_pods(&self) -> Vec<Arc<Pod>>;

    fn get_volume(&self, name: &str) -> Option<Arc<PersistentVolume>>;

    fn get_claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>>;

    /// Whether every cache has finished its initial list
    fn is_synced(&self) -> bool {
        true
    }

    /// List volumes carrying every label in `selector`
    fn list_volumes_with_labels(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Vec<Arc<PersistentVolume>> {
        self.list_volumes()
            .into_iter()
            .filter(|pv| {
                let labels = pv.metadata.labels.as_ref();
                selector
                    .iter()
                    .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
            })
            .collect()
    }
}

// =============================================================================
// Feature State Ports
// =============================================================================

/// One-shot fetch of a ConfigMap
#[async_trait]
pub trait ConfigMapSource: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

/// Synchronous feature-state query
pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self, feature: &str) -> bool;

    /// Number of feature-state changes applied so far
    fn generation(&self) -> u64 {
        0
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeManagerRef = Arc<dyn VolumeManager>;
pub type MigrationStoreRef = Arc<dyn MigrationStore>;
pub type VolumeMigrationServiceRef = Arc<dyn VolumeMigrationService>;
pub type ClusterCacheRef = Arc<dyn ClusterCache>;
pub type FeatureGateRef = Arc<dyn FeatureGate>;
