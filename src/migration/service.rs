//! Volume Migration Service
//!
//! Resolves legacy volume locators to canonical backend volume IDs and back.
//! Known mappings are loaded from the [`MigrationStore`] at construction and
//! kept in memory; unknown paths are registered with the backend on demand
//! and the new mapping is persisted before it is returned.

use crate::domain::ports::{
    MigrationRecord, MigrationStoreRef, VolumeManagerRef, VolumeMigrationService, VolumeSpec,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the migration service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Register unknown legacy disks with the backend on lookup
    pub register_on_demand: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            register_on_demand: true,
        }
    }
}

// =============================================================================
// Migration Service
// =============================================================================

/// Legacy locator to canonical ID resolver
pub struct MigrationService {
    config: MigrationConfig,
    manager: VolumeManagerRef,
    store: MigrationStoreRef,
    /// volume path -> volume ID
    by_path: DashMap<String, String>,
    /// volume ID -> legacy locator
    by_id: DashMap<String, VolumeSpec>,
}

impl std::fmt::Debug for MigrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationService")
            .field("backend", &self.manager.backend_name())
            .field("mappings", &self.by_id.len())
            .finish()
    }
}

impl MigrationService {
    /// Build the service and load every persisted mapping.
    ///
    /// A store that cannot be read makes the service unusable.
    pub async fn new(
        manager: VolumeManagerRef,
        store: MigrationStoreRef,
        config: MigrationConfig,
    ) -> Result<Self> {
        let records = store
            .list()
            .await
            .map_err(|e| Error::MigrationUnavailable(format!("failed to load mappings: {}", e)))?;

        let service = Self {
            config,
            manager,
            store,
            by_path: DashMap::new(),
            by_id: DashMap::new(),
        };
        for record in records {
            service.remember(&record.volume_id, record.spec());
        }

        info!(mappings = service.len(), "Volume migration service initialized");
        Ok(service)
    }

    /// Record a mapping, evicting stale entries so the cache stays one-to-one
    fn remember(&self, volume_id: &str, spec: VolumeSpec) {
        if let Some(previous_id) = self.by_path.insert(spec.volume_path.clone(), volume_id.to_string()) {
            if previous_id != volume_id {
                self.by_id.remove(&previous_id);
            }
        }
        if let Some(previous) = self.by_id.insert(volume_id.to_string(), spec.clone()) {
            if previous.volume_path != spec.volume_path {
                self.by_path.remove(&previous.volume_path);
            }
        }
    }

    /// Forget a mapping and remove it from the store
    pub async fn delete_volume_info(&self, volume_id: &str) -> Result<()> {
        self.store.delete(volume_id).await?;
        if let Some((_, spec)) = self.by_id.remove(volume_id) {
            self.by_path.remove(&spec.volume_path);
        }
        debug!(volume_id, "Removed volume migration mapping");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl VolumeMigrationService for MigrationService {
    async fn get_volume_id(&self, spec: &VolumeSpec) -> Result<String> {
        if let Some(id) = self.by_path.get(&spec.volume_path) {
            return Ok(id.clone());
        }

        if !self.config.register_on_demand {
            return Err(Error::VolumeMappingNotFound {
                volume_path: spec.volume_path.clone(),
            });
        }

        info!(volume = %spec, backend = self.manager.backend_name(), "Registering legacy volume");
        let volume_id = self.manager.register_disk(spec).await?;
        self.store
            .put(MigrationRecord::new(&volume_id, spec))
            .await?;
        self.remember(&volume_id, spec.clone());

        info!(volume = %spec, volume_id = %volume_id, "Legacy volume registered");
        Ok(volume_id)
    }

    async fn get_volume_path(&self, volume_id: &str) -> Result<VolumeSpec> {
        if let Some(spec) = self.by_id.get(volume_id) {
            return Ok(spec.clone());
        }

        match self.store.get(volume_id).await? {
            Some(record) => {
                let spec = record.spec();
                self.remember(volume_id, spec.clone());
                Ok(spec)
            }
            None => Err(Error::VolumePathNotFound {
                volume_id: volume_id.to_string(),
            }),
        }
    }
}

// =============================================================================
// Initialize-once Cell
// =============================================================================

/// Initialize-once holder of the migration service
#[derive(Debug, Default)]
pub struct MigrationServiceCell {
    cell: OnceCell<std::result::Result<Arc<MigrationService>, String>>,
}

impl MigrationServiceCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the service on first call; later calls return the same outcome.
    /// A construction failure is returned to every caller.
    pub async fn initialize(
        &self,
        manager: VolumeManagerRef,
        store: MigrationStoreRef,
        config: MigrationConfig,
    ) -> Result<Arc<MigrationService>> {
        let outcome = self
            .cell
            .get_or_init(|| async move {
                MigrationService::new(manager, store, config)
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        error!(error = %e, "Failed to get migration service");
                        e.to_string()
                    })
            })
            .await;

        match outcome {
            Ok(service) => Ok(service.clone()),
            Err(message) => Err(Error::MigrationUnavailable(message.clone())),
        }
    }

    pub fn get(&self) -> Option<Arc<MigrationService>> {
        self.cell.get().and_then(|r| r.as_ref().ok().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MigrationStore, QueryFilter, QueryResult, VolumeManager};
    use crate::migration::store::MemoryMigrationStore;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeManager {
        registrations: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl VolumeManager for FakeManager {
        async fn query_volume(&self, _filter: &QueryFilter) -> Result<Option<QueryResult>> {
            Ok(None)
        }

        async fn register_disk(&self, spec: &VolumeSpec) -> Result<String> {
            if self.fail {
                return Err(Error::BackendOperationFailed {
                    backend: "fake".into(),
                    operation: "register".into(),
                    reason: format!("cannot register {}", spec.volume_path),
                });
            }
            let n = self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(format!("vol-{}", n))
        }

        fn backend_name(&self) -> &str {
            "fake"
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl MigrationStore for BrokenStore {
        async fn get(&self, _volume_id: &str) -> Result<Option<MigrationRecord>> {
            Err(Error::Internal("store down".into()))
        }
        async fn put(&self, _record: MigrationRecord) -> Result<()> {
            Err(Error::Internal("store down".into()))
        }
        async fn delete(&self, _volume_id: &str) -> Result<()> {
            Err(Error::Internal("store down".into()))
        }
        async fn list(&self) -> Result<Vec<MigrationRecord>> {
            Err(Error::Internal("store down".into()))
        }
    }

    #[tokio::test]
    async fn test_known_mapping_served_from_cache() {
        let store = Arc::new(MemoryMigrationStore::with_records([MigrationRecord::new(
            "vol-known",
            &VolumeSpec::new("[ds1] a.vmdk"),
        )]));
        let manager = Arc::new(FakeManager::default());
        let service = MigrationService::new(manager.clone(), store, MigrationConfig::default())
            .await
            .unwrap();

        let id = service
            .get_volume_id(&VolumeSpec::new("[ds1] a.vmdk"))
            .await
            .unwrap();
        assert_eq!(id, "vol-known");
        assert_eq!(manager.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_path_registered_and_persisted() {
        let store = Arc::new(MemoryMigrationStore::new());
        let manager = Arc::new(FakeManager::default());
        let service = MigrationService::new(manager.clone(), store.clone(), MigrationConfig::default())
            .await
            .unwrap();

        let spec = VolumeSpec::new("[ds1] b.vmdk").with_policy("gold");
        let id = service.get_volume_id(&spec).await.unwrap();
        assert_eq!(id, "vol-0");
        assert_eq!(store.len(), 1);

        // Second lookup does not register again
        assert_eq!(service.get_volume_id(&spec).await.unwrap(), "vol-0");
        assert_eq!(manager.registrations.load(Ordering::SeqCst), 1);

        // Reverse lookup
        assert_eq!(service.get_volume_path("vol-0").await.unwrap(), spec);
    }

    #[tokio::test]
    async fn test_lookup_without_registration_fails() {
        let service = MigrationService::new(
            Arc::new(FakeManager::default()),
            Arc::new(MemoryMigrationStore::new()),
            MigrationConfig {
                register_on_demand: false,
            },
        )
        .await
        .unwrap();

        let result = service.get_volume_id(&VolumeSpec::new("[ds1] c.vmdk")).await;
        assert_matches!(result, Err(Error::VolumeMappingNotFound { .. }));
        assert_matches!(
            service.get_volume_path("vol-x").await,
            Err(Error::VolumePathNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_registration_failure_surfaces() {
        let manager = Arc::new(FakeManager {
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryMigrationStore::new());
        let service = MigrationService::new(manager, store.clone(), MigrationConfig::default())
            .await
            .unwrap();

        let result = service.get_volume_id(&VolumeSpec::new("[ds1] d.vmdk")).await;
        assert_matches!(result, Err(Error::BackendOperationFailed { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_volume_info() {
        let store = Arc::new(MemoryMigrationStore::with_records([MigrationRecord::new(
            "vol-1",
            &VolumeSpec::new("[ds1] a.vmdk"),
        )]));
        let service = MigrationService::new(
            Arc::new(FakeManager::default()),
            store.clone(),
            MigrationConfig {
                register_on_demand: false,
            },
        )
        .await
        .unwrap();

        service.delete_volume_info("vol-1").await.unwrap();
        assert!(service.is_empty());
        assert!(store.is_empty());
        assert_matches!(
            service.get_volume_id(&VolumeSpec::new("[ds1] a.vmdk")).await,
            Err(Error::VolumeMappingNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_cell_surfaces_construction_failure() {
        let cell = MigrationServiceCell::new();
        let first = cell
            .initialize(
                Arc::new(FakeManager::default()),
                Arc::new(BrokenStore),
                MigrationConfig::default(),
            )
            .await;
        assert_matches!(first, Err(Error::MigrationUnavailable(_)));

        // Idempotent: a later call with a healthy store sees the same failure
        let second = cell
            .initialize(
                Arc::new(FakeManager::default()),
                Arc::new(MemoryMigrationStore::new()),
                MigrationConfig::default(),
            )
            .await;
        assert_eq!(first.unwrap_err().to_string(), second.unwrap_err().to_string());
        assert!(cell.get().is_none());
    }

    #[tokio::test]
    async fn test_cell_returns_same_service() {
        let cell = MigrationServiceCell::new();
        let a = cell
            .initialize(
                Arc::new(FakeManager::default()),
                Arc::new(MemoryMigrationStore::new()),
                MigrationConfig::default(),
            )
            .await
            .unwrap();
        let b = cell
            .initialize(
                Arc::new(FakeManager::default()),
                Arc::new(MemoryMigrationStore::new()),
                MigrationConfig::default(),
            )
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
