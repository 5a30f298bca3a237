//! Migration Stores
//!
//! Persistence for the legacy-to-canonical volume mapping:
//! - [`KubeMigrationStore`]: one `VolumeMigration` object per mapping
//! - [`MemoryMigrationStore`]: process-local, for standalone runs

use crate::crd::{object_name, VolumeMigration};
use crate::domain::constants::FIELD_MANAGER;
use crate::domain::ports::{MigrationRecord, MigrationStore};
use crate::error::Result;
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Kubernetes-backed Store
// =============================================================================

/// Mapping store backed by cluster-scoped `VolumeMigration` objects
#[derive(Clone)]
pub struct KubeMigrationStore {
    api: Api<VolumeMigration>,
}

impl KubeMigrationStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl MigrationStore for KubeMigrationStore {
    async fn get(&self, volume_id: &str) -> Result<Option<MigrationRecord>> {
        let object = self.api.get_opt(&object_name(volume_id)).await?;
        Ok(object.map(|o| o.to_record()))
    }

    async fn put(&self, record: MigrationRecord) -> Result<()> {
        let object = VolumeMigration::from_record(&record);
        let name = object_name(&record.volume_id);
        self.api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await?;
        debug!(volume_id = %record.volume_id, path = %record.volume_path, "Stored volume migration mapping");
        Ok(())
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        match self
            .api
            .delete(&object_name(volume_id), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<MigrationRecord>> {
        let objects = self.api.list(&ListParams::default()).await?;
        Ok(objects.items.iter().map(VolumeMigration::to_record).collect())
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

/// Mapping store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryMigrationStore {
    records: RwLock<BTreeMap<String, MigrationRecord>>,
}

impl MemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = MigrationRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.volume_id.clone(), r))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MigrationStore for MemoryMigrationStore {
    async fn get(&self, volume_id: &str) -> Result<Option<MigrationRecord>> {
        Ok(self.records.read().get(volume_id).cloned())
    }

    async fn put(&self, record: MigrationRecord) -> Result<()> {
        self.records.write().insert(record.volume_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        self.records.write().remove(volume_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MigrationRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::VolumeSpec;

    #[tokio::test]
    async fn test_memory_store_operations() {
        let store = MemoryMigrationStore::new();
        let record = MigrationRecord::new("vol-1", &VolumeSpec::new("[ds1] a.vmdk"));

        store.put(record.clone()).await.unwrap();
        assert_eq!(store.get("vol-1").await.unwrap(), Some(record));
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete("vol-1").await.unwrap();
        assert!(store.get("vol-1").await.unwrap().is_none());

        // Deleting again is fine
        store.delete("vol-1").await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_store_seeded() {
        let store = MemoryMigrationStore::with_records([
            MigrationRecord::new("vol-1", &VolumeSpec::new("[ds1] a.vmdk")),
            MigrationRecord::new("vol-2", &VolumeSpec::new("[ds1] b.vmdk").with_policy("gold")),
        ]);

        let listed = tokio_test::block_on(store.list()).unwrap();
        assert_eq!(listed.len(), 2);

        let record = tokio_test::assert_ok!(tokio_test::block_on(store.get("vol-2")));
        assert_eq!(
            record.and_then(|r| r.storage_policy_name),
            Some("gold".to_string())
        );
    }
}
