//! VolumeMigration CRD
//!
//! Persists the mapping between a legacy in-tree volume path and the
//! canonical backend volume ID. One object per migrated volume, named by the
//! canonical ID.

use crate::domain::ports::MigrationRecord;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// VolumeMigration CRD
// =============================================================================

/// VolumeMigration records which backend volume a legacy volume path became.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "VolumeMigration",
    plural = "volumemigrations",
    shortname = "vmig",
    printcolumn = r#"{"name": "VolumeID", "type": "string", "jsonPath": ".spec.volumeId"}"#,
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.volumePath"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMigrationSpec {
    /// Canonical backend volume ID
    pub volume_id: String,

    /// Datastore path of the legacy disk
    pub volume_path: String,

    /// Storage policy the legacy disk was provisioned with
    #[serde(default)]
    pub storage_policy_name: Option<String>,

    /// When the mapping was recorded
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl VolumeMigration {
    /// Build the object for a mapping
    pub fn from_record(record: &MigrationRecord) -> Self {
        VolumeMigration::new(
            &object_name(&record.volume_id),
            VolumeMigrationSpec {
                volume_id: record.volume_id.clone(),
                volume_path: record.volume_path.clone(),
                storage_policy_name: record.storage_policy_name.clone(),
                recorded_at: Some(Utc::now()),
            },
        )
    }

    pub fn to_record(&self) -> MigrationRecord {
        MigrationRecord {
            volume_id: self.spec.volume_id.clone(),
            volume_path: self.spec.volume_path.clone(),
            storage_policy_name: self.spec.storage_policy_name.clone(),
        }
    }
}

/// Object name for a volume ID. Backend IDs are UUIDs; lowercase keeps them
/// valid DNS subdomain names.
pub fn object_name(volume_id: &str) -> String {
    volume_id.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_record_round_trip_keeps_mapping() {
        let record = MigrationRecord {
            volume_id: "6C8E4A1B-0000-4D2A-9F00-1234ABCD".into(),
            volume_path: "[ds1] kubevols/disk-1.vmdk".into(),
            storage_policy_name: Some("gold".into()),
        };
        let object = VolumeMigration::from_record(&record);

        assert_eq!(
            object.metadata.name.as_deref(),
            Some("6c8e4a1b-0000-4d2a-9f00-1234abcd")
        );
        assert_eq!(object.to_record(), record);
        assert!(object.spec.recorded_at.is_some());
    }

    #[test]
    fn test_crd_identity() {
        assert_eq!(VolumeMigration::kind(&()), "VolumeMigration");
        assert_eq!(VolumeMigration::group(&()), "storage.billyronks.io");
        assert_eq!(VolumeMigration::plural(&()), "volumemigrations");
    }
}
