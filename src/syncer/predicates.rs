//! Validity Predicates
//!
//! Pure classification of cluster objects, shared by candidate discovery and
//! the reconciler. Nothing here touches the cluster or the backend.

use crate::domain::constants::{
    ANN_DYNAMICALLY_PROVISIONED, ANN_MIGRATED_TO, ANN_STORAGE_CLASS, ANN_STORAGE_PROVISIONER,
    CSI_DRIVER_NAME, IN_TREE_PLUGIN_NAME,
};
use crate::domain::ports::VolumeSpec;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Volume Phase
// =============================================================================

/// Lifecycle phase of a PersistentVolume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumePhase {
    Pending,
    Available,
    Bound,
    Released,
    Failed,
    Unknown,
}

impl VolumePhase {
    pub fn of(pv: &PersistentVolume) -> Self {
        let phase = pv.status.as_ref().and_then(|s| s.phase.as_deref());
        match phase {
            Some("Pending") => VolumePhase::Pending,
            Some("Available") => VolumePhase::Available,
            Some("Bound") => VolumePhase::Bound,
            Some("Released") => VolumePhase::Released,
            Some("Failed") => VolumePhase::Failed,
            _ => VolumePhase::Unknown,
        }
    }

    /// Phases a full sync reconciles
    pub fn is_syncable(&self) -> bool {
        matches!(
            self,
            VolumePhase::Bound | VolumePhase::Available | VolumePhase::Released
        )
    }
}

impl std::fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumePhase::Pending => write!(f, "Pending"),
            VolumePhase::Available => write!(f, "Available"),
            VolumePhase::Bound => write!(f, "Bound"),
            VolumePhase::Released => write!(f, "Released"),
            VolumePhase::Failed => write!(f, "Failed"),
            VolumePhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// Volume Kind
// =============================================================================

/// Whether a volume is served by this driver
pub fn is_csi_volume(pv: &PersistentVolume) -> bool {
    csi_volume_handle(pv).is_some()
}

/// Backend volume ID of a volume owned by this driver
pub fn csi_volume_handle(pv: &PersistentVolume) -> Option<&str> {
    pv.spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .filter(|csi| csi.driver == CSI_DRIVER_NAME)
        .map(|csi| csi.volume_handle.as_str())
}

/// Locator of a volume still described in the legacy in-tree format
pub fn legacy_volume_spec(pv: &PersistentVolume) -> Option<VolumeSpec> {
    pv.spec
        .as_ref()
        .and_then(|s| s.vsphere_volume.as_ref())
        .map(|v| VolumeSpec {
            volume_path: v.volume_path.clone(),
            storage_policy_name: v.storage_policy_name.clone(),
        })
}

pub fn is_legacy_volume(pv: &PersistentVolume) -> bool {
    pv.spec
        .as_ref()
        .map_or(false, |s| s.vsphere_volume.is_some())
}

// =============================================================================
// Migration Annotations
// =============================================================================

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// Shared rule for claims and volumes. With a migrated-to annotation the
/// object must point at this driver and have come from the in-tree plugin;
/// without one, `provisioner_key` must name this driver directly.
fn is_valid_legacy_object(meta: &ObjectMeta, provisioner_key: &str, kind: &str) -> bool {
    let provisioner = annotation(meta, provisioner_key);
    match annotation(meta, ANN_MIGRATED_TO) {
        Some(migrated_to) => {
            if migrated_to == CSI_DRIVER_NAME && provisioner == Some(IN_TREE_PLUGIN_NAME) {
                debug!(
                    "{} annotation found with value {:?} for {}: {:?}",
                    ANN_MIGRATED_TO,
                    CSI_DRIVER_NAME,
                    kind,
                    name_of(meta)
                );
                return true;
            }
            false
        }
        None => {
            if provisioner == Some(CSI_DRIVER_NAME) {
                debug!(
                    "{} annotation found with value {:?} for {}: {:?}",
                    provisioner_key,
                    CSI_DRIVER_NAME,
                    kind,
                    name_of(meta)
                );
                return true;
            }
            false
        }
    }
}

/// A claim migrated from the in-tree plugin, or provisioned by this driver
pub fn is_valid_legacy_claim(meta: &ObjectMeta) -> bool {
    is_valid_legacy_object(meta, ANN_STORAGE_PROVISIONER, "PVC")
}

/// A volume migrated from the in-tree plugin, or provisioned by this driver
pub fn is_valid_legacy_volume(meta: &ObjectMeta) -> bool {
    is_valid_legacy_object(meta, ANN_DYNAMICALLY_PROVISIONED, "PV")
}

/// True when the migrated-to annotation appears in `new` but was absent in `prev`
pub fn has_migrated_to_annotation_update(
    prev: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
    object_name: &str,
) -> bool {
    if new.contains_key(ANN_MIGRATED_TO) && !prev.contains_key(ANN_MIGRATED_TO) {
        debug!("Received {} annotation update for {:?}", ANN_MIGRATED_TO, object_name);
        return true;
    }
    debug!("{} annotation not found for {:?}", ANN_MIGRATED_TO, object_name);
    false
}

// =============================================================================
// Claim Helpers
// =============================================================================

/// Storage class of a claim: `spec.storageClassName`, else the beta annotation
pub fn storage_class_name(pvc: &PersistentVolumeClaim) -> Result<String> {
    let structured = pvc
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref())
        .filter(|name| !name.is_empty());
    if let Some(name) = structured {
        return Ok(name.to_string());
    }

    match annotation(&pvc.metadata, ANN_STORAGE_CLASS) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(Error::StorageClassNotSpecified {
            claim: object_key(&pvc.metadata),
        }),
    }
}

/// `namespace/name`, or just `name` for cluster-scoped objects
pub fn object_key(meta: &ObjectMeta) -> String {
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name_of(meta)),
        _ => name_of(meta).to_string(),
    }
}

// =============================================================================
// Access Modes
// =============================================================================

/// Whether a volume can be attached to more than one node
pub fn is_multi_attach_allowed(pv: Option<&PersistentVolume>) -> bool {
    let Some(pv) = pv else {
        return false;
    };
    pv.spec
        .as_ref()
        .and_then(|s| s.access_modes.as_ref())
        .map_or(false, |modes| {
            modes
                .iter()
                .any(|m| m == "ReadWriteMany" || m == "ReadOnlyMany")
        })
}
