//! Candidate Discovery
//!
//! Selects the volumes a reconciliation pass has to look at, from a cached
//! listing of cluster objects and the live feature gates. Discovery never
//! fails as a whole because of one object: unresolvable items are reported
//! alongside the result and left out of it.

use crate::domain::constants::{
    ANN_DYNAMICALLY_PROVISIONED, ANN_MIGRATED_TO, FEATURE_CSI_MIGRATION, FEATURE_VOLUME_HEALTH,
};
use crate::domain::ports::{ClusterCache, FeatureGate, VolumeMigrationService, VolumeSpec};
use crate::error::{Error, Result};
use crate::informer::events::ObjectKey;
use crate::syncer::predicates::{
    csi_volume_handle, is_csi_volume, is_valid_legacy_volume, legacy_volume_spec, VolumePhase,
};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod, Volume};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

// =============================================================================
// Discovery Results
// =============================================================================

/// An object left out of a discovery result, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub object: String,
    pub reason: String,
}

/// Items found by a discovery pass plus the ones it had to skip
#[derive(Debug, Clone, Default)]
pub struct Discovery<T> {
    pub items: T,
    pub skipped: Vec<SkippedItem>,
}

/// Cluster volume selected for reconciliation
#[derive(Debug, Clone)]
pub struct VolumeCandidate {
    pub name: String,
    /// CSI driver named in the volume source, if any
    pub driver: Option<String>,
    pub phase: VolumePhase,
    /// Backend volume ID for volumes served by this driver
    pub volume_handle: Option<String>,
    /// Locator for volumes still in the legacy format
    pub legacy: Option<VolumeSpec>,
    pub provisioned_by: Option<String>,
    pub migrated_to: Option<String>,
    /// Claim bound to the volume
    pub claim: Option<ObjectKey>,
    pub volume: Arc<PersistentVolume>,
}

impl VolumeCandidate {
    pub fn from_volume(pv: Arc<PersistentVolume>) -> Self {
        let annotations = pv.metadata.annotations.as_ref();
        let spec = pv.spec.as_ref();
        Self {
            name: pv.metadata.name.clone().unwrap_or_default(),
            driver: spec.and_then(|s| s.csi.as_ref()).map(|c| c.driver.clone()),
            phase: VolumePhase::of(&pv),
            volume_handle: csi_volume_handle(&pv).map(str::to_string),
            legacy: legacy_volume_spec(&pv),
            provisioned_by: annotations
                .and_then(|a| a.get(ANN_DYNAMICALLY_PROVISIONED))
                .cloned(),
            migrated_to: annotations.and_then(|a| a.get(ANN_MIGRATED_TO)).cloned(),
            claim: spec
                .and_then(|s| s.claim_ref.as_ref())
                .and_then(|c| Some(ObjectKey::new(c.namespace.clone()?, c.name.clone()?))),
            volume: pv,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy.is_some()
    }
}

/// Legacy volume written inline in a pod spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineVolume {
    pub spec: VolumeSpec,
    /// Pod declaring the volume
    pub pod: ObjectKey,
    /// Volume name inside the pod spec
    pub volume_name: String,
}

// =============================================================================
// Volume Discovery
// =============================================================================

/// Owned by this driver, or (with migration on) a validly migrated legacy volume
fn is_owned(pv: &PersistentVolume, migration_enabled: bool) -> bool {
    is_csi_volume(pv)
        || (migration_enabled
            && legacy_volume_spec(pv).is_some()
            && is_valid_legacy_volume(&pv.metadata))
}

/// Volumes in Bound, Available or Released phase that this driver owns
pub fn volumes_in_bound_available_or_released(
    cache: &dyn ClusterCache,
    features: &dyn FeatureGate,
) -> Vec<VolumeCandidate> {
    debug!("FullSync: Getting all PVs in Bound, Available or Released state");
    let migration_enabled = features.is_enabled(FEATURE_CSI_MIGRATION);

    cache
        .list_volumes()
        .into_iter()
        .filter(|pv| is_owned(pv, migration_enabled))
        .filter(|pv| {
            let phase = VolumePhase::of(pv);
            debug!(pv = ?pv.metadata.name, %phase, "FullSync: pv phase");
            phase.is_syncable()
        })
        .map(VolumeCandidate::from_volume)
        .collect()
}

/// Bound volumes to report health for. Empty while volume health is disabled.
pub fn volume_health_candidates(
    cache: &dyn ClusterCache,
    features: &dyn FeatureGate,
) -> Vec<VolumeCandidate> {
    if !features.is_enabled(FEATURE_VOLUME_HEALTH) {
        return Vec::new();
    }
    bound_volumes(cache)
}

/// Bound volumes served by this driver, for the volume health path
pub fn bound_volumes(cache: &dyn ClusterCache) -> Vec<VolumeCandidate> {
    cache
        .list_volumes()
        .into_iter()
        .filter(|pv| is_csi_volume(pv))
        .filter(|pv| {
            let phase = VolumePhase::of(pv);
            debug!(
                pv = ?pv.metadata.name,
                volume_handle = ?csi_volume_handle(pv),
                %phase,
                "bound_volumes: pv phase"
            );
            phase == VolumePhase::Bound
        })
        .map(VolumeCandidate::from_volume)
        .collect()
}

// =============================================================================
// Inline Volume Discovery
// =============================================================================

/// Legacy volumes written inline in pod specs, keyed by canonical volume ID.
/// Empty unless migration is enabled.
pub async fn inline_migrated_volumes(
    cache: &dyn ClusterCache,
    migration: &dyn VolumeMigrationService,
    migration_enabled: bool,
    cancel: &CancellationToken,
) -> Result<Discovery<BTreeMap<String, InlineVolume>>> {
    let mut discovery = Discovery::<BTreeMap<String, InlineVolume>>::default();
    if !migration_enabled {
        return Ok(discovery);
    }

    for pod in cache.list_pods() {
        let pod_key = ObjectKey::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        let volumes = pod.spec.as_ref().and_then(|s| s.volumes.as_ref());
        for volume in volumes.into_iter().flatten() {
            let Some(source) = volume.vsphere_volume.as_ref() else {
                continue;
            };
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("inline volume discovery".into()));
            }

            let spec = VolumeSpec {
                volume_path: source.volume_path.clone(),
                storage_policy_name: source.storage_policy_name.clone(),
            };
            match migration.get_volume_id(&spec).await {
                Ok(volume_id) => {
                    discovery.items.insert(
                        volume_id,
                        InlineVolume {
                            spec,
                            pod: pod_key.clone(),
                            volume_name: volume.name.clone(),
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        pod = %pod_key,
                        volume_path = %spec.volume_path,
                        error = %e,
                        "FullSync: Failed to get VolumeID from volume migration service"
                    );
                    discovery.skipped.push(SkippedItem {
                        object: format!("{}/{}", pod_key, volume.name),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(discovery)
}

// =============================================================================
// Pod Volume Validation
// =============================================================================

/// Whether a claim-backed pod volume is eligible for metadata sync.
///
/// Returns the bound volume and claim when it is. Legacy volumes are
/// rejected with a warning while migration is disabled.
pub fn is_valid_volume(
    cache: &dyn ClusterCache,
    features: &dyn FeatureGate,
    volume: &Volume,
    pod: &Pod,
) -> Option<(Arc<PersistentVolume>, Arc<PersistentVolumeClaim>)> {
    let claim_name = &volume.persistent_volume_claim.as_ref()?.claim_name;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

    let Some(pvc) = cache.get_claim(namespace, claim_name) else {
        error!(volume = %volume.name, claim = %claim_name, "Error getting Persistent Volume Claim for volume");
        return None;
    };

    let pv_name = pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .unwrap_or_default();
    let Some(pv) = cache.get_volume(pv_name) else {
        error!(volume = %volume.name, claim = %claim_name, "Error getting Persistent Volume for PVC");
        return None;
    };

    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    if legacy_volume_spec(&pv).is_some() {
        if !features.is_enabled(FEATURE_CSI_MIGRATION) {
            warn!(
                pv = pv_name,
                pod = pod_name,
                "{} feature switch is disabled. Cannot update vSphere volume metadata",
                FEATURE_CSI_MIGRATION
            );
            return None;
        }
        return Some((pv, pvc));
    }

    if !is_csi_volume(&pv) {
        debug!(pod = pod_name, pv = pv_name, "Pod does not have a valid volume. Ignoring the pod update");
        return None;
    }
    Some((pv, pvc))
}
