//! Cluster Snapshot
//!
//! Point-in-time copy of the volume, claim and pod caches. A discovery pass
//! runs against one snapshot so every lookup in the pass sees the same state.

use crate::domain::ports::ClusterCache;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable listing of cluster objects
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    volumes: BTreeMap<String, Arc<PersistentVolume>>,
    claims: BTreeMap<(String, String), Arc<PersistentVolumeClaim>>,
    pods: Vec<Arc<Pod>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from cached listings. Objects without a name are dropped.
    pub fn from_parts(
        volumes: Vec<Arc<PersistentVolume>>,
        claims: Vec<Arc<PersistentVolumeClaim>>,
        pods: Vec<Arc<Pod>>,
    ) -> Self {
        let mut snapshot = Self {
            pods,
            ..Self::default()
        };
        for pv in volumes {
            snapshot.insert_volume(pv);
        }
        for pvc in claims {
            snapshot.insert_claim(pvc);
        }
        snapshot
    }

    pub fn with_volume(mut self, pv: PersistentVolume) -> Self {
        self.insert_volume(Arc::new(pv));
        self
    }

    pub fn with_claim(mut self, pvc: PersistentVolumeClaim) -> Self {
        self.insert_claim(Arc::new(pvc));
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.push(Arc::new(pod));
        self
    }

    fn insert_volume(&mut self, pv: Arc<PersistentVolume>) {
        if let Some(name) = pv.metadata.name.clone() {
            self.volumes.insert(name, pv);
        }
    }

    fn insert_claim(&mut self, pvc: Arc<PersistentVolumeClaim>) {
        if let Some(name) = pvc.metadata.name.clone() {
            let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
            self.claims.insert((namespace, name), pvc);
        }
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }
}

impl ClusterCache for ClusterSnapshot {
    fn list_volumes(&self) -> Vec<Arc<PersistentVolume>> {
        self.volumes.values().cloned().collect()
    }

    fn list_claims(&self) -> Vec<Arc<PersistentVolumeClaim>> {
        self.claims.values().cloned().collect()
    }

    fn list_pods(&self) -> Vec<Arc<Pod>> {
        self.pods.clone()
    }

    fn get_volume(&self, name: &str) -> Option<Arc<PersistentVolume>> {
        self.volumes.get(name).cloned()
    }

    fn get_claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}
