//! Full Sync Driver
//!
//! Runs one reconciliation pass end to end: snapshot the caches, discover
//! candidates, resolve their backend IDs, page through the catalog and
//! compare. The result is a [`FullSyncPlan`]; issuing corrective writes is
//! left to the caller.
//!
//! Passes are single-flight. A pass that overlaps another fails fast with
//! [`Error::SyncInProgress`] instead of starting a second paginated reader.
//!
//! A catalog volume is only reported as unknown to the cluster when every
//! driver-owned and legacy volume in the snapshot could be attributed to a
//! backend ID. Otherwise the pass withholds the whole orphan list.

use crate::domain::constants::{FEATURE_CSI_MIGRATION, QUERY_VOLUME_LIMIT};
use crate::domain::ports::ClusterCache;
use crate::domain::ports::{
    CatalogVolume, ClusterCacheRef, FeatureGateRef, VolumeManagerRef, VolumeMigrationServiceRef,
};
use crate::error::{Error, ErrorAction, Result};
use crate::informer::ClusterSnapshot;
use crate::metrics::SyncMetrics;
use crate::syncer::discovery::{
    inline_migrated_volumes, volume_health_candidates, volumes_in_bound_available_or_released,
    Discovery, InlineVolume, SkippedItem,
};
use crate::syncer::predicates::{csi_volume_handle, is_csi_volume, legacy_volume_spec};
use crate::syncer::query::query_all_pages;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Full-sync pass settings
#[derive(Debug, Clone)]
pub struct FullSyncConfig {
    /// Restricts catalog queries to volumes tagged with this cluster
    pub cluster_id: Option<String>,
    /// Catalog page size
    pub query_limit: u64,
    /// Upper bound for a whole pass
    pub pass_timeout: Duration,
    /// Period between scheduled passes
    pub interval: Duration,
}

impl Default for FullSyncConfig {
    fn default() -> Self {
        Self {
            cluster_id: None,
            query_limit: QUERY_VOLUME_LIMIT,
            pass_timeout: Duration::from_secs(300),
            interval: Duration::from_secs(1800),
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Outcome of one pass
#[derive(Debug, Clone, Default)]
pub struct FullSyncPlan {
    /// Volumes the pass looked at
    pub candidates: usize,
    /// Volume ID to PersistentVolume name, for cluster volumes the catalog lacks
    pub missing_in_catalog: BTreeMap<String, String>,
    /// Catalog volumes with no cluster counterpart
    pub unknown_to_cluster: Vec<CatalogVolume>,
    /// Set when some cluster volume had no backend ID, which leaves
    /// `unknown_to_cluster` empty for the pass
    pub orphans_suppressed: bool,
    /// Inline legacy volumes found in pods, by volume ID
    pub inline_volumes: BTreeMap<String, InlineVolume>,
    /// Bound volumes due a health report
    pub health_candidates: usize,
    pub skipped: Vec<SkippedItem>,
    /// Catalog pages fetched
    pub pages: usize,
}

impl FullSyncPlan {
    pub fn is_in_sync(&self) -> bool {
        self.missing_in_catalog.is_empty() && self.unknown_to_cluster.is_empty()
    }
}

/// Count cluster volumes whose backend ID the pass does not know.
///
/// Every legacy PersistentVolume not resolved as a candidate counts, as do
/// inline pod volumes that were skipped. `inline_skipped` is `None` when
/// inline discovery did not run, in which case every inline volume counts.
fn unattributed_volumes(
    cache: &dyn ClusterCache,
    resolved_legacy: usize,
    inline_skipped: Option<usize>,
) -> usize {
    let legacy = cache
        .list_volumes()
        .iter()
        .filter(|pv| legacy_volume_spec(pv).is_some())
        .count();
    let inline = inline_skipped.unwrap_or_else(|| {
        cache
            .list_pods()
            .iter()
            .filter_map(|pod| pod.spec.as_ref()?.volumes.as_ref())
            .flatten()
            .filter(|v| v.vsphere_volume.is_some())
            .count()
    });
    legacy.saturating_sub(resolved_legacy) + inline
}

// =============================================================================
// Driver
// =============================================================================

pub struct FullSync {
    config: FullSyncConfig,
    cache: ClusterCacheRef,
    features: FeatureGateRef,
    migration: Option<VolumeMigrationServiceRef>,
    manager: VolumeManagerRef,
    metrics: SyncMetrics,
    pass_lock: Mutex<()>,
}

impl FullSync {
    pub fn new(
        config: FullSyncConfig,
        cache: ClusterCacheRef,
        features: FeatureGateRef,
        migration: Option<VolumeMigrationServiceRef>,
        manager: VolumeManagerRef,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            config,
            cache,
            features,
            migration,
            manager,
            metrics,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &FullSyncConfig {
        &self.config
    }

    /// Run one pass, bounded by the configured timeout
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<FullSyncPlan> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            return Err(Error::SyncInProgress);
        };

        self.metrics.passes_started.inc();
        self.metrics
            .feature_state_generation
            .set(self.features.generation() as i64);
        let timer = self.metrics.pass_duration.start_timer();

        let pass_cancel = cancel.child_token();
        let result = match tokio::time::timeout(self.config.pass_timeout, self.pass(&pass_cancel)).await {
            Ok(result) => result,
            Err(_) => {
                pass_cancel.cancel();
                Err(Error::Timeout(self.config.pass_timeout))
            }
        };
        timer.observe_duration();

        match &result {
            Ok(plan) => {
                self.metrics.catalog_pages.inc_by(plan.pages as u64);
                self.metrics.skipped_items.inc_by(plan.skipped.len() as u64);
                self.metrics
                    .missing_in_catalog
                    .set(plan.missing_in_catalog.len() as i64);
                self.metrics
                    .unknown_to_cluster
                    .set(plan.unknown_to_cluster.len() as i64);
                info!(
                    candidates = plan.candidates,
                    missing_in_catalog = plan.missing_in_catalog.len(),
                    unknown_to_cluster = plan.unknown_to_cluster.len(),
                    orphans_suppressed = plan.orphans_suppressed,
                    inline = plan.inline_volumes.len(),
                    skipped = plan.skipped.len(),
                    pages = plan.pages,
                    "FullSync: pass complete"
                );
            }
            Err(e) => self.metrics.record_failure(e),
        }
        result
    }

    async fn pass(&self, cancel: &CancellationToken) -> Result<FullSyncPlan> {
        if !self.cache.is_synced() {
            return Err(Error::CachesNotSynced);
        }
        let snapshot = ClusterSnapshot::from_parts(
            self.cache.list_volumes(),
            self.cache.list_claims(),
            self.cache.list_pods(),
        );
        let migration_enabled = self.features.is_enabled(FEATURE_CSI_MIGRATION);
        debug!(
            volumes = snapshot.volume_count(),
            pods = snapshot.pod_count(),
            migration_enabled,
            "FullSync: starting pass"
        );

        let candidates = volumes_in_bound_available_or_released(&snapshot, self.features.as_ref());
        let mut plan = FullSyncPlan {
            candidates: candidates.len(),
            health_candidates: volume_health_candidates(&snapshot, self.features.as_ref()).len(),
            ..Default::default()
        };

        // Volume ID -> PV name for every candidate with a known backend ID
        let mut cluster_volumes = BTreeMap::new();
        let mut resolved_legacy = 0;
        for candidate in &candidates {
            if let Some(handle) = &candidate.volume_handle {
                cluster_volumes.insert(handle.clone(), candidate.name.clone());
                continue;
            }
            let Some(spec) = &candidate.legacy else {
                continue;
            };
            let Some(migration) = &self.migration else {
                plan.skipped.push(SkippedItem {
                    object: candidate.name.clone(),
                    reason: "volume migration service not initialized".into(),
                });
                continue;
            };
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("volume ID resolution".into()));
            }
            match migration.get_volume_id(spec).await {
                Ok(volume_id) => {
                    cluster_volumes.insert(volume_id, candidate.name.clone());
                    resolved_legacy += 1;
                }
                Err(e) => {
                    warn!(pv = %candidate.name, error = %e, "FullSync: Failed to get VolumeID for legacy volume");
                    plan.skipped.push(SkippedItem {
                        object: candidate.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let inline = match &self.migration {
            Some(migration) => {
                inline_migrated_volumes(&snapshot, migration.as_ref(), migration_enabled, cancel)
                    .await?
            }
            None => Discovery::default(),
        };
        let inline_skipped =
            (migration_enabled && self.migration.is_some()).then_some(inline.skipped.len());
        plan.inline_volumes = inline.items;
        plan.skipped.extend(inline.skipped);

        let unattributed = unattributed_volumes(&snapshot, resolved_legacy, inline_skipped);

        let pages = query_all_pages(
            &[],
            self.config.cluster_id.as_deref(),
            self.manager.as_ref(),
            self.config.query_limit,
            cancel,
        )
        .await?;
        plan.pages = pages.len();

        let mut catalog: BTreeMap<String, CatalogVolume> = BTreeMap::new();
        for volume in pages.into_iter().flat_map(|p| p.volumes) {
            catalog.insert(volume.volume_id.clone(), volume);
        }

        plan.missing_in_catalog = cluster_volumes
            .iter()
            .filter(|(id, _)| !catalog.contains_key(*id))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();

        if unattributed > 0 {
            warn!(
                unattributed,
                migration_enabled,
                "FullSync: some cluster volumes have no backend ID, not reporting catalog orphans"
            );
            plan.orphans_suppressed = true;
            return Ok(plan);
        }

        // Driver-owned volumes in any phase still belong to the cluster
        let owned: BTreeSet<String> = snapshot
            .list_volumes()
            .iter()
            .filter(|pv| is_csi_volume(pv))
            .filter_map(|pv| csi_volume_handle(pv).map(str::to_string))
            .collect();
        plan.unknown_to_cluster = catalog
            .into_values()
            .filter(|v| {
                !cluster_volumes.contains_key(&v.volume_id)
                    && !plan.inline_volumes.contains_key(&v.volume_id)
                    && !owned.contains(&v.volume_id)
            })
            .collect();

        Ok(plan)
    }

    /// Run passes on the configured interval until `cancel` fires
    pub async fn run_periodic(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.config.interval, "FullSync: periodic sync started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_once(&cancel).await {
                match e.action() {
                    ErrorAction::RetryAfter(delay) => {
                        warn!(error = %e, ?delay, "FullSync: pass failed, delaying next attempt");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    _ => error!(error = %e, "FullSync: pass failed, retrying on next tick"),
                }
            }
        }
        info!("FullSync: periodic sync stopped");
    }
}
