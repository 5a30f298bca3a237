//! Sync Metrics
//!
//! Prometheus instruments for full-sync passes and feature-state reloads.
//! Registered against an explicit registry so tests can use a private one;
//! the binary registers against the default registry served on `/metrics`.

use crate::error::{Error, Result};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Instruments shared by the full-sync driver
#[derive(Clone)]
pub struct SyncMetrics {
    pub passes_started: IntCounter,
    pub passes_failed: IntCounterVec,
    pub pass_duration: Histogram,
    pub catalog_pages: IntCounter,
    pub skipped_items: IntCounter,
    pub missing_in_catalog: IntGauge,
    pub unknown_to_cluster: IntGauge,
    pub feature_state_generation: IntGauge,
}

impl SyncMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            passes_started: IntCounter::new(
                "volume_syncer_full_sync_passes_total",
                "Total number of full-sync passes started",
            )
            .map_err(metric_error)?,
            passes_failed: IntCounterVec::new(
                Opts::new(
                    "volume_syncer_full_sync_failures_total",
                    "Full-sync passes that failed, by reason",
                ),
                &["reason"],
            )
            .map_err(metric_error)?,
            pass_duration: Histogram::with_opts(HistogramOpts::new(
                "volume_syncer_full_sync_duration_seconds",
                "Duration of full-sync passes",
            ))
            .map_err(metric_error)?,
            catalog_pages: IntCounter::new(
                "volume_syncer_catalog_pages_total",
                "Backend catalog pages fetched",
            )
            .map_err(metric_error)?,
            skipped_items: IntCounter::new(
                "volume_syncer_discovery_skipped_total",
                "Objects skipped during candidate discovery",
            )
            .map_err(metric_error)?,
            missing_in_catalog: IntGauge::new(
                "volume_syncer_volumes_missing_in_catalog",
                "Cluster volumes absent from the backend catalog in the last pass",
            )
            .map_err(metric_error)?,
            unknown_to_cluster: IntGauge::new(
                "volume_syncer_volumes_unknown_to_cluster",
                "Catalog volumes with no cluster counterpart in the last pass",
            )
            .map_err(metric_error)?,
            feature_state_generation: IntGauge::new(
                "volume_syncer_feature_state_generation",
                "Number of feature-state changes applied",
            )
            .map_err(metric_error)?,
        };

        registry
            .register(Box::new(metrics.passes_started.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.passes_failed.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.pass_duration.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.catalog_pages.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.skipped_items.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.missing_in_catalog.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.unknown_to_cluster.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(metrics.feature_state_generation.clone()))
            .map_err(metric_error)?;

        Ok(metrics)
    }

    /// Instruments on a throwaway registry
    pub fn unregistered() -> Result<Self> {
        Self::register(&Registry::new())
    }

    pub fn record_failure(&self, error: &Error) {
        self.passes_failed
            .with_label_values(&[failure_reason(error)])
            .inc();
    }
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}

fn failure_reason(error: &Error) -> &'static str {
    match error {
        Error::SyncInProgress => "in_progress",
        Error::CachesNotSynced => "caches_not_synced",
        Error::Cancelled(_) => "cancelled",
        Error::Timeout(_) => "timeout",
        Error::CursorStalled { .. } => "cursor_stalled",
        Error::QueryFailed { .. } | Error::CatalogConnection(_) => "catalog",
        Error::Kube(_) => "kubernetes",
        _ => "other",
    }
}
