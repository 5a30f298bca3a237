//! Volume Metadata Syncer
//!
//! Keeps a cluster's declarative volume objects and a storage backend's
//! volume catalog consistent, including volumes still being migrated from
//! the legacy in-tree representation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Informer Manager                                │
//! │   PV / PVC / Pod reflectors           feature-states ConfigMap watcher  │
//! └───────────────┬──────────────────────────────────────┬──────────────────┘
//!                 │ snapshot                              │ ConfigMapEvent
//!                 ▼                                       ▼
//! ┌───────────────────────────────┐       ┌─────────────────────────────────┐
//! │      Candidate Discovery      │◄──────│   Feature State Orchestrator    │
//! │  phase / bound / inline scans │ gates │   (atomic FeatureStateSet swap) │
//! └───────────────┬───────────────┘       └─────────────────────────────────┘
//!                 │ legacy locators
//!                 ▼
//! ┌───────────────────────────────┐       ┌─────────────────────────────────┐
//! │   Volume Migration Service    │──────►│      VolumeMigration CRD        │
//! └───────────────┬───────────────┘       └─────────────────────────────────┘
//!                 │ volume IDs
//!                 ▼
//! ┌───────────────────────────────┐       ┌─────────────────────────────────┐
//! │     Full Sync Query Engine    │──────►│     Backend Volume Catalog      │
//! │   (sequential cursor paging)  │       │            (HTTP)               │
//! └───────────────────────────────┘       └─────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`informer`]: Cached cluster objects and typed ConfigMap events
//! - [`featurestate`]: Feature gates driven by a watched ConfigMap
//! - [`migration`]: Legacy volume path to backend volume ID resolution
//! - [`syncer`]: Candidate discovery, predicates, catalog paging, full sync
//! - [`backend`]: Backend catalog client
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod backend;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod featurestate;
pub mod informer;
pub mod metrics;
pub mod migration;
pub mod syncer;

// Re-export commonly used types
pub use backend::{CatalogClient, CatalogConfig};

pub use config::SyncerConfig;

pub use crd::{VolumeMigration, VolumeMigrationSpec};

pub use domain::ports::{
    CatalogVolume, ClusterCache, ConfigMapSource, Cursor, FeatureGate, MigrationRecord,
    MigrationStore, QueryFilter, QueryResult, VolumeManager, VolumeMigrationService, VolumeSpec,
};

pub use error::{Error, ErrorAction, Result};

pub use featurestate::{
    FeatureStateCell, FeatureStateOrchestrator, FeatureStateSet, FeatureStatesConfigInfo,
};

pub use informer::{ClusterSnapshot, ConfigMapEvent, ConfigMapListener, InformerManager};

pub use metrics::SyncMetrics;

pub use migration::{
    KubeMigrationStore, MemoryMigrationStore, MigrationConfig, MigrationService,
    MigrationServiceCell,
};

pub use syncer::{FullSync, FullSyncConfig, FullSyncPlan, SkippedItem, VolumeCandidate};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
