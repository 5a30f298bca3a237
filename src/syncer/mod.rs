//! Syncer Module
//!
//! Full-sync candidate discovery, validity predicates, the paginated catalog
//! query engine and the pass driver that composes them.

pub mod discovery;
pub mod fullsync;
pub mod predicates;
pub mod query;

pub use discovery::{
    bound_volumes, inline_migrated_volumes, is_valid_volume, volume_health_candidates,
    volumes_in_bound_available_or_released, Discovery, InlineVolume, SkippedItem,
    VolumeCandidate,
};
pub use fullsync::{FullSync, FullSyncConfig, FullSyncPlan};
pub use predicates::{
    has_migrated_to_annotation_update, is_multi_attach_allowed, is_valid_legacy_claim,
    is_valid_legacy_volume, object_key, storage_class_name, VolumePhase,
};
pub use query::query_all_pages;
