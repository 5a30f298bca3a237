//! Custom Resource Definitions for the Volume Metadata Syncer
//!
//! This module contains all CRD types:
//! - VolumeMigration: legacy volume path to canonical volume ID mapping

pub mod volume_migration;

pub use volume_migration::*;
