//! Volume Migration Module
//!
//! Identity resolution between legacy in-tree volumes and canonical backend
//! volume IDs.

pub mod service;
pub mod store;

pub use service::{MigrationConfig, MigrationService, MigrationServiceCell};
pub use store::{KubeMigrationStore, MemoryMigrationStore};
