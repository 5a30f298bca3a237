//! Informer Module
//!
//! Cached, eventually-consistent mirrors of cluster state plus typed
//! ConfigMap change callbacks.

pub mod events;
pub mod manager;
pub mod snapshot;

pub use events::{ConfigMapEvent, ConfigMapListener, ConfigMapRegistrar, ObjectKey};
pub use manager::InformerManager;
pub use snapshot::ClusterSnapshot;
