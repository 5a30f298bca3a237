//! Feature State Module
//!
//! Feature gates read by every discovery and filtering decision, kept in sync
//! with a designated ConfigMap.

pub mod orchestrator;
pub mod store;

pub use orchestrator::{FeatureStateCell, FeatureStateOrchestrator, FeatureStatesConfigInfo};
pub use store::{FeatureStateSet, FeatureStateStore};
