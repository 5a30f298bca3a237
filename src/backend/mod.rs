//! Backend Module
//!
//! Adapters for the storage backend's volume catalog.

pub mod catalog;

pub use catalog::{CatalogClient, CatalogConfig};
