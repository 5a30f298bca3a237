//! Error types for the Volume Metadata Syncer
//!
//! Provides structured error types for feature-state handling, candidate
//! discovery, volume migration and backend catalog queries.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the syncer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Backend Catalog Errors
    // =========================================================================
    #[error("Backend catalog connection error: {0}")]
    CatalogConnection(#[from] reqwest::Error),

    #[error("Backend query failed: {backend} - {reason}")]
    QueryFailed { backend: String, reason: String },

    #[error("Backend cursor did not advance: offset {offset} of {total_records}")]
    CursorStalled { offset: u64, total_records: u64 },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Migration Errors
    // =========================================================================
    #[error("Migration service unavailable: {0}")]
    MigrationUnavailable(String),

    #[error("No volume mapping for legacy volume path {volume_path}")]
    VolumeMappingNotFound { volume_path: String },

    #[error("No legacy volume mapping for volume ID {volume_id}")]
    VolumePathNotFound { volume_id: String },

    // =========================================================================
    // Input Rejection
    // =========================================================================
    #[error("storage class name not specified in PVC {claim}")]
    StorageClassNotSpecified { claim: String },

    #[error("Invalid feature state for {feature}: {value:?}")]
    InvalidFeatureState { feature: String, value: String },

    // =========================================================================
    // Sync Pass Errors
    // =========================================================================
    #[error("Full sync already in progress")]
    SyncInProgress,

    #[error("Informer caches have not finished their initial list")]
    CachesNotSynced,

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the periodic scheduler takes when a pass fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Try again on the next scheduled tick
    RetryNextTick,
    /// Try again after a specific duration
    RetryAfter(Duration),
    /// Do not retry until the configuration changes
    NoRetry,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - next tick
            Error::Kube(_)
            | Error::CatalogConnection(_)
            | Error::QueryFailed { .. }
            | Error::BackendOperationFailed { .. }
            | Error::Cancelled(_)
            | Error::CachesNotSynced
            | Error::Timeout(_) => ErrorAction::RetryNextTick,

            // Another pass holds the lock
            Error::SyncInProgress => ErrorAction::RetryAfter(Duration::from_secs(30)),

            // Misbehaving backend paginator - back off
            Error::CursorStalled { .. } => ErrorAction::RetryAfter(Duration::from_secs(300)),

            // Configuration/input errors - don't retry automatically
            Error::Configuration(_)
            | Error::Initialization(_)
            | Error::StorageClassNotSpecified { .. }
            | Error::InvalidFeatureState { .. }
            | Error::YamlParse(_) => ErrorAction::NoRetry,

            _ => ErrorAction::RetryNextTick,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::CatalogConnection(_)
                | Error::QueryFailed { .. }
                | Error::Timeout(_)
        )
    }
}

/// Result type alias for the syncer
pub type Result<T> = std::result::Result<T, Error>;
