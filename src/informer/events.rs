//! Informer Events
//!
//! Typed change events for watched ConfigMaps. Raw watch output is classified
//! into these variants once, at the informer boundary, so listeners never have
//! to re-check object kinds.

use crate::error::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use std::sync::Arc;

/// Namespace/name pair identifying a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a ConfigMap; missing metadata fields become empty strings
    pub fn of(cm: &ConfigMap) -> Self {
        Self {
            namespace: cm.metadata.namespace.clone().unwrap_or_default(),
            name: cm.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Change event for a ConfigMap
#[derive(Debug, Clone)]
pub enum ConfigMapEvent {
    /// First sighting of the object
    Added(Arc<ConfigMap>),

    /// The object changed
    Updated {
        old: Arc<ConfigMap>,
        new: Arc<ConfigMap>,
    },

    /// The object is gone; carries its last known state
    Deleted(Arc<ConfigMap>),
}

impl ConfigMapEvent {
    /// The object the event leaves behind (the new object for updates)
    pub fn object(&self) -> &ConfigMap {
        match self {
            ConfigMapEvent::Added(cm) => cm,
            ConfigMapEvent::Updated { new, .. } => new,
            ConfigMapEvent::Deleted(cm) => cm,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(self.object())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigMapEvent::Added(_) => "add",
            ConfigMapEvent::Updated { .. } => "update",
            ConfigMapEvent::Deleted(_) => "delete",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ConfigMapEvent::Deleted(_))
    }
}

/// Receiver of ConfigMap change events
pub trait ConfigMapListener: Send + Sync {
    fn on_config_map_event(&self, event: &ConfigMapEvent);
}

/// Something listeners can subscribe to for ConfigMap events
pub trait ConfigMapRegistrar: Send + Sync {
    fn add_config_map_listener(&self, listener: Arc<dyn ConfigMapListener>) -> Result<()>;
}
