//! Feature State Orchestrator
//!
//! Process-wide owner of the feature-state set. Seeds the set from the
//! designated ConfigMap at startup and keeps it current from watch events:
//! - add/update replace the set wholesale with the ConfigMap data
//! - delete flips every known feature to disabled, keeping the keys
//!
//! Exactly one orchestrator is built per [`FeatureStateCell`]; every caller of
//! [`FeatureStateCell::initialize`] receives the same handle or the same error.

use crate::domain::ports::{ConfigMapSource, FeatureGate};
use crate::error::{Error, Result};
use crate::featurestate::store::{FeatureStateSet, FeatureStateStore};
use crate::informer::events::{ConfigMapEvent, ConfigMapListener, ConfigMapRegistrar, ObjectKey};
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

// =============================================================================
// Configuration
// =============================================================================

/// Location of the feature-states ConfigMap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureStatesConfigInfo {
    pub name: String,
    pub namespace: String,
}

impl Default for FeatureStatesConfigInfo {
    fn default() -> Self {
        Self {
            name: "internal-feature-states.csi.vsphere.vmware.com".to_string(),
            namespace: "vmware-system-csi".to_string(),
        }
    }
}

impl FeatureStatesConfigInfo {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.namespace.is_empty() {
            return Err(Error::Configuration(format!(
                "feature states ConfigMap name and namespace are required, got {:?}/{:?}",
                self.namespace, self.name
            )));
        }
        Ok(())
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owner of the live feature-state set
#[derive(Debug)]
pub struct FeatureStateOrchestrator {
    key: ObjectKey,
    store: FeatureStateStore,
    /// Number of add/update/delete events applied
    generation: AtomicU64,
}

impl FeatureStateOrchestrator {
    /// Create an orchestrator with an empty (all disabled) set
    pub fn new(config: &FeatureStatesConfigInfo) -> Self {
        Self {
            key: config.key(),
            store: FeatureStateStore::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Fetch the ConfigMap once and seed the set from it.
    ///
    /// A failed fetch leaves every feature disabled; startup continues.
    pub async fn load(config: &FeatureStatesConfigInfo, source: &dyn ConfigMapSource) -> Self {
        let orchestrator = Self::new(config);
        match source.get_config_map(&config.namespace, &config.name).await {
            Ok(cm) => orchestrator.update_states(&cm),
            Err(e) => error!(
                configmap = %orchestrator.key,
                error = %e,
                "Failed to fetch feature states ConfigMap. Setting the feature states to default values"
            ),
        }
        orchestrator
    }

    /// Apply one watch event. Events for other ConfigMaps are ignored.
    pub fn handle_event(&self, event: &ConfigMapEvent) {
        let key = event.key();
        if key != self.key {
            debug!(configmap = %key, event = event.kind(), "Ignoring unrelated ConfigMap");
            return;
        }

        match event {
            ConfigMapEvent::Added(cm) | ConfigMapEvent::Updated { new: cm, .. } => {
                self.update_states(cm);
            }
            ConfigMapEvent::Deleted(_) => {
                let states = self.store.disable_all();
                self.generation.fetch_add(1, Ordering::Relaxed);
                info!(
                    configmap = %key,
                    states = ?states.raw(),
                    "Feature states ConfigMap deleted. Setting feature state values to false"
                );
            }
        }
    }

    fn update_states(&self, cm: &ConfigMap) {
        let states = FeatureStateSet::new(cm.data.clone().unwrap_or_default());
        info!(states = ?states.raw(), "New feature states values stored successfully");
        self.store.replace(states);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a feature is enabled right now
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.store.is_enabled(feature)
    }

    /// The current set, for diagnostics
    pub fn snapshot(&self) -> Arc<FeatureStateSet> {
        self.store.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn config_key(&self) -> &ObjectKey {
        &self.key
    }
}

impl FeatureGate for FeatureStateOrchestrator {
    fn is_enabled(&self, feature: &str) -> bool {
        FeatureStateOrchestrator::is_enabled(self, feature)
    }

    fn generation(&self) -> u64 {
        FeatureStateOrchestrator::generation(self)
    }
}

impl ConfigMapListener for FeatureStateOrchestrator {
    fn on_config_map_event(&self, event: &ConfigMapEvent) {
        self.handle_event(event);
    }
}

// =============================================================================
// Initialize-once Cell
// =============================================================================

/// Initialize-once holder of the orchestrator handle
#[derive(Debug, Default)]
pub struct FeatureStateCell {
    cell: OnceCell<std::result::Result<Arc<FeatureStateOrchestrator>, String>>,
}

impl FeatureStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the orchestrator on first call. Concurrent callers wait for the
    /// first one; all callers observe its outcome, later arguments are ignored.
    pub async fn initialize(
        &self,
        config: &FeatureStatesConfigInfo,
        source: &dyn ConfigMapSource,
        registrar: &dyn ConfigMapRegistrar,
    ) -> Result<Arc<FeatureStateOrchestrator>> {
        let outcome = self
            .cell
            .get_or_init(|| async {
                bootstrap(config, source, registrar)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        match outcome {
            Ok(handle) => Ok(handle.clone()),
            Err(message) => Err(Error::Initialization(message.clone())),
        }
    }

    /// The handle, if initialization has completed successfully
    pub fn get(&self) -> Option<Arc<FeatureStateOrchestrator>> {
        self.cell.get().and_then(|r| r.as_ref().ok().cloned())
    }
}

async fn bootstrap(
    config: &FeatureStatesConfigInfo,
    source: &dyn ConfigMapSource,
    registrar: &dyn ConfigMapRegistrar,
) -> Result<Arc<FeatureStateOrchestrator>> {
    info!(configmap = %config.key(), "Initializing feature state orchestrator");
    config.validate()?;

    let orchestrator = Arc::new(FeatureStateOrchestrator::load(config, source).await);
    registrar.add_config_map_listener(orchestrator.clone())?;

    info!("Feature state orchestrator initialized");
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::constants::FEATURE_CSI_MIGRATION;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use kube::api::ObjectMeta;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn info() -> FeatureStatesConfigInfo {
        FeatureStatesConfigInfo {
            name: "fss".into(),
            namespace: "csi".into(),
        }
    }

    fn config_map(ns: &str, name: &str, pairs: &[(&str, &str)]) -> Arc<ConfigMap> {
        let data: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(ns.into()),
                name: Some(name.into()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        })
    }

    struct FakeSource {
        config_map: Option<Arc<ConfigMap>>,
        calls: AtomicU64,
    }

    impl FakeSource {
        fn with(cm: Option<Arc<ConfigMap>>) -> Self {
            Self {
                config_map: cm,
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ConfigMapSource for FakeSource {
        async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.config_map
                .as_ref()
                .map(|cm| (**cm).clone())
                .ok_or_else(|| Error::ResourceNotFound {
                    kind: "ConfigMap".into(),
                    name: format!("{}/{}", namespace, name),
                })
        }
    }

    #[derive(Default)]
    struct FakeRegistrar {
        listeners: Mutex<Vec<Arc<dyn ConfigMapListener>>>,
    }

    impl ConfigMapRegistrar for FakeRegistrar {
        fn add_config_map_listener(&self, listener: Arc<dyn ConfigMapListener>) -> Result<()> {
            self.listeners.lock().push(listener);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_seeds_states() {
        let source = FakeSource::with(Some(config_map(
            "csi",
            "fss",
            &[(FEATURE_CSI_MIGRATION, "true")],
        )));
        let orchestrator = FeatureStateOrchestrator::load(&info(), &source).await;
        assert!(orchestrator.is_enabled(FEATURE_CSI_MIGRATION));
        assert!(!orchestrator.is_enabled("unknown-feature"));
    }

    #[tokio::test]
    async fn test_load_fails_open() {
        let source = FakeSource::with(None);
        let orchestrator = FeatureStateOrchestrator::load(&info(), &source).await;
        assert!(orchestrator.snapshot().is_empty());
        assert!(!orchestrator.is_enabled(FEATURE_CSI_MIGRATION));
    }

    #[test]
    fn test_add_and_update_replace_wholesale() {
        let orchestrator = FeatureStateOrchestrator::new(&info());

        orchestrator.handle_event(&ConfigMapEvent::Added(config_map(
            "csi",
            "fss",
            &[("a", "true"), ("b", "true")],
        )));
        assert!(orchestrator.is_enabled("a"));

        orchestrator.handle_event(&ConfigMapEvent::Updated {
            old: config_map("csi", "fss", &[("a", "true"), ("b", "true")]),
            new: config_map("csi", "fss", &[("b", "false"), ("c", "true")]),
        });
        assert!(!orchestrator.is_enabled("a"));
        assert!(!orchestrator.is_enabled("b"));
        assert!(orchestrator.is_enabled("c"));
        assert_eq!(orchestrator.snapshot().len(), 2);
        assert_eq!(orchestrator.generation(), 2);
    }

    #[test]
    fn test_delete_disables_but_keeps_keys() {
        let orchestrator = FeatureStateOrchestrator::new(&info());
        let cm = config_map("csi", "fss", &[("a", "true"), ("b", "false"), ("c", "true")]);
        orchestrator.handle_event(&ConfigMapEvent::Added(cm.clone()));

        orchestrator.handle_event(&ConfigMapEvent::Deleted(cm));

        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(!orchestrator.is_enabled("a"));
        assert!(!orchestrator.is_enabled("c"));
    }

    #[test]
    fn test_unrelated_config_maps_ignored() {
        let orchestrator = FeatureStateOrchestrator::new(&info());
        orchestrator.handle_event(&ConfigMapEvent::Added(config_map("csi", "fss", &[("a", "true")])));

        orchestrator.handle_event(&ConfigMapEvent::Added(config_map("csi", "other", &[("a", "false")])));
        orchestrator.handle_event(&ConfigMapEvent::Deleted(config_map("default", "fss", &[])));

        assert!(orchestrator.is_enabled("a"));
        assert_eq!(orchestrator.generation(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_single_winner() {
        let cell = Arc::new(FeatureStateCell::new());
        let source = Arc::new(FakeSource::with(Some(config_map("csi", "fss", &[("a", "true")]))));
        let registrar = Arc::new(FakeRegistrar::default());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let source = source.clone();
            let registrar = registrar.clone();
            tasks.push(tokio::spawn(async move {
                cell.initialize(&info(), source.as_ref(), registrar.as_ref())
                    .await
                    .unwrap()
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.listeners.lock().len(), 1);
        assert!(cell.get().is_some());

        // Events delivered through the registered listener reach the shared handle
        let listener = registrar.listeners.lock()[0].clone();
        listener.on_config_map_event(&ConfigMapEvent::Deleted(config_map("csi", "fss", &[])));
        assert!(!handles[0].is_enabled("a"));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_shares_error() {
        let cell = Arc::new(FeatureStateCell::new());
        let source = Arc::new(FakeSource::with(None));
        let registrar = Arc::new(FakeRegistrar::default());
        let bad = FeatureStatesConfigInfo {
            name: String::new(),
            namespace: "csi".into(),
        };

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cell = cell.clone();
            let source = source.clone();
            let registrar = registrar.clone();
            let bad = bad.clone();
            tasks.push(tokio::spawn(async move {
                cell.initialize(&bad, source.as_ref(), registrar.as_ref())
                    .await
                    .unwrap_err()
                    .to_string()
            }));
        }

        let mut messages = Vec::new();
        for task in tasks {
            messages.push(task.await.unwrap());
        }
        assert!(messages.iter().all(|m| m == &messages[0]));

        // A later caller with valid arguments still observes the first outcome
        let later = cell.initialize(&info(), source.as_ref(), registrar.as_ref()).await;
        assert_matches!(later, Err(Error::Initialization(_)));
        assert!(cell.get().is_none());
        assert!(registrar.listeners.lock().is_empty());
    }
}
