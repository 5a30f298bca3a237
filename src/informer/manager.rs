//! Informer Manager
//!
//! Keeps eventually-consistent local mirrors of PersistentVolumes,
//! PersistentVolumeClaims and Pods, and turns ConfigMap watch output into
//! typed add/update/delete callbacks for registered listeners.

use crate::domain::ports::{ClusterCache, ConfigMapSource};
use crate::error::{Error, Result};
use crate::informer::events::{ConfigMapEvent, ConfigMapListener, ConfigMapRegistrar, ObjectKey};
use crate::informer::snapshot::ClusterSnapshot;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Listeners = Arc<RwLock<Vec<Arc<dyn ConfigMapListener>>>>;

/// Writers consumed when the watch tasks start
struct Writers {
    volumes: reflector::store::Writer<PersistentVolume>,
    claims: reflector::store::Writer<PersistentVolumeClaim>,
    pods: reflector::store::Writer<Pod>,
}

// =============================================================================
// Informer Manager
// =============================================================================

/// Owner of the watch tasks and their caches
pub struct InformerManager {
    client: Client,
    /// Namespace to watch ConfigMaps in; `None` watches all namespaces
    config_map_namespace: Option<String>,
    volumes: Store<PersistentVolume>,
    claims: Store<PersistentVolumeClaim>,
    pods: Store<Pod>,
    writers: Mutex<Option<Writers>>,
    listeners: Listeners,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl InformerManager {
    /// Create the manager. Nothing is watched until [`InformerManager::listen`].
    pub fn new(client: Client, config_map_namespace: Option<String>) -> Arc<Self> {
        let (volumes, volumes_writer) = reflector::store();
        let (claims, claims_writer) = reflector::store();
        let (pods, pods_writer) = reflector::store();

        Arc::new(Self {
            client,
            config_map_namespace,
            volumes,
            claims,
            pods,
            writers: Mutex::new(Some(Writers {
                volumes: volumes_writer,
                claims: claims_writer,
                pods: pods_writer,
            })),
            listeners: Arc::new(RwLock::new(Vec::new())),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start all watch tasks. Calling it again is a no-op.
    ///
    /// ConfigMap listeners registered before this call receive the initial
    /// list as add events.
    pub fn listen(&self) {
        let Some(writers) = self.writers.lock().take() else {
            debug!("Informers already started");
            return;
        };

        let mut tasks = self.tasks.lock();
        tasks.push(spawn_reflector(
            Api::<PersistentVolume>::all(self.client.clone()),
            writers.volumes,
            self.shutdown.clone(),
            "PersistentVolume",
        ));
        tasks.push(spawn_reflector(
            Api::<PersistentVolumeClaim>::all(self.client.clone()),
            writers.claims,
            self.shutdown.clone(),
            "PersistentVolumeClaim",
        ));
        tasks.push(spawn_reflector(
            Api::<Pod>::all(self.client.clone()),
            writers.pods,
            self.shutdown.clone(),
            "Pod",
        ));

        let config_maps: Api<ConfigMap> = match &self.config_map_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        tasks.push(spawn_config_map_watcher(
            config_maps,
            self.listeners.clone(),
            self.shutdown.clone(),
        ));

        info!(tasks = tasks.len(), "Informers started");
    }

    /// Wait until the PersistentVolume, PersistentVolumeClaim and Pod caches
    /// hold their initial list. Fails if the watch tasks were never started
    /// or stopped before the list completed.
    pub async fn wait_for_cache_sync(&self) -> Result<()> {
        if self.writers.lock().is_some() {
            return Err(Error::Initialization(
                "informers must be started before waiting for cache sync".into(),
            ));
        }

        let (volumes, claims, pods) = tokio::join!(
            self.volumes.wait_until_ready(),
            self.claims.wait_until_ready(),
            self.pods.wait_until_ready(),
        );
        for (kind, ready) in [
            ("PersistentVolume", volumes),
            ("PersistentVolumeClaim", claims),
            ("Pod", pods),
        ] {
            ready.map_err(|e| Error::Initialization(format!("{} cache: {}", kind, e)))?;
        }

        info!(
            volumes = self.volumes.state().len(),
            claims = self.claims.state().len(),
            pods = self.pods.state().len(),
            "Informer caches synced"
        );
        Ok(())
    }

    /// Stop the watch tasks and refuse new listeners
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Informers stopped");
    }

    /// Copy the current caches into a snapshot
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot::from_parts(self.volumes.state(), self.claims.state(), self.pods.state())
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ClusterCache for InformerManager {
    fn list_volumes(&self) -> Vec<Arc<PersistentVolume>> {
        self.volumes.state()
    }

    fn list_claims(&self) -> Vec<Arc<PersistentVolumeClaim>> {
        self.claims.state()
    }

    fn list_pods(&self) -> Vec<Arc<Pod>> {
        self.pods.state()
    }

    fn get_volume(&self, name: &str) -> Option<Arc<PersistentVolume>> {
        self.volumes.get(&ObjectRef::new(name))
    }

    fn get_claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.get(&ObjectRef::new(name).within(namespace))
    }

    fn is_synced(&self) -> bool {
        matches!(self.volumes.wait_until_ready().now_or_never(), Some(Ok(())))
            && matches!(self.claims.wait_until_ready().now_or_never(), Some(Ok(())))
            && matches!(self.pods.wait_until_ready().now_or_never(), Some(Ok(())))
    }
}

impl ConfigMapRegistrar for InformerManager {
    fn add_config_map_listener(&self, listener: Arc<dyn ConfigMapListener>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("informer manager has been shut down".into()));
        }
        self.listeners.write().push(listener);
        Ok(())
    }
}

#[async_trait]
impl ConfigMapSource for Client {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

// =============================================================================
// Watch Tasks
// =============================================================================

fn spawn_reflector<K>(
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    shutdown: CancellationToken,
    kind: &'static str,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    tokio::spawn(async move {
        let mut stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()))
            .default_backoff()
            .applied_objects()
            .boxed();

        debug!(kind, "Starting reflector");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                item = stream.try_next() => match item {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => warn!(kind, error = %e, "Watch error, retrying"),
                },
            }
        }
        debug!(kind, "Reflector stopped");
    })
}

fn spawn_config_map_watcher(
    api: Api<ConfigMap>,
    listeners: Listeners,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut known = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                item = stream.try_next() => match item {
                    Ok(Some(event)) => {
                        for event in classify_watch_event(&mut known, event) {
                            dispatch(&listeners, &event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => warn!(error = %e, "ConfigMap watch error, retrying"),
                },
            }
        }
        debug!("ConfigMap watcher stopped");
    })
}

fn dispatch(listeners: &Listeners, event: &ConfigMapEvent) {
    let listeners = listeners.read().clone();
    for listener in listeners {
        listener.on_config_map_event(event);
    }
}

/// Turn a raw watch event into add/update/delete events.
///
/// `known` holds the last state seen per object; a re-list that no longer
/// contains a known object reports it as deleted.
pub fn classify_watch_event(
    known: &mut HashMap<ObjectKey, Arc<ConfigMap>>,
    event: watcher::Event<ConfigMap>,
) -> Vec<ConfigMapEvent> {
    match event {
        watcher::Event::Applied(cm) => vec![apply(known, Arc::new(cm))],
        watcher::Event::Deleted(cm) => {
            let cm = Arc::new(cm);
            known.remove(&ObjectKey::of(&cm));
            vec![ConfigMapEvent::Deleted(cm)]
        }
        watcher::Event::Restarted(list) => {
            let mut previous = std::mem::take(known);
            let mut events: Vec<ConfigMapEvent> = list
                .into_iter()
                .map(|cm| {
                    let cm = Arc::new(cm);
                    let key = ObjectKey::of(&cm);
                    known.insert(key.clone(), cm.clone());
                    match previous.remove(&key) {
                        Some(old) => ConfigMapEvent::Updated { old, new: cm },
                        None => ConfigMapEvent::Added(cm),
                    }
                })
                .collect();
            events.extend(previous.into_values().map(ConfigMapEvent::Deleted));
            events
        }
    }
}

fn apply(known: &mut HashMap<ObjectKey, Arc<ConfigMap>>, cm: Arc<ConfigMap>) -> ConfigMapEvent {
    match known.insert(ObjectKey::of(&cm), cm.clone()) {
        Some(old) => ConfigMapEvent::Updated { old, new: cm },
        None => ConfigMapEvent::Added(cm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::api::ObjectMeta;

    fn config_map(ns: &str, name: &str, version: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(ns.into()),
                name: Some(name.into()),
                resource_version: Some(version.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_applied_classified_as_add_then_update() {
        let mut known = HashMap::new();

        let events = classify_watch_event(
            &mut known,
            watcher::Event::Applied(config_map("csi", "fss", "1")),
        );
        assert!(matches!(events.as_slice(), [ConfigMapEvent::Added(_)]));

        let events = classify_watch_event(
            &mut known,
            watcher::Event::Applied(config_map("csi", "fss", "2")),
        );
        match events.as_slice() {
            [ConfigMapEvent::Updated { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_deleted_forgets_object() {
        let mut known = HashMap::new();
        classify_watch_event(&mut known, watcher::Event::Applied(config_map("csi", "fss", "1")));

        let events =
            classify_watch_event(&mut known, watcher::Event::Deleted(config_map("csi", "fss", "1")));
        assert!(matches!(events.as_slice(), [ConfigMapEvent::Deleted(_)]));
        assert!(known.is_empty());

        // Re-created object is an add again
        let events =
            classify_watch_event(&mut known, watcher::Event::Applied(config_map("csi", "fss", "3")));
        assert!(matches!(events.as_slice(), [ConfigMapEvent::Added(_)]));
    }

    #[test]
    fn test_restart_reports_missing_objects_as_deleted() {
        let mut known = HashMap::new();
        classify_watch_event(&mut known, watcher::Event::Applied(config_map("csi", "fss", "1")));
        classify_watch_event(&mut known, watcher::Event::Applied(config_map("csi", "gone", "1")));

        let events = classify_watch_event(
            &mut known,
            watcher::Event::Restarted(vec![
                config_map("csi", "fss", "5"),
                config_map("csi", "new", "1"),
            ]),
        );

        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, ConfigMapEvent::Updated { .. }) && e.key().name == "fss"));
        assert!(events
            .iter()
            .any(|e| matches!(e, ConfigMapEvent::Added(_)) && e.key().name == "new"));
        assert!(events
            .iter()
            .any(|e| e.is_delete() && e.key().name == "gone"));
        assert_eq!(known.len(), 2);
    }

    /// Client pointed at an address nothing listens on
    fn offline_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:9".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    struct Recorder(Mutex<Vec<String>>);

    impl ConfigMapListener for Recorder {
        fn on_config_map_event(&self, event: &ConfigMapEvent) {
            self.0.lock().push(format!("{} {}", event.kind(), event.key()));
        }
    }

    #[tokio::test]
    async fn test_cache_sync_requires_started_informers() {
        let manager = InformerManager::new(offline_client(), None);

        assert!(!manager.is_synced());
        assert_matches!(
            manager.wait_for_cache_sync().await,
            Err(Error::Initialization(_))
        );
    }

    #[tokio::test]
    async fn test_caches_unsynced_until_initial_list() {
        let manager = InformerManager::new(offline_client(), Some("csi".into()));
        manager.listen();

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(100), manager.wait_for_cache_sync())
                .await;
        assert!(waited.is_err());
        assert!(!manager.is_synced());
        assert!(manager.list_volumes().is_empty());

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_listener_registered_before_listen_sees_initial_list() {
        let manager = InformerManager::new(offline_client(), Some("csi".into()));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        manager.add_config_map_listener(recorder.clone()).unwrap();

        // What the watcher delivers for its first list
        let mut known = HashMap::new();
        for event in classify_watch_event(
            &mut known,
            watcher::Event::Restarted(vec![config_map("csi", "fss", "1")]),
        ) {
            dispatch(&manager.listeners, &event);
        }
        assert_eq!(*recorder.0.lock(), vec!["add csi/fss".to_string()]);

        manager.shutdown();
        assert_matches!(
            manager.add_config_map_listener(recorder),
            Err(Error::Internal(_))
        );
    }
}
