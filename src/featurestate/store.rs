//! Feature State Store
//!
//! Holds the current feature-state set behind a swap-on-write pointer so
//! readers always see either the old or the new set, never a mix.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

// =============================================================================
// Feature State Set
// =============================================================================

/// Feature name to raw state value, exactly as found in the ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureStateSet {
    states: BTreeMap<String, String>,
}

impl FeatureStateSet {
    pub fn new(states: BTreeMap<String, String>) -> Self {
        Self { states }
    }

    /// Same keys, every value set to disabled
    pub fn all_disabled(&self) -> Self {
        Self {
            states: self
                .states
                .keys()
                .map(|k| (k.clone(), "false".to_string()))
                .collect(),
        }
    }

    /// Parsed state of a feature; `None` if the feature is unknown
    pub fn state(&self, feature: &str) -> Option<Result<bool>> {
        self.states.get(feature).map(|raw| parse_state(feature, raw))
    }

    /// Enabled features only. Unparseable values count as disabled.
    pub fn enabled_features(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(name, raw)| parse_state(name, raw).unwrap_or(false))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Parse a state value with the boolean spellings the ConfigMap producers use
fn parse_state(feature: &str, raw: &str) -> Result<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::InvalidFeatureState {
            feature: feature.to_string(),
            value: raw.to_string(),
        }),
    }
}

// =============================================================================
// Feature State Store
// =============================================================================

/// Single-writer, many-reader holder of the current feature-state set
#[derive(Debug, Default)]
pub struct FeatureStateStore {
    current: RwLock<Arc<FeatureStateSet>>,
}

impl FeatureStateStore {
    pub fn new(initial: FeatureStateSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current set. The lock is held only long enough to clone the pointer.
    pub fn snapshot(&self) -> Arc<FeatureStateSet> {
        self.current.read().clone()
    }

    /// Replace the whole set
    pub fn replace(&self, states: FeatureStateSet) {
        *self.current.write() = Arc::new(states);
    }

    /// Flip every known feature to disabled, keeping the keys.
    /// Returns the resulting set.
    pub fn disable_all(&self) -> Arc<FeatureStateSet> {
        let mut current = self.current.write();
        let disabled = Arc::new(current.all_disabled());
        *current = disabled.clone();
        disabled
    }

    /// Unknown features and unparseable values read as disabled
    pub fn is_enabled(&self, feature: &str) -> bool {
        match self.snapshot().state(feature) {
            Some(Ok(enabled)) => enabled,
            Some(Err(e)) => {
                error!(feature = %feature, error = %e, "Setting the feature state to false");
                false
            }
            None => {
                debug!(feature = %feature, "Could not find the feature state. Setting the feature state to false");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> FeatureStateSet {
        FeatureStateSet::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_unknown_feature_is_disabled() {
        let store = FeatureStateStore::new(set(&[("csi-migration", "true")]));
        assert!(store.is_enabled("csi-migration"));
        assert!(!store.is_enabled("never-heard-of-it"));

        let empty = FeatureStateStore::default();
        assert!(!empty.is_enabled("csi-migration"));
    }

    #[test]
    fn test_bad_value_only_affects_its_key() {
        let store = FeatureStateStore::new(set(&[
            ("csi-migration", "yes please"),
            ("volume-health", "true"),
        ]));
        assert!(!store.is_enabled("csi-migration"));
        assert!(store.is_enabled("volume-health"));

        let snapshot = store.snapshot();
        assert!(matches!(
            snapshot.state("csi-migration"),
            Some(Err(Error::InvalidFeatureState { .. }))
        ));
        assert_eq!(snapshot.enabled_features(), vec!["volume-health"]);
    }

    #[test]
    fn test_disable_all_keeps_keys() {
        let store = FeatureStateStore::new(set(&[
            ("csi-migration", "true"),
            ("volume-health", "false"),
            ("online-volume-extend", "true"),
        ]));

        let disabled = store.disable_all();
        assert_eq!(disabled.len(), 3);
        assert!(disabled.raw().values().all(|v| v == "false"));
        assert!(!store.is_enabled("csi-migration"));
        assert!(!store.is_enabled("online-volume-extend"));
        assert_eq!(
            store.snapshot().keys().collect::<Vec<_>>(),
            vec!["csi-migration", "online-volume-extend", "volume-health"]
        );
    }

    #[test]
    fn test_replace_is_wholesale() {
        let store = FeatureStateStore::new(set(&[("a", "true"), ("b", "true")]));
        let before = store.snapshot();

        store.replace(set(&[("c", "true")]));

        assert!(!store.is_enabled("a"));
        assert!(store.is_enabled("c"));
        // Readers holding the old snapshot keep a consistent view
        assert_eq!(before.len(), 2);
        assert_eq!(before.state("a").map(|r| r.unwrap()), Some(true));
    }
}
