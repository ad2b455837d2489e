//! Registry of live input statistics.
//!
//! # Responsibilities
//! - Map input identifiers to their statistics objects
//! - Reject duplicate identifiers (first registrant wins)
//! - Render configuration, values and state of every input as one snapshot
//!
//! # Design Decisions
//! - Holds `Weak` references only; inputs are owned by the input pipeline
//! - One lock for the whole map, held across a bulk render so the snapshot
//!   is consistent across inputs
//! - Lock order is registry then input, never the reverse

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;
use crate::stats::input::{InputStat, StateReport, ValuesReport};
use crate::stats::state::StateThresholds;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("input '{0}' is already registered")]
    Duplicate(String),
}

/// `{"config": [...]}` as served by the `config` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigListing {
    pub config: Vec<String>,
}

/// `{"values": {...}}` as served by the `values` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuesListing {
    pub values: BTreeMap<String, ValuesReport>,
}

/// Per-input state, keyed by identifier, as served by the `state` command.
pub type StateListing = BTreeMap<String, StateReport>;

/// Shared registry of input statistics.
#[derive(Debug, Default)]
pub struct StatRegistry {
    entries: Mutex<BTreeMap<String, Weak<InputStat>>>,
    thresholds: StateThresholds,
}

impl StatRegistry {
    pub fn new(thresholds: StateThresholds) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            thresholds,
        }
    }

    /// Thresholds handed to every input created against this registry.
    pub fn thresholds(&self) -> StateThresholds {
        self.thresholds
    }

    /// Register an input under its name.
    ///
    /// An identifier held by a live input is rejected and logged; one held by
    /// an input that is already gone is taken over.
    pub fn register(&self, input: &Arc<InputStat>) -> Result<(), RegistryError> {
        let id = input.name();
        let mut entries = self.entries();

        if let Some(existing) = entries.get(id) {
            if existing.strong_count() > 0 {
                tracing::error!(input = %id, "Double registration in MGMT server");
                return Err(RegistryError::Duplicate(id.to_string()));
            }
            tracing::debug!(input = %id, "Replacing stale registry entry");
        }

        entries.insert(id.to_string(), Arc::downgrade(input));
        metrics::record_registered_inputs(entries.len());
        tracing::debug!(input = %id, "Input registered");
        Ok(())
    }

    /// Remove an identifier. Absent identifiers are ignored.
    pub fn unregister(&self, id: &str) {
        let mut entries = self.entries();
        if entries.remove(id).is_some() {
            metrics::record_registered_inputs(entries.len());
            tracing::debug!(input = %id, "Input unregistered");
        }
    }

    /// Remove `id` only if it still refers to `instance`.
    pub(crate) fn unregister_instance(&self, id: &str, instance: *const InputStat) {
        let mut entries = self.entries();
        let owned = entries
            .get(id)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), instance));
        if owned {
            entries.remove(id);
            metrics::record_registered_inputs(entries.len());
            tracing::debug!(input = %id, "Input unregistered");
        }
    }

    /// Whether a live input is registered under `id`.
    pub fn is_registered(&self, id: &str) -> bool {
        let live = self
            .entries()
            .get(id)
            .is_some_and(|weak| weak.strong_count() > 0);
        if !live {
            tracing::error!(input = %id, "Input was not registered");
        }
        live
    }

    /// Identifiers of all live inputs, in key order.
    pub fn ids(&self) -> Vec<String> {
        self.render_each(|_| ()).into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render_config(&self) -> ConfigListing {
        ConfigListing { config: self.ids() }
    }

    /// Render and reset the accumulators of every input.
    pub fn render_values(&self) -> ValuesListing {
        ValuesListing {
            values: self.render_each(InputStat::render_values),
        }
    }

    /// Render the state of every input; also resets the accumulators.
    pub fn render_state(&self) -> StateListing {
        self.render_each(InputStat::render_state)
    }

    /// Apply `render` to every live input under the registry lock, pruning
    /// entries whose input is gone.
    fn render_each<T>(&self, render: impl Fn(&InputStat) -> T) -> BTreeMap<String, T> {
        let mut rendered = BTreeMap::new();
        let mut alive = Vec::new();

        let mut entries = self.entries();
        entries.retain(|id, weak| match weak.upgrade() {
            Some(input) => {
                rendered.insert(id.clone(), render(&input));
                alive.push(input);
                true
            }
            None => {
                tracing::debug!(input = %id, "Pruning stale registry entry");
                false
            }
        });
        drop(entries);

        // Dropping the last handle re-enters unregister, so this must
        // happen after the registry lock is released.
        drop(alive);
        rendered
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Weak<InputStat>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::state::InputState;

    fn registry() -> Arc<StatRegistry> {
        Arc::new(StatRegistry::new(StateThresholds::default()))
    }

    #[test]
    fn register_and_list() {
        let registry = registry();
        let _b = InputStat::register(&registry, "b");
        let _a = InputStat::register(&registry, "a");

        assert_eq!(registry.render_config().config, vec!["a", "b"]);
        assert!(registry.is_registered("a"));
        assert!(!registry.is_registered("c"));
    }

    #[test]
    fn duplicate_keeps_original() {
        let registry = registry();
        let original = InputStat::register(&registry, "eti0");
        let duplicate = InputStat::new(&registry, "eti0");

        assert_eq!(
            registry.register(&duplicate),
            Err(RegistryError::Duplicate("eti0".into()))
        );

        original.notify_underrun();
        let values = registry.render_values().values;
        assert_eq!(values["eti0"].inputstat.num_underruns, 1);
    }

    #[test]
    fn dropping_duplicate_does_not_evict_original() {
        let registry = registry();
        let _original = InputStat::register(&registry, "eti0");
        let duplicate = InputStat::register(&registry, "eti0");
        drop(duplicate);

        assert!(registry.is_registered("eti0"));
    }

    #[test]
    fn drop_unregisters() {
        let registry = registry();
        let input = InputStat::register(&registry, "eti0");
        assert_eq!(registry.len(), 1);

        drop(input);
        assert!(registry.is_empty());
        assert_eq!(registry.render_config().config, Vec::<String>::new());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = registry();
        let input = InputStat::register(&registry, "eti0");

        registry.unregister("eti0");
        registry.unregister("eti0");
        registry.unregister("never");
        assert!(registry.is_empty());

        // Dropping after manual removal leaves nothing behind either.
        drop(input);
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_entry_is_never_rendered() {
        let registry = registry();
        let input = InputStat::new(&registry, "ghost");
        registry.register(&input).unwrap();
        // Registered behind the input's back, so its drop skips deregistration.
        drop(input);

        assert!(registry.render_values().values.is_empty());
        assert!(registry.render_state().is_empty());
        assert!(!registry.is_registered("ghost"));
    }

    #[test]
    fn stale_entry_can_be_taken_over() {
        let registry = registry();
        let ghost = InputStat::new(&registry, "eti0");
        registry.register(&ghost).unwrap();
        drop(ghost);

        let input = InputStat::register(&registry, "eti0");
        assert!(input.is_registered());
        assert_eq!(registry.ids(), vec!["eti0"]);
    }

    #[test]
    fn values_and_state_are_keyed_by_id() {
        let registry = registry();
        let a = InputStat::register(&registry, "a");
        let _b = InputStat::register(&registry, "b");
        a.notify_buffer(10);
        a.notify_overrun();

        let values = registry.render_values().values;
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"].inputstat.num_overruns, 1);
        assert_eq!(values["b"].inputstat.num_overruns, 0);

        let state = registry.render_state();
        assert_eq!(state["a"].state, InputState::Streaming);

        // The state render reset the accumulators again.
        assert_eq!(registry.render_values().values["a"].inputstat.max_fill, 0);
    }

    #[test]
    fn json_shapes() {
        let registry = registry();
        let input = InputStat::register(&registry, "eti0");
        input.notify_buffer(5);

        let config = serde_json::to_value(registry.render_config()).unwrap();
        assert_eq!(config, serde_json::json!({ "config": ["eti0"] }));

        let state = serde_json::to_value(registry.render_state()).unwrap();
        assert_eq!(state, serde_json::json!({ "eti0": { "state": "Streaming" } }));

        let values = serde_json::to_value(registry.render_values()).unwrap();
        assert_eq!(
            values,
            serde_json::json!({
                "values": {
                    "eti0": {
                        "inputstat": {
                            "min_fill": -1,
                            "max_fill": 0,
                            "peak_left": -90,
                            "peak_right": -90,
                            "num_underruns": 0,
                            "num_overruns": 0
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn concurrent_producers_and_renders() {
        let registry = registry();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let input = InputStat::register(&registry, format!("in{}-{}", i, round));
                        input.notify_buffer(round);
                        input.notify_underrun();
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            registry.render_values();
            registry.render_state();
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_empty());
    }
}
