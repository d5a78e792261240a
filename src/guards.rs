//! Named guard predicates gating transitions.
//!
//! Guards are registered by name and referenced from transition rules, so new
//! guards can be added without touching the engine. Each guard is a pure
//! predicate over the entity snapshot loaded at the start of the attempt; a
//! guard never re-reads the store.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{EntityRecord, EntityStatus};

/// Result of a guard check: pass, or fail with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Pass,
    Fail(String),
}

impl GuardVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GuardVerdict::Pass)
    }
}

type GuardFn<S> = Arc<dyn Fn(&EntityRecord<S>) -> GuardVerdict + Send + Sync>;

/// Registry mapping guard names to predicate functions.
///
/// Built once at startup alongside the transition table and immutable
/// afterwards.
pub struct GuardRegistry<S: EntityStatus> {
    guards: HashMap<String, GuardFn<S>>,
}

impl<S: EntityStatus> GuardRegistry<S> {
    pub fn new() -> Self {
        Self {
            guards: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, guard: F)
    where
        F: Fn(&EntityRecord<S>) -> GuardVerdict + Send + Sync + 'static,
    {
        self.guards.insert(name.to_string(), Arc::new(guard));
    }

    /// Evaluate the named guards strictly in list order against one snapshot.
    ///
    /// Short-circuits on the first failure and returns that guard's reason;
    /// failures are never aggregated. Referencing an unregistered guard is a
    /// failure, not a panic.
    pub fn evaluate(&self, snapshot: &EntityRecord<S>, names: &[String]) -> GuardVerdict {
        for name in names {
            let Some(guard) = self.guards.get(name) else {
                return GuardVerdict::Fail(format!("unknown guard: {name}"));
            };
            if let GuardVerdict::Fail(reason) = guard(snapshot) {
                return GuardVerdict::Fail(reason);
            }
        }
        GuardVerdict::Pass
    }
}

impl<S: EntityStatus> Default for GuardRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
