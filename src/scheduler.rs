//! Auto-progression: system-initiated follow-up transitions.
//!
//! After an entity lands in certain statuses the system attempts the next
//! step on its own, after a delay and a re-validation against fresh state.
//! Progressions are best-effort: anything that goes wrong is logged and
//! swallowed, because the caller that triggered the original transition has
//! already received its response.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::engine::TransitionEngine;
use crate::entity::EntityStatus;
use crate::store::EntityStore;

/// Static mapping entry: landing in `landed` schedules an attempt to reach
/// `to` by synthesizing `event` through the normal engine entry point.
#[derive(Debug, Clone)]
pub struct AutoProgression<S> {
    pub landed: S,
    pub to: S,
    pub event: String,
}

impl<S: EntityStatus> AutoProgression<S> {
    pub fn new(landed: S, to: S, event: &str) -> Self {
        Self {
            landed,
            to,
            event: event.to_string(),
        }
    }
}

/// Owns the progression map and every pending timer, so shutdown can cancel
/// them deterministically instead of leaking fire-and-forget tasks.
pub struct ProgressionScheduler<S: EntityStatus> {
    progressions: Vec<AutoProgression<S>>,
    store: Arc<dyn EntityStore<S>>,
    delay: Duration,
    timers: Mutex<JoinSet<()>>,
}

impl<S: EntityStatus> ProgressionScheduler<S> {
    pub fn new(
        progressions: Vec<AutoProgression<S>>,
        store: Arc<dyn EntityStore<S>>,
        delay: Duration,
    ) -> Self {
        Self {
            progressions,
            store,
            delay,
            timers: Mutex::new(JoinSet::new()),
        }
    }

    /// Called by the engine after every applied transition.
    ///
    /// If the landed status maps to a progression, a timer is registered. It
    /// sleeps without holding any entity lock, re-loads the entity, and only
    /// submits the synthesized event if the status is still exactly the one
    /// that triggered scheduling — a concurrent transition in the meantime
    /// silently wins.
    ///
    /// Synchronous: the timer task awaits the engine, so this registration
    /// cannot itself be a future the engine awaits, or the two future types
    /// would contain each other.
    pub fn schedule(&self, engine: Arc<TransitionEngine<S>>, entity_id: &str, landed: S) {
        let Some(progression) = self.progressions.iter().find(|p| p.landed == landed) else {
            return;
        };
        let progression = progression.clone();
        let store = Arc::clone(&self.store);
        let id = entity_id.to_string();
        let delay = self.delay;

        let mut timers = self.timers.lock().expect("timer set lock poisoned");
        // Reap finished timers so the set does not grow unboundedly.
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            tokio::time::sleep(delay).await;

            let current = match store.get(&id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(entity_id = %id, "auto-progression dropped: entity gone");
                    return;
                }
                Err(err) => {
                    warn!(entity_id = %id, %err, "auto-progression dropped: store error");
                    return;
                }
            };
            if current.status != progression.landed {
                debug!(
                    entity_id = %id,
                    expected = progression.landed.name(),
                    actual = current.status.name(),
                    "auto-progression dropped: status changed"
                );
                return;
            }

            match engine
                .submit_event(&id, &progression.event, None, Some(progression.to))
                .await
            {
                Ok(outcome) => {
                    debug!(entity_id = %id, ?outcome, "auto-progression submitted")
                }
                Err(err) => warn!(entity_id = %id, %err, "auto-progression failed"),
            }
        });
    }

    /// Abort all pending timers. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut timers = {
            let mut guard = self.timers.lock().expect("timer set lock poisoned");
            std::mem::take(&mut *guard)
        };
        timers.shutdown().await;
    }

    /// Number of timers that have been registered and not yet reaped.
    pub fn pending(&self) -> usize {
        self.timers.lock().expect("timer set lock poisoned").len()
    }
}
