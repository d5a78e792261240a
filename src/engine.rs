//! The transition engine: load, match, guard, apply, persist, broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog, OutcomeKind};
use crate::bus::{Notification, NotificationBus};
use crate::config::OrchestratorConfig;
use crate::entity::{EntityRecord, EntityStatus, HistoryEntry};
use crate::error::EngineError;
use crate::guards::{GuardRegistry, GuardVerdict};
use crate::rules::{FlagOp, TransitionRule, TransitionTable};
use crate::scheduler::{AutoProgression, ProgressionScheduler};
use crate::store::EntityStore;

/// How a transition attempt concluded, as seen by the caller.
///
/// Rejections and idempotent replays are ordinary values — expected,
/// user-visible, and audited. Infrastructure failures surface separately as
/// [`EngineError`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<S> {
    /// The status change (and any flag action) was applied and persisted.
    Applied {
        from: S,
        to: S,
        description: String,
    },
    /// No rule matched or a guard failed. No mutation occurred.
    Rejected { reason: String },
    /// The entity was already in the target status with nothing left to do.
    /// Redelivered queue messages land here instead of producing duplicate
    /// applied entries.
    NoOp { reason: String },
}

/// Drives entities through their declared transition tables.
///
/// Attempts for a single entity are serialized through a keyed lock so the
/// guard-evaluate-mutate-persist sequence never interleaves; independent
/// entities proceed fully in parallel.
pub struct TransitionEngine<S: EntityStatus> {
    store: Arc<dyn EntityStore<S>>,
    table: Arc<TransitionTable<S>>,
    guards: Arc<GuardRegistry<S>>,
    bus: NotificationBus,
    audit: Arc<AuditLog<S>>,
    scheduler: Arc<ProgressionScheduler<S>>,
    config: OrchestratorConfig,
    entity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: EntityStatus> TransitionEngine<S> {
    pub fn new(
        store: Arc<dyn EntityStore<S>>,
        table: TransitionTable<S>,
        guards: GuardRegistry<S>,
        progressions: Vec<AutoProgression<S>>,
        bus: NotificationBus,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let scheduler = Arc::new(ProgressionScheduler::new(
            progressions,
            Arc::clone(&store),
            config.progression_delay(),
        ));
        Arc::new(Self {
            store,
            table: Arc::new(table),
            guards: Arc::new(guards),
            bus,
            audit: Arc::new(AuditLog::new()),
            scheduler,
            config,
            entity_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Submit an event against an entity and get the outcome.
    ///
    /// Synchronous with respect to the transition itself: the returned
    /// outcome reflects persisted state. Auto-progression and notification
    /// fan-out happen asynchronously after it.
    ///
    /// Safe to call more than once for the same logical event; a replay on
    /// an entity already at the rule's target returns [`Outcome::NoOp`].
    pub async fn submit_event(
        self: &Arc<Self>,
        entity_id: &str,
        event_type: &str,
        payload: Option<Value>,
        requested_to: Option<S>,
    ) -> Result<Outcome<S>, EngineError> {
        let lock = self.entity_lock(entity_id).await;
        let _serialized = lock.lock().await;

        let Some(mut record) = self.store.get(entity_id).await? else {
            return Err(EngineError::NotFound(entity_id.to_string()));
        };

        let Some(rule) = self.table.find(record.status, event_type, requested_to) else {
            let reason = match requested_to {
                Some(to) => format!(
                    "invalid transition: cannot change from {} to {}",
                    record.status.name(),
                    to.name()
                ),
                None => format!(
                    "no transition rule for {event_type} from {}",
                    record.status.name()
                ),
            };
            return Ok(self.reject(&record, event_type, requested_to, reason).await);
        };

        if let GuardVerdict::Fail(reason) = self.guards.evaluate(&record, &rule.guards) {
            return Ok(self.reject(&record, event_type, Some(rule.to), reason).await);
        }

        if record.status == rule.to && rule.flag_action.is_none() {
            return Ok(self.noop(&record, event_type, rule.to).await);
        }

        let from = record.status;
        apply_rule(&mut record, rule, event_type, payload);
        // Persist before anything observable; a store failure aborts the
        // attempt with no audit entry and no broadcast.
        self.store
            .put(record.clone(), self.config.entity_ttl())
            .await?;

        info!(
            entity_id,
            event_type,
            from = from.name(),
            to = rule.to.name(),
            "transition applied"
        );
        self.audit
            .record(AuditEntry {
                timestamp: Utc::now(),
                entity_id: record.id.clone(),
                event_type: event_type.to_string(),
                from,
                to: Some(rule.to),
                outcome: OutcomeKind::Applied,
                reason: None,
            })
            .await;
        self.publish(
            &record.id,
            "transition.applied",
            json!({
                "from": from.name(),
                "to": rule.to.name(),
                "event": event_type,
                "description": rule.description,
                "version": record.version,
            }),
        )
        .await;

        self.scheduler
            .schedule(Arc::clone(self), &record.id, rule.to);

        Ok(Outcome::Applied {
            from,
            to: rule.to,
            description: rule.description.clone(),
        })
    }

    /// Ordered audit history for one entity.
    pub async fn list_history(&self, entity_id: &str) -> Vec<AuditEntry<S>> {
        self.audit.list_history(entity_id).await
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &ProgressionScheduler<S> {
        &self.scheduler
    }

    async fn reject(
        &self,
        record: &EntityRecord<S>,
        event_type: &str,
        requested_to: Option<S>,
        reason: String,
    ) -> Outcome<S> {
        warn!(
            entity_id = %record.id,
            event_type,
            current = record.status.name(),
            %reason,
            "transition rejected"
        );
        self.audit
            .record(AuditEntry {
                timestamp: Utc::now(),
                entity_id: record.id.clone(),
                event_type: event_type.to_string(),
                from: record.status,
                to: requested_to,
                outcome: OutcomeKind::Rejected,
                reason: Some(reason.clone()),
            })
            .await;
        self.publish(
            &record.id,
            "transition.rejected",
            json!({
                "current": record.status.name(),
                "requested": requested_to.map(|s| s.name()),
                "event": event_type,
                "reason": reason,
            }),
        )
        .await;
        Outcome::Rejected { reason }
    }

    async fn noop(&self, record: &EntityRecord<S>, event_type: &str, to: S) -> Outcome<S> {
        let reason = format!("already in target status {}", to.name());
        debug!(entity_id = %record.id, event_type, status = to.name(), "no-op replay");
        self.audit
            .record(AuditEntry {
                timestamp: Utc::now(),
                entity_id: record.id.clone(),
                event_type: event_type.to_string(),
                from: record.status,
                to: Some(to),
                outcome: OutcomeKind::NoOp,
                reason: Some(reason.clone()),
            })
            .await;
        self.publish(
            &record.id,
            "transition.noop",
            json!({
                "status": to.name(),
                "event": event_type,
            }),
        )
        .await;
        Outcome::NoOp { reason }
    }

    /// Broadcast failures never unwind an applied mutation; the state change
    /// already happened.
    async fn publish(&self, entity_id: &str, kind: &str, data: Value) {
        let reached = self
            .bus
            .publish(entity_id, Notification::new(kind, entity_id, data))
            .await;
        debug!(entity_id, kind, reached, "notification published");
    }

    async fn entity_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().await;
        // Drop locks no attempt holds anymore; the map tracks only entities
        // with an attempt in flight.
        locks.retain(|id, lock| id == entity_id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(entity_id.to_string()).or_default())
    }
}

/// Mutate the snapshot per the matched rule: status, flag action, history,
/// payload merge, version. All of it lands in one `put`, so no intermediate
/// state is ever observable.
fn apply_rule<S: EntityStatus>(
    record: &mut EntityRecord<S>,
    rule: &TransitionRule<S>,
    event_type: &str,
    payload: Option<Value>,
) {
    let now = Utc::now();
    record.history.push(HistoryEntry {
        timestamp: now,
        from: record.status,
        to: rule.to,
        event_type: event_type.to_string(),
    });
    record.status = rule.to;
    if let Some(action) = &rule.flag_action {
        match action.op {
            FlagOp::Add => {
                record.flags.insert(action.flag.clone());
            }
            FlagOp::Remove => {
                record.flags.remove(&action.flag);
            }
        }
    }
    if let Some(incoming) = payload {
        merge_payload(&mut record.payload, incoming);
    }
    record.version += 1;
    record.updated_at = now;
}

// Shallow merge: object onto object merges keys, anything else replaces.
fn merge_payload(base: &mut Value, incoming: Value) {
    match incoming {
        Value::Object(patch) if base.is_object() => {
            if let Some(map) = base.as_object_mut() {
                for (key, value) in patch {
                    map.insert(key, value);
                }
            }
        }
        other => *base = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::StreamItem;
    use crate::rules::FlagAction;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum Ticket {
        Open,
        Triaged,
        Resolved,
        Closed,
        Reopened,
    }

    impl EntityStatus for Ticket {
        fn name(&self) -> &'static str {
            match self {
                Ticket::Open => "open",
                Ticket::Triaged => "triaged",
                Ticket::Resolved => "resolved",
                Ticket::Closed => "closed",
                Ticket::Reopened => "reopened",
            }
        }
    }

    fn table() -> TransitionTable<Ticket> {
        TransitionTable::new(vec![
            TransitionRule::new(&[Ticket::Open], Ticket::Triaged, "triage")
                .describe("ticket triaged"),
            TransitionRule::new(&[Ticket::Triaged, Ticket::Resolved], Ticket::Resolved, "resolve")
                .guard("not_escalated")
                .describe("ticket resolved"),
            TransitionRule::new(&[Ticket::Resolved], Ticket::Closed, "close")
                .describe("ticket closed"),
            TransitionRule::new(&[Ticket::Resolved, Ticket::Closed], Ticket::Reopened, "reopen")
                .describe("ticket reopened"),
            TransitionRule::new(&[Ticket::Open], Ticket::Open, "escalate")
                .flag_action(FlagAction::add("escalated"))
                .describe("escalation flagged"),
            TransitionRule::new(&[Ticket::Open], Ticket::Open, "deescalate")
                .flag_action(FlagAction::remove("escalated"))
                .describe("escalation cleared"),
        ])
    }

    fn guards() -> GuardRegistry<Ticket> {
        let mut reg = GuardRegistry::new();
        reg.register("not_escalated", |r: &EntityRecord<Ticket>| {
            if r.has_flag("escalated") {
                GuardVerdict::Fail("ticket is escalated and needs review".into())
            } else {
                GuardVerdict::Pass
            }
        });
        reg
    }

    fn test_config(progression_delay_ms: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            progression_delay_ms,
            keepalive_secs: 30,
            bus_capacity: 64,
            entity_ttl_secs: 0,
        }
    }

    struct Fixture {
        engine: Arc<TransitionEngine<Ticket>>,
        store: Arc<MemoryStore<Ticket>>,
    }

    fn fixture(progressions: Vec<AutoProgression<Ticket>>, delay_ms: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let config = test_config(delay_ms);
        let bus = NotificationBus::new(config.bus_capacity, config.keepalive());
        let engine = TransitionEngine::new(
            Arc::clone(&store) as Arc<dyn EntityStore<Ticket>>,
            table(),
            guards(),
            progressions,
            bus,
            config,
        );
        Fixture { engine, store }
    }

    async fn seed(store: &MemoryStore<Ticket>, id: &str, status: Ticket) {
        store
            .put(EntityRecord::with_id(id, status, Value::Null), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn applies_matching_transition() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;

        let outcome = f.engine.submit_event("t-1", "triage", None, None).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Applied {
                from: Ticket::Open,
                to: Ticket::Triaged,
                description: "ticket triaged".into()
            }
        );

        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Triaged);
        assert_eq!(record.version, 1);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].from, Ticket::Open);
        assert_eq!(record.history[0].to, Ticket::Triaged);
    }

    #[tokio::test]
    async fn missing_entity_is_an_error() {
        let f = fixture(vec![], 10);
        let err = f.engine.submit_event("ghost", "triage", None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn no_matching_rule_rejects_without_mutation() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;
        let before = f.store.get("t-1").await.unwrap().unwrap();

        let outcome = f.engine.submit_event("t-1", "close", None, None).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected {
                reason: "no transition rule for close from open".into()
            }
        );

        let after = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.version, before.version);
        assert_eq!(after.updated_at, before.updated_at);

        let history = f.engine.list_history("t-1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, OutcomeKind::Rejected);
    }

    #[tokio::test]
    async fn requested_status_without_rule_rejects_with_both_names() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;

        let outcome = f
            .engine
            .submit_event("t-1", "triage", None, Some(Ticket::Closed))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected {
                reason: "invalid transition: cannot change from open to closed".into()
            }
        );
    }

    #[tokio::test]
    async fn guard_failure_rejects_then_clears() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;
        f.engine.submit_event("t-1", "escalate", None, None).await.unwrap();
        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();

        let outcome = f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Rejected {
                reason: "ticket is escalated and needs review".into()
            }
        );
        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Triaged);

        // Clear the blocking flag, then the identical event applies.
        let mut record = record;
        record.flags.remove("escalated");
        f.store.put(record, None).await.unwrap();

        let outcome = f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { to: Ticket::Resolved, .. }));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_noop_without_mutation() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;
        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();

        let first = f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        assert!(matches!(first, Outcome::Applied { to: Ticket::Resolved, .. }));
        let version = f.store.get("t-1").await.unwrap().unwrap().version;

        // At-least-once delivery: the same event arrives again.
        let replay = f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        assert_eq!(
            replay,
            Outcome::NoOp {
                reason: "already in target status resolved".into()
            }
        );

        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Resolved);
        assert_eq!(record.version, version);

        let history = f.engine.list_history("t-1").await;
        let applied = history
            .iter()
            .filter(|e| e.outcome == OutcomeKind::Applied && e.event_type == "resolve")
            .count();
        let noops = history
            .iter()
            .filter(|e| e.outcome == OutcomeKind::NoOp)
            .count();
        assert_eq!(applied, 1);
        assert_eq!(noops, 1);
    }

    #[tokio::test]
    async fn flag_action_applies_atomically_with_status() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;

        let outcome = f.engine.submit_event("t-1", "escalate", None, None).await.unwrap();
        assert!(matches!(outcome, Outcome::Applied { .. }));

        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Open);
        assert!(record.has_flag("escalated"));
        assert_eq!(record.version, 1);

        f.engine.submit_event("t-1", "deescalate", None, None).await.unwrap();
        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert!(!record.has_flag("escalated"));
    }

    #[tokio::test]
    async fn event_payload_merges_into_record() {
        let f = fixture(vec![], 10);
        f.store
            .put(
                EntityRecord::with_id("t-1", Ticket::Open, json!({"title": "crash", "severity": 2})),
                None,
            )
            .await
            .unwrap();

        f.engine
            .submit_event("t-1", "triage", Some(json!({"severity": 1, "assignee": "ops"})), None)
            .await
            .unwrap();

        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(
            record.payload,
            json!({"title": "crash", "severity": 1, "assignee": "ops"})
        );
    }

    #[tokio::test]
    async fn all_three_outcomes_are_broadcast() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;
        let mut sub = f.engine.bus().subscribe("t-1").await;

        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();
        f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            match sub.next().await.unwrap() {
                StreamItem::Event(n) => kinds.push(n.kind),
                other => panic!("expected event, got {other:?}"),
            }
        }
        assert_eq!(
            kinds,
            vec![
                "transition.applied",
                "transition.applied",
                "transition.noop",
                "transition.rejected"
            ]
        );
    }

    #[tokio::test]
    async fn auto_progression_advances_after_delay() {
        let progressions = vec![AutoProgression::new(Ticket::Triaged, Ticket::Resolved, "resolve")];
        let f = fixture(progressions, 30);
        seed(&f.store, "t-1", Ticket::Open).await;

        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Resolved);
    }

    #[tokio::test]
    async fn auto_progression_drops_when_status_changed_meanwhile() {
        let progressions = vec![AutoProgression::new(Ticket::Triaged, Ticket::Resolved, "resolve")];
        let f = fixture(progressions, 60);
        seed(&f.store, "t-1", Ticket::Open).await;

        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();
        // Manual intervention before the timer fires: resolve and close.
        f.engine.submit_event("t-1", "resolve", None, None).await.unwrap();
        f.engine.submit_event("t-1", "close", None, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Closed);

        // Only the two manual applied entries plus triage; no auto resolve.
        let applied: Vec<_> = f
            .engine
            .list_history("t-1")
            .await
            .into_iter()
            .filter(|e| e.outcome == OutcomeKind::Applied)
            .collect();
        assert_eq!(applied.len(), 3);
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_progressions() {
        let progressions = vec![AutoProgression::new(Ticket::Triaged, Ticket::Resolved, "resolve")];
        let f = fixture(progressions, 80);
        seed(&f.store, "t-1", Ticket::Open).await;

        f.engine.submit_event("t-1", "triage", None, None).await.unwrap();
        assert_eq!(f.engine.scheduler().pending(), 1);
        f.engine.scheduler().shutdown().await;
        assert_eq!(f.engine.scheduler().pending(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let record = f.store.get("t-1").await.unwrap().unwrap();
        assert_eq!(record.status, Ticket::Triaged);
    }

    #[tokio::test]
    async fn independent_entities_do_not_serialize_each_other() {
        let f = fixture(vec![], 10);
        seed(&f.store, "t-1", Ticket::Open).await;
        seed(&f.store, "t-2", Ticket::Open).await;

        let e1 = Arc::clone(&f.engine);
        let e2 = Arc::clone(&f.engine);
        let (a, b) = tokio::join!(
            async move { e1.submit_event("t-1", "triage", None, None).await },
            async move { e2.submit_event("t-2", "triage", None, None).await },
        );
        assert!(matches!(a.unwrap(), Outcome::Applied { .. }));
        assert!(matches!(b.unwrap(), Outcome::Applied { .. }));
    }

    #[tokio::test]
    async fn released_entity_locks_are_pruned() {
        let f = fixture(vec![], 10);
        for n in 0..8 {
            let id = format!("t-{n}");
            seed(&f.store, &id, Ticket::Open).await;
            f.engine.submit_event(&id, "triage", None, None).await.unwrap();
        }
        // Each acquisition sweeps released locks, so only the most recent
        // entity's entry survives the loop.
        assert_eq!(f.engine.entity_locks.lock().await.len(), 1);
    }

    #[test]
    fn payload_merge_semantics() {
        let mut base = json!({"a": 1, "b": 2});
        merge_payload(&mut base, json!({"b": 3, "c": 4}));
        assert_eq!(base, json!({"a": 1, "b": 3, "c": 4}));

        let mut base = json!({"a": 1});
        merge_payload(&mut base, json!("replaced"));
        assert_eq!(base, json!("replaced"));

        let mut base = Value::Null;
        merge_payload(&mut base, json!({"a": 1}));
        assert_eq!(base, json!({"a": 1}));
    }
}
