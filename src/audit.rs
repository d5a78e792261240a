//! Append-only audit log of transition attempts.
//!
//! Every attempt lands here exactly once, accepted or not. Entries for one
//! entity appear in the order the engine processed them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::entity::EntityStatus;

/// How a transition attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Applied,
    Rejected,
    NoOp,
}

/// One audited transition attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct AuditEntry<S: EntityStatus> {
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub event_type: String,
    pub from: S,
    /// Target status: the matched rule's target, the caller's requested
    /// status for an unmatched request, or absent.
    pub to: Option<S>,
    pub outcome: OutcomeKind,
    pub reason: Option<String>,
}

/// In-memory append-only log keyed by entity id.
pub struct AuditLog<S: EntityStatus> {
    entries: RwLock<HashMap<String, Vec<AuditEntry<S>>>>,
}

impl<S: EntityStatus> AuditLog<S> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record(&self, entry: AuditEntry<S>) {
        let mut entries = self.entries.write().await;
        entries.entry(entry.entity_id.clone()).or_default().push(entry);
    }

    /// Ordered attempt history for one entity. Empty when unknown.
    pub async fn list_history(&self, entity_id: &str) -> Vec<AuditEntry<S>> {
        self.entries
            .read()
            .await
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl<S: EntityStatus> Default for AuditLog<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum S {
        A,
        B,
    }

    impl EntityStatus for S {
        fn name(&self) -> &'static str {
            match self {
                S::A => "a",
                S::B => "b",
            }
        }
    }

    fn entry(entity_id: &str, outcome: OutcomeKind) -> AuditEntry<S> {
        AuditEntry {
            timestamp: Utc::now(),
            entity_id: entity_id.to_string(),
            event_type: "go".into(),
            from: S::A,
            to: Some(S::B),
            outcome,
            reason: None,
        }
    }

    #[tokio::test]
    async fn entries_keep_insertion_order() {
        let log = AuditLog::new();
        log.record(entry("e-1", OutcomeKind::Rejected)).await;
        log.record(entry("e-1", OutcomeKind::Applied)).await;
        log.record(entry("e-1", OutcomeKind::NoOp)).await;

        let history = log.list_history("e-1").await;
        let outcomes: Vec<_> = history.iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            vec![OutcomeKind::Rejected, OutcomeKind::Applied, OutcomeKind::NoOp]
        );
    }

    #[test]
    fn entry_serialization_roundtrip() {
        let original = entry("e-1", OutcomeKind::Applied);
        let json = serde_json::to_string(&original).unwrap();
        let back: AuditEntry<S> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entity_id, "e-1");
        assert_eq!(back.outcome, OutcomeKind::Applied);
        assert_eq!(back.to, Some(S::B));
    }

    #[tokio::test]
    async fn entities_are_isolated() {
        let log = AuditLog::new();
        log.record(entry("e-1", OutcomeKind::Applied)).await;
        log.record(entry("e-2", OutcomeKind::Applied)).await;

        assert_eq!(log.list_history("e-1").await.len(), 1);
        assert_eq!(log.list_history("e-2").await.len(), 1);
        assert!(log.list_history("e-3").await.is_empty());
    }
}
