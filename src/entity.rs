//! Entity records: the durable unit of work the engine orchestrates.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed status enumeration of a workflow.
///
/// Implementors are plain `Copy` enums; the engine, audit log, and
/// notification bus identify statuses by their stable [`name`](Self::name).
pub trait EntityStatus:
    Copy + Eq + Hash + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable machine-readable name, e.g. `"in_quarantine"`.
    fn name(&self) -> &'static str;
}

/// One applied transition in an entity's timeline. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<S> {
    pub timestamp: DateTime<Utc>,
    pub from: S,
    pub to: S,
    pub event_type: String,
}

/// The record being orchestrated: a scoring job, a managed pet, or any other
/// long-running entity with a status.
///
/// `status`, `flags`, and `history` are mutated exclusively by the
/// [`TransitionEngine`](crate::engine::TransitionEngine); every other
/// component treats a record as a read-only snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
// The EntityStatus supertraits already carry serde; extra derive-generated
// bounds on S would be ambiguous.
#[serde(bound = "")]
pub struct EntityRecord<S: EntityStatus> {
    pub id: String,
    pub status: S,
    /// String tags that can block or redirect future transitions. Added and
    /// removed only as the side effect of a matched rule.
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry<S>>,
    /// Opaque domain data. The engine shallow-merges event payloads into it
    /// on applied transitions and otherwise leaves it alone.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Bumped on every persist; lets stale snapshots be detected.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: EntityStatus> EntityRecord<S> {
    /// Create a record with a generated id in the given initial status.
    pub fn new(status: S, payload: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), status, payload)
    }

    /// Create a record with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, status: S, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status,
            flags: BTreeSet::new(),
            history: Vec::new(),
            payload,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}
