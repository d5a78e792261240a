//! Declarative transition rules: the table is data, the engine is the matcher.

use serde::{Deserialize, Serialize};

use crate::entity::EntityStatus;

/// Whether a flag action adds or removes the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagOp {
    Add,
    Remove,
}

/// Optional side effect applied atomically with a status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagAction {
    pub op: FlagOp,
    pub flag: String,
}

impl FlagAction {
    pub fn add(flag: &str) -> Self {
        Self {
            op: FlagOp::Add,
            flag: flag.to_string(),
        }
    }

    pub fn remove(flag: &str) -> Self {
        Self {
            op: FlagOp::Remove,
            flag: flag.to_string(),
        }
    }
}

/// A single declarative transition rule.
///
/// Eligible when the incoming event matches `event` and the entity's current
/// status is in `from`. Guards are evaluated in declaration order and must
/// all pass.
#[derive(Debug, Clone)]
pub struct TransitionRule<S> {
    pub from: Vec<S>,
    pub to: S,
    pub event: String,
    pub guards: Vec<String>,
    pub flag_action: Option<FlagAction>,
    pub description: String,
}

impl<S: EntityStatus> TransitionRule<S> {
    pub fn new(from: &[S], to: S, event: &str) -> Self {
        Self {
            from: from.to_vec(),
            to,
            event: event.to_string(),
            guards: Vec::new(),
            flag_action: None,
            description: String::new(),
        }
    }

    /// Human-readable summary carried into notifications and logs.
    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// Append a named guard. Order matters: evaluation short-circuits.
    pub fn guard(mut self, name: &str) -> Self {
        self.guards.push(name.to_string());
        self
    }

    pub fn flag_action(mut self, action: FlagAction) -> Self {
        self.flag_action = Some(action);
        self
    }
}

/// Ordered set of transition rules for one workflow.
///
/// Immutable after construction; shared across the process behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TransitionTable<S> {
    rules: Vec<TransitionRule<S>>,
}

impl<S: EntityStatus> TransitionTable<S> {
    pub fn new(rules: Vec<TransitionRule<S>>) -> Self {
        Self { rules }
    }

    /// First declared rule whose event and source status match.
    ///
    /// When `requested_to` is supplied the match is narrowed to rules whose
    /// target equals it — this is how a single event (such as a status update
    /// request) can carry several rules distinguished only by target status.
    /// Declaration order is the tie-break among remaining candidates.
    pub fn find(
        &self,
        status: S,
        event: &str,
        requested_to: Option<S>,
    ) -> Option<&TransitionRule<S>> {
        self.rules.iter().find(|rule| {
            rule.event == event
                && rule.from.contains(&status)
                && requested_to.is_none_or(|to| rule.to == to)
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
