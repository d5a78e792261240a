//! Scoring-job workflow.
//!
//! A submission moves from pending through processing to scored, then is
//! enriched with gateway results and completed. Failures are terminal. All
//! transitions arrive as queue events, so every rule tolerates at-least-once
//! delivery through the engine's no-op replay path.

use serde::{Deserialize, Serialize};

use crate::entity::EntityStatus;
use crate::guards::GuardRegistry;
use crate::rules::{TransitionRule, TransitionTable};
use crate::scheduler::AutoProgression;

pub const SCORING_STARTED: &str = "scoring.started";
pub const SCORING_SUCCEEDED: &str = "scoring.succeeded";
pub const SCORING_FAILED: &str = "scoring.failed";
pub const ENRICH: &str = "enrich";
pub const COMPLETE: &str = "complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Scored,
    Enriched,
    Completed,
    Failed,
}

impl EntityStatus for JobStatus {
    fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Scored => "scored",
            JobStatus::Enriched => "enriched",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

use JobStatus::*;

pub fn transition_table() -> TransitionTable<JobStatus> {
    TransitionTable::new(vec![
        TransitionRule::new(&[Pending], Processing, SCORING_STARTED)
            .describe("worker picked up the submission"),
        TransitionRule::new(&[Processing, Scored], Scored, SCORING_SUCCEEDED)
            .describe("scores computed"),
        TransitionRule::new(&[Pending, Processing], Failed, SCORING_FAILED)
            .describe("scoring failed"),
        TransitionRule::new(&[Scored, Enriched], Enriched, ENRICH)
            .describe("gateway enrichment merged"),
        TransitionRule::new(&[Enriched, Completed], Completed, COMPLETE)
            .describe("workflow completed"),
    ])
}

/// Scoring jobs have no guards; the table alone constrains movement.
pub fn guard_registry() -> GuardRegistry<JobStatus> {
    GuardRegistry::new()
}

/// Scoring jobs never self-progress; every step is an external event.
pub fn auto_progressions() -> Vec<AutoProgression<JobStatus>> {
    Vec::new()
}
