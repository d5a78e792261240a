//! Pet lifecycle workflow.
//!
//! Staff drive most transitions through `status.update.requested` with an
//! explicit target; agents contribute health and adoption assessments through
//! their own events. A `needs_data` flag blocks adoption until cleared.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityRecord, EntityStatus};
use crate::guards::{GuardRegistry, GuardVerdict};
use crate::rules::{FlagAction, TransitionRule, TransitionTable};
use crate::scheduler::AutoProgression;

pub const STATUS_UPDATE_REQUESTED: &str = "status.update.requested";
pub const FEEDING_REMINDER_COMPLETED: &str = "feeding.reminder.completed";
pub const HEALTH_TREATMENT_REQUIRED: &str = "health.treatment_required";
pub const HEALTH_NO_TREATMENT_NEEDED: &str = "health.no_treatment_needed";
pub const ADOPTION_NEEDS_DATA: &str = "adoption.needs_data";
pub const ADOPTION_READY: &str = "adoption.ready";

pub const NEEDS_DATA_FLAG: &str = "needs_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PetStatus {
    New,
    InQuarantine,
    Healthy,
    Ill,
    UnderTreatment,
    Recovered,
    Available,
    Pending,
    Adopted,
}

impl EntityStatus for PetStatus {
    fn name(&self) -> &'static str {
        match self {
            PetStatus::New => "new",
            PetStatus::InQuarantine => "in_quarantine",
            PetStatus::Healthy => "healthy",
            PetStatus::Ill => "ill",
            PetStatus::UnderTreatment => "under_treatment",
            PetStatus::Recovered => "recovered",
            PetStatus::Available => "available",
            PetStatus::Pending => "pending",
            PetStatus::Adopted => "adopted",
        }
    }
}

use PetStatus::*;

/// The declarative rule table. `status.update.requested` carries several
/// rules distinguished only by target status; the caller's requested status
/// narrows the match.
pub fn transition_table() -> TransitionTable<PetStatus> {
    TransitionTable::new(vec![
        TransitionRule::new(&[New], InQuarantine, FEEDING_REMINDER_COMPLETED)
            .describe("pet moved to quarantine after feeding setup"),
        TransitionRule::new(&[InQuarantine], Healthy, STATUS_UPDATE_REQUESTED)
            .describe("staff health check: pet cleared from quarantine"),
        TransitionRule::new(&[Healthy, InQuarantine, Available], Ill, STATUS_UPDATE_REQUESTED)
            .describe("staff assessment: pet identified as ill"),
        TransitionRule::new(&[Healthy], Available, STATUS_UPDATE_REQUESTED)
            .describe("staff decision: pet ready for adoption"),
        TransitionRule::new(&[Ill], UnderTreatment, STATUS_UPDATE_REQUESTED)
            .describe("staff decision: treatment started"),
        TransitionRule::new(&[UnderTreatment, Ill], Recovered, STATUS_UPDATE_REQUESTED)
            .describe("staff assessment: treatment completed"),
        TransitionRule::new(&[Recovered, New], Healthy, STATUS_UPDATE_REQUESTED)
            .describe("staff clearance: pet fully recovered"),
        TransitionRule::new(&[Available], Pending, STATUS_UPDATE_REQUESTED)
            .describe("adoption application received"),
        TransitionRule::new(&[Pending], Adopted, STATUS_UPDATE_REQUESTED)
            .describe("adoption completed"),
        TransitionRule::new(&[Pending], Available, STATUS_UPDATE_REQUESTED)
            .describe("adoption application rejected or cancelled"),
        // Agent-driven health transitions.
        TransitionRule::new(&[Healthy, InQuarantine], Ill, HEALTH_TREATMENT_REQUIRED)
            .describe("agent assessment: pet requires medical treatment"),
        TransitionRule::new(&[Healthy, InQuarantine], Healthy, HEALTH_NO_TREATMENT_NEEDED)
            .describe("agent assessment: pet remains healthy"),
        // Agent-driven adoption transitions.
        TransitionRule::new(&[Healthy], Healthy, ADOPTION_NEEDS_DATA)
            .flag_action(FlagAction::add(NEEDS_DATA_FLAG))
            .describe("agent assessment: pet needs additional data before adoption"),
        TransitionRule::new(&[Healthy], Available, ADOPTION_READY)
            .guard("no_needs_data_flag")
            .describe("agent assessment: pet ready for adoption"),
    ])
}

pub fn guard_registry() -> GuardRegistry<PetStatus> {
    let mut guards = GuardRegistry::new();
    guards.register("must_be_healthy", |pet: &EntityRecord<PetStatus>| {
        if pet.status == Healthy {
            GuardVerdict::Pass
        } else {
            GuardVerdict::Fail(format!(
                "Pet must be healthy (current: {})",
                pet.status.name()
            ))
        }
    });
    guards.register("no_needs_data_flag", |pet: &EntityRecord<PetStatus>| {
        if pet.has_flag(NEEDS_DATA_FLAG) {
            GuardVerdict::Fail("Pet has needs_data flag blocking adoption".into())
        } else {
            GuardVerdict::Pass
        }
    });
    guards
}

/// Statuses the system progresses out of on its own, each via a synthesized
/// status update request.
pub fn auto_progressions() -> Vec<AutoProgression<PetStatus>> {
    vec![
        AutoProgression::new(Healthy, Available, STATUS_UPDATE_REQUESTED),
        AutoProgression::new(Ill, UnderTreatment, STATUS_UPDATE_REQUESTED),
        AutoProgression::new(Recovered, Healthy, STATUS_UPDATE_REQUESTED),
    ]
}
