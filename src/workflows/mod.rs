//! Ready-made workflow definitions: statuses, transition tables, guards, and
//! auto-progressions for the two shipped domains.

pub mod pet;
pub mod scoring;
