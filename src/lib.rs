//! Stateflow: a guarded state-machine orchestrator for long-running entities
//! driven by asynchronous events.
//!
//! Entities carry a status from a closed enumeration and move between
//! statuses only through declared [`TransitionRule`]s, optionally gated by
//! named [guard](guards::GuardRegistry) predicates and paired with atomic
//! flag side effects. Every attempt is audited, every outcome is broadcast
//! to live subscribers, and landing in certain statuses can schedule a
//! delayed, re-validated follow-up transition.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stateflow::store::{EntityStore, MemoryStore};
//! use stateflow::workflows::pet::{self, PetStatus};
//! use stateflow::{EntityRecord, NotificationBus, OrchestratorConfig, TransitionEngine};
//!
//! tokio::runtime::Runtime::new().unwrap().block_on(async {
//!     let store = Arc::new(MemoryStore::new());
//!     let config = OrchestratorConfig::default();
//!     let bus = NotificationBus::new(config.bus_capacity, config.keepalive());
//!     let engine = TransitionEngine::new(
//!         Arc::clone(&store) as Arc<dyn EntityStore<PetStatus>>,
//!         pet::transition_table(),
//!         pet::guard_registry(),
//!         pet::auto_progressions(),
//!         bus,
//!         config,
//!     );
//!
//!     let pet = EntityRecord::with_id("pet-1", PetStatus::Healthy, serde_json::Value::Null);
//!     store.put(pet, None).await.unwrap();
//!
//!     let outcome = engine
//!         .submit_event("pet-1", pet::ADOPTION_READY, None, None)
//!         .await
//!         .unwrap();
//!     println!("pet-1: {outcome:?}");
//!
//!     engine.scheduler().shutdown().await;
//! });
//! ```

pub mod audit;
pub mod bus;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod guards;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod workflows;

pub use audit::{AuditEntry, AuditLog, OutcomeKind};
pub use bus::{Notification, NotificationBus, StreamItem, Subscription};
pub use config::OrchestratorConfig;
pub use engine::{Outcome, TransitionEngine};
pub use entity::{EntityRecord, EntityStatus, HistoryEntry};
pub use error::{EngineError, StoreError};
pub use guards::{GuardRegistry, GuardVerdict};
pub use rules::{FlagAction, FlagOp, TransitionRule, TransitionTable};
pub use scheduler::{AutoProgression, ProgressionScheduler};
