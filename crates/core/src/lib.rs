//! # Diagsync Core
//!
//! Pure sync logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Reconciliation planning and the staleness rule
//! - Completion tracking for fan-out request cycles
//! - In-memory delivery queue state (chunking, replace-by-key, ack by id)
//! - Port interfaces (traits) for sessions, telemetry and delivery sinks
//!
//! ## Architecture Principles
//! - Only depends on `diagsync-domain`
//! - No disk, HTTP, or timer code
//! - All external dependencies via traits

pub mod cache;
pub mod delivery;
pub mod session;

// Re-export specific items to avoid ambiguity
pub use cache::completion::{Completion, CompletionTracker};
pub use cache::reconcile::{plan_reconciliation, should_replace, CycleRequest, ReconcilePlan};
pub use delivery::batch::{BatchQueue, InFlightBatch, PushOutcome};
pub use delivery::ports::{DeliverySink, TelemetryPort};
pub use session::ports::SessionPort;
