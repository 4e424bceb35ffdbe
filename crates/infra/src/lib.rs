//! # diagsync infrastructure
//!
//! All I/O of the sync layer:
//! - Signed HTTP client with in-flight tracking (`http`)
//! - Tamper-evident diagram mirror and its reconciler (`cache`)
//! - Durable, batched telemetry delivery (`delivery`)
//! - Local session and credential storage (`session`)
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements the ports defined in `diagsync-core`
//! - Converts its own error types into `DiagSyncError` at the boundary

pub mod cache;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod http;
pub mod observability;
pub mod scheduling;
pub mod session;

// Re-export commonly used items
pub use cache::{CacheReconciler, DiagramStore, ReconcileState, StoreError};
pub use delivery::{DeliveryQueue, HttpDeliverySink};
pub use errors::InfraError;
pub use http::{ApiRequest, BlockingReply, Credentials, HttpError, HttpResponse, SignedClient};
pub use session::{CredentialStore, LocalSession};
