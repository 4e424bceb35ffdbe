//! Disk-backed, tamper-evident mirror of the user's diagrams

pub mod protected;
pub mod reconciler;
pub mod store;

pub use protected::{ProtectedFiles, StoreError, StoreResult};
pub use reconciler::{CacheReconciler, ReconcileState};
pub use store::{DiagramStore, LoadedCache};
