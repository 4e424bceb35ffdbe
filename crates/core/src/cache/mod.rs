//! Cache reconciliation logic

pub mod completion;
pub mod reconcile;
