//! Delivery queue state and ports

pub mod batch;
pub mod ports;
