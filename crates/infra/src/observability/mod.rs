//! Logging setup and forwarding of log events into telemetry delivery

pub mod forwarding;
pub mod logging;

pub use forwarding::LogForwardingLayer;
pub use logging::init_tracing;
