//! Telemetry delivery: durable queue, disk file and HTTP sink

pub mod persistence;
pub mod queue;
pub mod sink;

pub use persistence::QueueFile;
pub use queue::DeliveryQueue;
pub use sink::HttpDeliverySink;
