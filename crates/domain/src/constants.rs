//! Application constants
//!
//! Centralized location for protocol and storage constants shared by the
//! client, the cache and the delivery queue.

// Signed HTTP protocol
pub const CLIENT_VERSION_HEADER: &str = "FD-Client-Version";
pub const AUTHENTICATION_HEADER: &str = "FD-Authentication";
pub const CONTENT_HASH_HEADER: &str = "FD-Content-Hash";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_BLOCKING_TIMEOUT_MS: u64 = 4000;

// Server routes
pub const DIAGRAMS_PATH: &str = "/diagrams";
pub const SESSIONS_PATH: &str = "/sessions";

// Cache layout
pub const INDEX_FILE_NAME: &str = "index.json";
pub const DIAGRAM_DIR_EXTENSION: &str = "fd";
pub const PAYLOAD_FILE_NAME: &str = "diagram.bin";
pub const HASH_SUFFIX: &str = "protect";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30 * 60;

// Display names
pub const FREE_DIAGRAM_NAME: &str = "Free Diagram";
pub const UNNAMED_DIAGRAM: &str = "<not set>";

// Delivery queue
pub const DEFAULT_DELIVERY_BATCH_MAX: usize = 1000;
pub const DEFAULT_DELIVERY_RETRY_MS: u64 = 7000;
pub const DEFAULT_DELIVERY_SHUTDOWN_MS: u64 = 5000;
pub const DELIVERY_API_KEY_HEADER: &str = "DD-API-KEY";
pub const QUEUE_FILE_NAME: &str = "delivery-queue.json";
pub const CREDENTIALS_FILE_NAME: &str = "credentials.json";
