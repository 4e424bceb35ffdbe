//! Domain utilities

pub mod serde;

pub use self::serde::base64_bytes;
