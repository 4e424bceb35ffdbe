//! Serialization utilities for domain types
//!
//! Diagram payloads are opaque bytes; on the wire and in JSON files they are
//! carried as standard base64 strings.

/// Serialize `Vec<u8>` as a base64 string
///
/// # Usage
/// ```rust
/// use diagsync_domain::utils::base64_bytes;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "base64_bytes")]
///     data: Vec<u8>,
/// }
/// ```
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serde serialization result type
    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Accepts `null` as an empty payload; index rows from the server omit it.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(text) => STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
