//! `Display`/`FromStr` for the string-backed enums in `types`
//!
//! ```rust
//! use diagsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Idle,
//!     FetchingIndex,
//! }
//!
//! impl_domain_status_conversions!(Phase {
//!     Idle => "idle",
//!     FetchingIndex => "fetching_index",
//! });
//!
//! assert_eq!(Phase::FetchingIndex.to_string(), "fetching_index");
//! assert_eq!("IDLE".parse::<Phase>(), Ok(Phase::Idle));
//! ```

/// Implements `Display` (canonical lowercase string) and case-insensitive
/// `FromStr` for a fieldless enum.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
