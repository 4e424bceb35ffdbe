//! Signed HTTP client
//!
//! Requests to the API are signed with HMAC-SHA256 over a canonical string
//! and tracked in an in-flight registry until their reply has been handled.

pub mod client;
pub mod error;
pub mod in_flight;
pub mod reply;
pub mod request;
pub mod signing;

pub use client::{SignedClient, SignedClientBuilder};
pub use error::{classify_transport, HttpError, TransportErrorKind};
pub use in_flight::{InFlightRegistry, PendingRequest, RequestId};
pub use reply::{check_reply, BlockingReply, HttpResponse, PendingReply};
pub use request::{ApiRequest, Target};
pub use signing::Credentials;
