//! Port interfaces for login state

use diagsync_domain::SessionState;
use tokio::sync::watch;

/// Read side of the application session
pub trait SessionPort: Send + Sync {
    /// Current login state
    fn state(&self) -> SessionState;

    /// Change notifications; the receiver starts at the current state.
    fn subscribe(&self) -> watch::Receiver<SessionState>;
}
