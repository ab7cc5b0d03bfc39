//! The federation adapter seam.
//!
//! In federated mode the scheduler consults an adapter before committing a
//! tag advance and when coordinating a stop. The adapter is opaque to the
//! core: RTI transport, handshakes, and clock synchronization all live behind
//! this trait.

use cadence_core::Tag;

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("lost connection to the runtime infrastructure: {0}")]
    Disconnected(String),

    #[error("federation protocol error: {0}")]
    Protocol(String),
}

/// Coordination callbacks the scheduler invokes at its tag-advance seam.
///
/// `wait_for_tag` may block; the scheduler calls it outside the critical
/// section. Errors are coerced into a stop request.
pub trait FederationAdapter: Send + Sync {
    /// Announce the earliest tag this federate could advance to.
    fn notify_next_event(&self, tag: Tag);

    /// Block until advancement to `tag` (or an earlier granted tag) is safe.
    fn wait_for_tag(&self, tag: Tag) -> Result<Tag, FederationError>;

    /// Forward a local stop request to the federation.
    fn send_stop_request(&self);

    /// Block until the federation agrees on a stop tag.
    fn await_stop_granted(&self) -> Result<Tag, FederationError>;
}
