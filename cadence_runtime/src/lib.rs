//! Runtime types and discrete-event executor for Cadence.
//!
//! The runtime executes a fixed graph of reactors whose reactions fire in
//! response to timed events. Determinism is preserved by advancing a logical
//! clock in tags while a pool of worker threads executes independent
//! reactions in parallel, synchronized by a level barrier.

#![deny(clippy::all)]

mod context;
mod event;
pub mod federated;
mod graph;
mod port;
mod reaction;
mod sched;
mod token;
pub mod trace;
mod trigger;

pub use cadence_core::keys::{PortKey, ReactionKey, ReactorKey, TokenKey, TriggerKey};
pub use cadence_core::{Clock, ManualClock, MonotonicClock, Tag};

pub use context::{AsyncContext, ReactionContext};
pub use event::{Event, EventQueue};
pub use federated::{FederationAdapter, FederationError};
pub use graph::{GraphError, ReactorGraph};
pub use port::PortDesc;
pub use reaction::{Deadline, Level, Reaction, ReactionFn, ReactionQueue, ReactionStatus};
pub use sched::{Config, Scheduler, SchedulerError};
pub use token::{Copier, Destructor, FreePolicy, TokenPool};
pub use trigger::{SpacingPolicy, Trigger, TriggerKind};

use downcast_rs::Downcast;

/// Data carried by tokens and ports.
///
/// Payloads are type-erased while queued; reactions recover the concrete type
/// by downcasting at the read site.
pub trait PayloadData: std::fmt::Debug + Downcast + Send + Sync {}
downcast_rs::impl_downcast!(PayloadData);
impl<T> PayloadData for T where T: std::fmt::Debug + Send + Sync + 'static {}

/// Per-reactor state passed mutably to that reactor's reactions.
pub trait ReactorState: Downcast + Send {}
downcast_rs::impl_downcast!(ReactorState);
impl<T> ReactorState for T where T: Send + 'static {}

/// A successful or intentionally-dropped scheduling request.
///
/// The event handle is a monotonic per-process counter; an event dropped by a
/// spacing policy or a pending stop is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The event was inserted on the event queue.
    Queued(EventHandle),
    /// The event was intentionally dropped; any payload was released.
    Dropped,
}

impl Scheduled {
    /// The handle, if the event was queued.
    pub fn handle(self) -> Option<EventHandle> {
        match self {
            Scheduled::Queued(handle) => Some(handle),
            Scheduled::Dropped => None,
        }
    }

    pub fn is_dropped(self) -> bool {
        matches!(self, Scheduled::Dropped)
    }
}

/// Identifies one successful `schedule` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(pub(crate) u64);

/// Errors surfaced by the scheduling primitives.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown trigger {0}")]
    UnknownTrigger(TriggerKey),

    #[error("trigger {0} is not schedulable (kind {1:?})")]
    NotSchedulable(TriggerKey, TriggerKind),

    #[error("logical action {0} scheduled from outside a reaction")]
    AsynchronousLogical(TriggerKey),
}
