//! Ports carry values between reactions at a single tag.
//!
//! The static [`PortDesc`] records a port's fan-out and the downstream
//! reactions it triggers; the per-tag slot (present flag plus published
//! token) lives in the scheduler-locked state and is reset when the logical
//! clock advances.

use crate::token::{Copier, Destructor};
use crate::{Level, ReactionKey, TokenKey};

/// Static descriptor of an input or output port.
pub struct PortDesc {
    pub(crate) name: String,
    /// Number of destinations a published token fans out to; at least one
    /// reference is held while the port is present.
    pub(crate) num_destinations: usize,
    /// Reactions triggered at the current tag when this port becomes present.
    pub(crate) downstream: Vec<(Level, ReactionKey)>,
    /// User destructor applied to payloads published on this port.
    pub(crate) destructor: Option<Destructor>,
    /// User copy-constructor for payloads published on this port.
    pub(crate) copier: Option<Copier>,
}

impl std::fmt::Debug for PortDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortDesc")
            .field("name", &self.name)
            .field("num_destinations", &self.num_destinations)
            .field("downstream", &self.downstream)
            .finish()
    }
}

impl PortDesc {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            num_destinations: 0,
            downstream: Vec::new(),
            destructor: None,
            copier: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn downstream(&self) -> &[(Level, ReactionKey)] {
        &self.downstream
    }

    /// References a published token holds while this port is present.
    pub(crate) fn fan_out(&self) -> usize {
        self.num_destinations.max(1)
    }
}

/// Per-tag port state, guarded by the scheduler critical section.
#[derive(Default)]
pub(crate) struct PortSlot {
    /// Present only during the tag in which the port was set.
    pub is_present: bool,
    /// Published payload; holds `fan_out()` token references until cleanup.
    pub token: Option<TokenKey>,
    /// Runtime-settable payload hooks, seeded from the descriptor.
    pub destructor: Option<Destructor>,
    pub copier: Option<Copier>,
}

impl std::fmt::Debug for PortSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSlot")
            .field("is_present", &self.is_present)
            .field("token", &self.token)
            .finish()
    }
}
