//! Triggers describe the schedulable sources of the graph: actions and
//! timers, plus the builtin startup/shutdown sources.

use std::time::Duration;

use crate::{Level, ReactionKey, ReactorKey, TokenKey};
use cadence_core::Tag;

/// What to do with an event scheduled closer than the trigger's minimum
/// interarrival time to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpacingPolicy {
    /// Drop the new event and release its payload.
    Drop,
    /// Move the new event out to the earliest admissible tag.
    #[default]
    Defer,
    /// Replace the still-queued previous event with the new one.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Scheduled relative to the logical clock, from within a reaction.
    LogicalAction,
    /// Scheduled relative to the physical clock, from any thread.
    PhysicalAction,
    /// Re-arms itself every `period` after first firing at `offset`.
    Timer { offset: Duration, period: Duration },
    /// Fires once at the origin tag.
    Startup,
    /// Fires once at the stop tag.
    Shutdown,
}

impl TriggerKind {
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            TriggerKind::LogicalAction | TriggerKind::PhysicalAction
        )
    }
}

/// Static descriptor of a schedulable source.
#[derive(Debug)]
pub struct Trigger {
    pub(crate) name: String,
    pub(crate) kind: TriggerKind,
    /// Offset applied to every scheduling request.
    pub(crate) min_delay: Duration,
    /// Minimum interarrival time between successive events; zero disables
    /// spacing enforcement.
    pub(crate) min_spacing: Duration,
    pub(crate) policy: SpacingPolicy,
    /// Reactions enabled when this trigger fires, with their levels.
    pub(crate) reactions: Vec<(Level, ReactionKey)>,
    pub(crate) reactor: ReactorKey,
}

impl Trigger {
    pub fn new(name: &str, kind: TriggerKind, reactor: ReactorKey) -> Self {
        Self {
            name: name.into(),
            kind,
            min_delay: Duration::ZERO,
            min_spacing: Duration::ZERO,
            policy: SpacingPolicy::default(),
            reactions: Vec::new(),
            reactor,
        }
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn with_spacing(mut self, min_spacing: Duration, policy: SpacingPolicy) -> Self {
        self.min_spacing = min_spacing;
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn reactor(&self) -> ReactorKey {
        self.reactor
    }

    pub fn downstream(&self) -> &[(Level, ReactionKey)] {
        &self.reactions
    }
}

/// Mutable per-trigger state, guarded by the scheduler critical section.
#[derive(Debug)]
pub(crate) struct TriggerState {
    /// Tag of the most recently inserted event, NEVER before the first.
    pub last_tag: Tag,
    /// Payload published while the trigger is firing at the current tag.
    /// Holds one token reference, released at tag cleanup.
    pub value: Option<TokenKey>,
    /// True while the trigger fires at the current tag (also for payload-less
    /// events).
    pub is_present: bool,
}

impl Default for TriggerState {
    fn default() -> Self {
        Self {
            last_tag: Tag::NEVER,
            value: None,
            is_present: false,
        }
    }
}
