//! Reactions and the level/deadline-ordered reaction queue.

use std::collections::BinaryHeap;
use std::time::Duration;

use crate::{context::ReactionContext, ReactionKey, ReactorKey, ReactorState};

/// Topological depth of a reaction in the dependency DAG.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Level(pub usize);

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl From<usize> for Level {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// The boxed work function of a reaction.
pub type ReactionFn = Box<dyn Fn(&mut ReactionContext, &mut dyn ReactorState) + Send + Sync>;

/// A physical-time deadline on a reaction, with its handler.
pub struct Deadline {
    pub(crate) bound: Duration,
    pub(crate) handler: Box<dyn Fn(&mut dyn ReactorState) + Send + Sync>,
}

impl Deadline {
    pub fn new(
        bound: Duration,
        handler: impl Fn(&mut dyn ReactorState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            bound,
            handler: Box::new(handler),
        }
    }
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("bound", &self.bound)
            .finish()
    }
}

/// A statically-known unit of work.
pub struct Reaction {
    pub(crate) name: String,
    /// The reactor whose state this reaction mutates.
    pub(crate) reactor: ReactorKey,
    pub(crate) level: Level,
    pub(crate) deadline: Option<Deadline>,
    /// One bit per independent reaction chain; two same-level reactions may
    /// run in parallel only if their masks are disjoint.
    pub(crate) chain_mask: u64,
    pub(crate) body: ReactionFn,
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.name)
            .field("reactor", &self.reactor)
            .field("level", &self.level)
            .field("deadline", &self.deadline)
            .field("chain_mask", &format_args!("{:#x}", self.chain_mask))
            .finish()
    }
}

impl Reaction {
    pub fn new(
        name: &str,
        reactor: ReactorKey,
        level: Level,
        body: impl Fn(&mut ReactionContext, &mut dyn ReactorState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reactor,
            level,
            deadline: None,
            chain_mask: u64::MAX,
            body: Box::new(body),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Restrict the reaction to the given dependency chains. The default
    /// mask overlaps everything, serializing the level.
    pub fn with_chain_mask(mut self, chain_mask: u64) -> Self {
        self.chain_mask = chain_mask;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reactor(&self) -> ReactorKey {
        self.reactor
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub(crate) fn deadline_nanos(&self) -> i64 {
        self.deadline
            .as_ref()
            .map(|d| i64::try_from(d.bound.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(i64::MAX)
    }
}

/// Activation state of a reaction, toggled per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReactionStatus {
    #[default]
    Inactive,
    Queued,
    Running,
}

/// An entry on the reaction queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedReaction {
    pub level: Level,
    /// Deadline in nanoseconds, `i64::MAX` when none: earliest first.
    pub deadline: i64,
    pub key: ReactionKey,
}

impl PartialOrd for QueuedReaction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedReaction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Level is the primary key; the deadline breaks ties within a level
        // (earliest-deadline-first); the key makes the order total. Reversed
        // for min-heap behavior on the max-heap.
        self.level
            .cmp(&other.level)
            .then(self.deadline.cmp(&other.deadline))
            .then(self.key.cmp(&other.key))
            .reverse()
    }
}

/// Min-heap of queued reactions keyed by (level, deadline).
#[derive(Debug, Default)]
pub struct ReactionQueue {
    heap: BinaryHeap<QueuedReaction>,
}

impl ReactionQueue {
    pub(crate) fn push(&mut self, entry: QueuedReaction) {
        self.heap.push(entry);
    }

    pub(crate) fn peek(&self) -> Option<&QueuedReaction> {
        self.heap.peek()
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedReaction> {
        self.heap.pop()
    }

    /// Remove every queued entry matching `pred`. The caller owns the status
    /// bookkeeping: removed reactions must be returned to inactive, which
    /// `SchedulerState::cancel_reactions` does.
    pub(crate) fn remove_matching<F>(&mut self, pred: F) -> Vec<QueuedReaction>
    where
        F: Fn(&QueuedReaction) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.heap).into_iter().partition(&pred);
        self.heap = kept.into();
        removed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
