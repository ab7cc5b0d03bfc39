//! The tag-ordered event queue.

use std::collections::BinaryHeap;

use crate::{TokenKey, TriggerKey};
use cadence_core::Tag;

/// A record on the event queue.
///
/// Dummy spacers carry no token and enable no reactions; they reserve a
/// microstep slot so interarrival spacing and FIFO scheduling order stay
/// observable on the queue. An identical (tag, trigger) pair may coexist
/// only when one of the two is a dummy.
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) tag: Tag,
    pub(crate) trigger: TriggerKey,
    pub(crate) token: Option<TokenKey>,
    pub(crate) is_dummy: bool,
}

impl Event {
    pub(crate) fn new(tag: Tag, trigger: TriggerKey, token: Option<TokenKey>) -> Self {
        Self {
            tag,
            trigger,
            token,
            is_dummy: false,
        }
    }

    pub(crate) fn dummy(tag: Tag, trigger: TriggerKey) -> Self {
        Self {
            tag,
            trigger,
            token: None,
            is_dummy: true,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn trigger(&self) -> TriggerKey {
        self.trigger
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[tag={},trigger={},dummy={}]",
            self.tag, self.trigger, self.is_dummy
        )
    }
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.trigger == other.trigger && self.is_dummy == other.is_dummy
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior. Ties on
        // the tag break deterministically on trigger identity, with real
        // events ahead of spacers.
        self.tag
            .cmp(&other.tag)
            .then(self.trigger.cmp(&other.trigger))
            .then(self.is_dummy.cmp(&other.is_dummy))
            .reverse()
    }
}

/// Min-heap of events keyed by tag.
///
/// All operations run inside the scheduler critical section; no lock-free
/// behavior is implied.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
}

impl EventQueue {
    pub fn push(&mut self, event: Event) {
        self.heap.push(event);
    }

    /// The earliest queued tag, without removing anything.
    pub fn peek_tag(&self) -> Option<Tag> {
        self.heap.peek().map(|event| event.tag)
    }

    /// Pop every event whose tag equals `tag`, in trigger order.
    pub fn pop_at(&mut self, tag: Tag) -> Vec<Event> {
        let mut events = Vec::new();
        while self.heap.peek().map(|e| e.tag == tag).unwrap_or(false) {
            events.push(self.heap.pop().unwrap());
        }
        events
    }

    /// True if a non-dummy event for `trigger` is queued at exactly `tag`.
    pub fn occupied(&self, trigger: TriggerKey, tag: Tag) -> bool {
        self.heap
            .iter()
            .any(|e| e.trigger == trigger && e.tag == tag && !e.is_dummy)
    }

    /// Remove and return the first event matching `pred`, rebuilding the
    /// heap. Rare path (replace policy, cancellations).
    pub fn remove_matching<F>(&mut self, pred: F) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let mut events = std::mem::take(&mut self.heap).into_vec();
        let removed = events.iter().position(&pred).map(|i| events.remove(i));
        self.heap = events.into();
        removed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
