//! Shared scheduler state: the single critical section every queue, tag, and
//! trigger mutation goes through, plus the two condition variables workers
//! and event producers synchronize on.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::port::PortSlot;
use crate::reaction::QueuedReaction;
use crate::token::TokenPool;
use crate::trigger::{TriggerKind, TriggerState};
use crate::{
    Event, EventHandle, EventQueue, Level, PayloadData, PortKey, ReactionKey, ReactionQueue,
    ReactionStatus, ReactorGraph, ScheduleError, Scheduled, SpacingPolicy, TokenKey, TriggerKey,
};
use cadence_arena::SecondaryMap;
use cadence_core::Tag;

/// Payload handed to the internal schedule path.
pub(crate) enum SchedulePayload {
    None,
    /// A fresh payload; a token is minted with the creator's reference.
    Fresh(Box<dyn PayloadData>, usize),
    /// An existing token; the caller's reference transfers to the event.
    Existing(TokenKey),
}

pub(crate) struct SchedulerState {
    pub current_tag: Tag,
    pub events: EventQueue,
    pub reactions: ReactionQueue,
    pub tokens: TokenPool,
    pub trigger_states: SecondaryMap<TriggerKey, TriggerState>,
    pub port_slots: SecondaryMap<PortKey, PortSlot>,
    pub reaction_status: SecondaryMap<ReactionKey, ReactionStatus>,

    pub stop_requested: bool,
    /// Bound on advancement; FOREVER until a timeout or stop request sets it.
    pub stop_tag: Tag,
    /// The final tag has been committed; shutdown reactions are running or
    /// already drained.
    pub stopping: bool,
    /// The federation adapter failed; advancement stops consulting it.
    pub federation_failed: bool,

    /// Safe-to-process offset for federated input absence.
    pub stp_offset: Duration,

    next_handle: u64,

    // Worker coordination.
    /// The level currently allowed to execute.
    pub barrier: Level,
    /// Number of reactions executing right now.
    pub running: usize,
    /// Union of the chain masks of executing reactions.
    pub running_chains: u64,
    /// One worker at a time drives tag advancement.
    pub advancing: bool,
    /// The committed tag still needs its end-of-tag cleanup.
    pub needs_cleanup: bool,
    pub terminated: bool,
}

pub(crate) struct Shared {
    pub state: Mutex<SchedulerState>,
    /// Signaled when the event queue changes or a stop is requested; wakes
    /// the advancing worker out of its physical-time sleep.
    pub event_q_changed: Condvar,
    /// Signaled when reactions are enqueued or complete; wakes searching
    /// workers.
    pub reaction_q_changed: Condvar,
}

impl SchedulerState {
    pub fn new(graph: &ReactorGraph) -> Self {
        Self {
            current_tag: Tag::ZERO,
            events: EventQueue::default(),
            reactions: ReactionQueue::default(),
            tokens: TokenPool::default(),
            trigger_states: graph
                .triggers
                .keys()
                .map(|k| (k, TriggerState::default()))
                .collect(),
            port_slots: graph
                .ports
                .iter()
                .map(|(k, desc)| {
                    (
                        k,
                        PortSlot {
                            destructor: desc.destructor.clone(),
                            copier: desc.copier.clone(),
                            ..PortSlot::default()
                        },
                    )
                })
                .collect(),
            reaction_status: graph
                .reactions
                .keys()
                .map(|k| (k, ReactionStatus::Inactive))
                .collect(),
            stop_requested: false,
            stop_tag: Tag::FOREVER,
            stopping: false,
            federation_failed: false,
            stp_offset: Duration::ZERO,
            next_handle: 0,
            barrier: Level(0),
            running: 0,
            running_chains: 0,
            advancing: false,
            needs_cleanup: false,
            terminated: false,
        }
    }

    /// The schedule primitive everything funnels into. Runs entirely inside
    /// the critical section; the caller signals `event_q_changed` on success.
    pub fn schedule(
        &mut self,
        graph: &ReactorGraph,
        trigger_key: TriggerKey,
        extra_delay: Duration,
        payload: SchedulePayload,
        physical_now: i64,
        from_reaction: bool,
    ) -> Result<Scheduled, ScheduleError> {
        let trigger = graph
            .triggers
            .get(trigger_key)
            .ok_or(ScheduleError::UnknownTrigger(trigger_key))?;
        if !trigger.kind.is_schedulable() {
            self.release_payload(payload);
            return Err(ScheduleError::NotSchedulable(trigger_key, trigger.kind));
        }

        let logical = matches!(trigger.kind, TriggerKind::LogicalAction);
        if logical && !from_reaction {
            // Logical actions must be scheduled from within a reaction;
            // asynchronous logical scheduling is undefined behavior.
            debug_assert!(from_reaction, "logical action scheduled asynchronously");
            self.release_payload(payload);
            return Err(ScheduleError::AsynchronousLogical(trigger_key));
        }

        let total_delay = trigger.min_delay + extra_delay;
        let mut candidate = if logical {
            self.current_tag.after(total_delay)
        } else {
            // Physical actions anchor on the physical clock, never earlier
            // than the logical clock, with the delays on top.
            let base = physical_now.max(self.current_tag.time());
            let delay = i64::try_from(total_delay.as_nanos()).unwrap_or(i64::MAX);
            Tag::new(base.saturating_add(delay), 0)
        };
        // The event queue head may never precede the current tag.
        if candidate <= self.current_tag {
            candidate = self.current_tag.after(Duration::ZERO);
        }

        // A pending stop refuses anything strictly beyond the current tag.
        if self.stop_requested && !total_delay.is_zero() {
            self.release_payload(payload);
            return Ok(Scheduled::Dropped);
        }

        // Minimum interarrival time.
        let last_tag = self.trigger_states[trigger_key].last_tag;
        if !trigger.min_spacing.is_zero() && last_tag != Tag::NEVER {
            let earliest = last_tag.strict_after(trigger.min_spacing);
            if candidate < earliest {
                match trigger.policy {
                    SpacingPolicy::Drop => {
                        self.release_payload(payload);
                        return Ok(Scheduled::Dropped);
                    }
                    SpacingPolicy::Defer => candidate = earliest,
                    SpacingPolicy::Replace => {
                        let current_tag = self.current_tag;
                        let removed = self.events.remove_matching(|e| {
                            e.trigger == trigger_key && !e.is_dummy && e.tag >= current_tag
                        });
                        if let Some(removed) = removed {
                            if let Some(token) = removed.token {
                                self.tokens.dec_ref(token);
                            }
                            candidate = candidate.max(earliest);
                            // The vacated microstep slot stays reserved so
                            // later schedule calls keep FIFO order.
                            if removed.tag.time() == candidate.time()
                                && removed.tag < candidate
                                && removed.tag > current_tag
                            {
                                self.events.push(Event::dummy(removed.tag, trigger_key));
                            }
                        } else {
                            candidate = earliest;
                        }
                    }
                }
            }
        }

        // Same-tag coexistence: chain past queued events one microstep at a
        // time, preserving the FIFO order of scheduling calls.
        while self.events.occupied(trigger_key, candidate) {
            candidate = candidate.after(Duration::ZERO);
        }

        if candidate > self.stop_tag {
            self.release_payload(payload);
            return Ok(Scheduled::Dropped);
        }

        let token = match payload {
            SchedulePayload::None => None,
            SchedulePayload::Fresh(value, len) => Some(self.tokens.create(value, len)),
            SchedulePayload::Existing(key) => Some(key),
        };
        if let Some(token) = token {
            // The event takes its own reference; the caller's hold ends here.
            self.tokens.inc_ref(token);
            self.tokens.dec_ref(token);
        }
        self.events.push(Event::new(candidate, trigger_key, token));
        self.trigger_states[trigger_key].last_tag = candidate;

        self.next_handle += 1;
        Ok(Scheduled::Queued(EventHandle(self.next_handle)))
    }

    fn release_payload(&mut self, payload: SchedulePayload) {
        match payload {
            SchedulePayload::None => {}
            SchedulePayload::Fresh(value, _) => drop(value),
            SchedulePayload::Existing(key) => self.tokens.dec_ref(key),
        }
    }

    /// Queue a reaction at the current tag, once.
    pub fn enqueue_reaction(&mut self, graph: &ReactorGraph, level: Level, key: ReactionKey) {
        if self.reaction_status[key] != ReactionStatus::Inactive {
            return;
        }
        self.reaction_status[key] = ReactionStatus::Queued;
        self.reactions.push(QueuedReaction {
            level,
            deadline: graph.reactions[key].deadline_nanos(),
            key,
        });
    }

    /// Claim the next runnable reaction under the level barrier and chain
    /// discipline, or `None` if the caller must wait.
    pub fn next_runnable(&mut self, graph: &ReactorGraph) -> Option<ReactionKey> {
        let head_level = self.reactions.peek()?.level;
        if self.running == 0 {
            self.barrier = head_level;
        } else if head_level > self.barrier {
            // Reactions at a deeper level wait for the current level to drain.
            return None;
        }

        let mut skipped = Vec::new();
        let mut chosen = None;
        while let Some(head) = self.reactions.peek() {
            if head.level != self.barrier {
                break;
            }
            let entry = self.reactions.pop().unwrap();
            let mask = graph.reactions[entry.key].chain_mask;
            if mask & self.running_chains == 0 {
                chosen = Some((entry, mask));
                break;
            }
            skipped.push(entry);
        }
        for entry in skipped {
            self.reactions.push(entry);
        }

        let (entry, mask) = chosen?;
        self.running += 1;
        self.running_chains |= mask;
        self.reaction_status[entry.key] = ReactionStatus::Running;
        Some(entry.key)
    }

    pub fn complete_reaction(&mut self, graph: &ReactorGraph, key: ReactionKey) {
        self.reaction_status[key] = ReactionStatus::Inactive;
        self.running -= 1;
        self.running_chains &= !graph.reactions[key].chain_mask;
    }

    /// Cancel queued reactions matching `pred` (mode-switch path), returning
    /// each one to inactive so it can be enqueued again at a later tag.
    /// Returns the number of cancelled reactions.
    pub fn cancel_reactions<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&QueuedReaction) -> bool,
    {
        let removed = self.reactions.remove_matching(pred);
        for entry in &removed {
            self.reaction_status[entry.key] = ReactionStatus::Inactive;
        }
        removed.len()
    }

    /// Publish a token on a port at the current tag, taking the caller's
    /// reference. The token holds the port's fan-out in references until
    /// cleanup.
    pub fn publish_port(&mut self, graph: &ReactorGraph, port: PortKey, token: Option<TokenKey>) {
        let fan_out = graph.ports[port].fan_out();
        self.retract_port(graph, port);
        let slot = &mut self.port_slots[port];
        slot.is_present = true;
        slot.token = token;
        if let Some(token) = token {
            self.tokens.add_refs(token, fan_out);
            self.tokens.dec_ref(token);
        }
    }

    fn retract_port(&mut self, graph: &ReactorGraph, port: PortKey) {
        let fan_out = graph.ports[port].fan_out();
        let slot = &mut self.port_slots[port];
        slot.is_present = false;
        if let Some(token) = slot.token.take() {
            for _ in 0..fan_out {
                self.tokens.dec_ref(token);
            }
        }
    }

    /// End-of-tag cleanup: reset every present port and fired trigger,
    /// releasing their token references.
    pub fn cleanup_tag(&mut self, graph: &ReactorGraph) {
        for port in graph.ports.keys() {
            if self.port_slots[port].is_present {
                self.retract_port(graph, port);
            }
        }
        for trigger in graph.triggers.keys() {
            let state = &mut self.trigger_states[trigger];
            if state.is_present {
                state.is_present = false;
                if let Some(token) = state.value.take() {
                    self.tokens.dec_ref(token);
                }
            }
        }
        self.needs_cleanup = false;
    }

    /// Drop every still-queued event, releasing event-held token references.
    /// Runs once at shutdown, after the workers have joined.
    pub fn release_pending_events(&mut self) {
        while let Some(tag) = self.events.peek_tag() {
            for event in self.events.pop_at(tag) {
                if let Some(token) = event.token {
                    self.tokens.dec_ref(token);
                }
            }
        }
    }

    /// Bound advancement at `tag`. Advancement converts the bound into the
    /// final tag and enables the shutdown triggers there.
    pub fn set_stop(&mut self, tag: Tag) {
        self.stop_requested = true;
        self.stop_tag = self.stop_tag.min(tag);
        tracing::debug!(stop_tag = %self.stop_tag, "stop requested");
    }
}
