//! Scheduler contexts passed into reaction bodies and shared with external
//! threads.
//!
//! [`ReactionContext`] is handed to a reaction while it executes: it carries
//! the frozen current tag and the scheduling / port capability surface.
//! [`AsyncContext`] is the cloneable handle for other threads; it can only
//! schedule physical actions and request a stop, which keeps asynchronous
//! logical scheduling unrepresentable.

use std::sync::Arc;
use std::time::Duration;

use crate::sched::state::SchedulePayload;
use crate::sched::RuntimeInner;
use cadence_arena::Key;
use crate::token::{Copier, Destructor};
use crate::trace::TraceEvent;
use crate::{
    PayloadData, PortKey, ReactionKey, ReactorKey, ReactorState, ScheduleError, Scheduled,
    TokenKey, TriggerKey,
};
use cadence_core::Tag;

pub struct ReactionContext {
    inner: Arc<RuntimeInner>,
    tag: Tag,
    reactor: ReactorKey,
    reaction: ReactionKey,
    /// Ports set by this reaction; downstream reactions are enqueued when the
    /// body returns.
    ports_set: Vec<PortKey>,
}

impl ReactionContext {
    pub(crate) fn new(
        inner: Arc<RuntimeInner>,
        tag: Tag,
        reactor: ReactorKey,
        reaction: ReactionKey,
    ) -> Self {
        Self {
            inner,
            tag,
            reactor,
            reaction,
            ports_set: Vec::new(),
        }
    }

    pub(crate) fn take_ports_set(&mut self) -> Vec<PortKey> {
        std::mem::take(&mut self.ports_set)
    }

    /// The logical tag of the currently executing reaction, frozen for its
    /// duration.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn reactor(&self) -> ReactorKey {
        self.reactor
    }

    /// Logical time elapsed since the origin.
    pub fn elapsed_logical_time(&self) -> Duration {
        self.tag.offset().unwrap_or_default()
    }

    /// Physical time elapsed since the origin, in nanoseconds.
    pub fn physical_time(&self) -> i64 {
        self.inner.clock.physical_now()
    }

    // --- scheduling primitives ------------------------------------------

    /// Schedule an event with no payload.
    pub fn schedule(
        &mut self,
        trigger: TriggerKey,
        offset: Duration,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, offset, SchedulePayload::None)
    }

    /// Schedule an event wrapping an integer payload.
    pub fn schedule_int(
        &mut self,
        trigger: TriggerKey,
        extra_delay: Duration,
        value: i64,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, extra_delay, SchedulePayload::Fresh(Box::new(value), 1))
    }

    /// Schedule an event carrying an existing token; the caller's reference
    /// transfers to the event (or is released if the event is dropped).
    pub fn schedule_token(
        &mut self,
        trigger: TriggerKey,
        extra_delay: Duration,
        token: TokenKey,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, extra_delay, SchedulePayload::Existing(token))
    }

    /// Schedule an event with a copy of `value` taken at call time.
    pub fn schedule_copy<T: PayloadData + Clone>(
        &mut self,
        trigger: TriggerKey,
        offset: Duration,
        value: &T,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(
            trigger,
            offset,
            SchedulePayload::Fresh(Box::new(value.clone()), 1),
        )
    }

    /// Schedule an event with a copy of `values`, element count preserved.
    pub fn schedule_copy_slice<T: PayloadData + Clone>(
        &mut self,
        trigger: TriggerKey,
        offset: Duration,
        values: &[T],
    ) -> Result<Scheduled, ScheduleError> {
        let len = values.len();
        self.schedule_internal(
            trigger,
            offset,
            SchedulePayload::Fresh(Box::new(values.to_vec()), len),
        )
    }

    /// Schedule an event taking ownership of an allocated payload; no copy.
    pub fn schedule_value<T: PayloadData>(
        &mut self,
        trigger: TriggerKey,
        extra_delay: Duration,
        value: Box<T>,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, extra_delay, SchedulePayload::Fresh(value, 1))
    }

    fn schedule_internal(
        &mut self,
        trigger: TriggerKey,
        extra_delay: Duration,
        payload: SchedulePayload,
    ) -> Result<Scheduled, ScheduleError> {
        let physical_now = self.inner.clock.physical_now();
        let result = {
            let mut state = self.inner.shared.state.lock().unwrap();
            state.schedule(
                &self.inner.graph,
                trigger,
                extra_delay,
                payload,
                physical_now,
                true,
            )
        };
        if let Ok(Scheduled::Queued(_)) = &result {
            self.inner.shared.event_q_changed.notify_all();
            self.inner.tracer.schedule_called(
                self.inner.trigger_pointer(trigger),
                self.tag,
                physical_now,
                i64::try_from(extra_delay.as_nanos()).unwrap_or(i64::MAX),
            );
        }
        result
    }

    /// Mint a token for later `schedule_token` / `set_port_token` calls.
    /// The returned key carries the creator's reference.
    pub fn mint_token(&mut self, value: Box<dyn PayloadData>, len: usize) -> TokenKey {
        self.inner.shared.state.lock().unwrap().tokens.create(value, len)
    }

    // --- trigger values --------------------------------------------------

    /// True if `trigger` is firing at the current tag.
    pub fn trigger_is_present(&self, trigger: TriggerKey) -> bool {
        let state = self.inner.shared.state.lock().unwrap();
        state
            .trigger_states
            .get(trigger)
            .map(|t| t.is_present)
            .unwrap_or(false)
    }

    /// Read the payload `trigger` is firing with at the current tag.
    pub fn read_trigger_with<T, F, R>(&self, trigger: TriggerKey, f: F) -> R
    where
        T: PayloadData,
        F: FnOnce(Option<&T>) -> R,
    {
        let state = self.inner.shared.state.lock().unwrap();
        let value = state
            .trigger_states
            .get(trigger)
            .and_then(|t| t.value)
            .and_then(|token| state.tokens.value(token))
            .and_then(|payload| payload.downcast_ref::<T>());
        f(value)
    }

    // --- ports -----------------------------------------------------------

    /// Mark `port` present with a scalar payload.
    pub fn set_port<T: PayloadData>(&mut self, port: PortKey, value: T) {
        self.publish(port, Some((Box::new(value) as Box<dyn PayloadData>, 1)));
    }

    /// Mark `port` present with an array payload.
    pub fn set_port_array<T: PayloadData>(&mut self, port: PortKey, values: Vec<T>) {
        let len = values.len();
        self.publish(port, Some((Box::new(values) as Box<dyn PayloadData>, len)));
    }

    /// Mark `port` present, forwarding an existing token. The caller's
    /// reference transfers to the port.
    pub fn set_port_token(&mut self, port: PortKey, token: TokenKey) {
        let mut state = self.inner.shared.state.lock().unwrap();
        state.publish_port(&self.inner.graph, port, Some(token));
        drop(state);
        self.ports_set.push(port);
    }

    /// Mark `port` present with no payload.
    pub fn set_port_present(&mut self, port: PortKey) {
        let mut state = self.inner.shared.state.lock().unwrap();
        state.publish_port(&self.inner.graph, port, None);
        drop(state);
        self.ports_set.push(port);
    }

    fn publish(&mut self, port: PortKey, payload: Option<(Box<dyn PayloadData>, usize)>) {
        let mut state = self.inner.shared.state.lock().unwrap();
        let token = payload.map(|(value, len)| {
            let (destructor, copier) = {
                let slot = &state.port_slots[port];
                (slot.destructor.clone(), slot.copier.clone())
            };
            state.tokens.create_with(
                value,
                len,
                crate::FreePolicy::TokenAndValue,
                destructor,
                copier,
            )
        });
        state.publish_port(&self.inner.graph, port, token);
        drop(state);
        self.ports_set.push(port);
    }

    /// True if `port` is present at the current tag.
    pub fn port_is_present(&self, port: PortKey) -> bool {
        let state = self.inner.shared.state.lock().unwrap();
        state
            .port_slots
            .get(port)
            .map(|slot| slot.is_present)
            .unwrap_or(false)
    }

    /// Read the payload published on `port` at the current tag.
    pub fn read_port_with<T, F, R>(&self, port: PortKey, f: F) -> R
    where
        T: PayloadData,
        F: FnOnce(Option<&T>) -> R,
    {
        let state = self.inner.shared.state.lock().unwrap();
        let value = state
            .port_slots
            .get(port)
            .and_then(|slot| slot.token)
            .and_then(|token| state.tokens.value(token))
            .and_then(|payload| payload.downcast_ref::<T>());
        f(value)
    }

    /// Replace the user destructor applied to payloads published on `port`.
    pub fn set_port_destructor(&mut self, port: PortKey, destructor: Option<Destructor>) {
        let mut state = self.inner.shared.state.lock().unwrap();
        state.port_slots[port].destructor = destructor;
    }

    /// Replace the user copy-constructor for payloads published on `port`.
    pub fn set_port_copier(&mut self, port: PortKey, copier: Option<Copier>) {
        let mut state = self.inner.shared.state.lock().unwrap();
        state.port_slots[port].copier = copier;
    }

    /// Cancel reactions still queued at the current tag (mode switches).
    ///
    /// Running reactions are unaffected. Cancelled reactions return to
    /// inactive and trigger normally at later tags. Returns how many entries
    /// were removed.
    pub fn cancel_queued_reactions<F>(&mut self, pred: F) -> usize
    where
        F: Fn(ReactionKey) -> bool,
    {
        let mut state = self.inner.shared.state.lock().unwrap();
        state.cancel_reactions(|entry| pred(entry.key))
    }

    // --- deadline & stop -------------------------------------------------

    /// Check this reaction's physical deadline. Returns true when violated;
    /// with `invoke_handler`, the reaction's handler runs on `state` first.
    pub fn check_deadline(&self, state: &mut dyn ReactorState, invoke_handler: bool) -> bool {
        let reaction = &self.inner.graph.reactions[self.reaction];
        let Some(deadline) = reaction.deadline.as_ref() else {
            return false;
        };
        let lag = self.tag.lag(self.inner.clock.physical_now());
        if lag <= i64::try_from(deadline.bound.as_nanos()).unwrap_or(i64::MAX) {
            return false;
        }
        self.inner.tracer.event(
            TraceEvent::ReactionDeadlineMissed,
            self.reaction.index() as u64,
            -1,
            self.reaction.index() as i32,
            self.tag,
            self.inner.clock.physical_now(),
        );
        if invoke_handler {
            (deadline.handler)(state);
        }
        true
    }

    /// Request a cooperative stop: reactions at the current tag complete,
    /// shutdown reactions fire one microstep later, then the program ends.
    pub fn request_stop(&mut self) {
        self.inner.request_stop();
    }

    pub fn stp_offset(&self) -> Duration {
        self.inner.shared.state.lock().unwrap().stp_offset
    }

    pub fn set_stp_offset(&mut self, offset: Duration) {
        self.inner.shared.state.lock().unwrap().stp_offset = offset;
    }

    /// A cloneable handle for scheduling physical actions from other threads.
    pub fn async_context(&self) -> AsyncContext {
        AsyncContext {
            inner: Arc::clone(&self.inner),
        }
    }

    // --- user trace records ----------------------------------------------

    /// Emit a `UserEvent` trace record for a point registered with
    /// [`crate::Scheduler::register_trace_point`].
    pub fn trace_user_event(&self, point: u64) {
        self.inner.tracer.event(
            TraceEvent::UserEvent,
            point,
            -1,
            -1,
            self.tag,
            self.inner.clock.physical_now(),
        );
    }

    /// Emit a `UserValue` trace record carrying `value`.
    pub fn trace_user_value(&self, point: u64, value: i64) {
        self.inner.tracer.emit(crate::trace::TraceRecord {
            event_type: TraceEvent::UserValue,
            pointer: point,
            src_id: -1,
            dst_id: -1,
            logical_time: self.tag.time(),
            microstep: self.tag.microstep(),
            physical_time: self.inner.clock.physical_now(),
            trigger: 0,
            extra_delay: value,
        });
    }
}

impl std::fmt::Debug for ReactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionContext")
            .field("tag", &self.tag)
            .field("reactor", &self.reactor)
            .field("reaction", &self.reaction)
            .finish()
    }
}

/// A handle for threads outside the scheduler: physical actions and stop
/// requests only.
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncContext").finish()
    }
}

impl AsyncContext {
    pub(crate) fn new(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// Schedule a physical action with no payload.
    pub fn schedule_physical(
        &self,
        trigger: TriggerKey,
        extra_delay: Duration,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, extra_delay, SchedulePayload::None)
    }

    /// Schedule a physical action carrying a payload.
    pub fn schedule_physical_value<T: PayloadData>(
        &self,
        trigger: TriggerKey,
        extra_delay: Duration,
        value: T,
    ) -> Result<Scheduled, ScheduleError> {
        self.schedule_internal(trigger, extra_delay, SchedulePayload::Fresh(Box::new(value), 1))
    }

    fn schedule_internal(
        &self,
        trigger: TriggerKey,
        extra_delay: Duration,
        payload: SchedulePayload,
    ) -> Result<Scheduled, ScheduleError> {
        let physical_now = self.inner.clock.physical_now();
        let result = {
            let mut state = self.inner.shared.state.lock().unwrap();
            let tag = state.current_tag;
            let out = state.schedule(
                &self.inner.graph,
                trigger,
                extra_delay,
                payload,
                physical_now,
                false,
            );
            if out.is_ok() {
                self.inner.tracer.schedule_called(
                    self.inner.trigger_pointer(trigger),
                    tag,
                    physical_now,
                    i64::try_from(extra_delay.as_nanos()).unwrap_or(i64::MAX),
                );
            }
            out
        };
        if let Ok(Scheduled::Queued(_)) = &result {
            self.inner.shared.event_q_changed.notify_all();
        }
        result
    }

    /// Request a cooperative stop from outside the scheduler.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }
}
