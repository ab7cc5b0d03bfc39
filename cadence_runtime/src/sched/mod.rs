//! The scheduler: tag advancement and the worker pool.
//!
//! Execution is worker-driven. Every worker loops between claiming runnable
//! reactions (under the level barrier and chain discipline) and, when the
//! reaction queue drains with nothing in flight, advancing the logical clock:
//! the advancing worker pops all events at the next tag, converts them into
//! reaction enqueues, and wakes the pool. One global critical section guards
//! all shared scheduler state; reaction bodies run outside it.

pub(crate) mod state;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::trace::{TraceEvent, TraceWriter, Tracer};
use crate::trigger::TriggerKind;
use crate::{
    AsyncContext, Event, FederationAdapter, GraphError, PortKey, ReactionContext, ReactionKey,
    ReactorGraph, TriggerKey,
};
use cadence_arena::Key;
use cadence_core::{Clock, MonotonicClock, Tag};
use state::{SchedulerState, Shared};

/// Scheduler configuration.
#[derive(Debug)]
pub struct Config {
    /// Terminate at this logical offset from the origin.
    pub timeout: Option<Duration>,
    /// Skip wall-clock synchronization and run as fast as possible.
    pub fast_forward: bool,
    /// Keep the scheduler alive waiting for physical actions when the event
    /// queue runs dry.
    pub keep_alive: bool,
    /// Worker thread count, at least one.
    pub workers: usize,
    /// Initial safe-to-process offset for federated execution.
    pub stp_offset: Duration,
    /// Write a binary execution trace to this path.
    pub trace_path: Option<std::path::PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: None,
            fast_forward: true,
            keep_alive: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            stp_offset: Duration::ZERO,
            trace_path: None,
        }
    }
}

impl Config {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fast_forward(mut self, fast_forward: bool) -> Self {
        self.fast_forward = fast_forward;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_stp_offset(mut self, stp_offset: Duration) -> Self {
        self.stp_offset = stp_offset;
        self
    }

    pub fn with_trace_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to create trace file: {0}")]
    Trace(#[from] std::io::Error),
}

/// Everything workers and contexts share for the lifetime of a run.
pub(crate) struct RuntimeInner {
    pub graph: ReactorGraph,
    pub shared: Shared,
    pub clock: Box<dyn Clock>,
    pub tracer: Tracer,
    pub federation: Option<Box<dyn FederationAdapter>>,
    pub config: Config,
}

enum Advance {
    /// A tag was committed; reactions may be queued.
    Worked,
    /// The final tag has drained; the run is over.
    Terminated,
}

impl RuntimeInner {
    /// Synthetic trace pointer for a trigger: triggers follow the reactions
    /// in the object table.
    pub fn trigger_pointer(&self, key: TriggerKey) -> u64 {
        (self.graph.reactions.len() + key.index()) as u64
    }

    /// Cooperative stop: bound advancement one microstep past the current
    /// tag (or at the federation's granted tag) and wake everyone.
    pub fn request_stop(&self) {
        let granted = self.federation.as_ref().map(|fed| {
            fed.send_stop_request();
            fed.await_stop_granted()
        });

        let mut guard = self.shared.state.lock().unwrap();
        let tag = match granted {
            Some(Ok(tag)) => tag,
            Some(Err(error)) => {
                tracing::error!(%error, "federation stop coordination failed");
                guard.current_tag.after(Duration::ZERO)
            }
            None => guard.current_tag.after(Duration::ZERO),
        };
        guard.set_stop(tag);
        drop(guard);
        self.shared.event_q_changed.notify_all();
        self.shared.reaction_q_changed.notify_all();
    }

    /// Drive the logical clock to the next tag. Called by the single worker
    /// holding the `advancing` flag; consumes and returns the state guard
    /// because federated coordination and physical-time waits release it.
    fn advance<'a>(
        &'a self,
        mut guard: MutexGuard<'a, SchedulerState>,
    ) -> (MutexGuard<'a, SchedulerState>, Advance) {
        if guard.needs_cleanup {
            guard.cleanup_tag(&self.graph);
        }
        if guard.stopping {
            guard.terminated = true;
            return (guard, Advance::Terminated);
        }

        loop {
            if guard.terminated {
                return (guard, Advance::Terminated);
            }
            // Reactions appeared while this worker held the advancing flag.
            if !guard.reactions.is_empty() || guard.running > 0 {
                return (guard, Advance::Worked);
            }

            let next = match guard.events.peek_tag() {
                Some(tag) => tag,
                None if guard.stop_requested => guard.stop_tag,
                None if !self.config.keep_alive && self.federation.is_none() => {
                    let tag = guard.current_tag.after(Duration::ZERO);
                    guard.set_stop(tag);
                    guard.stop_tag
                }
                None => {
                    // Sleep until a physical action or a stop request.
                    tracing::debug!("event queue empty, waiting for asynchronous events");
                    self.tracer.event(
                        TraceEvent::WorkerWaitStarts,
                        0,
                        -1,
                        -1,
                        guard.current_tag,
                        self.clock.physical_now(),
                    );
                    guard = self.shared.event_q_changed.wait(guard).unwrap();
                    self.tracer.event(
                        TraceEvent::WorkerWaitEnds,
                        0,
                        -1,
                        -1,
                        guard.current_tag,
                        self.clock.physical_now(),
                    );
                    continue;
                }
            };

            let is_final = next >= guard.stop_tag;
            let next = next.min(guard.stop_tag);

            // Federated coordination happens outside the critical section;
            // the adapter may block on the RTI.
            if let Some(fed) = self.federation.as_ref().filter(|_| !guard.federation_failed) {
                fed.notify_next_event(next);
                drop(guard);
                let granted = fed.wait_for_tag(next);
                guard = self.shared.state.lock().unwrap();
                match granted {
                    Ok(granted) if granted < next => {
                        // Upstream events up to `granted` are still inbound.
                        continue;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::error!(%error, "federation failed, coercing to stop");
                        guard.federation_failed = true;
                        let tag = guard.current_tag.after(Duration::ZERO);
                        guard.set_stop(tag);
                        continue;
                    }
                }
                // The queue may have changed while unlocked.
                if guard.events.peek_tag().map(|t| t < next).unwrap_or(false)
                    || guard.stop_tag < next
                {
                    continue;
                }
            }

            // Wall-clock synchronization, interruptible by physical actions
            // and stop requests.
            if !self.config.fast_forward {
                let mut target = next.time();
                if self.federation.is_some() {
                    target = target
                        .saturating_add(i64::try_from(guard.stp_offset.as_nanos()).unwrap_or(0));
                }
                let now = self.clock.physical_now();
                if now < target {
                    let advance_by = Duration::from_nanos((target - now) as u64);
                    tracing::debug!(advance = ?advance_by, "sleeping until physical time");
                    let (g, _timeout) = self
                        .shared
                        .event_q_changed
                        .wait_timeout(guard, advance_by)
                        .unwrap();
                    guard = g;
                    continue;
                }
            }

            // Commit.
            self.tracer.event(
                TraceEvent::SchedulerAdvancingTimeStarts,
                0,
                -1,
                -1,
                guard.current_tag,
                self.clock.physical_now(),
            );
            tracing::debug!(tag = %next, "advancing");
            let st = &mut *guard;
            st.current_tag = next;
            for event in st.events.pop_at(next) {
                if event.is_dummy {
                    continue;
                }
                let trigger = &self.graph.triggers[event.trigger()];
                let trigger_state = &mut st.trigger_states[event.trigger()];
                trigger_state.is_present = true;
                if let Some(token) = event.token {
                    if let Some(previous) = trigger_state.value.replace(token) {
                        st.tokens.dec_ref(previous);
                    }
                }
                if let TriggerKind::Timer { period, .. } = trigger.kind() {
                    if !period.is_zero() {
                        // Re-arm unconditionally; events past the stop tag
                        // are simply never processed.
                        let rearm = next.strict_after(period);
                        st.events.push(Event::new(rearm, event.trigger(), None));
                        st.trigger_states[event.trigger()].last_tag = rearm;
                    }
                }
                for &(level, reaction) in self.graph.triggers[event.trigger()].downstream() {
                    st.enqueue_reaction(&self.graph, level, reaction);
                }
            }
            if is_final {
                st.stop_requested = true;
                st.stopping = true;
                for trigger in self
                    .graph
                    .triggers_of_kind(|k| matches!(k, TriggerKind::Shutdown))
                {
                    st.trigger_states[trigger].is_present = true;
                    for &(level, reaction) in self.graph.triggers[trigger].downstream() {
                        st.enqueue_reaction(&self.graph, level, reaction);
                    }
                }
            }
            st.needs_cleanup = true;
            self.tracer.event(
                TraceEvent::SchedulerAdvancingTimeEnds,
                0,
                -1,
                -1,
                next,
                self.clock.physical_now(),
            );
            return (guard, Advance::Worked);
        }
    }
}

/// Run one claimed reaction outside the critical section; returns the ports
/// it set.
fn execute_reaction(
    inner: &Arc<RuntimeInner>,
    worker: usize,
    key: ReactionKey,
    tag: Tag,
) -> Vec<PortKey> {
    let reaction = &inner.graph.reactions[key];
    let reactor = &inner.graph.reactors[reaction.reactor()];

    tracing::trace!(
        tag = %tag,
        "worker {worker} executing {}/{}",
        reactor.name,
        reaction.name()
    );
    inner.tracer.event(
        TraceEvent::ReactionStarts,
        key.index() as u64,
        worker as i32,
        key.index() as i32,
        tag,
        inner.clock.physical_now(),
    );

    let mut reactor_state = reactor.state.lock().unwrap();
    let mut ctx = ReactionContext::new(Arc::clone(inner), tag, reaction.reactor(), key);
    // A violated deadline runs the handler in place of the body.
    let violated = ctx.check_deadline(reactor_state.as_mut(), true);
    if !violated {
        (reaction.body)(&mut ctx, reactor_state.as_mut());
    }
    drop(reactor_state);

    inner.tracer.event(
        TraceEvent::ReactionEnds,
        key.index() as u64,
        worker as i32,
        key.index() as i32,
        tag,
        inner.clock.physical_now(),
    );
    ctx.take_ports_set()
}

fn worker_loop(inner: &Arc<RuntimeInner>, worker: usize) {
    let mut guard = inner.shared.state.lock().unwrap();
    loop {
        if guard.terminated {
            break;
        }
        if let Some(key) = guard.next_runnable(&inner.graph) {
            let tag = guard.current_tag;
            drop(guard);
            let ports_set = execute_reaction(inner, worker, key, tag);

            guard = inner.shared.state.lock().unwrap();
            for port in ports_set {
                for &(level, reaction) in inner.graph.ports[port].downstream() {
                    guard.enqueue_reaction(&inner.graph, level, reaction);
                }
            }
            guard.complete_reaction(&inner.graph, key);
            inner.shared.reaction_q_changed.notify_all();
        } else if guard.reactions.is_empty() && guard.running == 0 && !guard.advancing {
            guard.advancing = true;
            let (g, outcome) = inner.advance(guard);
            guard = g;
            guard.advancing = false;
            inner.shared.reaction_q_changed.notify_all();
            if matches!(outcome, Advance::Terminated) {
                inner.shared.event_q_changed.notify_all();
                break;
            }
        } else {
            // Blocked on the level barrier, a chain conflict, or another
            // worker advancing the clock.
            inner.tracer.event(
                TraceEvent::WorkerWaitStarts,
                0,
                worker as i32,
                -1,
                guard.current_tag,
                inner.clock.physical_now(),
            );
            guard = inner.shared.reaction_q_changed.wait(guard).unwrap();
            inner.tracer.event(
                TraceEvent::WorkerWaitEnds,
                0,
                worker as i32,
                -1,
                guard.current_tag,
                inner.clock.physical_now(),
            );
        }
    }
}

/// The discrete-event executor.
pub struct Scheduler {
    inner: Arc<RuntimeInner>,
    shutdown_tag: Option<Tag>,
    user_trace_points: u64,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("shutdown_tag", &self.shutdown_tag)
            .finish()
    }
}

impl Scheduler {
    pub fn new(graph: ReactorGraph, config: Config) -> Result<Self, SchedulerError> {
        graph.validate()?;

        let tracer = match &config.trace_path {
            Some(path) => {
                let mut writer = TraceWriter::create(path)?;
                for (key, reaction) in graph.reactions.iter() {
                    let reactor = &graph.reactors[reaction.reactor()].name;
                    writer.register(
                        key.index() as u64,
                        &format!("reaction {}/{}", reactor, reaction.name()),
                    );
                }
                for (key, trigger) in graph.triggers.iter() {
                    writer.register(
                        (graph.reactions.len() + key.index()) as u64,
                        &format!("trigger {}", trigger.name()),
                    );
                }
                Tracer::new(writer)
            }
            None => Tracer::disabled(),
        };

        let state = SchedulerState::new(&graph);
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                shared: Shared {
                    state: Mutex::new(state),
                    event_q_changed: Condvar::new(),
                    reaction_q_changed: Condvar::new(),
                },
                graph,
                clock: Box::new(MonotonicClock::new()),
                tracer,
                federation: None,
                config,
            }),
            shutdown_tag: None,
            user_trace_points: 0,
        })
    }

    /// Substitute the platform clock. Must be called before the scheduler is
    /// shared (contexts handed out or `run` started).
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("clock must be set before the scheduler is shared")
            .clock = Box::new(clock);
        self
    }

    /// Attach a federation adapter; advancement will coordinate through it.
    pub fn with_federation(mut self, adapter: impl FederationAdapter + 'static) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("federation must be set before the scheduler is shared")
            .federation = Some(Box::new(adapter));
        self
    }

    /// Register a named user trace point; reactions emit records for it with
    /// [`ReactionContext::trace_user_event`].
    pub fn register_trace_point(&mut self, description: &str) -> u64 {
        let pointer = (self.inner.graph.reactions.len() + self.inner.graph.triggers.len()) as u64
            + self.user_trace_points;
        self.user_trace_points += 1;
        self.inner.tracer.register(pointer, description);
        pointer
    }

    /// A handle for scheduling physical actions from outside the scheduler.
    pub fn async_context(&self) -> AsyncContext {
        AsyncContext::new(self.inner.clone())
    }

    /// Execute the reactor program to completion.
    pub fn run(&mut self) {
        let inner = &self.inner;
        let workers = inner.config.workers.max(1);

        // Populate startup and timer events.
        {
            let mut guard = inner.shared.state.lock().unwrap();
            let st = &mut *guard;
            if let Some(timeout) = inner.config.timeout {
                st.stop_tag = Tag::from_offset(timeout);
            }
            st.stp_offset = inner.config.stp_offset;
            for key in inner
                .graph
                .triggers_of_kind(|k| matches!(k, TriggerKind::Startup))
            {
                st.events.push(Event::new(Tag::ZERO, key, None));
                st.trigger_states[key].last_tag = Tag::ZERO;
            }
            for key in inner
                .graph
                .triggers_of_kind(|k| matches!(k, TriggerKind::Timer { .. }))
            {
                let TriggerKind::Timer { offset, .. } = inner.graph.triggers[key].kind() else {
                    unreachable!();
                };
                let first = Tag::from_offset(offset);
                if first <= st.stop_tag {
                    st.events.push(Event::new(first, key, None));
                    st.trigger_states[key].last_tag = first;
                }
            }
        }

        inner.tracer.start(inner.clock.physical_now());
        tracing::info!(workers, "Starting the execution");

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let inner = &self.inner;
                std::thread::Builder::new()
                    .name(format!("cadence-worker-{worker}"))
                    .spawn_scoped(scope, move || worker_loop(inner, worker))
                    .expect("failed to spawn worker thread");
            }
        });

        let mut guard = inner.shared.state.lock().unwrap();
        self.shutdown_tag = Some(guard.current_tag);
        if !guard.events.is_empty() {
            tracing::warn!(
                "---- {} unprocessed future events remain on the event queue",
                guard.events.len()
            );
        }
        guard.release_pending_events();
        if !guard.tokens.all_reclaimed() {
            tracing::warn!(
                live = guard.tokens.live(),
                "tokens still referenced at shutdown"
            );
        }
        tracing::info!("---- Elapsed logical time: {:?}", guard.current_tag.offset());
        tracing::info!(
            "---- Elapsed physical time: {:?}",
            Duration::from_nanos(inner.clock.physical_now().max(0) as u64)
        );
        drop(guard);

        inner.tracer.finish();
        tracing::info!("Scheduler has been shut down");
    }

    /// The tag execution stopped at, once `run` returns.
    pub fn shutdown_tag(&self) -> Option<Tag> {
        self.shutdown_tag
    }

    /// Inspect a reactor's state after (or before) a run.
    pub fn with_reactor_state<S, R>(
        &self,
        key: crate::ReactorKey,
        f: impl FnOnce(&S) -> R,
    ) -> Option<R>
    where
        S: crate::ReactorState,
    {
        let guard = self.inner.graph.reactors[key].state.lock().unwrap();
        guard.downcast_ref::<S>().map(f)
    }

    /// True when every token created during the run was released.
    pub fn tokens_reclaimed(&self) -> bool {
        self.inner.shared.state.lock().unwrap().tokens.all_reclaimed()
    }
}
