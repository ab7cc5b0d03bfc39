//! The federation seam: advancement announces tags and waits for grants,
//! stop requests are coordinated through the adapter, and an adapter failure
//! is coerced into a clean stop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence::runtime::{
    Config, FederationAdapter, FederationError, Level, Reaction, ReactorGraph, Scheduler, Tag,
    Trigger, TriggerKind,
};

#[derive(Default)]
struct AdapterLog {
    notified: Mutex<Vec<Tag>>,
    stop_requested: AtomicBool,
}

/// Grants every requested tag and answers stop requests with a fixed tag.
struct GrantingAdapter {
    log: Arc<AdapterLog>,
    stop_tag: Tag,
}

impl FederationAdapter for GrantingAdapter {
    fn notify_next_event(&self, tag: Tag) {
        self.log.notified.lock().unwrap().push(tag);
    }

    fn wait_for_tag(&self, tag: Tag) -> Result<Tag, FederationError> {
        Ok(tag)
    }

    fn send_stop_request(&self) {
        self.log.stop_requested.store(true, Ordering::SeqCst);
    }

    fn await_stop_granted(&self) -> Result<Tag, FederationError> {
        Ok(self.stop_tag)
    }
}

fn periodic_graph() -> ReactorGraph {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("federate", 0_u32);
    let tick = graph.insert_reaction(Reaction::new(
        "tick",
        reactor,
        Level(0),
        |_ctx, state| {
            *state.downcast_mut::<u32>().unwrap() += 1;
        },
    ));
    let timer = graph.insert_trigger(Trigger::new(
        "timer",
        TriggerKind::Timer {
            offset: Duration::from_millis(1),
            period: Duration::from_millis(1),
        },
        reactor,
    ));
    graph.bind_trigger(timer, tick).unwrap();
    graph
}

#[test]
fn advancement_consults_the_adapter() {
    let log = Arc::new(AdapterLog::default());
    let stop_tag = Tag::from_offset(Duration::from_millis(2));

    let mut graph = periodic_graph();
    // A startup reaction requests a stop, exercising the coordinated stop
    // path.
    let reactor = graph.insert_reactor("stopper", ());
    let stop = graph.insert_reaction(Reaction::new(
        "stop",
        reactor,
        Level(1),
        |ctx, _state| {
            ctx.request_stop();
        },
    ));
    let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
    graph.bind_trigger(startup, stop).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1))
        .unwrap()
        .with_federation(GrantingAdapter {
            log: log.clone(),
            stop_tag,
        });
    scheduler.run();

    assert_eq!(scheduler.shutdown_tag(), Some(stop_tag));
    assert!(log.stop_requested.load(Ordering::SeqCst));
    let notified = log.notified.lock().unwrap();
    assert!(
        notified.contains(&Tag::ZERO),
        "startup tag was never announced: {notified:?}"
    );
    assert!(
        notified.contains(&stop_tag),
        "stop tag was never announced: {notified:?}"
    );
}

/// Fails `wait_for_tag` after a number of grants.
struct FlakyAdapter {
    grants_left: AtomicUsize,
}

impl FederationAdapter for FlakyAdapter {
    fn notify_next_event(&self, _tag: Tag) {}

    fn wait_for_tag(&self, tag: Tag) -> Result<Tag, FederationError> {
        if self.grants_left.fetch_sub(1, Ordering::SeqCst) == 0 {
            Err(FederationError::Disconnected("peer went away".into()))
        } else {
            Ok(tag)
        }
    }

    fn send_stop_request(&self) {}

    fn await_stop_granted(&self) -> Result<Tag, FederationError> {
        Err(FederationError::Disconnected("peer went away".into()))
    }
}

#[test]
fn adapter_failure_coerces_to_stop() {
    let graph = periodic_graph();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1))
        .unwrap()
        .with_federation(FlakyAdapter {
            grants_left: AtomicUsize::new(1),
        });
    scheduler.run();

    // The first advance is granted, the second disconnects; the run ends at
    // the coerced stop tag instead of hanging on the dead federation.
    assert!(scheduler.shutdown_tag().is_some());
}
