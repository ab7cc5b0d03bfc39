//! Payload round-trips: copies taken at schedule time arrive intact, user
//! destructors run exactly once per payload, and every token is reclaimed by
//! the end of the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence::runtime::{
    Config, Level, PortDesc, Reaction, ReactorGraph, Scheduler, Trigger, TriggerKind,
};

#[derive(Default)]
struct SinkState {
    received: Option<Vec<u8>>,
    forwarded: Option<i64>,
}

#[test]
fn schedule_copy_round_trips_bytes() {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("copier", SinkState::default());

    let action = graph.insert_trigger(Trigger::new(
        "payload",
        TriggerKind::LogicalAction,
        reactor,
    ));

    let send = graph.insert_reaction(Reaction::new(
        "send",
        reactor,
        Level(0),
        move |ctx, _state| {
            let mut message = vec![0xde_u8, 0xad, 0xbe, 0xef];
            ctx.schedule_copy(action, Duration::ZERO, &message).unwrap();
            // Mutating the source after the call must not affect the copy.
            message[0] = 0;
        },
    ));

    let receive = graph.insert_reaction(Reaction::new(
        "receive",
        reactor,
        Level(0),
        move |ctx, state| {
            let received = ctx.read_trigger_with::<Vec<u8>, _, _>(action, |v| v.cloned());
            state.downcast_mut::<SinkState>().unwrap().received = received;
        },
    ));

    let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
    graph.bind_trigger(startup, send).unwrap();
    graph.bind_trigger(action, receive).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1)).unwrap();
    scheduler.run();

    scheduler
        .with_reactor_state::<SinkState, _>(reactor, |state| {
            assert_eq!(state.received.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        })
        .unwrap();
    assert!(scheduler.tokens_reclaimed());
}

#[test]
fn port_destructor_runs_once_per_payload() {
    let destroyed = Arc::new(AtomicUsize::new(0));

    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("hooked", SinkState::default());
    let port = graph.insert_port(PortDesc::new("out"));
    graph.set_port_destinations(port, 3).unwrap();

    let destroyed_hook = destroyed.clone();
    graph
        .set_port_hooks(
            port,
            Some(Arc::new(move |_payload| {
                destroyed_hook.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        )
        .unwrap();

    let produce = graph.insert_reaction(Reaction::new(
        "produce",
        reactor,
        Level(0),
        move |ctx, _state| {
            ctx.set_port(port, 11_i64);
        },
    ));
    let consume = graph.insert_reaction(Reaction::new(
        "consume",
        reactor,
        Level(1),
        move |ctx, state| {
            state.downcast_mut::<SinkState>().unwrap().forwarded =
                ctx.read_port_with::<i64, _, _>(port, |v| v.copied());
        },
    ));

    let timer = graph.insert_trigger(Trigger::new(
        "timer",
        TriggerKind::Timer {
            offset: Duration::ZERO,
            period: Duration::from_millis(1),
        },
        reactor,
    ));
    graph.bind_trigger(timer, produce).unwrap();
    graph.bind_port(port, consume).unwrap();

    let mut scheduler = Scheduler::new(
        graph,
        Config::default()
            .with_workers(1)
            .with_timeout(Duration::from_millis(3)),
    )
    .unwrap();
    scheduler.run();

    scheduler
        .with_reactor_state::<SinkState, _>(reactor, |state| {
            assert_eq!(state.forwarded, Some(11));
        })
        .unwrap();
    // Fires at 0ms, 1ms, 2ms, 3ms: four payloads published, four destroyed.
    assert_eq!(destroyed.load(Ordering::SeqCst), 4);
    assert!(scheduler.tokens_reclaimed());
}

#[test]
fn minted_tokens_transfer_to_events() {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("minter", SinkState::default());

    let action = graph.insert_trigger(Trigger::new(
        "handoff",
        TriggerKind::LogicalAction,
        reactor,
    ));

    let send = graph.insert_reaction(Reaction::new(
        "send",
        reactor,
        Level(0),
        move |ctx, _state| {
            let token = ctx.mint_token(Box::new(99_i64), 1);
            ctx.schedule_token(action, Duration::ZERO, token).unwrap();
        },
    ));
    let receive = graph.insert_reaction(Reaction::new(
        "receive",
        reactor,
        Level(0),
        move |ctx, state| {
            state.downcast_mut::<SinkState>().unwrap().forwarded =
                ctx.read_trigger_with::<i64, _, _>(action, |v| v.copied());
        },
    ));

    let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
    graph.bind_trigger(startup, send).unwrap();
    graph.bind_trigger(action, receive).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1)).unwrap();
    scheduler.run();

    scheduler
        .with_reactor_state::<SinkState, _>(reactor, |state| {
            assert_eq!(state.forwarded, Some(99));
        })
        .unwrap();
    assert!(scheduler.tokens_reclaimed());
}
