//! Physical actions take their tag from the physical clock, never earlier
//! than the logical clock, and can be scheduled from outside the scheduler
//! when keep-alive holds the event loop open.

use std::time::Duration;

use cadence::runtime::{
    Config, Level, ManualClock, Reaction, ReactorGraph, Scheduler, Tag, Trigger, TriggerKind,
};

#[derive(Default)]
struct Received {
    fired_at: Vec<Tag>,
    value: Option<i64>,
}

#[test]
fn physical_tag_is_bounded_by_clock() {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("physical", Received::default());

    let sensor = graph.insert_trigger(
        Trigger::new("sensor", TriggerKind::PhysicalAction, reactor)
            .with_min_delay(Duration::from_millis(10)),
    );

    let emit = graph.insert_reaction(Reaction::new(
        "emit",
        reactor,
        Level(0),
        move |ctx, _state| {
            ctx.schedule(sensor, Duration::ZERO).unwrap();
        },
    ));

    let record = graph.insert_reaction(Reaction::new(
        "record",
        reactor,
        Level(0),
        move |ctx, state| {
            state
                .downcast_mut::<Received>()
                .unwrap()
                .fired_at
                .push(ctx.tag());
        },
    ));

    // The emitting reaction runs at logical 50ms while the physical clock
    // reads 100ms.
    let timer = graph.insert_trigger(Trigger::new(
        "timer",
        TriggerKind::Timer {
            offset: Duration::from_millis(50),
            period: Duration::ZERO,
        },
        reactor,
    ));
    graph.bind_trigger(timer, emit).unwrap();
    graph.bind_trigger(sensor, record).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1))
        .unwrap()
        .with_clock(ManualClock::starting_at(100_000_000));
    scheduler.run();

    // max(physical 100ms, logical 50ms) + min_delay 10ms = 110ms.
    scheduler
        .with_reactor_state::<Received, _>(reactor, |state| {
            assert_eq!(state.fired_at, vec![Tag::new(110_000_000, 0)]);
        })
        .unwrap();
}

#[test]
fn keep_alive_accepts_external_events() {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("listener", Received::default());

    let wakeup = graph.insert_trigger(Trigger::new(
        "wakeup",
        TriggerKind::PhysicalAction,
        reactor,
    ));

    let record = graph.insert_reaction(Reaction::new(
        "record",
        reactor,
        Level(0),
        move |ctx, state| {
            let state = state.downcast_mut::<Received>().unwrap();
            state.value = ctx.read_trigger_with::<i64, _, _>(wakeup, |v| v.copied());
            ctx.request_stop();
        },
    ));
    graph.bind_trigger(wakeup, record).unwrap();

    let mut scheduler = Scheduler::new(
        graph,
        Config::default().with_workers(2).with_keep_alive(true),
    )
    .unwrap();

    let remote = scheduler.async_context();
    let producer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        remote
            .schedule_physical_value(wakeup, Duration::ZERO, 7_i64)
            .unwrap()
    });

    scheduler.run();
    let outcome = producer.join().unwrap();
    assert!(outcome.handle().is_some());

    scheduler
        .with_reactor_state::<Received, _>(reactor, |state| {
            assert_eq!(state.value, Some(7));
        })
        .unwrap();
    assert!(scheduler.tokens_reclaimed());
}
