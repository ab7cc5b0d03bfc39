//! A zero-delay logical action advances the microstep instead of logical
//! time: a self-scheduling reaction walks the superdense chain (0,1), (0,2)
//! and stops when it no longer reschedules.

use std::time::Duration;

use cadence::runtime::{
    Config, Level, Reaction, ReactorGraph, Scheduler, Tag, Trigger, TriggerKind,
};

#[derive(Default)]
struct ChainState {
    fired_at: Vec<Tag>,
}

#[test]
fn zero_delay_microstep_chain() {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("chain", ChainState::default());

    let action = graph.insert_trigger(Trigger::new(
        "step",
        TriggerKind::LogicalAction,
        reactor,
    ));

    let kickoff = graph.insert_reaction(Reaction::new(
        "kickoff",
        reactor,
        Level(0),
        move |ctx, _state| {
            ctx.schedule(action, Duration::ZERO).unwrap();
        },
    ));

    let step = graph.insert_reaction(Reaction::new(
        "step",
        reactor,
        Level(0),
        move |ctx, state| {
            let state = state.downcast_mut::<ChainState>().unwrap();
            state.fired_at.push(ctx.tag());
            if state.fired_at.len() < 2 {
                ctx.schedule(action, Duration::ZERO).unwrap();
            }
        },
    ));

    let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
    graph.bind_trigger(startup, kickoff).unwrap();
    graph.bind_trigger(action, step).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1)).unwrap();
    scheduler.run();

    scheduler
        .with_reactor_state::<ChainState, _>(reactor, |state| {
            assert_eq!(state.fired_at, vec![Tag::new(0, 1), Tag::new(0, 2)]);
        })
        .unwrap();
    assert!(scheduler.tokens_reclaimed());
}
