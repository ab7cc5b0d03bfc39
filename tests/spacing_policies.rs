//! Minimum-interarrival-time enforcement: two back-to-back schedule calls on
//! an action with a 1ms MIT, under each spacing policy.

use std::time::Duration;

use cadence::runtime::{
    Config, Level, Reaction, ReactorGraph, Scheduler, SpacingPolicy, Tag, Trigger, TriggerKind,
};

const MS: Duration = Duration::from_millis(1);

#[derive(Default)]
struct SpacingState {
    handles: Vec<bool>,
    fired_at: Vec<(Tag, Option<i64>)>,
}

/// Builds: a timer at 10ms whose reaction schedules `action` twice in the
/// same invocation (payloads 1 then 2), and a reaction recording every firing
/// of `action` with its payload.
fn build(policy: SpacingPolicy) -> (ReactorGraph, cadence::runtime::ReactorKey) {
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("spacing", SpacingState::default());

    let action = graph.insert_trigger(
        Trigger::new("action", TriggerKind::LogicalAction, reactor).with_spacing(MS, policy),
    );

    let burst = graph.insert_reaction(Reaction::new(
        "burst",
        reactor,
        Level(0),
        move |ctx, state| {
            let state = state.downcast_mut::<SpacingState>().unwrap();
            for payload in [1_i64, 2] {
                let outcome = ctx.schedule_int(action, Duration::ZERO, payload).unwrap();
                state.handles.push(outcome.handle().is_some());
            }
        },
    ));

    let record = graph.insert_reaction(Reaction::new(
        "record",
        reactor,
        Level(0),
        move |ctx, state| {
            let tag = ctx.tag();
            let value = ctx.read_trigger_with::<i64, _, _>(action, |v| v.copied());
            state
                .downcast_mut::<SpacingState>()
                .unwrap()
                .fired_at
                .push((tag, value));
        },
    ));

    let timer = graph.insert_trigger(Trigger::new(
        "timer",
        TriggerKind::Timer {
            offset: Duration::from_millis(10),
            period: Duration::ZERO,
        },
        reactor,
    ));
    graph.bind_trigger(timer, burst).unwrap();
    graph.bind_trigger(action, record).unwrap();

    (graph, reactor)
}

fn run(policy: SpacingPolicy) -> SpacingState {
    let (graph, reactor) = build(policy);
    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1)).unwrap();
    scheduler.run();
    assert!(scheduler.tokens_reclaimed());
    scheduler
        .with_reactor_state::<SpacingState, _>(reactor, |state| SpacingState {
            handles: state.handles.clone(),
            fired_at: state.fired_at.clone(),
        })
        .unwrap()
}

const T10: i64 = 10_000_000;
const T11: i64 = 11_000_000;

#[test]
fn drop_policy_discards_second_event() {
    let state = run(SpacingPolicy::Drop);
    assert_eq!(state.handles, vec![true, false]);
    assert_eq!(state.fired_at, vec![(Tag::new(T10, 1), Some(1))]);
}

#[test]
fn defer_policy_pushes_second_event_out() {
    let state = run(SpacingPolicy::Defer);
    assert_eq!(state.handles, vec![true, true]);
    assert_eq!(
        state.fired_at,
        vec![(Tag::new(T10, 1), Some(1)), (Tag::new(T11, 0), Some(2))]
    );
}

#[test]
fn replace_policy_supersedes_queued_event() {
    let state = run(SpacingPolicy::Replace);
    assert_eq!(state.handles, vec![true, true]);
    // The first event is removed from the queue; only the second fires, at
    // the earliest admissible tag.
    assert_eq!(state.fired_at, vec![(Tag::new(T11, 0), Some(2))]);
}

#[test]
fn successive_firings_stay_spaced() {
    // Defer policy, rescheduling from the triggered reaction: consecutive
    // firing tags differ by at least the MIT.
    let mut graph = ReactorGraph::new();
    let reactor = graph.insert_reactor("paced", SpacingState::default());

    let action = graph.insert_trigger(
        Trigger::new("action", TriggerKind::LogicalAction, reactor)
            .with_spacing(MS, SpacingPolicy::Defer),
    );

    let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
    let kickoff = graph.insert_reaction(Reaction::new(
        "kickoff",
        reactor,
        Level(0),
        move |ctx, _state| {
            ctx.schedule(action, Duration::ZERO).unwrap();
        },
    ));
    let repeat = graph.insert_reaction(Reaction::new(
        "repeat",
        reactor,
        Level(0),
        move |ctx, state| {
            let state = state.downcast_mut::<SpacingState>().unwrap();
            state.fired_at.push((ctx.tag(), None));
            if state.fired_at.len() < 4 {
                ctx.schedule(action, Duration::ZERO).unwrap();
            }
        },
    ));
    graph.bind_trigger(startup, kickoff).unwrap();
    graph.bind_trigger(action, repeat).unwrap();

    let mut scheduler = Scheduler::new(graph, Config::default().with_workers(1)).unwrap();
    scheduler.run();

    scheduler
        .with_reactor_state::<SpacingState, _>(reactor, |state| {
            assert_eq!(state.fired_at.len(), 4);
            for pair in state.fired_at.windows(2) {
                let earlier = pair[0].0;
                let later = pair[1].0;
                assert!(later >= earlier.strict_after(MS), "{later} too close to {earlier}");
            }
        })
        .unwrap();
}
