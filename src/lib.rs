//! Cadence is a deterministic, reactor-oriented discrete-event runtime.
//!
//! A fixed graph of reactors is assembled once; its reactions fire in
//! response to timed events and propagate outputs over statically-known port
//! connections. The logical clock advances in tags while a pool of worker
//! threads executes independent reactions in parallel.
//!
//! ## Example
//!
//! Build and run a graph with a reaction that responds to startup:
//!
//! ```rust
//! use cadence::runtime::{
//!     Config, Level, Reaction, ReactorGraph, Scheduler, Trigger, TriggerKind,
//! };
//!
//! let mut graph = ReactorGraph::new();
//! let reactor = graph.insert_reactor("hello", false);
//! let reaction = graph.insert_reaction(Reaction::new(
//!     "on_startup",
//!     reactor,
//!     Level(0),
//!     |_ctx, state| {
//!         *state.downcast_mut::<bool>().unwrap() = true;
//!         println!("Hello world.");
//!     },
//! ));
//! let startup = graph.insert_trigger(Trigger::new("startup", TriggerKind::Startup, reactor));
//! graph.bind_trigger(startup, reaction).unwrap();
//!
//! let mut scheduler = Scheduler::new(graph, Config::default()).unwrap();
//! scheduler.run();
//!
//! assert_eq!(scheduler.with_reactor_state::<bool, _>(reactor, |s| *s), Some(true));
//! ```

#[cfg(feature = "runner")]
pub mod runner;

// Re-exports
pub use cadence_core as core;
pub use cadence_runtime as runtime;
