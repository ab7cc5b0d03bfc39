//! Core types for the Cadence runtime: logical time tags, the platform clock
//! interface, and the keys naming components of the static reactor graph.

#![deny(clippy::all)]

mod clock;
pub mod keys;
mod time;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use time::Tag;
