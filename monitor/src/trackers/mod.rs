//! Per-character state tracked by the engine.
//!
//! - [`location_tracker`]: Last known solar system, with duplicate suppression
//! - [`mining_tracker`]: Idle/Active mining sessions driven by a timeout

pub mod location_tracker;
pub mod mining_tracker;

pub use location_tracker::LocationTracker;
pub use mining_tracker::{MiningPhase, MiningSessionTracker, MiningTransition};
