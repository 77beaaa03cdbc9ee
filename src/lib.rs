//! Occupancy reconciler library.
//!
//! Keeps the control points of a building twin in line with its sensors:
//! debounced desk occupancy with operator release, and zone attendance
//! indicators derived from people counters.

pub mod attendance;
pub mod clock;
pub mod config;
pub mod error;
pub mod instance_lock;
pub mod occupancy;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod topology;
