//! Zone attendance indicators derived from people counters.

pub mod classifier;
pub mod pipeline;
pub mod zone;

pub use classifier::{AttendanceLevel, ratio};
pub use pipeline::{AttendancePipeline, OccupationReport};
pub use zone::{Indicator, Zone, ZoneBinding};
