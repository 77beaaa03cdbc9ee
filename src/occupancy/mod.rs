//! Debounced occupancy reconciliation with operator release.
//!
//! Working positions carry a binary occupancy sensor and a tri-state
//! control point (`0` vacant, `1` occupied, `2` release requested by an
//! operator). The reconciler keeps the control point in line with the
//! sensor, reporting occupancy eagerly and vacancy only once confirmed.

pub mod binding;
pub mod ledger;
pub mod reconciler;

pub use binding::{BindSummary, BindingRole, OccupancyBindings};
pub use ledger::{Confirmation, LedgerKind, Ledgers, elapsed_millis};
pub use reconciler::{BoundPoint, ControlState, OccupancyReconciler, Outcome, SensorState};
