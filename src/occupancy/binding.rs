//! Reactive bindings between working positions and the reconciler.
//!
//! Each bound point gets one task per role. The task evaluates once at bind
//! time, then again on every change of the watched value:
//! - occupancy: watches the sensor endpoint
//! - release: watches the control point, acting only on release requests

use super::reconciler::{BoundPoint, OccupancyReconciler, Outcome};
use crate::config::WorkingHours;
use crate::error::{ReconcileError, Result};
use crate::store::{ControlWrite, DataType, ValueWatch};
use crate::topology::MonitoredPoint;
use chrono::{Local, Timelike};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BindingRole {
    Occupancy,
    Release,
}

/// Counts from a startup binding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindSummary {
    pub bound: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Whether bindings should evaluate at `hour`, given an optional gate.
pub fn should_evaluate(gate: Option<WorkingHours>, hour: u32) -> bool {
    gate.is_none_or(|hours| hours.contains(hour))
}

pub struct OccupancyBindings {
    reconciler: Arc<OccupancyReconciler>,
    gate: Option<WorkingHours>,
    bound: Mutex<HashSet<(String, BindingRole)>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl OccupancyBindings {
    pub fn new(reconciler: Arc<OccupancyReconciler>, gate: Option<WorkingHours>) -> Self {
        Self {
            reconciler,
            gate,
            bound: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn reconciler(&self) -> &Arc<OccupancyReconciler> {
        &self.reconciler
    }

    /// Number of active (point, role) bindings.
    pub fn bound_count(&self) -> usize {
        self.bound.lock().len()
    }

    /// Bind occupancy reconciliation to the point's sensor.
    pub async fn bind_occupancy(&self, point: &MonitoredPoint) -> Result<()> {
        self.bind(point, BindingRole::Occupancy).await
    }

    /// Bind release reconciliation to the point's control point.
    pub async fn bind_release(&self, point: &MonitoredPoint) -> Result<()> {
        self.bind(point, BindingRole::Release).await
    }

    async fn bind(&self, point: &MonitoredPoint, role: BindingRole) -> Result<()> {
        let bound = BoundPoint::try_from(point)?;
        if !self.bound.lock().insert((bound.id.clone(), role)) {
            return Err(ReconcileError::AlreadyBound {
                point: bound.name,
                role: match role {
                    BindingRole::Occupancy => "occupancy",
                    BindingRole::Release => "release",
                },
            });
        }

        let watched = match role {
            BindingRole::Occupancy => &bound.sensor,
            BindingRole::Release => &bound.control_point,
        };
        let mut watch = self.reconciler.store().subscribe(watched);
        watch.borrow_and_update();

        evaluate(&self.reconciler, &bound, role, self.gate).await;

        let reconciler = self.reconciler.clone();
        let gate = self.gate;
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            watch_loop(reconciler, bound, role, gate, watch, cancel).await;
        });
        Ok(())
    }

    /// Bind both roles for every point concurrently.
    ///
    /// Points lacking a sensor or control point are skipped.
    pub async fn bind_all(&self, points: &[MonitoredPoint]) -> BindSummary {
        let results = join_all(points.iter().map(|point| async move {
            let occupancy = self.bind_occupancy(point).await;
            let release = self.bind_release(point).await;
            (point, occupancy.and(release))
        }))
        .await;

        let mut summary = BindSummary::default();
        for (point, result) in results {
            match result {
                Ok(()) => summary.bound += 1,
                Err(e @ ReconcileError::MissingBinding { .. }) => {
                    info!("[Occupancy] Skipping {}: {}", point.name, e);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("[Occupancy] Failed to bind {}: {}", point.name, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Write `0` to every control point, e.g. at the end of the working day.
    ///
    /// Points with a sensor are reset under their point lock. Returns the
    /// number of successful writes.
    pub async fn reset_all(&self, points: &[MonitoredPoint]) -> usize {
        let reconciler = &self.reconciler;
        let writes = points
            .iter()
            .filter_map(|p| p.control_point.as_deref().map(|cp| (p, cp)))
            .map(|(point, cp)| async move {
                let result = match BoundPoint::try_from(point) {
                    Ok(bound) => reconciler.reset(&bound).await,
                    Err(_) => reconciler
                        .store()
                        .write_control_value(ControlWrite::new(cp, "0", DataType::Real))
                        .await
                        .map(|()| info!("[Release] << {} >> updated ==> value = 0", point.name)),
                };
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        error!("[Release] Failed to reset {}: {}", point.name, e);
                        false
                    }
                }
            });
        join_all(writes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Stop all binding tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn evaluate(
    reconciler: &OccupancyReconciler,
    point: &BoundPoint,
    role: BindingRole,
    gate: Option<WorkingHours>,
) -> Option<Outcome> {
    if !should_evaluate(gate, Local::now().hour()) {
        debug!("[Occupancy] << {} >> outside working hours", point.name);
        return None;
    }

    let result = match role {
        BindingRole::Occupancy => reconciler.reconcile_occupancy(point).await,
        BindingRole::Release => reconciler.reconcile_release(point).await,
    };
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!("[{}] << {} >> evaluation failed: {}", role, point.name, e);
            None
        }
    }
}

async fn watch_loop(
    reconciler: Arc<OccupancyReconciler>,
    point: BoundPoint,
    role: BindingRole,
    gate: Option<WorkingHours>,
    mut watch: ValueWatch,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = watch.changed() => {
                if changed.is_err() {
                    debug!("[{}] << {} >> value source closed", role, point.name);
                    break;
                }
                watch.borrow_and_update();
                evaluate(&reconciler, &point, role, gate).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}
