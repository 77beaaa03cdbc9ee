//! Attendance indicators published from zone counters.
//!
//! Two indicators are derived from a zone's people counter and the
//! `capacity` attribute of the target control point:
//! - affluence: the attendance level label, rewritten on every counter
//!   change without any debounce
//! - occupation: the numeric ratio, published by a periodic pass

use super::classifier::{AttendanceLevel, ratio};
use super::zone::{Indicator, Zone, ZoneBinding};
use crate::error::{ReconcileError, Result};
use crate::occupancy::BindSummary;
use crate::store::{ControlWrite, DataType, ValueStore, ValueWatch};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Result of one occupation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccupationReport {
    pub written: Vec<(Zone, f64)>,
    pub failed: Vec<(Zone, String)>,
}

/// Zone references resolved against the store.
struct Indicators {
    store: Arc<dyn ValueStore>,
    zones: HashMap<Zone, ZoneBinding>,
}

impl Indicators {
    fn refs(&self, zone: Zone, indicator: Indicator) -> Result<(String, String)> {
        self.zones
            .get(&zone)
            .and_then(|binding| binding.refs(indicator))
            .map(|(sensor, cp)| (sensor.to_string(), cp.to_string()))
            .ok_or_else(|| ReconcileError::MissingBinding {
                point: zone.to_string(),
                missing: match indicator {
                    Indicator::Affluence => "affluence control point",
                    Indicator::Occupation => "occupation control point",
                },
            })
    }

    async fn compute_ratio(&self, sensor: &str, control_point: &str) -> Result<f64> {
        let current = self
            .store
            .current_value(sensor)
            .await
            .and_then(|v| v.as_number())
            .ok_or_else(|| ReconcileError::NoValue(sensor.to_string()))?;
        let capacity = self
            .store
            .capacity(control_point)
            .await
            .ok_or_else(|| ReconcileError::MissingCapacity(control_point.to_string()))?;
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ReconcileError::InvalidCapacity {
                node: control_point.to_string(),
                capacity,
            });
        }
        ratio(current, capacity)
    }

    async fn update_affluence(&self, zone: Zone) -> Result<Option<AttendanceLevel>> {
        let (sensor, control_point) = self.refs(zone, Indicator::Affluence)?;
        let ratio = self.compute_ratio(&sensor, &control_point).await?;

        let Some(level) = AttendanceLevel::from_ratio(ratio) else {
            warn!(
                "[Attendance] No level for ratio {} in {} -- ABORTED",
                ratio, control_point
            );
            return Ok(None);
        };

        self.store
            .write_control_value(ControlWrite::new(
                control_point.clone(),
                level.label(),
                DataType::String,
            ))
            .await?;
        info!(
            "[Attendance] {} updated ==> value = {} ({}%)",
            control_point, level, ratio
        );
        Ok(Some(level))
    }

    async fn evaluate(&self, zone: Zone) {
        if let Err(e) = self.update_affluence(zone).await {
            error!("[Attendance] {} affluence update failed: {}", zone, e);
        }
    }
}

pub struct AttendancePipeline {
    indicators: Arc<Indicators>,
    bound: Mutex<HashSet<Zone>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl AttendancePipeline {
    pub fn new(store: Arc<dyn ValueStore>, zones: HashMap<Zone, ZoneBinding>) -> Self {
        Self {
            indicators: Arc::new(Indicators { store, zones }),
            bound: Mutex::new(HashSet::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Current ratio of a counter against the control point's capacity.
    pub async fn compute_ratio(&self, sensor: &str, control_point: &str) -> Result<f64> {
        self.indicators.compute_ratio(sensor, control_point).await
    }

    /// Recompute and write the attendance level of a zone.
    ///
    /// A ratio without level (negative counter) is not written.
    pub async fn update_affluence(&self, zone: Zone) -> Result<Option<AttendanceLevel>> {
        self.indicators.update_affluence(zone).await
    }

    /// Bind the affluence indicator of a zone to its counter.
    pub async fn bind_affluence(&self, zone: Zone) -> Result<()> {
        if !zone.has_affluence() {
            return Err(ReconcileError::MissingBinding {
                point: zone.to_string(),
                missing: "affluence indicator",
            });
        }
        let (sensor, _) = self.indicators.refs(zone, Indicator::Affluence)?;
        if !self.bound.lock().insert(zone) {
            return Err(ReconcileError::AlreadyBound {
                point: zone.to_string(),
                role: "affluence",
            });
        }

        let mut watch = self.indicators.store.subscribe(&sensor);
        watch.borrow_and_update();
        self.indicators.evaluate(zone).await;

        let indicators = self.indicators.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            watch_loop(indicators, zone, watch, cancel).await;
        });
        Ok(())
    }

    /// Bind every zone carrying an affluence indicator.
    pub async fn bind_all_affluence(&self) -> BindSummary {
        let zones: Vec<Zone> = Zone::iter().filter(|z| z.has_affluence()).collect();
        let results = join_all(zones.iter().map(|zone| self.bind_affluence(*zone))).await;

        let mut summary = BindSummary::default();
        for (zone, result) in zones.iter().zip(results) {
            match result {
                Ok(()) => summary.bound += 1,
                Err(e @ ReconcileError::MissingBinding { .. }) => {
                    info!("[Attendance] Skipping {}: {}", zone, e);
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!("[Attendance] Failed to bind {}: {}", zone, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Publish the occupation ratio of every zone once.
    pub async fn publish_occupation(&self) -> OccupationReport {
        let mut report = OccupationReport::default();

        for zone in Zone::iter() {
            let Ok((sensor, control_point)) = self.indicators.refs(zone, Indicator::Occupation)
            else {
                debug!("[Attendance] {} has no occupation indicator", zone);
                continue;
            };

            let result = async {
                let ratio = self.compute_ratio(&sensor, &control_point).await?;
                self.indicators
                    .store
                    .write_control_value(ControlWrite::new(
                        control_point.clone(),
                        ratio,
                        DataType::Real,
                    ))
                    .await?;
                Ok::<f64, ReconcileError>(ratio)
            }
            .await;

            match result {
                Ok(ratio) => {
                    info!("[Attendance] {} updated ==> value = {}", control_point, ratio);
                    report.written.push((zone, ratio));
                }
                Err(e) => {
                    warn!("[Attendance] {} occupation not published: {}", zone, e);
                    report.failed.push((zone, e.to_string()));
                }
            }
        }

        report
    }

    /// Stop all binding tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn watch_loop(
    indicators: Arc<Indicators>,
    zone: Zone,
    mut watch: ValueWatch,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = watch.changed() => {
                if changed.is_err() {
                    debug!("[Attendance] {} counter source closed", zone);
                    break;
                }
                watch.borrow_and_update();
                indicators.evaluate(zone).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}
