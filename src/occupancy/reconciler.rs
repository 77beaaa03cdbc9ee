//! Occupancy and release state machines.
//!
//! Occupancy is surfaced on the control point as soon as the sensor reports
//! it. Vacancy is only written when a pending ledger entry confirms it
//! within the debounce window. An operator release (control value `2`)
//! either clears the point right away or arms the release ledger so the next
//! vacancy observation is honoured.

use super::ledger::{LedgerKind, Ledgers};
use crate::clock::Clock;
use crate::error::{ReconcileError, Result};
use crate::store::{ControlWrite, DataType, PointValue, ValueStore};
use crate::topology::MonitoredPoint;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Binary occupancy reported by a sensor endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SensorState {
    Vacant,
    Occupied,
}

impl SensorState {
    pub fn parse(value: &PointValue) -> Option<Self> {
        match value.as_text().as_str() {
            "0" => Some(SensorState::Vacant),
            "1" => Some(SensorState::Occupied),
            _ => match value.as_number() {
                Some(n) if n == 0.0 => Some(SensorState::Vacant),
                Some(n) if n == 1.0 => Some(SensorState::Occupied),
                _ => None,
            },
        }
    }

    pub fn wire(self) -> &'static str {
        match self {
            SensorState::Vacant => "0",
            SensorState::Occupied => "1",
        }
    }
}

/// Visible state of an occupancy control point.
///
/// `ReleaseRequested` is only ever written by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ControlState {
    Vacant,
    Occupied,
    ReleaseRequested,
}

impl ControlState {
    pub fn parse(value: &PointValue) -> Option<Self> {
        match value.as_text().as_str() {
            "0" => Some(ControlState::Vacant),
            "1" => Some(ControlState::Occupied),
            "2" => Some(ControlState::ReleaseRequested),
            _ => match value.as_number() {
                Some(n) if n == 0.0 => Some(ControlState::Vacant),
                Some(n) if n == 1.0 => Some(ControlState::Occupied),
                Some(n) if n == 2.0 => Some(ControlState::ReleaseRequested),
                _ => None,
            },
        }
    }
}

/// A working position with both its sensor and control point present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPoint {
    pub id: String,
    pub name: String,
    pub sensor: String,
    pub control_point: String,
}

impl TryFrom<&MonitoredPoint> for BoundPoint {
    type Error = ReconcileError;

    fn try_from(point: &MonitoredPoint) -> Result<Self> {
        let sensor = point
            .sensor
            .clone()
            .ok_or_else(|| ReconcileError::MissingBinding {
                point: point.name.clone(),
                missing: "sensor",
            })?;
        let control_point =
            point
                .control_point
                .clone()
                .ok_or_else(|| ReconcileError::MissingBinding {
                    point: point.name.clone(),
                    missing: "control point",
                })?;
        Ok(Self {
            id: point.id.clone(),
            name: point.name.clone(),
            sensor,
            control_point,
        })
    }
}

/// What an evaluation did to the control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No transition row matched.
    Unchanged,
    /// `0 → 1` shown right away, debounce entry recorded.
    ShownOccupied,
    /// Vacancy written, confirmed by the given ledger.
    ConfirmedVacant(LedgerKind),
    /// Vacancy observed without a pending entry in the window.
    VacancyIgnored,
    /// Release with sensor already vacant: point cleared.
    Released,
    /// Release with sensor still occupied: point kept at `1`, release armed.
    ReleaseArmed,
}

pub struct OccupancyReconciler {
    store: Arc<dyn ValueStore>,
    clock: Arc<dyn Clock>,
    ledgers: Ledgers,
    window_millis: i64,
    point_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OccupancyReconciler {
    pub fn new(store: Arc<dyn ValueStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            store,
            clock,
            ledgers: Ledgers::new(),
            window_millis: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            point_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    pub fn store(&self) -> &Arc<dyn ValueStore> {
        &self.store
    }

    fn point_lock(&self, sensor: &str) -> Arc<AsyncMutex<()>> {
        self.point_locks
            .lock()
            .entry(sensor.to_string())
            .or_default()
            .clone()
    }

    async fn read_states(&self, point: &BoundPoint) -> (Option<SensorState>, Option<ControlState>) {
        let sensor = self
            .store
            .current_value(&point.sensor)
            .await
            .and_then(|v| SensorState::parse(&v));
        let control = self
            .store
            .current_value(&point.control_point)
            .await
            .and_then(|v| ControlState::parse(&v));
        (sensor, control)
    }

    /// Evaluate the occupancy table against the store's current values.
    pub async fn reconcile_occupancy(&self, point: &BoundPoint) -> Result<Outcome> {
        let lock = self.point_lock(&point.sensor);
        let _guard = lock.lock().await;

        match self.read_states(point).await {
            (Some(sensor), Some(control)) => self.apply_occupancy(point, sensor, control).await,
            (sensor, control) => {
                debug!(
                    "[Occupancy] << {} >> skipped, sensor={:?} control={:?}",
                    point.name, sensor, control
                );
                Ok(Outcome::Unchanged)
            }
        }
    }

    /// Evaluate the release table against the store's current values.
    pub async fn reconcile_release(&self, point: &BoundPoint) -> Result<Outcome> {
        let lock = self.point_lock(&point.sensor);
        let _guard = lock.lock().await;

        match self.read_states(point).await {
            (Some(sensor), Some(control)) => self.apply_release(point, sensor, control).await,
            _ => Ok(Outcome::Unchanged),
        }
    }

    /// Occupancy transition table. Callers hold the point lock.
    pub async fn apply_occupancy(
        &self,
        point: &BoundPoint,
        sensor: SensorState,
        control: ControlState,
    ) -> Result<Outcome> {
        match (sensor, control) {
            (SensorState::Occupied, ControlState::Vacant) => {
                self.ledgers
                    .record_rising_edge(&point.sensor, self.clock.now_millis());
                self.write_status(point, SensorState::Occupied, "Occupancy")
                    .await?;
                Ok(Outcome::ShownOccupied)
            }
            (SensorState::Vacant, ControlState::Occupied) => {
                let now = self.clock.now_millis();
                match self
                    .ledgers
                    .vacancy_confirmation(&point.sensor, now, self.window_millis)
                {
                    Some(confirmation) => {
                        self.write_status(point, SensorState::Vacant, "Occupancy")
                            .await?;
                        self.ledgers.settle(&point.sensor, confirmation);
                        Ok(Outcome::ConfirmedVacant(confirmation.kind))
                    }
                    None => {
                        debug!(
                            "[Occupancy] << {} >> vacancy not confirmed within window",
                            point.name
                        );
                        Ok(Outcome::VacancyIgnored)
                    }
                }
            }
            _ => Ok(Outcome::Unchanged),
        }
    }

    /// Release transition table. Callers hold the point lock.
    pub async fn apply_release(
        &self,
        point: &BoundPoint,
        sensor: SensorState,
        control: ControlState,
    ) -> Result<Outcome> {
        if control != ControlState::ReleaseRequested {
            return Ok(Outcome::Unchanged);
        }

        match sensor {
            SensorState::Vacant => {
                self.write_status(point, SensorState::Vacant, "Release")
                    .await?;
                self.ledgers.clear(&point.sensor);
                info!("[Release] << {} >> released", point.name);
                Ok(Outcome::Released)
            }
            SensorState::Occupied => {
                self.ledgers
                    .arm_release(&point.sensor, self.clock.now_millis());
                self.write_status(point, SensorState::Occupied, "Release")
                    .await?;
                info!(
                    "[Release] << {} >> still occupied, release armed",
                    point.name
                );
                Ok(Outcome::ReleaseArmed)
            }
        }
    }

    /// End-of-day reset: write `0` and forget pending entries.
    ///
    /// Taken under the point lock, so it never interleaves with an
    /// occupancy or release evaluation of the same point.
    pub async fn reset(&self, point: &BoundPoint) -> Result<()> {
        let lock = self.point_lock(&point.sensor);
        let _guard = lock.lock().await;

        self.write_status(point, SensorState::Vacant, "Release")
            .await?;
        self.ledgers.clear(&point.sensor);
        Ok(())
    }

    async fn write_status(
        &self,
        point: &BoundPoint,
        state: SensorState,
        tag: &'static str,
    ) -> Result<()> {
        self.store
            .write_control_value(ControlWrite::new(
                point.control_point.clone(),
                state.wire(),
                DataType::Real,
            ))
            .await?;
        info!(
            "[{}] << {} >> updated ==> value = {}",
            tag,
            point.name,
            state.wire()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, ValueWatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_secs(60);

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        reconciler: OccupancyReconciler,
        point: BoundPoint,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let reconciler = OccupancyReconciler::new(store.clone(), clock.clone(), WINDOW);
        let point = BoundPoint {
            id: "pos-1".into(),
            name: "Desk 1".into(),
            sensor: "ep-1".into(),
            control_point: "cp-1".into(),
        };
        Harness {
            store,
            clock,
            reconciler,
            point,
        }
    }

    impl Harness {
        fn set(&self, sensor: &str, control: &str) {
            self.store.set_value(&self.point.sensor, sensor);
            self.store.set_value(&self.point.control_point, control);
        }

        fn control(&self) -> Option<PointValue> {
            self.store.get(&self.point.control_point)
        }
    }

    #[test]
    fn test_parse_states() {
        assert_eq!(SensorState::parse(&"1".into()), Some(SensorState::Occupied));
        assert_eq!(SensorState::parse(&0.0.into()), Some(SensorState::Vacant));
        assert_eq!(SensorState::parse(&"2".into()), None);
        assert_eq!(
            ControlState::parse(&"2".into()),
            Some(ControlState::ReleaseRequested)
        );
        assert_eq!(ControlState::parse(&"on".into()), None);
    }

    #[test]
    fn test_bound_point_requires_both_refs() {
        let point = MonitoredPoint::new("p", "Desk", Some("ep"), None);
        let err = BoundPoint::try_from(&point).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::MissingBinding {
                missing: "control point",
                ..
            }
        ));

        let point = MonitoredPoint::new("p", "Desk", None, Some("cp"));
        assert!(BoundPoint::try_from(&point).is_err());
    }

    #[tokio::test]
    async fn test_occupied_is_shown_immediately() {
        let h = harness();
        h.set("1", "0");

        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::ShownOccupied);
        assert_eq!(h.control(), Some("1".into()));
        assert_eq!(h.reconciler.ledgers().debounce_entry("ep-1"), Some(1_000_000));

        let write = &h.store.writes_to("cp-1")[0];
        assert_eq!(write.data_type, DataType::Real);
    }

    #[tokio::test]
    async fn test_vacancy_within_window_is_confirmed() {
        let h = harness();
        h.set("1", "0");
        h.reconciler.reconcile_occupancy(&h.point).await.unwrap();

        h.clock.advance(30_000);
        h.store.set_value("ep-1", "0");
        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();

        assert_eq!(outcome, Outcome::ConfirmedVacant(LedgerKind::Debounce));
        assert_eq!(h.control(), Some("0".into()));
        assert_eq!(h.reconciler.ledgers().len(), (0, 0));
    }

    #[tokio::test]
    async fn test_vacancy_after_window_is_ignored_and_entry_kept() {
        let h = harness();
        h.set("1", "0");
        h.reconciler.reconcile_occupancy(&h.point).await.unwrap();

        h.clock.advance(60_000);
        h.store.set_value("ep-1", "0");
        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();

        assert_eq!(outcome, Outcome::VacancyIgnored);
        assert_eq!(h.control(), Some("1".into()));
        assert_eq!(h.reconciler.ledgers().debounce_entry("ep-1"), Some(1_000_000));
        assert_eq!(h.store.writes_to("cp-1").len(), 1);
    }

    #[tokio::test]
    async fn test_vacancy_without_entry_is_ignored() {
        let h = harness();
        h.set("0", "1");
        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::VacancyIgnored);
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_other_pairs_are_noops() {
        let h = harness();
        for (sensor, control) in [("0", "0"), ("1", "1"), ("0", "2"), ("1", "2"), ("x", "0")] {
            h.set(sensor, control);
            let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
            assert_eq!(outcome, Outcome::Unchanged, "{sensor}/{control}");
        }
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_release_with_vacant_sensor_clears_everything() {
        let h = harness();
        h.reconciler.ledgers().record_rising_edge("ep-1", 5);
        h.reconciler.ledgers().arm_release("ep-1", 5);
        h.reconciler.ledgers().record_rising_edge("ep-1", 6);
        h.set("0", "2");

        let outcome = h.reconciler.reconcile_release(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::Released);
        assert_eq!(h.control(), Some("0".into()));
        assert_eq!(h.reconciler.ledgers().len(), (0, 0));

        // Applying it again changes nothing.
        h.store.set_value("cp-1", "2");
        h.reconciler.reconcile_release(&h.point).await.unwrap();
        assert_eq!(h.control(), Some("0".into()));
        assert_eq!(h.reconciler.ledgers().len(), (0, 0));
    }

    #[tokio::test]
    async fn test_release_then_confirm_within_window() {
        let h = harness();
        h.reconciler.ledgers().record_rising_edge("ep-1", 0);
        h.set("1", "2");

        let outcome = h.reconciler.reconcile_release(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::ReleaseArmed);
        assert_eq!(h.control(), Some("1".into()));
        assert_eq!(h.reconciler.ledgers().debounce_entry("ep-1"), None);
        assert_eq!(h.reconciler.ledgers().release_entry("ep-1"), Some(1_000_000));

        h.clock.advance(59_999);
        h.store.set_value("ep-1", "0");
        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::ConfirmedVacant(LedgerKind::Release));
        assert_eq!(h.control(), Some("0".into()));
        assert_eq!(h.reconciler.ledgers().release_entry("ep-1"), None);
    }

    #[tokio::test]
    async fn test_release_then_late_vacancy_keeps_point_occupied() {
        let h = harness();
        h.set("1", "2");
        h.reconciler.reconcile_release(&h.point).await.unwrap();

        h.clock.advance(61_000);
        h.store.set_value("ep-1", "0");
        let outcome = h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::VacancyIgnored);
        assert_eq!(h.control(), Some("1".into()));
        assert_eq!(h.reconciler.ledgers().release_entry("ep-1"), Some(1_000_000));
    }

    #[tokio::test]
    async fn test_release_ignores_non_release_values() {
        let h = harness();
        h.set("1", "0");
        let outcome = h.reconciler.reconcile_release(&h.point).await.unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        assert!(h.store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_point_and_ledgers() {
        let h = harness();
        h.set("1", "0");
        h.reconciler.reconcile_occupancy(&h.point).await.unwrap();
        h.reconciler.ledgers().arm_release("ep-1", 0);

        h.reconciler.reset(&h.point).await.unwrap();
        assert_eq!(h.control(), Some("0".into()));
        assert_eq!(h.reconciler.ledgers().len(), (0, 0));
    }

    #[tokio::test]
    async fn test_reset_waits_for_point_lock() {
        let h = harness();
        h.set("1", "1");
        let reconciler = Arc::new(h.reconciler);
        let point = h.point.clone();

        let lock = reconciler.point_lock("ep-1");
        let guard = lock.lock().await;

        let pending = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reset(&point).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.store.writes().is_empty());

        drop(guard);
        pending.await.unwrap().unwrap();
        assert_eq!(h.store.get("cp-1"), Some("0".into()));
    }

    /// Store whose writes fail on demand and that tracks write overlap.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail: AtomicBool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ValueStore for FlakyStore {
        async fn current_value(&self, endpoint: &str) -> Option<PointValue> {
            self.inner.current_value(endpoint).await
        }

        fn subscribe(&self, endpoint: &str) -> ValueWatch {
            self.inner.subscribe(endpoint)
        }

        async fn capacity(&self, node: &str) -> Option<f64> {
            self.inner.capacity(node).await
        }

        async fn write_control_value(&self, write: ControlWrite) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(ReconcileError::WriteFailed {
                    target: write.target,
                    reason: "store offline".into(),
                });
            }
            self.inner.write_control_value(write).await
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ledger_untouched() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        let reconciler = OccupancyReconciler::new(store.clone(), clock.clone(), WINDOW);
        let point = harness().point;

        store.inner.set_value("ep-1", "1");
        store.inner.set_value("cp-1", "0");
        reconciler.reconcile_occupancy(&point).await.unwrap();

        store.fail.store(true, Ordering::SeqCst);
        store.inner.set_value("ep-1", "0");
        clock.advance(1_000);
        let err = reconciler.reconcile_occupancy(&point).await.unwrap_err();
        assert!(matches!(err, ReconcileError::WriteFailed { .. }));
        assert_eq!(reconciler.ledgers().debounce_entry("ep-1"), Some(0));

        // The next evaluation can still confirm.
        store.fail.store(false, Ordering::SeqCst);
        let outcome = reconciler.reconcile_occupancy(&point).await.unwrap();
        assert_eq!(outcome, Outcome::ConfirmedVacant(LedgerKind::Debounce));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluations_are_serialized_per_point() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(0));
        let reconciler = Arc::new(OccupancyReconciler::new(
            store.clone(),
            clock.clone(),
            WINDOW,
        ));
        let point = harness().point;

        let mut handles = Vec::new();
        for i in 0..200 {
            let reconciler = reconciler.clone();
            let store = store.clone();
            let point = point.clone();
            handles.push(tokio::spawn(async move {
                store
                    .inner
                    .set_value("ep-1", if i % 3 == 0 { "0" } else { "1" });
                if i % 2 == 0 {
                    store.inner.set_value("cp-1", "2");
                    reconciler.reconcile_release(&point).await
                } else {
                    reconciler.reconcile_occupancy(&point).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        let (debounce, release) = reconciler.ledgers().len();
        assert!(debounce <= 1 && release <= 1);
        if let Some(ts) = reconciler.ledgers().release_entry("ep-1") {
            assert_eq!(ts, 0);
        }
    }
}
