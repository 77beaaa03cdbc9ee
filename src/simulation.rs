//! Simulated building for development.
//!
//! Seeds a [`MemoryStore`] from the topology, then periodically flips a
//! random position sensor and drifts every zone counter.

use crate::store::MemoryStore;
use crate::topology::Topology;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

/// Upper bound used for counters whose zone has no capacity attribute.
const DEFAULT_ZONE_CAPACITY: f64 = 200.0;

/// Give every sensor, control point and counter an initial value.
pub fn seed(store: &MemoryStore, topology: &Topology) {
    for (node, capacity) in &topology.capacities {
        store.set_capacity(node, *capacity);
    }
    for point in topology.working_positions() {
        if let Some(sensor) = &point.sensor {
            store.set_value(sensor, "0");
        }
        if let Some(cp) = &point.control_point {
            store.set_value(cp, "0");
        }
    }
    for binding in topology.zones.values() {
        if let Some(sensor) = &binding.sensor {
            store.set_value(sensor, 0.0);
        }
    }
}

/// Apply one simulation step.
pub fn step(store: &MemoryStore, topology: &Topology, rng: &mut impl Rng) {
    let sensors: Vec<String> = topology
        .working_positions()
        .into_iter()
        .filter_map(|p| p.sensor)
        .collect();
    if !sensors.is_empty() {
        let sensor = &sensors[rng.gen_range(0..sensors.len())];
        let next = match store.get(sensor).map(|v| v.as_text()).as_deref() {
            Some("1") => "0",
            _ => "1",
        };
        store.set_value(sensor, next);
        info!("[Sim] {} toggled to {}", sensor, next);
    }

    for (zone, binding) in &topology.zones {
        let Some(sensor) = &binding.sensor else {
            continue;
        };
        let capacity = [&binding.occupation, &binding.affluence]
            .into_iter()
            .flatten()
            .find_map(|cp| topology.capacities.get(cp).copied())
            .unwrap_or(DEFAULT_ZONE_CAPACITY);
        if !capacity.is_finite() || capacity <= 0.0 {
            warn!("[Sim] {} has invalid capacity {}, counter left as is", zone, capacity);
            continue;
        }
        let current = store.get(sensor).and_then(|v| v.as_number()).unwrap_or(0.0);
        let delta = (capacity * 0.1).max(1.0).round();
        let next = (current + rng.gen_range(-delta..=delta)).round().clamp(0.0, capacity);
        if store.set_value(sensor, next) {
            info!("[Sim] {} counter at {}", zone, next);
        }
    }
}

/// Spawn a task running one [`step`] every `period`.
pub fn run_simulation(
    store: Arc<MemoryStore>,
    topology: Topology,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut interval = interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => step(&store, &topology, &mut rng),
                _ = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::Zone;
    use crate::store::PointValue;

    fn topology() -> Topology {
        Topology::from_json(
            r#"{
                "positions": [
                    { "id": "pos-1", "name": "Desk 1", "sensor": "ep-1", "control_point": "cp-1" },
                    { "id": "pos-2", "name": "Desk 2", "sensor": "ep-2", "control_point": "cp-2" }
                ],
                "zones": {
                    "cafeteria": { "sensor": "ep-cafet", "occupation": "cp-occup-cafet" }
                },
                "capacities": { "cp-occup-cafet": 50 }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_seed() {
        let store = MemoryStore::new();
        let topology = topology();
        seed(&store, &topology);
        assert_eq!(store.get("ep-1"), Some("0".into()));
        assert_eq!(store.get("cp-2"), Some("0".into()));
        assert_eq!(store.get("ep-cafet"), Some(PointValue::Number(0.0)));
        assert!(topology.zone(Zone::Cafeteria).is_some());
    }

    #[test]
    fn test_step_flips_one_sensor_and_bounds_counters() {
        let store = MemoryStore::new();
        let topology = topology();
        seed(&store, &topology);
        let mut rng = StdRng::seed_from_u64(7);

        step(&store, &topology, &mut rng);
        let occupied = ["ep-1", "ep-2"]
            .iter()
            .filter(|ep| store.get(ep) == Some("1".into()))
            .count();
        assert_eq!(occupied, 1);

        for _ in 0..100 {
            step(&store, &topology, &mut rng);
            let count = store.get("ep-cafet").and_then(|v| v.as_number()).unwrap();
            assert!((0.0..=50.0).contains(&count));
        }
        // Control points are left to the reconciler.
        assert!(store.writes().is_empty());
    }

    #[test]
    fn test_invalid_capacity_leaves_counter_alone() {
        let store = MemoryStore::new();
        let mut topology = topology();
        seed(&store, &topology);
        let mut rng = StdRng::seed_from_u64(3);

        for capacity in [-5.0, f64::NAN, 0.0] {
            topology
                .capacities
                .insert("cp-occup-cafet".to_string(), capacity);
            step(&store, &topology, &mut rng);
            assert_eq!(store.get("ep-cafet"), Some(PointValue::Number(0.0)));
        }
    }
}
