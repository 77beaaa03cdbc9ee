//! Monitored points and attendance zones of the building.
//!
//! Locating points in the twin's graph is done upstream; this service only
//! consumes the result as a JSON document:
//!
//! ```json
//! {
//!   "positions": [
//!     { "id": "pos-1", "name": "Desk 1", "sensor": "ep-1", "control_point": "cp-1" }
//!   ],
//!   "excluded": ["pos-7"],
//!   "zones": {
//!     "cafeteria": { "sensor": "ep-cafet", "affluence": "cp-afflu-cafet", "occupation": "cp-occup-cafet" }
//!   },
//!   "capacities": { "cp-afflu-cafet": 120 }
//! }
//! ```

use crate::attendance::{Zone, ZoneBinding};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// A working position with its occupancy sensor and status control point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredPoint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub control_point: Option<String>,
}

impl MonitoredPoint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        sensor: Option<&str>,
        control_point: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sensor: sensor.map(str::to_string),
            control_point: control_point.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub positions: Vec<MonitoredPoint>,
    /// Position ids governed by another business rule.
    #[serde(default)]
    pub excluded: HashSet<String>,
    #[serde(default)]
    pub zones: HashMap<Zone, ZoneBinding>,
    /// Capacity attribute per control point.
    #[serde(default)]
    pub capacities: HashMap<String, f64>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Positions to reconcile: exclusions removed, first occurrence of each id kept.
    pub fn working_positions(&self) -> Vec<MonitoredPoint> {
        let mut seen = HashSet::new();
        self.positions
            .iter()
            .filter(|p| !self.excluded.contains(&p.id))
            .filter(|p| seen.insert(p.id.clone()))
            .cloned()
            .collect()
    }

    pub fn zone(&self, zone: Zone) -> Option<&ZoneBinding> {
        self.zones.get(&zone)
    }
}
