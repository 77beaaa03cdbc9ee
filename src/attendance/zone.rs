//! Attendance zones and the references bound to them.

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Zone {
    Cafeteria,
    /// Company restaurant.
    Dining,
    Building,
    Auditorium,
}

impl Zone {
    /// Zones whose attendance level is published on an affluence point.
    pub fn has_affluence(self) -> bool {
        matches!(self, Zone::Cafeteria | Zone::Dining)
    }
}

/// Which derived indicator of a zone is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Indicator {
    /// Attendance level label.
    Affluence,
    /// Numeric occupation ratio.
    Occupation,
}

/// Counter endpoint of a zone and its derived control points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneBinding {
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub affluence: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
}

impl ZoneBinding {
    /// `(sensor, control point)` feeding the given indicator.
    pub fn refs(&self, indicator: Indicator) -> Option<(&str, &str)> {
        let control_point = match indicator {
            Indicator::Affluence => self.affluence.as_deref(),
            Indicator::Occupation => self.occupation.as_deref(),
        }?;
        Some((self.sensor.as_deref()?, control_point))
    }
}
