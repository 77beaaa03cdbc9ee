//! Attendance ratio and level bucketing.

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};

/// Qualitative attendance level of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceLevel {
    /// `0 ≤ ratio ≤ 30`
    Low,
    /// `30 < ratio ≤ 55`
    Moderate,
    /// `55 < ratio ≤ 80`
    High,
    /// `ratio > 80`
    Saturated,
}

impl AttendanceLevel {
    /// Bucket a ratio. Negative or NaN ratios have no level.
    pub fn from_ratio(ratio: f64) -> Option<Self> {
        if ratio.is_nan() || ratio < 0.0 {
            None
        } else if ratio <= 30.0 {
            Some(AttendanceLevel::Low)
        } else if ratio <= 55.0 {
            Some(AttendanceLevel::Moderate)
        } else if ratio <= 80.0 {
            Some(AttendanceLevel::High)
        } else {
            Some(AttendanceLevel::Saturated)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttendanceLevel::Low => "low",
            AttendanceLevel::Moderate => "moderate",
            AttendanceLevel::High => "high",
            AttendanceLevel::Saturated => "saturated",
        }
    }
}

/// Round to two decimals, halves rounded up.
fn round_hundredths(x: f64) -> f64 {
    (x * 100.0 + 0.5).floor() / 100.0
}

/// Percentage of `capacity` that `current` represents, to two decimals.
pub fn ratio(current: f64, capacity: f64) -> Result<f64> {
    let invalid = || ReconcileError::InvalidRatio {
        value: current,
        capacity,
    };
    if capacity == 0.0 {
        return Err(invalid());
    }
    let ratio = round_hundredths(current / capacity * 100.0);
    if ratio.is_finite() { Ok(ratio) } else { Err(invalid()) }
}
