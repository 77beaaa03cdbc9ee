//! Value store contract.
//!
//! The store owns the durable state of sensor endpoints and control points.
//! The reconcilers only read current values, watch for changes, read the
//! capacity attribute and push control-point writes through this trait.
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: in-process, used for simulation, tests and as the
//!   local cache of the MQTT store
//! - [`MqttStore`]: endpoint values over MQTT topics

pub mod memory;
pub mod mqtt;

pub use memory::MemoryStore;
pub use mqtt::{MqttClient, MqttMessage, MqttStore};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Receiver side of an endpoint subscription.
///
/// The value present at subscription time is the first observation; every
/// later change wakes `changed()`.
pub type ValueWatch = watch::Receiver<Option<PointValue>>;

/// Scalar value held by an endpoint or control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Number(f64),
    Text(String),
}

impl PointValue {
    /// Parse a raw wire payload. Binary flags stay textual ("0"/"1").
    pub fn from_payload(payload: &str) -> Self {
        PointValue::Text(payload.trim().to_string())
    }

    /// Numeric view of the value, used by ratio endpoints.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PointValue::Number(n) => Some(*n),
            PointValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Textual view of the value, used by flag endpoints.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Number(n) => write!(f, "{n}"),
            PointValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PointValue {
    fn from(s: &str) -> Self {
        PointValue::Text(s.to_string())
    }
}

impl From<String> for PointValue {
    fn from(s: String) -> Self {
        PointValue::Text(s)
    }
}

impl From<f64> for PointValue {
    fn from(n: f64) -> Self {
        PointValue::Number(n)
    }
}

/// Data type tag carried by a control-point write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum DataType {
    Real,
    String,
}

/// Endpoint kind tag carried by a control-point write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
pub enum EndpointKind {
    #[default]
    Other,
}

/// A single upsert of a control-point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlWrite {
    pub target: String,
    pub value: PointValue,
    pub data_type: DataType,
    pub kind: EndpointKind,
    pub timestamp: DateTime<Utc>,
}

impl ControlWrite {
    pub fn new(target: impl Into<String>, value: impl Into<PointValue>, data_type: DataType) -> Self {
        Self {
            target: target.into(),
            value: value.into(),
            data_type,
            kind: EndpointKind::Other,
            timestamp: Utc::now(),
        }
    }
}

/// Access to endpoint values, capacity attributes and control-point writes.
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Current value of an endpoint or control point, if it has one.
    async fn current_value(&self, endpoint: &str) -> Option<PointValue>;

    /// Watch an endpoint for value changes.
    fn subscribe(&self, endpoint: &str) -> ValueWatch;

    /// The capacity attribute of a node, if set.
    async fn capacity(&self, node: &str) -> Option<f64>;

    /// Write a control-point value. Not retried on failure.
    async fn write_control_value(&self, write: ControlWrite) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_value_numeric_view() {
        assert_eq!(PointValue::from("37").as_number(), Some(37.0));
        assert_eq!(PointValue::from(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(PointValue::from(30.83).as_number(), Some(30.83));
        assert_eq!(PointValue::from("low").as_number(), None);
    }

    #[test]
    fn test_payload_is_trimmed_text() {
        assert_eq!(PointValue::from_payload("1\n"), PointValue::Text("1".into()));
        assert_eq!(PointValue::from_payload("1").as_text(), "1");
    }

    #[test]
    fn test_control_write_serializes_untagged_value() {
        let write = ControlWrite::new("cp-1", 30.83, DataType::Real);
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["value"], serde_json::json!(30.83));
        assert_eq!(json["data_type"], "Real");
        assert_eq!(json["kind"], "Other");

        let write = ControlWrite::new("cp-1", "moderate", DataType::String);
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["value"], "moderate");
    }
}
