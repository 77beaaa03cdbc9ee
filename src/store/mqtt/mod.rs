//! MQTT transport for endpoint values and control-point writes.

mod client;
mod store;

pub use client::{MqttClient, MqttMessage};
pub use store::{MqttStore, endpoint_from_topic, outgoing_write, set_topic};
