//! Value store backed by MQTT topics.
//!
//! Endpoint values are published by the building network on
//! `<prefix>/<endpoint>`. Control-point writes go out as JSON on
//! `<prefix>/<endpoint>/set` and are mirrored into the local cache.

use super::client::{MqttClient, MqttMessage};
use crate::config::MqttConfig;
use crate::error::{ReconcileError, Result};
use crate::store::{ControlWrite, MemoryStore, PointValue, ValueStore, ValueWatch};
use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub struct MqttStore {
    cache: Arc<MemoryStore>,
    client: AsyncClient,
    prefix: String,
}

impl MqttStore {
    /// Connect to the broker and start routing endpoint values into the cache.
    ///
    /// Capacity attributes are static and come from the topology document.
    /// Returns the store and the handle of the background routing task.
    pub async fn connect(
        config: &MqttConfig,
        capacities: &HashMap<String, f64>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        info!(
            "[MQTT] Connecting to {}:{}",
            config.broker_host, config.broker_port
        );

        let mut mqtt_client = MqttClient::new(config);
        mqtt_client.subscribe(&format!("{}/+", config.topic_prefix));
        let client = mqtt_client.client();

        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(256);
        let (connected_tx, connected_rx) = oneshot::channel();

        // Start MQTT event loop FIRST (so it can establish connection)
        let mqtt_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, Some(connected_tx)).await;
        });

        match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ReconcileError::Mqtt(
                    "connection signal channel dropped".to_string(),
                ));
            }
            Err(_) => {
                mqtt_loop.abort();
                return Err(ReconcileError::Mqtt(
                    "connection timeout after 10 seconds".to_string(),
                ));
            }
        }

        let cache = Arc::new(MemoryStore::new());
        for (node, capacity) in capacities {
            cache.set_capacity(node, *capacity);
        }

        let store = Arc::new(Self {
            cache,
            client,
            prefix: config.topic_prefix.clone(),
        });

        let router = store.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                router.apply_message(&msg);
            }
            mqtt_loop.abort();
        });

        Ok((store, handle))
    }

    fn apply_message(&self, msg: &MqttMessage) {
        match endpoint_from_topic(&self.prefix, &msg.topic) {
            Some(endpoint) => {
                if self
                    .cache
                    .set_value(endpoint, PointValue::from_payload(&msg.payload))
                {
                    debug!("[MQTT] {} changed to {}", endpoint, msg.payload.trim());
                }
            }
            None => debug!("[MQTT] Ignoring message on {}", msg.topic),
        }
    }
}

/// `<prefix>/<endpoint>` → `<endpoint>`; anything deeper is not a value topic.
pub fn endpoint_from_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

/// Topic a control-point write is published on.
pub fn set_topic(prefix: &str, endpoint: &str) -> String {
    format!("{prefix}/{endpoint}/set")
}

/// Topic and JSON payload published for a control-point write.
pub fn outgoing_write(prefix: &str, write: &ControlWrite) -> Result<(String, Vec<u8>)> {
    Ok((set_topic(prefix, &write.target), serde_json::to_vec(write)?))
}

#[async_trait]
impl ValueStore for MqttStore {
    async fn current_value(&self, endpoint: &str) -> Option<PointValue> {
        self.cache.get(endpoint)
    }

    fn subscribe(&self, endpoint: &str) -> ValueWatch {
        self.cache.subscribe(endpoint)
    }

    async fn capacity(&self, node: &str) -> Option<f64> {
        self.cache.capacity(node).await
    }

    async fn write_control_value(&self, write: ControlWrite) -> Result<()> {
        let (topic, payload) = outgoing_write(&self.prefix, &write)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| {
                warn!("[MQTT] Failed to publish write to {}: {}", write.target, e);
                ReconcileError::WriteFailed {
                    target: write.target.clone(),
                    reason: e.to_string(),
                }
            })?;
        // Mirror only the value: the cache keeps no journal here.
        self.cache.set_value(&write.target, write.value);
        Ok(())
    }
}
