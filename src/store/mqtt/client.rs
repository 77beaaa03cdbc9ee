//! MQTT client wrapper for endpoint value traffic.

use crate::config::MqttConfig;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Message received from MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// MQTT client for the value store.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    subscriptions: Vec<String>,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self {
            client,
            event_loop,
            subscriptions: Vec::new(),
        }
    }

    /// Register a topic filter, subscribed on every (re)connection.
    ///
    /// Sessions are clean, so the broker forgets subscriptions whenever the
    /// connection drops.
    pub fn subscribe(&mut self, topic: &str) {
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Queue a SUBSCRIBE for every registered filter. Returns how many were queued.
    fn resubscribe(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|topic| match self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                Ok(()) => {
                    info!("[MQTT] Subscribing to topic: {}", topic);
                    true
                }
                Err(e) => {
                    error!("[MQTT] Failed to subscribe to {}: {}", topic, e);
                    false
                }
            })
            .count()
    }

    /// Run the MQTT event loop and forward messages to the provided channel.
    ///
    /// Every ConnAck re-sends the registered subscriptions. `connected` fires
    /// on the first one. Runs until the channel closes.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<MqttMessage>,
        mut connected: Option<oneshot::Sender<()>>,
    ) {
        info!("[MQTT] Starting event loop");

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected");
                    self.resubscribe();
                    if let Some(signal) = connected.take() {
                        let _ = signal.send(());
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = publish.topic.clone();
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("[MQTT] Invalid UTF-8 in payload: {}", e);
                            continue;
                        }
                    };

                    debug!("[MQTT] Received on {}: {}", topic, payload);

                    let msg = MqttMessage { topic, payload };
                    if tx.send(msg).await.is_err() {
                        error!("[MQTT] Message channel closed");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    // Wait before reconnecting
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}
