//! MQTT client wrapper for the cloud broker.

use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Message received from MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// MQTT client for the garage door bridge.
///
/// Subscriptions registered with [`MqttClient::with_subscription`] are
/// (re)issued on every ConnAck, since the broker session is not persistent.
/// A subscription that cannot be queued stays pending and is retried on the
/// next event loop iteration.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    subscriptions: Vec<(String, QoS)>,
    pending: Vec<(String, QoS)>,
    reconnect_delay: Duration,
}

fn read_pem(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| BridgeError::Certificate {
        path: path.to_string(),
        source,
    })
}

/// Build broker options from configuration, loading TLS material when enabled.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);

    if config.use_tls {
        let ca = read_pem(&config.root_ca_path)?;
        let cert = read_pem(&config.certificate_path)?;
        let key = read_pem(&config.private_key_path)?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));
    }

    // Set credentials if provided
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    Ok(options)
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Result<Self> {
        Self::with_capacity(config, 100)
    }

    fn with_capacity(config: &MqttConfig, capacity: usize) -> Result<Self> {
        let options = mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(options, capacity);

        Ok(Self {
            client,
            event_loop,
            subscriptions: Vec::new(),
            pending: Vec::new(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        })
    }

    /// Subscribe to a topic whenever the connection is (re)established.
    pub fn with_subscription(mut self, topic: impl Into<String>, qos: QoS) -> Self {
        self.subscriptions.push((topic.into(), qos));
        self
    }

    /// Queue every registered subscription again, after a (re)connect.
    fn resubscribe(&mut self) {
        self.pending = self.subscriptions.clone();
        self.flush_subscriptions();
        if !self.pending.is_empty() {
            warn!(
                "[MQTT] {} subscription(s) could not be queued, retrying",
                self.pending.len()
            );
        }
    }

    /// Try to queue pending subscriptions, keeping the ones that fail.
    fn flush_subscriptions(&mut self) {
        let client = &self.client;
        self.pending.retain(|(topic, qos)| {
            // try_subscribe: awaiting here would stall the event loop that drains requests
            match client.try_subscribe(topic, *qos) {
                Ok(()) => {
                    info!("[MQTT] Subscribing to {}", topic);
                    false
                }
                Err(e) => {
                    debug!("[MQTT] Subscribe to {} not queued yet: {}", topic, e);
                    true
                }
            }
        });
    }

    /// Run the MQTT event loop and forward messages to the provided channel.
    ///
    /// Signals `connected` on the first ConnAck. Runs until cancelled or the
    /// message channel is closed.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<MqttMessage>,
        mut connected: Option<oneshot::Sender<()>>,
        cancel: CancellationToken,
    ) {
        info!("[MQTT] Starting event loop");

        loop {
            if !self.pending.is_empty() {
                self.flush_subscriptions();
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("[MQTT] Connected ({:?})", ack.code);
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
                            warn!("[MQTT] Invalid UTF-8 in payload on {}: {}", topic, e);
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
                    error!("[MQTT] Connection error: {}", e);
                    // Wait before reconnecting
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        info!("[MQTT] Event loop stopped");
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_plain_tcp_options() {
        let mut config = Config::default().mqtt;
        config.use_tls = false;
        config.broker_host = "10.0.0.2".to_string();
        config.broker_port = 1883;

        let options = mqtt_options(&config).unwrap();
        assert_eq!(
            options.broker_address(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert_eq!(options.client_id(), "garagedoor");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_certificate_is_reported() {
        let mut config = Config::default().mqtt;
        config.use_tls = true;
        config.root_ca_path = "/nonexistent/root-CA.crt".to_string();

        match mqtt_options(&config) {
            Err(BridgeError::Certificate { path, .. }) => {
                assert_eq!(path, "/nonexistent/root-CA.crt");
            }
            other => panic!("expected certificate error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_failed_subscription_is_retried() {
        let mut config = Config::default().mqtt;
        config.use_tls = false;

        let mut client = MqttClient::with_capacity(&config, 1)
            .unwrap()
            .with_subscription("garage_door_cmd", QoS::AtLeastOnce);

        // Fill the request channel as a long offline period would
        client
            .client
            .try_publish("garage_door_1_status", QoS::AtLeastOnce, false, "100")
            .unwrap();

        client.resubscribe();
        assert_eq!(
            client.pending,
            vec![("garage_door_cmd".to_string(), QoS::AtLeastOnce)]
        );

        // Draining the queued requests makes room for the retry
        client.event_loop.clean();
        client.flush_subscriptions();
        assert!(client.pending.is_empty());
    }

    #[test]
    fn test_resubscribe_queues_all_topics() {
        let mut config = Config::default().mqtt;
        config.use_tls = false;

        let mut client = MqttClient::new(&config)
            .unwrap()
            .with_subscription("garage_door_cmd", QoS::AtLeastOnce)
            .with_subscription("garage_door_1_status", QoS::AtMostOnce);

        client.resubscribe();
        assert!(client.pending.is_empty());
        assert_eq!(client.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut config = Config::default().mqtt;
        config.use_tls = false;
        // Nothing listens here; the loop sits in its reconnect delay
        config.broker_host = "127.0.0.1".to_string();
        config.broker_port = 1;

        let client = MqttClient::new(&config)
            .unwrap()
            .with_subscription("garage_door_cmd", QoS::AtLeastOnce);
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(client.run(tx, None, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("event loop did not stop")
            .unwrap();
    }
}
