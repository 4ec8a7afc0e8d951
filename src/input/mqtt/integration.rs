//! Garage bridge orchestrator.
//!
//! Connects to the broker, subscribes to the command topic, runs the status
//! monitor and routes commands to the doors, keeping MQTT internals out of
//! main.rs.

use super::client::{MqttClient, MqttMessage};
use crate::config::Config;
use crate::door::command::resolve_payload;
use crate::door::{DoorSet, StatusMonitor};
use crate::error::{BridgeError, Result};
use log::{info, warn};
use rumqttc::QoS;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between subscribing and the first status poll.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct GarageBridge {
    config: Config,
    doors: DoorSet,
}

impl GarageBridge {
    pub fn new(config: Config, doors: DoorSet) -> Self {
        Self { config, doors }
    }

    /// Route one inbound message. Door triggers run on their own task so a
    /// pulse on one door does not delay commands for another.
    fn handle_message(&self, msg: MqttMessage) {
        if msg.topic != self.config.mqtt.command_topic {
            warn!("[MQTT] Ignoring message on unexpected topic {}", msg.topic);
            return;
        }

        match resolve_payload(&self.doors, &msg.payload) {
            Ok(door) => {
                info!("[MQTT] Command received for {}", door.name());
                tokio::spawn(async move {
                    door.trigger().await;
                });
            }
            Err(e) => warn!("[MQTT] Ignoring command {:?}: {}", msg.payload, e),
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Fails on an invalid configuration or if the broker cannot be reached
    /// within the connect timeout.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        if self.doors.is_empty() {
            info!("[MQTT] No doors configured, nothing to bridge");
            return Ok(());
        }

        info!(
            "[MQTT] Connecting to {}:{} as {}",
            self.config.mqtt.broker_host, self.config.mqtt.broker_port, self.config.mqtt.client_id
        );

        let mqtt_client = MqttClient::new(&self.config.mqtt)?
            .with_subscription(&self.config.mqtt.command_topic, QoS::AtLeastOnce);
        let client = mqtt_client.client();

        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);
        let (connected_tx, connected_rx) = oneshot::channel();

        let loop_cancel = shutdown.child_token();
        let mqtt_loop = tokio::spawn(mqtt_client.run(msg_tx, Some(connected_tx), loop_cancel.clone()));

        tokio::select! {
            _ = shutdown.cancelled() => {
                mqtt_loop.abort();
                return Ok(());
            }
            result = tokio::time::timeout(CONNECT_TIMEOUT, connected_rx) => match result {
                Ok(Ok(())) => info!("[MQTT] Connection established"),
                Ok(Err(_)) => {
                    mqtt_loop.abort();
                    return Err(BridgeError::MqttConnectionFailed(
                        "event loop stopped before connecting".to_string(),
                    ));
                }
                Err(_) => {
                    mqtt_loop.abort();
                    return Err(BridgeError::MqttConnectionFailed(format!(
                        "no connection after {:?}",
                        CONNECT_TIMEOUT
                    )));
                }
            },
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                loop_cancel.cancel();
                let _ = mqtt_loop.await;
                info!("[MQTT] Bridge stopped before start");
                return Ok(());
            }
            _ = tokio::time::sleep(SETTLE_DELAY) => {}
        }

        let monitor_cancel = shutdown.child_token();
        let monitor = StatusMonitor::new(self.doors.clone(), client.clone(), &self.config.monitor);
        let monitor_task = tokio::spawn(monitor.run(monitor_cancel.clone()));

        info!("[MQTT] Bridge started with {} door(s)", self.doors.len());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = msg_rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => {
                        warn!("[MQTT] Event loop ended");
                        break;
                    }
                },
            }
        }

        monitor_cancel.cancel();
        let _ = monitor_task.await;

        if let Err(e) = client.try_disconnect() {
            warn!("[MQTT] Failed to disconnect cleanly: {}", e);
        }
        // Give the event loop a moment to flush the disconnect
        tokio::time::sleep(Duration::from_millis(100)).await;
        loop_cancel.cancel();
        let _ = mqtt_loop.await;

        info!("[MQTT] Bridge stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::simulation::SimulatedDoor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn bridge() -> (SimulatedDoor, SimulatedDoor, GarageBridge) {
        let first = SimulatedDoor::new(false);
        let second = SimulatedDoor::new(false);
        let doors = DoorSet::new(vec![
            first.door("garage_door_1", Duration::from_millis(5)),
            second.door("garage_door_2", Duration::from_millis(5)),
        ]);
        (first, second, GarageBridge::new(Config::default(), doors))
    }

    fn message(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn test_command_triggers_door() {
        let (first, second, bridge) = bridge();

        bridge.handle_message(message("garage_door_cmd", r#"{"door": "garage_door_1"}"#));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.pulse_count(), 1);
        assert_eq!(second.pulse_count(), 0);
        assert!(first.relay_is_high());
    }

    #[tokio::test]
    async fn test_bad_commands_are_ignored() {
        let (first, second, bridge) = bridge();

        bridge.handle_message(message("garage_door_cmd", "open sesame"));
        bridge.handle_message(message("garage_door_cmd", r#"{"door": "garage_door_9"}"#));
        bridge.handle_message(message("other_topic", r#"{"door": "garage_door_1"}"#));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.pulse_count(), 0);
        assert_eq!(second.pulse_count(), 0);
    }

    #[tokio::test]
    async fn test_no_doors_returns_immediately() {
        let bridge = GarageBridge::new(Config::default(), DoorSet::default());
        let result = bridge.run(CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_certificates_fail_startup() {
        let (_, _, mut bridge) = bridge();
        bridge.config.mqtt.root_ca_path = "/nonexistent/root-CA.crt".to_string();

        let result = bridge.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::Certificate { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_startup() {
        let (_, _, mut bridge) = bridge();
        bridge.config.monitor.poll_interval_secs = 0;

        let result = bridge.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
    }

    /// Accepts one connection, answers CONNECT with a successful CONNACK and
    /// then swallows whatever the client sends.
    async fn accepting_broker() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                return;
            }
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn test_shutdown_during_settle() {
        let port = accepting_broker().await;
        let (first, _, mut bridge) = bridge();
        bridge.config.mqtt.use_tls = false;
        bridge.config.mqtt.broker_host = "127.0.0.1".to_string();
        bridge.config.mqtt.broker_port = port;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(bridge.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("bridge kept waiting after shutdown")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(first.pulse_count(), 0);
    }
}
