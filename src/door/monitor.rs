//! Periodic door status polling.
//!
//! Each poll reads every reed switch and publishes the status of doors whose
//! state differs from the last published value. A status is only recorded as
//! published once the publish succeeds, so failed publishes are retried on the
//! next poll.

use super::{DoorSet, DoorStatus};
use crate::config::MonitorConfig;
use crate::error::Result;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, QoS};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sink for door status updates.
pub trait StatusPublisher: Send + Sync {
    fn publish_status(&self, topic: &str, payload: String)
    -> impl Future<Output = Result<()>> + Send;
}

impl StatusPublisher for AsyncClient {
    async fn publish_status(&self, topic: &str, payload: String) -> Result<()> {
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await?;
        Ok(())
    }
}

/// Polls doors and publishes status changes.
pub struct StatusMonitor<P> {
    doors: DoorSet,
    publisher: P,
    interval: Duration,
    publish_initial: bool,
    published: HashMap<String, DoorStatus>,
}

impl<P: StatusPublisher> StatusMonitor<P> {
    pub fn new(doors: DoorSet, publisher: P, config: &MonitorConfig) -> Self {
        Self {
            doors,
            publisher,
            interval: config.poll_interval(),
            publish_initial: config.publish_initial,
            published: HashMap::new(),
        }
    }

    /// Last status published (or recorded as baseline) for a door.
    pub fn last_published(&self, door: &str) -> Option<DoorStatus> {
        self.published.get(door).copied()
    }

    /// Record the current state of every door as the starting point.
    ///
    /// With `publish_initial` enabled the baseline is also published so that
    /// subscribers learn the state without waiting for a change.
    pub async fn start(&mut self) -> usize {
        if self.publish_initial {
            return self.poll_once().await;
        }

        for (name, status) in self.doors.statuses() {
            info!("[Monitor] {} is {}", name, status);
            self.published.insert(name, status);
        }
        0
    }

    /// Read all doors and publish the ones that changed.
    ///
    /// Returns the number of statuses published.
    pub async fn poll_once(&mut self) -> usize {
        let mut sent = 0;

        for door in self.doors.iter() {
            let status = door.status();
            if self.published.get(door.name()) == Some(&status) {
                continue;
            }

            let topic = door.status_topic();
            match self.publisher.publish_status(&topic, status.payload()).await {
                Ok(()) => {
                    info!("[Monitor] {} is now {} ({})", door.name(), status, status.value());
                    self.published.insert(door.name().to_string(), status);
                    sent += 1;
                }
                Err(e) => {
                    warn!("[Monitor] Failed to publish {}: {}", topic, e);
                }
            }
        }

        sent
    }

    /// Poll until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "[Monitor] Watching {} door(s) every {:?}",
            self.doors.len(),
            self.interval
        );

        self.start().await;

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately and the baseline was just taken
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("[Monitor] Stopped");
    }
}
