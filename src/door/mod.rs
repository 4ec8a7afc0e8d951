//! Garage door model: reed switch status, relay pulses and the door registry.
//!
//! A door is backed by two pins. The state pin is a reed switch input with the
//! internal pull-up enabled, so it reads high while the door is open. The relay
//! pin is held high and briefly pulled low to emulate a press on the opener's
//! wall button.

pub mod command;
pub mod monitor;
pub mod pins;

pub use command::DoorCommand;
pub use monitor::{StatusMonitor, StatusPublisher};
pub use pins::{RelayPin, StatePin};

use log::{info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Door position as reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorStatus {
    Closed,
    Open,
}

impl DoorStatus {
    /// Map the reed switch level to a status. High means open.
    pub fn from_level(high: bool) -> Self {
        if high { Self::Open } else { Self::Closed }
    }

    /// Numeric value published on the status topic.
    pub fn value(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 100,
        }
    }

    /// MQTT payload for this status.
    pub fn payload(self) -> String {
        self.value().to_string()
    }
}

impl fmt::Display for DoorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// A single garage door.
///
/// Pins are kept behind `parking_lot` mutexes that are only held for the
/// duration of a single pin access, never across an await point.
pub struct GarageDoor {
    name: String,
    sensor: Mutex<Box<dyn StatePin>>,
    relay: Mutex<Box<dyn RelayPin>>,
    pulse: Duration,
    pulsing: AtomicBool,
}

impl GarageDoor {
    /// Create a door and drive its relay output to the idle (high) level.
    pub fn new(
        name: impl Into<String>,
        sensor: Box<dyn StatePin>,
        mut relay: Box<dyn RelayPin>,
        pulse: Duration,
    ) -> Self {
        relay.set_high();
        Self {
            name: name.into(),
            sensor: Mutex::new(sensor),
            relay: Mutex::new(relay),
            pulse,
            pulsing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic this door's status is published on.
    pub fn status_topic(&self) -> String {
        format!("{}_status", self.name)
    }

    /// Read the reed switch.
    pub fn status(&self) -> DoorStatus {
        DoorStatus::from_level(self.sensor.lock().is_high())
    }

    /// Pulse the relay low for the configured duration.
    ///
    /// Returns `false` without touching the relay if a pulse is already in
    /// progress. The relay is driven high again even if the returned future is
    /// dropped mid-pulse.
    pub async fn trigger(&self) -> bool {
        if self.pulsing.swap(true, Ordering::SeqCst) {
            warn!("[Door] {} is already being triggered, ignoring", self.name);
            return false;
        }

        let _guard = PulseGuard { door: self };
        info!("[Door] Triggering {} ({})", self.name, self.status());
        self.relay.lock().set_low();
        tokio::time::sleep(self.pulse).await;
        true
    }
}

/// Releases the relay when a pulse ends or is cancelled.
struct PulseGuard<'a> {
    door: &'a GarageDoor,
}

impl Drop for PulseGuard<'_> {
    fn drop(&mut self) {
        self.door.relay.lock().set_high();
        self.door.pulsing.store(false, Ordering::SeqCst);
    }
}

/// The doors managed by the bridge, in configuration order.
#[derive(Clone, Default)]
pub struct DoorSet {
    doors: Vec<Arc<GarageDoor>>,
}

impl DoorSet {
    pub fn new(doors: Vec<GarageDoor>) -> Self {
        Self {
            doors: doors.into_iter().map(Arc::new).collect(),
        }
    }

    /// Look up a door by its name (e.g. `garage_door_1`).
    pub fn get(&self, name: &str) -> Option<&Arc<GarageDoor>> {
        self.doors.iter().find(|door| door.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<GarageDoor>> {
        self.doors.iter()
    }

    pub fn len(&self) -> usize {
        self.doors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doors.is_empty()
    }

    /// Current status of every door.
    pub fn statuses(&self) -> Vec<(String, DoorStatus)> {
        self.doors
            .iter()
            .map(|door| (door.name().to_string(), door.status()))
            .collect()
    }
}
