//! MQTT side of the bridge.
//!
//! This module provides the broker client and the orchestrator that ties the
//! command topic and the status monitor to the doors.

mod client;
mod integration;

pub use client::{MqttClient, MqttMessage, mqtt_options};
pub use integration::GarageBridge;
