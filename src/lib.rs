//! Garage door bridge library.
//!
//! Polls garage door reed switches, publishes status changes to an MQTT
//! broker, and pulses the door relays when a command arrives.

pub mod config;
pub mod door;
pub mod error;
pub mod input;
pub mod instance_lock;
