//! Input and output backends for the bridge.
//!
//! Current backends:
//! - `gpio`: Raspberry Pi reed switches and relays via `rppal`
//! - `simulation`: in-memory doors for development and tests
//! - `mqtt`: broker connection and the bridge orchestrator

pub mod gpio;
pub mod mqtt;
pub mod simulation;
