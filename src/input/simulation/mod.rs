//! Simulated door hardware for running without GPIO access.

mod doors;

pub use doors::SimulatedDoor;
