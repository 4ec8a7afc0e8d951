//! Pin abstractions used by [`GarageDoor`](super::GarageDoor).
//!
//! The GPIO backend implements these for `rppal` pins; the simulation backend
//! implements them over shared atomics.

/// Reed switch input.
pub trait StatePin: Send {
    /// Current input level.
    fn is_high(&self) -> bool;
}

/// Relay trigger output. Idle level is high.
pub trait RelayPin: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
}
