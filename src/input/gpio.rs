//! Raspberry Pi GPIO backend.
//!
//! Reed switches are wired between the state pin and ground, so the inputs use
//! the internal pull-up. Relay modules are active low; the outputs start high
//! and stay high when the process exits.

use crate::config::DoorConfig;
use crate::door::{GarageDoor, RelayPin, StatePin};
use crate::error::Result;
use log::info;
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::time::Duration;

impl StatePin for InputPin {
    fn is_high(&self) -> bool {
        InputPin::is_high(self)
    }
}

impl RelayPin for OutputPin {
    fn set_high(&mut self) {
        OutputPin::set_high(self);
    }

    fn set_low(&mut self) {
        OutputPin::set_low(self);
    }
}

/// Opens the GPIO peripheral and builds doors from pin configuration.
pub struct GpioBackend {
    gpio: Gpio,
}

impl GpioBackend {
    pub fn new() -> Result<Self> {
        Ok(Self { gpio: Gpio::new()? })
    }

    /// Claim the pins for one door.
    pub fn door(&self, config: &DoorConfig, pulse: Duration) -> Result<GarageDoor> {
        let sensor = self.gpio.get(config.state_pin)?.into_input_pullup();
        let mut relay = self.gpio.get(config.relay_pin)?.into_output_high();
        // Dropping would return the pin to input mode and let the relay float
        relay.set_reset_on_drop(false);

        info!(
            "[GPIO] {}: state pin {}, relay pin {}",
            config.name, config.state_pin, config.relay_pin
        );

        Ok(GarageDoor::new(
            config.name.clone(),
            Box::new(sensor),
            Box::new(relay),
            pulse,
        ))
    }

    /// Claim the pins for every configured door.
    pub fn doors(&self, configs: &[DoorConfig], pulse: Duration) -> Result<Vec<GarageDoor>> {
        configs
            .iter()
            .map(|config| self.door(config, pulse))
            .collect()
    }
}
