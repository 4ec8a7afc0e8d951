//! In-memory reed switch and relay.
//!
//! A `SimulatedDoor` hands out a state pin and a relay pin that share atomic
//! state with the handle, so tests and the `--simulate` mode can flip the reed
//! switch and observe relay pulses.

use crate::door::{GarageDoor, RelayPin, StatePin};
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

#[derive(Default)]
struct SimState {
    open: AtomicBool,
    relay_high: AtomicBool,
    pulses: AtomicU32,
    moves_on_pulse: AtomicBool,
}

/// Handle to a simulated door's pins.
#[derive(Clone)]
pub struct SimulatedDoor {
    state: Arc<SimState>,
}

impl SimulatedDoor {
    /// Create a door whose reed switch reports `open`.
    pub fn new(open: bool) -> Self {
        let state = SimState::default();
        state.open.store(open, Ordering::SeqCst);
        state.relay_high.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Make each completed relay pulse flip the reed switch, like a real opener.
    pub fn with_motion(self) -> Self {
        self.state.moves_on_pulse.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_open(&self, open: bool) {
        self.state.open.store(open, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn relay_is_high(&self) -> bool {
        self.state.relay_high.load(Ordering::SeqCst)
    }

    /// Number of low-to-high relay transitions seen so far.
    pub fn pulse_count(&self) -> u32 {
        self.state.pulses.load(Ordering::SeqCst)
    }

    /// Boxed pins for [`GarageDoor::new`].
    pub fn pins(&self) -> (Box<dyn StatePin>, Box<dyn RelayPin>) {
        (
            Box::new(SimStatePin(self.state.clone())),
            Box::new(SimRelayPin(self.state.clone())),
        )
    }

    /// Build a [`GarageDoor`] on top of this simulation.
    pub fn door(&self, name: impl Into<String>, pulse: Duration) -> GarageDoor {
        let (sensor, relay) = self.pins();
        GarageDoor::new(name, sensor, relay, pulse)
    }
}

struct SimStatePin(Arc<SimState>);

impl StatePin for SimStatePin {
    fn is_high(&self) -> bool {
        self.0.open.load(Ordering::SeqCst)
    }
}

struct SimRelayPin(Arc<SimState>);

impl RelayPin for SimRelayPin {
    fn set_high(&mut self) {
        let was_high = self.0.relay_high.swap(true, Ordering::SeqCst);
        if was_high {
            return;
        }

        self.0.pulses.fetch_add(1, Ordering::SeqCst);
        if self.0.moves_on_pulse.load(Ordering::SeqCst) {
            // fetch_xor with true flips the bit
            let was_open = self.0.open.fetch_xor(true, Ordering::SeqCst);
            info!(
                "[Sim] Door moved to {}",
                if was_open { "closed" } else { "open" }
            );
        }
    }

    fn set_low(&mut self) {
        self.0.relay_high.store(false, Ordering::SeqCst);
    }
}
