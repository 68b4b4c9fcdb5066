//! Entry gate control
//!
//! The gate is a single boolean driven by two debounced triggers from the
//! entry sensor. Opening also needs a free bay; closing is always honored.

use crate::domain::types::EntrySignal;
use crate::infra::config::Config;
use std::time::Instant;
use tracing::{error, info, trace};

/// Servo output: one of two fixed pulse widths
pub trait GateActuator: Send {
    fn set_pulse_us(&mut self, pulse_us: u32) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Close,
    /// A car is waiting but no bay is free
    DeniedFull,
    Hold,
}

/// Decide what to do with the gate this tick
pub fn decide(is_open: bool, signal: Option<EntrySignal>, free: usize) -> GateDecision {
    match (signal, is_open) {
        (Some(EntrySignal::Detected), false) if free > 0 => GateDecision::Open,
        (Some(EntrySignal::Detected), false) => GateDecision::DeniedFull,
        (Some(EntrySignal::Clear), true) => GateDecision::Close,
        _ => GateDecision::Hold,
    }
}

pub struct GateController {
    actuator: Box<dyn GateActuator>,
    open_pulse_us: u32,
    close_pulse_us: u32,
    is_open: bool,
}

impl GateController {
    pub fn new(actuator: Box<dyn GateActuator>, open_pulse_us: u32, close_pulse_us: u32) -> Self {
        Self { actuator, open_pulse_us, close_pulse_us, is_open: false }
    }

    pub fn from_config(config: &Config, actuator: Box<dyn GateActuator>) -> Self {
        Self::new(actuator, config.open_pulse_us(), config.close_pulse_us())
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Run one decision and drive the actuator if the state changes.
    ///
    /// Returns `(decision, actuator_ok)`. The commanded state is kept even if
    /// the actuator write fails; the servo has no position feedback.
    pub fn apply(&mut self, signal: Option<EntrySignal>, free: usize) -> (GateDecision, bool) {
        let decision = decide(self.is_open, signal, free);
        let ok = match decision {
            GateDecision::Open => self.drive(true),
            GateDecision::Close => self.drive(false),
            GateDecision::DeniedFull => {
                trace!(free = free, "gate_open_denied_full");
                true
            }
            GateDecision::Hold => true,
        };
        (decision, ok)
    }

    /// Drive the barrier down, e.g. at startup or shutdown
    pub fn force_close(&mut self) -> bool {
        self.drive(false)
    }

    fn drive(&mut self, open: bool) -> bool {
        let start = Instant::now();
        let pulse_us = if open { self.open_pulse_us } else { self.close_pulse_us };
        self.is_open = open;
        let state = if open { "open" } else { "closed" };

        match self.actuator.set_pulse_us(pulse_us) {
            Ok(()) => {
                let latency_us = start.elapsed().as_micros() as u64;
                info!(state = state, pulse_us = pulse_us, latency_us = %latency_us, "gate_command");
                true
            }
            Err(e) => {
                error!(state = state, pulse_us = pulse_us, error = %e, "gate_command_error");
                false
            }
        }
    }
}
