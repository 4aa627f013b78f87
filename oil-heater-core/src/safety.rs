//! Fault evaluation.
//!
//! Faults are recomputed from scratch every tick, in precedence order: a lost
//! command link hides everything else, then a dead sensor, then an
//! over-temperature reading. Only over-temperature latches, and that latch is
//! held by the control loop through [`OverTempLatch`], not here.

use embassy_time::Instant;

use crate::{
    config::{CMD_TIMEOUT, OVERTEMP_RESET_MARGIN_F, SAFETY_MAX_TEMP_F},
    state::FaultCode,
};

/// Computes the fault for one tick.
pub fn evaluate_fault(reading: Option<f32>, now: Instant, last_command: Instant) -> FaultCode {
    // A command stamped after `now` was taken counts as fresh.
    if now.saturating_duration_since(last_command) > CMD_TIMEOUT {
        return FaultCode::CommTimeout;
    }

    match reading {
        None => FaultCode::SensorOpen,
        Some(temperature) if temperature >= SAFETY_MAX_TEMP_F => FaultCode::OverTemperature,
        Some(_) => FaultCode::None,
    }
}

/// Whether a setpoint is low enough to release an over-temperature shutdown.
pub fn releases_overtemp(setpoint: f32) -> bool {
    setpoint < SAFETY_MAX_TEMP_F - OVERTEMP_RESET_MARGIN_F
}

/// Holds an over-temperature shutdown until the operator sends a safe setpoint.
///
/// Cooling below the limit is not enough: the latch also requires a setpoint
/// command accepted after the shutdown that passes [`releases_overtemp`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OverTempLatch {
    latched: bool,
}

/// What the latch did on a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatchEvent {
    Unchanged,
    Engaged,
    Released,
}

impl OverTempLatch {
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Combines the raw fault with the latch.
    ///
    /// `reset_armed` is true if a releasing setpoint arrived since the latch
    /// engaged. Returns the fault to act on and what the latch did. On
    /// [`LatchEvent::Engaged`] the caller disarms any earlier reset request.
    pub fn apply(&mut self, raw: FaultCode, reset_armed: bool) -> (FaultCode, LatchEvent) {
        if raw == FaultCode::OverTemperature {
            if self.latched {
                return (raw, LatchEvent::Unchanged);
            }
            self.latched = true;
            return (raw, LatchEvent::Engaged);
        }

        if !self.latched {
            return (raw, LatchEvent::Unchanged);
        }

        if reset_armed {
            self.latched = false;
            return (raw, LatchEvent::Released);
        }

        // A higher-precedence fault shows through, the latch stays underneath.
        match raw {
            FaultCode::None => (FaultCode::OverTemperature, LatchEvent::Unchanged),
            other => (other, LatchEvent::Unchanged),
        }
    }
}
