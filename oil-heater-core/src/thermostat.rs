//! Bang-bang thermostat with hysteresis, relay cycle lockout and fault interlock.

use alloc::format;
use core::convert::Infallible;
use embassy_time::Instant;
use embedded_hal::digital::OutputPin;

use crate::{
    acquisition::{Calibration, TemperatureAcquisition, Thermocouple},
    config::{HYSTERESIS_F, RELAY_MIN_CYCLE_TIME},
    memlog::SharedLogger,
    relay::Relay,
    safety::{LatchEvent, OverTempLatch, evaluate_fault},
    state::{FaultCode, SharedState},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThermostatMode {
    /// Heater disabled, relay off.
    IdleOff,
    /// Heater enabled, relay on.
    RunningHeating,
    /// Heater enabled, relay off: above the deadband or holding inside it.
    RunningIdle,
    /// A fault is active, relay forced off.
    Faulted,
}

impl ThermostatMode {
    fn from_outputs(fault: FaultCode, heater_enabled: bool, relay_on: bool) -> Self {
        match (fault.is_active(), heater_enabled, relay_on) {
            (true, _, _) => ThermostatMode::Faulted,
            // The relay can outlive the enable flag while the cycle lockout runs.
            (false, _, true) => ThermostatMode::RunningHeating,
            (false, true, false) => ThermostatMode::RunningIdle,
            (false, false, false) => ThermostatMode::IdleOff,
        }
    }
}

/// Outcome of one control tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub reading: Option<f32>,
    pub fault: FaultCode,
    pub mode: ThermostatMode,
    pub relay_on: bool,
    pub relay_changed: bool,
    /// A relay flip was wanted but the cycle lockout held it back.
    pub flip_suppressed: bool,
}

/// The control loop's decision logic. Sole writer of the relay and fault
/// fields in [`SharedState`].
pub struct Thermostat {
    state: SharedState,
    memlog: SharedLogger,
    latch: OverTempLatch,
    last_fault: FaultCode,
    // Only the first suppressed flip of an episode is logged. An episode ends
    // when the flip is applied or no longer wanted.
    lockout_logged: bool,
}

impl Thermostat {
    pub fn new(state: SharedState, memlog: SharedLogger) -> Self {
        Thermostat {
            state,
            memlog,
            latch: OverTempLatch::default(),
            last_fault: FaultCode::None,
            lockout_logged: false,
        }
    }

    /// Runs one tick against `reading`, which must be the sample taken for
    /// this tick.
    pub fn tick(&mut self, reading: Option<f32>, now: Instant) -> TickReport {
        // Load every shared field once; commands may land while we work.
        let setpoint = self.state.setpoint();
        let mut heater_enabled = self.state.heater_enabled();
        let last_command = self.state.last_command();
        let relay_on = self.state.relay_on();
        let last_relay_change = self.state.last_relay_change();
        let reset_armed = self.state.overtemp_reset_armed();

        let raw_fault = evaluate_fault(reading, now, last_command);
        let (fault, latch_event) = self.latch.apply(raw_fault, reset_armed);
        match latch_event {
            LatchEvent::Engaged => {
                // Only setpoints accepted from now on may release the latch.
                self.state.store_overtemp_reset_armed(false);
                self.memlog.error(format!(
                    "over-temperature shutdown at {:.1}F",
                    reading.unwrap_or(f32::NAN)
                ));
            }
            LatchEvent::Released => self.memlog.info("over-temperature shutdown released"),
            LatchEvent::Unchanged => (),
        }

        if fault != self.last_fault {
            match fault {
                FaultCode::None => self.memlog.info(format!("fault cleared: {}", self.last_fault)),
                active => self.memlog.warn(format!("fault: {active}")),
            }
            self.last_fault = fault;
        }
        self.state.store_fault(fault);

        if fault.is_active() && heater_enabled {
            self.state.store_heater_enabled(false);
            heater_enabled = false;
        }

        let desired = match reading {
            _ if fault.is_active() || !heater_enabled => false,
            Some(temperature) if !relay_on && temperature <= setpoint - HYSTERESIS_F => true,
            Some(temperature) if relay_on && temperature >= setpoint + HYSTERESIS_F => false,
            // Inside the deadband.
            _ => relay_on,
        };

        let mut relay_changed = false;
        let mut flip_suppressed = false;
        if desired == relay_on {
            self.lockout_logged = false;
        } else {
            let forced_off = fault.is_active() && !desired;
            let lockout_left = last_relay_change
                .and_then(|changed| {
                    RELAY_MIN_CYCLE_TIME.checked_sub(now.saturating_duration_since(changed))
                })
                .filter(|left| left.as_ticks() > 0);

            match lockout_left {
                Some(left) if !forced_off => {
                    flip_suppressed = true;
                    if !self.lockout_logged {
                        self.lockout_logged = true;
                        self.memlog.debug(format!(
                            "relay {} held, cycle lockout {}ms",
                            on_off(desired),
                            left.as_millis()
                        ));
                    }
                }
                _ => {
                    self.state.store_relay_on(desired, now);
                    relay_changed = true;
                    self.lockout_logged = false;
                    self.memlog.info(format!(
                        "relay {} at {:.1}F, setpoint {:.1}F",
                        on_off(desired),
                        reading.unwrap_or(f32::NAN),
                        setpoint
                    ));
                }
            }
        }

        let relay_on = if relay_changed { desired } else { relay_on };

        TickReport {
            reading,
            fault,
            mode: ThermostatMode::from_outputs(fault, heater_enabled, relay_on),
            relay_on,
            relay_changed,
            flip_suppressed,
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// One full control tick: acquire, evaluate, decide, drive the relay.
pub struct ControlLoop<T, P> {
    acquisition: TemperatureAcquisition<T>,
    relay: Relay<P>,
    thermostat: Thermostat,
    state: SharedState,
    memlog: SharedLogger,
    // Set while sensor reads keep failing, so a run of errors logs once.
    read_failing: bool,
}

impl<T, P> ControlLoop<T, P>
where
    T: Thermocouple,
    P: OutputPin<Error = Infallible>,
{
    pub fn new(
        sensor: T,
        calibration: Calibration,
        relay: Relay<P>,
        state: SharedState,
        memlog: SharedLogger,
    ) -> Self {
        ControlLoop {
            acquisition: TemperatureAcquisition::new(sensor, calibration),
            relay,
            thermostat: Thermostat::new(state, memlog),
            state,
            memlog,
            read_failing: false,
        }
    }

    pub fn tick(&mut self, now: Instant) -> TickReport {
        let reading = match self.acquisition.read_temperature() {
            Ok(reading) => {
                if self.read_failing {
                    self.read_failing = false;
                    self.memlog.info("thermocouple read recovered");
                }
                reading
            }
            Err(error) => {
                if !self.read_failing {
                    self.read_failing = true;
                    self.memlog.warn(format!("thermocouple read failed: {error:?}"));
                }
                None
            }
        };
        self.state.store_temperature(reading);

        let report = self.thermostat.tick(reading, now);
        self.relay.set(report.relay_on);
        report
    }

    pub fn relay(&self) -> &Relay<P> {
        &self.relay
    }

    pub fn sensor_mut(&mut self) -> &mut T {
        self.acquisition.sensor_mut()
    }
}
