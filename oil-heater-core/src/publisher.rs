//! Decides which characteristics an observer needs to hear about.

use embassy_time::Instant;

use crate::{
    config::{STATUS_HEARTBEAT_INTERVAL, TEMP_NOTIFY_EPSILON_F},
    state::{ControllerState, FaultCode},
};

/// A consistent copy of the observable state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub temperature: Option<f32>,
    pub setpoint: f32,
    pub heater_enabled: bool,
    pub relay_on: bool,
    pub fault: FaultCode,
}

impl StatusSnapshot {
    pub fn safety_shutdown(&self) -> bool {
        self.fault == FaultCode::OverTemperature
    }

    pub fn sensor_error(&self) -> bool {
        self.fault == FaultCode::SensorOpen
    }
}

/// Loads each field once.
pub fn build_status_snapshot(state: &ControllerState) -> StatusSnapshot {
    StatusSnapshot {
        temperature: state.temperature(),
        setpoint: state.setpoint(),
        heater_enabled: state.heater_enabled(),
        relay_on: state.relay_on(),
        fault: state.fault(),
    }
}

/// Which characteristics to update on this poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Publication {
    pub temperature: bool,
    pub setpoint: bool,
    pub status: bool,
    /// Enable has no notify; its stored value must still follow the state,
    /// since the control loop clears it on a fault.
    pub enable: bool,
}

impl Publication {
    pub fn is_empty(&self) -> bool {
        !(self.temperature || self.setpoint || self.status || self.enable)
    }
}

#[derive(Clone, Copy)]
struct PublishedStatus {
    heater_enabled: bool,
    relay_on: bool,
    fault: FaultCode,
    at: Instant,
}

/// Remembers what was last published.
#[derive(Default)]
pub struct StatusPublisher {
    // Outer `None`: never published.
    temperature: Option<Option<f32>>,
    setpoint: Option<f32>,
    status: Option<PublishedStatus>,
    enable: Option<bool>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything, so the next poll publishes every characteristic.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn poll(&mut self, snapshot: &StatusSnapshot, now: Instant) -> Publication {
        let temperature = match (self.temperature, snapshot.temperature) {
            (None, _) => true,
            (Some(Some(last)), Some(current)) => moved(last, current),
            (Some(last), current) => last.is_some() != current.is_some(),
        };
        if temperature {
            self.temperature = Some(snapshot.temperature);
        }

        let setpoint = self
            .setpoint
            .is_none_or(|last| moved(last, snapshot.setpoint));
        if setpoint {
            self.setpoint = Some(snapshot.setpoint);
        }

        let status = match self.status {
            None => true,
            Some(last) => {
                last.heater_enabled != snapshot.heater_enabled
                    || last.relay_on != snapshot.relay_on
                    || last.fault != snapshot.fault
                    || now.saturating_duration_since(last.at) >= STATUS_HEARTBEAT_INTERVAL
            }
        };
        if status {
            self.status = Some(PublishedStatus {
                heater_enabled: snapshot.heater_enabled,
                relay_on: snapshot.relay_on,
                fault: snapshot.fault,
                at: now,
            });
        }

        let enable = self.enable != Some(snapshot.heater_enabled);
        if enable {
            self.enable = Some(snapshot.heater_enabled);
        }

        Publication {
            temperature,
            setpoint,
            status,
            enable,
        }
    }
}

fn moved(last: f32, current: f32) -> bool {
    (current - last).abs() >= TEMP_NOTIFY_EPSILON_F
}
