//! Thermostat and safety interlock for the oil heater controller.
//!
//! Everything here is hardware-independent: sensors and relays are reached
//! through `embedded-hal` traits, and time is passed in as
//! [`embassy_time::Instant`] so the control logic can be exercised on a host.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acquisition;
pub mod ble;
pub mod command;
pub mod config;
pub mod memlog;
pub mod publisher;
pub mod relay;
pub mod safety;
pub mod state;
pub mod thermostat;
pub mod uilink;

pub use command::{Command, CommandError, CommandReport, CommandSource};
pub use publisher::{Publication, StatusPublisher, StatusSnapshot, build_status_snapshot};
pub use state::{ControllerState, FaultCode, SharedState};
pub use thermostat::{ControlLoop, Thermostat, ThermostatMode, TickReport};
