//! Build-time configuration.
//!
//! All temperatures are in degrees Fahrenheit unless the name says otherwise.

use embassy_time::Duration;

use crate::{acquisition::Calibration, memlog::Level};

// Setpoint limits. Race oil runs around 180F.
pub const DEFAULT_SETPOINT_F: f32 = 180.0;
pub const MIN_SETPOINT_F: f32 = 50.0;
pub const MAX_SETPOINT_F: f32 = 280.0;

/// Half-width of the bang-bang deadband around the setpoint.
pub const HYSTERESIS_F: f32 = 1.0;

/// Hard cutoff. A reading at or above this value is an over-temperature fault.
pub const SAFETY_MAX_TEMP_F: f32 = 300.0;

/// An over-temperature shutdown is only released by a setpoint command below
/// `SAFETY_MAX_TEMP_F - OVERTEMP_RESET_MARGIN_F`.
pub const OVERTEMP_RESET_MARGIN_F: f32 = 25.0;

/// The heater shuts off if no command arrives within this window.
pub const CMD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Minimum time between two relay transitions, to spare the relay contacts.
pub const RELAY_MIN_CYCLE_TIME: Duration = Duration::from_secs(10);

/// Interval between control loop ticks.
// The MAX6675 needs 220ms to complete a conversion.
pub const CONTROL_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Number of valid samples in the moving-average filter.
pub const SMOOTHING_SAMPLES: usize = 8;

/// Minimum temperature change that warrants a new notification.
pub const TEMP_NOTIFY_EPSILON_F: f32 = 0.1;

// Status publishing cadence.
pub const STATUS_PUBLISH_INTERVAL: Duration = Duration::from_millis(500);
pub const STATUS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const UI_STATUS_INTERVAL: Duration = Duration::from_millis(250);

/// Thermocouple calibration.
///
/// Single-point offset measured against a reference thermometer at operating
/// temperature: reference minus raw reading, in Celsius.
pub const CALIBRATION: Calibration = Calibration::SinglePoint { offset_c: 4.5 };

/// Set to false if the relay module is active-low.
pub const RELAY_ACTIVE_HIGH: bool = true;

pub const BLE_DEVICE_NAME: &str = "Heater_Controller";

/// Memlog capacity, in characters.
pub const MEMLOG_CAPACITY: usize = 480;
/// Lower records are kept in the memlog but not echoed to the console.
pub const MEMLOG_PRINT_LEVEL: Level = Level::Info;
