use alloc::boxed::Box;
use embassy_time::Instant;
use portable_atomic::{AtomicBool, AtomicF32, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::config::DEFAULT_SETPOINT_F;

pub type SharedState = &'static ControllerState;

// Marks a timestamp that was never set.
const NEVER: u64 = u64::MAX;

// Every field is read and written on its own. Nothing here is a transaction,
// so relaxed ordering is all any field needs.
const ORDER: Ordering = Ordering::Relaxed;

/// Creates the process-wide controller state.
pub fn init(now: Instant) -> SharedState {
    Box::leak(Box::new(ControllerState::new(now)))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultCode {
    #[default]
    None = 0,
    SensorOpen = 1,
    OverTemperature = 2,
    CommTimeout = 3,
}

impl FaultCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FaultCode::None),
            1 => Some(FaultCode::SensorOpen),
            2 => Some(FaultCode::OverTemperature),
            3 => Some(FaultCode::CommTimeout),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        self != FaultCode::None
    }
}

impl core::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FaultCode::None => write!(f, "none"),
            FaultCode::SensorOpen => write!(f, "sensor open"),
            FaultCode::OverTemperature => write!(f, "over-temperature"),
            FaultCode::CommTimeout => write!(f, "command timeout"),
        }
    }
}

/// State shared between the control loop and the command sources.
///
/// Each field is an independent atomic so that command handlers running in
/// another context never wait on the control loop. Readers that need several
/// fields to agree (the control loop, the status publisher) load each one
/// once into a local and work from those copies.
///
/// `relay_on`, `fault` and `last_relay_change` are only written by the
/// control loop.
pub struct ControllerState {
    // NaN while the sensor reading is invalid.
    temperature: AtomicF32,
    setpoint: AtomicF32,
    heater_enabled: AtomicBool,
    relay_on: AtomicBool,
    fault: AtomicU8,
    // Instants, in ticks.
    last_command: AtomicU64,
    last_relay_change: AtomicU64,
    last_command_seq: AtomicU32,
    overtemp_reset_armed: AtomicBool,
}

impl ControllerState {
    pub fn new(now: Instant) -> Self {
        ControllerState {
            temperature: AtomicF32::new(f32::NAN),
            setpoint: AtomicF32::new(DEFAULT_SETPOINT_F),
            heater_enabled: AtomicBool::new(false),
            relay_on: AtomicBool::new(false),
            fault: AtomicU8::new(FaultCode::None.code()),
            last_command: AtomicU64::new(now.as_ticks()),
            last_relay_change: AtomicU64::new(NEVER),
            last_command_seq: AtomicU32::new(0),
            overtemp_reset_armed: AtomicBool::new(false),
        }
    }

    /// The latest smoothed temperature, or `None` if the sensor is faulted.
    pub fn temperature(&self) -> Option<f32> {
        let value = self.temperature.load(ORDER);
        (!value.is_nan()).then_some(value)
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint.load(ORDER)
    }

    pub fn heater_enabled(&self) -> bool {
        self.heater_enabled.load(ORDER)
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on.load(ORDER)
    }

    pub fn fault(&self) -> FaultCode {
        FaultCode::from_code(self.fault.load(ORDER)).unwrap_or(FaultCode::None)
    }

    pub fn last_command(&self) -> Instant {
        Instant::from_ticks(self.last_command.load(ORDER))
    }

    pub fn last_relay_change(&self) -> Option<Instant> {
        match self.last_relay_change.load(ORDER) {
            NEVER => None,
            ticks => Some(Instant::from_ticks(ticks)),
        }
    }

    pub fn last_command_seq(&self) -> u32 {
        self.last_command_seq.load(ORDER)
    }

    //
    // Command intake writers.

    pub(crate) fn store_setpoint(&self, setpoint: f32) {
        self.setpoint.store(setpoint, ORDER);
    }

    pub(crate) fn store_heater_enabled(&self, enabled: bool) {
        self.heater_enabled.store(enabled, ORDER);
    }

    pub(crate) fn store_last_command(&self, now: Instant) {
        self.last_command.store(now.as_ticks(), ORDER);
    }

    pub(crate) fn store_last_command_seq(&self, seq: u32) {
        self.last_command_seq.store(seq, ORDER);
    }

    pub(crate) fn store_overtemp_reset_armed(&self, armed: bool) {
        self.overtemp_reset_armed.store(armed, ORDER);
    }

    pub(crate) fn overtemp_reset_armed(&self) -> bool {
        self.overtemp_reset_armed.load(ORDER)
    }

    //
    // Control loop writers.

    pub(crate) fn store_temperature(&self, reading: Option<f32>) {
        self.temperature.store(reading.unwrap_or(f32::NAN), ORDER);
    }

    pub(crate) fn store_relay_on(&self, on: bool, now: Instant) {
        self.relay_on.store(on, ORDER);
        self.last_relay_change.store(now.as_ticks(), ORDER);
    }

    pub(crate) fn store_fault(&self, fault: FaultCode) {
        self.fault.store(fault.code(), ORDER);
    }
}
