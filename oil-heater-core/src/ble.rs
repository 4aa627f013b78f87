//! GATT payload encoding, and the write handler registered with the BLE
//! transport.

use alloc::format;
use arrayvec::{ArrayString, ArrayVec};
use core::fmt::Write;
use embassy_time::Instant;
use serde::Serialize;
use thiserror::Error;

use crate::{
    command::{Command, CommandError, CommandReport, CommandSource},
    memlog::SharedLogger,
    publisher::StatusSnapshot,
    state::ControllerState,
};

/// Advertised in the scan response. Characteristic UUIDs live with the GATT
/// table in the firmware.
pub const SERVICE_UUID: &str = "4fafc201-0001-459e-8fcc-c5c9c331914b";

/// Longest value any characteristic holds.
pub const MAX_PAYLOAD_LEN: usize = 96;

pub type TextPayload = ArrayString<16>;
pub type StatusPayload = ArrayVec<u8, MAX_PAYLOAD_LEN>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Characteristic {
    Temperature,
    Setpoint,
    Status,
    Enable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("empty payload")]
    Empty,
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("payload is not a number")]
    NotANumber,
    #[error("enable payload must be \"1\" or \"0\"")]
    InvalidEnable,
    #[error("value does not fit the characteristic")]
    Serialize,
    #[error("characteristic is read-only")]
    ReadOnly,
}

/// What an accepted write did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WriteOutcome {
    SetpointAccepted(f32),
    /// Decoded, but refused by command intake. The characteristic keeps its
    /// previous value.
    SetpointRejected(CommandError),
    EnableSet(bool),
}

//
// Encoders.

/// Degrees Fahrenheit with one decimal, or `ERR` for an invalid reading.
pub fn encode_temperature(temperature: Option<f32>) -> Result<TextPayload, PayloadError> {
    match temperature {
        Some(value) => encode_decimal(value),
        None => ArrayString::from("ERR").map_err(|_| PayloadError::Serialize),
    }
}

pub fn encode_setpoint(setpoint: f32) -> Result<TextPayload, PayloadError> {
    encode_decimal(setpoint)
}

fn encode_decimal(value: f32) -> Result<TextPayload, PayloadError> {
    let mut text = ArrayString::new();
    write!(text, "{value:.1}").map_err(|_| PayloadError::Serialize)?;
    Ok(text)
}

pub fn encode_enable(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusJson {
    heater: bool,
    enabled: bool,
    fault: u8,
    safety_shutdown: bool,
    sensor_error: bool,
}

pub fn encode_status(snapshot: &StatusSnapshot) -> Result<StatusPayload, PayloadError> {
    let json = StatusJson {
        heater: snapshot.relay_on,
        enabled: snapshot.heater_enabled,
        fault: snapshot.fault.code(),
        safety_shutdown: snapshot.safety_shutdown(),
        sensor_error: snapshot.sensor_error(),
    };

    let bytes = serde_json::to_vec(&json).map_err(|_| PayloadError::Serialize)?;
    ArrayVec::try_from(bytes.as_slice()).map_err(|_| PayloadError::Serialize)
}

//
// Decoders.

fn decode_text(data: &[u8]) -> Result<&str, PayloadError> {
    let text = core::str::from_utf8(data).map_err(|_| PayloadError::NotUtf8)?;
    // Some phone apps append a NUL or a newline.
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match text {
        "" => Err(PayloadError::Empty),
        text => Ok(text),
    }
}

/// A finite decimal number. `NaN` and `inf` parse as `f32` but are garbage here.
pub fn decode_setpoint(data: &[u8]) -> Result<f32, PayloadError> {
    decode_text(data)?
        .parse::<f32>()
        .ok()
        .filter(|setpoint| setpoint.is_finite())
        .ok_or(PayloadError::NotANumber)
}

pub fn decode_enable(data: &[u8]) -> Result<bool, PayloadError> {
    match decode_text(data)? {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(PayloadError::InvalidEnable),
    }
}

/// Handles a write to one of the service's characteristics.
///
/// Payloads that fail to decode are logged and dropped without touching the
/// controller state; they do not count as a command.
pub fn handle_write(
    state: &ControllerState,
    characteristic: Characteristic,
    data: &[u8],
    now: Instant,
    memlog: SharedLogger,
) -> Result<WriteOutcome, PayloadError> {
    let outcome = match characteristic {
        Characteristic::Setpoint => decode_setpoint(data).map(|setpoint| {
            let report = apply(state, Command::setpoint(setpoint, CommandSource::Ble), now, memlog);
            match report.setpoint {
                Some(Err(error)) => WriteOutcome::SetpointRejected(error),
                // BLE setpoints are never clamped.
                _ => WriteOutcome::SetpointAccepted(setpoint),
            }
        }),
        Characteristic::Enable => decode_enable(data).map(|enable| {
            apply(state, Command::enable(enable, CommandSource::Ble), now, memlog);
            WriteOutcome::EnableSet(enable)
        }),
        Characteristic::Temperature | Characteristic::Status => Err(PayloadError::ReadOnly),
    };

    if let Err(error) = outcome {
        memlog.warn(format!("ble: {characteristic:?} write dropped, {error}"));
    }
    outcome
}

fn apply(
    state: &ControllerState,
    command: Command,
    now: Instant,
    memlog: SharedLogger,
) -> CommandReport {
    let report = state.apply_command(command, now);
    report.log(memlog, CommandSource::Ble);
    report
}
