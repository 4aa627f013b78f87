//! Framing for the wired display board link.
//!
//! Both directions use fixed-size little-endian packets that start with a
//! four-byte magic. Temperatures travel in tenths of a degree Celsius.

use arrayvec::ArrayVec;
use embassy_time::Instant;

use crate::{
    acquisition::{celsius_to_fahrenheit, fahrenheit_to_celsius},
    command::{Command, CommandReport, CommandSource},
    memlog::SharedLogger,
    publisher::StatusSnapshot,
    state::ControllerState,
};

/// "UIC1", display board to controller.
pub const COMMAND_MAGIC: u32 = 0x5549_4331;
/// "CUI1", controller to display board.
pub const STATUS_MAGIC: u32 = 0x4355_4931;

pub const COMMAND_PACKET_LEN: usize = 12;
pub const STATUS_PACKET_LEN: usize = 18;

/// Sent in place of the temperature while the sensor is faulted.
pub const INVALID_TEMPERATURE: i16 = i16::MIN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UiCommand {
    pub setpoint_c_x10: u16,
    pub enable: bool,
    pub seq: u32,
}

impl UiCommand {
    pub fn setpoint_f(&self) -> f32 {
        celsius_to_fahrenheit(self.setpoint_c_x10 as f32 / 10.0)
    }

    pub fn into_command(self) -> Command {
        Command {
            setpoint: Some(self.setpoint_f()),
            enable: Some(self.enable),
            source: CommandSource::UiLink,
        }
    }

    /// Applies the command and records its sequence number for the echo.
    pub fn apply(self, state: &ControllerState, now: Instant, memlog: SharedLogger) -> CommandReport {
        state.store_last_command_seq(self.seq);

        let previous_setpoint = state.setpoint();
        let previous_enable = state.heater_enabled();
        let report = state.apply_command(self.into_command(), now);

        // The board repeats its full state with every packet; only log changes.
        let setpoint_changed = report
            .setpoint_accepted()
            .is_some_and(|setpoint| setpoint != previous_setpoint);
        if setpoint_changed || previous_enable != self.enable || report.setpoint_accepted().is_none() {
            report.log(memlog, CommandSource::UiLink);
        }
        report
    }

    fn parse(packet: &[u8; COMMAND_PACKET_LEN]) -> Self {
        UiCommand {
            setpoint_c_x10: u16::from_le_bytes([packet[4], packet[5]]),
            enable: packet[6] != 0,
            // packet[7] is reserved.
            seq: u32::from_le_bytes([packet[8], packet[9], packet[10], packet[11]]),
        }
    }
}

/// Reassembles command packets from the UART byte stream.
#[derive(Default)]
pub struct UiLinkDecoder {
    buffer: ArrayVec<u8, COMMAND_PACKET_LEN>,
}

impl UiLinkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<UiCommand> {
        if self.buffer.try_push(byte).is_err() {
            self.buffer.clear();
            return None;
        }

        // Slide forward one byte at a time until the buffer starts with a
        // (possibly partial) magic.
        while !self.starts_with_magic() {
            self.buffer.remove(0);
        }

        let packet: &[u8; COMMAND_PACKET_LEN] = self.buffer.as_slice().try_into().ok()?;
        let command = UiCommand::parse(packet);
        self.buffer.clear();
        Some(command)
    }

    fn starts_with_magic(&self) -> bool {
        let magic = COMMAND_MAGIC.to_le_bytes();
        let len = self.buffer.len().min(magic.len());
        self.buffer[..len] == magic[..len]
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

pub fn encode_command_packet(command: &UiCommand) -> [u8; COMMAND_PACKET_LEN] {
    let mut packet = [0u8; COMMAND_PACKET_LEN];
    packet[0..4].copy_from_slice(&COMMAND_MAGIC.to_le_bytes());
    packet[4..6].copy_from_slice(&command.setpoint_c_x10.to_le_bytes());
    packet[6] = command.enable as u8;
    packet[8..12].copy_from_slice(&command.seq.to_le_bytes());
    packet
}

pub fn encode_status_packet(
    snapshot: &StatusSnapshot,
    uptime_s: u32,
    seq_echo: u32,
) -> [u8; STATUS_PACKET_LEN] {
    let temperature = match snapshot.temperature {
        // Keep a real reading from colliding with the invalid marker.
        Some(fahrenheit) => tenths(fahrenheit_to_celsius(fahrenheit)).max(INVALID_TEMPERATURE as i32 + 1),
        None => INVALID_TEMPERATURE as i32,
    } as i16;
    let setpoint = tenths(fahrenheit_to_celsius(snapshot.setpoint)).clamp(0, u16::MAX as i32) as u16;

    let mut packet = [0u8; STATUS_PACKET_LEN];
    packet[0..4].copy_from_slice(&STATUS_MAGIC.to_le_bytes());
    packet[4..6].copy_from_slice(&temperature.to_le_bytes());
    packet[6..8].copy_from_slice(&setpoint.to_le_bytes());
    packet[8] = snapshot.relay_on as u8;
    packet[9] = snapshot.fault.code();
    packet[10..14].copy_from_slice(&uptime_s.to_le_bytes());
    packet[14..18].copy_from_slice(&seq_echo.to_le_bytes());
    packet
}

// Rounds to the nearest tenth, saturating to the i16 range.
fn tenths(value: f32) -> i32 {
    let scaled = value * 10.0;
    let rounded = if scaled < 0.0 { scaled - 0.5 } else { scaled + 0.5 };
    (rounded as i32).clamp(i16::MIN as i32, i16::MAX as i32)
}
