//! Command intake: the single entry point for setpoint and enable changes.

use alloc::format;
use embassy_time::Instant;
use thiserror::Error;

use crate::{
    config::{MAX_SETPOINT_F, MIN_SETPOINT_F},
    memlog::SharedLogger,
    safety::releases_overtemp,
    state::ControllerState,
};

/// Where a command came from. Sources differ in how out-of-range setpoints
/// are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSource {
    /// A GATT characteristic write. Out-of-range setpoints are rejected.
    Ble,
    /// The wired display board. Out-of-range setpoints are clamped, as the
    /// board steps the setpoint and expects it to saturate at the limits.
    UiLink,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub setpoint: Option<f32>,
    pub enable: Option<bool>,
    pub source: CommandSource,
}

impl Command {
    pub fn setpoint(setpoint: f32, source: CommandSource) -> Self {
        Command {
            setpoint: Some(setpoint),
            enable: None,
            source,
        }
    }

    pub fn enable(enable: bool, source: CommandSource) -> Self {
        Command {
            setpoint: None,
            enable: Some(enable),
            source,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum CommandError {
    #[error("setpoint is not a number")]
    NotANumber,
    #[error("setpoint {value:.1}F outside the {min:.1}F to {max:.1}F range")]
    OutOfRange { value: f32, min: f32, max: f32 },
}

/// What a command changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CommandReport {
    /// The stored setpoint, or why the requested one was refused.
    pub setpoint: Option<Result<f32, CommandError>>,
    pub enable: Option<bool>,
}

impl CommandReport {
    pub fn setpoint_accepted(&self) -> Option<f32> {
        match self.setpoint {
            Some(Ok(setpoint)) => Some(setpoint),
            _ => None,
        }
    }

    pub fn log(&self, memlog: SharedLogger, source: CommandSource) {
        match self.setpoint {
            Some(Ok(setpoint)) => memlog.info(format!("{source:?}: setpoint {setpoint:.1}F")),
            Some(Err(error)) => memlog.warn(format!("{source:?}: setpoint refused, {error}")),
            None => (),
        }
        if let Some(enable) = self.enable {
            memlog.info(format!("{source:?}: heater enable {enable}"));
        }
    }
}

/// Limits a setpoint to the configured range.
pub fn clamp_setpoint(setpoint: f32) -> f32 {
    setpoint.clamp(MIN_SETPOINT_F, MAX_SETPOINT_F)
}

fn validate_setpoint(setpoint: f32, source: CommandSource) -> Result<f32, CommandError> {
    if setpoint.is_nan() {
        return Err(CommandError::NotANumber);
    }

    let in_range = (MIN_SETPOINT_F..=MAX_SETPOINT_F).contains(&setpoint);
    match source {
        _ if in_range => Ok(setpoint),
        CommandSource::UiLink if setpoint.is_finite() => Ok(clamp_setpoint(setpoint)),
        _ => Err(CommandError::OutOfRange {
            value: setpoint,
            min: MIN_SETPOINT_F,
            max: MAX_SETPOINT_F,
        }),
    }
}

impl ControllerState {
    /// Applies an external command.
    ///
    /// Every field is written on its own, so this can run concurrently with
    /// the control loop. Any command refreshes the command watchdog, even one
    /// whose setpoint is refused.
    pub fn apply_command(&self, command: Command, now: Instant) -> CommandReport {
        let setpoint = command.setpoint.map(|requested| {
            let accepted = validate_setpoint(requested, command.source)?;
            self.store_setpoint(clamp_setpoint(accepted));
            self.store_overtemp_reset_armed(releases_overtemp(accepted));
            Ok(accepted)
        });

        if let Some(enable) = command.enable {
            self.store_heater_enabled(enable);
        }

        self.store_last_command(now);

        CommandReport {
            setpoint,
            enable: command.enable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DEFAULT_SETPOINT_F, memlog, memlog::Level};

    const T0: Instant = Instant::from_millis(0);
    const T1: Instant = Instant::from_millis(2_000);

    #[test]
    fn clamp_is_idempotent() {
        for value in [
            f32::NEG_INFINITY,
            -40.0,
            MIN_SETPOINT_F,
            180.0,
            MAX_SETPOINT_F,
            999.0,
            f32::INFINITY,
        ] {
            let once = clamp_setpoint(value);
            assert_eq!(clamp_setpoint(once), once);
            assert!((MIN_SETPOINT_F..=MAX_SETPOINT_F).contains(&once));
        }
    }

    #[test]
    fn in_range_setpoint_is_stored() {
        let state = ControllerState::new(T0);
        let report = state.apply_command(Command::setpoint(200.0, CommandSource::Ble), T1);

        assert_eq!(report.setpoint, Some(Ok(200.0)));
        assert_eq!(state.setpoint(), 200.0);
        assert_eq!(state.last_command(), T1);

        // Applying it again changes nothing.
        let again = state.apply_command(Command::setpoint(200.0, CommandSource::Ble), T1);
        assert_eq!(again, report);
        assert_eq!(state.setpoint(), 200.0);
    }

    #[test]
    fn ble_rejects_out_of_range_but_refreshes_watchdog() {
        let state = ControllerState::new(T0);
        let report = state.apply_command(Command::setpoint(999.0, CommandSource::Ble), T1);

        assert!(matches!(
            report.setpoint,
            Some(Err(CommandError::OutOfRange { value, .. })) if value == 999.0
        ));
        assert_eq!(report.setpoint_accepted(), None);
        assert_eq!(state.setpoint(), DEFAULT_SETPOINT_F);
        assert_eq!(state.last_command(), T1);
    }

    #[test]
    fn ui_link_clamps_out_of_range() {
        let state = ControllerState::new(T0);

        let high = state.apply_command(Command::setpoint(350.0, CommandSource::UiLink), T1);
        assert_eq!(high.setpoint, Some(Ok(MAX_SETPOINT_F)));
        assert_eq!(state.setpoint(), MAX_SETPOINT_F);

        let low = state.apply_command(Command::setpoint(-10.0, CommandSource::UiLink), T1);
        assert_eq!(low.setpoint, Some(Ok(MIN_SETPOINT_F)));
        assert_eq!(state.setpoint(), MIN_SETPOINT_F);
    }

    #[test]
    fn garbage_is_never_clamped() {
        let state = ControllerState::new(T0);

        for source in [CommandSource::Ble, CommandSource::UiLink] {
            let report = state.apply_command(Command::setpoint(f32::NAN, source), T1);
            assert_eq!(report.setpoint, Some(Err(CommandError::NotANumber)));

            let report = state.apply_command(Command::setpoint(f32::INFINITY, source), T1);
            assert!(matches!(report.setpoint, Some(Err(CommandError::OutOfRange { .. }))));
        }
        assert_eq!(state.setpoint(), DEFAULT_SETPOINT_F);
    }

    #[test]
    fn refused_setpoint_does_not_block_enable() {
        let state = ControllerState::new(T0);
        let command = Command {
            setpoint: Some(f32::NAN),
            enable: Some(true),
            source: CommandSource::Ble,
        };
        let report = state.apply_command(command, T1);

        assert_eq!(report.enable, Some(true));
        assert!(state.heater_enabled());
        assert_eq!(state.setpoint(), DEFAULT_SETPOINT_F);
    }

    #[test]
    fn enable_is_stored_verbatim() {
        let state = ControllerState::new(T0);

        state.apply_command(Command::enable(true, CommandSource::Ble), T1);
        assert!(state.heater_enabled());
        state.apply_command(Command::enable(false, CommandSource::UiLink), T1);
        assert!(!state.heater_enabled());
    }

    #[test]
    fn setpoint_arms_overtemp_reset_only_below_margin() {
        let state = ControllerState::new(T0);

        state.apply_command(Command::setpoint(200.0, CommandSource::Ble), T1);
        assert!(state.overtemp_reset_armed());

        state.apply_command(Command::setpoint(280.0, CommandSource::Ble), T1);
        assert!(!state.overtemp_reset_armed());

        // Enable-only commands leave the request alone.
        state.apply_command(Command::setpoint(150.0, CommandSource::Ble), T1);
        state.apply_command(Command::enable(true, CommandSource::Ble), T1);
        assert!(state.overtemp_reset_armed());
    }

    #[test]
    fn report_logs_refusals() {
        let memlog = memlog::init(200);
        let state = ControllerState::new(T0);

        let report = state.apply_command(Command::setpoint(999.0, CommandSource::Ble), T1);
        report.log(memlog, CommandSource::Ble);

        assert!(memlog.contains(Level::Warn, "setpoint refused"));
    }
}
