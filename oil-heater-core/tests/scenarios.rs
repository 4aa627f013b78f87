//! End-to-end control scenarios, driven through the public API with a fake
//! thermocouple and relay pin.

use core::convert::Infallible;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorType, OutputPin};
use oil_heater_core::{
    Command, CommandSource, ControlLoop, FaultCode, StatusPublisher, Thermostat, ThermostatMode,
    acquisition::{Calibration, Thermocouple},
    ble::{self, Characteristic, WriteOutcome},
    build_status_snapshot,
    config::{
        CMD_TIMEOUT, CONTROL_TICK_INTERVAL, DEFAULT_SETPOINT_F, HYSTERESIS_F, MAX_SETPOINT_F,
        OVERTEMP_RESET_MARGIN_F, RELAY_MIN_CYCLE_TIME, SAFETY_MAX_TEMP_F,
    },
    memlog::{self, Level, SharedLogger},
    relay::Relay,
    state::{self, SharedState},
    uilink::{self, UiCommand, UiLinkDecoder},
};

/// Serves one frame per read. `None` makes the transfer fail.
struct FakeThermocouple {
    frame: Option<u16>,
}

impl FakeThermocouple {
    fn reading_f(fahrenheit: f32) -> Self {
        let mut sensor = FakeThermocouple { frame: None };
        sensor.set_f(fahrenheit);
        sensor
    }

    fn set_f(&mut self, fahrenheit: f32) {
        let celsius = (fahrenheit - 32.0) * 5.0 / 9.0;
        self.frame = Some(((celsius / 0.25) as u16) << 3);
    }

    fn open(&mut self) {
        // D2 set: thermocouple input open.
        self.frame = Some(0b100);
    }
}

impl Thermocouple for FakeThermocouple {
    type Error = ();

    fn read_frame(&mut self) -> Result<u16, ()> {
        self.frame.ok_or(())
    }
}

#[derive(Default)]
struct FakePin {
    high: bool,
}

impl ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high = true;
        Ok(())
    }
}

fn setup() -> (SharedState, SharedLogger) {
    (state::init(Instant::from_millis(0)), memlog::init(2000))
}

fn control_loop(
    sensor: FakeThermocouple,
    state: SharedState,
    memlog: SharedLogger,
) -> ControlLoop<FakeThermocouple, FakePin> {
    let relay = Relay::new(FakePin::default(), true);
    ControlLoop::new(sensor, Calibration::None, relay, state, memlog)
}

fn enable(state: SharedState, setpoint: f32, now: Instant) {
    state.apply_command(
        Command {
            setpoint: Some(setpoint),
            enable: Some(true),
            source: CommandSource::Ble,
        },
        now,
    );
}

fn tick_instants() -> impl Iterator<Item = Instant> {
    (0..).map(|tick| Instant::from_millis(0) + CONTROL_TICK_INTERVAL * tick)
}

// Deterministic pseudo-random temperatures around the setpoint.
struct Lcg(u32);

impl Lcg {
    fn next_in(&mut self, low: f32, high: f32) -> f32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        low + (self.0 >> 8) as f32 / (1u32 << 24) as f32 * (high - low)
    }
}

#[test]
fn cold_start_heats_on_first_tick() {
    let (state, memlog) = setup();
    let mut control = control_loop(FakeThermocouple::reading_f(150.0), state, memlog);
    enable(state, 180.0, Instant::from_millis(0));

    let report = control.tick(Instant::from_millis(0));

    assert!(report.relay_on);
    assert_eq!(report.mode, ThermostatMode::RunningHeating);
    assert!(control.relay().is_on());
    assert!(state.relay_on());
    assert!(memlog.contains(Level::Info, "relay on"));
}

#[test]
fn hysteresis_only_switches_outside_the_band() {
    let (state, memlog) = setup();
    let mut thermostat = Thermostat::new(state, memlog);
    let mut rng = Lcg(7);
    let setpoint = 180.0;

    for now in tick_instants().take(2000) {
        enable(state, setpoint, now);
        let was_on = state.relay_on();
        let reading = rng.next_in(setpoint - 4.0, setpoint + 4.0);
        let report = thermostat.tick(Some(reading), now);

        if report.relay_changed {
            if report.relay_on {
                assert!(!was_on && reading <= setpoint - HYSTERESIS_F);
            } else {
                assert!(was_on && reading >= setpoint + HYSTERESIS_F);
            }
        }
    }
}

#[test]
fn faults_always_force_relay_off() {
    let (state, memlog) = setup();
    let mut thermostat = Thermostat::new(state, memlog);
    let mut rng = Lcg(11);

    for (tick, now) in tick_instants().take(2000).enumerate() {
        // Commands stop now and then, long enough to trip the watchdog.
        if (tick / 40) % 3 != 2 {
            enable(state, 150.0, now);
        }
        let reading = match tick % 17 {
            0 => None,
            _ => Some(rng.next_in(100.0, 320.0)),
        };
        let report = thermostat.tick(reading, now);

        if report.fault.is_active() {
            assert!(!report.relay_on, "relay on with {:?} at tick {tick}", report.fault);
            assert!(!state.relay_on());
            assert!(!state.heater_enabled());
            assert_eq!(report.mode, ThermostatMode::Faulted);
        }
    }
}

#[test]
fn non_fault_transitions_respect_min_cycle_time() {
    let (state, memlog) = setup();
    let mut thermostat = Thermostat::new(state, memlog);
    let mut rng = Lcg(3);
    let mut last_change: Option<Instant> = None;

    for now in tick_instants().take(4000) {
        enable(state, 180.0, now);
        let report = thermostat.tick(Some(rng.next_in(170.0, 190.0)), now);

        if report.relay_changed {
            if let Some(previous) = last_change {
                assert!(now - previous >= RELAY_MIN_CYCLE_TIME);
            }
            last_change = Some(now);
        }
    }
    assert!(last_change.is_some());
}

#[test]
fn setpoint_clamp_and_idempotence() {
    let (state, _memlog) = setup();
    let now = Instant::from_millis(100);

    let first = state.apply_command(Command::setpoint(400.0, CommandSource::UiLink), now);
    let second = state.apply_command(Command::setpoint(400.0, CommandSource::UiLink), now);
    assert_eq!(first, second);
    assert_eq!(state.setpoint(), MAX_SETPOINT_F);
}

#[test]
fn watchdog_trips_one_millisecond_after_timeout() {
    let (state, memlog) = setup();
    let mut control = control_loop(FakeThermocouple::reading_f(150.0), state, memlog);
    enable(state, 180.0, Instant::from_millis(0));
    control.tick(Instant::from_millis(0));

    let report = control.tick(Instant::from_millis(0) + CMD_TIMEOUT + Duration::from_millis(1));

    assert_eq!(report.fault, FaultCode::CommTimeout);
    assert!(!state.heater_enabled());
    assert!(!control.relay().is_on());
    assert!(memlog.contains(Level::Warn, "command timeout"));
}

#[test]
fn overtemp_shutdown_ignores_min_cycle_guard() {
    let (state, memlog) = setup();
    let mut thermostat = Thermostat::new(state, memlog);
    enable(state, 250.0, Instant::from_millis(0));
    thermostat.tick(Some(200.0), Instant::from_millis(0));
    assert!(state.relay_on());

    let now = Instant::from_millis(250);
    let report = thermostat.tick(Some(SAFETY_MAX_TEMP_F), now);

    assert_eq!(report.fault, FaultCode::OverTemperature);
    assert!(!report.relay_on);
    assert_eq!(state.last_relay_change(), Some(now));
    assert!(memlog.contains(Level::Error, "over-temperature shutdown"));
}

#[test]
fn rejected_ble_setpoint_keeps_characteristic() {
    let (state, memlog) = setup();
    let now = Instant::from_millis(1200);

    let outcome = ble::handle_write(state, Characteristic::Setpoint, b"999", now, memlog);

    assert!(matches!(outcome, Ok(WriteOutcome::SetpointRejected(_))));
    assert_eq!(state.setpoint(), DEFAULT_SETPOINT_F);
    assert_eq!(state.last_command(), now);

    // Nothing new to notify.
    let mut publisher = StatusPublisher::new();
    publisher.poll(&build_status_snapshot(state), Instant::from_millis(0));
    assert!(!publisher.poll(&build_status_snapshot(state), now).setpoint);
    assert_eq!(
        ble::encode_setpoint(state.setpoint()).unwrap().as_str(),
        "180.0"
    );
}

#[test]
fn sensor_disconnect_and_recovery() {
    let (state, memlog) = setup();
    let mut control = control_loop(FakeThermocouple::reading_f(150.0), state, memlog);
    let mut ticks = tick_instants();

    let now = ticks.next().unwrap();
    enable(state, 180.0, now);
    assert_eq!(control.tick(now).fault, FaultCode::None);

    control.sensor_mut().open();
    for _ in 0..2 {
        let now = ticks.next().unwrap();
        let report = control.tick(now);
        assert_eq!(report.fault, FaultCode::SensorOpen);
        assert!(!report.relay_on);
    }
    assert!(!memlog.contains(Level::Warn, "thermocouple read failed"));

    // A failed transfer reads as an open sensor but is logged as a bus error.
    control.sensor_mut().frame = None;
    for _ in 0..2 {
        let report = control.tick(ticks.next().unwrap());
        assert_eq!(report.fault, FaultCode::SensorOpen);
    }
    assert_eq!(state.temperature(), None);
    let failures = memlog
        .records()
        .iter()
        .filter(|record| record.text.contains("thermocouple read failed"))
        .count();
    assert_eq!(failures, 1);

    control.sensor_mut().set_f(150.0);
    let now = ticks.next().unwrap();
    let report = control.tick(now);
    assert_eq!(report.fault, FaultCode::None);
    assert_eq!(state.fault(), FaultCode::None);
    assert!(state.temperature().is_some());
    // The fault cleared the enable flag; the heater waits for the operator.
    assert_eq!(report.mode, ThermostatMode::IdleOff);
    assert!(memlog.contains(Level::Info, "fault cleared"));
    assert!(memlog.contains(Level::Info, "thermocouple read recovered"));
}

#[test]
fn overtemp_latch_waits_for_safe_setpoint() {
    let (state, memlog) = setup();
    let mut control = control_loop(FakeThermocouple::reading_f(310.0), state, memlog);
    let mut ticks = tick_instants();

    let now = ticks.next().unwrap();
    enable(state, 250.0, now);
    assert_eq!(control.tick(now).fault, FaultCode::OverTemperature);

    // Cooled down, still talking, but no new setpoint: stays latched.
    control.sensor_mut().set_f(200.0);
    for _ in 0..12 {
        let now = ticks.next().unwrap();
        state.apply_command(Command::enable(true, CommandSource::Ble), now);
        let report = control.tick(now);
        assert_eq!(report.fault, FaultCode::OverTemperature);
        assert!(!report.relay_on);
    }

    let unsafe_setpoint = SAFETY_MAX_TEMP_F - OVERTEMP_RESET_MARGIN_F;
    let now = ticks.next().unwrap();
    state.apply_command(Command::setpoint(unsafe_setpoint, CommandSource::Ble), now);
    assert_eq!(control.tick(now).fault, FaultCode::OverTemperature);

    let now = ticks.next().unwrap();
    state.apply_command(Command::setpoint(220.0, CommandSource::Ble), now);
    assert_eq!(control.tick(now).fault, FaultCode::None);
    assert!(memlog.contains(Level::Info, "shutdown released"));
}

#[test]
fn ui_link_commands_survive_line_noise() {
    let (state, memlog) = setup();
    let mut decoder = UiLinkDecoder::new();
    let packet = uilink::encode_command_packet(&UiCommand {
        setpoint_c_x10: 850,
        enable: true,
        seq: 17,
    });

    let mut stream = vec![0xde, 0xad, 0x31, 0x43, 0x49, 0x00, 0x31];
    stream.extend_from_slice(&packet);

    let now = Instant::from_millis(750);
    let commands: Vec<UiCommand> = stream.iter().filter_map(|&byte| decoder.push(byte)).collect();
    assert_eq!(commands.len(), 1);
    commands[0].apply(state, now, memlog);

    assert_eq!(state.setpoint(), 185.0);
    assert!(state.heater_enabled());
    assert_eq!(state.last_command_seq(), 17);

    let status = uilink::encode_status_packet(&build_status_snapshot(state), 1, 17);
    assert_eq!(u32::from_le_bytes([status[14], status[15], status[16], status[17]]), 17);
}
