use alloc::format;
use embassy_time::{Delay, Instant, Ticker};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::{Blocking, gpio, spi};
use oil_heater_core::{
    ControlLoop, ThermostatMode, acquisition::Max6675, config::CONTROL_TICK_INTERVAL,
    memlog::SharedLogger,
};

pub type ThermocoupleSpi = ExclusiveDevice<spi::master::Spi<'static, Blocking>, gpio::Output<'static>, Delay>;
pub type HeaterControl = ControlLoop<Max6675<ThermocoupleSpi>, gpio::Output<'static>>;

/// Runs the thermostat on a fixed cadence. This task owns the sensor and the relay.
#[embassy_executor::task]
pub async fn control_loop(mut control: HeaterControl, memlog: SharedLogger) {
    let mut ticker = Ticker::every(CONTROL_TICK_INTERVAL);
    let mut last_mode = ThermostatMode::IdleOff;

    loop {
        let report = control.tick(Instant::now());

        if report.mode != last_mode {
            memlog.debug(format!("mode {:?} -> {:?}", last_mode, report.mode));
            last_mode = report.mode;
        }

        ticker.next().await;
    }
}
