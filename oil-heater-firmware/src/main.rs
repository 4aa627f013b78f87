#![no_std]
#![no_main]
#![feature(impl_trait_in_assoc_type)]

use alloc::boxed::Box;
use bt_hci::controller::ExternalController;
use embassy_executor::{SpawnError, Spawner};
use embassy_time::{Delay, Instant};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio;
use esp_hal::spi;
use esp_hal::time::Rate;
use esp_hal::timer::systimer::SystemTimer;
use esp_hal::timer::timg::TimerGroup;
use esp_wifi::ble::controller::BleConnector;
use oil_heater_core::{
    ControlLoop,
    acquisition::Max6675,
    config::{
        BLE_DEVICE_NAME, CALIBRATION, MEMLOG_CAPACITY, MEMLOG_PRINT_LEVEL, RELAY_ACTIVE_HIGH,
    },
    memlog::{self, Record},
    relay::Relay,
    state,
};

extern crate alloc;

mod task;

const MOTD: &str = const_format::formatcp!(
    "{} {} ({})",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION"),
    BLE_DEVICE_NAME
);

// The MAX6675 tops out at 4.3MHz.
const THERMOCOUPLE_SPI_RATE_KHZ: u32 = 1000;

fn print_record(record: &Record) {
    esp_println::println!("{record}");
}

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::_160MHz);
    let peripherals = esp_hal::init(config);
    esp_alloc::heap_allocator!(size: 72 * 1024);
    let timer0 = SystemTimer::new(peripherals.SYSTIMER);
    esp_hal_embassy::init(timer0.alarm0);
    let rng = esp_hal::rng::Rng::new(peripherals.RNG);
    let timer1 = TimerGroup::new(peripherals.TIMG0);

    //
    // M5Stamp-S3 pinout
    //
    // Unused pins, taken here so they aren't used accidentally.
    let _pin0_unused = peripherals.GPIO0;
    let _pin3_unused = peripherals.GPIO3;
    // G1 drives the heater relay through a MOSFET. Starts de-energized.
    let output_5ma = gpio::OutputConfig::default()
        .with_drive_strength(gpio::DriveStrength::_5mA)
        .with_drive_mode(gpio::DriveMode::PushPull)
        .with_pull(gpio::Pull::None);
    let relay_idle = if RELAY_ACTIVE_HIGH {
        gpio::Level::Low
    } else {
        gpio::Level::High
    };
    let pin_relay = gpio::Output::new(peripherals.GPIO1, relay_idle, output_5ma);
    // G5, G7 and G9 are the MAX6675 SPI bus: SO, SCK and CS.
    let pin_thermo_so = peripherals.GPIO5;
    let pin_thermo_sck = peripherals.GPIO7;
    let pin_thermo_cs = gpio::Output::new(peripherals.GPIO9, gpio::Level::High, output_5ma);
    // UART pins, to the display board.
    let pin_uart_tx = peripherals.GPIO43;
    let pin_uart_rx = peripherals.GPIO44;

    // Initialize an in-memory logger, echoed to the JTAG console.
    let memlog = memlog::init(MEMLOG_CAPACITY);
    memlog.enable_print(print_record);
    memlog.set_print_level(MEMLOG_PRINT_LEVEL);
    memlog.info(MOTD);
    memlog.info(CALIBRATION.describe());

    // Shared controller state. The heater starts disabled.
    let state = state::init(Instant::now());

    // Thermocouple on SPI2. The MAX6675 only ever talks, so MOSI stays unassigned.
    let spi_config = spi::master::Config::default()
        .with_frequency(Rate::from_khz(THERMOCOUPLE_SPI_RATE_KHZ))
        .with_mode(spi::Mode::_0);
    let spi_bus = spi::master::Spi::new(peripherals.SPI2, spi_config)
        .unwrap()
        .with_sck(pin_thermo_sck)
        .with_miso(pin_thermo_so);
    let thermocouple_spi = ExclusiveDevice::new(spi_bus, pin_thermo_cs, Delay).unwrap();

    let relay = Relay::new(pin_relay, RELAY_ACTIVE_HIGH);
    let control = ControlLoop::new(
        Max6675::new(thermocouple_spi),
        CALIBRATION,
        relay,
        state,
        memlog,
    );

    // Set up the radio for BLE.
    let radio = Box::leak(Box::new(
        esp_wifi::init(timer1.timer0, rng, peripherals.RADIO_CLK).unwrap(),
    ));
    let ble_connector = BleConnector::new(radio, peripherals.BT);
    let ble_controller = ExternalController::new(ble_connector);

    //
    // Spawn tasks.
    || -> Result<(), SpawnError> {
        // Run the thermostat. Sole owner of the sensor and the relay.
        spawner.spawn(task::control_loop(control, memlog))?;

        // Serve the BLE peripheral.
        spawner.spawn(task::ble_peripheral(ble_controller, state, memlog))?;

        // Talk to the display board on UART1.
        spawner.spawn(task::ui_link(
            peripherals.UART1.into(),
            pin_uart_rx.into(),
            pin_uart_tx.into(),
            state,
            memlog,
        ))?;

        Ok(())
    }()
    .unwrap();
}
