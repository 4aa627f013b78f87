use alloc::format;
use embassy_futures::select;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::{Async, gpio, uart};
use oil_heater_core::{
    build_status_snapshot,
    config::UI_STATUS_INTERVAL,
    memlog::SharedLogger,
    state::SharedState,
    uilink::{UiLinkDecoder, encode_status_packet},
};

// Uart::write_async doesn't guarantee it will send everything.
trait UartWriteAllAsync {
    async fn write_all_async(&mut self, data: &[u8]) -> Result<(), uart::TxError>;
}
impl UartWriteAllAsync for uart::Uart<'_, Async> {
    async fn write_all_async(&mut self, mut data: &[u8]) -> Result<(), uart::TxError> {
        while !data.is_empty() {
            let bytes_written = self.write_async(data).await?;
            data = &data[bytes_written..];
        }
        Ok(())
    }
}

/// Exchanges packets with the display board: commands in, status out.
#[embassy_executor::task]
pub async fn ui_link(
    peripheral_uart: uart::AnyUart<'static>,
    pin_uart_rx: gpio::AnyPin<'static>,
    pin_uart_tx: gpio::AnyPin<'static>,
    state: SharedState,
    memlog: SharedLogger,
) {
    // 115200 8N1.
    let mut uart = uart::Uart::new(peripheral_uart, uart::Config::default())
        .unwrap()
        .with_tx(pin_uart_tx)
        .with_rx(pin_uart_rx)
        .into_async();

    let mut decoder = UiLinkDecoder::new();
    let mut board_seen = false;

    loop {
        // Try block to catch UART errors.
        let catch: Result<(), uart::TxError> = async {
            let mut next_status = Instant::now();
            let mut buf = [0u8; 32];

            loop {
                match select::select(uart.read_async(&mut buf), Timer::at(next_status)).await {
                    select::Either::First(Ok(bytes_read)) => {
                        for &byte in &buf[..bytes_read] {
                            let Some(command) = decoder.push(byte) else {
                                continue;
                            };
                            if !board_seen {
                                board_seen = true;
                                memlog.info("ui link: display board connected");
                            }
                            command.apply(state, Instant::now(), memlog);
                        }
                    }
                    select::Either::First(Err(rx_error)) => {
                        memlog.warn(format!("ui link rx error: {rx_error:?}"));
                    }
                    select::Either::Second(()) => {
                        let snapshot = build_status_snapshot(state);
                        let uptime_s = Instant::now().as_secs() as u32;
                        let packet =
                            encode_status_packet(&snapshot, uptime_s, state.last_command_seq());
                        uart.write_all_async(&packet).await?;
                        // From now, not from the missed deadline: a stalled write
                        // must not be followed by a burst.
                        next_status = Instant::now() + UI_STATUS_INTERVAL;
                    }
                }
            }
        }
        .await;

        if let Err(tx_error) = catch {
            memlog.warn(format!("ui link tx error: {tx_error}"));
        }

        // Pause before trying the UART again after an error.
        Timer::after(Duration::from_secs(1)).await;
    } // loop
}
