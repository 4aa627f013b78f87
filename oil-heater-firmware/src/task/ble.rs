use alloc::format;
use bt_hci::controller::ExternalController;
use embassy_futures::{join::join, select::select};
use embassy_time::{Instant, Timer};
use esp_wifi::ble::controller::BleConnector;
use oil_heater_core::{
    StatusPublisher, StatusSnapshot, build_status_snapshot,
    ble::{self, Characteristic, WriteOutcome},
    config::{BLE_DEVICE_NAME, STATUS_PUBLISH_INTERVAL},
    memlog::SharedLogger,
    state::SharedState,
};
use trouble_host::prelude::*;

pub type BleController = ExternalController<BleConnector<'static>, 20>;

const CONNECTIONS_MAX: usize = 1;
// Signal + ATT.
const L2CAP_CHANNELS_MAX: usize = 2;

// Random static address: the two most significant bits are set.
const BLE_ADDRESS: [u8; 6] = [0x4f, 0x48, 0x45, 0x41, 0x54, 0xff];

type TextValue = heapless::Vec<u8, 16>;
type StatusValue = heapless::Vec<u8, { ble::MAX_PAYLOAD_LEN }>;

#[gatt_server]
struct HeaterServer {
    heater: HeaterService,
}

#[gatt_service(uuid = "4fafc201-0001-459e-8fcc-c5c9c331914b")]
struct HeaterService {
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26a8", read, notify)]
    temperature: TextValue,
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26a9", read, write, notify)]
    setpoint: TextValue,
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26aa", read, notify)]
    status: StatusValue,
    #[characteristic(uuid = "beb5483e-36e1-4688-b7f5-ea07361b26ab", read, write)]
    enable: TextValue,
}

/// Runs the GATT peripheral: advertise, serve one observer at a time, repeat.
#[embassy_executor::task]
pub async fn ble_peripheral(controller: BleController, state: SharedState, memlog: SharedLogger) {
    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();
    let stack = trouble_host::new(controller, &mut resources)
        .set_random_address(Address::random(BLE_ADDRESS));
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let server = match HeaterServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: BLE_DEVICE_NAME,
        appearance: &appearance::power_device::GENERIC_POWER_DEVICE,
    })) {
        Ok(server) => server,
        Err(error) => {
            memlog.error(format!("ble: gatt server setup failed, {error:?}"));
            return;
        }
    };

    let mut publisher = StatusPublisher::new();

    let host = async {
        loop {
            if let Err(error) = runner.run().await {
                memlog.error(format!("ble: host error, {error:?}"));
                Timer::after_secs(1).await;
            }
        }
    };

    let service = async {
        loop {
            refresh_values(&server, &build_status_snapshot(state), memlog);

            let conn = match advertise(&mut peripheral, &server).await {
                Ok(conn) => conn,
                Err(error) => {
                    memlog.warn(format!("ble: advertising failed, {error:?}"));
                    Timer::after_secs(1).await;
                    continue;
                }
            };

            publisher.reset();
            memlog.info("ble: observer connected");

            select(
                gatt_events(&server, &conn, state, memlog),
                notifier(&server, &conn, &mut publisher, state, memlog),
            )
            .await;

            memlog.info("ble: observer disconnected");
        }
    };

    join(host, service).await;
}

async fn advertise<'values, 'server, C: Controller>(
    peripheral: &mut Peripheral<'values, C, DefaultPacketPool>,
    server: &'server HeaterServer<'values>,
) -> Result<GattConnection<'values, 'server, DefaultPacketPool>, BleHostError<C::Error>> {
    let mut advertiser_data = [0; 31];
    let len = AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::CompleteLocalName(BLE_DEVICE_NAME.as_bytes()),
        ],
        &mut advertiser_data[..],
    )?;

    // The 128-bit service UUID does not fit next to the name, send it in the scan response.
    let mut scan_data = [0; 31];
    let scan_len = AdStructure::encode_slice(
        &[AdStructure::ServiceUuids128(&[uuid_bytes(ble::SERVICE_UUID)])],
        &mut scan_data[..],
    )?;

    let advertiser = peripheral
        .advertise(
            &Default::default(),
            Advertisement::ConnectableScannableUndirected {
                adv_data: &advertiser_data[..len],
                scan_data: &scan_data[..scan_len],
            },
        )
        .await?;
    let conn = advertiser.accept().await?.with_attribute_server(server)?;

    Ok(conn)
}

// Parses a UUID string into the little-endian byte order used on air.
fn uuid_bytes(text: &str) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    let digits = text.bytes().filter_map(|c| (c as char).to_digit(16));
    for (index, digit) in digits.enumerate().take(32) {
        let byte = 15 - index / 2;
        bytes[byte] |= (digit as u8) << if index % 2 == 0 { 4 } else { 0 };
    }
    bytes
}

/// Handles writes until the observer disconnects.
async fn gatt_events<P: PacketPool>(
    server: &HeaterServer<'_>,
    conn: &GattConnection<'_, '_, P>,
    state: SharedState,
    memlog: SharedLogger,
) {
    let service = &server.heater;

    loop {
        match conn.next().await {
            GattConnectionEvent::Disconnected { .. } => break,
            GattConnectionEvent::Gatt { event } => {
                let written = match &event {
                    GattEvent::Write(write) if write.handle() == service.setpoint.handle => Some(
                        write_accepted(Characteristic::Setpoint, write.data(), state, memlog),
                    ),
                    GattEvent::Write(write) if write.handle() == service.enable.handle => Some(
                        write_accepted(Characteristic::Enable, write.data(), state, memlog),
                    ),
                    _ => None,
                };

                let reply = match written {
                    Some(false) => event.reject(AttErrorCode::VALUE_NOT_ALLOWED),
                    _ => event.accept(),
                };
                match reply {
                    Ok(reply) => reply.send().await,
                    Err(error) => memlog.warn(format!("ble: gatt reply failed, {error:?}")),
                }

                // Store the canonical form of whatever was accepted.
                if written.is_some() {
                    refresh_values(server, &build_status_snapshot(state), memlog);
                }
            }
            _ => (),
        }
    }
}

// Refused setpoints and undecodable payloads are answered with an error, so
// the characteristic keeps its previous value.
fn write_accepted(
    characteristic: Characteristic,
    data: &[u8],
    state: SharedState,
    memlog: SharedLogger,
) -> bool {
    matches!(
        ble::handle_write(state, characteristic, data, Instant::now(), memlog),
        Ok(WriteOutcome::SetpointAccepted(_) | WriteOutcome::EnableSet(_))
    )
}

/// Notifies the observer of changes, on the publisher's cadence.
async fn notifier<P: PacketPool>(
    server: &HeaterServer<'_>,
    conn: &GattConnection<'_, '_, P>,
    publisher: &mut StatusPublisher,
    state: SharedState,
    memlog: SharedLogger,
) {
    let service = &server.heater;

    loop {
        let snapshot = build_status_snapshot(state);
        let publication = publisher.poll(&snapshot, Instant::now());

        // Enable has no notify, but a fault clears it under the observer.
        if publication.enable {
            if let Err(error) = server.set(&service.enable, &enable_value(snapshot.heater_enabled)) {
                memlog.warn(format!("ble: attribute update failed, {error:?}"));
            }
        }

        let result: Result<(), Error> = async {
            if publication.temperature {
                let value = text_value(ble::encode_temperature(snapshot.temperature));
                service.temperature.notify(conn, &value).await?;
            }
            if publication.setpoint {
                let value = text_value(ble::encode_setpoint(snapshot.setpoint));
                service.setpoint.notify(conn, &value).await?;
            }
            if publication.status {
                if let Ok(payload) = ble::encode_status(&snapshot) {
                    let value = StatusValue::from_slice(&payload).unwrap_or_default();
                    service.status.notify(conn, &value).await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(error) = result {
            memlog.warn(format!("ble: notify failed, {error:?}"));
            break;
        }

        Timer::after(STATUS_PUBLISH_INTERVAL).await;
    }
}

/// Writes current values into the attribute table for reads.
fn refresh_values(server: &HeaterServer<'_>, snapshot: &StatusSnapshot, memlog: SharedLogger) {
    let service = &server.heater;

    let temperature = text_value(ble::encode_temperature(snapshot.temperature));
    let setpoint = text_value(ble::encode_setpoint(snapshot.setpoint));
    let enable = enable_value(snapshot.heater_enabled);
    let status = match ble::encode_status(snapshot) {
        Ok(payload) => StatusValue::from_slice(&payload).unwrap_or_default(),
        Err(error) => {
            memlog.warn(format!("ble: status encode failed, {error}"));
            StatusValue::new()
        }
    };

    let results = [
        server.set(&service.temperature, &temperature),
        server.set(&service.setpoint, &setpoint),
        server.set(&service.status, &status),
        server.set(&service.enable, &enable),
    ];
    if let Some(Err(error)) = results.into_iter().find(Result::is_err) {
        memlog.warn(format!("ble: attribute update failed, {error:?}"));
    }
}

fn enable_value(enabled: bool) -> TextValue {
    TextValue::from_slice(ble::encode_enable(enabled).as_bytes()).unwrap_or_default()
}

fn text_value(text: Result<ble::TextPayload, ble::PayloadError>) -> TextValue {
    text.ok()
        .and_then(|text| TextValue::from_slice(text.as_bytes()).ok())
        .unwrap_or_default()
}
