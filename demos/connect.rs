//! Walks the full session lifecycle against a scripted in-process transport:
//! connect, discover, read, subscribe, batch write, disconnect.
//!
//! Run with `cargo run --example connect`.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use log::{LevelFilter, info};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use gattcore::Peripheral;
use gattcore::api::characteristic::{Characteristic, CharacteristicProperty, WriteMode};
use gattcore::api::descriptor::Descriptor;
use gattcore::api::service::Service;
use gattcore::api::transport::{
    ConnectionPriority, DeviceKind, GattTransport, LinkState, TransportEvent,
};

const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// A pretend battery-service device. Every primitive is accepted and answered
/// with a success completion; the level drains by one on each read.
struct ScriptedDevice {
    events: Mutex<Option<Sender<TransportEvent>>>,
    level: Mutex<u8>,
}

impl ScriptedDevice {
    fn new() -> Arc<Self> {
        Arc::new(ScriptedDevice {
            events: Mutex::new(None),
            level: Mutex::new(87),
        })
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().unwrap().clone() {
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }

    fn battery_service() -> Service {
        Service {
            uuid: BATTERY_SERVICE,
            primary: true,
            characteristics: vec![Characteristic {
                uuid: BATTERY_LEVEL,
                properties: vec![
                    CharacteristicProperty::Read,
                    CharacteristicProperty::WriteWithoutResponse,
                    CharacteristicProperty::Notify,
                ],
                descriptors: vec![Descriptor::client_characteristic_config()],
                ..Characteristic::default()
            }],
        }
    }
}

#[async_trait]
impl GattTransport for ScriptedDevice {
    async fn connect(&self, events: Sender<TransportEvent>) -> bool {
        *self.events.lock().unwrap() = Some(events);
        self.emit(TransportEvent::ConnectionStateChanged {
            state: LinkState::Connected,
            status: 0,
        });
        true
    }

    async fn disconnect(&self) -> bool {
        self.emit(TransportEvent::ConnectionStateChanged {
            state: LinkState::Disconnected,
            status: 0,
        });
        true
    }

    async fn discover_services(&self) -> bool {
        self.emit(TransportEvent::ServicesDiscovered {
            services: vec![ScriptedDevice::battery_service()],
            status: 0,
        });
        true
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> bool {
        let value = {
            let mut level = self.level.lock().unwrap();
            *level = level.saturating_sub(1);
            vec![*level]
        };
        self.emit(TransportEvent::CharacteristicRead {
            characteristic,
            value,
            status: 0,
        });
        true
    }

    async fn write_characteristic(
        &self,
        characteristic: Uuid,
        _value: &[u8],
        _mode: WriteMode,
    ) -> bool {
        self.emit(TransportEvent::CharacteristicWritten {
            characteristic,
            status: 0,
        });
        true
    }

    async fn read_descriptor(&self, characteristic: Uuid, descriptor: Uuid) -> bool {
        self.emit(TransportEvent::DescriptorRead {
            characteristic,
            descriptor,
            value: vec![0x00, 0x00],
            status: 0,
        });
        true
    }

    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> bool {
        // Enabling notifications starts a short burst of level updates.
        if value == [0x01, 0x00] {
            let level = *self.level.lock().unwrap();
            for step in 1..=3u8 {
                self.emit(TransportEvent::CharacteristicChanged {
                    characteristic,
                    value: vec![level.saturating_sub(step)],
                });
            }
        }
        self.emit(TransportEvent::DescriptorWritten {
            characteristic,
            descriptor,
            status: 0,
        });
        true
    }

    async fn set_notification(&self, _characteristic: Uuid, _enable: bool) -> bool {
        true
    }

    async fn request_mtu(&self, size: u16) -> bool {
        self.emit(TransportEvent::MtuChanged {
            mtu: size.min(185),
            status: 0,
        });
        true
    }

    async fn request_connection_priority(&self, _priority: ConnectionPriority) -> bool {
        true
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::LowEnergy
    }
}

#[tokio::main]
async fn main() -> gattcore::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .init();

    let session = Peripheral::new(ScriptedDevice::new())?;

    info!("connecting");
    if !session.connect().await? {
        info!("device refused the connection");
        return Ok(());
    }

    let service = session
        .find_service(BATTERY_SERVICE)
        .expect("battery service discovered");
    let level = service
        .find_characteristic(BATTERY_LEVEL)
        .expect("battery level characteristic")
        .clone();
    info!("discovered {} service(s)", session.services().len());

    let mtu = session.request_mtu(247).await?;
    info!("negotiated mtu {mtu}");

    let value = session.read(&level).await?;
    info!("battery level: {}%", value[0]);

    let mut updates = session.subscribe(&level, false).await?;
    for _ in 0..3 {
        if let Some(value) = updates.recv().await {
            info!("battery update: {}%", value[0]);
        }
    }
    drop(updates);

    let wrote = session
        .write_batch(&level, &[vec![0x01], vec![0x02]])
        .await?;
    info!("batch write completed: {wrote}");

    session.disconnect().await;
    let mut states = session.connection_state();
    let settled = *states
        .wait_for(|state| state.is_terminal())
        .await
        .expect("lifecycle stream");
    info!("link settled in {settled:?}");

    session.release().await;
    Ok(())
}
