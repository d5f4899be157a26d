use async_trait::async_trait;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::api::characteristic::WriteMode;
use crate::api::service::Service;

/// The platform GATT stack, reduced to the capability the session core
/// actually consumes: primitive operations that either fail synchronously
/// (returning `false`) or complete later with exactly one [`TransportEvent`]
/// on the channel handed to [`connect`](GattTransport::connect).
///
/// Implementations wrap whatever the platform provides (a WinRT device
/// object, a CoreBluetooth peripheral, a test script); the session never
/// touches the platform directly.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Open the link and register the event feed. `false` means the stack
    /// refused outright and no callback will ever arrive.
    async fn connect(&self, events: Sender<TransportEvent>) -> bool;

    async fn disconnect(&self) -> bool;

    async fn discover_services(&self) -> bool;

    async fn read_characteristic(&self, characteristic: Uuid) -> bool;

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8], mode: WriteMode)
    -> bool;

    async fn read_descriptor(&self, characteristic: Uuid, descriptor: Uuid) -> bool;

    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8])
    -> bool;

    async fn set_notification(&self, characteristic: Uuid, enable: bool) -> bool;

    async fn request_mtu(&self, size: u16) -> bool;

    async fn request_connection_priority(&self, priority: ConnectionPriority) -> bool;

    /// Whether the underlying device speaks LE at all. Classic-only devices
    /// are rejected at session creation.
    fn device_kind(&self) -> DeviceKind;

    /// Best-effort invalidation of the stack's service cache. Platforms
    /// without the hook keep the default and the session carries on.
    async fn refresh_cache(&self) -> bool {
        false
    }
}

/// One raw completion or spontaneous event from the platform callback
/// channel. `status` is the GATT status code, zero on success.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionStateChanged {
        state: LinkState,
        status: u8,
    },
    ServicesDiscovered {
        services: Vec<Service>,
        status: u8,
    },
    CharacteristicRead {
        characteristic: Uuid,
        value: Vec<u8>,
        status: u8,
    },
    CharacteristicWritten {
        characteristic: Uuid,
        status: u8,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorRead {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
        status: u8,
    },
    DescriptorWritten {
        characteristic: Uuid,
        descriptor: Uuid,
        status: u8,
    },
    MtuChanged {
        mtu: u16,
        status: u8,
    },
}

/// Link-layer connection state as the platform reports it, before the
/// session classifies it into a [`ConnectionState`](crate::session::ConnectionState).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceKind {
    LowEnergy,
    DualMode,
    Classic,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionPriority {
    Balanced,
    High,
    LowPower,
}

/// Vendor status many stacks report when their device cache has gone stale;
/// worth a cache refresh before the drop is finalized.
pub const STATUS_CACHE_STALE: u8 = 133;

pub const GATT_SUCCESS: u8 = 0;
