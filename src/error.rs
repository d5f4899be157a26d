use std::time::Duration;

use thiserror::Error;

use crate::api::characteristic::CharacteristicProperty;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a session operation can fail with. All device-interaction
/// paths return one of these; nothing panics across the session boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The target is a classic (non-LE) device. Fatal to session creation.
    #[error("classic (non-LE) devices are not supported")]
    InvalidDevice,

    /// The session was released before or while the operation ran.
    /// Recoverable by connecting again.
    #[error("session was closed")]
    SessionClosed,

    /// The transport refused the operation synchronously.
    #[error("transport rejected the request: {0}")]
    RequestRejected(&'static str),

    /// No reply arrived within the bound. Usually means the link is
    /// degraded; check the connection state before retrying.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The peer accepted the request but reported a non-success GATT status.
    #[error("peer reported gatt status {0:#04x}")]
    StatusFailure(u8),

    /// The characteristic does not advertise the property the operation
    /// needs (write mode, notify/indicate).
    #[error("characteristic does not advertise {0:?}")]
    UnsupportedCapability(CharacteristicProperty),
}
