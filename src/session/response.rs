use std::time::SystemTime;

use uuid::Uuid;

use crate::api::service::Service;
use crate::api::transport::GATT_SUCCESS;
use crate::session::state::ConnectionState;

/// One classified transport completion, broadcast to observers and — for
/// request-correlated kinds — delivered to the awaiting operation.
#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseKind,
    /// GATT status code, zero on success.
    pub status: u8,
    pub at: SystemTime,
}

impl Response {
    pub fn new(kind: ResponseKind, status: u8) -> Self {
        Response {
            kind,
            status,
            at: SystemTime::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GATT_SUCCESS
    }

    /// Kinds the peer can originate on its own. These never touch the reply
    /// slot: pairing them with whatever request happens to be outstanding
    /// would corrupt request/response ordering.
    pub fn is_spontaneous(&self) -> bool {
        matches!(
            self.kind,
            ResponseKind::ConnectionStateChanged { .. }
                | ResponseKind::CharacteristicChanged { .. }
                | ResponseKind::MtuChanged { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum ResponseKind {
    ConnectionStateChanged {
        state: ConnectionState,
    },
    ServicesDiscovered {
        services: Vec<Service>,
    },
    CharacteristicRead {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        characteristic: Uuid,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    DescriptorRead {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    DescriptorWritten {
        characteristic: Uuid,
        descriptor: Uuid,
    },
    MtuChanged {
        mtu: u16,
    },
}

/// What the outstanding operation is waiting for. A reply reaches the slot
/// only when both the kind and the target identity line up, so a stray late
/// callback from an abandoned operation cannot resolve the wrong await.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplyMatcher {
    ServicesDiscovered,
    CharacteristicRead(Uuid),
    CharacteristicWritten(Uuid),
    DescriptorRead { characteristic: Uuid, descriptor: Uuid },
    DescriptorWritten { characteristic: Uuid, descriptor: Uuid },
}

impl ReplyMatcher {
    pub fn matches(&self, kind: &ResponseKind) -> bool {
        match (self, kind) {
            (ReplyMatcher::ServicesDiscovered, ResponseKind::ServicesDiscovered { .. }) => true,
            (
                ReplyMatcher::CharacteristicRead(target),
                ResponseKind::CharacteristicRead { characteristic, .. },
            ) => target == characteristic,
            (
                ReplyMatcher::CharacteristicWritten(target),
                ResponseKind::CharacteristicWritten { characteristic },
            ) => target == characteristic,
            (
                ReplyMatcher::DescriptorRead {
                    characteristic: target_c,
                    descriptor: target_d,
                },
                ResponseKind::DescriptorRead {
                    characteristic,
                    descriptor,
                    ..
                },
            ) => target_c == characteristic && target_d == descriptor,
            (
                ReplyMatcher::DescriptorWritten {
                    characteristic: target_c,
                    descriptor: target_d,
                },
                ResponseKind::DescriptorWritten {
                    characteristic,
                    descriptor,
                },
            ) => target_c == characteristic && target_d == descriptor,
            _ => false,
        }
    }
}
