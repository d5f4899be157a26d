use std::time::SystemTime;

use uuid::Uuid;

use crate::api::characteristic::WriteMode;
use crate::api::transport::ConnectionPriority;

/// One operation issued against the transport, as published to observers.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// When the request object was created.
    pub at: SystemTime,
    /// Whether the transport accepted the call synchronously. The
    /// asynchronous outcome arrives separately as a [`Response`](super::Response).
    pub accepted: bool,
}

impl Request {
    pub fn new(kind: RequestKind) -> Self {
        Request {
            kind,
            at: SystemTime::now(),
            accepted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestKind {
    Connect,
    Disconnect,
    DiscoverServices,
    SetNotification {
        characteristic: Uuid,
        enable: bool,
    },
    SetMtu {
        size: u16,
    },
    SetConnectionPriority {
        priority: ConnectionPriority,
    },
    Read {
        characteristic: Uuid,
    },
    Write {
        characteristic: Uuid,
        mode: WriteMode,
        value: Vec<u8>,
    },
    ReadDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
    },
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    /// Something went wrong outside the request/reply flow; published so
    /// observers see it, never delivered to the reply slot.
    Error {
        message: String,
    },
}
