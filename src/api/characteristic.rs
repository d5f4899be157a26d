use uuid::Uuid;

use crate::api::descriptor::{AttributePermission, Descriptor};

#[derive(Debug, Ord, Eq, PartialEq, PartialOrd, Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub permissions: Vec<AttributePermission>,
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn find_descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

impl Default for Characteristic {
    fn default() -> Self {
        Characteristic {
            uuid: Uuid::nil(),
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
                CharacteristicProperty::Notify,
            ],
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
            descriptors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialOrd, Ord, Eq, PartialEq)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    AuthenticatedSignedWrites,
    Notify,
    NotifyEncryptionRequired,
    Indicate,
    IndicateEncryptionRequired,
    ExtendedProperties,
}

/// How a characteristic write is carried on the link. Each mode requires the
/// matching property on the target characteristic; the session checks that
/// before anything reaches the transport.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, Eq, PartialEq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
    Signed,
}

impl WriteMode {
    /// The property a characteristic must advertise for this mode.
    pub fn required_property(self) -> CharacteristicProperty {
        match self {
            WriteMode::WithResponse => CharacteristicProperty::Write,
            WriteMode::WithoutResponse => CharacteristicProperty::WriteWithoutResponse,
            WriteMode::Signed => CharacteristicProperty::AuthenticatedSignedWrites,
        }
    }
}
