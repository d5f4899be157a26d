use uuid::Uuid;

use crate::api::characteristic::CharacteristicProperty;

/// Client Characteristic Configuration descriptor, the switch a central
/// writes to turn notifications or indications on and off.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

#[derive(Debug, Ord, Clone, PartialOrd, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub permissions: Vec<AttributePermission>,
    pub value: Option<Vec<u8>>,
}

impl Descriptor {
    /// A CCC descriptor with no cached value, ready to hang off a
    /// notifying characteristic.
    pub fn client_characteristic_config() -> Self {
        Descriptor {
            uuid: CLIENT_CHARACTERISTIC_CONFIG,
            ..Descriptor::default()
        }
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor {
            uuid: Uuid::nil(),
            properties: vec![
                CharacteristicProperty::Read,
                CharacteristicProperty::Write,
            ],
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
            value: None,
        }
    }
}

#[derive(Debug, Clone, Ord, PartialOrd, PartialEq, Eq)]
pub enum AttributePermission {
    Readable,
    Writeable,
    ReadEncryptionRequired,
    WriteEncryptionRequired,
}
