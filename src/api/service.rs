use uuid::Uuid;

use crate::api::characteristic::Characteristic;

#[derive(Debug, Ord, Eq, PartialEq, PartialOrd, Clone)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

impl Default for Service {
    fn default() -> Self {
        Service {
            uuid: Uuid::nil(),
            primary: true,
            characteristics: Vec::new(),
        }
    }
}
