use log::warn;

use crate::api::characteristic::{Characteristic, WriteMode};
use crate::error::{Error, Result};
use crate::session::Peripheral;

impl Peripheral {
    /// Write a batch of payloads without response, strictly in order, each
    /// one only after the previous completion reported GATT success. The
    /// first non-success completion abandons the rest and resolves `false`;
    /// so does an empty batch. Completions for unrelated characteristics
    /// cannot touch the queue because every write is correlated by target
    /// identity in the coordinator.
    pub async fn write_batch(
        &self,
        characteristic: &Characteristic,
        payloads: &[Vec<u8>],
    ) -> Result<bool> {
        if payloads.is_empty() {
            warn!("empty write batch for {}", characteristic.uuid);
            return Ok(false);
        }
        for (index, payload) in payloads.iter().enumerate() {
            match self
                .write_with_mode(characteristic, payload, WriteMode::WithoutResponse)
                .await
            {
                Ok(()) => {}
                Err(Error::StatusFailure(status)) => {
                    warn!(
                        "batch write to {} aborted at payload {index}: status {status:#04x}",
                        characteristic.uuid
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
