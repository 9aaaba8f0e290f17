//! NVS-backed key-value persistence.
//!
//! [`NvsStore`] implements [`KvStore`] on top of ESP32's Non-Volatile
//! Storage so credentials persist across reboots. Each call opens a handle
//! on the requested namespace; esp-idf-svc commits every write, so
//! [`commit`](KvStore::commit) only confirms the handle is usable.
//!
//! # Security
//!
//! NVS data is not encrypted unless the partition is flashed with NVS
//! encryption enabled.
//!
//! # Usage
//!
//! ```ignore
//! use audio_link_esp32::persistence::NvsStore;
//! use esp_idf_svc::nvs::EspDefaultNvsPartition;
//!
//! let store = NvsStore::new(EspDefaultNvsPartition::take()?);
//! ```

use crate::kv::{KvStore, StoreError};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

/// Largest string value read back from NVS (passphrase plus terminator, rounded up).
const MAX_VALUE_LEN: usize = 128;

/// Key-value store on the default NVS partition.
pub struct NvsStore {
    partition: EspNvsPartition<NvsDefault>,
}

impl NvsStore {
    /// Wrap a taken NVS partition.
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Self {
        Self { partition }
    }

    fn open(&self, namespace: &str, read_write: bool) -> Result<EspNvs<NvsDefault>, StoreError> {
        Ok(EspNvs::new(self.partition.clone(), namespace, read_write)?)
    }
}

impl KvStore for NvsStore {
    fn get_str(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let nvs = self.open(namespace, true)?;
        let mut buf = [0u8; MAX_VALUE_LEN];
        match nvs.get_str(key, &mut buf) {
            Ok(value) => Ok(value.map(str::to_string)),
            Err(e) => {
                log::warn!("Failed to read {}/{} from NVS: {:?}", namespace, key, e);
                Err(e.into())
            }
        }
    }

    fn set_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut nvs = self.open(namespace, true)?;
        nvs.set_str(key, value)?;
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut nvs = self.open(namespace, true)?;
        if !nvs.remove(key)? {
            log::debug!("{}/{} was not present in NVS", namespace, key);
        }
        Ok(())
    }

    fn commit(&mut self, namespace: &str) -> Result<(), StoreError> {
        self.open(namespace, true)?;
        log::debug!("NVS namespace {} committed", namespace);
        Ok(())
    }
}
