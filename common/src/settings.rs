use log::warn;

use crate::{
    error::StorageError,
    store::KeyValueStore,
    types::{AlarmRecord, NetworkCredentials},
};

pub const KEY_DEVICE_NAME: &str = "device-name";
pub const KEY_WIFI_SSID: &str = "wifi-ssid";
pub const KEY_WIFI_PASSWORD: &str = "wifi-password";
pub const KEY_IN_DEEP_SLEEP: &str = "in-deep-sleep";
pub const KEY_ARMED_SLOT: &str = "armed-slot";
const KEY_ALARM_PREFIX: &str = "alarm-";

pub fn alarm_key(slot: u8) -> String {
    format!("{KEY_ALARM_PREFIX}{slot}")
}

/// Typed view of everything the clock keeps across deep sleep.
#[derive(Debug)]
pub struct DeviceSettings<S> {
    store: S,
    max_alarms: u8,
}

impl<S: KeyValueStore> DeviceSettings<S> {
    pub fn new(store: S, max_alarms: u8) -> Self {
        Self { store, max_alarms }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn device_name(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .get_string(KEY_DEVICE_NAME)?
            .filter(|name| !name.is_empty()))
    }

    pub fn save_device_name(&mut self, name: &str) -> Result<(), StorageError> {
        self.store.put(KEY_DEVICE_NAME, name.as_bytes())
    }

    pub fn credentials(&self) -> Result<NetworkCredentials, StorageError> {
        Ok(NetworkCredentials {
            ssid: self.get_string(KEY_WIFI_SSID)?.unwrap_or_default(),
            password: self.get_string(KEY_WIFI_PASSWORD)?.unwrap_or_default(),
        })
    }

    pub fn save_credentials(&mut self, credentials: &NetworkCredentials) -> Result<(), StorageError> {
        self.store.put(KEY_WIFI_SSID, credentials.ssid.as_bytes())?;
        self.store
            .put(KEY_WIFI_PASSWORD, credentials.password.as_bytes())
    }

    /// Returns the record stored at `slot`, or `None` when the slot is out of
    /// range, empty, or holds something that is not a valid alarm.
    pub fn alarm(&self, slot: u8) -> Result<Option<AlarmRecord>, StorageError> {
        if !self.is_valid_slot(slot) {
            return Ok(None);
        }

        let key = alarm_key(slot);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };

        let record: AlarmRecord =
            serde_json::from_slice(&raw).map_err(|err| StorageError::Decode {
                key: key.clone(),
                reason: err.to_string(),
            })?;

        if !record.is_valid() || record.slot != slot {
            warn!("ignoring invalid alarm record stored under `{key}`");
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// All defined alarms, ordered by slot. Unreadable slots are skipped.
    pub fn alarms(&self) -> Vec<AlarmRecord> {
        (1..=self.max_alarms)
            .filter_map(|slot| match self.alarm(slot) {
                Ok(record) => record,
                Err(err) => {
                    warn!("failed to read alarm slot {slot}: {err}");
                    None
                }
            })
            .collect()
    }

    pub fn save_alarm(&mut self, alarm: &AlarmRecord) -> Result<(), StorageError> {
        let key = alarm_key(alarm.slot);
        if !alarm.is_valid() || !self.is_valid_slot(alarm.slot) {
            return Err(StorageError::Write {
                key,
                reason: "refusing to persist an invalid alarm record".to_string(),
            });
        }

        let payload = serde_json::to_vec(alarm).map_err(|err| StorageError::Write {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        self.store.put(&key, &payload)
    }

    pub fn in_deep_sleep(&self) -> Result<bool, StorageError> {
        Ok(self
            .store
            .get(KEY_IN_DEEP_SLEEP)?
            .is_some_and(|raw| raw.first() == Some(&1)))
    }

    pub fn save_in_deep_sleep(&mut self, value: bool) -> Result<(), StorageError> {
        self.store.put(KEY_IN_DEEP_SLEEP, &[u8::from(value)])
    }

    /// Slot the timer wake was armed for; 0 means the safety interval.
    pub fn armed_slot(&self) -> Result<u8, StorageError> {
        Ok(self
            .store
            .get(KEY_ARMED_SLOT)?
            .and_then(|raw| raw.first().copied())
            .unwrap_or(0))
    }

    pub fn save_armed_slot(&mut self, slot: u8) -> Result<(), StorageError> {
        self.store.put(KEY_ARMED_SLOT, &[slot])
    }

    fn is_valid_slot(&self, slot: u8) -> bool {
        (1..=self.max_alarms).contains(&slot)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.store.get(key)? {
            Some(raw) => String::from_utf8(raw)
                .map(Some)
                .map_err(|err| StorageError::Decode {
                    key: key.to_string(),
                    reason: err.to_string(),
                }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn alarm(slot: u8, time_of_day: u32) -> AlarmRecord {
        AlarmRecord {
            slot,
            time_of_day,
            payload_ref: "song.mp3".to_string(),
            active_days_mask: 0b0001_1111,
        }
    }

    #[test]
    fn alarms_are_stored_per_slot() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        settings.save_alarm(&alarm(2, 21_600)).unwrap();
        settings.save_alarm(&alarm(4, 25_200)).unwrap();

        assert_eq!(settings.alarm(1).unwrap(), None);
        assert_eq!(settings.alarm(2).unwrap(), Some(alarm(2, 21_600)));
        assert_eq!(settings.alarms(), vec![alarm(2, 21_600), alarm(4, 25_200)]);
    }

    #[test]
    fn invalid_records_are_never_written() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);

        assert!(settings.save_alarm(&alarm(0, 21_600)).is_err());
        assert!(settings.save_alarm(&alarm(1, 0)).is_err());
        assert!(settings.save_alarm(&alarm(5, 21_600)).is_err());
        assert!(settings
            .save_alarm(&AlarmRecord {
                active_days_mask: 0,
                ..alarm(1, 21_600)
            })
            .is_err());

        assert!(settings.store().entries().is_empty());
    }

    #[test]
    fn corrupt_or_mismatched_alarm_reads_as_absent_or_error() {
        let mut store = MemoryStore::new();
        store
            .put(&alarm_key(1), br#"{"slot":3,"timeOfDay":100,"payloadRef":"","activeDaysMask":1}"#)
            .unwrap();
        store.put(&alarm_key(2), b"not json").unwrap();
        let settings = DeviceSettings::new(store, 4);

        assert_eq!(settings.alarm(1).unwrap(), None);
        assert!(matches!(
            settings.alarm(2),
            Err(StorageError::Decode { .. })
        ));
        assert!(settings.alarms().is_empty());
    }

    #[test]
    fn sleep_flag_and_armed_slot_default_to_cleared() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        assert!(!settings.in_deep_sleep().unwrap());
        assert_eq!(settings.armed_slot().unwrap(), 0);

        settings.save_in_deep_sleep(true).unwrap();
        settings.save_armed_slot(3).unwrap();
        assert!(settings.in_deep_sleep().unwrap());
        assert_eq!(settings.armed_slot().unwrap(), 3);
    }

    #[test]
    fn credentials_round_through_separate_keys() {
        let mut settings = DeviceSettings::new(MemoryStore::new(), 4);
        assert_eq!(settings.credentials().unwrap(), NetworkCredentials::default());

        let credentials = NetworkCredentials {
            ssid: "home".to_string(),
            password: "hunter2".to_string(),
        };
        settings.save_credentials(&credentials).unwrap();

        assert_eq!(
            settings.store().get(KEY_WIFI_SSID).unwrap(),
            Some(b"home".to_vec())
        );
        assert_eq!(settings.credentials().unwrap(), credentials);
    }
}
