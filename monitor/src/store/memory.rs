use super::{timestamp_taken, Store};
use crate::errors::{Error, Result};
use crate::model::{
    AckOutcome, Alarm, AlarmFilter, AlarmId, AuditEntry, AuditQuery, Device, DeviceId,
    DeviceUpdate, Manufacturer, ManufacturerId, NewAlarm, NewAuditEntry, NewDevice,
    NewManufacturer, NewReading, Reading, ReadingId, ReadingQuery, RecordedReading,
};
use crate::summary::{summarize, ReadingSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// In-process store. Every operation holds the lock for its entire
/// read-check-write sequence.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    devices: BTreeMap<DeviceId, Device>,
    readings: Vec<Reading>,
    alarms: BTreeMap<AlarmId, Alarm>,
    manufacturers: BTreeMap<ManufacturerId, Manufacturer>,
    audit: Vec<AuditEntry>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn check_unique(&self, device: &Device) -> Result<()> {
        for other in self.devices.values().filter(|d| d.id != device.id) {
            if other.code == device.code {
                return Err(Error::Conflict(format!(
                    "device code '{}' is already in use",
                    device.code
                )));
            }
            if device.serial_number.is_some() && other.serial_number == device.serial_number {
                return Err(Error::Conflict(format!(
                    "serial number '{}' is already in use",
                    device.serial_number.as_deref().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    fn check_manufacturer_name(&self, id: ManufacturerId, name: &str) -> Result<()> {
        if self
            .manufacturers
            .values()
            .any(|m| m.id != id && m.name == name)
        {
            return Err(Error::Conflict(format!(
                "manufacturer '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    fn open_if_absent(&mut self, alarm: &NewAlarm) -> Option<Alarm> {
        let already_open = self.alarms.values().any(|a| {
            a.device_id == alarm.device_id && a.alarm_type == alarm.alarm_type && a.is_open()
        });
        if already_open {
            return None;
        }

        let id = self.next_id();
        let opened = alarm.clone().into_alarm(id);
        self.alarms.insert(id, opened.clone());
        Some(opened)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_device(&self, device: &NewDevice) -> Result<Device> {
        let mut inner = self.inner.lock().await;
        let id = inner.last_id + 1;
        let device = device.clone().into_device(id, Utc::now());
        inner.check_unique(&device)?;
        inner.next_id();
        inner.devices.insert(id, device.clone());
        Ok(device)
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.inner.lock().await.devices.get(&id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.inner.lock().await.devices.values().cloned().collect())
    }

    async fn update_device(
        &self,
        id: DeviceId,
        update: &DeviceUpdate,
        check: &(dyn for<'d> Fn(&'d Device) -> Result<()> + Send + Sync),
    ) -> Result<Option<Device>> {
        let mut inner = self.inner.lock().await;
        let Some(mut device) = inner.devices.get(&id).cloned() else {
            return Ok(None);
        };
        device.apply(update);
        check(&device)?;
        inner.check_unique(&device)?;
        inner.devices.insert(id, device.clone());
        Ok(Some(device))
    }

    async fn delete_device(&self, id: DeviceId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.devices.remove(&id).is_none() {
            return Ok(false);
        }
        inner.readings.retain(|r| r.device_id != id);
        inner.alarms.retain(|_, a| a.device_id != id);
        Ok(true)
    }

    async fn record_reading(
        &self,
        reading: &NewReading,
        timestamp: DateTime<Utc>,
        evaluate: &(dyn for<'d> Fn(&'d Device, &'d Reading) -> Vec<NewAlarm> + Send + Sync),
    ) -> Result<RecordedReading> {
        let mut inner = self.inner.lock().await;
        let Some(device) = inner.devices.get(&reading.device_id).cloned() else {
            return Err(Error::not_found("Device", reading.device_id));
        };

        if let Some(existing) = inner
            .readings
            .iter()
            .find(|r| r.device_id == reading.device_id && r.timestamp == timestamp)
        {
            if !reading.same_values(existing) {
                return Err(timestamp_taken(reading.device_id, timestamp));
            }
            return Ok(RecordedReading {
                reading: existing.clone(),
                created: false,
                opened: Vec::new(),
                suppressed: Vec::new(),
            });
        }

        let stored = Reading {
            id: inner.next_id(),
            device_id: reading.device_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp,
        };
        inner.readings.push(stored.clone());

        let mut opened = Vec::new();
        let mut suppressed = Vec::new();
        for candidate in evaluate(&device, &stored) {
            match inner.open_if_absent(&candidate) {
                Some(alarm) => opened.push(alarm),
                None => suppressed.push(candidate.alarm_type),
            }
        }

        Ok(RecordedReading {
            reading: stored,
            created: true,
            opened,
            suppressed,
        })
    }

    async fn get_reading(&self, id: ReadingId) -> Result<Option<Reading>> {
        let inner = self.inner.lock().await;
        Ok(inner.readings.iter().find(|r| r.id == id).cloned())
    }

    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let inner = self.inner.lock().await;
        let mut readings: Vec<Reading> = inner
            .readings
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        readings.sort_by_key(|r| (r.timestamp, r.id));

        Ok(readings
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect())
    }

    async fn reading_summary(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<ReadingSummary>> {
        let query = ReadingQuery {
            device_id: Some(device_id),
            start,
            end,
            ..Default::default()
        };
        let inner = self.inner.lock().await;
        let readings: Vec<Reading> = inner
            .readings
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        Ok(summarize(device_id, &readings))
    }

    async fn open_alarm_if_absent(&self, alarm: &NewAlarm) -> Result<Option<Alarm>> {
        let mut inner = self.inner.lock().await;
        if !inner.devices.contains_key(&alarm.device_id) {
            return Err(Error::not_found("Device", alarm.device_id));
        }
        Ok(inner.open_if_absent(alarm))
    }

    async fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>> {
        Ok(self.inner.lock().await.alarms.get(&id).cloned())
    }

    async fn list_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        let inner = self.inner.lock().await;
        let mut alarms: Vec<Alarm> = inner
            .alarms
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alarms.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(alarms)
    }

    async fn acknowledge_alarm(&self, id: AlarmId) -> Result<AckOutcome> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.alarms.get_mut(&id) {
            None => AckOutcome::NotFound,
            Some(alarm) if alarm.acknowledged => AckOutcome::AlreadyAcknowledged,
            Some(alarm) => {
                alarm.acknowledged = true;
                AckOutcome::Acknowledged(alarm.clone())
            }
        })
    }

    async fn create_manufacturer(&self, manufacturer: &NewManufacturer) -> Result<Manufacturer> {
        let mut inner = self.inner.lock().await;
        inner.check_manufacturer_name(0, &manufacturer.name)?;
        let stored = Manufacturer {
            id: inner.next_id(),
            name: manufacturer.name.clone(),
        };
        inner.manufacturers.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_manufacturer(&self, id: ManufacturerId) -> Result<Option<Manufacturer>> {
        Ok(self.inner.lock().await.manufacturers.get(&id).cloned())
    }

    async fn list_manufacturers(&self) -> Result<Vec<Manufacturer>> {
        Ok(self.inner.lock().await.manufacturers.values().cloned().collect())
    }

    async fn update_manufacturer(
        &self,
        id: ManufacturerId,
        manufacturer: &NewManufacturer,
    ) -> Result<Option<Manufacturer>> {
        let mut inner = self.inner.lock().await;
        if !inner.manufacturers.contains_key(&id) {
            return Ok(None);
        }
        inner.check_manufacturer_name(id, &manufacturer.name)?;

        let updated = Manufacturer {
            id,
            name: manufacturer.name.clone(),
        };
        inner.manufacturers.insert(id, updated.clone());
        Ok(Some(updated))
    }

    async fn delete_manufacturer(&self, id: ManufacturerId) -> Result<bool> {
        Ok(self.inner.lock().await.manufacturers.remove(&id).is_some())
    }

    async fn record_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry> {
        let mut inner = self.inner.lock().await;
        let stored = AuditEntry {
            id: inner.next_id(),
            actor: entry.actor.clone(),
            action: entry.action,
            model_name: entry.model_name.to_string(),
            object_id: entry.object_id.clone(),
            changes: entry.changes.clone(),
            timestamp: Utc::now(),
        };
        inner.audit.push(stored.clone());
        Ok(stored)
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .rev()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlarmType, DeviceStatus};
    use chrono::Duration;

    fn candidate(device_id: DeviceId, alarm_type: AlarmType) -> NewAlarm {
        NewAlarm {
            device_id,
            alarm_type,
            triggered_value: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_alarm_if_absent_dedups_per_device_and_type() {
        let store = MemoryStore::new();
        let a = store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        let b = store.create_device(&NewDevice::named("B", "B-1")).await.unwrap();

        let first = store
            .open_alarm_if_absent(&candidate(a.id, AlarmType::Disconnected))
            .await
            .unwrap();
        assert!(first.is_some());

        let dup = store
            .open_alarm_if_absent(&candidate(a.id, AlarmType::Disconnected))
            .await
            .unwrap();
        assert!(dup.is_none());

        assert!(store
            .open_alarm_if_absent(&candidate(a.id, AlarmType::StopDisabled))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .open_alarm_if_absent(&candidate(b.id, AlarmType::Disconnected))
            .await
            .unwrap()
            .is_some());

        assert_eq!(store.list_alarms(&AlarmFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_acknowledge_outcomes() {
        let store = MemoryStore::new();
        let device = store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        let alarm = store
            .open_alarm_if_absent(&candidate(device.id, AlarmType::MuteDisabled))
            .await
            .unwrap()
            .unwrap();

        match store.acknowledge_alarm(alarm.id).await.unwrap() {
            AckOutcome::Acknowledged(acked) => {
                assert!(acked.acknowledged);
                assert!(acked.active);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            store.acknowledge_alarm(alarm.id).await.unwrap(),
            AckOutcome::AlreadyAcknowledged
        );
        assert_eq!(store.acknowledge_alarm(9999).await.unwrap(), AckOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_code_is_conflict() {
        let store = MemoryStore::new();
        store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        let err = store
            .create_device(&NewDevice::named("B", "A-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    fn no_alarms(_: &Device, _: &Reading) -> Vec<NewAlarm> {
        Vec::new()
    }

    fn temp_high_when_on(device: &Device, reading: &Reading) -> Vec<NewAlarm> {
        if !device.is_on() {
            return Vec::new();
        }
        vec![NewAlarm {
            device_id: device.id,
            alarm_type: AlarmType::TempHigh,
            triggered_value: Some(reading.temperature),
            timestamp: reading.timestamp,
        }]
    }

    #[tokio::test]
    async fn test_record_reading_replay_and_ordering() {
        let store = MemoryStore::new();
        let device = store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        let t0 = Utc::now();
        let new = |temperature| NewReading {
            device_id: device.id,
            temperature,
            humidity: 50.0,
            timestamp: None,
        };

        let later = store
            .record_reading(&new(21.0), t0 + Duration::minutes(15), &no_alarms)
            .await
            .unwrap();
        let first = store.record_reading(&new(20.0), t0, &no_alarms).await.unwrap();
        assert!(first.created);

        let replay = store.record_reading(&new(20.0), t0, &no_alarms).await.unwrap();
        assert!(!replay.created);
        assert_eq!(replay.reading, first.reading);

        let listed = store.list_readings(&ReadingQuery::default()).await.unwrap();
        assert_eq!(listed, vec![first.reading, later.reading]);

        let missing = NewReading {
            device_id: 42,
            ..new(20.0)
        };
        assert!(matches!(
            store.record_reading(&missing, t0, &no_alarms).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_different_values_at_same_timestamp_conflict() {
        let store = MemoryStore::new();
        let device = store
            .create_device(&NewDevice {
                status: DeviceStatus::On,
                ..NewDevice::named("A", "A-1")
            })
            .await
            .unwrap();
        let t0 = Utc::now();
        let new = |temperature| NewReading {
            device_id: device.id,
            temperature,
            humidity: 50.0,
            timestamp: Some(t0),
        };

        store.record_reading(&new(20.0), t0, &no_alarms).await.unwrap();
        let err = store
            .record_reading(&new(45.0), t0, &temp_high_when_on)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Nothing from the rejected reading was kept
        assert_eq!(store.list_readings(&ReadingQuery::default()).await.unwrap().len(), 1);
        assert!(store.list_alarms(&AlarmFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_reading_evaluates_stored_device() {
        let store = MemoryStore::new();
        let device = store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        let t0 = Utc::now();
        let reading = |minutes| NewReading {
            device_id: device.id,
            temperature: 45.0,
            humidity: 50.0,
            timestamp: Some(t0 + Duration::minutes(minutes)),
        };

        let off = store
            .record_reading(&reading(0), t0, &temp_high_when_on)
            .await
            .unwrap();
        assert!(off.opened.is_empty());

        store
            .update_device(device.id, &DeviceUpdate::status(DeviceStatus::On), &|_| Ok(()))
            .await
            .unwrap();
        let on = store
            .record_reading(&reading(1), t0 + Duration::minutes(1), &temp_high_when_on)
            .await
            .unwrap();
        assert_eq!(on.opened.len(), 1);
        assert_eq!(on.opened[0].timestamp, t0 + Duration::minutes(1));

        let again = store
            .record_reading(&reading(2), t0 + Duration::minutes(2), &temp_high_when_on)
            .await
            .unwrap();
        assert!(again.opened.is_empty());
        assert_eq!(again.suppressed, vec![AlarmType::TempHigh]);
    }

    #[tokio::test]
    async fn test_manufacturer_names_are_unique() {
        let store = MemoryStore::new();
        let acme = store
            .create_manufacturer(&NewManufacturer::named("Acme"))
            .await
            .unwrap();
        let other = store
            .create_manufacturer(&NewManufacturer::named("Initech"))
            .await
            .unwrap();

        assert!(matches!(
            store.create_manufacturer(&NewManufacturer::named("Acme")).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store
                .update_manufacturer(other.id, &NewManufacturer::named("Acme"))
                .await,
            Err(Error::Conflict(_))
        ));

        // Renaming to its own name is fine
        let same = store
            .update_manufacturer(acme.id, &NewManufacturer::named("Acme"))
            .await
            .unwrap();
        assert_eq!(same, Some(acme.clone()));

        assert!(store.delete_manufacturer(acme.id).await.unwrap());
        assert!(!store.delete_manufacturer(acme.id).await.unwrap());
        assert_eq!(store.list_manufacturers().await.unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        let device = store.create_device(&NewDevice::named("A", "A-1")).await.unwrap();
        store
            .open_alarm_if_absent(&candidate(device.id, AlarmType::Disconnected))
            .await
            .unwrap();

        assert!(store.delete_device(device.id).await.unwrap());
        assert!(!store.delete_device(device.id).await.unwrap());
        assert!(store.list_alarms(&AlarmFilter::default()).await.unwrap().is_empty());
    }
}
