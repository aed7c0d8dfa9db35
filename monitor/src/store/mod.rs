//! Persistence seam. The store is the single source of truth: every alarm
//! decision is re-derived from its current contents.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{make_pool, PgStore};

use crate::errors::{Error, Result};
use crate::model::{
    AckOutcome, Alarm, AlarmFilter, AlarmId, AuditEntry, AuditQuery, Device, DeviceId,
    DeviceUpdate, Manufacturer, ManufacturerId, NewAlarm, NewAuditEntry, NewDevice,
    NewManufacturer, NewReading, Reading, ReadingId, ReadingQuery, RecordedReading,
};
use crate::summary::ReadingSummary;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_device(&self, device: &NewDevice) -> Result<Device>;

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>>;

    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Applies `update` to the stored device atomically and returns the
    /// result, or `None` when the device does not exist. `check` runs on the
    /// merged device before anything is written.
    async fn update_device(
        &self,
        id: DeviceId,
        update: &DeviceUpdate,
        check: &(dyn for<'d> Fn(&'d Device) -> Result<()> + Send + Sync),
    ) -> Result<Option<Device>>;

    /// Deletes a device together with its readings and alarms.
    async fn delete_device(&self, id: DeviceId) -> Result<bool>;

    /// Stores a reading and opens the alarms `evaluate` derives from it.
    ///
    /// The device lookup, the insert and the alarm opens form one atomic
    /// step, so `evaluate` always sees the device as stored when the reading
    /// lands. Replaying an identical reading for an occupied (device,
    /// timestamp) returns the stored row and opens nothing; different values
    /// for an occupied timestamp are a conflict.
    async fn record_reading(
        &self,
        reading: &NewReading,
        timestamp: DateTime<Utc>,
        evaluate: &(dyn for<'d> Fn(&'d Device, &'d Reading) -> Vec<NewAlarm> + Send + Sync),
    ) -> Result<RecordedReading>;

    async fn get_reading(&self, id: ReadingId) -> Result<Option<Reading>>;

    /// Readings matching `query`, oldest first.
    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>>;

    /// Aggregates over one device's readings in the given range, or `None`
    /// when there are none.
    async fn reading_summary(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<ReadingSummary>>;

    /// Opens `alarm` unless an open (unacknowledged, active) alarm of the
    /// same device and type exists. Check and insert are one atomic step.
    async fn open_alarm_if_absent(&self, alarm: &NewAlarm) -> Result<Option<Alarm>>;

    async fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>>;

    /// Alarms matching `filter`, newest first.
    async fn list_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>>;

    async fn acknowledge_alarm(&self, id: AlarmId) -> Result<AckOutcome>;

    async fn create_manufacturer(&self, manufacturer: &NewManufacturer) -> Result<Manufacturer>;

    async fn get_manufacturer(&self, id: ManufacturerId) -> Result<Option<Manufacturer>>;

    async fn list_manufacturers(&self) -> Result<Vec<Manufacturer>>;

    /// Renames a manufacturer, or returns `None` when it does not exist.
    async fn update_manufacturer(
        &self,
        id: ManufacturerId,
        manufacturer: &NewManufacturer,
    ) -> Result<Option<Manufacturer>>;

    async fn delete_manufacturer(&self, id: ManufacturerId) -> Result<bool>;

    async fn record_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry>;

    /// Audit entries, newest first.
    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>>;
}

fn timestamp_taken(device_id: DeviceId, timestamp: DateTime<Utc>) -> Error {
    Error::Conflict(format!(
        "device {} already has a different reading at {}",
        device_id,
        timestamp.to_rfc3339()
    ))
}
