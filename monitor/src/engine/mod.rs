//! Alarm engine and the write operations that feed it.
//!
//! Readings and device updates call into evaluation synchronously; nothing
//! is dispatched implicitly. Readings open their threshold alarms inside
//! [`Store::record_reading`]; status alarms go through
//! [`dedup::open_if_absent`].

pub mod dedup;
pub mod evaluator;
mod ingest;
pub mod status;

pub use ingest::Ingested;

use crate::errors::{Error, Result};
use crate::model::{
    AckOutcome, Actor, Alarm, AlarmId, AlarmView, AuditAction, Device, DeviceId, DeviceUpdate,
    Manufacturer, ManufacturerId, NewAuditEntry, NewDevice, NewManufacturer,
};
use crate::store::Store;
use crate::summary::ReadingSummary;
use crate::validate::{validate_device, validate_manufacturer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info};

/// Result of a device update: the stored device and any status alarms it raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdated {
    pub device: Device,
    pub alarms: Vec<Alarm>,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Creates a device. Creation never raises alarms.
    pub async fn create_device(&self, actor: &Actor, device: NewDevice) -> Result<Device> {
        validate_device(&device.clone().into_device(0, Utc::now()))?;

        let device = self.store.create_device(&device).await?;
        info!(device_id = device.id, code = %device.code, "Device created");

        self.audit(
            actor,
            AuditAction::Create,
            "Device",
            device.id,
            format!("Device '{}' created", device.code),
        )
        .await;
        Ok(device)
    }

    /// Applies an update and runs the device state monitor on the result.
    pub async fn update_device(
        &self,
        actor: &Actor,
        id: DeviceId,
        update: DeviceUpdate,
    ) -> Result<DeviceUpdated> {
        let device = self
            .store
            .update_device(id, &update, &validate_device)
            .await?
            .ok_or_else(|| Error::not_found("Device", id))?;

        let alarms = status::check_device_state(self.store.as_ref(), &device, Utc::now()).await?;
        info!(
            device_id = device.id,
            status = device.status.as_str(),
            alarms_opened = alarms.len(),
            "Device updated"
        );

        self.audit(
            actor,
            AuditAction::Update,
            "Device",
            device.id,
            format!("Device '{}' updated", device.code),
        )
        .await;
        Ok(DeviceUpdated { device, alarms })
    }

    pub async fn delete_device(&self, actor: &Actor, id: DeviceId) -> Result<()> {
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or_else(|| Error::not_found("Device", id))?;

        if !self.store.delete_device(id).await? {
            return Err(Error::not_found("Device", id));
        }
        info!(device_id = id, "Device deleted");

        self.audit(
            actor,
            AuditAction::Delete,
            "Device",
            id,
            format!("Device '{}' deleted", device.code),
        )
        .await;
        Ok(())
    }

    /// Marks an alarm acknowledged. Irreversible; `active` is left as is.
    pub async fn acknowledge(&self, actor: &Actor, id: AlarmId) -> Result<Alarm> {
        let alarm = match self.store.acknowledge_alarm(id).await? {
            AckOutcome::Acknowledged(alarm) => alarm,
            AckOutcome::AlreadyAcknowledged => return Err(Error::AlreadyAcknowledged(id)),
            AckOutcome::NotFound => return Err(Error::not_found("Alarm", id)),
        };
        info!(
            alarm_id = id,
            device_id = alarm.device_id,
            alarm_type = %alarm.alarm_type,
            actor = actor.name().unwrap_or("anonymous"),
            "Alarm acknowledged"
        );

        self.audit(
            actor,
            AuditAction::AckAlarm,
            "Alarm",
            id,
            format!("Alarm {} ({}) acknowledged", id, alarm.alarm_type),
        )
        .await;
        Ok(alarm)
    }

    pub async fn summary(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ReadingSummary> {
        if self.store.get_device(device_id).await?.is_none() {
            return Err(Error::not_found("Device", device_id));
        }
        self.store
            .reading_summary(device_id, start, end)
            .await?
            .ok_or(Error::NoReadings(device_id))
    }

    /// Summaries for several devices over one range. `None` means every
    /// device; devices that are unknown or have no readings in the range
    /// are left out.
    pub async fn summaries(
        &self,
        device_ids: Option<&[DeviceId]>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReadingSummary>> {
        let ids: BTreeSet<DeviceId> = match device_ids {
            None => self
                .store
                .list_devices()
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect(),
            Some([]) => return Err(Error::Validation("No device_ids provided".to_string())),
            Some(ids) => ids.iter().copied().collect(),
        };

        let mut summaries = Vec::new();
        for id in ids {
            if let Some(summary) = self.store.reading_summary(id, start, end).await? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    /// Attaches device codes to alarms for display. Alarms whose device has
    /// gone away in the meantime are dropped.
    pub async fn alarm_views(&self, alarms: Vec<Alarm>) -> Result<Vec<AlarmView>> {
        let mut codes: BTreeMap<DeviceId, Option<String>> = BTreeMap::new();
        let mut views = Vec::with_capacity(alarms.len());

        for alarm in alarms {
            let code = match codes.get(&alarm.device_id) {
                Some(code) => code.clone(),
                None => {
                    let code = self
                        .store
                        .get_device(alarm.device_id)
                        .await?
                        .map(|d| d.code);
                    codes.insert(alarm.device_id, code.clone());
                    code
                }
            };
            if let Some(code) = code {
                views.push(AlarmView::new(alarm, code));
            }
        }
        Ok(views)
    }

    pub async fn create_manufacturer(
        &self,
        actor: &Actor,
        manufacturer: NewManufacturer,
    ) -> Result<Manufacturer> {
        validate_manufacturer(&manufacturer)?;

        let manufacturer = self.store.create_manufacturer(&manufacturer).await?;
        info!(manufacturer_id = manufacturer.id, name = %manufacturer.name, "Manufacturer created");

        self.audit(
            actor,
            AuditAction::Create,
            "Manufacturer",
            manufacturer.id,
            format!("Manufacturer '{}' created", manufacturer.name),
        )
        .await;
        Ok(manufacturer)
    }

    pub async fn update_manufacturer(
        &self,
        actor: &Actor,
        id: ManufacturerId,
        manufacturer: NewManufacturer,
    ) -> Result<Manufacturer> {
        validate_manufacturer(&manufacturer)?;

        let manufacturer = self
            .store
            .update_manufacturer(id, &manufacturer)
            .await?
            .ok_or_else(|| Error::not_found("Manufacturer", id))?;
        info!(manufacturer_id = id, name = %manufacturer.name, "Manufacturer updated");

        self.audit(
            actor,
            AuditAction::Update,
            "Manufacturer",
            id,
            format!("Manufacturer '{}' updated", manufacturer.name),
        )
        .await;
        Ok(manufacturer)
    }

    pub async fn delete_manufacturer(&self, actor: &Actor, id: ManufacturerId) -> Result<()> {
        let manufacturer = self
            .store
            .get_manufacturer(id)
            .await?
            .ok_or_else(|| Error::not_found("Manufacturer", id))?;

        if !self.store.delete_manufacturer(id).await? {
            return Err(Error::not_found("Manufacturer", id));
        }
        info!(manufacturer_id = id, "Manufacturer deleted");

        self.audit(
            actor,
            AuditAction::Delete,
            "Manufacturer",
            id,
            format!("Manufacturer '{}' deleted", manufacturer.name),
        )
        .await;
        Ok(())
    }

    // Audit writes never fail the operation they describe.
    async fn audit(
        &self,
        actor: &Actor,
        action: AuditAction,
        model_name: &'static str,
        object_id: i64,
        changes: String,
    ) {
        let entry = NewAuditEntry {
            actor: actor.0.clone(),
            action,
            model_name,
            object_id: object_id.to_string(),
            changes,
        };
        if let Err(e) = self.store.record_audit(&entry).await {
            error!(
                action = action.as_str(),
                model_name,
                object_id,
                "Failed to record audit entry: {}",
                e
            );
        }
    }
}
