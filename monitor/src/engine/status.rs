//! Device state monitoring: status-class alarms raised by configuration
//! changes rather than measurements.

use super::dedup::open_if_absent;
use crate::errors::Result;
use crate::model::{Alarm, AlarmType, Device, DeviceStatus};
use crate::store::Store;
use chrono::{DateTime, Utc};

/// Adverse status conditions currently present on the device.
pub fn status_conditions(device: &Device) -> Vec<AlarmType> {
    let mut conditions = Vec::new();
    if device.status == DeviceStatus::Off {
        conditions.push(AlarmType::Disconnected);
    }
    if !device.button_stop_enabled {
        conditions.push(AlarmType::StopDisabled);
    }
    if !device.mute_button_enabled {
        conditions.push(AlarmType::MuteDisabled);
    }
    conditions
}

/// Raises a status-class alarm for each adverse condition of an updated
/// device. Alarms are never cleared here: a DC alarm stays open after the
/// device is switched back on until someone acknowledges it.
pub async fn check_device_state(
    store: &dyn Store,
    device: &Device,
    at: DateTime<Utc>,
) -> Result<Vec<Alarm>> {
    let mut opened = Vec::new();
    for alarm_type in status_conditions(device) {
        if let Some(alarm) = open_if_absent(store, device.id, alarm_type, None, at).await? {
            opened.push(alarm);
        }
    }
    Ok(opened)
}
