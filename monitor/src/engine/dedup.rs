use crate::errors::Result;
use crate::metrics::{ALARMS_DEDUPLICATED_TOTAL, ALARMS_OPENED_TOTAL};
use crate::model::{Alarm, AlarmType, DeviceId, NewAlarm};
use crate::store::Store;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Opens an alarm of `alarm_type` for the device unless one is already open
/// (unacknowledged and active). Returns the alarm created, if any.
///
/// The atomicity of the check is delegated to [`Store::open_alarm_if_absent`];
/// losing a race against a concurrent writer is a silent no-op. Readings open
/// their alarms inside [`Store::record_reading`] and report back through
/// [`record_opened`] and [`record_suppressed`].
pub async fn open_if_absent(
    store: &dyn Store,
    device_id: DeviceId,
    alarm_type: AlarmType,
    value: Option<f64>,
    timestamp: DateTime<Utc>,
) -> Result<Option<Alarm>> {
    let candidate = NewAlarm {
        device_id,
        alarm_type,
        triggered_value: value,
        timestamp,
    };

    let opened = store.open_alarm_if_absent(&candidate).await?;
    match &opened {
        Some(alarm) => record_opened(alarm),
        None => record_suppressed(device_id, alarm_type),
    }

    Ok(opened)
}

pub fn record_opened(alarm: &Alarm) {
    ALARMS_OPENED_TOTAL
        .with_label_values(&[alarm.alarm_type.as_str()])
        .inc();
    info!(
        device_id = alarm.device_id,
        alarm_id = alarm.id,
        alarm_type = %alarm.alarm_type,
        value = ?alarm.triggered_value,
        "Alarm opened"
    );
}

pub fn record_suppressed(device_id: DeviceId, alarm_type: AlarmType) {
    ALARMS_DEDUPLICATED_TOTAL
        .with_label_values(&[alarm_type.as_str()])
        .inc();
    debug!(device_id, alarm_type = %alarm_type, "Open alarm already exists");
}
