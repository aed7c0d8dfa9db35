use super::{timestamp_taken, Store};
use crate::errors::{Error, Result};
use crate::model::{
    AckOutcome, Alarm, AlarmFilter, AlarmId, AuditEntry, AuditQuery, Device, DeviceId,
    DeviceUpdate, Manufacturer, ManufacturerId, NewAlarm, NewAuditEntry, NewDevice,
    NewManufacturer, NewReading, Reading, ReadingId, ReadingQuery, RecordedReading,
};
use crate::summary::{ReadingSummary, Stats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;

const DEVICE_COLUMNS: &str = "\
    id, name, code, location, status, temperature_min, temperature_max, \
    humidity_min, humidity_max, model, manufacturer, serial_number, firmware_version, \
    alert_temp_min, alert_temp_max, alert_humidity_min, alert_humidity_max, \
    logging_interval_minutes, button_stop_enabled, mute_button_enabled, \
    alarm_tone_enabled, storage_mode, created_at";

const READING_COLUMNS: &str = "id, device_id, temperature, humidity, ts AS timestamp";

const ALARM_COLUMNS: &str =
    "id, device_id, alarm_type, triggered_value, ts AS timestamp, acknowledged, active";

const MANUFACTURER_COLUMNS: &str = "id, name";

const AUDIT_COLUMNS: &str = "id, actor, action, model_name, object_id, changes, ts AS timestamp";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Postgres-backed store. Alarm uniqueness is enforced by the partial
/// unique index `uq_alarms_open`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    name: String,
    code: String,
    location: String,
    status: String,
    temperature_min: Option<f64>,
    temperature_max: Option<f64>,
    humidity_min: Option<f64>,
    humidity_max: Option<f64>,
    model: Option<String>,
    manufacturer: Option<String>,
    serial_number: Option<String>,
    firmware_version: Option<String>,
    alert_temp_min: Option<f64>,
    alert_temp_max: Option<f64>,
    alert_humidity_min: Option<f64>,
    alert_humidity_max: Option<f64>,
    logging_interval_minutes: i32,
    button_stop_enabled: bool,
    mute_button_enabled: bool,
    alarm_tone_enabled: bool,
    storage_mode: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        Ok(Device {
            id: row.id,
            name: row.name,
            code: row.code,
            location: row.location,
            status: row.status.parse().map_err(decode_error)?,
            temperature_min: row.temperature_min,
            temperature_max: row.temperature_max,
            humidity_min: row.humidity_min,
            humidity_max: row.humidity_max,
            model: row.model,
            manufacturer: row.manufacturer,
            serial_number: row.serial_number,
            firmware_version: row.firmware_version,
            alert_temp_min: row.alert_temp_min,
            alert_temp_max: row.alert_temp_max,
            alert_humidity_min: row.alert_humidity_min,
            alert_humidity_max: row.alert_humidity_max,
            logging_interval_minutes: row.logging_interval_minutes,
            button_stop_enabled: row.button_stop_enabled,
            mute_button_enabled: row.mute_button_enabled,
            alarm_tone_enabled: row.alarm_tone_enabled,
            storage_mode: row.storage_mode,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    device_id: i64,
    temperature: f64,
    humidity: f64,
    timestamp: DateTime<Utc>,
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: row.id,
            device_id: row.device_id,
            temperature: row.temperature,
            humidity: row.humidity,
            timestamp: row.timestamp,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlarmRow {
    id: i64,
    device_id: i64,
    alarm_type: String,
    triggered_value: Option<f64>,
    timestamp: DateTime<Utc>,
    acknowledged: bool,
    active: bool,
}

impl TryFrom<AlarmRow> for Alarm {
    type Error = Error;

    fn try_from(row: AlarmRow) -> Result<Self> {
        Ok(Alarm {
            id: row.id,
            device_id: row.device_id,
            alarm_type: row.alarm_type.parse().map_err(decode_error)?,
            triggered_value: row.triggered_value,
            timestamp: row.timestamp,
            acknowledged: row.acknowledged,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ManufacturerRow {
    id: i64,
    name: String,
}

impl From<ManufacturerRow> for Manufacturer {
    fn from(row: ManufacturerRow) -> Self {
        Manufacturer {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    actor: Option<String>,
    action: String,
    model_name: String,
    object_id: String,
    changes: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = Error;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEntry {
            id: row.id,
            actor: row.actor,
            action: row.action.parse().map_err(decode_error)?,
            model_name: row.model_name,
            object_id: row.object_id,
            changes: row.changes,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    count: i64,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    temp_avg: Option<f64>,
    hum_min: Option<f64>,
    hum_max: Option<f64>,
    hum_avg: Option<f64>,
}

fn decode_error(msg: String) -> Error {
    Error::Database(sqlx::Error::Decode(msg.into()))
}

/// Maps constraint violations to domain errors: unique violations become
/// conflicts, foreign key violations on `device_id` become a missing device.
fn map_constraint(err: sqlx::Error, device_id: Option<DeviceId>) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                let constraint = db_err.constraint().unwrap_or("unique constraint");
                return Error::Conflict(format!("duplicate value violates {}", constraint));
            }
            Some("23503") => {
                if let Some(id) = device_id {
                    return Error::not_found("Device", id);
                }
            }
            _ => {}
        }
    }
    Error::Database(err)
}

/// Opens `alarm` unless an open alarm of the same device and type exists.
/// Check and insert are one statement; the partial unique index turns a
/// concurrent duplicate into a no-op.
async fn insert_open_alarm<'e, E>(executor: E, alarm: &NewAlarm) -> Result<Option<Alarm>>
where
    E: Executor<'e, Database = Postgres>,
{
    let query = format!(
        "INSERT INTO alarms (device_id, alarm_type, triggered_value, ts) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (device_id, alarm_type) WHERE acknowledged = FALSE AND active = TRUE \
         DO NOTHING \
         RETURNING {ALARM_COLUMNS}"
    );

    sqlx::query_as::<_, AlarmRow>(&query)
        .bind(alarm.device_id)
        .bind(alarm.alarm_type.as_str())
        .bind(alarm.triggered_value)
        .bind(alarm.timestamp)
        .fetch_optional(executor)
        .await
        .map_err(|e| map_constraint(e, Some(alarm.device_id)))?
        .map(Alarm::try_from)
        .transpose()
}

#[async_trait]
impl Store for PgStore {
    async fn create_device(&self, device: &NewDevice) -> Result<Device> {
        let query = format!(
            "INSERT INTO devices (name, code, location, status, temperature_min, temperature_max, \
             humidity_min, humidity_max, model, manufacturer, serial_number, firmware_version, \
             alert_temp_min, alert_temp_max, alert_humidity_min, alert_humidity_max, \
             logging_interval_minutes, button_stop_enabled, mute_button_enabled, \
             alarm_tone_enabled, storage_mode) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21) \
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(&device.name)
            .bind(&device.code)
            .bind(&device.location)
            .bind(device.status.as_str())
            .bind(device.temperature_min)
            .bind(device.temperature_max)
            .bind(device.humidity_min)
            .bind(device.humidity_max)
            .bind(&device.model)
            .bind(&device.manufacturer)
            .bind(&device.serial_number)
            .bind(&device.firmware_version)
            .bind(device.alert_temp_min)
            .bind(device.alert_temp_max)
            .bind(device.alert_humidity_min)
            .bind(device.alert_humidity_max)
            .bind(device.logging_interval_minutes)
            .bind(device.button_stop_enabled)
            .bind(device.mute_button_enabled)
            .bind(device.alarm_tone_enabled)
            .bind(&device.storage_mode)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint(e, None))?;

        row.try_into()
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1");
        sqlx::query_as::<_, DeviceRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Device::try_from)
            .transpose()
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id");
        sqlx::query_as::<_, DeviceRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Device::try_from)
            .collect()
    }

    async fn update_device(
        &self,
        id: DeviceId,
        update: &DeviceUpdate,
        check: &(dyn for<'d> Fn(&'d Device) -> Result<()> + Send + Sync),
    ) -> Result<Option<Device>> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query_as::<_, DeviceRow>(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut device = Device::try_from(row)?;
        device.apply(update);
        check(&device)?;

        sqlx::query(
            "UPDATE devices SET name = $2, code = $3, location = $4, status = $5, \
             temperature_min = $6, temperature_max = $7, humidity_min = $8, humidity_max = $9, \
             model = $10, manufacturer = $11, serial_number = $12, firmware_version = $13, \
             alert_temp_min = $14, alert_temp_max = $15, alert_humidity_min = $16, \
             alert_humidity_max = $17, logging_interval_minutes = $18, \
             button_stop_enabled = $19, mute_button_enabled = $20, alarm_tone_enabled = $21, \
             storage_mode = $22 \
             WHERE id = $1",
        )
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.code)
        .bind(&device.location)
        .bind(device.status.as_str())
        .bind(device.temperature_min)
        .bind(device.temperature_max)
        .bind(device.humidity_min)
        .bind(device.humidity_max)
        .bind(&device.model)
        .bind(&device.manufacturer)
        .bind(&device.serial_number)
        .bind(&device.firmware_version)
        .bind(device.alert_temp_min)
        .bind(device.alert_temp_max)
        .bind(device.alert_humidity_min)
        .bind(device.alert_humidity_max)
        .bind(device.logging_interval_minutes)
        .bind(device.button_stop_enabled)
        .bind(device.mute_button_enabled)
        .bind(device.alarm_tone_enabled)
        .bind(&device.storage_mode)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_constraint(e, None))?;

        tx.commit().await?;
        Ok(Some(device))
    }

    async fn delete_device(&self, id: DeviceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_reading(
        &self,
        reading: &NewReading,
        timestamp: DateTime<Utc>,
        evaluate: &(dyn for<'d> Fn(&'d Device, &'d Reading) -> Vec<NewAlarm> + Send + Sync),
    ) -> Result<RecordedReading> {
        let mut tx = self.pool.begin().await?;

        // FOR SHARE holds off concurrent device updates until commit.
        let select = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR SHARE");
        let device = match sqlx::query_as::<_, DeviceRow>(&select)
            .bind(reading.device_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => Device::try_from(row)?,
            None => return Err(Error::not_found("Device", reading.device_id)),
        };

        let insert = format!(
            "INSERT INTO readings (device_id, ts, temperature, humidity) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (device_id, ts) DO NOTHING \
             RETURNING {READING_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, ReadingRow>(&insert)
            .bind(reading.device_id)
            .bind(timestamp)
            .bind(reading.temperature)
            .bind(reading.humidity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_constraint(e, Some(reading.device_id)))?;

        let Some(row) = inserted else {
            let select_existing = format!(
                "SELECT {READING_COLUMNS} FROM readings WHERE device_id = $1 AND ts = $2"
            );
            let existing: Reading = sqlx::query_as::<_, ReadingRow>(&select_existing)
                .bind(reading.device_id)
                .bind(timestamp)
                .fetch_one(&mut *tx)
                .await?
                .into();
            if !reading.same_values(&existing) {
                return Err(timestamp_taken(reading.device_id, timestamp));
            }
            return Ok(RecordedReading {
                reading: existing,
                created: false,
                opened: Vec::new(),
                suppressed: Vec::new(),
            });
        };

        let stored = Reading::from(row);
        let mut opened = Vec::new();
        let mut suppressed = Vec::new();
        for candidate in evaluate(&device, &stored) {
            match insert_open_alarm(&mut *tx, &candidate).await? {
                Some(alarm) => opened.push(alarm),
                None => suppressed.push(candidate.alarm_type),
            }
        }

        tx.commit().await?;
        Ok(RecordedReading {
            reading: stored,
            created: true,
            opened,
            suppressed,
        })
    }

    async fn get_reading(&self, id: ReadingId) -> Result<Option<Reading>> {
        let query = format!("SELECT {READING_COLUMNS} FROM readings WHERE id = $1");
        let row = sqlx::query_as::<_, ReadingRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Reading::from))
    }

    async fn list_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {READING_COLUMNS} FROM readings WHERE TRUE"));

        if let Some(device_id) = query.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(start) = query.start {
            builder.push(" AND ts >= ").push_bind(start);
        }
        if let Some(end) = query.end {
            builder.push(" AND ts <= ").push_bind(end);
        }
        builder
            .push(" ORDER BY ts ASC, id ASC LIMIT ")
            .push_bind(query.limit())
            .push(" OFFSET ")
            .push_bind(query.offset());

        let rows = builder
            .build_query_as::<ReadingRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn reading_summary(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<ReadingSummary>> {
        let row = sqlx::query_as::<_, SummaryRow>(
            "SELECT COUNT(*) AS count, MIN(ts) AS first, MAX(ts) AS last, \
             MIN(temperature) AS temp_min, MAX(temperature) AS temp_max, \
             AVG(temperature) AS temp_avg, MIN(humidity) AS hum_min, \
             MAX(humidity) AS hum_max, AVG(humidity) AS hum_avg \
             FROM readings \
             WHERE device_id = $1 \
             AND ($2::timestamptz IS NULL OR ts >= $2) \
             AND ($3::timestamptz IS NULL OR ts <= $3)",
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        let summary = (|| {
            Some(ReadingSummary {
                device_id,
                count: row.count,
                first: row.first?,
                last: row.last?,
                temperature: Stats {
                    min: row.temp_min?,
                    max: row.temp_max?,
                    avg: row.temp_avg?,
                },
                humidity: Stats {
                    min: row.hum_min?,
                    max: row.hum_max?,
                    avg: row.hum_avg?,
                },
            })
        })();
        Ok(summary.filter(|s| s.count > 0))
    }

    async fn open_alarm_if_absent(&self, alarm: &NewAlarm) -> Result<Option<Alarm>> {
        insert_open_alarm(&self.pool, alarm).await
    }

    async fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>> {
        let query = format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE id = $1");
        sqlx::query_as::<_, AlarmRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Alarm::try_from)
            .transpose()
    }

    async fn list_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ALARM_COLUMNS} FROM alarms WHERE TRUE"));

        if let Some(device_id) = filter.device {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(acknowledged) = filter.acknowledged {
            builder.push(" AND acknowledged = ").push_bind(acknowledged);
        }
        if let Some(active) = filter.active {
            builder.push(" AND active = ").push_bind(active);
        }
        builder.push(" ORDER BY ts DESC, id DESC");

        builder
            .build_query_as::<AlarmRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Alarm::try_from)
            .collect()
    }

    async fn acknowledge_alarm(&self, id: AlarmId) -> Result<AckOutcome> {
        let query = format!(
            "UPDATE alarms SET acknowledged = TRUE \
             WHERE id = $1 AND acknowledged = FALSE \
             RETURNING {ALARM_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, AlarmRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(AckOutcome::Acknowledged(row.try_into()?));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM alarms WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            AckOutcome::AlreadyAcknowledged
        } else {
            AckOutcome::NotFound
        })
    }

    async fn create_manufacturer(&self, manufacturer: &NewManufacturer) -> Result<Manufacturer> {
        let query = format!(
            "INSERT INTO manufacturers (name) VALUES ($1) RETURNING {MANUFACTURER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ManufacturerRow>(&query)
            .bind(&manufacturer.name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint(e, None))?;
        Ok(row.into())
    }

    async fn get_manufacturer(&self, id: ManufacturerId) -> Result<Option<Manufacturer>> {
        let query = format!("SELECT {MANUFACTURER_COLUMNS} FROM manufacturers WHERE id = $1");
        let row = sqlx::query_as::<_, ManufacturerRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Manufacturer::from))
    }

    async fn list_manufacturers(&self) -> Result<Vec<Manufacturer>> {
        let query = format!("SELECT {MANUFACTURER_COLUMNS} FROM manufacturers ORDER BY id");
        let rows = sqlx::query_as::<_, ManufacturerRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Manufacturer::from).collect())
    }

    async fn update_manufacturer(
        &self,
        id: ManufacturerId,
        manufacturer: &NewManufacturer,
    ) -> Result<Option<Manufacturer>> {
        let query = format!(
            "UPDATE manufacturers SET name = $2 WHERE id = $1 RETURNING {MANUFACTURER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ManufacturerRow>(&query)
            .bind(id)
            .bind(&manufacturer.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_constraint(e, None))?;
        Ok(row.map(Manufacturer::from))
    }

    async fn delete_manufacturer(&self, id: ManufacturerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM manufacturers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_audit(&self, entry: &NewAuditEntry) -> Result<AuditEntry> {
        let query = format!(
            "INSERT INTO audit_log (actor, action, model_name, object_id, changes) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {AUDIT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AuditRow>(&query)
            .bind(&entry.actor)
            .bind(entry.action.as_str())
            .bind(entry.model_name)
            .bind(&entry.object_id)
            .bind(&entry.changes)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn list_audit(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_log ORDER BY ts DESC, id DESC LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(query.limit())
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }
}
