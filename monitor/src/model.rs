use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub type DeviceId = i64;
pub type ReadingId = i64;
pub type AlarmId = i64;
pub type ManufacturerId = i64;

const DEFAULT_LOGGING_INTERVAL_MINUTES: i32 = 15;
const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    On,
    #[default]
    Off,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::On => "on",
            DeviceStatus::Off => "off",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(DeviceStatus::On),
            "off" => Ok(DeviceStatus::Off),
            other => Err(format!("unknown device status '{}'", other)),
        }
    }
}

/// Alarm kinds. The string forms are stable identifiers shared with
/// reporting and audit consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmType {
    #[serde(rename = "TEMP_HI")]
    TempHigh,
    #[serde(rename = "TEMP_LO")]
    TempLow,
    #[serde(rename = "HUM_HI")]
    HumidityHigh,
    #[serde(rename = "HUM_LO")]
    HumidityLow,
    /// Device switched off (disconnected).
    #[serde(rename = "DC")]
    Disconnected,
    /// Stop button disabled.
    #[serde(rename = "SD")]
    StopDisabled,
    /// Mute button disabled.
    #[serde(rename = "MD")]
    MuteDisabled,
}

impl AlarmType {
    pub const ALL: [AlarmType; 7] = [
        AlarmType::TempHigh,
        AlarmType::TempLow,
        AlarmType::HumidityHigh,
        AlarmType::HumidityLow,
        AlarmType::Disconnected,
        AlarmType::StopDisabled,
        AlarmType::MuteDisabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmType::TempHigh => "TEMP_HI",
            AlarmType::TempLow => "TEMP_LO",
            AlarmType::HumidityHigh => "HUM_HI",
            AlarmType::HumidityLow => "HUM_LO",
            AlarmType::Disconnected => "DC",
            AlarmType::StopDisabled => "SD",
            AlarmType::MuteDisabled => "MD",
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlarmType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown alarm type '{}'", s))
    }
}

/// A monitored device and its alarm configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub code: String,
    pub location: String,
    pub status: DeviceStatus,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub alert_temp_min: Option<f64>,
    pub alert_temp_max: Option<f64>,
    pub alert_humidity_min: Option<f64>,
    pub alert_humidity_max: Option<f64>,
    pub logging_interval_minutes: i32,
    pub button_stop_enabled: bool,
    pub mute_button_enabled: bool,
    pub alarm_tone_enabled: bool,
    pub storage_mode: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    pub fn is_on(&self) -> bool {
        self.status == DeviceStatus::On
    }

    /// Applies a partial update in place. Fields absent from the update are
    /// left untouched; nullable fields can be cleared with an explicit null.
    pub fn apply(&mut self, update: &DeviceUpdate) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut self.name, &update.name);
        set(&mut self.code, &update.code);
        set(&mut self.location, &update.location);
        set(&mut self.status, &update.status);
        set(&mut self.temperature_min, &update.temperature_min);
        set(&mut self.temperature_max, &update.temperature_max);
        set(&mut self.humidity_min, &update.humidity_min);
        set(&mut self.humidity_max, &update.humidity_max);
        set(&mut self.model, &update.model);
        set(&mut self.manufacturer, &update.manufacturer);
        set(&mut self.serial_number, &update.serial_number);
        set(&mut self.firmware_version, &update.firmware_version);
        set(&mut self.alert_temp_min, &update.alert_temp_min);
        set(&mut self.alert_temp_max, &update.alert_temp_max);
        set(&mut self.alert_humidity_min, &update.alert_humidity_min);
        set(&mut self.alert_humidity_max, &update.alert_humidity_max);
        set(&mut self.logging_interval_minutes, &update.logging_interval_minutes);
        set(&mut self.button_stop_enabled, &update.button_stop_enabled);
        set(&mut self.mute_button_enabled, &update.mute_button_enabled);
        set(&mut self.alarm_tone_enabled, &update.alarm_tone_enabled);
        set(&mut self.storage_mode, &update.storage_mode);
    }
}

/// Payload for device creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub code: String,
    #[serde(default = "unknown")]
    pub location: String,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub temperature_min: Option<f64>,
    #[serde(default)]
    pub temperature_max: Option<f64>,
    #[serde(default)]
    pub humidity_min: Option<f64>,
    #[serde(default)]
    pub humidity_max: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub alert_temp_min: Option<f64>,
    #[serde(default)]
    pub alert_temp_max: Option<f64>,
    #[serde(default)]
    pub alert_humidity_min: Option<f64>,
    #[serde(default)]
    pub alert_humidity_max: Option<f64>,
    #[serde(default = "default_logging_interval")]
    pub logging_interval_minutes: i32,
    #[serde(default = "enabled")]
    pub button_stop_enabled: bool,
    #[serde(default = "enabled")]
    pub mute_button_enabled: bool,
    #[serde(default = "enabled")]
    pub alarm_tone_enabled: bool,
    #[serde(default)]
    pub storage_mode: Option<String>,
}

impl NewDevice {
    /// A switched-off device with default settings and no thresholds.
    pub fn named(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            location: unknown(),
            logging_interval_minutes: DEFAULT_LOGGING_INTERVAL_MINUTES,
            button_stop_enabled: true,
            mute_button_enabled: true,
            alarm_tone_enabled: true,
            ..Default::default()
        }
    }

    pub fn into_device(self, id: DeviceId, created_at: DateTime<Utc>) -> Device {
        Device {
            id,
            name: self.name,
            code: self.code,
            location: self.location,
            status: self.status,
            temperature_min: self.temperature_min,
            temperature_max: self.temperature_max,
            humidity_min: self.humidity_min,
            humidity_max: self.humidity_max,
            model: self.model,
            manufacturer: self.manufacturer,
            serial_number: self.serial_number,
            firmware_version: self.firmware_version,
            alert_temp_min: self.alert_temp_min,
            alert_temp_max: self.alert_temp_max,
            alert_humidity_min: self.alert_humidity_min,
            alert_humidity_max: self.alert_humidity_max,
            logging_interval_minutes: self.logging_interval_minutes,
            button_stop_enabled: self.button_stop_enabled,
            mute_button_enabled: self.mute_button_enabled,
            alarm_tone_enabled: self.alarm_tone_enabled,
            storage_mode: self.storage_mode,
            created_at,
        }
    }
}

/// Partial device update. `Some(None)` on a nullable field clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub location: Option<String>,
    pub status: Option<DeviceStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub temperature_min: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub temperature_max: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub humidity_min: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub humidity_max: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub model: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub manufacturer: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub serial_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub firmware_version: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub alert_temp_min: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub alert_temp_max: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub alert_humidity_min: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub alert_humidity_max: Option<Option<f64>>,
    pub logging_interval_minutes: Option<i32>,
    pub button_stop_enabled: Option<bool>,
    pub mute_button_enabled: Option<bool>,
    pub alarm_tone_enabled: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub storage_mode: Option<Option<String>>,
}

impl DeviceUpdate {
    pub fn status(status: DeviceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// A stored measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub device_id: DeviceId,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

/// An incoming measurement. A missing timestamp means "now".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReading {
    pub device_id: DeviceId,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewReading {
    /// Whether a stored row carries the same measurement. Used to tell a
    /// replayed message from a different reading claiming the same instant.
    pub fn same_values(&self, stored: &Reading) -> bool {
        self.temperature == stored.temperature && self.humidity == stored.humidity
    }
}

/// Outcome of storing a reading together with the alarms it raised
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedReading {
    pub reading: Reading,
    /// False when an identical reading was already stored
    pub created: bool,
    pub opened: Vec<Alarm>,
    /// Candidates skipped because an open alarm of that type exists
    pub suppressed: Vec<AlarmType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingQuery {
    pub device_id: Option<DeviceId>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ReadingQuery {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(0, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        self.device_id.map_or(true, |id| reading.device_id == id)
            && self.start.map_or(true, |start| reading.timestamp >= start)
            && self.end.map_or(true, |end| reading.timestamp <= end)
    }
}

/// REST API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub data: Vec<Reading>,
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub device_id: DeviceId,
    pub alarm_type: AlarmType,
    pub triggered_value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub active: bool,
}

impl Alarm {
    /// Open alarms are the ones subject to deduplication.
    pub fn is_open(&self) -> bool {
        !self.acknowledged && self.active
    }

    pub fn user_message(&self) -> String {
        let value = self
            .triggered_value
            .map(|v| format!(": {:.1}", v))
            .unwrap_or_default();
        match self.alarm_type {
            AlarmType::TempHigh => format!("Temperature above alert limit{}", value),
            AlarmType::TempLow => format!("Temperature below alert limit{}", value),
            AlarmType::HumidityHigh => format!("Humidity above alert limit{}", value),
            AlarmType::HumidityLow => format!("Humidity below alert limit{}", value),
            AlarmType::Disconnected => "Device is switched off".to_string(),
            AlarmType::StopDisabled => "Stop button is disabled".to_string(),
            AlarmType::MuteDisabled => "Mute button is disabled".to_string(),
        }
    }
}

/// Alarm as returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct AlarmView {
    #[serde(flatten)]
    pub alarm: Alarm,
    pub device_code: String,
    pub user_message: String,
}

impl AlarmView {
    pub fn new(alarm: Alarm, device_code: impl Into<String>) -> Self {
        let user_message = alarm.user_message();
        Self {
            alarm,
            device_code: device_code.into(),
            user_message,
        }
    }
}

/// An alarm about to be opened, pending the dedup check
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlarm {
    pub device_id: DeviceId,
    pub alarm_type: AlarmType,
    pub triggered_value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl NewAlarm {
    pub fn into_alarm(self, id: AlarmId) -> Alarm {
        Alarm {
            id,
            device_id: self.device_id,
            alarm_type: self.alarm_type,
            triggered_value: self.triggered_value,
            timestamp: self.timestamp,
            acknowledged: false,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmFilter {
    pub device: Option<DeviceId>,
    pub acknowledged: Option<bool>,
    pub active: Option<bool>,
}

impl AlarmFilter {
    pub fn matches(&self, alarm: &Alarm) -> bool {
        self.device.map_or(true, |id| alarm.device_id == id)
            && self.acknowledged.map_or(true, |a| alarm.acknowledged == a)
            && self.active.map_or(true, |a| alarm.active == a)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Acknowledged(Alarm),
    AlreadyAcknowledged,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    pub id: ManufacturerId,
    pub name: String,
}

/// Payload for creating or renaming a manufacturer
#[derive(Debug, Clone, Deserialize)]
pub struct NewManufacturer {
    pub name: String,
}

impl NewManufacturer {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    AckAlarm,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::AckAlarm => "ACK_ALARM",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "ACK_ALARM" => Ok(AuditAction::AckAlarm),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: Option<String>,
    pub action: AuditAction,
    pub model_name: String,
    pub object_id: String,
    pub changes: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor: Option<String>,
    pub action: AuditAction,
    pub model_name: &'static str,
    pub object_id: String,
    pub changes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(0, 500)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Who is performing a mutating operation. Passed explicitly into every
/// write so audit entries never depend on ambient request state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn anonymous() -> Self {
        Actor(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Actor(Some(name.into()))
    }

    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn default_logging_interval() -> i32 {
    DEFAULT_LOGGING_INTERVAL_MINUTES
}

fn enabled() -> bool {
    true
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}
