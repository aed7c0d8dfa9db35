use crate::errors::{Error, Result};
use crate::model::{Device, NewManufacturer, NewReading};

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const MANUFACTURER_NAME_MAX: usize = 255;

/// Validates an incoming reading before it reaches the store or the evaluator
pub fn validate_reading(reading: &NewReading) -> Result<()> {
    check_range("Temperature", reading.temperature, TEMP_MIN, TEMP_MAX)?;
    check_range("Humidity", reading.humidity, HUMIDITY_MIN, HUMIDITY_MAX)?;
    Ok(())
}

/// Validates a device as it would be stored, after creation defaults or an
/// update have been applied.
pub fn validate_device(device: &Device) -> Result<()> {
    if device.name.trim().is_empty() {
        return Err(Error::Validation("Device name cannot be empty".to_string()));
    }

    if device.code.trim().is_empty() {
        return Err(Error::Validation("Device code cannot be empty".to_string()));
    }

    if device.logging_interval_minutes < 1 {
        return Err(Error::Validation(format!(
            "Logging interval must be at least 1 minute, got {}",
            device.logging_interval_minutes
        )));
    }

    let pairs = [
        ("temperature", device.temperature_min, device.temperature_max),
        ("humidity", device.humidity_min, device.humidity_max),
        ("alert temperature", device.alert_temp_min, device.alert_temp_max),
        ("alert humidity", device.alert_humidity_min, device.alert_humidity_max),
    ];
    for (label, min, max) in pairs {
        for value in [min, max].into_iter().flatten() {
            if !value.is_finite() {
                return Err(Error::Validation(format!(
                    "The {} limits must be finite numbers",
                    label
                )));
            }
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(Error::Validation(format!(
                    "The {} minimum {} is above the maximum {}",
                    label, min, max
                )));
            }
        }
    }

    Ok(())
}

pub fn validate_manufacturer(manufacturer: &NewManufacturer) -> Result<()> {
    let name = manufacturer.name.trim();
    if name.is_empty() {
        return Err(Error::Validation(
            "Manufacturer name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MANUFACTURER_NAME_MAX {
        return Err(Error::Validation(format!(
            "Manufacturer name is longer than {} characters",
            MANUFACTURER_NAME_MAX
        )));
    }
    Ok(())
}

fn check_range(label: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{} must be a finite number", label)));
    }
    if value < min || value > max {
        return Err(Error::Validation(format!(
            "{} {} out of range [{}, {}]",
            label, value, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDevice;
    use chrono::Utc;

    fn reading(temperature: f64, humidity: f64) -> NewReading {
        NewReading {
            device_id: 1,
            temperature,
            humidity,
            timestamp: None,
        }
    }

    #[test]
    fn test_valid_reading() {
        assert!(validate_reading(&reading(25.0, 60.0)).is_ok());
        assert!(validate_reading(&reading(-50.0, 0.0)).is_ok());
        assert!(validate_reading(&reading(100.0, 100.0)).is_ok());
    }

    #[test]
    fn test_invalid_temperature() {
        assert!(validate_reading(&reading(150.0, 60.0)).is_err());
        assert!(validate_reading(&reading(f64::NAN, 60.0)).is_err());
    }

    #[test]
    fn test_invalid_humidity() {
        assert!(validate_reading(&reading(25.0, 150.0)).is_err());
        assert!(validate_reading(&reading(25.0, -1.0)).is_err());
        assert!(validate_reading(&reading(25.0, f64::INFINITY)).is_err());
    }

    #[test]
    fn test_device_limits() {
        let valid = NewDevice {
            alert_temp_min: Some(10.0),
            alert_temp_max: Some(30.0),
            ..NewDevice::named("Fridge", "F-1")
        }
        .into_device(1, Utc::now());
        assert!(validate_device(&valid).is_ok());

        let mut inverted = valid.clone();
        inverted.alert_temp_min = Some(40.0);
        assert!(matches!(validate_device(&inverted), Err(Error::Validation(_))));

        let mut one_sided = valid.clone();
        one_sided.humidity_min = Some(90.0);
        assert!(validate_device(&one_sided).is_ok());
    }

    #[test]
    fn test_empty_device_code() {
        let device = NewDevice::named("Fridge", " ").into_device(1, Utc::now());
        assert!(validate_device(&device).is_err());
    }

    #[test]
    fn test_manufacturer_name() {
        assert!(validate_manufacturer(&NewManufacturer::named("Acme")).is_ok());
        assert!(validate_manufacturer(&NewManufacturer::named("  ")).is_err());
        assert!(validate_manufacturer(&NewManufacturer::named("x".repeat(256))).is_err());
    }

    #[test]
    fn test_logging_interval() {
        let mut device = NewDevice::named("Fridge", "F-1").into_device(1, Utc::now());
        device.logging_interval_minutes = 0;
        assert!(validate_device(&device).is_err());
    }
}
