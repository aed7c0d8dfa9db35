//! Threshold evaluation. Pure: maps a device's alert limits and one
//! measurement to the alarm conditions it violates.

use crate::model::{AlarmType, Device};

/// A potential alarm, not yet checked against the open alarms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub alarm_type: AlarmType,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlertLimits {
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
}

impl From<&Device> for AlertLimits {
    fn from(device: &Device) -> Self {
        Self {
            temp_min: device.alert_temp_min,
            temp_max: device.alert_temp_max,
            humidity_min: device.alert_humidity_min,
            humidity_max: device.alert_humidity_max,
        }
    }
}

/// Evaluates both dimensions independently. Per dimension the maximum is
/// checked first and the minimum only when the maximum did not fire, so a
/// reading yields at most one candidate per dimension.
pub fn evaluate(limits: &AlertLimits, temperature: f64, humidity: f64) -> Vec<Candidate> {
    [
        check_dimension(
            temperature,
            limits.temp_min,
            limits.temp_max,
            AlarmType::TempHigh,
            AlarmType::TempLow,
        ),
        check_dimension(
            humidity,
            limits.humidity_min,
            limits.humidity_max,
            AlarmType::HumidityHigh,
            AlarmType::HumidityLow,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Evaluates a measurement for a device. Devices that are switched off
/// produce no threshold alarms.
pub fn evaluate_for_device(device: &Device, temperature: f64, humidity: f64) -> Vec<Candidate> {
    if !device.is_on() {
        return Vec::new();
    }
    evaluate(&AlertLimits::from(device), temperature, humidity)
}

fn check_dimension(
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
    high: AlarmType,
    low: AlarmType,
) -> Option<Candidate> {
    let alarm_type = match (min, max) {
        (_, Some(max)) if value > max => high,
        (Some(min), _) if value < min => low,
        _ => return None,
    };
    Some(Candidate {
        alarm_type,
        value: Some(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceStatus, NewDevice};
    use chrono::Utc;

    fn limits() -> AlertLimits {
        AlertLimits {
            temp_min: Some(10.0),
            temp_max: Some(30.0),
            humidity_min: Some(20.0),
            humidity_max: Some(80.0),
        }
    }

    fn types(candidates: &[Candidate]) -> Vec<AlarmType> {
        candidates.iter().map(|c| c.alarm_type).collect()
    }

    #[test]
    fn test_temperature_thresholds() {
        assert_eq!(
            evaluate(&limits(), 35.0, 50.0),
            vec![Candidate {
                alarm_type: AlarmType::TempHigh,
                value: Some(35.0)
            }]
        );
        assert_eq!(
            evaluate(&limits(), 5.0, 50.0),
            vec![Candidate {
                alarm_type: AlarmType::TempLow,
                value: Some(5.0)
            }]
        );
        assert!(evaluate(&limits(), 20.0, 50.0).is_empty());
    }

    #[test]
    fn test_bounds_are_exclusive() {
        assert!(evaluate(&limits(), 30.0, 80.0).is_empty());
        assert!(evaluate(&limits(), 10.0, 20.0).is_empty());
    }

    #[test]
    fn test_one_candidate_per_dimension() {
        let both = evaluate(&limits(), 31.0, 10.0);
        assert_eq!(types(&both), vec![AlarmType::TempHigh, AlarmType::HumidityLow]);
        assert_eq!(both[1].value, Some(10.0));
    }

    #[test]
    fn test_max_wins_over_min_when_limits_overlap() {
        // With min above max a value can violate both; only the maximum fires.
        let inverted = AlertLimits {
            temp_min: Some(40.0),
            temp_max: Some(30.0),
            ..Default::default()
        };
        assert_eq!(types(&evaluate(&inverted, 35.0, 50.0)), vec![AlarmType::TempHigh]);
    }

    #[test]
    fn test_unset_limits_never_fire() {
        assert!(evaluate(&AlertLimits::default(), 99.0, 100.0).is_empty());

        let only_min = AlertLimits {
            humidity_min: Some(30.0),
            ..Default::default()
        };
        assert_eq!(types(&evaluate(&only_min, 20.0, 25.0)), vec![AlarmType::HumidityLow]);
    }

    #[test]
    fn test_switched_off_device_is_suppressed() {
        let mut device = NewDevice {
            alert_temp_max: Some(30.0),
            ..NewDevice::named("Fridge", "F-1")
        }
        .into_device(1, Utc::now());

        assert!(evaluate_for_device(&device, 50.0, 50.0).is_empty());

        device.status = DeviceStatus::On;
        assert_eq!(
            types(&evaluate_for_device(&device, 50.0, 50.0)),
            vec![AlarmType::TempHigh]
        );
    }
}
