//! Module that contains the reading type served to the dashboard and archived as records.
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f64 = 25.0;
pub const DEFAULT_HUMIDITY: f64 = 60.0;
pub const DEFAULT_SOIL_MOISTURE: f64 = 30.0;
pub const DEFAULT_SOIL_PH: f64 = 6.5;
pub const DEFAULT_LIGHT_INTENSITY: f64 = 500.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
/// ISO-8601 measurement time, with or without a UTC offset.
///
/// The form found in the document is kept so it is written back unchanged.
pub enum ReadingTime {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Snapshot of the environmental values measured around the irrigated plot.
///
/// Every measurement is required when deserializing. A document missing any of them is
/// rejected as a whole instead of being merged with defaults.
pub struct Reading {
    /// Temperature value in celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Soil moisture in percent.
    pub soil_moisture: f64,
    /// Soil pH value.
    #[serde(rename = "soilPH")]
    pub soil_ph: f64,
    /// Illuminance value in lux.
    pub light_intensity: f64,
    /// Set when the readings were flagged as anomalous.
    pub anomaly: bool,
    /// Time the values were measured, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<ReadingTime>,
}

impl Default for Reading {
    fn default() -> Self {
        Reading {
            temperature: DEFAULT_TEMPERATURE,
            humidity: DEFAULT_HUMIDITY,
            soil_moisture: DEFAULT_SOIL_MOISTURE,
            soil_ph: DEFAULT_SOIL_PH,
            light_intensity: DEFAULT_LIGHT_INTENSITY,
            anomaly: false,
            timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_dashboard_field_names() {
        let json = serde_json::to_value(Reading::default()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "temperature": 25.0,
                "humidity": 60.0,
                "soilMoisture": 30.0,
                "soilPH": 6.5,
                "lightIntensity": 500.0,
                "anomaly": false
            })
        );
    }

    #[test]
    fn parses_timestamp_with_offset() {
        let reading: Reading = serde_json::from_str(
            r#"{"temperature": 21.5, "humidity": 48.0, "soilMoisture": 33.1, "soilPH": 6.8,
                "lightIntensity": 730.0, "anomaly": true,
                "timestamp": "2024-05-01T08:30:00+02:00"}"#,
        )
        .unwrap();

        match reading.timestamp {
            Some(ReadingTime::Zoned(timestamp)) => {
                assert_eq!(timestamp.to_rfc3339(), "2024-05-01T08:30:00+02:00")
            }
            other => panic!("expected a zoned timestamp, got {:?}", other),
        }
        assert!(reading.anomaly);
    }

    #[test]
    fn parses_timestamp_without_offset() {
        let reading: Reading = serde_json::from_str(
            r#"{"temperature": 31.0, "humidity": 48.0, "soilMoisture": 33.1, "soilPH": 6.8,
                "lightIntensity": 730.0, "anomaly": true, "timestamp": "2024-06-02T14:00:00"}"#,
        )
        .unwrap();

        assert_eq!(reading.temperature, 31.0);
        match reading.timestamp {
            Some(ReadingTime::Local(timestamp)) => {
                assert_eq!(timestamp.to_string(), "2024-06-02 14:00:00")
            }
            other => panic!("expected a local timestamp, got {:?}", other),
        }
        assert_eq!(
            serde_json::to_value(&reading).unwrap()["timestamp"],
            "2024-06-02T14:00:00"
        );
    }

    #[test]
    fn rejects_timestamp_that_is_not_iso_8601() {
        let result = serde_json::from_str::<Reading>(
            r#"{"temperature": 21.5, "humidity": 48.0, "soilMoisture": 33.1, "soilPH": 6.8,
                "lightIntensity": 730.0, "anomaly": false, "timestamp": "yesterday"}"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn full_precision_values_survive_json() {
        let reading = Reading {
            temperature: 1.0715660391465826e-75,
            humidity: 0.30000000000000004,
            soil_moisture: 33.333333333333336,
            soil_ph: 6.8999999999999995,
            light_intensity: 123456.78901234567,
            anomaly: false,
            timestamp: None,
        };

        let json = serde_json::to_string(&reading).unwrap();
        let parsed: Reading = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.temperature.to_bits(), reading.temperature.to_bits());
        assert_eq!(parsed, reading);
    }

    #[test]
    fn rejects_document_with_missing_measurement() {
        let result = serde_json::from_str::<Reading>(
            r#"{"temperature": 21.5, "humidity": 48.0, "soilMoisture": 33.1, "anomaly": false}"#,
        );

        assert!(result.is_err());
    }
}
