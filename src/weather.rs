//! Third-party weather lookup used to fill an empty state store.
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::reading::{Reading, ReadingTime};
use crate::store::ReadingSource;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the weather lookup.
pub struct WeatherParameters {
    /// URL answering a GET with a JSON object that has `temperature` and `humidity` fields.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Deserialize, Debug)]
struct WeatherResponse {
    temperature: f64,
    humidity: f64,
}

impl WeatherResponse {
    fn into_reading(self) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: Some(ReadingTime::Zoned(Local::now().fixed_offset())),
            ..Reading::default()
        }
    }
}

/// Blocking weather client.
///
/// Must be created and used outside of the async runtime, it is owned by the archiver thread.
pub struct WeatherLookup {
    client: reqwest::blocking::Client,
    url: String,
}

impl WeatherLookup {
    pub fn new(params: &WeatherParameters) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()
            .map_err(|err| StoreError::Source(err.to_string()))?;

        Ok(WeatherLookup {
            client,
            url: params.url.clone(),
        })
    }
}

impl ReadingSource for WeatherLookup {
    fn fetch(&self) -> Result<Reading, StoreError> {
        log::debug!(target: "irrigd::weather", "Requesting weather from \'{}\'", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| StoreError::Source(err.to_string()))?;

        let body = response
            .text()
            .map_err(|err| StoreError::Source(err.to_string()))?;

        parse_weather(&body)
    }
}

fn parse_weather(body: &str) -> Result<Reading, StoreError> {
    serde_json::from_str::<WeatherResponse>(body)
        .map(WeatherResponse::into_reading)
        .map_err(|err| StoreError::Source(format!("Unexpected weather response: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{DEFAULT_LIGHT_INTENSITY, DEFAULT_SOIL_MOISTURE, DEFAULT_SOIL_PH};

    #[test]
    fn weather_fills_temperature_and_humidity() {
        let body = r#"{"temperature": 31.2, "humidity": 22.0, "wind": 4.1}"#;
        let reading = parse_weather(body).unwrap();

        assert_eq!(reading.temperature, 31.2);
        assert_eq!(reading.humidity, 22.0);
        assert_eq!(reading.soil_moisture, DEFAULT_SOIL_MOISTURE);
        assert_eq!(reading.soil_ph, DEFAULT_SOIL_PH);
        assert_eq!(reading.light_intensity, DEFAULT_LIGHT_INTENSITY);
        assert!(!reading.anomaly);
        assert!(reading.timestamp.is_some());
    }

    #[test]
    fn incomplete_weather_is_a_source_error() {
        match parse_weather(r#"{"temperature": 31.2}"#) {
            Err(StoreError::Source(message)) => assert!(message.contains("humidity")),
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn unreachable_weather_service_is_a_source_error() {
        let lookup = WeatherLookup::new(&WeatherParameters {
            url: String::from("http://127.0.0.1:9/weather"),
            timeout_secs: 1,
        })
        .unwrap();

        assert!(matches!(lookup.fetch(), Err(StoreError::Source(_))));
    }
}
