use crate::domain::ambient::Coordinates;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const AMBIENT_JSON: &str = "ambient.json";
const DEFAULT_FORECAST_ENDPOINT: &str = "https://api.open-meteo.com/v1/forecast";
const DEFAULT_GEOCODING_ENDPOINT: &str = "https://geocoding-api.open-meteo.com/v1/reverse";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: String,
    #[serde(default)]
    pub greeting_name: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        self.timezone.trim().parse::<Tz>().map_err(|error| {
            InfraError::InvalidConfig(format!("unknown timezone '{}': {error}", self.timezone))
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<ConfiguredLocation> for Coordinates {
    fn from(location: ConfiguredLocation) -> Self {
        Coordinates {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AmbientConfig {
    #[serde(default)]
    pub location: Option<ConfiguredLocation>,
    pub forecast_endpoint: String,
    pub geocoding_endpoint: String,
    pub location_timeout_seconds: u64,
    pub location_max_age_seconds: u64,
    pub weather_timeout_seconds: u64,
}

impl AmbientConfig {
    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_seconds)
    }

    pub fn location_max_age(&self) -> Duration {
        Duration::from_secs(self.location_max_age_seconds)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_secs(self.weather_timeout_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub ambient: AmbientConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Ambient Dash",
                "timezone": "UTC",
                "greetingName": null,
                "logLevel": "info"
            }),
        ),
        (
            AMBIENT_JSON,
            serde_json::json!({
                "schema": 1,
                "location": null,
                "forecastEndpoint": DEFAULT_FORECAST_ENDPOINT,
                "geocodingEndpoint": DEFAULT_GEOCODING_ENDPOINT,
                "locationTimeoutSeconds": 5,
                "locationMaxAgeSeconds": 60,
                "weatherTimeoutSeconds": 5
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_typed<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    let value = read_config(path)?;
    serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid structure in {}: {error}", path.display()))
    })
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app: AppConfig = read_typed(&config_dir.join(APP_JSON))?;
    app.time_zone()?;
    let ambient: AmbientConfig = read_typed(&config_dir.join(AMBIENT_JSON))?;
    if ambient.location_timeout_seconds == 0 || ambient.weather_timeout_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "ambient timeouts must be > 0 seconds".to_string(),
        ));
    }
    if let Some(location) = ambient.location {
        if !Coordinates::from(location).is_valid() {
            return Err(InfraError::InvalidConfig(format!(
                "ambient location out of range: latitude {}, longitude {}",
                location.latitude, location.longitude
            )));
        }
    }
    Ok(ConfigBundle { app, ambient })
}
