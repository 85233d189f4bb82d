use crate::domain::ambient::Coordinates;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

const CURRENT_FIELDS: &str = "temperature_2m,weather_code,wind_speed_10m";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentConditions {
    pub weather_code: Option<i32>,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub daily_high: Option<f64>,
    pub daily_low: Option<f64>,
}

#[async_trait]
pub trait WeatherClient: Send + Sync {
    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<CurrentConditions, InfraError>;

    async fn place_name(&self, coordinates: Coordinates) -> Result<Option<String>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Client,
    forecast_endpoint: String,
    geocoding_endpoint: String,
}

impl OpenMeteoClient {
    pub fn new(forecast_endpoint: impl Into<String>, geocoding_endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            forecast_endpoint: forecast_endpoint.into(),
            geocoding_endpoint: geocoding_endpoint.into(),
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("weather api error: http {}", status.as_u16())
        } else {
            format!("weather api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Network(message)
    }

    fn forecast_url(&self, coordinates: Coordinates) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.forecast_endpoint)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid forecast endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("latitude", &coordinates.latitude.to_string())
            .append_pair("longitude", &coordinates.longitude.to_string())
            .append_pair("current", CURRENT_FIELDS)
            .append_pair("daily", DAILY_FIELDS)
            .append_pair("timezone", "auto");
        Ok(url)
    }

    fn geocoding_url(&self, coordinates: Coordinates) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.geocoding_endpoint).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid geocoding endpoint: {error}"))
        })?;
        url.query_pairs_mut()
            .append_pair("latitude", &coordinates.latitude.to_string())
            .append_pair("longitude", &coordinates.longitude.to_string())
            .append_pair("language", "en");
        Ok(url)
    }

    async fn get_body(&self, url: Url, what: &str) -> Result<String, InfraError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while fetching {what}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading {what} response: {error}")))?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }
        Ok(body)
    }
}

#[derive(Debug, serde::Deserialize)]
struct ForecastPayload {
    current: Option<CurrentPayload>,
    daily: Option<DailyPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct CurrentPayload {
    temperature_2m: Option<f64>,
    weather_code: Option<i32>,
    wind_speed_10m: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
struct DailyPayload {
    temperature_2m_max: Option<Vec<Option<f64>>>,
    temperature_2m_min: Option<Vec<Option<f64>>>,
}

#[derive(Debug, serde::Deserialize)]
struct GeocodingPayload {
    results: Option<Vec<GeocodingResult>>,
}

#[derive(Debug, serde::Deserialize)]
struct GeocodingResult {
    city: Option<String>,
    name: Option<String>,
}

fn first_reading(values: Option<Vec<Option<f64>>>) -> Option<f64> {
    values.and_then(|values| values.into_iter().next().flatten())
}

pub fn parse_forecast_payload(body: &str) -> Result<CurrentConditions, InfraError> {
    let parsed: ForecastPayload = serde_json::from_str(body).map_err(|error| {
        InfraError::Network(format!("invalid forecast payload: {error}; body={body}"))
    })?;

    let (temperature, weather_code, wind_speed) = match parsed.current {
        Some(current) => (
            current.temperature_2m,
            current.weather_code,
            current.wind_speed_10m,
        ),
        None => (None, None, None),
    };
    let (daily_high, daily_low) = match parsed.daily {
        Some(daily) => (
            first_reading(daily.temperature_2m_max),
            first_reading(daily.temperature_2m_min),
        ),
        None => (None, None),
    };

    Ok(CurrentConditions {
        weather_code,
        temperature,
        wind_speed,
        daily_high,
        daily_low,
    })
}

pub fn parse_geocoding_payload(body: &str) -> Result<Option<String>, InfraError> {
    let parsed: GeocodingPayload = serde_json::from_str(body).map_err(|error| {
        InfraError::Network(format!("invalid geocoding payload: {error}; body={body}"))
    })?;

    Ok(parsed
        .results
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|result| result.city.or(result.name))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty()))
}

#[async_trait]
impl WeatherClient for OpenMeteoClient {
    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<CurrentConditions, InfraError> {
        let url = self.forecast_url(coordinates)?;
        let body = self.get_body(url, "forecast").await?;
        parse_forecast_payload(&body)
    }

    async fn place_name(&self, coordinates: Coordinates) -> Result<Option<String>, InfraError> {
        let url = self.geocoding_url(coordinates)?;
        let body = self.get_body(url, "place name").await?;
        parse_geocoding_payload(&body)
    }
}
