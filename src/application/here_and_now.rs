use crate::application::ambient_resolver::{locate, AmbientSettings};
use crate::domain::ambient::weather_label;
use crate::infrastructure::location::LocationProvider;
use crate::infrastructure::weather_client::WeatherClient;
use serde::Serialize;
use tokio::time;
use tracing::debug;

pub const FALLBACK_PLACE: &str = "Your location";

/// Current-conditions card: rounded readings plus a display place name.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeatherSnapshot {
    pub place: String,
    pub temperature: Option<i64>,
    pub high: Option<i64>,
    pub low: Option<i64>,
    pub wind: Option<i64>,
    pub weather_code: Option<i32>,
    pub condition: Option<&'static str>,
}

fn rounded(value: Option<f64>) -> Option<i64> {
    value.filter(|value| value.is_finite()).map(|value| value.round() as i64)
}

/// Returns `None` when the device cannot be located or the forecast does
/// not arrive in time. A missing place name alone only degrades the label.
pub async fn fetch_weather_snapshot<L, W>(
    location: &L,
    weather: &W,
    settings: &AmbientSettings,
) -> Option<WeatherSnapshot>
where
    L: LocationProvider + ?Sized,
    W: WeatherClient + ?Sized,
{
    let coordinates = match locate(location, settings.location_timeout).await {
        Ok(coordinates) => coordinates,
        Err(error) => {
            debug!(%error, "weather snapshot skipped; no position");
            return None;
        }
    };

    let (conditions, place) = tokio::join!(
        time::timeout(settings.weather_timeout, weather.current_conditions(coordinates)),
        time::timeout(settings.weather_timeout, weather.place_name(coordinates)),
    );

    let conditions = match conditions {
        Ok(Ok(conditions)) => conditions,
        Ok(Err(error)) => {
            debug!(%error, "weather snapshot skipped; forecast failed");
            return None;
        }
        Err(_) => {
            debug!("weather snapshot skipped; forecast timed out");
            return None;
        }
    };
    let place = match place {
        Ok(Ok(Some(name))) if !name.trim().is_empty() => name,
        _ => FALLBACK_PLACE.to_string(),
    };

    Some(WeatherSnapshot {
        place,
        temperature: rounded(conditions.temperature),
        high: rounded(conditions.daily_high),
        low: rounded(conditions.daily_low),
        wind: rounded(conditions.wind_speed),
        weather_code: conditions.weather_code,
        condition: conditions.weather_code.and_then(weather_label),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ambient::Coordinates;
    use crate::infrastructure::error::InfraError;
    use crate::infrastructure::weather_client::CurrentConditions;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedLocation(Option<Coordinates>);

    #[async_trait]
    impl LocationProvider for FixedLocation {
        async fn current_position(&self) -> Result<Coordinates, InfraError> {
            self.0.ok_or(InfraError::LocationUnavailable)
        }
    }

    struct StubWeather {
        conditions: Result<CurrentConditions, String>,
        place: Result<Option<String>, String>,
        place_delay: Duration,
    }

    #[async_trait]
    impl WeatherClient for StubWeather {
        async fn current_conditions(
            &self,
            _coordinates: Coordinates,
        ) -> Result<CurrentConditions, InfraError> {
            self.conditions.clone().map_err(InfraError::Network)
        }

        async fn place_name(&self, _coordinates: Coordinates) -> Result<Option<String>, InfraError> {
            time::sleep(self.place_delay).await;
            self.place.clone().map_err(InfraError::Network)
        }
    }

    fn here() -> FixedLocation {
        FixedLocation(Some(Coordinates {
            latitude: 40.71,
            longitude: -74.0,
        }))
    }

    fn sunny() -> CurrentConditions {
        CurrentConditions {
            weather_code: Some(1),
            temperature: Some(18.6),
            wind_speed: Some(11.2),
            daily_high: Some(21.5),
            daily_low: Some(9.4),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_rounds_readings_and_names_place() {
        let weather = StubWeather {
            conditions: Ok(sunny()),
            place: Ok(Some("Brooklyn".to_string())),
            place_delay: Duration::ZERO,
        };
        let snapshot = fetch_weather_snapshot(&here(), &weather, &AmbientSettings::default())
            .await
            .expect("snapshot");

        assert_eq!(
            snapshot,
            WeatherSnapshot {
                place: "Brooklyn".to_string(),
                temperature: Some(19),
                high: Some(22),
                low: Some(9),
                wind: Some(11),
                weather_code: Some(1),
                condition: Some("Mainly clear"),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_place_name_uses_generic_label() {
        for place in [Ok(None), Err("geocoder down".to_string()), Ok(Some("  ".to_string()))] {
            let weather = StubWeather {
                conditions: Ok(sunny()),
                place,
                place_delay: Duration::ZERO,
            };
            let snapshot = fetch_weather_snapshot(&here(), &weather, &AmbientSettings::default())
                .await
                .expect("snapshot");
            assert_eq!(snapshot.place, FALLBACK_PLACE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_geocoder_does_not_block_snapshot() {
        let weather = StubWeather {
            conditions: Ok(sunny()),
            place: Ok(Some("Late".to_string())),
            place_delay: Duration::from_secs(30),
        };
        let snapshot = fetch_weather_snapshot(&here(), &weather, &AmbientSettings::default())
            .await
            .expect("snapshot");
        assert_eq!(snapshot.place, FALLBACK_PLACE);
    }

    #[tokio::test(start_paused = true)]
    async fn no_position_or_failed_forecast_yields_nothing() {
        let weather = StubWeather {
            conditions: Ok(sunny()),
            place: Ok(None),
            place_delay: Duration::ZERO,
        };
        assert!(
            fetch_weather_snapshot(&FixedLocation(None), &weather, &AmbientSettings::default())
                .await
                .is_none()
        );

        let broken = StubWeather {
            conditions: Err("http 500".to_string()),
            place: Ok(Some("Brooklyn".to_string())),
            place_delay: Duration::ZERO,
        };
        assert!(
            fetch_weather_snapshot(&here(), &broken, &AmbientSettings::default())
                .await
                .is_none()
        );
    }
}
