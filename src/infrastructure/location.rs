use crate::domain::ambient::Coordinates;
use crate::infrastructure::config::ConfiguredLocation;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;

/// Source of device coordinates. Implementations report
/// `LocationDenied` / `LocationUnavailable` instead of blocking; the caller
/// bounds the wait.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredLocationProvider {
    location: Option<Coordinates>,
}

impl ConfiguredLocationProvider {
    pub fn new(location: Option<ConfiguredLocation>) -> Self {
        Self {
            location: location.map(Coordinates::from),
        }
    }
}

#[async_trait]
impl LocationProvider for ConfiguredLocationProvider {
    async fn current_position(&self) -> Result<Coordinates, InfraError> {
        let Some(location) = self.location else {
            return Err(InfraError::LocationUnavailable);
        };
        if !location.is_valid() {
            return Err(InfraError::InvalidConfig(format!(
                "configured location out of range: latitude {}, longitude {}",
                location.latitude, location.longitude
            )));
        }
        Ok(location)
    }
}
