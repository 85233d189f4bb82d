use crate::application::cell::PersistentCell;
use crate::application::clock::{system_now, NowProvider};
use crate::domain::ambient::{
    classify_weather, time_fallback, AmbientMode, AmbientState, Coordinates, Theme, ThemeSource,
};
use crate::infrastructure::config::AmbientConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::location::LocationProvider;
use crate::infrastructure::storage::KeyValueStore;
use crate::infrastructure::weather_client::WeatherClient;
use chrono::Timelike;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

pub const AMBIENT_MODE_KEY: &str = "dd_ambient_global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSettings {
    pub location_timeout: Duration,
    pub location_max_age: Duration,
    pub weather_timeout: Duration,
}

impl Default for AmbientSettings {
    fn default() -> Self {
        Self {
            location_timeout: Duration::from_secs(5),
            location_max_age: Duration::from_secs(60),
            weather_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&AmbientConfig> for AmbientSettings {
    fn from(config: &AmbientConfig) -> Self {
        Self {
            location_timeout: config.location_timeout(),
            location_max_age: config.location_max_age(),
            weather_timeout: config.weather_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub theme: Theme,
    pub source: ThemeSource,
    /// Coordinates obtained from the provider during this resolution.
    pub fresh_fix: Option<Coordinates>,
}

impl Resolution {
    fn time_of_day(hour: u32, fresh_fix: Option<Coordinates>) -> Self {
        Self {
            theme: time_fallback(hour),
            source: ThemeSource::TimeOfDay,
            fresh_fix,
        }
    }
}

pub async fn locate<L>(location: &L, limit: Duration) -> Result<Coordinates, InfraError>
where
    L: LocationProvider + ?Sized,
{
    match time::timeout(limit, location.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(InfraError::LocationTimeout),
    }
}

/// Auto-mode pipeline: position (unless a cached fix is supplied), then
/// current weather, each bounded by its own timeout. Any stage failing
/// settles on the time-of-day table for `hour`.
pub async fn resolve_auto_theme<L, W>(
    location: &L,
    weather: &W,
    settings: &AmbientSettings,
    cached_fix: Option<Coordinates>,
    hour: u32,
) -> Resolution
where
    L: LocationProvider + ?Sized,
    W: WeatherClient + ?Sized,
{
    let (coordinates, fresh_fix) = match cached_fix {
        Some(coordinates) => (coordinates, None),
        None => match locate(location, settings.location_timeout).await {
            Ok(coordinates) => (coordinates, Some(coordinates)),
            Err(error) => {
                debug!(%error, "location stage failed; keeping time-of-day theme");
                return Resolution::time_of_day(hour, None);
            }
        },
    };

    match time::timeout(settings.weather_timeout, weather.current_conditions(coordinates)).await {
        Ok(Ok(conditions)) => match conditions.weather_code {
            Some(code) => Resolution {
                theme: classify_weather(code, hour),
                source: ThemeSource::Weather,
                fresh_fix,
            },
            None => Resolution::time_of_day(hour, fresh_fix),
        },
        Ok(Err(error)) => {
            debug!(%error, "weather stage failed; keeping time-of-day theme");
            Resolution::time_of_day(hour, fresh_fix)
        }
        Err(_) => {
            debug!("weather stage timed out; keeping time-of-day theme");
            Resolution::time_of_day(hour, fresh_fix)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocationFix {
    coordinates: Coordinates,
    obtained_at: Instant,
}

struct ResolverInner {
    mode: PersistentCell<AmbientMode>,
    effective: Theme,
    source: ThemeSource,
    attempt: u64,
    in_flight: Option<JoinHandle<()>>,
    last_fix: Option<LocationFix>,
    updates: watch::Sender<Theme>,
}

impl ResolverInner {
    fn publish(&mut self, theme: Theme, source: ThemeSource) {
        self.source = source;
        if self.effective != theme {
            self.effective = theme;
            self.updates.send_replace(theme);
        }
    }

    /// Supersedes whatever resolution is in flight.
    fn supersede(&mut self) -> u64 {
        self.attempt = self.attempt.wrapping_add(1);
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        self.attempt
    }

    fn cached_fix(&self, max_age: Duration) -> Option<Coordinates> {
        self.last_fix
            .filter(|fix| fix.obtained_at.elapsed() <= max_age)
            .map(|fix| fix.coordinates)
    }
}

impl Drop for ResolverInner {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

/// Decides the active visual theme. Manual mode pins a theme without any
/// I/O; auto mode shows the time-of-day theme at once and upgrades it from
/// live weather when position and forecast arrive in time. Only the latest
/// resolution attempt may publish.
pub struct AmbientResolver<L, W>
where
    L: LocationProvider + 'static,
    W: WeatherClient + 'static,
{
    inner: Arc<Mutex<ResolverInner>>,
    location: Arc<L>,
    weather: Arc<W>,
    settings: AmbientSettings,
    zone: Tz,
    now_provider: NowProvider,
}

impl<L, W> Clone for AmbientResolver<L, W>
where
    L: LocationProvider + 'static,
    W: WeatherClient + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            location: Arc::clone(&self.location),
            weather: Arc::clone(&self.weather),
            settings: self.settings,
            zone: self.zone,
            now_provider: Arc::clone(&self.now_provider),
        }
    }
}

impl<L, W> AmbientResolver<L, W>
where
    L: LocationProvider + 'static,
    W: WeatherClient + 'static,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        location: Arc<L>,
        weather: Arc<W>,
        settings: AmbientSettings,
        zone: Tz,
    ) -> Self {
        let mode = PersistentCell::open(store, AMBIENT_MODE_KEY, AmbientMode::Auto);
        let (effective, source) = match mode.get() {
            AmbientMode::Manual(theme) => (theme, ThemeSource::Manual),
            AmbientMode::Auto => (Theme::Forest, ThemeSource::TimeOfDay),
        };
        let (updates, _) = watch::channel(effective);
        let resolver = Self {
            inner: Arc::new(Mutex::new(ResolverInner {
                mode,
                effective,
                source,
                attempt: 0,
                in_flight: None,
                last_fix: None,
                updates,
            })),
            location,
            weather,
            settings,
            zone,
            now_provider: system_now(),
        };
        resolver.refresh_time_of_day();
        resolver
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self.refresh_time_of_day();
        self
    }

    pub fn mode(&self) -> AmbientMode {
        self.lock().mode.get()
    }

    pub fn effective_theme(&self) -> Theme {
        self.lock().effective
    }

    pub fn state(&self) -> AmbientState {
        let inner = self.lock();
        AmbientState {
            mode: inner.mode.get(),
            effective_theme: inner.effective,
            source: inner.source,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Theme> {
        self.lock().updates.subscribe()
    }

    /// Persists the new mode, then resolves under it.
    pub fn set_mode(&self, mode: AmbientMode) -> AmbientState {
        self.lock().mode.set(mode);
        info!(mode = mode.as_str(), "ambient mode changed");
        self.resolve()
    }

    /// Starts a fresh resolution under the current mode. Any attempt still
    /// in flight is cancelled and can no longer publish.
    pub fn resolve(&self) -> AmbientState {
        let hour = self.local_hour();
        let mut inner = self.lock();
        let attempt = inner.supersede();
        match inner.mode.get() {
            AmbientMode::Manual(theme) => inner.publish(theme, ThemeSource::Manual),
            AmbientMode::Auto => {
                inner.publish(time_fallback(hour), ThemeSource::TimeOfDay);
                let cached_fix = inner.cached_fix(self.settings.location_max_age);
                inner.in_flight = self.spawn_attempt(attempt, cached_fix, hour);
            }
        }
        AmbientState {
            mode: inner.mode.get(),
            effective_theme: inner.effective,
            source: inner.source,
        }
    }

    /// Re-evaluates the hour table while it is the active source, so the
    /// fallback follows the clock across the evening boundaries.
    pub fn refresh_time_of_day(&self) {
        let hour = self.local_hour();
        let mut inner = self.lock();
        if inner.mode.get() == AmbientMode::Auto && inner.source == ThemeSource::TimeOfDay {
            inner.publish(time_fallback(hour), ThemeSource::TimeOfDay);
        }
    }

    /// Abandons any in-flight resolution; the current theme stays.
    pub fn cancel(&self) {
        self.lock().supersede();
    }

    pub fn is_resolving(&self) -> bool {
        self.lock()
            .in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn spawn_attempt(
        &self,
        attempt: u64,
        cached_fix: Option<Coordinates>,
        hour: u32,
    ) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime available; ambient theme stays on time of day");
            return None;
        };
        let shared = Arc::downgrade(&self.inner);
        let location = Arc::clone(&self.location);
        let weather = Arc::clone(&self.weather);
        let settings = self.settings;
        Some(runtime.spawn(async move {
            let resolution =
                resolve_auto_theme(location.as_ref(), weather.as_ref(), &settings, cached_fix, hour)
                    .await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.attempt != attempt {
                debug!(attempt, "discarding superseded ambient resolution");
                return;
            }
            if let Some(coordinates) = resolution.fresh_fix {
                inner.last_fix = Some(LocationFix {
                    coordinates,
                    obtained_at: Instant::now(),
                });
            }
            inner.in_flight = None;
            inner.publish(resolution.theme, resolution.source);
            debug!(
                theme = resolution.theme.as_str(),
                source = ?resolution.source,
                "ambient theme resolved"
            );
        }))
    }

    fn local_hour(&self) -> u32 {
        (self.now_provider)().with_timezone(&self.zone).hour()
    }

    fn lock(&self) -> MutexGuard<'_, ResolverInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
