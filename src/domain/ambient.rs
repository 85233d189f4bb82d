use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const RAIN_CODES: [i32; 12] = [51, 53, 55, 61, 63, 65, 80, 81, 82, 95, 96, 99];
const CLOUD_CODES: [i32; 4] = [2, 3, 45, 48];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Forest,
    Ocean,
    Sunset,
    City,
}

impl Theme {
    pub const ALL: [Theme; 4] = [Theme::Forest, Theme::Ocean, Theme::Sunset, Theme::City];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forest => "forest",
            Self::Ocean => "ocean",
            Self::Sunset => "sunset",
            Self::City => "city",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Theme::ALL
            .into_iter()
            .find(|theme| theme.as_str() == normalized)
            .ok_or_else(|| format!("unknown theme: {value}"))
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted as a bare string: `"auto"` or a theme id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbientMode {
    #[default]
    Auto,
    Manual(Theme),
}

impl AmbientMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual(theme) => theme.as_str(),
        }
    }
}

impl FromStr for AmbientMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        value.parse::<Theme>().map(Self::Manual)
    }
}

impl Serialize for AmbientMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AmbientMode {
    /// Unknown strings fall back to `auto` rather than failing the load.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThemeSource {
    Manual,
    TimeOfDay,
    Weather,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AmbientState {
    pub mode: AmbientMode,
    pub effective_theme: Theme,
    pub source: ThemeSource,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Hour-of-day table used whenever nothing better is known.
pub fn time_fallback(hour: u32) -> Theme {
    if hour >= 19 || hour <= 5 {
        Theme::City
    } else if hour >= 17 {
        Theme::Sunset
    } else {
        Theme::Forest
    }
}

/// Maps a WMO weather code to a theme. Checked in order: rain/storm,
/// cloud/fog, then the clear-sky hour table.
pub fn classify_weather(code: i32, hour: u32) -> Theme {
    if RAIN_CODES.contains(&code) {
        Theme::Ocean
    } else if CLOUD_CODES.contains(&code) {
        if hour >= 18 { Theme::Sunset } else { Theme::Forest }
    } else if hour >= 19 || hour <= 5 {
        Theme::City
    } else if (17..=20).contains(&hour) {
        Theme::Sunset
    } else {
        Theme::Forest
    }
}

/// Short condition label for a WMO weather code; `None` for codes the
/// forecast is not expected to send.
pub fn weather_label(code: i32) -> Option<&'static str> {
    let label = match code {
        0 => "Clear",
        1 => "Mainly clear",
        2 => "Clouds",
        3 => "Overcast",
        45 => "Fog",
        48 => "Rime fog",
        51 | 53 | 55 => "Drizzle",
        61 | 63 | 65 => "Rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow grains",
        80 | 81 => "Showers",
        82 => "Heavy showers",
        95 | 96 | 99 => "Thunderstorm",
        _ => return None,
    };
    Some(label)
}

pub fn greeting_for_hour(hour: u32) -> &'static str {
    if hour < 5 {
        "Night owl"
    } else if hour < 12 {
        "Good morning"
    } else if hour < 18 {
        "Good afternoon"
    } else {
        "Good evening"
    }
}
