use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::Serialize;
use std::time::Duration;

pub const QUOTES: [&str; 6] = [
    "What gets scheduled gets done.",
    "Small steps, big results.",
    "Focus is the art of saying no.",
    "Win the morning, win the day.",
    "Clarity breeds consistency.",
    "Done is better than perfect.",
];

/// Same quote all day; the pick moves with day-of-month plus zero-based month.
pub fn quote_of_the_day(date: NaiveDate) -> &'static str {
    let index = (date.day() + date.month0()) as usize % QUOTES.len();
    QUOTES[index]
}

/// Share of the local day already gone, rounded to a whole percent.
pub fn day_progress_percent(time: NaiveTime) -> u32 {
    let minutes = f64::from(time.hour() * 60 + time.minute()) + f64::from(time.second()) / 60.0;
    (minutes / (24.0 * 60.0) * 100.0).round() as u32
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreathPhase {
    Inhale,
    Hold,
    Exhale,
}

impl BreathPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inhale => "inhale",
            Self::Hold => "hold",
            Self::Exhale => "exhale",
        }
    }
}

/// 4-4-6 guided breathing: inhale, hold, exhale, repeating every 14 s.
pub const BREATH_CYCLE: [(BreathPhase, Duration); 3] = [
    (BreathPhase::Inhale, Duration::from_secs(4)),
    (BreathPhase::Hold, Duration::from_secs(4)),
    (BreathPhase::Exhale, Duration::from_secs(6)),
];

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct BreathCue {
    pub phase: BreathPhase,
    /// Fraction of the current phase completed, in `[0, 1)`.
    pub progress: f64,
}

pub fn breath_cue(elapsed: Duration) -> BreathCue {
    let cycle: Duration = BREATH_CYCLE.iter().map(|(_, length)| *length).sum();
    let mut offset = Duration::from_nanos((elapsed.as_nanos() % cycle.as_nanos()) as u64);
    for (phase, length) in BREATH_CYCLE {
        if offset < length {
            return BreathCue {
                phase,
                progress: offset.as_secs_f64() / length.as_secs_f64(),
            };
        }
        offset -= length;
    }
    BreathCue {
        phase: BreathPhase::Inhale,
        progress: 0.0,
    }
}
