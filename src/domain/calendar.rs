use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// A local calendar day, formatted `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Truncates `instant` to the calendar date it falls on in `zone`.
    pub fn from_instant<Z: TimeZone>(instant: DateTime<Utc>, zone: &Z) -> Self {
        Self(instant.with_timezone(zone).date_naive())
    }

    pub fn date(self) -> NaiveDate {
        self.0
    }

    pub fn previous(self) -> Option<Self> {
        self.0.pred_opt().map(Self)
    }

    pub fn days_back(self, days: u64) -> Option<Self> {
        self.0.checked_sub_days(Days::new(days)).map(Self)
    }

    pub fn earliest() -> Self {
        Self(NaiveDate::MIN)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), DAY_KEY_FORMAT)
            .map(Self)
            .map_err(|error| format!("day key must be YYYY-MM-DD: {error}"))
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Sparse day → done map. Missing days count as unmarked.
///
/// Deserialization never fails: a non-object becomes an empty map and
/// entries with an invalid day key or a non-boolean value are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayMarks(BTreeMap<DayKey, bool>);

impl DayMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_lenient(value: &serde_json::Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        Self(
            object
                .iter()
                .filter_map(|(key, mark)| Some((key.parse::<DayKey>().ok()?, mark.as_bool()?)))
                .collect(),
        )
    }

    pub fn is_marked(&self, day: DayKey) -> bool {
        self.0.get(&day).copied().unwrap_or(false)
    }

    pub fn set(&mut self, day: DayKey, marked: bool) {
        self.0.insert(day, marked);
    }

    /// Flips `day` and returns its new mark.
    pub fn toggle(&mut self, day: DayKey) -> bool {
        let next = !self.is_marked(day);
        self.0.insert(day, next);
        next
    }

    pub fn marked_between(&self, first: DayKey, last: DayKey) -> usize {
        if first > last {
            return 0;
        }
        self.0.range(first..=last).filter(|(_, marked)| **marked).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(DayKey, bool)> for DayMarks {
    fn from_iter<I: IntoIterator<Item = (DayKey, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for DayMarks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json_lenient(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn day(value: &str) -> DayKey {
        value.parse().expect("valid day key")
    }

    #[test]
    fn day_key_formats_canonically() {
        let key = DayKey::from_date(NaiveDate::from_ymd_opt(2026, 3, 7).expect("valid date"));
        assert_eq!(key.to_string(), "2026-03-07");
        assert_eq!(day("2026-03-07"), key);
    }

    #[test]
    fn day_key_follows_configured_timezone() {
        let instant = DateTime::parse_from_rfc3339("2026-10-15T22:30:00Z")
            .expect("valid instant")
            .with_timezone(&Utc);
        let istanbul: Tz = "Europe/Istanbul".parse().expect("known zone");

        assert_eq!(DayKey::from_instant(instant, &Utc).to_string(), "2026-10-15");
        assert_eq!(DayKey::from_instant(instant, &istanbul).to_string(), "2026-10-16");
    }

    #[test]
    fn same_local_day_yields_same_key() {
        let zone: Tz = "America/New_York".parse().expect("known zone");
        let morning = DateTime::parse_from_rfc3339("2026-10-15T05:00:00Z")
            .expect("valid instant")
            .with_timezone(&Utc);
        let evening = DateTime::parse_from_rfc3339("2026-10-16T03:59:00Z")
            .expect("valid instant")
            .with_timezone(&Utc);
        assert_eq!(
            DayKey::from_instant(morning, &zone),
            DayKey::from_instant(evening, &zone)
        );
    }

    #[test]
    fn day_key_rejects_garbage() {
        assert!("yesterday".parse::<DayKey>().is_err());
        assert!("2026-13-01".parse::<DayKey>().is_err());
    }

    #[test]
    fn previous_crosses_month_boundary() {
        assert_eq!(day("2026-03-01").previous(), Some(day("2026-02-28")));
        assert_eq!(day("2026-03-01").days_back(29), Some(day("2026-01-31")));
    }

    #[test]
    fn lenient_decode_drops_invalid_entries() {
        let value = serde_json::json!({
            "2026-10-14": true,
            "2026-10-15": false,
            "not-a-day": true,
            "2026-10-13": "yes"
        });
        let marks = DayMarks::from_json_lenient(&value);
        assert!(marks.is_marked(day("2026-10-14")));
        assert!(!marks.is_marked(day("2026-10-15")));
        assert!(!marks.is_marked(day("2026-10-13")));
        assert_eq!(marks.marked_between(day("2026-01-01"), day("2026-12-31")), 1);
    }

    #[test]
    fn non_object_decodes_to_empty_map() {
        for value in [
            serde_json::Value::Null,
            serde_json::json!([1, 2]),
            serde_json::json!("x"),
        ] {
            let marks: DayMarks = serde_json::from_value(value).expect("lenient decode");
            assert!(marks.is_empty());
        }
    }

    #[test]
    fn toggle_flips_and_serializes_with_day_keys() {
        let mut marks = DayMarks::new();
        assert!(marks.toggle(day("2026-10-15")));
        assert!(!marks.toggle(day("2026-10-15")));
        marks.set(day("2026-10-14"), true);

        let json = serde_json::to_value(&marks).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"2026-10-14": true, "2026-10-15": false})
        );
    }
}
