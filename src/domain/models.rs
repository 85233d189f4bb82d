use crate::domain::calendar::DayMarks;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    #[default]
    Sky,
    Rose,
    Amber,
    Emerald,
    Violet,
    Slate,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 6] = [
        TaskCategory::Sky,
        TaskCategory::Rose,
        TaskCategory::Amber,
        TaskCategory::Emerald,
        TaskCategory::Violet,
        TaskCategory::Slate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sky => "sky",
            Self::Rose => "rose",
            Self::Amber => "amber",
            Self::Emerald => "emerald",
            Self::Violet => "violet",
            Self::Slate => "slate",
        }
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        TaskCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unsupported task category: {value}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub done_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "timestamp::required")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: TaskCategory,
    #[serde(default)]
    pub pinned: bool,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.text, "task.text")?;
        if self.done != self.done_at.is_some() {
            return Err("task.done_at must be set exactly when task.done is true".to_string());
        }
        Ok(())
    }

    pub fn toggle_done(&mut self, now: DateTime<Utc>) {
        self.done = !self.done;
        self.done_at = self.done.then_some(now);
    }

    /// Restores `done_at` agreeing with `done`. A finished task with no
    /// completion time is dated at its creation.
    fn repair(&mut self) {
        match (self.done, self.done_at) {
            (true, None) => self.done_at = Some(self.created_at),
            (false, Some(_)) => self.done_at = None,
            _ => {}
        }
    }
}

fn lenient_category<'de, D>(deserializer: D) -> Result<TaskCategory, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default())
}

/// Task timestamps are read from RFC 3339 text or from epoch milliseconds,
/// which is how older dashboards stored them. They are always written back
/// as RFC 3339.
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Millis(i64),
        Fractional(f64),
        Text(String),
    }

    impl Stamp {
        fn into_datetime(self) -> Option<DateTime<Utc>> {
            match self {
                Stamp::Millis(millis) => DateTime::from_timestamp_millis(millis),
                Stamp::Fractional(millis) if millis.is_finite() => {
                    DateTime::from_timestamp_millis(millis.round() as i64)
                }
                Stamp::Fractional(_) => None,
                Stamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|value| value.with_timezone(&Utc)),
            }
        }
    }

    pub fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Stamp::deserialize(deserializer)?
            .into_datetime()
            .ok_or_else(|| D::Error::custom("unreadable timestamp"))
    }

    /// Unreadable values count as absent.
    pub fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|value| Stamp::deserialize(value).ok())
            .and_then(Stamp::into_datetime))
    }
}

/// Habit record. `history` is always a valid map after load; fields this
/// version does not know about ride along in `extra` and are written back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub history: DayMarks,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Habit {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            history: DayMarks::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "habit.id")?;
        validate_non_empty(&self.name, "habit.name")
    }
}

pub fn default_habits() -> Vec<Habit> {
    vec![Habit::new("water", "Drink water"), Habit::new("move", "Move 20 min")]
}

/// Brings a persisted habit record into shape without losing it: a
/// non-object record becomes an empty one, `id` and `name` become strings
/// (scalars keep their text, anything absent is `""`) and a missing or
/// non-object `history` becomes `{}`. Other fields are untouched. Idempotent.
pub fn repair_habit_record(record: Value) -> Value {
    let mut fields = match record {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    for field in ["id", "name"] {
        let text = text_form(fields.get(field));
        fields.insert(field.to_string(), Value::String(text));
    }
    if !fields.get("history").is_some_and(Value::is_object) {
        fields.insert("history".to_string(), Value::Object(Map::new()));
    }
    Value::Object(fields)
}

fn text_form(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Decodes a persisted habit list, repairing every record in place. A
/// non-array value is an empty list. Validation belongs to the intents.
pub fn decode_habits(value: Value) -> Option<Vec<Habit>> {
    let Value::Array(records) = value else {
        return Some(Vec::new());
    };
    Some(
        records
            .into_iter()
            .map(repair_habit_record)
            .filter_map(|record| match serde_json::from_value::<Habit>(record) {
                Ok(habit) => Some(habit),
                Err(error) => {
                    warn!(%error, "habit record could not be repaired");
                    None
                }
            })
            .collect(),
    )
}

/// Decodes a persisted task list record by record. A non-array value is an
/// empty list. Timestamps, category and the done flag are repaired; a record
/// is dropped only without an id, text or readable creation time.
pub fn decode_tasks(value: Value) -> Option<Vec<Task>> {
    let Value::Array(records) = value else {
        return Some(Vec::new());
    };
    Some(
        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<Task>(record) {
                Ok(mut task) => {
                    task.repair();
                    Some(task)
                }
                Err(error) => {
                    warn!(%error, "dropping unreadable task record");
                    None
                }
            })
            .filter(|task| task.validate().is_ok())
            .collect(),
    )
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}
