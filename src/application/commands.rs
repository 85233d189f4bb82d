use crate::application::ambient_resolver::{AmbientResolver, AmbientSettings};
use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::cell::PersistentCell;
use crate::application::clock::{system_now, Clock, NowProvider};
use crate::application::here_and_now::{fetch_weather_snapshot, WeatherSnapshot};
use crate::application::pomodoro::PomodoroEngine;
use crate::domain::ambient::{greeting_for_hour, AmbientMode, AmbientState, Theme, ThemeSource};
use crate::domain::calendar::{DayKey, DayMarks};
use crate::domain::models::{
    decode_habits, decode_tasks, default_habits, Habit, Task, TaskCategory,
};
use crate::domain::moment::{breath_cue, day_progress_percent, quote_of_the_day, BreathCue};
use crate::domain::streak::{consistency_summary, recent_days, streak, ConsistencySummary};
use crate::domain::timer::{TimerPhase, TimerState};
use crate::infrastructure::config::ConfigBundle;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::location::ConfiguredLocationProvider;
use crate::infrastructure::storage::{KeyValueStore, SqliteKeyValueStore};
use crate::infrastructure::weather_client::OpenMeteoClient;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

pub const TASKS_KEY: &str = "dd_tasks";
pub const HABITS_KEY: &str = "dd_habits";
pub const READING_KEY: &str = "dd_reading";

const HABIT_STRIP_DAYS: u32 = 7;
const READING_STRIP_DAYS: u32 = 30;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub type LiveAmbientResolver = AmbientResolver<ConfiguredLocationProvider, OpenMeteoClient>;

pub struct DashboardState {
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    database_path: PathBuf,
    config: ConfigBundle,
    zone: Tz,
    clock: Clock,
    tasks: PersistentCell<Vec<Task>>,
    habits: PersistentCell<Vec<Habit>>,
    reading: PersistentCell<DayMarks>,
    pomodoro: PomodoroEngine,
    ambient: LiveAmbientResolver,
    location: Arc<ConfiguredLocationProvider>,
    weather: Arc<OpenMeteoClient>,
    ambient_settings: AmbientSettings,
    breathing_since: Mutex<Option<DateTime<Utc>>>,
}

impl DashboardState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_now_provider(workspace_root, system_now())
    }

    pub fn with_now_provider(
        workspace_root: PathBuf,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Self::from_bootstrap(bootstrap, now_provider)
    }

    /// Builds the state over an already bootstrapped workspace.
    pub fn from_bootstrap(
        bootstrap: BootstrapResult,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let config = bootstrap.config;
        let zone = config.app.time_zone()?;
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));

        let location = Arc::new(ConfiguredLocationProvider::new(config.ambient.location));
        let weather = Arc::new(OpenMeteoClient::new(
            config.ambient.forecast_endpoint.clone(),
            config.ambient.geocoding_endpoint.clone(),
        ));
        let ambient_settings = AmbientSettings::from(&config.ambient);
        let ambient = AmbientResolver::new(
            Arc::clone(&store),
            Arc::clone(&location),
            Arc::clone(&weather),
            ambient_settings,
            zone,
        )
        .with_now_provider(Arc::clone(&now_provider));

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            logs_dir: bootstrap.logs_dir,
            database_path: bootstrap.database_path,
            zone,
            clock: Clock::new(now_provider),
            tasks: PersistentCell::open_with(
                Arc::clone(&store),
                TASKS_KEY,
                Vec::new(),
                decode_tasks,
            ),
            habits: PersistentCell::open_with(
                Arc::clone(&store),
                HABITS_KEY,
                default_habits(),
                decode_habits,
            ),
            reading: PersistentCell::open(Arc::clone(&store), READING_KEY, DayMarks::new()),
            pomodoro: PomodoroEngine::open(store),
            ambient,
            location,
            weather,
            ambient_settings,
            breathing_since: Mutex::new(None),
            config,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &ConfigBundle {
        &self.config
    }

    pub fn today(&self) -> DayKey {
        DayKey::from_instant(self.clock.now(), &self.zone)
    }

    pub fn subscribe_clock(&self) -> watch::Receiver<DateTime<Utc>> {
        self.clock.subscribe()
    }

    pub fn subscribe_theme(&self) -> watch::Receiver<Theme> {
        self.ambient.subscribe()
    }

    /// Starts the first ambient resolution and the 1 Hz clock. Each tick
    /// lets the time-of-day theme follow the hour.
    pub fn activate(&self) {
        self.ambient.resolve();
        let ambient = self.ambient.clone();
        self.clock.start(move |_| ambient.refresh_time_of_day());
        info!(workspace = %self.workspace_root.display(), "dashboard activated");
    }

    /// Stops every background task. Persisted state is left as is.
    pub fn shutdown(&self) {
        self.clock.stop();
        self.pomodoro.shutdown();
        self.ambient.cancel();
        info!("dashboard stopped");
    }

    fn breathing_cue(&self, now: DateTime<Utc>) -> Option<BreathCue> {
        let since = *self
            .breathing_since
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        since.map(|since| breath_cue((now - since).to_std().unwrap_or_default()))
    }

    fn resolve_day(&self, command: &str, day: Option<String>) -> Result<DayKey, InfraError> {
        match day {
            None => Ok(self.today()),
            Some(raw) => raw.parse().map_err(|error| reject(command, error)),
        }
    }
}

fn reject(command: &str, message: impl Into<String>) -> InfraError {
    let message = message.into();
    warn!(command, %message, "intent rejected");
    InfraError::InvalidInput(message)
}

fn required_id<'a>(command: &str, field: &str, value: &'a str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(reject(command, format!("{field} must not be empty")));
    }
    Ok(value)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PomodoroView {
    pub phase: TimerPhase,
    pub seconds_left: u32,
    pub countdown: String,
    pub auto_switch: bool,
}

impl From<TimerState> for PomodoroView {
    fn from(state: TimerState) -> Self {
        Self {
            phase: state.phase,
            seconds_left: state.seconds_left,
            countdown: state.countdown_text(),
            auto_switch: state.auto_switch,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AmbientView {
    pub mode: String,
    pub effective_theme: Theme,
    pub source: ThemeSource,
}

impl From<AmbientState> for AmbientView {
    fn from(state: AmbientState) -> Self {
        Self {
            mode: state.mode.as_str().to_string(),
            effective_theme: state.effective_theme,
            source: state.source,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayMarkView {
    pub day: DayKey,
    pub marked: bool,
}

fn day_strip(marks: &DayMarks, today: DayKey, count: u32) -> Vec<DayMarkView> {
    recent_days(today, count)
        .into_iter()
        .map(|day| DayMarkView {
            day,
            marked: marks.is_marked(day),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReadingSummary {
    pub today: DayKey,
    pub consistency: ConsistencySummary,
    pub last_30_days: Vec<DayMarkView>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HabitView {
    pub id: String,
    pub name: String,
    pub streak: u32,
    pub today_marked: bool,
    pub last_7_days: Vec<DayMarkView>,
}

impl HabitView {
    fn build(habit: &Habit, today: DayKey) -> Self {
        Self {
            id: habit.id.clone(),
            name: habit.name.clone(),
            streak: streak(&habit.history, today),
            today_marked: habit.history.is_marked(today),
            last_7_days: day_strip(&habit.history, today, HABIT_STRIP_DAYS),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardView {
    pub now: String,
    pub greeting: String,
    pub today: DayKey,
    pub day_progress: u32,
    pub quote: &'static str,
    pub breathing: Option<BreathCue>,
    pub ambient: AmbientView,
    pub pomodoro: PomodoroView,
    pub reading: ConsistencySummary,
    pub habits: Vec<HabitView>,
    pub open_tasks: usize,
    pub pinned_tasks: usize,
}

fn greeting_text(hour: u32, name: Option<&str>) -> String {
    let greeting = greeting_for_hour(hour);
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{greeting}, {name}"),
        None => greeting.to_string(),
    }
}

pub fn start_pomodoro_impl(state: &DashboardState) -> PomodoroView {
    let timer = state.pomodoro.start();
    info!(command = "start_pomodoro", seconds_left = timer.seconds_left, "timer running");
    timer.into()
}

pub fn pause_pomodoro_impl(state: &DashboardState) -> PomodoroView {
    let timer = state.pomodoro.pause();
    info!(command = "pause_pomodoro", phase = timer.phase.as_str(), "timer paused");
    timer.into()
}

pub fn break_pomodoro_impl(state: &DashboardState) -> PomodoroView {
    let timer = state.pomodoro.take_break();
    info!(command = "break_pomodoro", "break started");
    timer.into()
}

pub fn reset_pomodoro_impl(state: &DashboardState) -> PomodoroView {
    let timer = state.pomodoro.reset();
    info!(command = "reset_pomodoro", "timer reset");
    timer.into()
}

pub fn set_pomodoro_auto_switch_impl(state: &DashboardState, enabled: bool) -> PomodoroView {
    let timer = state.pomodoro.set_auto_switch(enabled);
    info!(command = "set_pomodoro_auto_switch", enabled, "auto switch updated");
    timer.into()
}

pub fn get_pomodoro_state_impl(state: &DashboardState) -> PomodoroView {
    state.pomodoro.state().into()
}

pub fn set_ambient_impl(state: &DashboardState, mode: String) -> Result<AmbientView, InfraError> {
    let mode = mode
        .parse::<AmbientMode>()
        .map_err(|error| reject("set_ambient", error))?;
    Ok(state.ambient.set_mode(mode).into())
}

pub fn get_ambient_state_impl(state: &DashboardState) -> AmbientView {
    state.ambient.state().into()
}

/// Flips the reading mark for `day` (today when absent).
pub fn toggle_reading_day_impl(
    state: &DashboardState,
    day: Option<String>,
) -> Result<ReadingSummary, InfraError> {
    let day = state.resolve_day("toggle_reading_day", day)?;
    let marks = state.reading.update(|marks| {
        marks.toggle(day);
    });
    info!(
        command = "toggle_reading_day",
        day = %day,
        marked = marks.is_marked(day),
        "reading day toggled"
    );
    Ok(reading_summary(&marks, state.today()))
}

pub fn get_reading_summary_impl(state: &DashboardState) -> ReadingSummary {
    state
        .reading
        .with(|marks| reading_summary(marks, state.today()))
}

fn reading_summary(marks: &DayMarks, today: DayKey) -> ReadingSummary {
    ReadingSummary {
        today,
        consistency: consistency_summary(marks, today),
        last_30_days: day_strip(marks, today, READING_STRIP_DAYS),
    }
}

pub fn list_habits_impl(state: &DashboardState) -> Vec<HabitView> {
    let today = state.today();
    state.habits.with(|habits| {
        habits
            .iter()
            .map(|habit| HabitView::build(habit, today))
            .collect()
    })
}

pub fn add_habit_impl(state: &DashboardState, name: String) -> Result<HabitView, InfraError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(reject("add_habit", "habit name must not be empty"));
    }

    let habit = Habit::new(next_id("hab"), name);
    state.habits.update(|habits| habits.insert(0, habit.clone()));
    info!(command = "add_habit", habit_id = %habit.id, "created habit");
    Ok(HabitView::build(&habit, state.today()))
}

pub fn toggle_habit_day_impl(
    state: &DashboardState,
    habit_id: String,
    day: Option<String>,
) -> Result<HabitView, InfraError> {
    let habit_id = required_id("toggle_habit_day", "habit_id", &habit_id)?;
    let day = state.resolve_day("toggle_habit_day", day)?;
    let known = state
        .habits
        .with(|habits| habits.iter().any(|habit| habit.id == habit_id));
    if !known {
        return Err(reject("toggle_habit_day", format!("habit not found: {habit_id}")));
    }

    let habits = state.habits.update(|habits| {
        if let Some(habit) = habits.iter_mut().find(|habit| habit.id == habit_id) {
            habit.history.toggle(day);
        }
    });
    let Some(habit) = habits.iter().find(|habit| habit.id == habit_id) else {
        return Err(reject("toggle_habit_day", format!("habit not found: {habit_id}")));
    };
    info!(command = "toggle_habit_day", habit_id, day = %day, "habit day toggled");
    Ok(HabitView::build(habit, state.today()))
}

pub fn delete_habit_impl(state: &DashboardState, habit_id: String) -> Result<bool, InfraError> {
    let habit_id = required_id("delete_habit", "habit_id", &habit_id)?;
    let known = state
        .habits
        .with(|habits| habits.iter().any(|habit| habit.id == habit_id));
    if !known {
        return Ok(false);
    }

    state
        .habits
        .update(|habits| habits.retain(|habit| habit.id != habit_id));
    info!(command = "delete_habit", habit_id, "deleted habit");
    Ok(true)
}

/// Pinned tasks first, stored order otherwise; optionally one category.
pub fn list_tasks_impl(
    state: &DashboardState,
    category: Option<String>,
) -> Result<Vec<Task>, InfraError> {
    let category = category
        .map(|raw| raw.parse::<TaskCategory>())
        .transpose()
        .map_err(|error| reject("list_tasks", error))?;

    let mut tasks = state.tasks.with(|tasks| {
        tasks
            .iter()
            .filter(|task| category.is_none_or(|category| task.category == category))
            .cloned()
            .collect::<Vec<_>>()
    });
    tasks.sort_by_key(|task| !task.pinned);
    Ok(tasks)
}

pub fn add_task_impl(
    state: &DashboardState,
    text: String,
    category: Option<String>,
) -> Result<Task, InfraError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(reject("add_task", "task text must not be empty"));
    }
    let category = match category {
        Some(raw) => raw
            .parse::<TaskCategory>()
            .map_err(|error| reject("add_task", error))?,
        None => TaskCategory::default(),
    };

    let task = Task {
        id: next_id("tsk"),
        text: text.to_string(),
        done: false,
        done_at: None,
        created_at: state.clock.now(),
        category,
        pinned: false,
    };
    state.tasks.update(|tasks| tasks.insert(0, task.clone()));
    info!(command = "add_task", task_id = %task.id, "created task");
    Ok(task)
}

pub fn toggle_task_impl(state: &DashboardState, task_id: String) -> Result<Task, InfraError> {
    let now = state.clock.now();
    update_task(state, "toggle_task", &task_id, |task| task.toggle_done(now))
}

pub fn pin_task_impl(state: &DashboardState, task_id: String) -> Result<Task, InfraError> {
    update_task(state, "pin_task", &task_id, |task| task.pinned = !task.pinned)
}

fn update_task(
    state: &DashboardState,
    command: &str,
    task_id: &str,
    change: impl FnOnce(&mut Task),
) -> Result<Task, InfraError> {
    let task_id = required_id(command, "task_id", task_id)?;
    let known = state
        .tasks
        .with(|tasks| tasks.iter().any(|task| task.id == task_id));
    if !known {
        return Err(reject(command, format!("task not found: {task_id}")));
    }

    let tasks = state.tasks.update(|tasks| {
        if let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) {
            change(task);
        }
    });
    let Some(task) = tasks.into_iter().find(|task| task.id == task_id) else {
        return Err(reject(command, format!("task not found: {task_id}")));
    };
    info!(command, task_id, done = task.done, pinned = task.pinned, "updated task");
    Ok(task)
}

pub fn delete_task_impl(state: &DashboardState, task_id: String) -> Result<bool, InfraError> {
    let task_id = required_id("delete_task", "task_id", &task_id)?;
    let known = state
        .tasks
        .with(|tasks| tasks.iter().any(|task| task.id == task_id));
    if !known {
        return Ok(false);
    }

    state
        .tasks
        .update(|tasks| tasks.retain(|task| task.id != task_id));
    info!(command = "delete_task", task_id, "deleted task");
    Ok(true)
}

/// Starts a guided breathing session, or restarts the cycle of one already
/// running. Sessions live in memory only.
pub fn start_breathing_impl(state: &DashboardState) -> BreathCue {
    let now = state.clock.now();
    *state
        .breathing_since
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(now);
    let cue = breath_cue(std::time::Duration::ZERO);
    info!(command = "start_breathing", phase = cue.phase.as_str(), "breathing started");
    cue
}

pub fn stop_breathing_impl(state: &DashboardState) -> bool {
    let was_running = state
        .breathing_since
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .is_some();
    info!(command = "stop_breathing", was_running, "breathing stopped");
    was_running
}

pub fn get_breathing_cue_impl(state: &DashboardState) -> Option<BreathCue> {
    state.breathing_cue(state.clock.now())
}

pub async fn get_weather_snapshot_impl(state: &DashboardState) -> Option<WeatherSnapshot> {
    fetch_weather_snapshot(
        state.location.as_ref(),
        state.weather.as_ref(),
        &state.ambient_settings,
    )
    .await
}

pub fn get_dashboard_view_impl(state: &DashboardState) -> DashboardView {
    let now = state.clock.now();
    let local_now = now.with_timezone(&state.zone);
    let today = DayKey::from_date(local_now.date_naive());
    let (open_tasks, pinned_tasks) = state.tasks.with(|tasks| {
        (
            tasks.iter().filter(|task| !task.done).count(),
            tasks.iter().filter(|task| task.pinned).count(),
        )
    });

    DashboardView {
        now: local_now.to_rfc3339(),
        greeting: greeting_text(local_now.hour(), state.config.app.greeting_name.as_deref()),
        today,
        day_progress: day_progress_percent(local_now.time()),
        quote: quote_of_the_day(local_now.date_naive()),
        breathing: state.breathing_cue(now),
        ambient: get_ambient_state_impl(state),
        pomodoro: get_pomodoro_state_impl(state),
        reading: state.reading.with(|marks| consistency_summary(marks, today)),
        habits: list_habits_impl(state),
        open_tasks,
        pinned_tasks,
    }
}
