use crate::application::cell::PersistentCell;
use crate::application::clock::{Ticker, TICK_PERIOD};
use crate::domain::timer::{TimerPhase, TimerState, WORK_SECONDS};
use crate::infrastructure::storage::KeyValueStore;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

pub const PHASE_KEY: &str = "dd_pomo_phase";
pub const SECONDS_KEY: &str = "dd_pomo_seconds";
pub const AUTO_SWITCH_KEY: &str = "dd_pomo_auto";

struct TimerCells {
    phase: PersistentCell<TimerPhase>,
    seconds_left: PersistentCell<u32>,
    auto_switch: PersistentCell<bool>,
}

impl TimerCells {
    fn open(store: &Arc<dyn KeyValueStore>) -> Self {
        Self {
            phase: PersistentCell::open(Arc::clone(store), PHASE_KEY, TimerPhase::Idle),
            seconds_left: PersistentCell::open(Arc::clone(store), SECONDS_KEY, WORK_SECONDS),
            auto_switch: PersistentCell::open(Arc::clone(store), AUTO_SWITCH_KEY, true),
        }
    }

    fn load(&self) -> TimerState {
        TimerState {
            phase: self.phase.get(),
            seconds_left: self.seconds_left.get(),
            auto_switch: self.auto_switch.get(),
        }
    }

    fn store(&self, state: &TimerState) {
        if self.phase.get() != state.phase {
            self.phase.set(state.phase);
        }
        if self.seconds_left.get() != state.seconds_left {
            self.seconds_left.set(state.seconds_left);
        }
        if self.auto_switch.get() != state.auto_switch {
            self.auto_switch.set(state.auto_switch);
        }
    }
}

struct EngineInner {
    state: TimerState,
    cells: TimerCells,
    ticker: Ticker,
    loop_epoch: u64,
    last_tick: Option<Instant>,
    updates: watch::Sender<TimerState>,
}

impl EngineInner {
    fn commit(&mut self) {
        self.cells.store(&self.state);
        self.updates.send_replace(self.state);
    }

    fn stop_loop(&mut self) {
        self.loop_epoch = self.loop_epoch.wrapping_add(1);
        self.last_tick = None;
        self.ticker.cancel();
    }

    /// Applies every whole second elapsed since the last applied tick, so a
    /// late wakeup catches up instead of drifting.
    fn apply_elapsed(&mut self, now: Instant) -> ControlFlow<()> {
        let anchor = *self.last_tick.get_or_insert(now);
        let whole_seconds = now.saturating_duration_since(anchor).as_secs();
        if whole_seconds > 0 {
            self.last_tick = Some(anchor + Duration::from_secs(whole_seconds));
            for _ in 0..whole_seconds {
                self.state.tick();
                if !self.state.is_running() {
                    break;
                }
            }
            self.commit();
        }
        if self.state.is_running() {
            ControlFlow::Continue(())
        } else {
            debug!(phase = self.state.phase.as_str(), "pomodoro countdown stopped");
            self.stop_loop();
            ControlFlow::Break(())
        }
    }
}

/// Pomodoro countdown whose three fields survive restarts. At most one
/// decrement loop exists at any time; every loop carries the epoch it was
/// started under and quits once that epoch is superseded.
#[derive(Clone)]
pub struct PomodoroEngine {
    inner: Arc<Mutex<EngineInner>>,
}

impl PomodoroEngine {
    /// Restores the persisted timer. A timer persisted mid-countdown keeps
    /// counting from where it was saved.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let cells = TimerCells::open(&store);
        let mut state = cells.load();
        state.settle();
        let (updates, _) = watch::channel(state);
        let engine = Self {
            inner: Arc::new(Mutex::new(EngineInner {
                state,
                cells,
                ticker: Ticker::new(),
                loop_epoch: 0,
                last_tick: None,
                updates,
            })),
        };
        {
            let mut inner = engine.lock();
            inner.commit();
            if inner.state.is_running() {
                engine.restart_loop(&mut inner);
            }
        }
        engine
    }

    pub fn state(&self) -> TimerState {
        self.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.lock().updates.subscribe()
    }

    pub fn is_counting(&self) -> bool {
        self.lock().ticker.is_active()
    }

    pub fn start(&self) -> TimerState {
        let mut inner = self.lock();
        let was_running = inner.state.is_running();
        inner.state.start();
        if !was_running || !inner.ticker.is_active() {
            self.restart_loop(&mut inner);
        }
        inner.commit();
        debug!(seconds_left = inner.state.seconds_left, "pomodoro started");
        inner.state
    }

    /// Credits every whole second counted since the last tick, then freezes.
    pub fn pause(&self) -> TimerState {
        let mut inner = self.lock();
        if inner.state.is_running() && inner.last_tick.is_some() {
            let _ = inner.apply_elapsed(Instant::now());
        }
        inner.state.pause();
        if !inner.state.is_running() {
            inner.stop_loop();
        }
        inner.commit();
        inner.state
    }

    pub fn take_break(&self) -> TimerState {
        let mut inner = self.lock();
        inner.stop_loop();
        inner.state.take_break();
        inner.commit();
        debug!("pomodoro break started");
        inner.state
    }

    pub fn reset(&self) -> TimerState {
        let mut inner = self.lock();
        inner.stop_loop();
        inner.state.reset();
        inner.commit();
        inner.state
    }

    pub fn set_auto_switch(&self, enabled: bool) -> TimerState {
        let mut inner = self.lock();
        inner.state.auto_switch = enabled;
        inner.commit();
        inner.state
    }

    /// Stops the decrement loop without touching the persisted state.
    pub fn shutdown(&self) {
        self.lock().stop_loop();
    }

    fn restart_loop(&self, inner: &mut EngineInner) {
        inner.stop_loop();
        let epoch = inner.loop_epoch;
        inner.last_tick = Some(Instant::now());
        let shared: Weak<Mutex<EngineInner>> = Arc::downgrade(&self.inner);
        inner.ticker.restart(TICK_PERIOD, move |now| {
            let Some(shared) = shared.upgrade() else {
                return ControlFlow::Break(());
            };
            let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.loop_epoch != epoch {
                return ControlFlow::Break(());
            }
            inner.apply_elapsed(now)
        });
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timer::BREAK_SECONDS;
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use tokio::time;

    fn memory_store() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryKeyValueStore::default())
    }

    fn persisted(store: &Arc<dyn KeyValueStore>, key: &str) -> Option<String> {
        store.load(key).expect("load")
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_engine_is_idle_with_full_session() {
        let engine = PomodoroEngine::open(memory_store());
        let state = engine.state();
        assert_eq!(state.phase, TimerPhase::Idle);
        assert_eq!(state.seconds_left, WORK_SECONDS);
        assert!(state.auto_switch);
        assert!(!engine.is_counting());
    }

    #[tokio::test(start_paused = true)]
    async fn running_timer_counts_down_once_per_second() {
        let store = memory_store();
        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.start();

        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(engine.state().seconds_left, WORK_SECONDS - 3);
        assert_eq!(persisted(&store, SECONDS_KEY), Some((WORK_SECONDS - 3).to_string()));
        assert_eq!(persisted(&store, PHASE_KEY), Some("\"running\"".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_never_double_decrements() {
        let engine = PomodoroEngine::open(memory_store());
        engine.start();
        engine.pause();
        engine.start();
        engine.start();

        time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(engine.state().seconds_left, WORK_SECONDS - 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_countdown() {
        let engine = PomodoroEngine::open(memory_store());
        engine.start();
        time::sleep(Duration::from_millis(2_500)).await;
        let paused = engine.pause();
        assert_eq!(paused.phase, TimerPhase::Paused);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(engine.state().seconds_left, WORK_SECONDS - 2);
        assert!(!engine.is_counting());
    }

    #[tokio::test(start_paused = true)]
    async fn late_wakeup_credits_true_elapsed_time() {
        let engine = PomodoroEngine::open(memory_store());
        engine.start();
        time::sleep(Duration::from_millis(500)).await;
        time::advance(Duration::from_millis(4_700)).await;

        let paused = engine.pause();
        assert_eq!(paused.phase, TimerPhase::Paused);
        assert_eq!(paused.seconds_left, WORK_SECONDS - 5);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.state().seconds_left, WORK_SECONDS - 5);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_before_next_tick_keeps_counted_seconds() {
        let engine = PomodoroEngine::open(memory_store());
        engine.start();
        time::sleep(Duration::from_millis(2_500)).await;
        engine.pause();
        engine.start();

        time::advance(Duration::from_millis(1_900)).await;
        let paused = engine.pause();
        assert_eq!(paused.seconds_left, WORK_SECONDS - 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_session_switches_to_break_and_stops_counting() {
        let store = memory_store();
        store.save(PHASE_KEY, "\"running\"").expect("seed phase");
        store.save(SECONDS_KEY, "2").expect("seed seconds");

        let engine = PomodoroEngine::open(Arc::clone(&store));
        time::sleep(Duration::from_secs(5)).await;

        let state = engine.state();
        assert_eq!(state.phase, TimerPhase::Break);
        assert_eq!(state.seconds_left, BREAK_SECONDS);
        assert!(!engine.is_counting());
        assert_eq!(persisted(&store, PHASE_KEY), Some("\"break\"".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_session_without_auto_switch_goes_idle() {
        let store = memory_store();
        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.set_auto_switch(false);
        store.save(SECONDS_KEY, "1").expect("seed seconds");
        drop(engine);

        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.start();
        time::sleep(Duration::from_secs(3)).await;

        let state = engine.state();
        assert_eq!(state.phase, TimerPhase::Idle);
        assert_eq!(state.seconds_left, 0);
        assert_eq!(persisted(&store, AUTO_SWITCH_KEY), Some("false".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn reopened_engine_resumes_persisted_countdown() {
        let store = memory_store();
        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.start();
        time::sleep(Duration::from_millis(4_500)).await;
        drop(engine);

        let reopened = PomodoroEngine::open(Arc::clone(&store));
        let state = reopened.state();
        assert_eq!(state.phase, TimerPhase::Running);
        assert_eq!(state.seconds_left, WORK_SECONDS - 4);
        assert!(reopened.is_counting());

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(reopened.state().seconds_left, WORK_SECONDS - 5);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_engine_stops_its_loop() {
        let store = memory_store();
        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.start();
        time::sleep(Duration::from_millis(1_500)).await;
        drop(engine);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(persisted(&store, SECONDS_KEY), Some((WORK_SECONDS - 1).to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn break_and_reset_stop_the_loop() {
        let engine = PomodoroEngine::open(memory_store());
        engine.start();
        let on_break = engine.take_break();
        assert_eq!(on_break.phase, TimerPhase::Break);
        assert_eq!(on_break.seconds_left, BREAK_SECONDS);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.state().seconds_left, BREAK_SECONDS);

        let reset = engine.reset();
        assert_eq!(reset.phase, TimerPhase::Idle);
        assert_eq!(reset.seconds_left, WORK_SECONDS);
        assert!(!engine.is_counting());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_countdown_updates() {
        let engine = PomodoroEngine::open(memory_store());
        let mut updates = engine.subscribe();
        engine.start();
        assert_eq!(updates.borrow_and_update().phase, TimerPhase::Running);

        updates.changed().await.expect("engine alive");
        assert_eq!(updates.borrow().seconds_left, WORK_SECONDS - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_persisted_phase() {
        let store = memory_store();
        let engine = PomodoroEngine::open(Arc::clone(&store));
        engine.start();
        engine.shutdown();
        time::sleep(Duration::from_secs(3)).await;

        assert_eq!(engine.state().phase, TimerPhase::Running);
        assert_eq!(engine.state().seconds_left, WORK_SECONDS);
        assert_eq!(persisted(&store, PHASE_KEY), Some("\"running\"".to_string()));
    }
}
