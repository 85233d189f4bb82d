use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::warn;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_now() -> NowProvider {
    Arc::new(Utc::now)
}

/// Owns at most one periodic task. Restarting or dropping the ticker aborts
/// the previous task before anything else happens.
#[derive(Debug, Default)]
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `on_tick` every `period`, first one full period after this call,
    /// until it returns `Break` or the ticker is cancelled. The callback gets
    /// the instant it actually woke up at, which trails the deadline when
    /// the runtime is late. Returns `false` when no async runtime is
    /// available to drive it.
    pub fn restart<F>(&mut self, period: Duration, mut on_tick: F) -> bool
    where
        F: FnMut(Instant) -> ControlFlow<()> + Send + 'static,
    {
        self.cancel();
        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime available; ticker not started");
            return false;
        };
        let first_deadline = Instant::now() + period;
        self.handle = Some(runtime.spawn(async move {
            let mut interval = time::interval_at(first_deadline, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if on_tick(Instant::now()).is_break() {
                    break;
                }
            }
        }));
        true
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Wall clock published once per second while started.
pub struct Clock {
    now_provider: NowProvider,
    ticker: Mutex<Ticker>,
    current: watch::Sender<DateTime<Utc>>,
}

impl Clock {
    pub fn new(now_provider: NowProvider) -> Self {
        let (current, _) = watch::channel(now_provider());
        Self {
            now_provider,
            ticker: Mutex::new(Ticker::new()),
            current,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn now_provider(&self) -> NowProvider {
        Arc::clone(&self.now_provider)
    }

    pub fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.current.subscribe()
    }

    /// (Re)starts the tick stream; an earlier stream is stopped first.
    pub fn start<F>(&self, mut on_tick: F) -> bool
    where
        F: FnMut(DateTime<Utc>) + Send + 'static,
    {
        let now_provider = Arc::clone(&self.now_provider);
        let current = self.current.clone();
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        ticker.restart(TICK_PERIOD, move |_| {
            let now = now_provider();
            on_tick(now);
            current.send_replace(now);
            ControlFlow::Continue(())
        })
    }

    pub fn stop(&self) {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_active()
    }
}
