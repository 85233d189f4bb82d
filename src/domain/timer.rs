use serde::{Deserialize, Serialize};

pub const WORK_SECONDS: u32 = 25 * 60;
pub const BREAK_SECONDS: u32 = 5 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Break,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Break => "break",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimerState {
    pub phase: TimerPhase,
    pub seconds_left: u32,
    pub auto_switch: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TimerState {
    pub fn new(auto_switch: bool) -> Self {
        Self {
            phase: TimerPhase::Idle,
            seconds_left: WORK_SECONDS,
            auto_switch,
        }
    }

    /// `idle`/`paused` resume from the current countdown. Leaving a break
    /// or starting an exhausted countdown loads a full work session.
    pub fn start(&mut self) {
        match self.phase {
            TimerPhase::Running => {}
            TimerPhase::Break => {
                self.phase = TimerPhase::Running;
                self.seconds_left = WORK_SECONDS;
            }
            TimerPhase::Idle | TimerPhase::Paused => {
                self.phase = TimerPhase::Running;
                if self.seconds_left == 0 {
                    self.seconds_left = WORK_SECONDS;
                }
            }
        }
    }

    pub fn pause(&mut self) {
        if self.phase == TimerPhase::Running {
            self.phase = TimerPhase::Paused;
        }
    }

    pub fn take_break(&mut self) {
        self.phase = TimerPhase::Break;
        self.seconds_left = BREAK_SECONDS;
    }

    pub fn reset(&mut self) {
        self.phase = TimerPhase::Idle;
        self.seconds_left = WORK_SECONDS;
    }

    /// One second of countdown. Only a running timer moves.
    pub fn tick(&mut self) {
        if self.phase != TimerPhase::Running {
            return;
        }
        self.seconds_left = self.seconds_left.saturating_sub(1);
        self.settle();
    }

    /// Applies the exhaustion rule when the countdown sits at zero in a
    /// counting phase.
    pub fn settle(&mut self) {
        if self.seconds_left > 0 {
            return;
        }
        let next = match (self.phase, self.auto_switch) {
            (TimerPhase::Running, true) => TimerPhase::Break,
            (TimerPhase::Break, true) => TimerPhase::Running,
            (TimerPhase::Running | TimerPhase::Break, false) => TimerPhase::Idle,
            _ => return,
        };
        self.phase = next;
        self.seconds_left = match next {
            TimerPhase::Break => BREAK_SECONDS,
            TimerPhase::Running => WORK_SECONDS,
            _ => 0,
        };
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn countdown_text(&self) -> String {
        format!("{:02}:{:02}", self.seconds_left / 60, self.seconds_left % 60)
    }
}
