//! Type definitions shared by the timer engine and the timer file format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Lead time before `begin` at which an entry becomes Prepared (seconds).
pub const PREPARE_TIME: i64 = 20;

/// First backoff delay after a rejected Running transition (seconds).
pub const BACKOFF_INITIAL: i64 = 5 * 60;

/// Upper bound for the backoff delay (seconds).
pub const BACKOFF_MAX: i64 = 1800;

/// A power action is refused while a recording or zap starts within this
/// many seconds.
pub const RECORDING_GUARD_SECS: i64 = 900;

/// The shutdown watch holds off while the next power timer is this close.
pub const SHUTDOWN_GUARD_SECS: i64 = 360;

/// Default extension for auto-increasing entries (one day).
pub const AUTOINCREASE_DEFAULT: i64 = 3600 * 24;

/// Gap left in front of the next entry when clipping an auto-increase.
pub const AUTOINCREASE_MARGIN: i64 = 30;

/// Entries whose begin is older than this are pulled up to "now" when
/// created with stale-time checking (two weeks).
pub const STALE_TIMER_AGE: i64 = 1_209_600;

/// Timeshift recording keeps the next power-manager time at most this far out.
pub const TIMESHIFT_WAKE_WINDOW: i64 = 300;

/// Identity of an entry inside a [`TimerQueue`](crate::queue::TimerQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Not yet inserted into a queue.
    pub const UNASSIGNED: TimerId = TimerId(0);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of an entry.
///
/// `Waiting -> Prepared -> Running -> Ended`, with `Failed` as an
/// additional terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimerState {
    Waiting = 0,
    Prepared = 1,
    Running = 2,
    Ended = 3,
    Failed = 4,
}

impl TimerState {
    /// State reached by a successful activation.
    pub fn next(self) -> Self {
        match self {
            TimerState::Waiting => TimerState::Prepared,
            TimerState::Prepared => TimerState::Running,
            TimerState::Running => TimerState::Ended,
            TimerState::Ended => TimerState::Ended,
            TimerState::Failed => TimerState::Failed,
        }
    }

    /// Ended or Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, TimerState::Ended | TimerState::Failed)
    }
}

/// What a power timer does when it starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerType {
    /// Wake the box from standby.
    Wakeup,
    /// Wake silently; the box goes back to standby after boot.
    WakeupToStandby,
    /// Idle sleep into standby, postponed by key presses.
    AutoStandby,
    /// Idle shutdown into deep standby, postponed by key presses.
    AutoDeepStandby,
    Standby,
    DeepStandby,
    Reboot,
    /// Restart the user interface only.
    Restart,
}

impl TimerType {
    /// Name used in the timer file.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerType::Wakeup => "wakeup",
            TimerType::WakeupToStandby => "wakeuptostandby",
            TimerType::AutoStandby => "autostandby",
            TimerType::AutoDeepStandby => "autodeepstandby",
            TimerType::Standby => "standby",
            TimerType::DeepStandby => "deepstandby",
            TimerType::Reboot => "reboot",
            TimerType::Restart => "restart",
        }
    }

    /// Auto-sleep variants carry a key-press listener while prepared.
    pub fn is_auto_sleep(&self) -> bool {
        matches!(self, TimerType::AutoStandby | TimerType::AutoDeepStandby)
    }

    /// Types that take the box down and therefore respect recordings.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            TimerType::AutoDeepStandby | TimerType::DeepStandby | TimerType::Reboot | TimerType::Restart
        )
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimerType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wakeup" => Ok(TimerType::Wakeup),
            "wakeuptostandby" => Ok(TimerType::WakeupToStandby),
            "autostandby" => Ok(TimerType::AutoStandby),
            "autodeepstandby" => Ok(TimerType::AutoDeepStandby),
            "standby" => Ok(TimerType::Standby),
            "deepstandby" => Ok(TimerType::DeepStandby),
            "reboot" => Ok(TimerType::Reboot),
            "restart" => Ok(TimerType::Restart),
            other => Err(RecordError::UnknownTimerType(other.to_string())),
        }
    }
}

/// Action taken once an entry's run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AfterEvent {
    #[default]
    #[serde(rename = "nothing")]
    None,
    #[serde(rename = "standby")]
    Standby,
    #[serde(rename = "deepstandby")]
    DeepStandby,
    #[serde(rename = "auto")]
    Auto,
}

impl AfterEvent {
    /// Name used in the timer file.
    pub fn as_str(&self) -> &'static str {
        match self {
            AfterEvent::None => "nothing",
            AfterEvent::Standby => "standby",
            AfterEvent::DeepStandby => "deepstandby",
            AfterEvent::Auto => "auto",
        }
    }
}

impl fmt::Display for AfterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AfterEvent {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nothing" => Ok(AfterEvent::None),
            "standby" => Ok(AfterEvent::Standby),
            "deepstandby" => Ok(AfterEvent::DeepStandby),
            "auto" => Ok(AfterEvent::Auto),
            other => Err(RecordError::UnknownAfterEvent(other.to_string())),
        }
    }
}

/// Whether an auto-sleep timer fires once or keeps re-arming itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoSleepRepeat {
    #[default]
    Once,
    Repeated,
}

impl AutoSleepRepeat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoSleepRepeat::Once => "once",
            AutoSleepRepeat::Repeated => "repeated",
        }
    }
}

impl FromStr for AutoSleepRepeat {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(AutoSleepRepeat::Once),
            "repeated" => Ok(AutoSleepRepeat::Repeated),
            other => Err(RecordError::UnknownAutoSleepRepeat(other.to_string())),
        }
    }
}

/// Irreversible system action requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    /// Leave standby.
    Wake,
    Standby,
    DeepStandby,
    Reboot,
    /// Restart the user interface.
    Restart,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerAction::Wake => "wake",
            PowerAction::Standby => "standby",
            PowerAction::DeepStandby => "deep standby",
            PowerAction::Reboot => "reboot",
            PowerAction::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// One line of an entry's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: i64,
    pub code: u32,
    pub text: String,
}

impl LogEntry {
    pub fn new(time: i64, code: u32, text: impl Into<String>) -> Self {
        Self {
            time,
            code,
            text: text.into(),
        }
    }
}

/// Weekday repeat mask, bit 0 = Monday through bit 6 = Sunday.
pub mod weekdays {
    pub const MONDAY: u8 = 1 << 0;
    pub const TUESDAY: u8 = 1 << 1;
    pub const WEDNESDAY: u8 = 1 << 2;
    pub const THURSDAY: u8 = 1 << 3;
    pub const FRIDAY: u8 = 1 << 4;
    pub const SATURDAY: u8 = 1 << 5;
    pub const SUNDAY: u8 = 1 << 6;
    pub const WORKDAYS: u8 = MONDAY | TUESDAY | WEDNESDAY | THURSDAY | FRIDAY;
    pub const ALL: u8 = WORKDAYS | SATURDAY | SUNDAY;

    /// `days_from_monday` as returned by `chrono::Weekday::num_days_from_monday`.
    pub fn contains(mask: u8, days_from_monday: u32) -> bool {
        days_from_monday < 7 && mask & (1 << days_from_monday) != 0
    }
}
