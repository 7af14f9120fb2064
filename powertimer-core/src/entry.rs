//! A single power timer and its state machine.
//!
//! ```text
//! Waiting --(start_prepare)--> Prepared --(begin)--> Running --(end)--> Ended
//!    \______________________________\___________________\______> Failed
//! ```
//!
//! Every timer type shares one [`TimerEntry`]; the type-specific behavior is
//! a `match` on [`TimerType`] inside [`TimerEntry::activate`].

use std::fmt;

use chrono::{Local, TimeZone};
use log::{debug, warn};

use crate::host::{PromptKind, PromptRequest, PromptTicket, TimerHost};
use crate::repeat;
use crate::sanity::{self, TimerSpan};
use crate::types::*;

const MSG_STANDBY: &str = "Your receiver wants to set your receiver to standby.\nDo that now?";
const MSG_SHUTDOWN: &str = "Your receiver wants to shut down your receiver.\nDo that now?";
const MSG_REBOOT: &str = "Your receiver wants to reboot your receiver.\nDo that now?";
const MSG_RESTART: &str = "Your receiver wants to restart the user interface.\nDo that now?";
const MSG_AFTER_STANDBY: &str = "A finished power timer wants to set your\nreceiver to standby. Do that now?";
const MSG_AFTER_SHUTDOWN: &str = "A finished power timer wants to shut down\nyour receiver. Shutdown now?";

/// Prompt timeout for explicit standby/shutdown timers.
const PROMPT_TIMEOUT: u32 = 180;
/// Prompt timeout for idle (auto-sleep) timers.
const AUTO_PROMPT_TIMEOUT: u32 = 10;

/// Result of [`TimerEntry::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Activation {
    /// The queue should advance the entry to its next state.
    pub accepted: bool,
    /// A confirmation was posted; its answer arrives later.
    pub prompt: Option<PromptRequest>,
}

impl Activation {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            prompt: None,
        }
    }

    /// Keep the current state and retry at the next activation time.
    pub fn defer() -> Self {
        Self {
            accepted: false,
            prompt: None,
        }
    }

    fn with_prompt(mut self, prompt: PromptRequest) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// A scheduled power timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerEntry {
    id: TimerId,
    begin: i64,
    end: i64,
    start_prepare: i64,
    state: TimerState,
    disabled: bool,
    cancelled: bool,
    dont_save: bool,
    /// Weekday mask, see [`weekdays`].
    repeated: u8,
    timer_type: TimerType,
    after_event: AfterEvent,
    /// Minutes of inactivity before an auto-sleep timer fires.
    auto_sleep_delay: u32,
    auto_sleep_repeat: AutoSleepRepeat,
    autoincrease: bool,
    autoincrease_time: i64,
    backoff: i64,
    key_listener_armed: bool,
    prompts: Vec<PromptKind>,
    log_entries: Vec<LogEntry>,
}

impl TimerEntry {
    /// Create a waiting entry. `end` is raised to `begin` if it lies before it.
    pub fn new(begin: i64, end: i64, timer_type: TimerType) -> Self {
        let mut entry = Self {
            id: TimerId::UNASSIGNED,
            begin,
            end: end.max(begin),
            start_prepare: 0,
            state: TimerState::Waiting,
            disabled: false,
            cancelled: false,
            dont_save: false,
            repeated: 0,
            timer_type,
            after_event: AfterEvent::None,
            auto_sleep_delay: 60,
            auto_sleep_repeat: AutoSleepRepeat::Once,
            autoincrease: false,
            autoincrease_time: AUTOINCREASE_DEFAULT,
            backoff: 0,
            key_listener_armed: false,
            prompts: Vec::new(),
            log_entries: Vec::new(),
        };
        entry.start_prepare = entry.begin.saturating_sub(PREPARE_TIME);
        entry
    }

    pub fn with_after_event(mut self, after_event: AfterEvent) -> Self {
        self.after_event = after_event;
        self
    }

    pub fn with_repeated(mut self, mask: u8) -> Self {
        self.repeated = mask;
        self
    }

    pub fn with_auto_sleep(mut self, delay_minutes: u32, repeat: AutoSleepRepeat) -> Self {
        self.auto_sleep_delay = delay_minutes;
        self.auto_sleep_repeat = repeat;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_autoincrease(mut self, autoincrease: bool) -> Self {
        self.autoincrease = autoincrease;
        self
    }

    pub fn with_dont_save(mut self, dont_save: bool) -> Self {
        self.dont_save = dont_save;
        self
    }

    pub fn with_log_entries(mut self, log_entries: Vec<LogEntry>) -> Self {
        self.log_entries = log_entries;
        self
    }

    /// Pull a begin more than two weeks in the past up to `now`.
    pub fn with_stale_check(mut self, now: i64) -> Self {
        if self.begin < now - STALE_TIMER_AGE {
            self.set_begin(now);
            self.start_prepare = self.begin.saturating_sub(PREPARE_TIME);
        }
        self
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TimerId) {
        self.id = id;
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn start_prepare(&self) -> i64 {
        self.start_prepare
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TimerState) {
        self.state = state;
    }

    pub fn timer_type(&self) -> TimerType {
        self.timer_type
    }

    pub fn after_event(&self) -> AfterEvent {
        self.after_event
    }

    pub fn repeated(&self) -> u8 {
        self.repeated
    }

    pub fn auto_sleep_delay(&self) -> u32 {
        self.auto_sleep_delay
    }

    pub fn auto_sleep_repeat(&self) -> AutoSleepRepeat {
        self.auto_sleep_repeat
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn dont_save(&self) -> bool {
        self.dont_save
    }

    pub fn autoincrease(&self) -> bool {
        self.autoincrease
    }

    pub fn backoff(&self) -> i64 {
        self.backoff
    }

    pub fn key_listener_armed(&self) -> bool {
        self.key_listener_armed
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log_entries
    }

    /// Prompts posted by this entry that have not been answered yet.
    pub fn outstanding_prompts(&self) -> &[PromptKind] {
        &self.prompts
    }

    pub fn span(&self) -> TimerSpan {
        TimerSpan {
            id: self.id,
            begin: self.begin,
            end: self.end,
            disabled: self.disabled,
        }
    }

    /// Move `begin`, dragging `end` along when it would fall behind.
    ///
    /// Call [`TimerQueue::time_changed`](crate::queue::TimerQueue::time_changed)
    /// afterwards when the entry is queued.
    pub fn set_begin(&mut self, begin: i64) {
        self.begin = begin;
        if self.end < self.begin {
            self.end = self.begin;
        }
    }

    /// Set `end`, never earlier than `begin`.
    pub fn set_end(&mut self, end: i64) {
        self.end = end.max(self.begin);
    }

    pub fn set_window(&mut self, begin: i64, end: i64) {
        self.begin = begin;
        self.end = end.max(begin);
    }

    pub fn set_repeated(&mut self, mask: u8) {
        self.repeated = mask;
    }

    pub fn set_timer_type(&mut self, timer_type: TimerType) {
        self.timer_type = timer_type;
    }

    pub fn set_after_event(&mut self, after_event: AfterEvent) {
        self.after_event = after_event;
    }

    pub fn set_auto_sleep(&mut self, delay_minutes: u32, repeat: AutoSleepRepeat) {
        self.auto_sleep_delay = delay_minutes;
        self.auto_sleep_repeat = repeat;
    }

    pub fn set_autoincrease(&mut self, autoincrease: bool) {
        self.autoincrease = autoincrease;
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn enable(&mut self) {
        self.disabled = false;
    }

    /// Append to the audit trail.
    pub fn log(&mut self, now: i64, code: u32, text: impl Into<String>) {
        let text = text.into();
        debug!("[PowerTimer] {} {}", self, text);
        self.log_entries.push(LogEntry::new(now, code, text));
    }

    /// Next time the scheduler must look at this entry.
    pub fn next_activation(&self) -> i64 {
        if self.state.is_terminal() {
            return self.end;
        }
        match self.state.next() {
            TimerState::Prepared => self.start_prepare,
            TimerState::Running => self.begin,
            _ => self.end,
        }
    }

    /// The whole window elapsed before the entry even prepared.
    pub fn should_skip(&self, now: i64) -> bool {
        self.end <= now && self.state == TimerState::Waiting
    }

    /// Recompute the prepare time after `begin` moved.
    pub fn time_changed(&mut self, now: i64) {
        let old_prepare = self.start_prepare;
        self.start_prepare = self.begin.saturating_sub(PREPARE_TIME);
        self.backoff = 0;

        if old_prepare != self.start_prepare {
            let text = format!("time changed, start prepare is now: {}", format_time(self.start_prepare));
            self.log(now, 15, text);
        }
    }

    /// End the entry now. A second call has no further effect.
    pub fn abort(&mut self, now: i64) {
        if self.cancelled && self.end <= now {
            return;
        }
        self.end = now;
        if self.begin > self.end {
            self.begin = self.end;
        }
        self.cancelled = true;
        self.log(now, 12, "aborted");
    }

    /// Move a non-terminal entry to Failed.
    pub fn fail(&mut self, now: i64, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        warn!("[PowerTimer] {} failed: {}", self, reason);
        self.state = TimerState::Failed;
        self.key_listener_armed = false;
        self.log(now, 16, format!("failed: {}", reason));
    }

    /// Step to the next state after an accepted activation.
    pub fn advance(&mut self) {
        self.state = self.state.next();
    }

    /// Put a repeating entry back to its first state for the next occurrence.
    pub(crate) fn reset_state(&mut self) {
        self.state = TimerState::Waiting;
        self.cancelled = false;
        self.key_listener_armed = false;
    }

    /// Shift a repeating entry to its next weekday occurrence in local time.
    pub fn process_repeated(&mut self, now: i64) {
        self.process_repeated_in(&Local, now, true);
    }

    pub fn process_repeated_in<Tz: TimeZone>(&mut self, tz: &Tz, now: i64, find_running: bool) {
        if self.repeated == 0 {
            return;
        }
        let (begin, end) =
            repeat::next_occurrence(tz, self.repeated, self.begin, self.end, now + 1, find_running);
        self.set_window(begin, end);
        if self.begin == self.end {
            self.end += 1;
        }
        self.time_changed(now);
    }

    /// User activity postpones an armed auto-sleep timer.
    pub fn key_pressed(&mut self, now: i64) -> bool {
        if !self.key_listener_armed {
            return false;
        }
        self.postpone_auto_sleep(now);
        true
    }

    pub(crate) fn disarm_key_listener(&mut self) {
        self.key_listener_armed = false;
    }

    pub(crate) fn note_prompt(&mut self, kind: PromptKind) {
        self.prompts.push(kind);
    }

    /// Forget every outstanding prompt, returning their kinds.
    pub(crate) fn take_prompts(&mut self) -> Vec<PromptKind> {
        std::mem::take(&mut self.prompts)
    }

    /// Consume an outstanding prompt of `kind`.
    pub(crate) fn take_prompt(&mut self, kind: PromptKind) -> bool {
        match self.prompts.iter().position(|k| *k == kind) {
            Some(idx) => {
                self.prompts.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Extend an auto-increasing entry.
    ///
    /// The new end is `now + autoincrease_time`, or 30 seconds before
    /// `next_begin` when given, clipped to 30 seconds before the first
    /// conflicting entry in `others`. Returns `false` (and leaves `end`
    /// alone) when the entry does not auto-increase or the result is not in
    /// the future.
    pub fn set_autoincrease_end(&mut self, others: &[TimerEntry], next_begin: Option<i64>, now: i64) -> bool {
        if !self.autoincrease {
            return false;
        }
        let mut new_end = match next_begin {
            Some(begin) => begin - AUTOINCREASE_MARGIN,
            None => now + self.autoincrease_time,
        };

        let candidate = TimerSpan {
            end: new_end.max(self.begin),
            ..self.span()
        };
        let report = sanity::check(&candidate, others);
        if let Some(conflict) = report.first_conflict() {
            new_end = conflict.begin - AUTOINCREASE_MARGIN;
        }

        if new_end <= now {
            return false;
        }
        self.set_end(new_end);
        true
    }

    /// Perform the side effect for entering `state + 1`.
    pub fn activate<H: TimerHost + ?Sized>(&mut self, host: &mut H) -> Activation {
        let now = host.now();
        let next_state = self.state.next();
        self.log(now, 5, format!("activating state {}", next_state as u8));

        if self.state.is_terminal() {
            return Activation::accept();
        }
        match next_state {
            TimerState::Prepared => self.enter_prepared(now),
            TimerState::Running => self.enter_running(host, now),
            _ => self.enter_ended(host, now),
        }
    }

    fn enter_prepared(&mut self, now: i64) -> Activation {
        if self.timer_type.is_auto_sleep() {
            self.key_listener_armed = true;
            self.postpone_auto_sleep(now);
        }
        self.log(now, 6, "prepare ok, waiting for begin");
        self.backoff = 0;
        Activation::accept()
    }

    fn enter_running<H: TimerHost + ?Sized>(&mut self, host: &mut H, now: i64) -> Activation {
        if self.cancelled {
            return Activation::accept();
        }

        match self.timer_type {
            TimerType::Wakeup => {
                if host.is_in_standby() {
                    self.power_now(host, now, PowerAction::Wake);
                }
                Activation::accept()
            }
            TimerType::WakeupToStandby => Activation::accept(),
            TimerType::Standby => {
                if host.is_in_standby() {
                    return Activation::accept();
                }
                let prompt = self.prompt(PromptKind::EnterStandby, MSG_STANDBY, PROMPT_TIMEOUT);
                Activation::accept().with_prompt(prompt)
            }
            TimerType::AutoStandby => {
                if host.is_in_standby() {
                    self.postpone_auto_sleep(now);
                    return Activation::defer();
                }
                let prompt = self.prompt(PromptKind::EnterStandby, MSG_STANDBY, AUTO_PROMPT_TIMEOUT);
                self.finish_or_rearm(now).with_prompt(prompt)
            }
            TimerType::AutoDeepStandby => {
                if self.near_recording(host, now) {
                    return self.back_off(now);
                }
                if host.is_shutdown_prompt_open() {
                    return Activation::defer();
                }
                if host.is_in_standby() {
                    self.power_now(host, now, PowerAction::DeepStandby);
                    return Activation::accept();
                }
                let prompt = self.prompt(PromptKind::DeepStandby, MSG_SHUTDOWN, AUTO_PROMPT_TIMEOUT);
                self.finish_or_rearm(now).with_prompt(prompt)
            }
            TimerType::DeepStandby | TimerType::Reboot | TimerType::Restart => {
                if self.near_recording(host, now) {
                    return self.back_off(now);
                }
                if host.is_shutdown_prompt_open() {
                    return Activation::accept();
                }
                let (action, kind, message) = match self.timer_type {
                    TimerType::Reboot => (PowerAction::Reboot, PromptKind::Reboot, MSG_REBOOT),
                    TimerType::Restart => (PowerAction::Restart, PromptKind::Restart, MSG_RESTART),
                    _ => (PowerAction::DeepStandby, PromptKind::DeepStandby, MSG_SHUTDOWN),
                };
                if host.is_in_standby() {
                    self.power_now(host, now, action);
                    return Activation::accept();
                }
                let prompt = self.prompt(kind, message, PROMPT_TIMEOUT);
                Activation::accept().with_prompt(prompt)
            }
        }
    }

    fn enter_ended<H: TimerHost + ?Sized>(&mut self, host: &mut H, now: i64) -> Activation {
        self.key_listener_armed = false;
        if self.cancelled {
            return Activation::accept();
        }

        match self.after_event {
            AfterEvent::Standby if !host.is_in_standby() => {
                let prompt = self.prompt(PromptKind::EnterStandby, MSG_AFTER_STANDBY, PROMPT_TIMEOUT);
                Activation::accept().with_prompt(prompt)
            }
            AfterEvent::DeepStandby if !host.is_shutdown_prompt_open() => {
                if host.is_in_standby() {
                    self.power_now(host, now, PowerAction::DeepStandby);
                    return Activation::accept();
                }
                let prompt = self.prompt(PromptKind::DeepStandby, MSG_AFTER_SHUTDOWN, PROMPT_TIMEOUT);
                Activation::accept().with_prompt(prompt)
            }
            _ => Activation::accept(),
        }
    }

    /// "once" auto-sleep timers finish; repeating ones wait another delay.
    fn finish_or_rearm(&mut self, now: i64) -> Activation {
        match self.auto_sleep_repeat {
            AutoSleepRepeat::Once => {
                self.key_listener_armed = false;
                Activation::accept()
            }
            AutoSleepRepeat::Repeated => {
                self.postpone_auto_sleep(now);
                Activation::defer()
            }
        }
    }

    fn postpone_auto_sleep(&mut self, now: i64) {
        self.set_begin(now + i64::from(self.auto_sleep_delay) * 60);
    }

    fn near_recording<H: TimerHost + ?Sized>(&self, host: &H, now: i64) -> bool {
        let near = |t: Option<i64>| t.is_some_and(|t| t.abs_diff(now) <= RECORDING_GUARD_SECS.unsigned_abs());
        host.is_recording_active() || near(host.next_recording_time()) || near(host.next_zap_time())
    }

    fn back_off(&mut self, now: i64) -> Activation {
        self.backoff = if self.backoff == 0 {
            BACKOFF_INITIAL
        } else {
            (self.backoff * 2).min(BACKOFF_MAX)
        };
        self.log(now, 10, format!("backoff: retry in {} minutes", self.backoff / 60));
        self.set_begin(now + self.backoff);
        Activation::defer()
    }

    fn power_now<H: TimerHost + ?Sized>(&mut self, host: &mut H, now: i64, action: PowerAction) {
        self.log(now, 7, format!("performing {}", action));
        if let Err(e) = host.perform_power_action(action) {
            self.fail(now, &e.to_string());
        }
    }

    fn prompt(&self, kind: PromptKind, message: &str, timeout_secs: u32) -> PromptRequest {
        PromptRequest {
            ticket: PromptTicket { timer: self.id, kind },
            message: message.to_string(),
            timeout_secs,
            default_answer: true,
        }
    }
}

impl fmt::Display for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PowerTimer({}, type={}, begin={})",
            self.id,
            self.timer_type,
            format_time(self.begin)
        )
    }
}

/// ctime-style local rendering for log lines.
pub fn format_time(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => ts.to_string(),
    }
}
