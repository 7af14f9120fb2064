//! Collaborator interface between the timer engine and the box.
//!
//! Everything the engine needs from the outside world (clock, recording
//! state, standby state, user prompts, power actions) goes through
//! [`TimerHost`]. The queue owns its host, entries borrow it during
//! activation.

use crate::error::HostError;
use crate::types::{PowerAction, TimerId};

/// What a confirmation prompt asks the user to allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    EnterStandby,
    DeepStandby,
    Reboot,
    Restart,
}

impl PromptKind {
    /// Power action performed when the user answers yes.
    pub fn action(self) -> PowerAction {
        match self {
            PromptKind::EnterStandby => PowerAction::Standby,
            PromptKind::DeepStandby => PowerAction::DeepStandby,
            PromptKind::Reboot => PowerAction::Reboot,
            PromptKind::Restart => PowerAction::Restart,
        }
    }

    /// Prompts that take the box down count as "shutdown prompt open".
    pub fn is_shutdown(self) -> bool {
        !matches!(self, PromptKind::EnterStandby)
    }
}

/// Identifies an outstanding prompt when its answer comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptTicket {
    pub timer: TimerId,
    pub kind: PromptKind,
}

/// An asynchronous yes/no question for the user.
///
/// Posting never blocks. The answer re-enters the engine through
/// [`TimerQueue::answer_prompt`](crate::queue::TimerQueue::answer_prompt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub ticket: PromptTicket,
    pub message: String,
    pub timeout_secs: u32,
    /// Answer assumed when the prompt times out.
    pub default_answer: bool,
}

/// Box-side services used by the timer engine.
pub trait TimerHost {
    /// Current time, seconds since the epoch.
    fn now(&self) -> i64;

    fn is_recording_active(&self) -> bool;

    /// Begin of the next scheduled recording, if any.
    fn next_recording_time(&self) -> Option<i64>;

    /// Begin of the next scheduled zap, if any.
    fn next_zap_time(&self) -> Option<i64>;

    fn is_in_standby(&self) -> bool;

    /// A shutdown/reboot confirmation is currently on screen.
    fn is_shutdown_prompt_open(&self) -> bool;

    fn is_timeshift_recording(&self) -> bool {
        false
    }

    fn prompt_user(&mut self, request: PromptRequest);

    /// Called once an answer for `ticket` has been consumed.
    fn prompt_closed(&mut self, _ticket: &PromptTicket) {}

    fn perform_power_action(&mut self, action: PowerAction) -> Result<(), HostError>;
}
