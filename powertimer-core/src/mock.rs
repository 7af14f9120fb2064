//! Scriptable host for unit tests.

use crate::error::HostError;
use crate::host::{PromptRequest, PromptTicket, TimerHost};
use crate::types::PowerAction;

#[derive(Debug, Default)]
pub struct MockHost {
    pub now: i64,
    pub recording: bool,
    pub next_recording: Option<i64>,
    pub next_zap: Option<i64>,
    pub in_standby: bool,
    pub shutdown_prompt_open: bool,
    pub timeshift: bool,
    pub fail_actions: bool,
    pub prompts: Vec<PromptRequest>,
    pub closed: Vec<PromptTicket>,
    pub actions: Vec<PowerAction>,
}

impl MockHost {
    pub fn at(now: i64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }
}

impl TimerHost for MockHost {
    fn now(&self) -> i64 {
        self.now
    }

    fn is_recording_active(&self) -> bool {
        self.recording
    }

    fn next_recording_time(&self) -> Option<i64> {
        self.next_recording
    }

    fn next_zap_time(&self) -> Option<i64> {
        self.next_zap
    }

    fn is_in_standby(&self) -> bool {
        self.in_standby
    }

    fn is_shutdown_prompt_open(&self) -> bool {
        self.shutdown_prompt_open
    }

    fn is_timeshift_recording(&self) -> bool {
        self.timeshift
    }

    fn prompt_user(&mut self, request: PromptRequest) {
        self.prompts.push(request);
    }

    fn prompt_closed(&mut self, ticket: &PromptTicket) {
        self.closed.push(*ticket);
    }

    fn perform_power_action(&mut self, action: PowerAction) -> Result<(), HostError> {
        if self.fail_actions {
            return Err(HostError::PowerActionFailed {
                action,
                reason: "scripted failure".to_string(),
            });
        }
        match action {
            PowerAction::Wake => self.in_standby = false,
            PowerAction::Standby => self.in_standby = true,
            _ => {}
        }
        self.actions.push(action);
        Ok(())
    }
}
