//! Host services for the daemon.
//!
//! Power actions run configured shell commands. Recording and standby state
//! arrive through the scheduler's command channel, usually fed by the
//! status file watcher.
//! There is no screen, so prompts are logged and answered with their
//! default once their timeout runs out.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

use powertimer_core::{HostError, PowerAction, PromptRequest, PromptTicket, TimerHost};

use crate::scheduler::SchedulerCommand;

/// Shell commands run for each power action. `None` only updates the
/// daemon's own view of the box.
#[derive(Debug, Clone, Default)]
pub struct PowerCommands {
    pub wake: Option<String>,
    pub standby: Option<String>,
    pub deep_standby: Option<String>,
    pub reboot: Option<String>,
    pub restart: Option<String>,
}

impl PowerCommands {
    fn get(&self, action: PowerAction) -> Option<&str> {
        match action {
            PowerAction::Wake => self.wake.as_deref(),
            PowerAction::Standby => self.standby.as_deref(),
            PowerAction::DeepStandby => self.deep_standby.as_deref(),
            PowerAction::Reboot => self.reboot.as_deref(),
            PowerAction::Restart => self.restart.as_deref(),
        }
    }
}

/// Snapshot reported by the recording service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingStatus {
    pub active: bool,
    pub next_recording: Option<i64>,
    pub next_zap: Option<i64>,
    pub timeshift: bool,
}

/// [`TimerHost`] backed by the local system.
#[derive(Debug)]
pub struct SystemHost {
    commands: PowerCommands,
    timer_wakeup_flag: Option<PathBuf>,
    in_standby: bool,
    recording: RecordingStatus,
    open_prompts: HashSet<PromptTicket>,
    answers: Option<UnboundedSender<SchedulerCommand>>,
}

impl SystemHost {
    pub fn new(commands: PowerCommands) -> Self {
        Self {
            commands,
            timer_wakeup_flag: None,
            in_standby: false,
            recording: RecordingStatus::default(),
            open_prompts: HashSet::new(),
            answers: None,
        }
    }

    /// File that reads `1` when the box was woken by a timer.
    pub fn with_timer_wakeup_flag(mut self, path: Option<PathBuf>) -> Self {
        self.timer_wakeup_flag = path;
        self
    }

    /// Channel used to deliver default answers of timed-out prompts.
    pub fn with_answer_channel(mut self, tx: UnboundedSender<SchedulerCommand>) -> Self {
        self.answers = Some(tx);
        self
    }

    pub fn set_recording_status(&mut self, status: RecordingStatus) {
        debug!("Recording status: {:?}", status);
        self.recording = status;
    }

    pub fn set_in_standby(&mut self, in_standby: bool) {
        debug!("Standby: {}", in_standby);
        self.in_standby = in_standby;
    }

    #[allow(dead_code)]
    pub fn open_prompt_count(&self) -> usize {
        self.open_prompts.len()
    }

    pub fn was_timer_wakeup(&self) -> bool {
        let Some(path) = &self.timer_wakeup_flag else {
            return false;
        };
        match fs::read_to_string(path) {
            Ok(text) => text.trim() == "1",
            Err(e) => {
                debug!("Cannot read wakeup flag {:?}: {}", path, e);
                false
            }
        }
    }

    fn schedule_default_answer(&self, request: &PromptRequest) {
        let Some(tx) = self.answers.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to time out prompt {:?}", request.ticket);
            return;
        };
        let ticket = request.ticket;
        let answer = request.default_answer;
        let timeout = Duration::from_secs(u64::from(request.timeout_secs));
        runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            // The scheduler may already be gone.
            let _ = tx.send(SchedulerCommand::PromptAnswered { ticket, answer });
        });
    }
}

impl TimerHost for SystemHost {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn is_recording_active(&self) -> bool {
        self.recording.active
    }

    fn next_recording_time(&self) -> Option<i64> {
        self.recording.next_recording
    }

    fn next_zap_time(&self) -> Option<i64> {
        self.recording.next_zap
    }

    fn is_in_standby(&self) -> bool {
        self.in_standby
    }

    fn is_shutdown_prompt_open(&self) -> bool {
        self.open_prompts.iter().any(|t| t.kind.is_shutdown())
    }

    fn is_timeshift_recording(&self) -> bool {
        self.recording.timeshift
    }

    fn prompt_user(&mut self, request: PromptRequest) {
        info!(
            "Prompt for {}: {:?} (answering {} in {}s)",
            request.ticket.timer,
            request.message,
            if request.default_answer { "yes" } else { "no" },
            request.timeout_secs
        );
        self.open_prompts.insert(request.ticket);
        self.schedule_default_answer(&request);
    }

    fn prompt_closed(&mut self, ticket: &PromptTicket) {
        self.open_prompts.remove(ticket);
    }

    fn perform_power_action(&mut self, action: PowerAction) -> Result<(), HostError> {
        if let Some(command) = self.commands.get(action) {
            info!("Performing {}: {}", action, command);
            let status = Command::new("sh")
                .arg("-c")
                .arg(command)
                .status()
                .map_err(|e| HostError::PowerActionFailed {
                    action,
                    reason: e.to_string(),
                })?;
            if !status.success() {
                return Err(HostError::PowerActionFailed {
                    action,
                    reason: format!("command exited with {}", status),
                });
            }
        } else {
            info!("Performing {} (no command configured)", action);
        }

        match action {
            PowerAction::Wake => self.in_standby = false,
            PowerAction::Standby => self.in_standby = true,
            _ => {}
        }
        Ok(())
    }
}
