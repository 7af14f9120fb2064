//! Status file watcher.
//!
//! The recording service and the front panel keep a small JSON file up to
//! date:
//!
//! ```text
//! { "recording": false, "next_recording": 1700003600, "next_zap": null,
//!   "timeshift": false, "standby": true, "key_presses": 17 }
//! ```
//!
//! The watcher polls it and turns every change into scheduler commands.
//! `key_presses` is a counter; any increase counts as one key press.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::interval;

use powertimer_core::RecordEvent;

use crate::host::RecordingStatus;
use crate::scheduler::SchedulerCommand;

/// Contents of the status file. Missing fields read as idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub recording: bool,
    pub next_recording: Option<i64>,
    pub next_zap: Option<i64>,
    pub timeshift: bool,
    pub standby: Option<bool>,
    pub key_presses: u64,
}

impl StatusSnapshot {
    fn recording_status(&self) -> RecordingStatus {
        RecordingStatus {
            active: self.recording,
            next_recording: self.next_recording,
            next_zap: self.next_zap,
            timeshift: self.timeshift,
        }
    }
}

pub struct StatusWatcher {
    path: PathBuf,
    poll: Duration,
    last: Option<StatusSnapshot>,
}

impl StatusWatcher {
    pub fn new(path: PathBuf, poll_secs: u64) -> Self {
        Self {
            path,
            poll: Duration::from_secs(poll_secs.max(1)),
            last: None,
        }
    }

    /// Commands describing the change from the previous snapshot.
    ///
    /// The first snapshot only reports state; it never counts as a key
    /// press or a recording start.
    pub fn update(&mut self, next: StatusSnapshot) -> Vec<SchedulerCommand> {
        let mut commands = Vec::new();
        let last = self.last.replace(next);

        if last.map(|l| l.recording_status()) != Some(next.recording_status()) {
            commands.push(SchedulerCommand::RecordingStatus(next.recording_status()));
        }
        if let Some(standby) = next.standby {
            if last.and_then(|l| l.standby) != Some(standby) {
                commands.push(SchedulerCommand::StandbyChanged(standby));
            }
        }

        let Some(last) = last else {
            return commands;
        };
        match (last.recording, next.recording) {
            (false, true) => commands.push(SchedulerCommand::RecordEvent(RecordEvent::Started)),
            (true, false) => commands.push(SchedulerCommand::RecordEvent(RecordEvent::Ended)),
            _ => {}
        }
        if next.key_presses > last.key_presses {
            commands.push(SchedulerCommand::KeyPressed);
        }
        commands
    }

    async fn read(&self) -> Option<StatusSnapshot> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) => {
                debug!("StatusWatcher: Cannot read {:?}: {}", self.path, e);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("StatusWatcher: Ignoring malformed {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Poll until the scheduler goes away.
    pub async fn run(mut self, tx: UnboundedSender<SchedulerCommand>) {
        info!(
            "StatusWatcher: Watching {:?} every {} seconds",
            self.path,
            self.poll.as_secs()
        );
        let mut ticker = interval(self.poll);
        loop {
            ticker.tick().await;
            let Some(snapshot) = self.read().await else {
                continue;
            };
            for command in self.update(snapshot) {
                if tx.send(command).is_err() {
                    debug!("StatusWatcher: Scheduler gone, stopping");
                    return;
                }
            }
        }
    }
}
