//! Power timer scheduler loop.
//!
//! # How It Works
//!
//! 1. The scheduler runs as a background task
//! 2. It activates every timer that is due, then sleeps until the earliest
//!    next activation (capped by `max_poll_secs`)
//! 3. Commands (key presses, prompt answers, recording events) wake it up
//!    early; each one is applied under the queue lock
//! 4. On stop the queue is saved

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};

use powertimer_core::{PowerAction, PromptTicket, RecordEvent, ShutdownWatch, TimerHost, TimerQueue};

use crate::host::{RecordingStatus, SystemHost};

/// Shared handle to the timer queue.
pub type QueueHandle = Arc<Mutex<TimerQueue<SystemHost>>>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct PowerSchedulerConfig {
    /// Longest sleep between two checks (seconds).
    pub max_poll_secs: u64,
    /// Delay before going back to standby after a timer wake-up (seconds).
    pub startup_standby_delay_secs: u64,
    /// Delay before the post-wake-up shutdown check (seconds).
    pub shutdown_check_delay_secs: u64,
}

impl Default for PowerSchedulerConfig {
    fn default() -> Self {
        Self {
            max_poll_secs: 60,
            startup_standby_delay_secs: 15,
            shutdown_check_delay_secs: 30,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is running.
    Running,
    /// Timers are not activated; commands are still applied.
    Paused,
    /// Scheduler is stopped.
    Stopped,
}

/// Events delivered to the scheduler loop.
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// User activity, postpones armed auto-sleep timers.
    KeyPressed,
    PromptAnswered { ticket: PromptTicket, answer: bool },
    RecordEvent(RecordEvent),
    RecordingStatus(RecordingStatus),
    /// The box entered (`true`) or left standby.
    StandbyChanged(bool),
    /// Timers were changed from outside; recompute the deadline.
    Reschedule,
    Stop,
}

/// Power timer scheduler.
pub struct PowerScheduler {
    /// Timer queue.
    queue: QueueHandle,
    /// Configuration.
    config: PowerSchedulerConfig,
    /// Current state.
    state: Arc<Mutex<SchedulerState>>,
    /// Wakes the loop after a state change.
    wake: UnboundedSender<SchedulerCommand>,
}

impl PowerScheduler {
    /// Create a new scheduler. `wake` must feed the receiver later passed
    /// to [`PowerScheduler::start`].
    pub fn new(queue: QueueHandle, config: PowerSchedulerConfig, wake: UnboundedSender<SchedulerCommand>) -> Self {
        Self {
            queue,
            config,
            state: Arc::new(Mutex::new(SchedulerState::Running)),
            wake,
        }
    }

    /// Start the scheduler background task.
    pub fn start(self: Arc<Self>, commands: UnboundedReceiver<SchedulerCommand>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(commands).await;
        })
    }

    /// Run the scheduler loop.
    async fn run(&self, mut commands: UnboundedReceiver<SchedulerCommand>) {
        info!(
            "PowerScheduler: Starting with max poll interval {} seconds",
            self.config.max_poll_secs
        );

        let mut watch = ShutdownWatch::new();
        let (mut standby_at, mut shutdown_check_at) = self.startup_deadlines().await;

        loop {
            let state = *self.state.lock().await;
            match state {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => debug!("PowerScheduler: Paused, skipping check"),
                SchedulerState::Running => self.check_due().await,
            }

            let wait = self.next_wait(state).await;
            tokio::select! {
                _ = sleep(wait) => {}
                _ = sleep_until_opt(standby_at) => {
                    standby_at = None;
                    self.standby_after_wakeup().await;
                }
                _ = sleep_until_opt(shutdown_check_at) => {
                    shutdown_check_at = None;
                    let mut queue = self.queue.lock().await;
                    watch.check_after_power_manager(&mut queue);
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command, &mut watch).await {
                            break;
                        }
                    }
                    None => {
                        info!("PowerScheduler: Command channel closed");
                        break;
                    }
                },
            }
        }

        *self.state.lock().await = SchedulerState::Stopped;
        if let Err(e) = self.queue.lock().await.save() {
            error!("PowerScheduler: Failed to save timers on exit: {}", e);
        }
        info!("PowerScheduler: Stopped");
    }

    /// Deadlines for the standby and shutdown checks after a timer wake-up.
    async fn startup_deadlines(&self) -> (Option<Instant>, Option<Instant>) {
        let queue = self.queue.lock().await;
        if !queue.host().was_timer_wakeup() {
            return (None, None);
        }
        info!("PowerScheduler: Woken by a timer");

        let start = Instant::now();
        let standby_at = queue
            .is_next_after_event_action_auto()
            .then(|| start + Duration::from_secs(self.config.startup_standby_delay_secs));
        let shutdown_check_at = Some(start + Duration::from_secs(self.config.shutdown_check_delay_secs));
        (standby_at, shutdown_check_at)
    }

    async fn standby_after_wakeup(&self) {
        let mut queue = self.queue.lock().await;
        if queue.host().is_in_standby() {
            return;
        }
        info!("PowerScheduler: Returning to standby after timer wake-up");
        if let Err(e) = queue.host_mut().perform_power_action(PowerAction::Standby) {
            warn!("PowerScheduler: {}", e);
        }
    }

    /// Activate every due timer.
    async fn check_due(&self) {
        let mut queue = self.queue.lock().await;
        match queue.process_due() {
            Ok(0) => {}
            Ok(count) => debug!("PowerScheduler: {} activation(s)", count),
            Err(e) => error!("PowerScheduler: Error during timer check: {}", e),
        }
    }

    /// Time until the next activation, between one second and the poll cap.
    async fn next_wait(&self, state: SchedulerState) -> Duration {
        let max = self.config.max_poll_secs.max(1);
        if state != SchedulerState::Running {
            return Duration::from_secs(max);
        }
        let queue = self.queue.lock().await;
        let secs = match queue.next_activation() {
            Some(at) => at.saturating_sub(queue.host().now()).clamp(1, max as i64) as u64,
            None => max,
        };
        Duration::from_secs(secs)
    }

    /// Apply one command. Returns `false` when the loop should end.
    async fn handle_command(&self, command: SchedulerCommand, watch: &mut ShutdownWatch) -> bool {
        debug!("PowerScheduler: {:?}", command);
        let mut queue = self.queue.lock().await;
        match command {
            SchedulerCommand::KeyPressed => {
                let postponed = queue.key_pressed();
                if postponed > 0 {
                    debug!("PowerScheduler: Postponed {} auto-sleep timer(s)", postponed);
                }
            }
            SchedulerCommand::PromptAnswered { ticket, answer } => {
                queue.answer_prompt(ticket, answer);
            }
            SchedulerCommand::RecordEvent(event) => {
                watch.on_record_event(event, &mut queue);
            }
            SchedulerCommand::RecordingStatus(status) => {
                queue.host_mut().set_recording_status(status);
            }
            SchedulerCommand::StandbyChanged(in_standby) => {
                queue.host_mut().set_in_standby(in_standby);
            }
            SchedulerCommand::Reschedule => {}
            SchedulerCommand::Stop => {
                info!("PowerScheduler: Stop requested");
                return false;
            }
        }
        true
    }

    /// Pause the scheduler.
    #[allow(dead_code)]
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        if *state == SchedulerState::Running {
            *state = SchedulerState::Paused;
            info!("PowerScheduler: Paused");
        }
    }

    /// Resume the scheduler.
    #[allow(dead_code)]
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if *state == SchedulerState::Paused {
            *state = SchedulerState::Running;
            info!("PowerScheduler: Resumed");
        }
        let _ = self.wake.send(SchedulerCommand::Reschedule);
    }

    /// Stop the scheduler.
    pub async fn stop(&self) {
        *self.state.lock().await = SchedulerState::Stopped;
        let _ = self.wake.send(SchedulerCommand::Stop);
    }

    /// Get the current scheduler state.
    #[allow(dead_code)]
    pub async fn state(&self) -> SchedulerState {
        *self.state.lock().await
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
