//! Shut the box down once recordings are over.
//!
//! After a timer wake-up the box should not stay on longer than needed. The
//! watch subscribes to recording events and powers off when the last
//! recording ends, unless another timer is due within
//! [`SHUTDOWN_GUARD_SECS`].

use log::{debug, info, warn};

use crate::host::TimerHost;
use crate::queue::TimerQueue;
use crate::types::{PowerAction, SHUTDOWN_GUARD_SECS};

/// Recording service events the watch listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordEvent {
    Started,
    Ended,
}

/// Subscription to recording events that ends in a shutdown.
#[derive(Debug, Default)]
pub struct ShutdownWatch {
    subscribed: bool,
}

impl ShutdownWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Subscribe and evaluate right away as if a recording had just ended.
    ///
    /// Returns whether the box was shut down.
    pub fn try_quit<H: TimerHost>(&mut self, queue: &mut TimerQueue<H>) -> bool {
        if self.subscribed {
            return false;
        }
        info!("[PowerTimer] Shutdown requested, watching recordings");
        self.subscribed = true;
        self.on_record_event(RecordEvent::Ended, queue)
    }

    /// Handle a recording event. Returns whether the box was shut down.
    pub fn on_record_event<H: TimerHost>(&mut self, event: RecordEvent, queue: &mut TimerQueue<H>) -> bool {
        if !self.subscribed {
            return false;
        }
        if event == RecordEvent::Started {
            debug!("[PowerTimer] Recording started");
            return false;
        }
        if queue.host().is_recording_active() {
            debug!("[PowerTimer] Recording still active, not shutting down");
            return false;
        }

        let now = queue.host().now();
        if let Some(next) = queue.next_power_manager_time() {
            if next > 0 && next - now < SHUTDOWN_GUARD_SECS {
                info!("[PowerTimer] Next timer starts in {} seconds, not shutting down yet", next - now);
                return false;
            }
        }

        info!(
            "[PowerTimer] No timer in the next {} seconds, shutting down",
            SHUTDOWN_GUARD_SECS
        );
        match queue.host_mut().perform_power_action(PowerAction::DeepStandby) {
            Ok(()) => {
                self.subscribed = false;
                true
            }
            Err(e) => {
                warn!("[PowerTimer] Shutdown failed: {}", e);
                false
            }
        }
    }

    /// Stop listening, e.g. because the user took over.
    pub fn cancel(&mut self) {
        if self.subscribed {
            debug!("[PowerTimer] Shutdown watch cancelled");
            self.subscribed = false;
        }
    }

    /// Start the watch when a timer is close and no shutdown prompt is up.
    pub fn check_after_power_manager<H: TimerHost>(&mut self, queue: &mut TimerQueue<H>) -> bool {
        let now = queue.host().now();
        let close = queue
            .next_power_manager_time()
            .is_some_and(|t| (t - now).abs() <= SHUTDOWN_GUARD_SECS);
        if !close || queue.host().is_shutdown_prompt_open() {
            return false;
        }
        self.try_quit(queue)
    }
}
