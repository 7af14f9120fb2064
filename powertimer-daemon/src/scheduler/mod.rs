//! Scheduled task management for powertimerd.
//!
//! This module provides:
//! - [`PowerScheduler`]: the loop that activates power timers when due

pub mod power_scheduler;

pub use power_scheduler::{PowerScheduler, PowerSchedulerConfig, QueueHandle, SchedulerCommand, SchedulerState};
