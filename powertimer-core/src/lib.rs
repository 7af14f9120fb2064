//! Power timer scheduling engine.
//!
//! Power timers switch a set-top box between its power states at scheduled
//! times: wake up, go to standby, shut down, reboot or restart the user
//! interface, plus auto-sleep timers that act after a stretch of inactivity.
//!
//! # Layout
//!
//! - [`entry::TimerEntry`]: one timer and its state machine
//!   (`Waiting -> Prepared -> Running -> Ended`, or `Failed`)
//! - [`queue::TimerQueue`]: ordered pending/processed lists, activation
//!   dispatch and persistence
//! - [`sanity`]: overlap detection
//! - [`store::TimerStore`]: atomic JSON timer file
//! - [`host::TimerHost`]: clock, recording state, prompts and power actions
//!   supplied by the embedding program
//! - [`shutdown::ShutdownWatch`]: power off once recordings are over
//!
//! # Example
//!
//! ```rust,ignore
//! use powertimer_core::{TimerEntry, TimerQueue, TimerStore, TimerType};
//!
//! let mut queue = TimerQueue::new(host).with_store(TimerStore::new("/etc/enigma2/pm_timers.json"));
//! queue.load()?;
//! queue.record(TimerEntry::new(begin, end, TimerType::DeepStandby), false)?;
//!
//! // Whenever the deadline passes:
//! queue.process_due()?;
//! let sleep_until = queue.next_activation();
//! ```

pub mod codec;
pub mod entry;
pub mod error;
pub mod host;
pub mod queue;
pub mod repeat;
pub mod sanity;
pub mod shutdown;
pub mod store;
pub mod types;

#[cfg(test)]
mod mock;

pub use codec::{decode_timer_file, encode_timer_file, DecodedTimerFile, TimerRecord};
pub use entry::{format_time, Activation, TimerEntry};
pub use error::{FormatError, HostError, QueueError, RecordError, StoreError};
pub use host::{PromptKind, PromptRequest, PromptTicket, TimerHost};
pub use queue::{LoadReport, RecordOutcome, RetentionPolicy, TimerQueue};
pub use sanity::{SanityReport, TimerSpan};
pub use shutdown::{RecordEvent, ShutdownWatch};
pub use store::{StoreLoad, TimerStore};
pub use types::{
    weekdays, AfterEvent, AutoSleepRepeat, LogEntry, PowerAction, TimerId, TimerState, TimerType,
    BACKOFF_INITIAL, BACKOFF_MAX, PREPARE_TIME, RECORDING_GUARD_SECS, SHUTDOWN_GUARD_SECS,
};
