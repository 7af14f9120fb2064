//! Offline timer file commands: list, add and remove.
//!
//! Timer ids are assigned when the file is loaded, in file order, so the
//! ids printed by `list` are valid for a following `remove` as long as the
//! file was not changed in between.

use std::io::{self, Write};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use clap::Args;
use log::warn;
use thiserror::Error;

use powertimer_core::{
    format_time, weekdays, AfterEvent, AutoSleepRepeat, QueueError, TimerEntry, TimerHost, TimerId, TimerQueue,
    TimerType,
};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid time {0:?}: expected epoch seconds, RFC 3339 or \"YYYY-MM-DD HH:MM\"")]
    InvalidTime(String),

    #[error("Invalid weekday list {0:?}")]
    InvalidWeekdays(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Arguments of the `add` subcommand.
#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Timer type (wakeup, wakeuptostandby, autostandby, autodeepstandby,
    /// standby, deepstandby, reboot, restart)
    #[arg(short = 't', long = "type", value_parser = parse_timer_type)]
    pub timer_type: TimerType,

    /// Begin time
    #[arg(short, long)]
    pub begin: String,

    /// End time (defaults to the begin time)
    #[arg(short, long)]
    pub end: Option<String>,

    /// Action after the timer ended (nothing, standby, deepstandby, auto)
    #[arg(short, long, default_value = "nothing", value_parser = parse_after_event)]
    pub after_event: AfterEvent,

    /// Repeat on weekdays: "daily", "workdays", "weekend" or e.g. "mon,wed,fri"
    #[arg(short, long)]
    pub repeat: Option<String>,

    /// Inactivity delay of auto-sleep timers in minutes
    #[arg(long, default_value = "60")]
    pub auto_sleep_delay: u32,

    /// Keep an auto-sleep timer armed after it fired
    #[arg(long)]
    pub auto_sleep_repeated: bool,

    /// Add the timer disabled
    #[arg(long)]
    pub disabled: bool,

    /// Do not check for overlapping timers
    #[arg(long)]
    pub force: bool,
}

fn parse_timer_type(s: &str) -> Result<TimerType, String> {
    s.parse().map_err(|e: powertimer_core::RecordError| e.to_string())
}

fn parse_after_event(s: &str) -> Result<AfterEvent, String> {
    s.parse().map_err(|e: powertimer_core::RecordError| e.to_string())
}

/// Parse a user-supplied time in local time.
pub fn parse_time(s: &str) -> Result<i64, CommandError> {
    let s = s.trim();
    if let Ok(epoch) = s.parse::<i64>() {
        return match Local.timestamp_opt(epoch, 0).single() {
            Some(_) => Ok(epoch),
            None => Err(CommandError::InvalidTime(s.to_string())),
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp())
        .ok_or_else(|| CommandError::InvalidTime(s.to_string()))
}

/// Parse a weekday list into a repeat mask.
pub fn parse_weekdays(s: &str) -> Result<u8, CommandError> {
    let invalid = || CommandError::InvalidWeekdays(s.to_string());
    match s.trim().to_ascii_lowercase().as_str() {
        "" | "once" => return Ok(0),
        "daily" => return Ok(weekdays::ALL),
        "workdays" => return Ok(weekdays::WORKDAYS),
        "weekend" => return Ok(weekdays::SATURDAY | weekdays::SUNDAY),
        _ => {}
    }
    if let Ok(mask) = s.trim().parse::<u8>() {
        return if mask & !weekdays::ALL == 0 { Ok(mask) } else { Err(invalid()) };
    }

    let mut mask = 0;
    for day in s.split(',') {
        mask |= match day.trim().to_ascii_lowercase().as_str() {
            "mon" => weekdays::MONDAY,
            "tue" => weekdays::TUESDAY,
            "wed" => weekdays::WEDNESDAY,
            "thu" => weekdays::THURSDAY,
            "fri" => weekdays::FRIDAY,
            "sat" => weekdays::SATURDAY,
            "sun" => weekdays::SUNDAY,
            _ => return Err(invalid()),
        };
    }
    Ok(mask)
}

fn describe_repeat(mask: u8) -> String {
    const NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    match mask {
        0 => "once".to_string(),
        weekdays::ALL => "daily".to_string(),
        _ => (0..7)
            .filter(|d| weekdays::contains(mask, *d))
            .map(|d| NAMES[d as usize])
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Print every timer in the queue.
pub fn list<H: TimerHost, W: Write>(queue: &TimerQueue<H>, out: &mut W) -> Result<(), CommandError> {
    if queue.is_empty() {
        writeln!(out, "No timers.")?;
        return Ok(());
    }
    writeln!(
        out,
        "{:>4}  {:<16} {:<9} {:<25} {:<25} {:<12} {:<12} {}",
        "ID", "TYPE", "STATE", "BEGIN", "END", "REPEAT", "AFTER", "DISABLED"
    )?;
    for entry in queue.entries() {
        writeln!(
            out,
            "{:>4}  {:<16} {:<9} {:<25} {:<25} {:<12} {:<12} {}",
            entry.id().0,
            entry.timer_type().as_str(),
            format!("{:?}", entry.state()),
            format_time(entry.begin()),
            format_time(entry.end()),
            describe_repeat(entry.repeated()),
            entry.after_event().as_str(),
            if entry.is_disabled() { "yes" } else { "no" },
        )?;
    }
    Ok(())
}

/// Add a timer and save the file.
pub fn add<H: TimerHost, W: Write>(queue: &mut TimerQueue<H>, args: &AddArgs, out: &mut W) -> Result<TimerId, CommandError> {
    let begin = parse_time(&args.begin)?;
    let end = match &args.end {
        Some(end) => parse_time(end)?,
        None => begin,
    };
    let repeat = match &args.repeat {
        Some(days) => parse_weekdays(days)?,
        None => 0,
    };
    let auto_sleep_repeat = if args.auto_sleep_repeated {
        AutoSleepRepeat::Repeated
    } else {
        AutoSleepRepeat::Once
    };

    let now = queue.host().now();
    let entry = TimerEntry::new(begin, end, args.timer_type)
        .with_after_event(args.after_event)
        .with_repeated(repeat)
        .with_auto_sleep(args.auto_sleep_delay, auto_sleep_repeat)
        .with_disabled(args.disabled)
        .with_stale_check(now);

    let outcome = queue.record(entry, args.force)?;
    if let Some(report) = &outcome.conflicts {
        for conflict in report.conflicts() {
            warn!("Timer {} overlaps timer {}", outcome.id, conflict.id);
            writeln!(
                out,
                "Warning: overlaps timer {} ({} - {})",
                conflict.id.0,
                format_time(conflict.begin),
                format_time(conflict.end)
            )?;
        }
    }
    writeln!(out, "Added timer {}", outcome.id.0)?;
    Ok(outcome.id)
}

/// Remove a timer and save the file.
pub fn remove<H: TimerHost, W: Write>(queue: &mut TimerQueue<H>, id: u64, out: &mut W) -> Result<(), CommandError> {
    let removed = queue.remove_entry(TimerId(id))?;
    match removed {
        Some(_) => writeln!(out, "Removed timer {}", id)?,
        None => writeln!(out, "Timer {} is running; it was stopped and will end on the next pass", id)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PowerCommands, SystemHost};
    use powertimer_core::TimerStore;

    fn add_args(timer_type: TimerType, begin: i64, end: i64) -> AddArgs {
        AddArgs {
            timer_type,
            begin: begin.to_string(),
            end: Some(end.to_string()),
            after_event: AfterEvent::None,
            repeat: None,
            auto_sleep_delay: 60,
            auto_sleep_repeated: false,
            disabled: false,
            force: false,
        }
    }

    fn queue_in(dir: &tempfile::TempDir) -> TimerQueue<SystemHost> {
        let mut queue = TimerQueue::new(SystemHost::new(PowerCommands::default()))
            .with_store(TimerStore::new(dir.path().join("pm_timers.json")));
        queue.load().unwrap();
        queue
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(parse_time("2023-11-14T22:13:20Z").unwrap(), 1_700_000_000);
        assert!(parse_time("2024-01-01 06:30").is_ok());
        assert!(matches!(parse_time("tomorrow"), Err(CommandError::InvalidTime(_))));
        assert!(matches!(parse_time("-9223372036854775808"), Err(CommandError::InvalidTime(_))));
    }

    #[test]
    fn test_parse_weekdays() {
        assert_eq!(parse_weekdays("daily").unwrap(), weekdays::ALL);
        assert_eq!(parse_weekdays("workdays").unwrap(), weekdays::WORKDAYS);
        assert_eq!(
            parse_weekdays("mon, Fri").unwrap(),
            weekdays::MONDAY | weekdays::FRIDAY
        );
        assert_eq!(parse_weekdays("5").unwrap(), 5);
        assert!(parse_weekdays("200").is_err());
        assert!(parse_weekdays("mon,funday").is_err());
        assert_eq!(describe_repeat(weekdays::MONDAY | weekdays::SUNDAY), "Mon,Sun");
    }

    #[test]
    fn test_add_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let now = chrono::Utc::now().timestamp();
        let mut out = Vec::new();

        let mut queue = queue_in(&dir);
        add(&mut queue, &add_args(TimerType::DeepStandby, now + 3600, now + 3660), &mut out).unwrap();
        add(&mut queue, &add_args(TimerType::Reboot, now + 3630, now + 3700), &mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.contains("Warning: overlaps timer 1"));

        // A fresh load sees both timers.
        let queue = queue_in(&dir);
        let mut listing = Vec::new();
        list(&queue, &mut listing).unwrap();
        let listing = String::from_utf8(listing).unwrap();
        assert!(listing.contains("deepstandby"));
        assert!(listing.contains("reboot"));

        let mut queue = queue_in(&dir);
        let mut out = Vec::new();
        remove(&mut queue, 1, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Removed timer 1"));
        assert_eq!(queue_in(&dir).len(), 1);
    }

    #[test]
    fn test_remove_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = queue_in(&dir);
        let err = remove(&mut queue, 7, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CommandError::Queue(QueueError::TimerNotFound(_))));
    }

    #[test]
    fn test_list_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        list(&queue_in(&dir), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No timers.\n");
    }
}
