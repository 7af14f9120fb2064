//! Encoding and decoding of the timer file.
//!
//! File format (JSON):
//! ```text
//! {
//!   "timers": [
//!     { "timertype": "deepstandby", "begin": 1700000000, "end": 1700000600,
//!       "repeated": 0, "afterevent": "nothing", "disabled": 0,
//!       "autosleepdelay": 60, "autosleeprepeat": "once",
//!       "log": [ { "time": 1700000000, "code": 5, "text": "activating state 1" } ] }
//!   ]
//! }
//! ```
//!
//! Records are decoded one by one: a record with an unknown enum value is
//! rejected on its own and never defaulted, the remaining records still load.

use chrono::{TimeZone, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::entry::TimerEntry;
use crate::error::{FormatError, RecordError};
use crate::types::*;

/// Persisted form of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerRecord {
    #[serde(rename = "timertype")]
    pub timer_type: TimerType,
    pub begin: i64,
    pub end: i64,
    pub repeated: u8,
    #[serde(rename = "afterevent")]
    pub after_event: AfterEvent,
    #[serde(serialize_with = "bool_as_int")]
    pub disabled: bool,
    #[serde(rename = "autosleepdelay")]
    pub auto_sleep_delay: u32,
    #[serde(rename = "autosleeprepeat")]
    pub auto_sleep_repeat: AutoSleepRepeat,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogEntry>,
}

impl TimerRecord {
    pub fn from_entry(entry: &TimerEntry, include_log: bool) -> Self {
        Self {
            timer_type: entry.timer_type(),
            begin: entry.begin(),
            end: entry.end(),
            repeated: entry.repeated(),
            after_event: entry.after_event(),
            disabled: entry.is_disabled(),
            auto_sleep_delay: entry.auto_sleep_delay(),
            auto_sleep_repeat: entry.auto_sleep_repeat(),
            log: if include_log {
                entry.log_entries().to_vec()
            } else {
                Vec::new()
            },
        }
    }

    pub fn into_entry(self) -> TimerEntry {
        TimerEntry::new(self.begin, self.end, self.timer_type)
            .with_after_event(self.after_event)
            .with_disabled(self.disabled)
            .with_repeated(self.repeated)
            .with_auto_sleep(self.auto_sleep_delay, self.auto_sleep_repeat)
            .with_log_entries(self.log)
    }
}

fn bool_as_int<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

#[derive(Serialize)]
struct TimerFile<'a> {
    timers: &'a [TimerRecord],
}

/// Result of decoding a timer file.
#[derive(Debug, Default)]
pub struct DecodedTimerFile {
    pub records: Vec<TimerRecord>,
    /// Index within the file and reason for every dropped record.
    pub rejected: Vec<(usize, RecordError)>,
}

/// Encode records into the timer file text.
pub fn encode_timer_file(records: &[TimerRecord]) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string_pretty(&TimerFile { timers: records })?;
    text.push('\n');
    Ok(text)
}

/// Decode the timer file text.
///
/// Fails only when the document itself is unusable; bad records end up in
/// [`DecodedTimerFile::rejected`].
pub fn decode_timer_file(text: &str) -> Result<DecodedTimerFile, FormatError> {
    let doc: Value = serde_json::from_str(text).map_err(|e| FormatError::Malformed(e.to_string()))?;
    let timers = doc
        .get("timers")
        .and_then(Value::as_array)
        .ok_or(FormatError::MissingTimers)?;

    let mut decoded = DecodedTimerFile::default();
    for (index, value) in timers.iter().enumerate() {
        match decode_record(value) {
            Ok(record) => decoded.records.push(record),
            Err(e) => decoded.rejected.push((index, e)),
        }
    }
    Ok(decoded)
}

/// Decode one timer object.
pub fn decode_record(value: &Value) -> Result<TimerRecord, RecordError> {
    let obj = value.as_object().ok_or_else(|| RecordError::InvalidValue {
        field: "timer",
        value: value.to_string(),
    })?;

    let timer_type = match str_field(obj, "timertype")? {
        Some(s) => s.parse()?,
        None => TimerType::Wakeup,
    };
    let after_event = match str_field(obj, "afterevent")? {
        Some(s) => s.parse()?,
        None => AfterEvent::None,
    };
    let auto_sleep_repeat = match str_field(obj, "autosleeprepeat")? {
        Some(s) => s.parse()?,
        None => AutoSleepRepeat::Once,
    };

    let begin = timestamp(obj, "begin", int_field(obj, "begin")?.ok_or(RecordError::MissingField("begin"))?)?;
    let end = timestamp(obj, "end", int_field(obj, "end")?.ok_or(RecordError::MissingField("end"))?)?;
    let repeated = bounded(obj, "repeated", int_field(obj, "repeated")?.unwrap_or(0))?;
    let auto_sleep_delay = bounded(obj, "autosleepdelay", int_field(obj, "autosleepdelay")?.unwrap_or(0))?;
    let disabled = match obj.get("disabled") {
        Some(Value::Bool(b)) => *b,
        _ => int_field(obj, "disabled")?.unwrap_or(0) != 0,
    };

    let log = match obj.get("log") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(decode_log).collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(RecordError::InvalidValue {
                field: "log",
                value: other.to_string(),
            })
        }
    };

    Ok(TimerRecord {
        timer_type,
        begin,
        end,
        repeated,
        after_event,
        disabled,
        auto_sleep_delay,
        auto_sleep_repeat,
        log,
    })
}

fn decode_log(value: &Value) -> Result<LogEntry, RecordError> {
    let obj = value.as_object().ok_or_else(|| RecordError::InvalidValue {
        field: "log",
        value: value.to_string(),
    })?;
    let time = int_field(obj, "time")?.ok_or(RecordError::MissingField("log.time"))?;
    let code = bounded(obj, "code", int_field(obj, "code")?.ok_or(RecordError::MissingField("log.code"))?)?;
    let text = str_field(obj, "text")?.unwrap_or_default().to_string();
    Ok(LogEntry { time, code, text })
}

fn str_field<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<Option<&'a str>, RecordError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(RecordError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

/// Integer attribute; numeric strings are accepted as well.
fn int_field(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, RecordError> {
    let invalid = |v: &Value| RecordError::InvalidValue {
        field,
        value: v.to_string(),
    };
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

/// A time that can be shown as a calendar date. Anything further out would
/// overflow the scheduling arithmetic.
fn timestamp(obj: &Map<String, Value>, field: &'static str, value: i64) -> Result<i64, RecordError> {
    match Utc.timestamp_opt(value, 0).single() {
        Some(_) => Ok(value),
        None => Err(RecordError::InvalidValue {
            field,
            value: obj.get(field).map(Value::to_string).unwrap_or_else(|| value.to_string()),
        }),
    }
}

fn bounded<T: TryFrom<i64>>(obj: &Map<String, Value>, field: &'static str, value: i64) -> Result<T, RecordError> {
    T::try_from(value).map_err(|_| RecordError::InvalidValue {
        field,
        value: obj.get(field).map(Value::to_string).unwrap_or_else(|| value.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TimerRecord {
        TimerRecord {
            timer_type: TimerType::DeepStandby,
            begin: 1_700_000_000,
            end: 1_700_000_600,
            repeated: weekdays::WORKDAYS,
            after_event: AfterEvent::Standby,
            disabled: true,
            auto_sleep_delay: 45,
            auto_sleep_repeat: AutoSleepRepeat::Repeated,
            log: vec![LogEntry::new(1_699_999_000, 15, "time changed")],
        }
    }

    #[test]
    fn test_encode_decode_record() {
        let text = encode_timer_file(&[sample()]).unwrap();
        assert!(text.contains("\"timertype\": \"deepstandby\""));
        assert!(text.contains("\"disabled\": 1"));

        let decoded = decode_timer_file(&text).unwrap();
        assert!(decoded.rejected.is_empty());
        assert_eq!(decoded.records, vec![sample()]);
    }

    #[test]
    fn test_defaults_for_missing_attributes() {
        let decoded = decode_timer_file(r#"{"timers":[{"begin":"10","end":"20","repeated":"0"}]}"#).unwrap();
        let record = &decoded.records[0];
        assert_eq!(record.timer_type, TimerType::Wakeup);
        assert_eq!(record.after_event, AfterEvent::None);
        assert_eq!(record.auto_sleep_repeat, AutoSleepRepeat::Once);
        assert_eq!(record.auto_sleep_delay, 0);
        assert!(!record.disabled);
        assert_eq!((record.begin, record.end), (10, 20));
    }

    #[test]
    fn test_unknown_type_rejects_only_that_record() {
        let text = r#"{"timers":[
            {"timertype":"bogus","begin":1,"end":2},
            {"timertype":"reboot","begin":3,"end":4},
            {"timertype":"standby","afterevent":"explode","begin":5,"end":6}
        ]}"#;
        let decoded = decode_timer_file(text).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].timer_type, TimerType::Reboot);
        assert_eq!(
            decoded.rejected,
            vec![
                (0, RecordError::UnknownTimerType("bogus".into())),
                (2, RecordError::UnknownAfterEvent("explode".into())),
            ]
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let missing = decode_record(&serde_json::json!({"timertype":"wakeup","end":4})).unwrap_err();
        assert_eq!(missing, RecordError::MissingField("begin"));

        let mask = decode_record(&serde_json::json!({"begin":1,"end":2,"repeated":300})).unwrap_err();
        assert!(matches!(mask, RecordError::InvalidValue { field: "repeated", .. }));

        let typed = decode_record(&serde_json::json!({"begin":1,"end":2,"timertype":7})).unwrap_err();
        assert!(matches!(typed, RecordError::InvalidValue { field: "timertype", .. }));
    }

    #[test]
    fn test_out_of_range_times_rejected() {
        let text = r#"{"timers":[
            {"timertype":"wakeup","begin":-9223372036854775808,"end":0},
            {"timertype":"reboot","begin":1700000000,"end":9223372036854775807},
            {"timertype":"standby","begin":1700000000,"end":1700000060}
        ]}"#;
        let decoded = decode_timer_file(text).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].timer_type, TimerType::Standby);
        assert!(matches!(decoded.rejected[0], (0, RecordError::InvalidValue { field: "begin", .. })));
        assert!(matches!(decoded.rejected[1], (1, RecordError::InvalidValue { field: "end", .. })));
    }

    #[test]
    fn test_log_text_kept_verbatim() {
        let text = r#"{"timers":[{"begin":1,"end":2,"log":[{"time":1,"code":8,"text":"  padded answer \n"}]}]}"#;
        let decoded = decode_timer_file(text).unwrap();
        assert_eq!(decoded.records[0].log[0].text, "  padded answer \n");

        let again = decode_timer_file(&encode_timer_file(&decoded.records).unwrap()).unwrap();
        assert_eq!(again.records, decoded.records);
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(decode_timer_file("<timers>"), Err(FormatError::Malformed(_))));
        assert_eq!(decode_timer_file("{}").unwrap_err(), FormatError::MissingTimers);
    }

    #[test]
    fn test_entry_conversion_keeps_fields() {
        let entry = sample().into_entry();
        assert_eq!(entry.timer_type(), TimerType::DeepStandby);
        assert_eq!(entry.auto_sleep_delay(), 45);
        assert!(entry.is_disabled());
        assert_eq!(TimerRecord::from_entry(&entry, true), sample());
        assert!(TimerRecord::from_entry(&entry, false).log.is_empty());
    }
}
