//! Raw queue payload parsing and validation
//!
//! Queue messages are semi-structured JSON in the upstream collector's shape:
//! `eventID`, `groupID`, `message`, `dateReceived` (ISO-8601 with
//! milliseconds, UTC), and an `entries` list whose first exception entry
//! carries the stack trace. Everything the pipeline stores comes through
//! `parse_event`; a payload missing any required field fails here, never
//! deeper in the pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire format for `dateReceived`.
const DATE_RECEIVED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

#[derive(Debug)]
pub enum EventError {
    MissingField(&'static str),
    InvalidFieldType {
        field: &'static str,
        found: &'static str,
    },
    InvalidTimestamp(String),
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::MissingField(field) => write!(f, "Missing required field: {}", field),
            EventError::InvalidFieldType { field, found } => {
                write!(f, "Invalid type for field {}: found {}", field, found)
            }
            EventError::InvalidTimestamp(raw) => write!(f, "Invalid dateReceived timestamp: {}", raw),
        }
    }
}

impl std::error::Error for EventError {}

/// One captured stack frame. Wire field names follow the collector
/// (`lineNo`/`colNo`); stored as-is in the issue's stack_frames JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub module: String,
    #[serde(rename = "lineNo", default)]
    pub line: i64,
    #[serde(rename = "colNo", default)]
    pub column: i64,
}

/// Fully validated event, ready for the issue registry and bucket store.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub id: String,
    pub fingerprint: String,
    pub message: String,
    pub date_received: DateTime<Utc>,
    pub module: String,
    pub stack_frames: Vec<StackFrame>,
}

impl ParsedEvent {
    /// Calendar day the event was received on (bucket key).
    pub fn received_date(&self) -> chrono::NaiveDate {
        self.date_received.date_naive()
    }
}

/// Parse and validate one raw queue payload.
///
/// Required: `eventID`, `groupID`, `message`, `dateReceived`. `groupID` may
/// be a JSON string or number (the collector sends both). Module and stack
/// frames come from the first exception entry's first value and default to
/// empty when the payload has no usable stack trace.
pub fn parse_event(payload: &Value) -> Result<ParsedEvent, EventError> {
    let id = required_string(payload, "eventID")?;
    let fingerprint = required_stringish(payload, "groupID")?;
    let message = required_string(payload, "message")?;

    let raw_date = required_string(payload, "dateReceived")?;
    let date_received = parse_date_received(&raw_date)?;

    let (module, stack_frames) = extract_stack(payload);

    Ok(ParsedEvent {
        id,
        fingerprint,
        message,
        date_received,
        module,
        stack_frames,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_string(payload: &Value, field: &'static str) -> Result<String, EventError> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(EventError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(EventError::InvalidFieldType {
            field,
            found: json_type_name(other),
        }),
    }
}

/// Like `required_string` but accepts numbers, stringifying them.
fn required_stringish(payload: &Value, field: &'static str) -> Result<String, EventError> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(EventError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(EventError::InvalidFieldType {
            field,
            found: json_type_name(other),
        }),
    }
}

fn parse_date_received(raw: &str) -> Result<DateTime<Utc>, EventError> {
    NaiveDateTime::parse_from_str(raw, DATE_RECEIVED_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| EventError::InvalidTimestamp(raw.to_string()))
}

/// Pull (module, frames) from the first exception-type entry, tolerating any
/// missing level of the nested structure.
fn extract_stack(payload: &Value) -> (String, Vec<StackFrame>) {
    let first_exception = payload
        .get("entries")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries
                .iter()
                .find(|e| e.get("type").and_then(Value::as_str) == Some("exception"))
        })
        .and_then(|entry| entry.get("data"))
        .and_then(|data| data.get("values"))
        .and_then(Value::as_array)
        .and_then(|values| values.first());

    let Some(exception) = first_exception else {
        return (String::new(), Vec::new());
    };

    let module = exception
        .get("module")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let stack_frames = exception
        .get("stacktrace")
        .and_then(|st| st.get("frames"))
        .and_then(Value::as_array)
        .map(|frames| {
            frames
                .iter()
                .filter_map(|frame| serde_json::from_value(frame.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    (module, stack_frames)
}
