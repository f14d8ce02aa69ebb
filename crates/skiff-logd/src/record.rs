//! Shipped log records and their routing target.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LogdError, Result};
use crate::event::JobEvent;

/// Separator between mode and name in a record name.
pub const NAME_SEPARATOR: &str = ":-:";

/// Sink that receives progress and error lines.
pub const LOGGER_NAME: &str = "logger";

/// A log record as shipped by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Routing name, `<mode>:-:<name>`.
    pub name: String,
    /// Message, possibly with `%s` placeholders.
    pub msg: String,
    /// Placeholder arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Level name.
    #[serde(default = "default_level")]
    pub levelname: String,
    /// Creation time, seconds since the epoch.
    #[serde(default)]
    pub created: f64,
    /// Structured lifecycle event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<JobEvent>,
}

fn default_level() -> String {
    "INFO".to_string()
}

impl LogRecord {
    /// Creates an INFO record stamped with the current time.
    pub fn new(name: impl Into<String>, msg: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            name: name.into(),
            msg: msg.into(),
            args: Vec::new(),
            levelname: default_level(),
            created: now.timestamp_millis() as f64 / 1000.0,
            event: None,
        }
    }

    /// Sets the placeholder arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Attaches a structured event.
    #[must_use]
    pub fn with_event(mut self, event: JobEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Decodes a record from a frame payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| LogdError::Decode(e.to_string()))
    }

    /// Encodes the record as a frame payload.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Returns the message with arguments substituted.
    ///
    /// `%s` and `%d` consume the next argument and `%%` is a literal percent.
    /// Without arguments the message is returned untouched.
    pub fn message(&self) -> String {
        if self.args.is_empty() {
            return self.msg.clone();
        }

        let mut out = String::with_capacity(self.msg.len());
        let mut args = self.args.iter();
        let mut chars = self.msg.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some(spec @ ('s' | 'd')) => {
                    chars.next();
                    match args.next() {
                        Some(arg) => out.push_str(&render(arg, spec)),
                        None => {
                            out.push('%');
                            out.push(spec);
                        }
                    }
                }
                _ => out.push('%'),
            }
        }
        out
    }

    /// Parses the routing target from the record name.
    pub fn target(&self) -> Result<Target> {
        Target::parse(&self.name)
    }
}

fn render(arg: &Value, spec: char) -> String {
    match (arg, spec) {
        (Value::String(s), _) => s.clone(),
        (Value::Number(n), 'd') => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map_or_else(|| n.to_string(), |f| format!("{}", f.trunc())),
        },
        (other, _) => other.to_string(),
    }
}

/// How a sink's file is opened the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Keep existing content.
    #[default]
    Append,
    /// Truncate existing content.
    Overwrite,
}

/// Where a record goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// First-open mode.
    pub mode: OpenMode,
    /// Sink name, used as the file stem.
    pub name: String,
}

impl Target {
    /// Creates an append target.
    pub fn append(name: impl Into<String>) -> Self {
        Self {
            mode: OpenMode::Append,
            name: name.into(),
        }
    }

    /// Parses `<mode>:-:<name>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (mode, name) = raw
            .split_once(NAME_SEPARATOR)
            .ok_or_else(|| LogdError::InvalidName(raw.to_string()))?;

        let mode: String = mode.chars().filter(|c| *c != 'G').collect();
        let mode = match mode.as_str() {
            "" | "a" => OpenMode::Append,
            "w" => OpenMode::Overwrite,
            _ => return Err(LogdError::InvalidName(raw.to_string())),
        };

        if !is_valid_name(name) {
            return Err(LogdError::InvalidName(raw.to_string()));
        }
        Ok(Self {
            mode,
            name: name.to_string(),
        })
    }

    /// Whether records for this target drive the job state machine.
    pub fn is_status(&self) -> bool {
        self.name.contains(LOGGER_NAME) || self.name.contains("status")
    }
}

/// Whether `name` can be used as a file stem under the log directory.
pub fn is_valid_name(name: &str) -> bool {
    !(name.is_empty() || name.contains('/') || name.contains('\\') || name.contains(".."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("a:-:job_1" => (OpenMode::Append, "job_1".to_string()) ; "append")]
    #[test_case(":-:job_1" => (OpenMode::Append, "job_1".to_string()) ; "empty mode")]
    #[test_case("w:-:job_1" => (OpenMode::Overwrite, "job_1".to_string()) ; "overwrite")]
    #[test_case("Gw:-:status" => (OpenMode::Overwrite, "status".to_string()) ; "strip g")]
    #[test_case("G:-:logger" => (OpenMode::Append, "logger".to_string()) ; "only g")]
    fn test_target_parse(raw: &str) -> (OpenMode, String) {
        let target = Target::parse(raw).expect("parse");
        (target.mode, target.name)
    }

    #[test_case("job_1" ; "no separator")]
    #[test_case("a:-:" ; "empty name")]
    #[test_case("a:-:../etc/passwd" ; "traversal")]
    #[test_case("a:-:sub/dir" ; "slash")]
    #[test_case("x:-:job" ; "unknown mode")]
    fn test_target_parse_rejects(raw: &str) {
        assert!(matches!(Target::parse(raw), Err(LogdError::InvalidName(_))));
    }

    #[test]
    fn test_status_targets() {
        assert!(Target::append("logger").is_status());
        assert!(Target::append("job_status").is_status());
        assert!(!Target::append("job_12").is_status());
    }

    #[test_case("plain", vec![] => "plain" ; "no args")]
    #[test_case("100%", vec![] => "100%" ; "percent without args")]
    #[test_case("%s jobs", vec![json!(3)] => "3 jobs" ; "number as s")]
    #[test_case("%s : %s", vec![json!("7"), json!("Processing")] => "7 : Processing" ; "two strings")]
    #[test_case("%d%% done", vec![json!(2.9)] => "2% done" ; "d truncates")]
    #[test_case("%s and %s", vec![json!("one")] => "one and %s" ; "missing arg")]
    fn test_message(msg: &str, args: Vec<Value>) -> String {
        LogRecord::new("a:-:x", msg).with_args(args).message()
    }

    #[test]
    fn test_record_decodes_minimal_payload() {
        let record = LogRecord::from_slice(br#"{"name":"a:-:job","msg":"hi"}"#).expect("decode");
        assert_eq!(record.levelname, "INFO");
        assert!(record.args.is_empty());
        assert!(record.event.is_none());
    }

    #[test]
    fn test_record_rejects_garbage() {
        assert!(matches!(
            LogRecord::from_slice(b"\x80\x02pickle"),
            Err(LogdError::Decode(_))
        ));
    }

    #[test]
    fn test_record_carries_event() {
        let record = LogRecord::new("a:-:status", "7 : Processing")
            .with_event(JobEvent::Processing { job: "7".into() });
        let bytes = record.to_bytes().expect("encode");
        let back = LogRecord::from_slice(&bytes).expect("decode");
        assert_eq!(back.event, record.event);
    }
}
