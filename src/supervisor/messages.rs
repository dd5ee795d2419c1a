// src/supervisor/messages.rs

//! Classification of worker messages.
//!
//! The worker speaks a small line protocol:
//! - `Ready for events`: it can take another range.
//! - `/path/to/output,ID:<range id>,CPU:<s>,WALL:<s>`: a finished range.
//! - `ERR_<ACRONYM> <range id>: <diagnostics>`: a failed range.
//!
//! Everything else is logged and ignored.

use regex::Regex;

use crate::errors::{DroidError, Result};
use crate::types::READY_FOR_EVENTS;

/// Acronym whose diagnostics embed the offending range as a dict literal.
pub const PARSE_FAILURE_ACRONYM: &str = "ERR_ATHENAMP_PARSE";

/// Acronym used when an error line does not match the expected format.
pub const EXTRACTION_FAILURE: &str = "ERR_EXTRACTION_FAILURE";

/// A decoded error line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub acronym: String,
    pub event_range_id: Option<String>,
    pub diagnostics: String,
}

impl ErrorReport {
    /// Error acronyms containing `FATAL` require terminating the group.
    pub fn is_fatal(&self) -> bool {
        self.acronym.contains("FATAL")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Ready,
    Result { event_range_id: String },
    Error(ErrorReport),
    Unrecognized,
}

/// Pluggable decoding of result and error lines.
pub trait MessageParser: Send + Sync {
    /// Extract the range id from a result line.
    fn parse_result(&self, message: &str) -> Result<String>;

    /// Decode an error line. Never fails; unparseable lines become an
    /// [`EXTRACTION_FAILURE`] report.
    fn parse_error(&self, message: &str) -> ErrorReport;
}

/// Regex-based parser for the worker's line protocol.
#[derive(Debug, Clone)]
pub struct DefaultMessageParser {
    general: Regex,
    parse_failure: Regex,
    embedded_id: Regex,
}

impl DefaultMessageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            general: build(r"^(ERR_[A-Z_]+) ([A-Za-z0-9_.\-]+):\s?(.+)$")?,
            parse_failure: build(r"^(ERR_[A-Z_]+) (.+):\s?(.+)$")?,
            embedded_id: build(r#"eventRangeID['"]?\s*:\s*u?['"]([A-Za-z0-9_.\-]+)"#)?,
        })
    }
}

fn build(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| DroidError::ParseError(format!("invalid message pattern '{}': {}", pattern, e)))
}

impl MessageParser for DefaultMessageParser {
    fn parse_result(&self, message: &str) -> Result<String> {
        let fields: Vec<&str> = message.split(',').map(str::trim).collect();

        let tagged = fields
            .iter()
            .rev()
            .find_map(|f| f.strip_prefix("ID:"));

        // Older workers emit the id untagged as the third field from the end.
        let id = match tagged {
            Some(id) => id.trim(),
            None if fields.len() >= 3 => fields[fields.len() - 3],
            None => "",
        };

        if id.is_empty() || id.starts_with('/') {
            return Err(DroidError::ParseError(format!(
                "no event range id in result message '{}'",
                message
            )));
        }
        Ok(id.to_string())
    }

    fn parse_error(&self, message: &str) -> ErrorReport {
        let message = message.trim();

        if message.starts_with(PARSE_FAILURE_ACRONYM) {
            if let Some(caps) = self.parse_failure.captures(message) {
                let quoted = caps.get(2).map_or("", |m| m.as_str());
                let event_range_id = self
                    .embedded_id
                    .captures(quoted)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                return ErrorReport {
                    acronym: caps[1].to_string(),
                    event_range_id,
                    diagnostics: caps.get(3).map_or("", |m| m.as_str()).to_string(),
                };
            }
        }

        match self.general.captures(message) {
            Some(caps) => ErrorReport {
                acronym: caps[1].to_string(),
                event_range_id: Some(caps[2].to_string()),
                diagnostics: caps[3].to_string(),
            },
            None => ErrorReport {
                acronym: EXTRACTION_FAILURE.to_string(),
                event_range_id: None,
                diagnostics: message.to_string(),
            },
        }
    }
}

/// Classify one raw worker message.
pub fn classify(message: &str, parser: &dyn MessageParser) -> Result<WorkerMessage> {
    if message.contains(READY_FOR_EVENTS) {
        return Ok(WorkerMessage::Ready);
    }
    if message.starts_with('/') {
        let event_range_id = parser.parse_result(message)?;
        return Ok(WorkerMessage::Result { event_range_id });
    }
    if message.starts_with("ERR") {
        return Ok(WorkerMessage::Error(parser.parse_error(message)));
    }
    Ok(WorkerMessage::Unrecognized)
}
