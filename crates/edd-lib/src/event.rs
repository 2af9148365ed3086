//! Log record decoding.
//!
//! The agent's action log is a line-oriented, append-only stream of JSON
//! records. This module turns raw lines into typed [`Event`]s, tolerating
//! garbage: a line that fails to decode is dropped with a recorded warning
//! count and never aborts reconstruction.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::EddResult;

/// The kind of a single log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ToolCall,
    ToolResult,
    Response,
    SessionStatus,
}

/// One parsed log record. Immutable once parsed.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Record timestamp, monotonic per session.
    pub timestamp: DateTime<Utc>,
    /// Line sequence number, assigned by the reader. Secondary sort key when
    /// timestamps tie, so reconstruction is reproducible.
    pub seq: u64,
    pub session_id: String,
    pub event_type: EventType,
    pub tool_name: Option<String>,
    pub input: Option<Map<String, Value>>,
    pub output_summary: Option<String>,
    pub text: Option<String>,
}

/// Wire shape of a log line. Unknown fields are ignored; `event_type` stays
/// a string so unknown values can be counted instead of failing the line.
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: String,
    session_id: String,
    event_type: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    input: Option<Map<String, Value>>,
    #[serde(default)]
    output_summary: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Stateful line decoder: strips ANSI color codes, assigns line sequence
/// numbers, and counts lines it had to drop.
pub struct LineParser {
    ansi: Regex,
    seq: u64,
    parse_failures: u64,
    unknown_events: u64,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            // The gateway writes colored output into the same stream.
            ansi: Regex::new(r"\x1b\[[0-9;]*m").expect("static regex"),
            seq: 0,
            parse_failures: 0,
            unknown_events: 0,
        }
    }

    /// Decode one line. Returns `None` for blank, malformed, or
    /// unknown-typed lines; the latter two bump the warning counters.
    pub fn parse_line(&mut self, line: &str) -> Option<Event> {
        self.seq += 1;
        let line = self.ansi.replace_all(line.trim(), "");
        if line.is_empty() {
            return None;
        }

        let raw: RawRecord = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                self.parse_failures += 1;
                warn!(seq = self.seq, error = %e, "Dropping undecodable log line");
                return None;
            }
        };

        let event_type = match raw.event_type.as_str() {
            "tool_call" => EventType::ToolCall,
            "tool_result" => EventType::ToolResult,
            "response" => EventType::Response,
            "session_status" => EventType::SessionStatus,
            other => {
                self.unknown_events += 1;
                warn!(seq = self.seq, event_type = other, "Ignoring unknown event type");
                return None;
            }
        };

        let timestamp = match DateTime::parse_from_rfc3339(&raw.timestamp) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                self.parse_failures += 1;
                warn!(seq = self.seq, error = %e, "Dropping log line with bad timestamp");
                return None;
            }
        };

        Some(Event {
            timestamp,
            seq: self.seq,
            session_id: raw.session_id,
            event_type,
            tool_name: raw.tool_name,
            input: raw.input,
            output_summary: raw.output_summary,
            text: raw.text,
        })
    }

    /// Total lines dropped so far (decode failures plus unknown event types).
    pub fn warnings(&self) -> u64 {
        self.parse_failures + self.unknown_events
    }

    /// Drain the warning counters, returning the total since the last call.
    pub fn take_warnings(&mut self) -> u64 {
        let total = self.parse_failures + self.unknown_events;
        self.parse_failures = 0;
        self.unknown_events = 0;
        total
    }
}

/// Path of the day-stamped log file, e.g. `logs/agent-2026-08-29.log`.
/// Log files roll over at day boundaries.
pub fn day_log_path(dir: &Path, prefix: &str, date: chrono::NaiveDate) -> PathBuf {
    dir.join(format!("{prefix}-{}.log", date.format("%Y-%m-%d")))
}

/// Best-effort read of a whole log file. Returns the decoded events and the
/// number of lines that were dropped.
pub fn read_log_file(path: &Path) -> EddResult<(Vec<Event>, u64)> {
    let content = fs::read_to_string(path)?;
    let mut parser = LineParser::new();
    let events = content.lines().filter_map(|l| parser.parse_line(l)).collect();
    Ok((events, parser.warnings()))
}

/// Read every `{prefix}-*.log` in a directory, sorted by file name so day
/// files decode in chronological order. Missing directory yields no events.
pub fn read_log_dir(dir: &Path, prefix: &str) -> EddResult<(Vec<Event>, u64)> {
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension().is_some_and(|ext| ext == "log")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&format!("{prefix}-")))
            })
            .collect(),
        Err(_) => return Ok((Vec::new(), 0)),
    };
    paths.sort();

    let mut parser = LineParser::new();
    let mut events = Vec::new();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        events.extend(content.lines().filter_map(|l| parser.parse_line(l)));
    }
    Ok((events, parser.warnings()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_tool_call_line() {
        let mut parser = LineParser::new();
        let event = parser
            .parse_line(
                r#"{"timestamp":"2026-08-01T10:00:00Z","session_id":"s1","event_type":"tool_call","tool_name":"exec","input":{"command":"ls"}}"#,
            )
            .expect("line should decode");
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.event_type, EventType::ToolCall);
        assert_eq!(event.tool_name.as_deref(), Some("exec"));
        assert_eq!(event.seq, 1);
        assert_eq!(parser.warnings(), 0);
    }

    #[test]
    fn strips_ansi_and_ignores_unknown_fields() {
        let mut parser = LineParser::new();
        let event = parser.parse_line(
            "\x1b[32m{\"timestamp\":\"2026-08-01T10:00:00Z\",\"session_id\":\"s1\",\"event_type\":\"response\",\"text\":\"done\",\"color\":\"green\"}\x1b[0m",
        );
        assert!(event.is_some());
        assert_eq!(event.unwrap().text.as_deref(), Some("done"));
    }

    #[test]
    fn counts_garbage_and_unknown_event_types() {
        let mut parser = LineParser::new();
        assert!(parser.parse_line("not json at all").is_none());
        assert!(parser
            .parse_line(r#"{"timestamp":"2026-08-01T10:00:00Z","session_id":"s1","event_type":"telemetry"}"#)
            .is_none());
        assert!(parser.parse_line("").is_none());
        assert_eq!(parser.warnings(), 2);
        assert_eq!(parser.take_warnings(), 2);
        assert_eq!(parser.warnings(), 0);
    }

    #[test]
    fn sequence_numbers_follow_physical_lines() {
        let mut parser = LineParser::new();
        parser.parse_line("garbage");
        let event = parser
            .parse_line(r#"{"timestamp":"2026-08-01T10:00:00Z","session_id":"s1","event_type":"response"}"#)
            .unwrap();
        assert_eq!(event.seq, 2);
    }
}
