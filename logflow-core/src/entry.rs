//! Log entry model: severity levels, immutable entries and the sequencer.
//!
//! Every entry carries a `sequence` number handed out by a [`Sequencer`].
//! The sequence is the only ordering key anywhere in the workspace; the
//! `timestamp` is informational (display, wire payloads) and never consulted
//! when sorting or merging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::context::{ContextMap, ContextValue};

// ───────────────────────────────────────────────────────────────────
// Severity
// ───────────────────────────────────────────────────────────────────

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Critical,
    ];

    /// Numeric wire code (TRACE = -1 … CRITICAL = 4).
    pub fn code(self) -> i8 {
        match self {
            Level::Trace => -1,
            Level::Debug => 0,
            Level::Info => 1,
            Level::Warn => 2,
            Level::Error => 3,
            Level::Critical => 4,
        }
    }

    /// Inverse of [`Level::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Level::Trace),
            0 => Some(Level::Debug),
            1 => Some(Level::Info),
            2 => Some(Level::Warn),
            3 => Some(Level::Error),
            4 => Some(Level::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// ERROR and CRITICAL.
    pub fn is_error_or_above(self) -> bool {
        self >= Level::Error
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a level name does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Entries
// ───────────────────────────────────────────────────────────────────

/// An immutable log event.
///
/// Construct through [`EntryDraft::seal`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    sequence: u64,
    level: Level,
    component: String,
    message: String,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<ContextMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operation: Option<String>,
    session_id: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
}

impl LogEntry {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn context(&self) -> Option<&ContextMap> {
        self.context.as_ref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Approximate heap + inline footprint in bytes.
    ///
    /// Used by memory estimators; strings are counted by length and
    /// context values by a rough per-variant size.
    pub fn approx_size(&self) -> usize {
        let strings = self.component.len()
            + self.message.len()
            + self.session_id.len()
            + self.operation.as_ref().map_or(0, String::len)
            + self.stack_trace.as_ref().map_or(0, String::len)
            + self.tags.iter().map(String::len).sum::<usize>();
        let context = self
            .context
            .as_ref()
            .map_or(0, |ctx| ctx.iter().map(|(k, v)| k.len() + v.approx_size()).sum());
        std::mem::size_of::<LogEntry>() + strings + context
    }
}

/// Builder for a [`LogEntry`] that has not been assigned a sequence yet.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    level: Level,
    component: String,
    message: String,
    context: Option<ContextMap>,
    operation: Option<String>,
    tags: BTreeSet<String>,
    stack_trace: Option<String>,
}

impl EntryDraft {
    pub fn new(level: Level, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            component: component.into(),
            message: message.into(),
            context: None,
            operation: None,
            tags: BTreeSet::new(),
            stack_trace: None,
        }
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = Some(context);
        self
    }

    /// Append a single context field, creating the map on first use.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context
            .get_or_insert_with(ContextMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Attach a stack trace. Dropped at seal time below ERROR.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Fill in the operation only if none was set explicitly.
    pub fn or_operation(mut self, operation: Option<&str>) -> Self {
        if self.operation.is_none() {
            self.operation = operation.map(str::to_string);
        }
        self
    }

    /// Freeze the draft into an entry.
    pub fn seal(self, sequence: u64, timestamp: i64, session_id: &str) -> LogEntry {
        let stack_trace = if self.level.is_error_or_above() {
            self.stack_trace
        } else {
            None
        };
        LogEntry {
            sequence,
            level: self.level,
            component: self.component,
            message: self.message,
            timestamp,
            context: self.context,
            operation: self.operation,
            session_id: session_id.to_string(),
            tags: self.tags,
            stack_trace,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Sequencer
// ───────────────────────────────────────────────────────────────────

/// Monotonic sequence allocator. Numbers are never reused.
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: u64,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    /// Start at sequence 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// The number the next call to `next_sequence` will return.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Advance past a sequence assigned elsewhere so it is never handed out.
    pub fn observe(&mut self, sequence: u64) {
        if sequence >= self.next {
            self.next = sequence + 1;
        }
    }
}

/// Fresh random session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
