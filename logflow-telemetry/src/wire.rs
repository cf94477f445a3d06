//! Compact outbound record.
//!
//! Short keys keep batch payloads small:
//!
//! ```json
//! {"seq":42,"lvl":3,"comp":"net","msg":"timeout","ts":1714557600000,
//!  "ctx":{"attempt":2},"op":"sync","sid":"…","tags":["x"],"stack":"…"}
//! ```
//!
//! `lvl` is the numeric level code (TRACE=-1 … CRITICAL=4).

use logflow_core::{ContextMap, LogEntry};
use serde::{Deserialize, Serialize};

use crate::sink::SinkError;

/// Kept from a message when a record has to be truncated.
const TRUNCATED_MESSAGE_CHARS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub seq: u64,
    pub lvl: i8,
    pub comp: String,
    pub msg: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<ContextMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub sid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl WireRecord {
    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            seq: entry.sequence(),
            lvl: entry.level().code(),
            comp: entry.component().to_string(),
            msg: entry.message().to_string(),
            ts: entry.timestamp(),
            ctx: entry.context().cloned(),
            op: entry.operation().map(str::to_string),
            sid: entry.session_id().to_string(),
            tags: entry.tags().iter().cloned().collect(),
            stack: entry.stack_trace().map(str::to_string),
            truncated: false,
        }
    }

    pub fn encode(&self) -> Result<String, SinkError> {
        serde_json::to_string(self).map_err(|e| SinkError::Encoding(e.to_string()))
    }

    /// Encode, shrinking the record if it exceeds `max_bytes`.
    ///
    /// Oversized records lose their context and stack and keep the first
    /// part of the message, flagged with `truncated`.
    pub fn encode_bounded(mut self, max_bytes: usize) -> Result<String, SinkError> {
        let encoded = self.encode()?;
        if encoded.len() <= max_bytes {
            return Ok(encoded);
        }
        let original = encoded.len();
        self.ctx = None;
        self.stack = None;
        if self.msg.chars().count() > TRUNCATED_MESSAGE_CHARS {
            self.msg = self.msg.chars().take(TRUNCATED_MESSAGE_CHARS).collect();
        }
        self.truncated = true;
        let shrunk = self.encode()?;
        log::debug!(
            "Record {} truncated from {original} to {} bytes",
            self.seq,
            shrunk.len()
        );
        Ok(shrunk)
    }
}

/// Join pre-encoded records into JSON arrays no larger than `max_bytes`,
/// each paired with its record count.
///
/// A record that alone exceeds the bound still gets its own array.
pub fn pack_arrays(encoded: &[String], max_bytes: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut current = String::from("[");
    let mut count = 0;
    for record in encoded {
        // Brackets plus a separating comma.
        let extra = record.len() + if count > 0 { 1 } else { 0 } + 1;
        if count > 0 && current.len() + extra > max_bytes {
            current.push(']');
            out.push((std::mem::replace(&mut current, String::from("[")), count));
            count = 0;
        }
        if count > 0 {
            current.push(',');
        }
        current.push_str(record);
        count += 1;
    }
    if count > 0 {
        current.push(']');
        out.push((current, count));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use logflow_core::{EntryDraft, Level};

    #[test]
    fn test_compact_keys() {
        let entry = EntryDraft::new(Level::Error, "net", "timeout")
            .with_field("attempt", 2)
            .with_operation("sync")
            .with_stack_trace("at main")
            .seal(42, 1_000, "sid-1");
        let json: serde_json::Value =
            serde_json::from_str(&WireRecord::from_entry(&entry).encode().unwrap()).unwrap();
        assert_eq!(json["seq"], 42);
        assert_eq!(json["lvl"], 3);
        assert_eq!(json["comp"], "net");
        assert_eq!(json["op"], "sync");
        assert_eq!(json["ctx"]["attempt"], 2);
        assert_eq!(json["stack"], "at main");
        assert!(json.get("tags").is_none());
        assert!(json.get("truncated").is_none());
    }

    #[test]
    fn test_trace_level_code() {
        let entry = EntryDraft::new(Level::Trace, "c", "m").seal(1, 0, "s");
        assert_eq!(WireRecord::from_entry(&entry).lvl, -1);
    }

    #[test]
    fn test_oversized_record_truncated() {
        let entry = EntryDraft::new(Level::Info, "c", "x".repeat(5_000))
            .with_field("blob", "y".repeat(5_000))
            .seal(1, 0, "s");
        let encoded = WireRecord::from_entry(&entry).encode_bounded(2_000).unwrap();
        let record: WireRecord = serde_json::from_str(&encoded).unwrap();
        assert!(record.truncated);
        assert!(record.ctx.is_none());
        assert_eq!(record.msg.len(), 1024);
    }

    #[test]
    fn test_pack_arrays_splits() {
        let records: Vec<String> = (0..10).map(|i| format!("{{\"n\":{i}}}")).collect();
        let arrays = pack_arrays(&records, 30);
        assert!(arrays.len() > 1);
        assert!(arrays.iter().all(|(a, _)| a.len() <= 30));
        for (array, count) in &arrays {
            let parsed: Vec<serde_json::Value> = serde_json::from_str(array).unwrap();
            assert_eq!(parsed.len(), *count);
        }
        assert_eq!(arrays.iter().map(|(_, n)| n).sum::<usize>(), 10);

        assert_eq!(
            pack_arrays(&records[..2], 1024),
            vec![(r#"[{"n":0},{"n":1}]"#.to_string(), 2)]
        );
        assert!(pack_arrays(&[], 1024).is_empty());
    }
}
