//! Outbound transports.
//!
//! A [`Sink`] accepts one encoded record or one encoded batch and may fail.
//! [`ConsoleSink`] is the last-resort transport: it writes to the local log
//! under [`CONSOLE_TARGET`] and never fails.

use std::cell::RefCell;
use std::rc::Rc;

/// `log` target for everything the pipeline reports locally.
pub const CONSOLE_TARGET: &str = "logflow::console";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected payload: {0}")]
    Rejected(String),

    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

/// Delivery contract of the persistent log sink.
pub trait Sink {
    fn name(&self) -> &'static str;

    /// Deliver a single JSON-encoded record.
    fn send(&mut self, component: &str, payload: &str) -> Result<(), SinkError>;

    /// Deliver a JSON array of records in one call.
    fn send_batch(&mut self, component: &str, payload: &str) -> Result<(), SinkError>;
}

/// Writes payloads to the local log. Never fails.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    written: u64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn send(&mut self, component: &str, payload: &str) -> Result<(), SinkError> {
        self.written += 1;
        log::warn!(target: CONSOLE_TARGET, "[{component}] {payload}");
        Ok(())
    }

    fn send_batch(&mut self, component: &str, payload: &str) -> Result<(), SinkError> {
        self.written += 1;
        log::warn!(target: CONSOLE_TARGET, "[{component}] batch {payload}");
        Ok(())
    }
}

/// One call observed by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub component: String,
    pub payload: String,
    pub batch: bool,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    delivered: Vec<Delivered>,
    attempts: u64,
    fail_next: u32,
    failing: bool,
}

/// In-process sink with scripted failures. Clones share state, so a handle
/// kept by the caller observes what the pipeline delivered.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Rc<RefCell<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.state.borrow_mut().fail_next = n;
    }

    /// Fail every call until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.state.borrow().delivered.clone()
    }

    /// Calls made, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.state.borrow().attempts
    }

    /// Records delivered so far, counting each batch element.
    pub fn record_count(&self) -> usize {
        self.state
            .borrow()
            .delivered
            .iter()
            .map(|d| {
                if d.batch {
                    serde_json::from_str::<Vec<serde_json::Value>>(&d.payload)
                        .map(|v| v.len())
                        .unwrap_or(0)
                } else {
                    1
                }
            })
            .sum()
    }

    fn deliver(&self, component: &str, payload: &str, batch: bool) -> Result<(), SinkError> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.failing {
            return Err(SinkError::Unavailable("sink offline".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable("transient failure".into()));
        }
        state.delivered.push(Delivered {
            component: component.to_string(),
            payload: payload.to_string(),
            batch,
        });
        Ok(())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn send(&mut self, component: &str, payload: &str) -> Result<(), SinkError> {
        self.deliver(component, payload, false)
    }

    fn send_batch(&mut self, component: &str, payload: &str) -> Result<(), SinkError> {
        self.deliver(component, payload, true)
    }
}
