//! Redelivery queue for failed critical payloads.
//!
//! Only payloads carrying ERROR+ records are captured. Each one is retried
//! on a fixed delay; once `max_retries` attempts have failed it is handed
//! back to the caller for the last-resort transport.

use std::collections::VecDeque;

use crate::config::RetryConfig;

/// How the payload was originally sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    Single,
    Batch,
}

/// A payload waiting for another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub component: String,
    pub payload: String,
    pub kind: DeliveryKind,
    /// Failed attempts so far, including the original send.
    pub failures: u32,
    pub next_attempt_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Queued,
    /// Queue is full; the payload is returned for immediate fallback.
    Full(PendingDelivery),
}

/// Fixed-delay retry queue.
#[derive(Debug)]
pub struct RetryQueue {
    config: RetryConfig,
    queue: VecDeque<PendingDelivery>,
    retried: u64,
    exhausted: u64,
}

impl RetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            queue: VecDeque::with_capacity(config.max_queued.min(1024)),
            config,
            retried: 0,
            exhausted: 0,
        }
    }

    /// Capture a payload whose first send just failed.
    pub fn capture(
        &mut self,
        component: &str,
        payload: String,
        kind: DeliveryKind,
        now_ms: u64,
    ) -> CaptureOutcome {
        let pending = PendingDelivery {
            component: component.to_string(),
            payload,
            kind,
            failures: 1,
            next_attempt_at: now_ms + self.config.retry_delay_ms,
        };
        if self.queue.len() >= self.config.max_queued || self.config.max_retries == 0 {
            return CaptureOutcome::Full(pending);
        }
        self.queue.push_back(pending);
        CaptureOutcome::Queued
    }

    /// Remove and return every delivery due at `now_ms`.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<PendingDelivery> {
        let mut due = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for pending in self.queue.drain(..) {
            if pending.next_attempt_at <= now_ms {
                due.push(pending);
            } else {
                kept.push_back(pending);
            }
        }
        self.queue = kept;
        self.retried += due.len() as u64;
        due
    }

    /// Record another failed attempt. Returns the delivery back if it has
    /// used up its retries.
    pub fn reschedule(&mut self, mut pending: PendingDelivery, now_ms: u64) -> Option<PendingDelivery> {
        pending.failures += 1;
        // The original send is not a retry.
        if pending.failures > self.config.max_retries {
            self.exhausted += 1;
            return Some(pending);
        }
        pending.next_attempt_at = now_ms + self.config.retry_delay_ms;
        self.queue.push_back(pending);
        None
    }

    pub fn next_due(&self) -> Option<u64> {
        self.queue.iter().map(|p| p.next_attempt_at).min()
    }

    /// Hand back everything still queued, e.g. at shutdown.
    pub fn drain(&mut self) -> Vec<PendingDelivery> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|p| p.payload.len()).sum()
    }

    pub fn retried(&self) -> u64 {
        self.retried
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> RetryQueue {
        RetryQueue::new(RetryConfig {
            max_retries: 2,
            retry_delay_ms: 100,
            max_queued: 2,
        })
    }

    #[test]
    fn test_fixed_delay() {
        let mut q = queue();
        assert_eq!(
            q.capture("net", "p".into(), DeliveryKind::Single, 1_000),
            CaptureOutcome::Queued
        );
        assert_eq!(q.next_due(), Some(1_100));
        assert!(q.take_due(1_099).is_empty());
        let due = q.take_due(1_100);
        assert_eq!(due.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_exhaustion_after_max_retries() {
        let mut q = queue();
        q.capture("net", "p".into(), DeliveryKind::Batch, 0);

        let first = q.take_due(100).remove(0);
        assert!(q.reschedule(first, 100).is_none());
        assert_eq!(q.next_due(), Some(200));

        let second = q.take_due(200).remove(0);
        let exhausted = q.reschedule(second, 200).unwrap();
        assert_eq!(exhausted.failures, 3);
        assert_eq!(q.exhausted(), 1);
        assert_eq!(q.retried(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_full_queue_returns_payload() {
        let mut q = queue();
        q.capture("a", "1".into(), DeliveryKind::Single, 0);
        q.capture("a", "22".into(), DeliveryKind::Single, 0);
        match q.capture("a", "333".into(), DeliveryKind::Single, 0) {
            CaptureOutcome::Full(p) => assert_eq!(p.payload, "333"),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(q.total_bytes(), 3);
        assert_eq!(q.drain().len(), 2);
    }
}
