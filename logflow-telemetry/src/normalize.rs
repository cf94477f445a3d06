//! Message signatures for similarity throttling.
//!
//! Variable fragments are replaced with placeholders so that
//! `"fetch 12 failed after 300ms"` and `"fetch 13 failed after 280ms"`
//! share one signature:
//!
//! ```text
//! 3f2a…-uuid          → <uuid>
//! 2024-05-01T10:00:00Z → <ts>
//! /var/log/app.log    → <path>
//! 0xdeadbeef          → <hex>
//! 42, -1.5            → <n>
//! ```
//!
//! Replacement order matters: UUIDs and timestamps contain digits and must
//! be consumed before the number pass. Results are memoized in an LRU.

use std::num::NonZeroUsize;

use lru::LruCache;
use regex::Regex;

use crate::config::ConfigError;

const PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        "<uuid>",
    ),
    (
        r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        "<ts>",
    ),
    (r"(?:[A-Za-z]:)?(?:[/\\][\w.\-]+){2,}", "<path>"),
    (r"\b0x[0-9a-fA-F]+\b|\b[0-9a-f]{12,}\b", "<hex>"),
    (r"-?\d+(?:\.\d+)?", "<n>"),
];

/// Regex-based message normalizer with a bounded signature cache.
#[derive(Debug)]
pub struct MessageNormalizer {
    rules: Vec<(Regex, &'static str)>,
    cache: LruCache<String, String>,
}

impl MessageNormalizer {
    pub fn new(cache_capacity: usize) -> Result<Self, ConfigError> {
        let rules = PATTERNS
            .iter()
            .map(|(pattern, placeholder)| {
                Regex::new(pattern)
                    .map(|re| (re, *placeholder))
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: (*pattern).to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            rules,
            cache: LruCache::new(capacity),
        })
    }

    /// Signature of `message`.
    pub fn signature(&mut self, message: &str) -> String {
        if let Some(cached) = self.cache.get(message) {
            return cached.clone();
        }
        let mut normalized = message.to_string();
        for (re, placeholder) in &self.rules {
            if re.is_match(&normalized) {
                normalized = re.replace_all(&normalized, *placeholder).into_owned();
            }
        }
        self.cache.put(message.to_string(), normalized.clone());
        normalized
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
