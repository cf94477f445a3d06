//! Structured context payloads attached to log entries.
//!
//! Host applications hand us loosely typed payloads that may be deeply
//! nested, share sub-objects, or even reference themselves. [`Sanitizer`]
//! converts such a [`DynValue`] graph into a plain [`ContextValue`] tree:
//!
//! ```text
//!   DynValue graph ──► Sanitizer ──► ContextValue tree
//!   (Rc-shared,        depth cap     (owned, acyclic,
//!    maybe cyclic)     cycle guard    serializable)
//! ```
//!
//! A container that would recurse into one of its own ancestors becomes the
//! `"[Circular]"` marker; anything deeper than the depth cap becomes
//! `"[MaxDepth]"`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered, string-keyed context map (insertion order is preserved).
pub type ContextMap = IndexMap<String, ContextValue>;

pub const CIRCULAR_MARKER: &str = "[Circular]";
pub const MAX_DEPTH_MARKER: &str = "[MaxDepth]";
const TRUNCATION_SUFFIX: &str = "…[truncated]";

/// A sanitized, owned context value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ContextValue>),
    Map(ContextMap),
}

impl ContextValue {
    /// Rough in-memory footprint.
    pub fn approx_size(&self) -> usize {
        match self {
            ContextValue::Str(s) => s.len() + 24,
            ContextValue::List(items) => 24 + items.iter().map(Self::approx_size).sum::<usize>(),
            ContextValue::Map(map) => {
                48 + map.iter().map(|(k, v)| k.len() + v.approx_size()).sum::<usize>()
            }
            _ => std::mem::size_of::<ContextValue>(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Depth-capped conversion from a JSON value.
    pub fn from_json(value: &serde_json::Value, max_depth: usize) -> Self {
        json_to_context(value, 0, max_depth)
    }
}

fn json_to_context(value: &serde_json::Value, depth: usize, max_depth: usize) -> ContextValue {
    use serde_json::Value;
    match value {
        Value::Null => ContextValue::Null,
        Value::Bool(b) => ContextValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ContextValue::Int(i),
            None => ContextValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => ContextValue::Str(s.clone()),
        Value::Array(_) | Value::Object(_) if depth >= max_depth => {
            ContextValue::Str(MAX_DEPTH_MARKER.to_string())
        }
        Value::Array(items) => ContextValue::List(
            items
                .iter()
                .map(|v| json_to_context(v, depth + 1, max_depth))
                .collect(),
        ),
        Value::Object(map) => ContextValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_context(v, depth + 1, max_depth)))
                .collect(),
        ),
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Bool(v)
    }
}

impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        ContextValue::Int(v as i64)
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Int(v)
    }
}

impl From<u32> for ContextValue {
    fn from(v: u32) -> Self {
        ContextValue::Int(v as i64)
    }
}

impl From<u64> for ContextValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(ContextValue::Float(v as f64), ContextValue::Int)
    }
}

impl From<usize> for ContextValue {
    fn from(v: usize) -> Self {
        ContextValue::from(v as u64)
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        ContextValue::Float(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::Str(v)
    }
}

// ───────────────────────────────────────────────────────────────────
// Dynamic host payloads
// ───────────────────────────────────────────────────────────────────

/// Shared, mutable array node of a dynamic payload.
pub type DynArray = Rc<RefCell<Vec<DynValue>>>;
/// Shared, mutable object node of a dynamic payload.
pub type DynObject = Rc<RefCell<IndexMap<String, DynValue>>>;

/// Loosely typed payload as produced by a host application.
///
/// Containers are reference-counted so a payload may share sub-objects or
/// form cycles.
#[derive(Debug, Clone)]
pub enum DynValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(DynArray),
    Object(DynObject),
    /// Something with no data representation (a callback, a handle…).
    Opaque(&'static str),
}

impl DynValue {
    pub fn array(items: Vec<DynValue>) -> Self {
        DynValue::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: IndexMap<String, DynValue>) -> Self {
        DynValue::Object(Rc::new(RefCell::new(fields)))
    }

    /// Pointer identity of a container node.
    fn identity(&self) -> Option<*const ()> {
        match self {
            DynValue::Array(rc) => Some(Rc::as_ptr(rc) as *const ()),
            DynValue::Object(rc) => Some(Rc::as_ptr(rc) as *const ()),
            _ => None,
        }
    }
}

/// Depth-capped, cycle-safe converter from [`DynValue`] to [`ContextValue`].
#[derive(Debug, Clone)]
pub struct Sanitizer {
    /// Containers nested deeper than this collapse to `[MaxDepth]`.
    pub max_depth: usize,
    /// Longer strings are cut and suffixed with a truncation marker.
    pub max_string_len: usize,
    /// Maximum items kept per array/object.
    pub max_entries: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_string_len: 2048,
            max_entries: 100,
        }
    }
}

impl Sanitizer {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    /// Sanitize one value (top level is depth 0).
    pub fn sanitize(&self, value: &DynValue) -> ContextValue {
        let mut path = Vec::new();
        self.walk(value, 0, &mut path)
    }

    /// Sanitize a top-level field map into a [`ContextMap`].
    ///
    /// The map itself sits at depth 0, so its values start at depth 1.
    pub fn sanitize_fields(&self, fields: &IndexMap<String, DynValue>) -> ContextMap {
        let mut path = Vec::new();
        fields
            .iter()
            .take(self.max_entries)
            .map(|(k, v)| (k.clone(), self.walk(v, 1, &mut path)))
            .collect()
    }

    fn walk(&self, value: &DynValue, depth: usize, path: &mut Vec<*const ()>) -> ContextValue {
        match value {
            DynValue::Null => ContextValue::Null,
            DynValue::Bool(b) => ContextValue::Bool(*b),
            DynValue::Number(n) => number_to_context(*n),
            DynValue::Text(s) => ContextValue::Str(self.clip(s)),
            DynValue::Opaque(kind) => ContextValue::Str(format!("[{kind}]")),
            DynValue::Array(_) | DynValue::Object(_) => {
                let Some(id) = value.identity() else {
                    return ContextValue::Null;
                };
                if path.contains(&id) {
                    return ContextValue::Str(CIRCULAR_MARKER.to_string());
                }
                if depth >= self.max_depth {
                    return ContextValue::Str(MAX_DEPTH_MARKER.to_string());
                }

                path.push(id);
                let out = match value {
                    DynValue::Array(items) => ContextValue::List(
                        items
                            .borrow()
                            .iter()
                            .take(self.max_entries)
                            .map(|v| self.walk(v, depth + 1, path))
                            .collect(),
                    ),
                    DynValue::Object(fields) => ContextValue::Map(
                        fields
                            .borrow()
                            .iter()
                            .take(self.max_entries)
                            .map(|(k, v)| (k.clone(), self.walk(v, depth + 1, path)))
                            .collect(),
                    ),
                    _ => ContextValue::Null,
                };
                path.pop();
                out
            }
        }
    }

    fn clip(&self, s: &str) -> String {
        if s.len() <= self.max_string_len {
            return s.to_string();
        }
        let mut cut = self.max_string_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{TRUNCATION_SUFFIX}", &s[..cut])
    }
}

fn number_to_context(n: f64) -> ContextValue {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
        ContextValue::Int(n as i64)
    } else {
        ContextValue::Float(n)
    }
}
