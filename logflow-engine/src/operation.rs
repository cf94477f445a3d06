//! Operation scopes.
//!
//! At most one operation is active. Entries logged while it is active carry
//! its name unless they name one themselves. Starting a new operation ends
//! the previous one as superseded.

use logflow_core::{ContextMap, EntryDraft, Level};
use serde::Serialize;

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failure(String),
    TimedOut,
    Superseded,
}

impl OperationOutcome {
    pub fn level(&self) -> Level {
        match self {
            OperationOutcome::Success => Level::Info,
            OperationOutcome::Failure(_) => Level::Error,
            OperationOutcome::TimedOut | OperationOutcome::Superseded => Level::Warn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Failure(_) => "failure",
            OperationOutcome::TimedOut => "timed_out",
            OperationOutcome::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ActiveOperation {
    pub name: String,
    pub context: Option<ContextMap>,
    pub started_at: u64,
    pub deadline: u64,
}

impl ActiveOperation {
    pub fn start_draft(&self, component: &str) -> EntryDraft {
        let draft = EntryDraft::new(
            Level::Info,
            component,
            format!("Operation '{}' started", self.name),
        )
        .with_operation(self.name.clone())
        .with_field("timeoutMs", self.deadline.saturating_sub(self.started_at));
        self.with_context(draft)
    }

    /// Close the scope and build its summary entry.
    pub fn finish(
        self,
        outcome: OperationOutcome,
        now_ms: u64,
        component: &str,
    ) -> (OperationSummary, EntryDraft) {
        let duration_ms = now_ms.saturating_sub(self.started_at);
        let message = match &outcome {
            OperationOutcome::Success => {
                format!("Operation '{}' completed in {duration_ms} ms", self.name)
            }
            OperationOutcome::Failure(error) => {
                format!("Operation '{}' failed after {duration_ms} ms: {error}", self.name)
            }
            OperationOutcome::TimedOut => {
                format!("Operation '{}' timed out after {duration_ms} ms", self.name)
            }
            OperationOutcome::Superseded => {
                format!("Operation '{}' superseded after {duration_ms} ms", self.name)
            }
        };
        let draft = EntryDraft::new(outcome.level(), component, message)
            .with_operation(self.name.clone())
            .with_field("durationMs", duration_ms)
            .with_field("outcome", outcome.as_str());
        let draft = self.with_context(draft);
        let summary = OperationSummary {
            name: self.name,
            duration_ms,
            outcome,
        };
        (summary, draft)
    }

    fn with_context(&self, mut draft: EntryDraft) -> EntryDraft {
        if let Some(context) = &self.context {
            for (key, value) in context {
                draft = draft.with_field(key.clone(), value.clone());
            }
        }
        draft
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub name: String,
    pub duration_ms: u64,
    pub outcome: OperationOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use logflow_core::ContextValue;

    fn active() -> ActiveOperation {
        let mut context = ContextMap::new();
        context.insert("user".into(), ContextValue::Str("u1".into()));
        ActiveOperation {
            name: "checkout".into(),
            context: Some(context),
            started_at: 1_000,
            deadline: 4_000,
        }
    }

    #[test]
    fn test_finish_levels() {
        let (summary, draft) = active().finish(OperationOutcome::Success, 1_250, "engine");
        assert_eq!(summary.duration_ms, 250);
        assert_eq!(draft.level(), Level::Info);
        assert_eq!(draft.operation(), Some("checkout"));

        let (_, draft) = active().finish(OperationOutcome::Failure("boom".into()), 2_000, "engine");
        assert_eq!(draft.level(), Level::Error);
        assert!(draft.message().contains("boom"));

        let (_, draft) = active().finish(OperationOutcome::TimedOut, 4_001, "engine");
        assert_eq!(draft.level(), Level::Warn);
    }

    #[test]
    fn test_context_carried() {
        let entry = active().start_draft("engine").seal(1, 1_000, "s");
        let context = entry.context().unwrap();
        assert_eq!(context.get("user").and_then(ContextValue::as_str), Some("u1"));
        assert_eq!(context.get("timeoutMs").and_then(ContextValue::as_i64), Some(3_000));
    }
}
