//! Outcome of a best-effort pipeline stage

use std::fmt;

/// What a best-effort stage produced, and whether it had to fall back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran and changed the query
    Applied(String),

    /// The stage had nothing to do; the input passes through
    Skipped(String),

    /// The stage failed; the input passes through
    Fallback { value: String, reason: String },
}

impl StageOutcome {
    pub fn fallback(value: impl Into<String>, reason: impl fmt::Display) -> Self {
        StageOutcome::Fallback {
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            StageOutcome::Applied(value)
            | StageOutcome::Skipped(value)
            | StageOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> String {
        match self {
            StageOutcome::Applied(value)
            | StageOutcome::Skipped(value)
            | StageOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, StageOutcome::Fallback { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Applied(_) => "applied",
            StageOutcome::Skipped(_) => "skipped",
            StageOutcome::Fallback { .. } => "fallback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_keeps_value_and_reason() {
        let outcome = StageOutcome::fallback("what is kiirtan", "API error 503");
        assert_eq!(outcome.value(), "what is kiirtan");
        assert!(outcome.used_fallback());
        assert_eq!(outcome.label(), "fallback");
        match &outcome {
            StageOutcome::Fallback { reason, .. } => assert_eq!(reason, "API error 503"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(outcome.into_value(), "what is kiirtan");
    }

    #[test]
    fn test_applied_and_skipped() {
        assert!(!StageOutcome::Applied("a".into()).used_fallback());
        assert_eq!(StageOutcome::Skipped("b".into()).label(), "skipped");
    }
}
