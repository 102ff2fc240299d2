//! Guard verdicts and results.
//!
//! Verdict severity is total-ordered: `Allow < Warn < Repair < Block`.
//! A chain of guards resolves to the most severe verdict observed.

use crate::call::Arguments;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single guard check
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum GuardVerdict {
    /// Call may proceed unchanged
    #[default]
    Allow,
    /// Call may proceed; a violation was noted
    Warn,
    /// Call may proceed with repaired arguments
    Repair,
    /// Call must not proceed
    Block,
}

impl GuardVerdict {
    /// Whether this verdict stops execution
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Block)
    }

    /// The more severe of two verdicts
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        std::cmp::Ord::max(self, other)
    }
}

impl std::fmt::Display for GuardVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Repair => "repair",
            Self::Block => "block",
        };
        write!(f, "{s}")
    }
}

/// Verdict plus supporting detail from one guard check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GuardResult {
    /// The verdict
    pub verdict: GuardVerdict,
    /// Human-readable reason for non-allow verdicts
    pub reason: Option<String>,
    /// Coerced arguments accompanying a `Repair` verdict
    pub repaired_args: Option<Arguments>,
    /// Structured detail for auditing
    pub details: serde_json::Map<String, Value>,
}

impl GuardResult {
    /// An unconditional allow
    #[must_use]
    pub fn allow() -> Self {
        Self::default()
    }

    /// A warning with a reason
    #[must_use]
    pub fn warn(reason: impl Into<String>) -> Self {
        Self {
            verdict: GuardVerdict::Warn,
            reason: Some(reason.into()),
            repaired_args: None,
            details: serde_json::Map::new(),
        }
    }

    /// A block with a reason
    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            verdict: GuardVerdict::Block,
            reason: Some(reason.into()),
            repaired_args: None,
            details: serde_json::Map::new(),
        }
    }

    /// A repair carrying coerced arguments
    #[must_use]
    pub fn repair(reason: impl Into<String>, repaired_args: Arguments) -> Self {
        Self {
            verdict: GuardVerdict::Repair,
            reason: Some(reason.into()),
            repaired_args: Some(repaired_args),
            details: serde_json::Map::new(),
        }
    }

    /// Attach a structured detail entry
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Merge another result in, keeping the most severe verdict.
    ///
    /// Repaired arguments survive the merge as long as no side blocks:
    /// a later Warn must not discard an earlier guard's coercions.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let (mut winner, loser) = if other.verdict > self.verdict {
            (other, self)
        } else {
            (self, other)
        };
        if winner.repaired_args.is_none() {
            winner.repaired_args = loser.repaired_args;
        }
        if winner.reason.is_none() {
            winner.reason = loser.reason;
        }
        for (k, v) in loser.details {
            winner.details.entry(k).or_insert(v);
        }
        winner
    }
}

/// One guard's recorded outcome, as kept on execution spans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    /// Name of the guard that ran
    pub guard: String,
    /// Verdict it returned
    pub verdict: GuardVerdict,
    /// Reason, for non-allow verdicts
    pub reason: Option<String>,
}

impl GuardDecision {
    /// Record a decision from a guard result
    #[must_use]
    pub fn new(guard: impl Into<String>, result: &GuardResult) -> Self {
        Self {
            guard: guard.into(),
            verdict: result.verdict,
            reason: result.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_ordering() {
        assert!(GuardVerdict::Allow < GuardVerdict::Warn);
        assert!(GuardVerdict::Warn < GuardVerdict::Repair);
        assert!(GuardVerdict::Repair < GuardVerdict::Block);
        assert_eq!(
            GuardVerdict::Warn.max(GuardVerdict::Block),
            GuardVerdict::Block
        );
    }

    #[test]
    fn test_verdict_blocking() {
        assert!(GuardVerdict::Block.is_blocking());
        assert!(!GuardVerdict::Repair.is_blocking());
    }

    #[test]
    fn test_result_constructors() {
        assert_eq!(GuardResult::allow().verdict, GuardVerdict::Allow);
        let warn = GuardResult::warn("n out of range");
        assert_eq!(warn.verdict, GuardVerdict::Warn);
        assert_eq!(warn.reason.as_deref(), Some("n out of range"));
    }

    #[test]
    fn test_merge_takes_most_severe() {
        let merged = GuardResult::warn("w").merge(GuardResult::block("b"));
        assert_eq!(merged.verdict, GuardVerdict::Block);
        assert_eq!(merged.reason.as_deref(), Some("b"));
    }

    #[test]
    fn test_merge_preserves_repaired_args() {
        let mut repaired = Arguments::new();
        repaired.insert("age".to_string(), json!(30));
        let merged = GuardResult::repair("coerced age", repaired.clone())
            .merge(GuardResult::warn("unrelated"));
        assert_eq!(merged.verdict, GuardVerdict::Repair);
        assert_eq!(merged.repaired_args, Some(repaired));
    }

    #[test]
    fn test_merge_details_union() {
        let a = GuardResult::warn("a").with_detail("field", json!("x"));
        let b = GuardResult::warn("b").with_detail("other", json!(1));
        let merged = a.merge(b);
        assert_eq!(merged.details.len(), 2);
    }
}
