use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::trace::AtomTrace;
use crate::ir::rule::ScopeType;
use crate::registry::RuleOrigin;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// The check string evaluated to `true`.
    CheckPassed,
    /// The check string evaluated to `false`.
    CheckFailed,
    /// The token's scope type is not allowed by the rule.
    ScopeMismatch {
        /// The token's scope type, `None` when unscoped.
        token: Option<ScopeType>,
        /// The scope types the rule accepts.
        allowed: Vec<ScopeType>,
    },
    /// The request context could not be built, or a failed lookup left the
    /// check string undecided.
    ContextUnavailable {
        /// The context error.
        message: String,
    },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckPassed => f.write_str("check passed"),
            Self::CheckFailed => f.write_str("check failed"),
            Self::ScopeMismatch { token, allowed } => {
                let allowed: Vec<&str> = allowed.iter().map(ScopeType::as_str).collect();
                write!(
                    f,
                    "token scope '{}' not in [{}]",
                    token.map_or("unscoped", |t| t.as_str()),
                    allowed.join(", ")
                )
            }
            Self::ContextUnavailable { message } => write!(f, "context unavailable: {message}"),
        }
    }
}

/// The result of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether access is allowed.
    pub allowed: bool,
    /// Name of the rule that was evaluated.
    pub rule: String,
    /// Where the rule's effective check string came from.
    pub origin: RuleOrigin,
    /// Why access was allowed or denied.
    pub reason: DecisionReason,
    /// Evaluated atoms, when tracing was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<AtomTrace>>,
}

impl Decision {
    /// Decision for a completed evaluation.
    pub(crate) fn evaluated(rule: &str, origin: RuleOrigin, allowed: bool) -> Self {
        let reason = if allowed {
            DecisionReason::CheckPassed
        } else {
            DecisionReason::CheckFailed
        };
        debug!(rule, allowed, "evaluated check string");
        Self {
            allowed,
            rule: rule.to_owned(),
            origin,
            reason,
            trace: None,
        }
    }

    /// A deny that did not come from a decided check string.
    pub(crate) fn denied(rule: &str, origin: RuleOrigin, reason: DecisionReason) -> Self {
        debug!(rule, %reason, "access denied");
        Self {
            allowed: false,
            rule: rule.to_owned(),
            origin,
            reason,
            trace: None,
        }
    }

    /// Attach a trace.
    #[must_use]
    pub(crate) fn with_trace(mut self, trace: Option<Vec<AtomTrace>>) -> Self {
        self.trace = trace;
        self
    }
}
