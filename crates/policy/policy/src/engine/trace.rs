use serde::{Deserialize, Serialize};

/// Outcome of evaluating a single atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AtomOutcome {
    /// The atom evaluated to `true`.
    Matched,
    /// The atom evaluated to `false`.
    NotMatched,
    /// A referenced context path had no value; the atom evaluated to `false`.
    Missing {
        /// The absent path.
        path: String,
        /// Whether the context schema marks the path as required.
        required: bool,
    },
    /// An attribute lookup failed; the atom evaluated to `false`.
    Error {
        /// The lookup error.
        message: String,
    },
}

impl AtomOutcome {
    /// Return the `snake_case` string representation (matches serde serialization).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::NotMatched => "not_matched",
            Self::Missing { .. } => "missing",
            Self::Error { .. } => "error",
        }
    }

    /// Returns `true` only for [`AtomOutcome::Matched`].
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Trace entry for one evaluated atom, in evaluation order.
///
/// Atoms skipped by short-circuiting do not appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomTrace {
    /// The rule whose check string contains the atom.
    pub rule: String,
    /// The atom rendered as check-string source.
    pub atom: String,
    /// What the atom evaluated to.
    #[serde(flatten)]
    pub outcome: AtomOutcome,
}
