use thiserror::Error;

use crate::compile::parser::MAX_NESTING;

/// Errors produced while compiling a check string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The check string was empty or contained only whitespace.
    #[error("empty check expression")]
    Empty,

    /// A `(` without a matching `)` or vice versa.
    #[error("unbalanced parentheses at offset {offset}")]
    UnbalancedParentheses {
        /// Byte offset of the offending parenthesis.
        offset: usize,
    },

    /// An atom whose keyword is neither a known check kind nor a dotted path.
    #[error("unknown atom keyword '{keyword}'")]
    UnknownAtom {
        /// The keyword as written.
        keyword: String,
    },

    /// A `%(...)s` marker that is not terminated or does not wrap a path.
    #[error("malformed substitution marker '{text}'")]
    MalformedSubstitution {
        /// The offending text.
        text: String,
    },

    /// A `keyword:` atom with nothing after the colon.
    #[error("missing value after '{keyword}:'")]
    MissingValue {
        /// The keyword whose value is missing.
        keyword: String,
    },

    /// A substitution used where only a literal is accepted (e.g. `role:`).
    #[error("'{keyword}' requires a literal value, not a substitution")]
    LiteralRequired {
        /// The keyword that requires a literal.
        keyword: String,
    },

    /// Parentheses, `not` prefixes or `and`/`or` chains nested past
    /// [`MAX_NESTING`] levels.
    #[error("expression nested deeper than {max} levels at offset {offset}", max = MAX_NESTING)]
    TooDeep {
        /// Byte offset where the limit was crossed.
        offset: usize,
    },

    /// Any other token that does not fit the grammar.
    #[error("unexpected input at offset {offset}: {found:?}")]
    UnexpectedToken {
        /// Byte offset into the original check string.
        offset: usize,
        /// A short excerpt of the input at that offset.
        found: String,
    },
}

/// Errors that can occur while building a registry or deciding access.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A registered rule (or override) carries a check string that does not compile.
    #[error("invalid check string for rule '{rule}': {source}")]
    InvalidRule {
        /// The rule whose check string failed.
        rule: String,
        /// The underlying parse failure.
        #[source]
        source: ParseError,
    },

    /// The request context could not be built or an attribute lookup failed.
    #[error("context error: {0}")]
    Context(String),

    /// A rule with the same name is already registered.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// A deprecated rule link points at a rule that was never registered.
    #[error("rule '{rule}' deprecates '{target}', which is not registered")]
    DanglingDeprecation {
        /// The rule carrying the deprecation link.
        rule: String,
        /// The unresolved link target.
        target: String,
    },

    /// A `rule:` atom names a rule that is not registered.
    #[error("rule '{rule}' references undefined rule '{reference}'")]
    UndefinedReference {
        /// The rule containing the reference.
        rule: String,
        /// The missing rule name.
        reference: String,
    },

    /// `rule:` references form a cycle.
    #[error("rule reference cycle: {0}")]
    ReferenceCycle(String),

    /// A check string uses an attribute path missing from the context schema.
    #[error("rule '{rule}' uses unregistered context path '{path}'")]
    UnregisteredPath {
        /// The rule using the path.
        rule: String,
        /// The unregistered path.
        path: String,
    },

    /// The registry was already finalized and can no longer change.
    #[error("registry is finalized; cannot modify '{0}'")]
    RegistryFinalized(String),

    /// The registry was queried before it was finalized.
    #[error("registry has not been finalized")]
    NotFinalized,

    /// A policy source (file, directory) could not be read or decoded.
    #[error("load error: {0}")]
    Load(String),

    /// The operation name does not match any registered rule.
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// Access was denied (only raised by `Enforcer::authorize`).
    #[error("policy does not allow '{rule}' to be performed")]
    Forbidden {
        /// The rule that denied access.
        rule: String,
    },

    /// An unreachable state was reached (e.g. grammar version skew).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PolicyError {
    /// Returns `true` for configuration errors that must abort startup.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRule { .. }
                | Self::DuplicateRule(_)
                | Self::DanglingDeprecation { .. }
                | Self::UndefinedReference { .. }
                | Self::ReferenceCycle(_)
                | Self::UnregisteredPath { .. }
                | Self::RegistryFinalized(_)
                | Self::Load(_)
        )
    }
}
