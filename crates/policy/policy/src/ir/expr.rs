use serde::{Deserialize, Serialize};

/// Right-hand side of an attribute-equality atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// A literal value compared verbatim.
    Literal(String),
    /// A `%(path)s` substitution, looked up in the request context.
    Path(String),
}

impl Operand {
    /// Returns the operand as written in a check string.
    pub fn to_source(&self) -> String {
        match self {
            Self::Literal(value) => {
                if value.is_empty()
                    || value
                        .chars()
                        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"'))
                    || value.contains("%(")
                {
                    format!("'{}'", value.replace('\'', "\\'"))
                } else {
                    value.clone()
                }
            }
            Self::Path(path) => format!("%({path})s"),
        }
    }
}

/// The predicate tree a check string compiles into.
///
/// The tree is serializable so that compiled predicates can be exported for
/// inspection (`warden explain --format json`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckExpr {
    /// `@`: always true.
    Always,
    /// `!`: always false.
    Never,
    /// `role:<name>`: the credential holds the role.
    Role(String),
    /// `system_scope:<value>`: the token is system scoped to `value`.
    SystemScope(String),
    /// `rule:<name>`: evaluate another registered rule.
    RuleRef(String),
    /// `<path>:<operand>`: the context value at `path` equals the operand.
    Attribute {
        /// Dotted context path on the left-hand side.
        path: String,
        /// Literal or substituted right-hand side.
        value: Operand,
    },
    /// `not <expr>`.
    Not(Box<CheckExpr>),
    /// `<lhs> and <rhs>` (short-circuit).
    And(Box<CheckExpr>, Box<CheckExpr>),
    /// `<lhs> or <rhs>` (short-circuit).
    Or(Box<CheckExpr>, Box<CheckExpr>),
}

impl CheckExpr {
    /// Returns a canonical check-string rendering of the expression.
    ///
    /// Binary nodes are always parenthesised so the output re-parses to the
    /// same tree.
    pub fn to_source(&self) -> String {
        match self {
            Self::Always => "@".to_owned(),
            Self::Never => "!".to_owned(),
            Self::Role(name) => format!("role:{name}"),
            Self::SystemScope(value) => format!("system_scope:{value}"),
            Self::RuleRef(name) => format!("rule:{name}"),
            Self::Attribute { path, value } => format!("{path}:{}", value.to_source()),
            Self::Not(inner) => format!("not {}", inner.to_source()),
            Self::And(lhs, rhs) => format!("({} and {})", lhs.to_source(), rhs.to_source()),
            Self::Or(lhs, rhs) => format!("({} or {})", lhs.to_source(), rhs.to_source()),
        }
    }

    /// Collect every context path referenced by attribute atoms, on either side.
    pub fn attribute_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.visit(&mut |expr| {
            if let Self::Attribute { path, value } = expr {
                paths.push(path.as_str());
                if let Operand::Path(rhs) = value {
                    paths.push(rhs.as_str());
                }
            }
        });
        paths
    }

    /// Collect the names of all rules referenced through `rule:` atoms.
    pub fn rule_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.visit(&mut |expr| {
            if let Self::RuleRef(name) = expr {
                refs.push(name.as_str());
            }
        });
        refs
    }

    /// Pre-order walk over the tree.
    fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Self)) {
        f(self);
        match self {
            Self::Not(inner) => inner.visit(f),
            Self::And(lhs, rhs) | Self::Or(lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            // Leaf nodes
            Self::Always
            | Self::Never
            | Self::Role(_)
            | Self::SystemScope(_)
            | Self::RuleRef(_)
            | Self::Attribute { .. } => {}
        }
    }
}
