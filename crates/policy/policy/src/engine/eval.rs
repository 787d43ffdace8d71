use std::borrow::Cow;
use std::ops::Not;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::compile::{CompiledPredicate, GRAMMAR_VERSION};
use crate::config::default_max_rule_depth;
use crate::engine::context::{ContextSchema, PathRequirement, RequestContext};
use crate::engine::decision::{Decision, DecisionReason};
use crate::engine::trace::{AtomOutcome, AtomTrace};
use crate::error::PolicyError;
use crate::ir::expr::{CheckExpr, Operand};
use crate::registry::RuleOrigin;

/// Three-valued result of a check expression.
///
/// An attribute lookup that fails (as opposed to a path that is simply
/// absent) is `Unknown`. `not` keeps it unknown; `and`/`or` settle it only
/// when the other operand decides the result on its own. An unknown result
/// is never an allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    /// The check holds.
    True,
    /// The check does not hold.
    False,
    /// A lookup failed and the operands left the result open.
    Unknown,
}

impl Truth {
    /// Returns `true` only for [`Truth::True`].
    pub fn is_true(self) -> bool {
        self == Self::True
    }
}

impl Not for Truth {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// Source of compiled predicates for `rule:` references.
pub trait RuleLookup {
    /// The compiled effective predicate of the rule `name`.
    fn predicate(&self, name: &str) -> Result<Arc<CompiledPredicate>, PolicyError>;
}

/// Walks compiled predicates against one request context.
///
/// An evaluator is cheap to build and is meant to be used for a single
/// decision; the trace accumulates across calls to [`Evaluator::evaluate`].
pub struct Evaluator<'a> {
    ctx: &'a RequestContext,
    rules: Option<&'a dyn RuleLookup>,
    schema: Option<&'a ContextSchema>,
    max_depth: usize,
    trace: Option<Vec<AtomTrace>>,
    lookup_error: Option<String>,
}

impl<'a> Evaluator<'a> {
    /// An evaluator with no rule source, no schema and tracing off.
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self {
            ctx,
            rules: None,
            schema: None,
            max_depth: default_max_rule_depth(),
            trace: None,
            lookup_error: None,
        }
    }

    /// Resolve `rule:` references through `rules`.
    #[must_use]
    pub fn with_rules(mut self, rules: &'a dyn RuleLookup) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Classify missing paths with `schema`.
    #[must_use]
    pub fn with_schema(mut self, schema: Option<&'a ContextSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Limit `rule:` nesting.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Record every evaluated atom.
    #[must_use]
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled.then(Vec::new);
        self
    }

    /// Evaluate `predicate` as the check string of `rule`.
    pub fn evaluate(
        &mut self,
        rule: &str,
        predicate: &CompiledPredicate,
    ) -> Result<Truth, PolicyError> {
        self.eval_predicate(rule, predicate, 0)
    }

    /// The first failed lookup seen so far.
    pub fn lookup_error(&self) -> Option<&str> {
        self.lookup_error.as_deref()
    }

    /// The recorded trace, if tracing was enabled.
    pub fn into_trace(self) -> Option<Vec<AtomTrace>> {
        self.trace
    }

    fn eval_predicate(
        &mut self,
        rule: &str,
        predicate: &CompiledPredicate,
        depth: usize,
    ) -> Result<Truth, PolicyError> {
        let version = predicate.grammar_version();
        if version != GRAMMAR_VERSION {
            return Err(PolicyError::Internal(format!(
                "predicate for '{rule}' compiled with grammar v{version}, \
                 evaluator speaks v{GRAMMAR_VERSION}"
            )));
        }
        self.eval(rule, predicate.expr(), depth)
    }

    fn eval(&mut self, rule: &str, expr: &CheckExpr, depth: usize) -> Result<Truth, PolicyError> {
        match expr {
            CheckExpr::Not(inner) => Ok(!self.eval(rule, inner, depth)?),
            CheckExpr::And(lhs, rhs) => {
                let left = self.eval(rule, lhs, depth)?;
                if left == Truth::False {
                    return Ok(Truth::False);
                }
                Ok(match (left, self.eval(rule, rhs, depth)?) {
                    (_, Truth::False) => Truth::False,
                    (Truth::True, Truth::True) => Truth::True,
                    _ => Truth::Unknown,
                })
            }
            CheckExpr::Or(lhs, rhs) => {
                let left = self.eval(rule, lhs, depth)?;
                if left == Truth::True {
                    return Ok(Truth::True);
                }
                Ok(match (left, self.eval(rule, rhs, depth)?) {
                    (_, Truth::True) => Truth::True,
                    (Truth::False, Truth::False) => Truth::False,
                    _ => Truth::Unknown,
                })
            }
            CheckExpr::RuleRef(name) => {
                let result = self.eval_rule_ref(rule, name, depth)?;
                let recorded = match result {
                    Truth::Unknown => AtomOutcome::Error {
                        message: format!("rule '{name}' could not be decided"),
                    },
                    decided => outcome(decided.is_true()),
                };
                self.record(rule, expr, recorded);
                Ok(result)
            }
            CheckExpr::Attribute { path, value } => {
                let result = self.eval_attribute(path, value);
                let truth = match &result {
                    AtomOutcome::Matched => Truth::True,
                    AtomOutcome::NotMatched | AtomOutcome::Missing { .. } => Truth::False,
                    AtomOutcome::Error { message } => {
                        if self.lookup_error.is_none() {
                            self.lookup_error = Some(message.clone());
                        }
                        Truth::Unknown
                    }
                };
                self.record(rule, expr, result);
                Ok(truth)
            }
            CheckExpr::Always => Ok(self.leaf(rule, expr, true)),
            CheckExpr::Never => Ok(self.leaf(rule, expr, false)),
            CheckExpr::Role(role) => {
                let matched = self.ctx.has_role(role);
                Ok(self.leaf(rule, expr, matched))
            }
            CheckExpr::SystemScope(value) => {
                let matched = self.ctx.system_scope() == Some(value.as_str());
                Ok(self.leaf(rule, expr, matched))
            }
        }
    }

    fn leaf(&mut self, rule: &str, atom: &CheckExpr, matched: bool) -> Truth {
        self.record(rule, atom, outcome(matched));
        Truth::from(matched)
    }

    fn eval_rule_ref(
        &mut self,
        rule: &str,
        name: &str,
        depth: usize,
    ) -> Result<Truth, PolicyError> {
        if depth >= self.max_depth {
            return Err(PolicyError::Internal(format!(
                "rule nesting exceeded {} levels at '{rule}' -> '{name}'",
                self.max_depth
            )));
        }
        let Some(rules) = self.rules else {
            return Err(PolicyError::Internal(format!(
                "'{rule}' references rule '{name}' but no rule source is attached"
            )));
        };
        let predicate = rules.predicate(name)?;
        self.eval_predicate(name, &predicate, depth + 1)
    }

    fn eval_attribute(&self, path: &str, value: &Operand) -> AtomOutcome {
        let actual = match self.ctx.get(path) {
            Ok(Some(actual)) => actual,
            Ok(None) => return self.missing(path),
            Err(e) => return lookup_failed(path, &e),
        };
        let expected = match value {
            Operand::Literal(literal) => Cow::Borrowed(literal.as_str()),
            Operand::Path(rhs) => match self.ctx.get(rhs) {
                Ok(Some(expected)) => expected,
                Ok(None) => return self.missing(rhs),
                Err(e) => return lookup_failed(rhs, &e),
            },
        };
        outcome(actual == expected)
    }

    fn missing(&self, path: &str) -> AtomOutcome {
        let required = self
            .schema
            .and_then(|schema| schema.requirement(path))
            .is_some_and(|req| req == PathRequirement::Required);
        if required {
            warn!(path, "required context path is missing");
        } else {
            debug!(path, "context path is missing");
        }
        AtomOutcome::Missing {
            path: path.to_owned(),
            required,
        }
    }

    fn record(&mut self, rule: &str, atom: &CheckExpr, result: AtomOutcome) {
        if let Some(trace) = &mut self.trace {
            trace.push(AtomTrace {
                rule: rule.to_owned(),
                atom: atom.to_source(),
                outcome: result,
            });
        }
    }
}

fn outcome(matched: bool) -> AtomOutcome {
    if matched {
        AtomOutcome::Matched
    } else {
        AtomOutcome::NotMatched
    }
}

fn lookup_failed(path: &str, error: &PolicyError) -> AtomOutcome {
    warn!(path, error = %error, "context lookup failed");
    AtomOutcome::Error {
        message: error.to_string(),
    }
}

/// Turn an evaluation result into a decision for `rule`.
pub(crate) fn decide(
    rule: &str,
    origin: RuleOrigin,
    truth: Truth,
    evaluator: Evaluator<'_>,
) -> Decision {
    let decision = match truth {
        Truth::Unknown => {
            let message = evaluator
                .lookup_error()
                .unwrap_or("context lookup failed")
                .to_owned();
            warn!(rule, error = %message, "check undecidable after failed lookup; denying");
            Decision::denied(rule, origin, DecisionReason::ContextUnavailable { message })
        }
        decided => Decision::evaluated(rule, origin, decided.is_true()),
    };
    decision.with_trace(evaluator.into_trace())
}

/// Evaluate a standalone predicate, always recording the trace.
///
/// `rule:` references cannot be resolved here and fail with
/// [`PolicyError::Internal`]; use an [`Enforcer`](crate::Enforcer) for
/// registered rules.
pub fn evaluate(
    rule: &str,
    predicate: &CompiledPredicate,
    ctx: &RequestContext,
) -> Result<Decision, PolicyError> {
    let mut evaluator = Evaluator::new(ctx).with_trace(true);
    let truth = evaluator.evaluate(rule, predicate)?;
    Ok(decide(rule, RuleOrigin::Default, truth, evaluator))
}
