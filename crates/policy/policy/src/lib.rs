pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod registry;

pub use compile::{CompiledPredicate, GRAMMAR_VERSION, MAX_NESTING, PredicateCache, compile};
pub use config::EnforcerConfig;
pub use engine::context::{
    ContextSchema, Credential, CredentialSource, PathRequirement, ResourceStore, TokenScope,
};
pub use engine::eval::RuleLookup;
pub use engine::trace::{AtomOutcome, AtomTrace};
pub use engine::{
    ContextResolver, Decision, DecisionReason, Enforcer, Evaluator, RawRequest, RequestContext,
    Truth, evaluate,
};
pub use error::{ParseError, PolicyError};
pub use frontend::PolicyFrontend;
pub use ir::expr::{CheckExpr, Operand};
pub use ir::rule::{
    DeprecatedRuleLink, Operation, OverrideRule, RuleDefinition, RuleSource, ScopeType,
};
pub use registry::{EffectiveRule, ResolutionOptions, RuleOrigin, RuleRegistry};
