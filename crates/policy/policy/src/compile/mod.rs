pub mod cache;
pub mod parser;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::ir::expr::CheckExpr;

pub use cache::{CacheStats, PredicateCache};
pub use parser::{MAX_NESTING, parse_check_str};

/// Version of the check-string grammar the compiler emits.
///
/// The evaluator refuses predicates tagged with any other version.
pub const GRAMMAR_VERSION: u32 = 1;

/// A check string compiled into its predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPredicate {
    source: String,
    expr: CheckExpr,
    grammar_version: u32,
}

impl CompiledPredicate {
    /// The check string this predicate was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The predicate tree.
    pub fn expr(&self) -> &CheckExpr {
        &self.expr
    }

    /// Grammar version the predicate was compiled with.
    pub fn grammar_version(&self) -> u32 {
        self.grammar_version
    }
}

/// Compile a check string. Pure: the same input always yields the same tree.
pub fn compile(check_str: &str) -> Result<CompiledPredicate, ParseError> {
    let expr = parse_check_str(check_str)?;
    Ok(CompiledPredicate {
        source: check_str.to_owned(),
        expr,
        grammar_version: GRAMMAR_VERSION,
    })
}
