pub mod context;
pub mod decision;
pub mod enforcer;
pub mod eval;
pub mod trace;

pub use context::{ContextResolver, RawRequest, RequestContext};
pub use decision::{Decision, DecisionReason};
pub use enforcer::Enforcer;
pub use eval::{Evaluator, Truth, evaluate};
