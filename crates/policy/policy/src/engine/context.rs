use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PolicyError;
use crate::ir::rule::ScopeType;

/// The scope a token was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// System scope, e.g. `all`.
    System {
        /// The system scope value.
        scope: String,
    },
    /// Project scope.
    Project {
        /// Project ID.
        id: String,
        /// ID of the domain owning the project.
        domain_id: String,
    },
    /// Domain scope.
    Domain {
        /// Domain ID.
        id: String,
    },
    /// No scope.
    #[default]
    Unscoped,
}

impl TokenScope {
    /// The scope type, or `None` for unscoped tokens.
    pub fn scope_type(&self) -> Option<ScopeType> {
        match self {
            Self::System { .. } => Some(ScopeType::System),
            Self::Project { .. } => Some(ScopeType::Project),
            Self::Domain { .. } => Some(ScopeType::Domain),
            Self::Unscoped => None,
        }
    }
}

/// The authenticated caller as seen by the policy engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Credential {
    /// ID of the user the token was issued to.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Role names held on the token's scope.
    #[serde(default)]
    pub roles: HashSet<String>,
    /// Token scope.
    #[serde(default)]
    pub scope: TokenScope,
    /// Additional token-bound attributes, published under `token.`.
    #[serde(default)]
    pub attributes: Value,
}

impl Credential {
    /// An unscoped credential with no roles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the user ID.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Set the token scope.
    #[must_use]
    pub fn with_scope(mut self, scope: TokenScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the token-bound attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Yields the credential of the current caller.
///
/// Token validation happens outside this crate; implementors hand over the
/// already validated result.
pub trait CredentialSource {
    /// Return the caller's credential.
    fn credential(&self) -> Result<Cow<'_, Credential>, PolicyError>;
}

impl CredentialSource for Credential {
    fn credential(&self) -> Result<Cow<'_, Credential>, PolicyError> {
        Ok(Cow::Borrowed(self))
    }
}

/// On-demand lookup of target attributes that were not supplied with the
/// request.
///
/// The store is only consulted for `target.*` paths and receives the full
/// dotted path.
pub trait ResourceStore: Send + Sync + fmt::Debug {
    /// Return the attribute at `path`, or `None` if the resource has none.
    fn lookup(&self, path: &str) -> Result<Option<String>, PolicyError>;
}

/// A request as handed to the decision API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequest {
    /// The caller.
    #[serde(default)]
    pub credential: Credential,
    /// Attributes of the resource being acted on, published under `target.`.
    #[serde(default)]
    pub target: Value,
}

impl RawRequest {
    /// Build a request from a credential and target attributes.
    pub fn new(credential: Credential, target: Value) -> Self {
        Self { credential, target }
    }
}

/// The flattened, per-request view the evaluator reads from.
pub struct RequestContext {
    values: HashMap<String, String>,
    roles: HashSet<String>,
    scope: TokenScope,
    store: Option<Arc<dyn ResourceStore>>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("values", &self.values)
            .field("roles", &self.roles)
            .field("scope", &self.scope)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl RequestContext {
    /// An empty context for the given scope.
    pub fn new(scope: TokenScope) -> Self {
        Self {
            values: HashMap::new(),
            roles: HashSet::new(),
            scope,
            store: None,
        }
    }

    /// Add a role.
    #[must_use]
    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_lowercase());
        self
    }

    /// Set the value at a dotted path.
    #[must_use]
    pub fn with_value(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }

    /// Attach a resource store for `target.*` paths missing from the request.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Look up the value at `path`.
    ///
    /// Absent paths are `Ok(None)`. Errors only come from the resource store;
    /// the evaluator treats them as undecided, never as false.
    pub fn get(&self, path: &str) -> Result<Option<Cow<'_, str>>, PolicyError> {
        if let Some(value) = self.values.get(path) {
            return Ok(Some(Cow::Borrowed(value.as_str())));
        }
        match &self.store {
            Some(store) if path.starts_with("target.") => {
                Ok(store.lookup(path)?.map(Cow::Owned))
            }
            _ => Ok(None),
        }
    }

    /// Case-insensitive role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(&role.to_lowercase())
    }

    /// The system scope value, if the token is system scoped.
    pub fn system_scope(&self) -> Option<&str> {
        match &self.scope {
            TokenScope::System { scope } => Some(scope),
            _ => None,
        }
    }

    /// The token scope.
    pub fn scope(&self) -> &TokenScope {
        &self.scope
    }

    /// The token's scope type, `None` when unscoped.
    pub fn scope_type(&self) -> Option<ScopeType> {
        self.scope.scope_type()
    }

    /// Number of flattened values (store lookups excluded).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no values were flattened.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builds a [`RequestContext`] from a raw request.
#[derive(Debug, Default, Clone)]
pub struct ContextResolver {
    store: Option<Arc<dyn ResourceStore>>,
}

impl ContextResolver {
    /// A resolver with no resource store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a resource store to every context this resolver builds.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve a raw request.
    pub fn resolve(&self, raw: &RawRequest) -> Result<RequestContext, PolicyError> {
        self.resolve_parts(&raw.credential, &raw.target)
    }

    /// Resolve a request from its credential source and target attributes.
    ///
    /// Fails with [`PolicyError::Context`] when the token attributes or the
    /// target are neither a JSON object nor null.
    pub fn resolve_parts(
        &self,
        source: &dyn CredentialSource,
        target: &Value,
    ) -> Result<RequestContext, PolicyError> {
        let credential = source.credential()?;
        let mut values = HashMap::new();

        flatten_root("token", &credential.attributes, &mut values)?;
        match &credential.scope {
            TokenScope::System { scope } => {
                values.insert("token.system".to_owned(), scope.clone());
            }
            TokenScope::Project { id, domain_id } => {
                values.insert("token.project.id".to_owned(), id.clone());
                values.insert("token.project.domain.id".to_owned(), domain_id.clone());
            }
            TokenScope::Domain { id } => {
                values.insert("token.domain.id".to_owned(), id.clone());
            }
            TokenScope::Unscoped => {}
        }
        if let Some(user_id) = &credential.user_id {
            values.insert("token.user.id".to_owned(), user_id.clone());
        }
        flatten_root("target", target, &mut values)?;

        Ok(RequestContext {
            values,
            roles: credential.roles.iter().map(|r| r.to_lowercase()).collect(),
            scope: credential.scope.clone(),
            store: self.store.clone(),
        })
    }
}

fn flatten_root(
    root: &str,
    value: &Value,
    out: &mut HashMap<String, String>,
) -> Result<(), PolicyError> {
    match value {
        Value::Null => Ok(()),
        Value::Object(_) => {
            flatten(root, value, out);
            Ok(())
        }
        other => Err(PolicyError::Context(format!(
            "'{root}' attributes must be an object, got {}",
            json_type(other)
        ))),
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{prefix}.{key}"), nested, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_owned(), s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix.to_owned(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_owned(), b.to_string());
        }
        // Not addressable by a dotted path.
        Value::Null | Value::Array(_) => {}
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a registered context path must be present at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRequirement {
    /// A missing value is reported in logs and traces.
    Required,
    /// A missing value silently evaluates to false.
    Optional,
}

/// The set of context paths rules are allowed to reference.
///
/// Whatever the requirement, an atom over a missing path is false, so
/// `not target.project.locked:true` holds when the request does not carry
/// the attribute. A resource store error is different: it leaves the atom
/// undecided and the request is denied.
///
/// # Example
///
/// ```toml
/// [context]
/// required = ["target.domain.id"]
/// optional = ["token.project.domain.id", "token.domain.id"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSchema {
    /// Paths every request must carry.
    #[serde(default)]
    pub required: Vec<String>,
    /// Paths that may be absent.
    #[serde(default)]
    pub optional: Vec<String>,
}

impl ContextSchema {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a required path.
    #[must_use]
    pub fn with_required(mut self, path: impl Into<String>) -> Self {
        self.required.push(path.into());
        self
    }

    /// Register an optional path.
    #[must_use]
    pub fn with_optional(mut self, path: impl Into<String>) -> Self {
        self.optional.push(path.into());
        self
    }

    /// How `path` is registered, if at all. `required` wins over `optional`.
    pub fn requirement(&self, path: &str) -> Option<PathRequirement> {
        if self.required.iter().any(|p| p == path) {
            Some(PathRequirement::Required)
        } else if self.optional.iter().any(|p| p == path) {
            Some(PathRequirement::Optional)
        } else {
            None
        }
    }
}
