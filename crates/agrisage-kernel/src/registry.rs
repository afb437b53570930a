//! Capability registry.
//!
//! The registry is the catalog of every tool an orchestration may use: its
//! [`ToolDescriptor`] (name, tags, keywords, dependencies, input schema) and
//! its [`ToolBinding`], which is either an executable [`ToolHandler`] or a
//! nested registry for delegated reasoning loops.
//!
//! A [`CapabilityRegistry`] is built once through [`RegistryBuilder`] and is
//! immutable afterwards.  Callers share it behind an [`Arc`]; there is no
//! global registry and no way to add a tool to a live snapshot.
//!
//! # Example
//!
//! ```rust
//! # use agrisage_kernel::{IntentTag, RegistryBuilder, ToolDescriptor, ToolOutput};
//! # use agrisage_kernel::registry::FnHandler;
//! let registry = RegistryBuilder::new()
//!     .register(
//!         ToolDescriptor::new("get_weather_data", "Weather forecast for a location")
//!             .with_tags([IntentTag::Weather])
//!             .with_keywords(["météo"]),
//!         FnHandler::new(|_args| Ok(ToolOutput::text("sunny"))),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registry.len(), 1);
//! assert!(registry.get("get_weather_data").is_some());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{KernelError, Result, ToolError};
use crate::tag::IntentTag;

// ---------------------------------------------------------------------------
// Tool descriptor
// ---------------------------------------------------------------------------

/// Static metadata describing a tool.
///
/// Descriptors are immutable once registered; the core only ever holds
/// `Arc<ToolDescriptor>` read references.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Unique tool name (e.g. `"diagnose_disease"`).
    pub name: String,

    /// Human-readable description shown to the completion provider.
    pub description: String,

    /// JSON Schema describing the tool's input object.
    pub input_schema: Value,

    /// Intents this tool serves.
    pub tags: BTreeSet<IntentTag>,

    /// Phrases that earn the tool a keyword bonus when they appear in the
    /// query text.
    pub keywords: Vec<String>,

    /// Tools that must accompany this one whenever it is selected.
    pub dependencies: Vec<String>,

    /// Whether this tool wraps another reasoning loop.
    pub delegatable: bool,

    /// Per-tool invocation budget.  `None` falls back to the caller's
    /// default.
    pub timeout: Option<Duration>,
}

impl ToolDescriptor {
    /// Create a descriptor with an open object schema and no tags.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object", "properties": {}}),
            tags: BTreeSet::new(),
            keywords: Vec::new(),
            dependencies: Vec::new(),
            delegatable: false,
            timeout: None,
        }
    }

    /// Builder: set the input JSON schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Builder: add capability tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = IntentTag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Builder: add keyword-bonus phrases.
    pub fn with_keywords<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Builder: add required companion tools.
    pub fn with_dependencies<S: Into<String>>(
        mut self,
        dependencies: impl IntoIterator<Item = S>,
    ) -> Self {
        for dep in dependencies {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    /// Builder: set a per-tool timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the tool serves the given intent.
    pub fn serves(&self, tag: IntentTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Names of required properties declared by the input schema.
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema["required"]
            .as_array()
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tool output and handler
// ---------------------------------------------------------------------------

/// What a tool hands back to the reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Free text.
    Text(String),
    /// A structured JSON payload.
    Structured(Value),
}

impl ToolOutput {
    /// Shorthand for [`ToolOutput::Text`].
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Render the output as text for prompts and logs.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// Executable side of a tool.
///
/// Domain tools (weather lookup, diagnosis, regulation checks…) implement
/// this trait.  The registry never inspects what a handler does; it only
/// enforces the time budget around the call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-validated arguments.
    async fn invoke(&self, tool: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolError>;
}

/// Adapter turning a synchronous closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Value) -> std::result::Result<ToolOutput, String> + Send + Sync,
{
    /// Wrap a closure.  An `Err(reason)` becomes [`ToolError::Execution`].
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> std::result::Result<ToolOutput, String> + Send + Sync,
{
    async fn invoke(&self, tool: &str, arguments: Value) -> std::result::Result<ToolOutput, ToolError> {
        (self.func)(arguments).map_err(|reason| ToolError::execution(tool, reason))
    }
}

/// How a registered tool is executed.
#[derive(Clone)]
pub enum ToolBinding {
    /// A plain handler invoked in-process.
    Handler(Arc<dyn ToolHandler>),
    /// A nested registry driven by a delegated reasoning loop.
    Delegate(Arc<CapabilityRegistry>),
}

impl fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::Delegate(scope) => f
                .debug_tuple("Delegate")
                .field(&scope.names().collect::<Vec<_>>())
                .finish(),
        }
    }
}

#[derive(Debug)]
struct RegisteredTool {
    descriptor: Arc<ToolDescriptor>,
    binding: ToolBinding,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects tools in declaration order and freezes them into a
/// [`CapabilityRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tools: Vec<RegisteredTool>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool backed by a handler.
    pub fn register(self, descriptor: ToolDescriptor, handler: impl ToolHandler + 'static) -> Self {
        self.register_shared(descriptor, Arc::new(handler))
    }

    /// Register a tool backed by a shared handler.
    pub fn register_shared(mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push(RegisteredTool {
            descriptor: Arc::new(descriptor),
            binding: ToolBinding::Handler(handler),
        });
        self
    }

    /// Register a delegatable tool whose work is carried out by a nested
    /// reasoning loop over `scope`.  The descriptor is marked delegatable.
    pub fn register_delegate(mut self, mut descriptor: ToolDescriptor, scope: CapabilityRegistry) -> Self {
        descriptor.delegatable = true;
        self.tools.push(RegisteredTool {
            descriptor: Arc::new(descriptor),
            binding: ToolBinding::Delegate(Arc::new(scope)),
        });
        self
    }

    /// Validate names and freeze the registry.
    pub fn build(self) -> Result<CapabilityRegistry> {
        let mut index = HashMap::with_capacity(self.tools.len());

        for (position, tool) in self.tools.iter().enumerate() {
            let name = &tool.descriptor.name;
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(KernelError::InvalidToolName {
                    name: name.clone(),
                    reason: "tool names must be non-empty and contain no whitespace".into(),
                });
            }
            if tool.descriptor.dependencies.iter().any(|dep| dep == name) {
                return Err(KernelError::SelfDependency { name: name.clone() });
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(KernelError::DuplicateTool { name: name.clone() });
            }
        }

        // Dangling dependencies are tolerated; the selector skips them.
        for tool in &self.tools {
            for dep in &tool.descriptor.dependencies {
                if !index.contains_key(dep) {
                    tracing::warn!(
                        tool = %tool.descriptor.name,
                        dependency = %dep,
                        "tool declares a dependency that is not registered"
                    );
                }
            }
        }

        tracing::debug!(tool_count = self.tools.len(), "capability registry built");

        Ok(CapabilityRegistry {
            tools: self.tools,
            index,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable snapshot of registered tools.
///
/// Iteration always follows declaration order, which the selector relies on
/// as its deterministic tie-break.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    /// A registry with no tools.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// All descriptors in declaration order.
    pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        self.tools.iter().map(|t| Arc::clone(&t.descriptor)).collect()
    }

    /// Iterate descriptors in declaration order without cloning the `Arc`s.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    /// Iterate tool names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str())
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.tools[i].descriptor))
    }

    /// Declaration position of a tool.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The nested registry of a delegatable tool.
    pub fn delegate_scope(&self, name: &str) -> Option<Arc<CapabilityRegistry>> {
        let tool = &self.tools[*self.index.get(name)?];
        match &tool.binding {
            ToolBinding::Delegate(scope) => Some(Arc::clone(scope)),
            ToolBinding::Handler(_) => None,
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry holds no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool under a time budget.
    ///
    /// The descriptor's own timeout, when set, takes precedence over
    /// `timeout`.  Delegatable tools are rejected with
    /// [`ToolError::DelegationScope`]; the executor drives those itself.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let Some(&position) = self.index.get(name) else {
            return Err(ToolError::UnknownTool { tool: name.to_string() });
        };
        let tool = &self.tools[position];

        let handler = match &tool.binding {
            ToolBinding::Handler(handler) => Arc::clone(handler),
            ToolBinding::Delegate(_) => {
                return Err(ToolError::DelegationScope { tool: name.to_string() });
            }
        };

        let budget = tool.descriptor.timeout.unwrap_or(timeout);
        tracing::debug!(tool = %name, timeout_ms = budget.as_millis() as u64, "invoking tool");

        match tokio::time::timeout(budget, handler.invoke(name, arguments)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool invocation failed");
                Err(e)
            }
            Err(_elapsed) => {
                tracing::warn!(tool = %name, timeout_ms = budget.as_millis() as u64, "tool invocation timed out");
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout: budget,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
