//! Compiled tool input schemas.
//!
//! Every descriptor's `input_schema` is compiled once, when the loop is
//! built, for the registry and recursively for every delegation scope.
//! Tool-call arguments are then checked against the compiled validator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use agrisage_kernel::CapabilityRegistry;

use crate::error::{AgentError, Result};

/// Validators for one registry and, per delegatable tool, its sub-registry.
pub struct ArgumentSchemas {
    tools: HashMap<String, JSONSchema>,
    scopes: HashMap<String, Arc<ArgumentSchemas>>,
}

impl ArgumentSchemas {
    /// Compile the input schema of every tool in `registry`.
    ///
    /// Fails with [`AgentError::Config`] on the first schema that does not
    /// compile.
    pub fn compile(registry: &CapabilityRegistry) -> Result<Self> {
        let mut tools = HashMap::with_capacity(registry.len());
        let mut scopes = HashMap::new();

        for descriptor in registry.descriptors() {
            let compiled = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&descriptor.input_schema)
                .map_err(|e| AgentError::Config {
                    reason: format!("input schema of tool `{}` does not compile: {e}", descriptor.name),
                })?;
            tools.insert(descriptor.name.clone(), compiled);

            if let Some(scope) = registry.delegate_scope(&descriptor.name) {
                scopes.insert(descriptor.name.clone(), Arc::new(Self::compile(&scope)?));
            }
        }

        Ok(Self { tools, scopes })
    }

    /// Check `arguments` against the schema of `tool`.
    ///
    /// Returns every violation, joined, as the error.  Tools without a
    /// compiled schema accept anything.
    pub fn check(&self, tool: &str, arguments: &Value) -> std::result::Result<(), String> {
        let Some(schema) = self.tools.get(tool) else {
            return Ok(());
        };

        schema.validate(arguments).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("`{path}`: {e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
    }

    /// Validators of the sub-registry bound to `agent`.
    pub fn scope(&self, agent: &str) -> Option<Arc<ArgumentSchemas>> {
        self.scopes.get(agent).cloned()
    }
}

impl fmt::Debug for ArgumentSchemas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentSchemas")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .finish()
    }
}
