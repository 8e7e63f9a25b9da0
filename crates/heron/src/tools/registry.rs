use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::invocation::ToolInvocation;
use super::model_tool::ModelTool;
use crate::errors::ToolError;
use crate::models::source::SourceRef;
use crate::models::tool::Tool;

/// An invocation attempt that ended in failure. The failed record is
/// attached (when one was created) so the caller can keep it for
/// diagnosis even while the error propagates.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct InvocationFailure {
    pub invocation: Option<ToolInvocation>,
    pub error: ToolError,
}

/// Registration-time map from capability name to its descriptor and
/// execution body. Name collisions are rejected at registration; unknown
/// names are tolerated at invocation time per the caller's policy.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ModelTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ModelTool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names, sorted so prompt text stays reproducible
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Capability descriptors for native tool calling, restricted to
    /// `names` (all tools when `names` is empty), sorted by name.
    pub fn descriptors(&self, names: &[String]) -> Vec<Tool> {
        self.select(names)
            .iter()
            .map(|tool| tool.descriptor())
            .collect()
    }

    /// The deterministic tool description blocks embedded in prompts,
    /// restricted to `names` (all tools when `names` is empty), joined
    /// with `---` separators.
    pub fn descriptions_for_model(&self, names: &[String]) -> String {
        self.select(names)
            .iter()
            .map(|tool| tool.description_for_model())
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    fn select(&self, names: &[String]) -> Vec<Arc<dyn ModelTool>> {
        let selected = if names.is_empty() {
            self.names()
        } else {
            let mut selected: Vec<String> = names
                .iter()
                .filter(|name| self.contains(name))
                .cloned()
                .collect();
            selected.sort();
            selected
        };
        selected
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// Run one invocation through the protocol: validate the arguments
    /// against the capability's schema, then execute. Invalid arguments
    /// fail the invocation without ever executing the capability;
    /// execution errors fail it with the attempted arguments preserved.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        source: SourceRef,
    ) -> Result<ToolInvocation, InvocationFailure> {
        let Some(tool) = self.get(name) else {
            return Err(InvocationFailure {
                invocation: None,
                error: ToolError::NotFound(name.to_string()),
            });
        };

        let mut invocation = ToolInvocation::new(source, name, arguments);

        let schema = tool.arguments_schema();
        let validation_error = jsonschema::validate(&schema, &invocation.arguments)
            .err()
            .map(|error| error.to_string());
        if let Some(message) = validation_error {
            invocation.fail();
            return Err(InvocationFailure {
                invocation: Some(invocation),
                error: ToolError::SchemaValidation(message),
            });
        }

        debug!(tool = name, "executing tool invocation");
        match tool.execute(&invocation).await {
            Ok(result) => {
                invocation.complete(result);
                Ok(invocation)
            }
            Err(error) => {
                invocation.fail();
                Err(InvocationFailure {
                    invocation: Some(invocation),
                    error,
                })
            }
        }
    }
}
