use async_trait::async_trait;
use serde_json::Value;

use super::invocation::ToolInvocation;
use crate::errors::ToolResult;
use crate::models::tool::Tool;

/// A named, schema-described capability the model may request be executed.
///
/// Implementations are stateless descriptors plus an execution body; many
/// work units reference the same capability by name through the registry.
#[async_trait]
pub trait ModelTool: Send + Sync {
    /// The name of the tool as it is exposed to the model
    fn name(&self) -> &str;

    /// The description of the tool provided to the model
    fn description(&self) -> &str;

    /// JSON Schema the argument payload must satisfy before execution
    fn arguments_schema(&self) -> Value;

    /// One example invocation, shown to the model alongside the schema
    fn example_invocation(&self) -> Value;

    /// Whether a successful invocation should trigger a follow-up
    /// round-trip so the model can react to the observation
    fn triggers_observation(&self) -> bool {
        false
    }

    /// Execute the capability. Arguments have already been validated
    /// against `arguments_schema` when this is called.
    async fn execute(&self, invocation: &ToolInvocation) -> ToolResult<Value>;

    /// The capability descriptor sent to providers for native tool calling
    fn descriptor(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.arguments_schema())
    }

    /// The textual description embedded in prompts. This text is part of
    /// the prompt contract, so it is generated deterministically from the
    /// name, description, pretty-printed schema, and example invocation.
    fn description_for_model(&self) -> String {
        let schema = serde_json::to_string_pretty(&self.arguments_schema())
            .unwrap_or_else(|_| "{}".to_string());
        let example = serde_json::to_string_pretty(&self.example_invocation())
            .unwrap_or_else(|_| "{}".to_string());

        format!(
            "Name: {}\nDescription: {}\nArguments Schema:\n{}\nExample Usage:\n{}",
            self.name(),
            self.description(),
            schema,
            example,
        )
    }
}
