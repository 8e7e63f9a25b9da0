use serde::{Deserialize, Serialize};

/// Library-level defaults shared by the work units. Provider credentials
/// live on the per-provider configs, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model used when a work unit does not name one explicitly
    pub default_model: String,
    /// Opening section of every system prompt
    pub base_system_prompt: String,
    /// Iteration budget for agent runs
    pub max_agent_iterations: u32,
    /// Default temperature for conversation and agent completions
    pub temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o".to_string(),
            base_system_prompt: "You are a friendly assistant.".to_string(),
            max_agent_iterations: 10,
            temperature: 0.7,
        }
    }
}
