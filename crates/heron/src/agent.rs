use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::Error;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::models::lifecycle::{Lifecycle, Status};
use crate::models::message::Message;
use crate::models::source::SourceRef;
use crate::models::tool::ToolCall;
use crate::parser::extract_tag;
use crate::prompt_template::render_prompt_file;
use crate::providers::base::Provider;
use crate::tools::{ToolInvocation, ToolRegistry};

const AGENT_SYSTEM_TEMPLATE: &str = "agent_system.md";

/// One model reply decomposed into the `<thought>/<action>/<answer>`
/// grammar. Extraction happens once, up front; malformed action JSON is
/// treated as no action rather than an error.
#[derive(Debug, Clone)]
pub struct AgentStep {
    thought: Option<String>,
    action: Option<String>,
    tool_call: Option<ToolCall>,
    answer: Option<String>,
}

impl AgentStep {
    pub fn new(model_response_text: &str) -> Self {
        let action = extract_tag(model_response_text, "action");
        let tool_call = action.as_deref().and_then(parse_action);
        Self {
            thought: extract_tag(model_response_text, "thought"),
            action,
            tool_call,
            answer: extract_tag(model_response_text, "answer"),
        }
    }

    pub fn thought(&self) -> Option<&str> {
        self.thought.as_deref()
    }

    /// The raw `<action>` region, whether or not it decoded
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// The decoded action, when it was a JSON object with `tool` and
    /// `arguments` keys
    pub fn tool_call(&self) -> Option<&ToolCall> {
        self.tool_call.as_ref()
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }
}

fn parse_action(action: &str) -> Option<ToolCall> {
    let value: Value = match serde_json::from_str(action) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "malformed action JSON treated as no action");
            return None;
        }
    };
    let tool = value.get("tool")?.as_str()?.to_string();
    let arguments = value.get("arguments")?.clone();
    Some(ToolCall::new(tool, arguments))
}

/// How an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    /// The model produced a final answer
    Answered,
    /// The iteration budget ran out before an answer; terminal but not a
    /// failure of any single step
    IterationLimitReached,
    /// An orchestration-level error aborted the run
    Failed,
}

/// An iterative ReAct run: the model reasons in `<thought>` blocks,
/// requests tools through `<action>` blocks, receives `<observation>`
/// turns back, and halts with an `<answer>` or when the iteration budget
/// is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub creator: SourceRef,
    /// The user request the run is working on
    pub task: String,
    /// Names of tools the model may invoke; empty means every registered
    /// tool
    pub available_tools: Vec<String>,
    /// Append-only history including intermediate thought/action/
    /// observation segments
    pub history: Vec<Message>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub final_answer: Option<String>,
    pub lifecycle: Lifecycle,
    pub outcome: Option<AgentOutcome>,
    pub completions: Vec<CompletionResult>,
    pub tool_invocations: Vec<ToolInvocation>,
    pub model: Option<String>,
}

impl AgentRun {
    pub fn new<S: Into<String>>(creator: SourceRef, task: S, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator,
            task: task.into(),
            available_tools: Vec::new(),
            history: Vec::new(),
            iteration_count: 0,
            max_iterations,
            final_answer: None,
            lifecycle: Lifecycle::new(),
            outcome: None,
            completions: Vec::new(),
            tool_invocations: Vec::new(),
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn status(&self) -> Status {
        self.lifecycle.status()
    }

    /// Drive the loop until a final answer or the iteration budget.
    /// Returns the answer, or None when the budget ran out; the two
    /// terminal shapes are distinguished by [`AgentRun::outcome`].
    /// Tool-level failures become observations and the loop continues;
    /// only orchestration-level failures (e.g. a provider hard failure)
    /// abort the run.
    pub async fn run(
        &mut self,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        config: &Config,
    ) -> Result<Option<String>, Error> {
        self.lifecycle.start();
        if self.history.is_empty() {
            let task = self.task.clone();
            self.history.push(Message::user().with_text(task));
        }

        let system_prompt = self.system_prompt(registry)?;

        match self
            .iterate(provider, registry, &system_prompt, config)
            .await
        {
            Ok(Some(answer)) => {
                self.final_answer = Some(answer.clone());
                self.outcome = Some(AgentOutcome::Answered);
                self.lifecycle.complete();
                Ok(Some(answer))
            }
            Ok(None) => {
                debug!(run = %self.id, "iteration budget exhausted without an answer");
                self.outcome = Some(AgentOutcome::IterationLimitReached);
                self.lifecycle.complete();
                Ok(None)
            }
            Err(e) => {
                error!(run = %self.id, error = %e, "agent run failed");
                self.outcome = Some(AgentOutcome::Failed);
                self.lifecycle.fail();
                Err(e)
            }
        }
    }

    async fn iterate(
        &mut self,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        system_prompt: &str,
        config: &Config,
    ) -> Result<Option<String>, Error> {
        while self.iteration_count < self.max_iterations {
            self.iteration_count += 1;
            debug!(run = %self.id, iteration = self.iteration_count, "running agent iteration");

            let model = self
                .model
                .clone()
                .unwrap_or_else(|| config.default_model.clone());
            let request =
                CompletionRequest::new(model, self.history.clone(), SourceRef::agent_run(self.id))
                    .with_system_prompt(system_prompt)
                    .with_temperature(config.temperature);

            let completion = provider.complete(&request).await?;
            let step = AgentStep::new(&completion.raw_response);
            self.completions.push(completion);

            if let Some(thought) = step.thought() {
                self.history
                    .push(Message::assistant().with_text(format!("<thought>{}</thought>", thought)));
            }

            if let Some(answer) = step.answer() {
                self.history
                    .push(Message::assistant().with_text(format!("<answer>{}</answer>", answer)));
                return Ok(Some(answer.to_string()));
            }

            let observation = match step.tool_call() {
                Some(call) if self.tool_allowed(registry, &call.name) => {
                    self.history.push(
                        Message::assistant()
                            .with_text(format!("<action>{}</action>", step.action().unwrap_or_default())),
                    );
                    self.execute_action(registry, call.clone()).await
                }
                Some(call) => {
                    format!(
                        "Error: Tool '{}' not found. Available tools: {}",
                        call.name,
                        self.tool_names(registry).join(", ")
                    )
                }
                None => "Error: No valid action specified. Please provide a valid action with \
                         'tool' and 'arguments' keys."
                    .to_string(),
            };

            self.history
                .push(Message::user().with_text(format!("<observation>{}</observation>", observation)));
        }

        Ok(None)
    }

    /// Execute one action through the invocation protocol, converting any
    /// failure into observation text so the model can recover.
    async fn execute_action(&mut self, registry: &ToolRegistry, call: ToolCall) -> String {
        match registry
            .invoke(&call.name, call.arguments, SourceRef::agent_run(self.id))
            .await
        {
            Ok(invocation) => {
                let observation = format!(
                    "Tool executed successfully: {}",
                    invocation.observation_message().unwrap_or_default()
                );
                self.tool_invocations.push(invocation);
                observation
            }
            Err(failure) => {
                if let Some(invocation) = failure.invocation {
                    self.tool_invocations.push(invocation);
                }
                format!("Error: {}", failure.error)
            }
        }
    }

    fn tool_allowed(&self, registry: &ToolRegistry, name: &str) -> bool {
        let allowed = self.available_tools.is_empty()
            || self.available_tools.iter().any(|tool| tool == name);
        allowed && registry.contains(name)
    }

    fn tool_names(&self, registry: &ToolRegistry) -> Vec<String> {
        if self.available_tools.is_empty() {
            registry.names()
        } else {
            let mut names: Vec<String> = self
                .available_tools
                .iter()
                .filter(|name| registry.contains(name))
                .cloned()
                .collect();
            names.sort();
            names
        }
    }

    fn system_prompt(&self, registry: &ToolRegistry) -> Result<String, Error> {
        let mut context = HashMap::new();
        context.insert(
            "tool_descriptions".to_string(),
            registry.descriptions_for_model(&self.available_tools),
        );
        render_prompt_file(AGENT_SYSTEM_TEMPLATE, &context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, ToolResult};
    use crate::providers::mock::{MockProvider, MockResponse};
    use crate::tools::ModelTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct SearchTool;

    #[async_trait]
    impl ModelTool for SearchTool {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "Searches for a query"
        }

        fn arguments_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"q": {"type": "string"}},
                "required": ["q"]
            })
        }

        fn example_invocation(&self) -> Value {
            json!({"tool": "search", "arguments": {"q": "herons"}})
        }

        async fn execute(&self, invocation: &ToolInvocation) -> ToolResult<Value> {
            Ok(json!({"hits": [invocation.arguments["q"]]}))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SearchTool)).unwrap();
        registry
    }

    fn run(max_iterations: u32) -> AgentRun {
        AgentRun::new(
            SourceRef::user(Uuid::new_v4()),
            "What do herons eat?",
            max_iterations,
        )
    }

    #[tokio::test]
    async fn test_immediate_answer() {
        let provider = MockProvider::new(vec![MockResponse::text(
            "<thought>I know this.</thought><answer>Mostly fish.</answer>",
        )]);
        let registry = registry();
        let mut agent = run(10);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("Mostly fish."));
        assert_eq!(agent.final_answer.as_deref(), Some("Mostly fish."));
        assert_eq!(agent.outcome, Some(AgentOutcome::Answered));
        assert_eq!(agent.status(), Status::Completed);
        assert_eq!(agent.iteration_count, 1);

        let texts: Vec<String> = agent.history.iter().map(|m| m.text()).collect();
        assert_eq!(
            texts,
            vec![
                "What do herons eat?",
                "<thought>I know this.</thought>",
                "<answer>Mostly fish.</answer>",
            ]
        );
    }

    #[tokio::test]
    async fn test_action_then_answer() {
        let provider = MockProvider::new(vec![
            MockResponse::text(
                "<thought>I should search.</thought>\
                 <action>{\"tool\": \"search\", \"arguments\": {\"q\": \"heron diet\"}}</action>",
            ),
            MockResponse::text("<answer>Fish, frogs, and insects.</answer>"),
        ]);
        let registry = registry();
        let mut agent = run(10);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("Fish, frogs, and insects."));
        assert_eq!(agent.iteration_count, 2);
        assert_eq!(agent.tool_invocations.len(), 1);
        assert!(agent.tool_invocations[0].completed_at.is_some());

        let texts: Vec<String> = agent.history.iter().map(|m| m.text()).collect();
        assert!(texts[2].starts_with("<action>"));
        assert!(texts[3].starts_with("<observation>Tool executed successfully:"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation_and_run_continues() {
        let provider = MockProvider::new(vec![
            MockResponse::text(
                "<action>{\"tool\": \"teleport\", \"arguments\": {}}</action>",
            ),
            MockResponse::text("<answer>Done without teleporting.</answer>"),
        ]);
        let registry = registry();
        let mut agent = run(10);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("Done without teleporting."));
        assert_eq!(agent.iteration_count, 2);

        let observation = agent.history.iter().find(|m| m.text().contains("not found"));
        assert!(observation
            .unwrap()
            .text()
            .contains("Error: Tool 'teleport' not found. Available tools: search"));
    }

    #[tokio::test]
    async fn test_malformed_action_is_no_action() {
        let provider = MockProvider::new(vec![
            MockResponse::text("<action>{broken json</action>"),
            MockResponse::text("<answer>Recovered.</answer>"),
        ]);
        let registry = registry();
        let mut agent = run(10);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("Recovered."));
        let texts: Vec<String> = agent.history.iter().map(|m| m.text()).collect();
        assert!(texts
            .iter()
            .any(|t| t.contains("No valid action specified")));
    }

    #[tokio::test]
    async fn test_iteration_budget_exhaustion() {
        let provider = MockProvider::new(vec![
            MockResponse::text("<thought>hmm</thought>"),
            MockResponse::text("<thought>still thinking</thought>"),
        ]);
        let registry = registry();
        let mut agent = run(2);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer, None);
        assert_eq!(agent.outcome, Some(AgentOutcome::IterationLimitReached));
        assert_eq!(agent.iteration_count, 2);
        assert!(agent.iteration_count <= agent.max_iterations);
        assert!(agent.final_answer.is_none());
        assert!(agent.lifecycle.terminal());
    }

    #[tokio::test]
    async fn test_tool_execution_error_becomes_observation() {
        struct FailingTool;

        #[async_trait]
        impl ModelTool for FailingTool {
            fn name(&self) -> &str {
                "flaky"
            }

            fn description(&self) -> &str {
                "Fails every time"
            }

            fn arguments_schema(&self) -> Value {
                json!({"type": "object"})
            }

            fn example_invocation(&self) -> Value {
                json!({"tool": "flaky", "arguments": {}})
            }

            async fn execute(&self, _invocation: &ToolInvocation) -> ToolResult<Value> {
                Err(crate::errors::ToolError::Execution("boom".to_string()))
            }
        }

        let provider = MockProvider::new(vec![
            MockResponse::text("<action>{\"tool\": \"flaky\", \"arguments\": {}}</action>"),
            MockResponse::text("<answer>Gave up on the tool.</answer>"),
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool)).unwrap();
        let mut agent = run(10);

        let answer = agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("Gave up on the tool."));
        assert_eq!(agent.tool_invocations.len(), 1);
        assert!(agent.tool_invocations[0].failed_at.is_some());
        assert!(agent
            .history
            .iter()
            .any(|m| m.text().contains("Error: tool execution failed: boom")));
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_run() {
        let provider = MockProvider::failing(ProviderError::other("hard down", false));
        let registry = registry();
        let mut agent = run(10);

        let result = agent.run(&provider, &registry, &Config::default()).await;

        assert!(result.is_err());
        assert_eq!(agent.status(), Status::Failed);
        assert_eq!(agent.outcome, Some(AgentOutcome::Failed));
    }

    #[tokio::test]
    async fn test_system_prompt_lists_tool_descriptions() {
        let provider = MockProvider::new(vec![MockResponse::text("<answer>ok</answer>")]);
        let registry = registry();
        let mut agent = run(10);

        agent
            .run(&provider, &registry, &Config::default())
            .await
            .unwrap();

        let requests = provider.requests();
        let system_prompt = requests[0].system_prompt.as_ref().unwrap();
        assert!(system_prompt.contains("ReAct"));
        assert!(system_prompt.contains("Name: search"));
        assert!(system_prompt.contains("<answer>"));
    }
}
