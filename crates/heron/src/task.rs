use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::Error;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::models::content::{FileContent, ImageContent};
use crate::models::lifecycle::{Lifecycle, Status};
use crate::models::message::Message;
use crate::models::source::SourceRef;
use crate::parser::{ResponseFormat, Sanitizer};
use crate::providers::base::Provider;
use crate::tools::{ToolInvocation, ToolRegistry};

/// The application-defined half of a task: what to ask and how to
/// interpret the reply. Implementations carry their own inputs and render
/// them into the prompt.
pub trait TaskDefinition: Send + Sync {
    fn build_prompt(&self) -> String;

    fn response_format(&self) -> ResponseFormat {
        ResponseFormat::Text
    }

    /// Declared schema for structured JSON replies
    fn json_response_schema(&self) -> Option<Value> {
        None
    }

    fn temperature(&self) -> f32 {
        0.7
    }

    /// Override the HTML allow-list for this task's replies
    fn sanitizer(&self) -> Option<Sanitizer> {
        None
    }
}

/// Per-run arguments for [`Task::run`].
#[derive(Debug, Clone)]
pub struct TaskArgs {
    pub creator: SourceRef,
    /// Explicitly requested reply language; takes precedence over the
    /// creator's stored preference
    pub language: Option<String>,
    /// The creator's stored language preference, if any
    pub creator_language: Option<String>,
    pub model: Option<String>,
    /// Names of the tools the model may invoke from this task
    pub tools: Vec<String>,
    pub images: Vec<ImageContent>,
    pub files: Vec<FileContent>,
}

impl TaskArgs {
    pub fn new(creator: SourceRef) -> Self {
        Self {
            creator,
            language: None,
            creator_language: None,
            model: None,
            tools: Vec::new(),
            images: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_creator_language<S: Into<String>>(mut self, language: S) -> Self {
        self.creator_language = Some(language.into());
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_image<S: Into<String>, T: Into<String>>(mut self, data: S, mime_type: T) -> Self {
        self.images.push(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        });
        self
    }

    pub fn with_file<S: Into<String>, T: Into<String>, U: Into<String>>(
        mut self,
        data: S,
        mime_type: T,
        filename: U,
    ) -> Self {
        self.files.push(FileContent {
            data: data.into(),
            mime_type: mime_type.into(),
            filename: filename.into(),
        });
        self
    }
}

/// A one-shot unit of work: one prompt, one completion, and any tool
/// invocations named in a structured reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub creator: SourceRef,
    pub prompt: String,
    pub system_prompt: String,
    pub requested_language: Option<String>,
    pub response_format: ResponseFormat,
    pub available_tools: Vec<String>,
    pub lifecycle: Lifecycle,
    pub completion: Option<CompletionResult>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Task {
    /// The primary interface for running a task. Issues one completion for
    /// the definition's prompt, stores the result, and invokes any tools a
    /// structured reply names. Failures are terminal and observable via
    /// [`Task::status`]; they are logged rather than propagated.
    pub async fn run(
        definition: &dyn TaskDefinition,
        args: TaskArgs,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        config: &Config,
    ) -> Task {
        let requested_language = args
            .language
            .clone()
            .or_else(|| args.creator_language.clone());

        let mut task = Task {
            id: Uuid::new_v4(),
            creator: args.creator,
            prompt: definition.build_prompt().trim().to_string(),
            system_prompt: build_system_prompt(config, requested_language.as_deref()),
            requested_language,
            response_format: definition.response_format(),
            available_tools: args.tools.clone(),
            lifecycle: Lifecycle::new(),
            completion: None,
            tool_invocations: Vec::new(),
        };
        task.lifecycle.start();

        match task
            .execute(definition, &args, provider, registry, config)
            .await
        {
            Ok(()) => task.lifecycle.complete(),
            Err(e) => {
                error!(task = %task.id, error = %e, "task run failed");
                task.lifecycle.fail();
            }
        }

        task
    }

    pub fn status(&self) -> Status {
        self.lifecycle.status()
    }

    async fn execute(
        &mut self,
        definition: &dyn TaskDefinition,
        args: &TaskArgs,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        config: &Config,
    ) -> Result<(), Error> {
        let mut message = Message::user().with_text(self.prompt.as_str());
        for image in &args.images {
            message = message.with_image(image.data.clone(), image.mime_type.clone());
        }
        for file in &args.files {
            message = message.with_file(
                file.data.clone(),
                file.mime_type.clone(),
                file.filename.clone(),
            );
        }

        let model = args
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());

        let mut request = CompletionRequest::new(model, vec![message], SourceRef::task(self.id))
            .with_system_prompt(self.system_prompt.clone())
            .with_response_format(self.response_format)
            .with_temperature(definition.temperature());
        if let Some(schema) = definition.json_response_schema() {
            request = request.with_json_schema(schema);
        }
        if let Some(sanitizer) = definition.sanitizer() {
            request = request.with_sanitizer(sanitizer);
        }

        let completion = provider.complete(&request).await?;
        self.completion = Some(completion);

        self.process_tool_invocations(registry).await
    }

    /// Scan a structured JSON reply for an embedded `tools` array and
    /// invoke each named tool sequentially in array order. Names outside
    /// the task's available list, or unknown to the registry, are skipped.
    async fn process_tool_invocations(&mut self, registry: &ToolRegistry) -> Result<(), Error> {
        if self.response_format != ResponseFormat::Json {
            return Ok(());
        }

        let tool_calls: Vec<(String, Value)> = {
            let Some(completion) = &self.completion else {
                return Ok(());
            };
            let parsed = completion.parsed_response()?;
            let Some(tools) = parsed
                .as_json()
                .and_then(|value| value.get("tools"))
                .and_then(|tools| tools.as_array())
            else {
                return Ok(());
            };

            tools
                .iter()
                .filter_map(|call| {
                    let name = call.get("name")?.as_str()?.to_string();
                    let arguments = call
                        .get("arguments")
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default()));
                    Some((name, arguments))
                })
                .collect()
        };

        for (name, arguments) in tool_calls {
            let allowed =
                self.available_tools.is_empty() || self.available_tools.contains(&name);
            if !allowed || !registry.contains(&name) {
                debug!(tool = %name, "skipping unknown tool named in response");
                continue;
            }

            match registry
                .invoke(&name, arguments, SourceRef::task(self.id))
                .await
            {
                Ok(invocation) => self.tool_invocations.push(invocation),
                Err(failure) => {
                    if let Some(invocation) = failure.invocation {
                        self.tool_invocations.push(invocation);
                    }
                    return Err(failure.error.into());
                }
            }
        }

        Ok(())
    }
}

fn build_system_prompt(config: &Config, language: Option<&str>) -> String {
    let mut system_prompt = config.base_system_prompt.clone();
    if let Some(language) = language {
        system_prompt.push_str(&format!(
            "\nYou're collaborating with a teammate who speaks {}. Please respond in {}.",
            language, language
        ));
    }
    system_prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolResult;
    use crate::providers::mock::{MockProvider, MockResponse};
    use crate::tools::ModelTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct JokeTask;

    impl TaskDefinition for JokeTask {
        fn build_prompt(&self) -> String {
            "Tell me a joke".to_string()
        }

        fn response_format(&self) -> ResponseFormat {
            ResponseFormat::Json
        }

        fn json_response_schema(&self) -> Option<Value> {
            Some(json!({
                "type": "object",
                "properties": {
                    "joke": {"type": "string"},
                    "answer": {"type": "string"}
                }
            }))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl ModelTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input"
        }

        fn arguments_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        fn example_invocation(&self) -> Value {
            json!({"name": "echo", "arguments": {"message": "hi"}})
        }

        async fn execute(&self, invocation: &ToolInvocation) -> ToolResult<Value> {
            Ok(invocation.arguments.clone())
        }
    }

    fn creator() -> SourceRef {
        SourceRef::user(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_run_parses_fenced_json_reply() {
        let provider = MockProvider::new(vec![MockResponse::text(
            "```json\n{\"joke\":\"x\",\"answer\":\"R\"}\n```",
        )]);
        let registry = ToolRegistry::new();

        let task = Task::run(
            &JokeTask,
            TaskArgs::new(creator()),
            &provider,
            &registry,
            &Config::default(),
        )
        .await;

        assert_eq!(task.status(), Status::Completed);
        let completion = task.completion.as_ref().unwrap();
        assert_eq!(
            completion.parsed_response().unwrap().as_json().unwrap(),
            &json!({"joke": "x", "answer": "R"})
        );
    }

    #[tokio::test]
    async fn test_run_invokes_tools_from_structured_reply() {
        let provider = MockProvider::new(vec![MockResponse::text(
            "{\"answer\":\"done\",\"tools\":[{\"name\":\"echo\",\"arguments\":{\"message\":\"hi\"}}]}",
        )]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();

        let args = TaskArgs::new(creator()).with_tools(vec!["echo".to_string()]);
        let task = Task::run(&JokeTask, args, &provider, &registry, &Config::default()).await;

        assert_eq!(task.status(), Status::Completed);
        assert_eq!(task.tool_invocations.len(), 1);
        assert_eq!(task.tool_invocations[0].tool_name, "echo");
        assert!(task.tool_invocations[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_run_skips_unknown_tool_names() {
        let provider = MockProvider::new(vec![MockResponse::text(
            "{\"tools\":[{\"name\":\"nonexistent\",\"arguments\":{}}]}",
        )]);
        let registry = ToolRegistry::new();

        let args = TaskArgs::new(creator()).with_tools(vec!["nonexistent".to_string()]);
        let task = Task::run(&JokeTask, args, &provider, &registry, &Config::default()).await;

        assert_eq!(task.status(), Status::Completed);
        assert!(task.tool_invocations.is_empty());
    }

    #[tokio::test]
    async fn test_run_marks_failed_on_provider_error() {
        let provider =
            MockProvider::failing(crate::errors::ProviderError::other("down", true));
        let registry = ToolRegistry::new();

        let task = Task::run(
            &JokeTask,
            TaskArgs::new(creator()),
            &provider,
            &registry,
            &Config::default(),
        )
        .await;

        assert_eq!(task.status(), Status::Failed);
        assert!(task.completion.is_none());
        assert!(task.lifecycle.started_at.is_some());
    }

    #[tokio::test]
    async fn test_run_marks_failed_on_malformed_json_reply() {
        let provider = MockProvider::new(vec![MockResponse::text("this is not json")]);
        let registry = ToolRegistry::new();

        let task = Task::run(
            &JokeTask,
            TaskArgs::new(creator()),
            &provider,
            &registry,
            &Config::default(),
        )
        .await;

        // The raw response is preserved for diagnosis even though parsing
        // failed downstream.
        assert_eq!(task.status(), Status::Failed);
        assert_eq!(
            task.completion.as_ref().unwrap().raw_response,
            "this is not json"
        );
    }

    #[tokio::test]
    async fn test_explicit_language_overrides_creator_preference() {
        let provider = MockProvider::new(vec![MockResponse::text("{}")]);
        let registry = ToolRegistry::new();

        let args = TaskArgs::new(creator())
            .with_language("es")
            .with_creator_language("en");
        let task = Task::run(&JokeTask, args, &provider, &registry, &Config::default()).await;

        assert_eq!(task.requested_language.as_deref(), Some("es"));
        assert!(task.system_prompt.contains("speaks es"));

        let requests = provider.requests();
        assert!(requests[0]
            .system_prompt
            .as_ref()
            .unwrap()
            .contains("respond in es"));
    }

    #[tokio::test]
    async fn test_creator_preference_used_when_no_explicit_language() {
        let provider = MockProvider::new(vec![MockResponse::text("{}")]);
        let registry = ToolRegistry::new();

        let args = TaskArgs::new(creator()).with_creator_language("de");
        let task = Task::run(&JokeTask, args, &provider, &registry, &Config::default()).await;

        assert_eq!(task.requested_language.as_deref(), Some("de"));
    }
}
