use indoc::indoc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::Error;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::models::lifecycle::{Lifecycle, Status};
use crate::models::message::Message;
use crate::models::source::SourceRef;
use crate::models::tool::ToolCall;
use crate::parser::extract_tag;
use crate::providers::base::Provider;
use crate::tools::{ToolInvocation, ToolRegistry};

/// How tool calls are read out of a conversation reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStyle {
    /// Parse a single `<tool>{...}</tool>` block out of the response text
    #[default]
    Tagged,
    /// Read the provider's native tool-call objects
    Native,
}

/// One turn of a conversation. Owns at most one completion and any tool
/// invocations the reply triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub creator: SourceRef,
    pub user_message: String,
    /// The display portion of the model reply, extracted from the
    /// `<message>` region for tagged replies
    pub model_response_message: Option<String>,
    pub lifecycle: Lifecycle,
    pub completion: Option<CompletionResult>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl ConversationEntry {
    fn new<S: Into<String>>(creator: SourceRef, user_message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator,
            user_message: user_message.into().trim().to_string(),
            model_response_message: None,
            lifecycle: Lifecycle::new(),
            completion: None,
            tool_invocations: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.lifecycle.status()
    }

    pub fn completed(&self) -> bool {
        self.status() == Status::Completed
    }
}

/// An ordered multi-turn exchange. The effective message history is derived
/// by replaying entries oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub creator: SourceRef,
    entries: Vec<ConversationEntry>,
    entries_count: usize,
    /// Names of tools the model may invoke; empty means every registered
    /// tool
    pub available_tools: Vec<String>,
    pub tool_call_style: ToolCallStyle,
    /// Appended to the base system prompt; when unset a default describing
    /// the reply grammar is used
    pub system_prompt_addition: Option<String>,
    /// Seed message a host shows before the first user turn
    pub initial_message: Option<String>,
    pub model: Option<String>,
}

impl Conversation {
    pub fn new(creator: SourceRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator,
            entries: Vec::new(),
            entries_count: 0,
            available_tools: Vec::new(),
            tool_call_style: ToolCallStyle::default(),
            system_prompt_addition: None,
            initial_message: None,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_tool_call_style(mut self, style: ToolCallStyle) -> Self {
        self.tool_call_style = style;
        self
    }

    pub fn with_system_prompt_addition<S: Into<String>>(mut self, addition: S) -> Self {
        self.system_prompt_addition = Some(addition.into());
        self
    }

    pub fn with_initial_message<S: Into<String>>(mut self, message: S) -> Self {
        self.initial_message = Some(message.into());
        self
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Denormalized entry counter; always equals `entries().len()`
    pub fn entries_count(&self) -> usize {
        self.entries_count
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&ConversationEntry> {
        self.entries.iter().find(|entry| entry.id == entry_id)
    }

    /// Append a new pending entry, incrementing the entry counter
    pub fn add_entry<S: Into<String>>(&mut self, creator: SourceRef, user_message: S) -> Uuid {
        let entry = ConversationEntry::new(creator, user_message);
        let entry_id = entry.id;
        self.entries.push(entry);
        self.entries_count += 1;
        entry_id
    }

    /// Remove an entry, decrementing the entry counter
    pub fn remove_entry(&mut self, entry_id: Uuid) -> Option<ConversationEntry> {
        let index = self.entries.iter().position(|entry| entry.id == entry_id)?;
        self.entries_count -= 1;
        Some(self.entries.remove(index))
    }

    /// The effective message history, derived by replaying entries
    /// oldest-first. Completed entries contribute their user turn, the
    /// model reply, and one turn per tool invocation plus its observation;
    /// unprocessed entries contribute only their user turn.
    pub fn history(&self) -> Vec<Message> {
        self.replay(None)
    }

    fn history_excluding(&self, entry_id: Uuid) -> Vec<Message> {
        self.replay(Some(entry_id))
    }

    fn replay(&self, excluding: Option<Uuid>) -> Vec<Message> {
        let mut messages = Vec::new();
        for entry in &self.entries {
            if Some(entry.id) == excluding {
                continue;
            }
            messages.push(Message::user().with_text(entry.user_message.as_str()));
            if !entry.completed() {
                continue;
            }
            if let Some(response) = &entry.model_response_message {
                messages.push(Message::assistant().with_text(response.as_str()));
            }
            for invocation in &entry.tool_invocations {
                messages.push(Message::assistant().with_text(invocation.as_model_message()));
                if let Some(observation) = invocation.observation_message() {
                    messages.push(Message::user().with_text(observation));
                }
            }
        }
        messages
    }

    /// Process one entry: issue a completion over the replayed history,
    /// extract the reply message and any tool calls, and invoke them.
    /// The entry ends terminal either way; a failure marks it failed with
    /// any recorded invocation states preserved for diagnosis.
    pub async fn process_entry(
        &mut self,
        entry_id: Uuid,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        config: &Config,
    ) -> Result<(), Error> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == entry_id)
            .ok_or(Error::EntryNotFound(entry_id))?;

        self.entries[index].lifecycle.start();

        match self.execute_entry(index, provider, registry, config).await {
            Ok(observations) => {
                self.entries[index].lifecycle.complete();
                let creator = self.creator;
                for observation in observations {
                    self.add_entry(creator, observation);
                }
                Ok(())
            }
            Err(e) => {
                error!(entry = %entry_id, error = %e, "conversation entry processing failed");
                self.entries[index].lifecycle.fail();
                Err(e)
            }
        }
    }

    /// Returns the observations from invoked tools whose policy requests a
    /// follow-up round-trip; the caller turns those into new entries.
    async fn execute_entry(
        &mut self,
        index: usize,
        provider: &dyn Provider,
        registry: &ToolRegistry,
        config: &Config,
    ) -> Result<Vec<String>, Error> {
        let entry_id = self.entries[index].id;
        let user_message = self.entries[index].user_message.clone();

        let mut messages = self.history_excluding(entry_id);
        messages.push(Message::user().with_text(user_message.as_str()));

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        let mut request =
            CompletionRequest::new(model, messages, SourceRef::conversation_entry(entry_id))
                .with_system_prompt(self.build_system_prompt(registry, config))
                .with_temperature(config.temperature);
        if self.tool_call_style == ToolCallStyle::Native {
            request = request.with_tools(registry.descriptors(&self.available_tools));
        }

        let completion = provider.complete(&request).await?;
        let raw = completion.raw_response.clone();

        let response_message = match self.tool_call_style {
            ToolCallStyle::Tagged => {
                extract_tag(&raw, "message").unwrap_or_else(|| raw.trim().to_string())
            }
            ToolCallStyle::Native => raw.trim().to_string(),
        };

        let calls: Vec<ToolCall> = match self.tool_call_style {
            ToolCallStyle::Tagged => extract_tag(&raw, "tool")
                .and_then(|block| match serde_json::from_str::<ToolCall>(&block) {
                    Ok(call) => Some(call),
                    Err(e) => {
                        warn!(entry = %entry_id, error = %e, "ignoring malformed tool block in reply");
                        None
                    }
                })
                .into_iter()
                .collect(),
            ToolCallStyle::Native => completion.tool_calls.clone(),
        };

        {
            let entry = &mut self.entries[index];
            entry.completion = Some(completion);
            entry.model_response_message = Some(response_message);
        }

        let mut observations = Vec::new();
        for call in calls {
            let Some(tool) = registry.get(&call.name) else {
                warn!(tool = %call.name, "skipping unknown tool requested by model");
                continue;
            };
            let allowed = self.available_tools.is_empty()
                || self.available_tools.contains(&call.name);
            if !allowed {
                warn!(tool = %call.name, "skipping tool not available to this conversation");
                continue;
            }

            let triggers_observation = tool.triggers_observation();
            match registry
                .invoke(
                    &call.name,
                    call.arguments,
                    SourceRef::conversation_entry(entry_id),
                )
                .await
            {
                Ok(invocation) => {
                    if triggers_observation {
                        if let Some(observation) = invocation.observation_message() {
                            observations.push(observation);
                        }
                    }
                    self.entries[index].tool_invocations.push(invocation);
                }
                Err(failure) => {
                    if let Some(invocation) = failure.invocation {
                        self.entries[index].tool_invocations.push(invocation);
                    }
                    return Err(failure.error.into());
                }
            }
        }

        Ok(observations)
    }

    fn build_system_prompt(&self, registry: &ToolRegistry, config: &Config) -> String {
        let mut system_prompt = config.base_system_prompt.clone();
        system_prompt.push_str("\n\n");
        match &self.system_prompt_addition {
            Some(addition) => system_prompt.push_str(addition),
            None => system_prompt.push_str(&self.default_prompt_addition(registry)),
        }
        system_prompt
    }

    fn default_prompt_addition(&self, registry: &ToolRegistry) -> String {
        match self.tool_call_style {
            ToolCallStyle::Native => {
                "Reply with your message to the user, and call tools when they help you answer."
                    .to_string()
            }
            ToolCallStyle::Tagged => {
                let mut addition = indoc! {r#"
                    Your message to be displayed to the user should be wrapped in <message></message> tags.
                    To invoke one of the available tools, include a single <tool>{"name": "tool_name", "arguments": {...}}</tool> block after your message."#}
                .trim()
                .to_string();
                if !registry.is_empty() {
                    addition.push_str("\n\nAvailable tools:\n");
                    addition.push_str(&registry.descriptions_for_model(&self.available_tools));
                }
                addition
            }
        }
    }
}
