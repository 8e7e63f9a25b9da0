use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ParseError;
use crate::models::message::Message;
use crate::models::source::SourceRef;
use crate::models::tool::{Tool, ToolCall};
use crate::parser::{self, ParsedResponse, ResponseFormat, Sanitizer};
use crate::providers::base::Usage;
use crate::providers::pricing::PricingTable;

/// Everything a provider adapter needs to issue one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub response_format: ResponseFormat,
    /// Declared schema for structured JSON replies. Providers with a native
    /// structured-output mechanism use it directly; others fall back to
    /// prompt instructions plus post-hoc parsing.
    pub json_schema: Option<Value>,
    /// Capability descriptors for native tool calling.
    pub tools: Vec<Tool>,
    pub sanitizer: Option<Sanitizer>,
    /// The work unit this completion is being made for.
    pub source: SourceRef,
}

impl CompletionRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<Message>, source: SourceRef) -> Self {
        Self {
            model: model.into(),
            messages,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            response_format: ResponseFormat::default(),
            json_schema: None,
            tools: Vec::new(),
            sanitizer: None,
            source,
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = response_format;
        self
    }

    pub fn with_json_schema(mut self, json_schema: Value) -> Self {
        self.json_schema = Some(json_schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }
}

/// The persisted record of one prompt/response exchange. Owned by whichever
/// work unit created the request; the adapter returns it as a plain value
/// and never mutates anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResult {
    pub id: Uuid,
    pub source: SourceRef,
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub raw_response: String,
    /// Tool invocations emitted natively by the provider, as opposed to
    /// calls parsed out of the response text.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub prompt_token_cost: Option<f64>,
    pub output_token_cost: Option<f64>,
    pub total_cost: Option<f64>,
    pub response_format: ResponseFormat,
    pub sanitizer: Option<Sanitizer>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    parsed: OnceLock<ParsedResponse>,
}

impl CompletionResult {
    pub fn new<S: Into<String>>(
        request: &CompletionRequest,
        raw_response: S,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: request.source,
            model: request.model.clone(),
            system_prompt: request.system_prompt.clone(),
            messages: request.messages.clone(),
            raw_response: raw_response.into().trim().to_string(),
            tool_calls,
            usage,
            prompt_token_cost: None,
            output_token_cost: None,
            total_cost: None,
            response_format: request.response_format,
            sanitizer: request.sanitizer.clone(),
            created_at: Utc::now(),
            parsed: OnceLock::new(),
        }
    }

    /// Derive monetary costs from the usage counts and the per-model price
    /// table. Models missing from the table leave the costs unset.
    pub fn with_costs(mut self, pricing: &PricingTable) -> Self {
        if let Some(prices) = pricing.get(&self.model) {
            self.prompt_token_cost = self
                .usage
                .input_tokens
                .map(|tokens| tokens as f64 * prices.input_cost_per_token);
            self.output_token_cost = self
                .usage
                .output_tokens
                .map(|tokens| tokens as f64 * prices.output_cost_per_token);
            self.total_cost = match (self.prompt_token_cost, self.output_token_cost) {
                (Some(input), Some(output)) => Some(input + output),
                (Some(input), None) => Some(input),
                (None, Some(output)) => Some(output),
                (None, None) => None,
            };
        }
        self
    }

    /// The raw response converted to the declared format. Parsed at most
    /// once per raw value and cached on this instance.
    pub fn parsed_response(&self) -> Result<&ParsedResponse, ParseError> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed);
        }
        let parsed = parser::parse(
            &self.raw_response,
            self.response_format,
            self.sanitizer.as_ref(),
        )?;
        Ok(self.parsed.get_or_init(|| parsed))
    }

    /// Replace the raw response, invalidating the parse cache. Used by
    /// explicit retries; ordinary processing never rewrites a response.
    pub fn replace_raw_response<S: Into<String>>(&mut self, raw_response: S) {
        self.raw_response = raw_response.into().trim().to_string();
        self.parsed = OnceLock::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::source::SourceRef;
    use crate::providers::pricing::ModelPricing;
    use serde_json::json;

    fn request(format: ResponseFormat) -> CompletionRequest {
        CompletionRequest::new(
            "gpt-4o",
            vec![Message::user().with_text("hi")],
            SourceRef::task(Uuid::new_v4()),
        )
        .with_response_format(format)
    }

    #[test]
    fn test_parsed_response_is_cached() {
        let result = CompletionResult::new(
            &request(ResponseFormat::Json),
            "```json\n{\"answer\": 42}\n```",
            vec![],
            Usage::default(),
        );

        let first = result.parsed_response().unwrap() as *const ParsedResponse;
        let second = result.parsed_response().unwrap() as *const ParsedResponse;
        assert_eq!(first, second);
        assert_eq!(
            result.parsed_response().unwrap().as_json().unwrap(),
            &json!({"answer": 42})
        );
    }

    #[test]
    fn test_replace_raw_response_invalidates_cache() {
        let mut result = CompletionResult::new(
            &request(ResponseFormat::Json),
            "{\"answer\": 1}",
            vec![],
            Usage::default(),
        );
        assert_eq!(
            result.parsed_response().unwrap().as_json().unwrap(),
            &json!({"answer": 1})
        );

        result.replace_raw_response("{\"answer\": 2}");
        assert_eq!(
            result.parsed_response().unwrap().as_json().unwrap(),
            &json!({"answer": 2})
        );
    }

    #[test]
    fn test_raw_response_is_trimmed() {
        let result = CompletionResult::new(
            &request(ResponseFormat::Text),
            "  hello \n",
            vec![],
            Usage::default(),
        );
        assert_eq!(result.raw_response, "hello");
    }

    #[test]
    fn test_with_costs_derives_totals() {
        let mut pricing = PricingTable::empty();
        pricing.set(
            "gpt-4o",
            ModelPricing {
                input_cost_per_token: 0.000_002_5,
                output_cost_per_token: 0.000_01,
            },
        );

        let result = CompletionResult::new(
            &request(ResponseFormat::Text),
            "hi",
            vec![],
            Usage::new(Some(1000), Some(500), Some(1500)),
        )
        .with_costs(&pricing);

        assert_eq!(result.prompt_token_cost, Some(0.0025));
        assert_eq!(result.output_token_cost, Some(0.005));
        assert_eq!(result.total_cost, Some(0.0075));
    }

    #[test]
    fn test_with_costs_unknown_model() {
        let result = CompletionResult::new(
            &request(ResponseFormat::Text),
            "hi",
            vec![],
            Usage::new(Some(10), Some(10), Some(20)),
        )
        .with_costs(&PricingTable::empty());

        assert_eq!(result.total_cost, None);
    }
}
