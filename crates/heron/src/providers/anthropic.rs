use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::base::{Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{
    error_for_status, map_transport_error, messages_to_anthropic_spec, tools_to_anthropic_spec,
};
use crate::errors::ProviderError;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::models::tool::ToolCall;
use crate::parser::ResponseFormat;

const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 1024;

/// Name of the synthetic tool injected to obtain schema-conforming JSON
/// replies. Its `tool_use` block is read back as the raw response.
const JSON_RESPONSE_TOOL: &str = "json_response";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::other(e.to_string(), false))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(AnthropicProviderConfig::from_env()?)
    }

    fn get_usage(data: &Value) -> Usage {
        let input_tokens = data["usage"]["input_tokens"].as_i64().map(|v| v as i32);
        let output_tokens = data["usage"]["output_tokens"].as_i64().map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn json_response_tool(schema: &Value) -> Value {
        json!({
            "name": JSON_RESPONSE_TOOL,
            "description": "Generate a structured JSON response based on the provided schema.",
            "input_schema": schema,
        })
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| ProviderError::malformed(e.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(error_for_status(status, body))
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        let mut payload = json!({
            "model": request.model,
            "messages": messages_to_anthropic_spec(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        let body = payload
            .as_object_mut()
            .ok_or_else(|| ProviderError::other("payload must be an object", false))?;

        if let Some(system_prompt) = &request.system_prompt {
            body.insert("system".to_string(), json!(system_prompt));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }

        let mut tools = tools_to_anthropic_spec(&request.tools);
        if request.response_format == ResponseFormat::Json {
            if let Some(schema) = &request.json_schema {
                tools.push(Self::json_response_tool(schema));
            }
        }
        if !tools.is_empty() {
            body.insert("tools".to_string(), json!(tools));
        }

        let data = self.post(payload).await?;

        let content = data
            .get("content")
            .and_then(|content| content.as_array())
            .ok_or_else(|| ProviderError::malformed("no content in Anthropic response"))?;

        let mut text_response: Option<String> = None;
        let mut json_response: Option<String> = None;
        let mut tool_calls = Vec::new();

        for block in content {
            match block["type"].as_str() {
                Some("text") => {
                    if text_response.is_none() {
                        text_response = block["text"].as_str().map(|t| t.to_string());
                    }
                }
                Some("tool_use") => {
                    let name = block["name"].as_str().unwrap_or_default();
                    if name == JSON_RESPONSE_TOOL {
                        json_response = serde_json::to_string(&block["input"]).ok();
                    } else {
                        tool_calls.push(ToolCall::new(name, block["input"].clone()));
                    }
                }
                _ => {}
            }
        }

        let raw_response = json_response.or(text_response).ok_or_else(|| {
            ProviderError::malformed("no text or tool_use content in Anthropic response")
        })?;

        let usage = Self::get_usage(&data);

        Ok(
            CompletionResult::new(request, raw_response, tool_calls, usage)
                .with_costs(&self.config.pricing),
        )
    }
}
