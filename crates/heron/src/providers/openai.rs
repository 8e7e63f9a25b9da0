use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    error_for_status, extract_openai_tool_calls, map_transport_error, messages_to_openai_spec,
    tools_to_openai_spec,
};
use crate::errors::ProviderError;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::parser::ResponseFormat;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::other(e.to_string(), false))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(OpenAiProviderConfig::from_env()?)
    }

    fn get_usage(data: &Value) -> Result<Usage, ProviderError> {
        let usage = data
            .get("usage")
            .ok_or_else(|| ProviderError::malformed("no usage data in response"))?;

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Ok(Usage::new(input_tokens, output_tokens, total_tokens))
    }

    fn response_format_spec(request: &CompletionRequest) -> Option<Value> {
        if request.response_format != ResponseFormat::Json {
            return None;
        }
        match &request.json_schema {
            Some(schema) => Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "json_response",
                    "schema": schema,
                }
            })),
            None => Some(json!({"type": "json_object"})),
        }
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
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
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        let mut messages_array = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages_array.push(json!({
                "role": "system",
                "content": system_prompt,
            }));
        }
        messages_array.extend(messages_to_openai_spec(&request.messages));

        let mut payload = json!({
            "model": request.model,
            "messages": messages_array,
        });
        let body = payload
            .as_object_mut()
            .ok_or_else(|| ProviderError::other("payload must be an object", false))?;

        if !request.tools.is_empty() {
            body.insert("tools".to_string(), json!(tools_to_openai_spec(&request.tools)));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if let Some(response_format) = Self::response_format_spec(request) {
            body.insert("response_format".to_string(), response_format);
        }

        let data = self.post(payload).await?;

        if let Some(error) = data.get("error") {
            return Err(ProviderError::malformed(format!(
                "OpenAI API error: {}",
                error
            )));
        }

        let message = &data["choices"][0]["message"];
        if message.is_null() {
            return Err(ProviderError::malformed(
                "no choices in OpenAI response".to_string(),
            ));
        }

        let raw_response = message["content"].as_str().unwrap_or_default();
        let tool_calls = extract_openai_tool_calls(message);
        let usage = Self::get_usage(&data)?;

        Ok(
            CompletionResult::new(request, raw_response, tool_calls, usage)
                .with_costs(&self.config.pricing),
        )
    }
}
