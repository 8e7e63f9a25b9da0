use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::ProviderError;
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Convert internal messages to OpenAI's chat message specification.
/// Text-only messages use the plain string form; messages with image or
/// file parts use the content-array form.
pub(crate) fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let all_text = message
                .content
                .iter()
                .all(|part| matches!(part, Content::Text(_)));

            let content = if all_text {
                json!(message.text())
            } else {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .map(|part| match part {
                        Content::Text(text) => json!({
                            "type": "text",
                            "text": text.text,
                        }),
                        Content::Image(image) => json!({
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", image.mime_type, image.data),
                            }
                        }),
                        Content::File(file) => json!({
                            "type": "file",
                            "file": {
                                "filename": file.filename,
                                "file_data": format!("data:{};base64,{}", file.mime_type, file.data),
                            }
                        }),
                    })
                    .collect();
                json!(parts)
            };

            json!({
                "role": message.role.as_str(),
                "content": content,
            })
        })
        .collect()
}

/// Convert internal messages to Anthropic's message specification. The
/// messages array only admits user/assistant roles there, so stray system
/// messages are sent as user turns; the system prompt itself travels in
/// the top-level `system` parameter.
pub(crate) fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::Assistant => "assistant",
                Role::User | Role::System => "user",
            };

            let parts: Vec<Value> = message
                .content
                .iter()
                .map(|part| match part {
                    Content::Text(text) => json!({
                        "type": "text",
                        "text": text.text,
                    }),
                    Content::Image(image) => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.mime_type,
                            "data": image.data,
                        }
                    }),
                    Content::File(file) => json!({
                        "type": "document",
                        "source": {
                            "type": "base64",
                            "media_type": file.mime_type,
                            "data": file.data,
                        }
                    }),
                })
                .collect();

            json!({
                "role": role,
                "content": parts,
            })
        })
        .collect()
}

/// Convert capability descriptors to OpenAI's tool specification
pub(crate) fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Convert capability descriptors to Anthropic's tool specification
pub(crate) fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

/// Pull native tool calls out of an OpenAI response message. Arguments
/// arrive as a JSON-encoded string; calls whose arguments fail to decode
/// are dropped with a warning rather than failing the whole response.
pub(crate) fn extract_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(tool_calls) = message.get("tool_calls").and_then(|calls| calls.as_array()) else {
        return Vec::new();
    };

    tool_calls
        .iter()
        .filter_map(|call| {
            let name = call["function"]["name"].as_str()?;
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            match serde_json::from_str::<Value>(arguments) {
                Ok(arguments) => Some(ToolCall::new(name, arguments)),
                Err(e) => {
                    warn!(tool = name, error = %e, "dropping tool call with undecodable arguments");
                    None
                }
            }
        })
        .collect()
}

/// Map a reqwest transport failure to the provider error taxonomy.
pub(crate) fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::timeout(error.to_string())
    } else if error.is_connect() {
        ProviderError::other(error.to_string(), true)
    } else {
        ProviderError::other(error.to_string(), false)
    }
}

/// Map a non-success HTTP status to the provider error taxonomy.
pub(crate) fn error_for_status(status: StatusCode, body: String) -> ProviderError {
    let message = format!("{}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::auth(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limit(message),
        StatusCode::REQUEST_TIMEOUT => ProviderError::timeout(message),
        status if status.is_server_error() => ProviderError::other(message, true),
        _ => ProviderError::other(message, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderErrorKind;

    #[test]
    fn test_messages_to_openai_spec() {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_with_image() {
        let message = Message::user()
            .with_text("What is this?")
            .with_image("aGk=", "image/png");
        let spec = messages_to_openai_spec(&[message]);

        let parts = spec[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/png;base64,aGk="
        );
    }

    #[test]
    fn test_messages_to_anthropic_spec() {
        let messages = vec![
            Message::user().with_text("Hello"),
            Message::assistant().with_text("Hi there"),
        ];
        let spec = messages_to_anthropic_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"][0]["type"], "text");
        assert_eq!(spec[0]["content"][0]["text"], "Hello");
        assert_eq!(spec[1]["role"], "assistant");
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string"}
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
    }

    #[test]
    fn test_extract_openai_tool_calls() {
        let message = json!({
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {
                    "name": "lookup",
                    "arguments": "{\"q\": \"x\"}"
                }
            }]
        });

        let calls = extract_openai_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
    }

    #[test]
    fn test_extract_openai_tool_calls_drops_bad_arguments() {
        let message = json!({
            "tool_calls": [{
                "function": {
                    "name": "lookup",
                    "arguments": "not json {"
                }
            }]
        });

        assert!(extract_openai_tool_calls(&message).is_empty());
    }

    #[test]
    fn test_error_for_status_mapping() {
        let auth = error_for_status(StatusCode::UNAUTHORIZED, "nope".to_string());
        assert_eq!(auth.kind, ProviderErrorKind::Auth);
        assert!(!auth.retryable);

        let limited = error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert_eq!(limited.kind, ProviderErrorKind::RateLimit);
        assert!(limited.retryable);

        let server = error_for_status(StatusCode::BAD_GATEWAY, "oops".to_string());
        assert_eq!(server.kind, ProviderErrorKind::Other);
        assert!(server.retryable);
    }
}
