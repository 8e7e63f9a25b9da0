use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::models::completion::{CompletionRequest, CompletionResult};
use crate::models::tool::ToolCall;
use crate::providers::base::{Provider, Usage};

/// One scripted reply for the mock provider.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub raw_response: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl MockResponse {
    pub fn text<S: Into<String>>(raw_response: S) -> Self {
        Self {
            raw_response: raw_response.into(),
            tool_calls: Vec::new(),
            usage: Usage::new(Some(10), Some(20), Some(30)),
        }
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }
}

/// A provider that replays pre-configured responses for testing. Requests
/// are recorded so tests can assert on the prompts that were sent.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    failure: Option<ProviderError>,
}

impl MockProvider {
    /// Create a mock provider with a sequence of responses
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
            failure: None,
        }
    }

    /// Create a mock provider that fails every completion with the given
    /// error
    pub fn failing(error: ProviderError) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            failure: Some(error),
        }
    }

    /// The requests received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let mut responses = self.responses.lock().expect("response queue poisoned");
        if responses.is_empty() {
            // Return an empty response if the script has run out
            Ok(CompletionResult::new(request, "", vec![], Usage::default()))
        } else {
            let next = responses.remove(0);
            Ok(CompletionResult::new(
                request,
                next.raw_response,
                next.tool_calls,
                next.usage,
            ))
        }
    }
}
