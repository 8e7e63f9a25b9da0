use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::models::completion::{CompletionRequest, CompletionResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Base trait for model providers (OpenAI, Anthropic, etc).
///
/// An adapter translates the internal request into the provider's wire
/// shape, extracts the normalized result, and surfaces failures as a
/// `ProviderError` carrying a retryability flag. It has no side effects
/// beyond the outbound call; the returned result is the caller's to
/// persist.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError>;
}
