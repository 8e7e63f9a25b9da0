use std::env;

use crate::errors::ProviderError;
use crate::providers::pricing::PricingTable;

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

// Define specific config structs for each provider
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub pricing: PricingTable,
}

impl OpenAiProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: "https://api.openai.com".to_string(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pricing: PricingTable::default(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::auth("OPENAI_API_KEY is not set"))?;
        Ok(Self::new(api_key))
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub pricing: PricingTable,
}

impl AnthropicProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            pricing: PricingTable::default(),
        }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::auth("ANTHROPIC_API_KEY is not set"))?;
        Ok(Self::new(api_key))
    }
}

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
}
