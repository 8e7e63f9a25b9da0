use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Classification of a provider failure, used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    Malformed,
    Timeout,
    Other,
}

/// A failure surfaced by a provider adapter. The `retryable` flag tells the
/// caller whether re-issuing the same request could plausibly succeed.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("provider request failed ({kind:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn rate_limit<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ProviderErrorKind::RateLimit,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ProviderErrorKind::Malformed,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ProviderErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn other<S: Into<String>>(message: S, retryable: bool) -> Self {
        Self {
            kind: ProviderErrorKind::Other,
            message: message.into(),
            retryable,
        }
    }
}

/// A structured reply that could not be turned into the declared format.
/// Not retryable: it signals a prompt/schema mismatch, not a transient fault.
#[non_exhaustive]
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ParseError {
    #[error("invalid JSON in model response: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool arguments do not match schema: {0}")]
    SchemaValidation(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Orchestration-level error for work units. Tool- and observation-level
/// failures are converted into model-visible text before they reach this
/// type; anything that does surface here aborts the current work unit.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("prompt template rendering failed: {0}")]
    Template(String),

    #[error("conversation entry not found: {0}")]
    EntryNotFound(Uuid),
}
