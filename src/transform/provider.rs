//! Transform provider abstraction.
//!
//! Defines the `TransformProvider` trait and the chat types shared by
//! backends. Providers only relay prompts; language resolution and
//! exclusion checks happen in the orchestrator.

use super::language::LanguageDetector;
use super::mode::{Estimate, TransformMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from transform providers.
///
/// The first four variants are the transport failures callers must be able
/// to tell apart.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Rate limited{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider server error (HTTP {status})")]
    ServerError { status: u16 },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

impl ProviderError {
    /// Short, user-facing description without transport details.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::Unauthorized { .. } => {
                "The API key was rejected. Check it with `ccai secret set`.".to_string()
            }
            ProviderError::RateLimited { .. } => {
                "Rate limit reached. Wait a moment and try again.".to_string()
            }
            ProviderError::ServerError { .. } => {
                "The provider is having trouble. Try again shortly.".to_string()
            }
            ProviderError::Timeout(_) => {
                "The request timed out. Check your network connection.".to_string()
            }
            ProviderError::Http(_) => "Could not reach the provider.".to_string(),
            ProviderError::Api(_) | ProviderError::InvalidResponse(_) => {
                "The provider returned an unexpected response.".to_string()
            }
            ProviderError::Config(msg) => format!("Provider misconfigured: {}", msg),
        }
    }
}

/// Message role for chat-style prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Response from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// The generated content, trimmed.
    pub content: String,
    /// The model that served the request.
    pub model: String,
    /// Number of tokens used (if reported).
    pub tokens_used: Option<u32>,
}

/// Capability interface for transform backends.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn name(&self) -> &'static str;

    /// Model name being used.
    fn model(&self) -> &str;

    /// Whether the backend is reachable and accepts our credential.
    async fn health_check(&self) -> bool;

    /// Send a chat completion request.
    async fn generate(&self, messages: &[Message]) -> Result<ProviderResponse, ProviderError>;

    /// Local guess at the language of `text` and the mode to suggest for it.
    fn estimate(&self, text: &str) -> Estimate {
        Estimate {
            language: LanguageDetector::default().detect(text),
            suggested_mode: TransformMode::Translate,
        }
    }
}
