//! Transform orchestration.
//!
//! `Transformer` turns a `TransformRequest` into a provider call: it checks
//! that a provider is configured, applies the exclusion policy, resolves
//! languages, renders the mode template, and bounds the call with a timeout.
//! It never touches the clipboard; writing the result back is the caller's
//! decision.
//!
//! # Usage
//!
//! ```ignore
//! use ccai::transform::{Transformer, TransformRequest, TransformMode};
//! use ccai::transform::openai::{OpenAiConfig, OpenAiProvider};
//!
//! let transformer = Transformer::new(["password="]);
//! transformer.set_provider(Some(Arc::new(OpenAiProvider::new(config)?)));
//!
//! let result = transformer
//!     .handle(TransformRequest::new("こんにちは", TransformMode::Translate))
//!     .await?;
//! println!("{}", result.output_text);
//! ```

pub mod exclusion;
pub mod language;
pub mod mode;
pub mod openai;
pub mod provider;
pub mod template;

pub use exclusion::ExclusionPolicy;
pub use language::{Language, LanguageDetector};
pub use mode::{Estimate, TransformMode, TransformRequest, TransformResult};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use provider::{Message, ProviderError, ProviderResponse, TransformProvider};
pub use template::{template_for, TemplateContext};

use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bound on a single provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transform-related errors.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("No API key configured")]
    NotConfigured,

    #[error("Input text is empty")]
    EmptyInput,

    #[error("Input matches exclusion pattern '{pattern}'")]
    Excluded { pattern: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl TransformError {
    /// Human-readable summary for notifications and the IPC boundary.
    pub fn user_message(&self) -> String {
        match self {
            TransformError::NotConfigured => {
                "No API key configured. Run `ccai secret set` first.".to_string()
            }
            TransformError::EmptyInput => "There is no text to transform.".to_string(),
            TransformError::Excluded { .. } => {
                "This text matches a privacy exclusion pattern and was not sent.".to_string()
            }
            TransformError::Provider(e) => e.user_message(),
        }
    }
}

/// Orchestrates transform requests against the active provider.
pub struct Transformer {
    provider: RwLock<Option<Arc<dyn TransformProvider>>>,
    exclusions: RwLock<ExclusionPolicy>,
    detector: LanguageDetector,
    timeout: Duration,
}

impl Transformer {
    /// Create an unconfigured transformer with the given exclusion patterns.
    pub fn new<I, S>(exclude_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            provider: RwLock::new(None),
            exclusions: RwLock::new(ExclusionPolicy::new(exclude_patterns)),
            detector: LanguageDetector::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Install or clear the active provider.
    pub fn set_provider(&self, provider: Option<Arc<dyn TransformProvider>>) {
        match self.provider.write() {
            Ok(mut slot) => {
                match &provider {
                    Some(p) => info!("Transform provider set: {} ({})", p.name(), p.model()),
                    None => info!("Transform provider cleared"),
                }
                *slot = provider;
            }
            Err(_) => warn!("Provider slot poisoned; provider unchanged"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.current_provider().is_some()
    }

    /// Replace the exclusion patterns.
    pub fn set_exclusions<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = ExclusionPolicy::new(patterns);
        match self.exclusions.write() {
            Ok(mut slot) => *slot = policy,
            Err(_) => warn!("Exclusion policy poisoned; patterns unchanged"),
        }
    }

    pub fn detector(&self) -> &LanguageDetector {
        &self.detector
    }

    fn current_provider(&self) -> Option<Arc<dyn TransformProvider>> {
        self.provider.read().ok().and_then(|p| p.clone())
    }

    fn excluded_by(&self, text: &str) -> Option<String> {
        self.exclusions
            .read()
            .ok()
            .and_then(|policy| policy.matching_pattern(text).map(str::to_string))
    }

    /// Run `request` with the default timeout.
    pub async fn handle(&self, request: TransformRequest) -> Result<TransformResult, TransformError> {
        self.handle_with_timeout(request, self.timeout).await
    }

    /// Run `request`, giving up after `limit`.
    pub async fn handle_with_timeout(
        &self,
        request: TransformRequest,
        limit: Duration,
    ) -> Result<TransformResult, TransformError> {
        let provider = self.current_provider().ok_or(TransformError::NotConfigured)?;

        if request.input_text.trim().is_empty() {
            return Err(TransformError::EmptyInput);
        }

        if let Some(pattern) = self.excluded_by(&request.input_text) {
            info!("Transform blocked by exclusion pattern '{}'", pattern);
            return Err(TransformError::Excluded { pattern });
        }

        let input_language = self
            .detector
            .resolve_input(request.input_language, &request.input_text);
        let output_language = self
            .detector
            .output_for(input_language, request.output_language);

        let (system_prompt, user_prompt) = template_for(request.mode).render(&TemplateContext {
            input_text: &request.input_text,
            input_language,
            output_language,
        });

        debug!(
            "Transforming {} chars with mode {} ({} -> {}) via {}",
            request.input_text.chars().count(),
            request.mode,
            input_language,
            output_language,
            provider.name()
        );

        let messages = [Message::system(system_prompt), Message::user(user_prompt)];
        let response = tokio::time::timeout(limit, provider.generate(&messages))
            .await
            .map_err(|_| ProviderError::Timeout(limit))??;

        Ok(TransformResult {
            output_text: response.content,
            mode: request.mode,
            resolved_input_language: input_language,
            resolved_output_language: output_language,
            timestamp: Utc::now(),
            tokens_used: response.tokens_used,
        })
    }

    /// Detected language and suggested mode for `text`.
    pub fn estimate(&self, text: &str) -> Estimate {
        match self.current_provider() {
            Some(provider) => provider.estimate(text),
            None => Estimate {
                language: self.detector.detect(text),
                suggested_mode: TransformMode::Translate,
            },
        }
    }

    /// Whether the active provider is reachable. False when unconfigured.
    pub async fn health_check(&self) -> bool {
        match self.current_provider() {
            Some(provider) => provider.health_check().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockProvider {
        reply: String,
        delay: Option<Duration>,
        fail_with: Mutex<Option<ProviderError>>,
        calls: Mutex<Vec<Vec<Message>>>,
    }

    impl MockProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TransformProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn generate(&self, messages: &[Message]) -> Result<ProviderResponse, ProviderError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            Ok(ProviderResponse {
                content: self.reply.clone(),
                model: "mock-model".to_string(),
                tokens_used: Some(42),
            })
        }
    }

    fn configured(provider: MockProvider) -> (Transformer, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        let transformer = Transformer::new(["password=", "-----BEGIN"]);
        transformer.set_provider(Some(provider.clone() as Arc<dyn TransformProvider>));
        (transformer, provider)
    }

    #[tokio::test]
    async fn test_not_configured_before_any_call() {
        let transformer = Transformer::new(Vec::<String>::new());
        let result = transformer
            .handle(TransformRequest::new("hello", TransformMode::Translate))
            .await;
        assert!(matches!(result, Err(TransformError::NotConfigured)));
        assert!(!transformer.health_check().await);
    }

    #[tokio::test]
    async fn test_translate_resolves_languages() {
        let (transformer, provider) = configured(MockProvider::replying("Hello"));

        let result = transformer
            .handle(TransformRequest::new("こんにちは", TransformMode::Translate))
            .await
            .unwrap();

        assert_eq!(result.output_text, "Hello");
        assert_eq!(result.resolved_input_language, Language::Japanese);
        assert_eq!(result.resolved_output_language, Language::English);
        assert_eq!(result.tokens_used, Some(42));

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert!(calls[0][1].content.contains("Japanese text into English"));
    }

    #[tokio::test]
    async fn test_explicit_languages_are_kept() {
        let (transformer, _) = configured(MockProvider::replying("ok"));
        let request = TransformRequest::new("hello", TransformMode::Polite)
            .with_languages(Language::English, Language::English);

        let result = transformer.handle(request).await.unwrap();
        assert_eq!(result.resolved_input_language, Language::English);
        assert_eq!(result.resolved_output_language, Language::English);
        assert_eq!(result.mode, TransformMode::Polite);
    }

    #[tokio::test]
    async fn test_excluded_text_never_reaches_provider() {
        let (transformer, provider) = configured(MockProvider::replying("x"));

        let result = transformer
            .handle(TransformRequest::new("my password=123", TransformMode::Translate))
            .await;
        match result {
            Err(TransformError::Excluded { pattern }) => assert_eq!(pattern, "password="),
            other => panic!("Expected Excluded, got {:?}", other),
        }

        transformer
            .handle(TransformRequest::new("hello world", TransformMode::Translate))
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_set_exclusions_replaces_policy() {
        let (transformer, _) = configured(MockProvider::replying("x"));
        transformer.set_exclusions(["internal"]);

        assert!(transformer
            .handle(TransformRequest::new("password=1", TransformMode::Rephrase))
            .await
            .is_ok());
        assert!(matches!(
            transformer
                .handle(TransformRequest::new("INTERNAL memo", TransformMode::Rephrase))
                .await,
            Err(TransformError::Excluded { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let (transformer, provider) = configured(MockProvider::replying("x"));
        let result = transformer
            .handle(TransformRequest::new("  \n ", TransformMode::Summarize))
            .await;
        assert!(matches!(result, Err(TransformError::EmptyInput)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_errors_pass_through() {
        let provider = MockProvider::replying("x");
        *provider.fail_with.lock().unwrap() = Some(ProviderError::RateLimited { retry_after: None });
        let (transformer, _) = configured(provider);

        let err = transformer
            .handle(TransformRequest::new("hello", TransformMode::Translate))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Provider(ProviderError::RateLimited { .. })
        ));
        assert!(err.user_message().contains("Rate limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let (transformer, _) = configured(MockProvider {
            reply: "late".to_string(),
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let err = transformer
            .handle_with_timeout(
                TransformRequest::new("hello", TransformMode::Translate),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        match err {
            TransformError::Provider(ProviderError::Timeout(limit)) => {
                assert_eq!(limit, Duration::from_secs(5))
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clearing_provider() {
        let (transformer, _) = configured(MockProvider::replying("x"));
        assert!(transformer.is_configured());
        transformer.set_provider(None);
        assert!(!transformer.is_configured());
    }

    #[test]
    fn test_estimate_without_provider() {
        let transformer = Transformer::new(Vec::<String>::new());
        let estimate = transformer.estimate("Good morning");
        assert_eq!(estimate.language, Language::English);
        assert_eq!(estimate.suggested_mode, TransformMode::Translate);
    }

    #[test]
    fn test_user_messages() {
        assert!(TransformError::NotConfigured.user_message().contains("API key"));
        let err = TransformError::Excluded {
            pattern: "password=".to_string(),
        };
        assert!(!err.user_message().contains("password="));
    }
}
