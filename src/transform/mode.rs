//! Transform modes and the request/result values passed through the
//! orchestrator.

use super::language::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Text-rewrite behavior applied to the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    #[default]
    Translate,
    Polite,
    Rephrase,
    Summarize,
    Proofreading,
    CodeTechnical,
}

impl TransformMode {
    pub const ALL: [TransformMode; 6] = [
        TransformMode::Translate,
        TransformMode::Polite,
        TransformMode::Rephrase,
        TransformMode::Summarize,
        TransformMode::Proofreading,
        TransformMode::CodeTechnical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransformMode::Translate => "translate",
            TransformMode::Polite => "polite",
            TransformMode::Rephrase => "rephrase",
            TransformMode::Summarize => "summarize",
            TransformMode::Proofreading => "proofreading",
            TransformMode::CodeTechnical => "code_technical",
        }
    }
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        TransformMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "Unknown mode '{}'. Valid modes: {}",
                    s,
                    TransformMode::ALL
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// A single transform call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub input_text: String,
    #[serde(default)]
    pub mode: TransformMode,
    #[serde(default)]
    pub input_language: Language,
    #[serde(default)]
    pub output_language: Language,
}

impl TransformRequest {
    /// Request with both languages left on `Auto`.
    pub fn new(input_text: impl Into<String>, mode: TransformMode) -> Self {
        Self {
            input_text: input_text.into(),
            mode,
            input_language: Language::Auto,
            output_language: Language::Auto,
        }
    }

    pub fn with_languages(mut self, input: Language, output: Language) -> Self {
        self.input_language = input;
        self.output_language = output;
        self
    }
}

/// Outcome of a successful transform. Both languages are resolved, never `Auto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    pub output_text: String,
    pub mode: TransformMode,
    pub resolved_input_language: Language,
    pub resolved_output_language: Language,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Language guess and suggested mode for a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub language: Language,
    pub suggested_mode: TransformMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(
            "translate".parse::<TransformMode>().unwrap(),
            TransformMode::Translate
        );
        assert_eq!(
            "Code-Technical".parse::<TransformMode>().unwrap(),
            TransformMode::CodeTechnical
        );
        let err = "shout".parse::<TransformMode>().unwrap_err();
        assert!(err.contains("proofreading"));
    }

    #[test]
    fn test_mode_serde_matches_as_str() {
        for mode in TransformMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: TransformRequest =
            serde_json::from_str(r#"{"input_text": "hello"}"#).unwrap();
        assert_eq!(request.mode, TransformMode::Translate);
        assert_eq!(request.input_language, Language::Auto);
        assert_eq!(request.output_language, Language::Auto);
    }

    #[test]
    fn test_result_omits_missing_tokens() {
        let result = TransformResult {
            output_text: "hi".to_string(),
            mode: TransformMode::Polite,
            resolved_input_language: Language::English,
            resolved_output_language: Language::English,
            timestamp: Utc::now(),
            tokens_used: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("tokens_used"));
        assert!(json.contains("\"polite\""));
    }
}
