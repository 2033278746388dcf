//! Two-language detection by script share.
//!
//! Text whose share of characters in the primary script exceeds the
//! threshold is the primary language; everything else is the secondary one.
//! `Auto` output flips between the two.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Hiragana, katakana, and CJK unified ideographs.
pub const CJK_RANGES: &[RangeInclusive<char>] = &[
    '\u{3040}'..='\u{309F}',
    '\u{30A0}'..='\u{30FF}',
    '\u{4E00}'..='\u{9FFF}',
];

/// Share of primary-script characters above which text counts as primary.
pub const DEFAULT_SCRIPT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "en")]
    English,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Japanese => "ja",
            Language::English => "en",
        }
    }

    /// Name used inside prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Language::Auto => "Auto",
            Language::Japanese => "Japanese",
            Language::English => "English",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Language::Auto),
            "ja" | "jp" | "japanese" => Ok(Language::Japanese),
            "en" | "english" => Ok(Language::English),
            other => Err(format!(
                "Unknown language '{}'. Use auto, ja, or en.",
                other
            )),
        }
    }
}

/// Detector for a fixed primary/secondary language pair.
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    primary: Language,
    secondary: Language,
    script: &'static [RangeInclusive<char>],
    threshold: f64,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new(
            Language::Japanese,
            Language::English,
            CJK_RANGES,
            DEFAULT_SCRIPT_THRESHOLD,
        )
    }
}

impl LanguageDetector {
    pub fn new(
        primary: Language,
        secondary: Language,
        script: &'static [RangeInclusive<char>],
        threshold: f64,
    ) -> Self {
        Self {
            primary,
            secondary,
            script,
            threshold,
        }
    }

    pub fn primary(&self) -> Language {
        self.primary
    }

    pub fn secondary(&self) -> Language {
        self.secondary
    }

    /// Fraction of characters in `text` that fall in the primary script.
    pub fn script_share(&self, text: &str) -> f64 {
        let mut total = 0usize;
        let mut matched = 0usize;
        for c in text.chars() {
            total += 1;
            if self.script.iter().any(|range| range.contains(&c)) {
                matched += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        matched as f64 / total as f64
    }

    pub fn detect(&self, text: &str) -> Language {
        if self.script_share(text) > self.threshold {
            self.primary
        } else {
            self.secondary
        }
    }

    /// Input language for a request: detected when `requested` is `Auto`.
    pub fn resolve_input(&self, requested: Language, text: &str) -> Language {
        match requested {
            Language::Auto => self.detect(text),
            explicit => explicit,
        }
    }

    /// Output language: the explicit setting, or the other language of the
    /// pair when the setting is `Auto`.
    pub fn output_for(&self, input: Language, setting: Language) -> Language {
        if setting != Language::Auto {
            return setting;
        }
        if input == self.primary {
            self.secondary
        } else {
            self.primary
        }
    }
}
