//! Per-mode prompt templates.
//!
//! Each mode carries a fixed system instruction and a user template. The
//! user template may reference `{inputLanguage}`, `{outputLanguage}`, and
//! `{inputText}`.

use super::language::Language;
use super::mode::TransformMode;

/// A mode's prompt pair.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub system_prompt: &'static str,
    pub user_prompt: &'static str,
}

/// Values substituted into a user template.
#[derive(Debug, Clone)]
pub struct TemplateContext<'a> {
    pub input_text: &'a str,
    pub input_language: Language,
    pub output_language: Language,
}

impl Template {
    /// Returns (system_prompt, user_prompt).
    ///
    /// The input text is substituted last so placeholders that happen to
    /// appear inside it are left alone.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> (String, String) {
        let user = self
            .user_prompt
            .replace("{inputLanguage}", ctx.input_language.display_name())
            .replace("{outputLanguage}", ctx.output_language.display_name())
            .replace("{inputText}", ctx.input_text);

        (self.system_prompt.to_string(), user)
    }
}

macro_rules! output_rules {
    () => {
        "Reply with the resulting text only: no preamble, no notes, no quotation marks around it. \
         Keep the original line breaks and formatting, and never introduce facts the source does not contain."
    };
}

/// Output rules shared by every mode except summarize.
pub const OUTPUT_RULES: &str = output_rules!();

/// Template for `mode`.
pub fn template_for(mode: TransformMode) -> Template {
    match mode {
        TransformMode::Translate => Template {
            system_prompt: concat!(
                "You translate text between languages. ",
                "Names, numbers, and units stay as written. ",
                output_rules!()
            ),
            user_prompt: "Translate this {inputLanguage} text into {outputLanguage}:\n\n{inputText}",
        },
        TransformMode::Polite => Template {
            system_prompt: concat!(
                "You rewrite casual writing into courteous business language without changing what it says. ",
                output_rules!()
            ),
            user_prompt: "Rewrite this in polite business language:\n\n{inputText}",
        },
        TransformMode::Rephrase => Template {
            system_prompt: concat!(
                "You reword text so it reads differently but means exactly the same thing. ",
                output_rules!()
            ),
            user_prompt: "Reword this text:\n\n{inputText}",
        },
        TransformMode::Summarize => Template {
            system_prompt: concat!(
                "You condense text into three bullet points that keep the key facts and figures. ",
                "Reply with the bullets only: no preamble, no notes. ",
                "Never introduce facts the source does not contain."
            ),
            user_prompt: "Give three bullet points summarizing this text:\n\n{inputText}",
        },
        TransformMode::Proofreading => Template {
            system_prompt: concat!(
                "You correct spelling, grammar, and awkward phrasing while keeping meaning and tone. ",
                output_rules!()
            ),
            user_prompt: "Correct this text:\n\n{inputText}",
        },
        TransformMode::CodeTechnical => Template {
            system_prompt: concat!(
                "You tidy technical writing. Code blocks, identifiers, and technical terms are copied unchanged. ",
                output_rules!()
            ),
            user_prompt: "Clean up this technical text:\n\n{inputText}",
        },
    }
}
