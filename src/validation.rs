use serde::Deserialize;

use crate::translator::TranslationOutcome;

/// What to do with the untranslated text when the translator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Treat the fallback like any translation: Latin letters are stripped,
    /// so Latin source text usually ends up rejected and the region blank.
    Strip,
    /// Draw the source text unchanged when the translator failed.
    KeepOriginal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(String),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The model answered with refusal or failure boilerplate.
    KnownPhrase(String),
    /// Nothing was left after removing source-script characters.
    EmptyAfterStripping,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::KnownPhrase(phrase) => write!(f, "matched rejection phrase '{}'", phrase),
            Rejection::EmptyAfterStripping => write!(f, "empty after removing Latin letters"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationValidator {
    phrases: Vec<String>,
    policy: FailurePolicy,
}

impl TranslationValidator {
    pub fn new<I, S>(phrases: I, policy: FailurePolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|phrase| phrase.as_ref().trim().to_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self { phrases, policy }
    }

    pub fn validate(&self, translated: &str) -> Verdict {
        let lower = translated.to_lowercase();
        if let Some(phrase) = self.phrases.iter().find(|phrase| lower.contains(phrase.as_str())) {
            return Verdict::Rejected(Rejection::KnownPhrase(phrase.clone()));
        }
        let stripped = strip_latin(translated);
        let stripped = stripped.trim();
        if stripped.is_empty() {
            return Verdict::Rejected(Rejection::EmptyAfterStripping);
        }
        Verdict::Accepted(stripped.to_string())
    }

    pub fn validate_outcome(&self, outcome: &TranslationOutcome) -> Verdict {
        match (outcome, self.policy) {
            (TranslationOutcome::Failed { original, .. }, FailurePolicy::KeepOriginal) => {
                let original = original.trim();
                if original.is_empty() {
                    Verdict::Rejected(Rejection::EmptyAfterStripping)
                } else {
                    Verdict::Accepted(original.to_string())
                }
            }
            _ => self.validate(outcome.text()),
        }
    }
}

fn strip_latin(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_ascii_alphabetic()).collect()
}
