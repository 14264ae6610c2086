use anyhow::{Context, Result};
use tera::Tera;
use tracing::{debug, warn};

use crate::providers::Provider;
use crate::settings::Settings;

/// Result of one translation call. A failed call carries the untranslated
/// text so the caller can decide what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(String),
    Failed { original: String, reason: String },
}

impl TranslationOutcome {
    /// The text that flows on to validation: the translation, or the
    /// original text when the call failed.
    pub fn text(&self) -> &str {
        match self {
            TranslationOutcome::Translated(text) => text,
            TranslationOutcome::Failed { original, .. } => original,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TranslationOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Translator<P: Provider> {
    provider: P,
    system_prompt: String,
    temperature: f32,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, settings: &Settings) -> Result<Self> {
        Ok(Self {
            provider,
            system_prompt: render_system_prompt(settings)?,
            temperature: settings.translation_temperature,
        })
    }

    pub async fn translate(&self, text: &str) -> TranslationOutcome {
        let response = self
            .provider
            .clone()
            .append_system_input(self.system_prompt.clone())
            .append_user_input(text.to_string())
            .with_temperature(self.temperature)
            .complete()
            .await;

        match response {
            Ok(response) => {
                debug!(
                    "translated '{}' with {}",
                    text,
                    response.model.as_deref().unwrap_or("unknown model")
                );
                TranslationOutcome::Translated(response.text.trim().to_string())
            }
            Err(err) => {
                warn!("Error translating '{}': {:#}", text, err);
                TranslationOutcome::Failed {
                    original: text.to_string(),
                    reason: format!("{:#}", err),
                }
            }
        }
    }
}

pub fn render_system_prompt(settings: &Settings) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("dialect", &settings.translation_dialect);
    let rendered = Tera::one_off(&settings.system_prompt, &context, false)
        .with_context(|| "failed to render translation system prompt")?;
    Ok(rendered.trim().to_string())
}
