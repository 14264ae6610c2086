use anyhow::{Result, anyhow};
use std::path::PathBuf;
use tracing::info;

pub mod layout;
pub mod logging;
pub mod ocr;
pub mod pipeline;
pub mod providers;
pub mod render;
pub mod settings;
pub mod translator;
pub mod validation;

#[cfg(test)]
mod test_util;

pub use ocr::{GoogleVision, OcrProvider};
pub use pipeline::{BatchOptions, BatchSummary, ImageReport, Pipeline, RegionState};
pub use providers::{OpenAI, Provider, ProviderUsage};
pub use translator::{TranslationOutcome, Translator};
pub use validation::{FailurePolicy, TranslationValidator};

#[derive(Debug, Clone)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model: Option<String>,
    pub openai_key: String,
    pub openai_base_url: Option<String>,
    pub vision_key: String,
    pub font_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub failure_policy: Option<FailurePolicy>,
    pub continue_on_error: bool,
    pub debug_ocr: bool,
}

pub async fn run(config: Config) -> Result<BatchSummary> {
    if !config.input_dir.is_dir() {
        return Err(anyhow!(
            "input directory not found: {}",
            config.input_dir.display()
        ));
    }

    let mut settings = settings::load_settings(config.settings_path.as_deref())?;
    if let Some(model) = config.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        settings.translation_model = model.to_string();
    }
    if let Some(policy) = config.failure_policy {
        settings.failure_policy = policy;
    }

    let font_path = config
        .font_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.font_path));
    let font = layout::load_font(&font_path, &settings.font_fallback_families)?;

    let mut provider = OpenAI::new(config.openai_key).with_model(settings.translation_model.clone());
    if let Some(base_url) = config.openai_base_url.as_deref() {
        provider = provider.with_base_url(base_url);
    }
    info!("translating with {}", settings.translation_model);

    let pipeline = Pipeline::new(
        GoogleVision::new(config.vision_key),
        Translator::new(provider, &settings)?,
        TranslationValidator::new(&settings.rejection_phrases, settings.failure_policy),
        Box::new(font),
        settings.fit_params(),
        settings.padding(),
    );

    let options = BatchOptions {
        input_dir: config.input_dir,
        output_dir: config.output_dir,
        extensions: settings.extensions.clone(),
        output_prefix: settings.output_prefix.clone(),
        continue_on_error: config.continue_on_error,
        debug_ocr: config.debug_ocr,
    };
    pipeline.run_batch(&options).await
}

/// Uses the explicit key when given, otherwise the first non-empty
/// environment variable from `env_keys`.
pub fn resolve_key(override_key: Option<&str>, env_keys: &[&str]) -> Result<String> {
    if let Some(key) = override_key.map(str::trim).filter(|key| !key.is_empty()) {
        return Ok(key.to_string());
    }
    env_keys
        .iter()
        .find_map(|key| get_env(key))
        .ok_or_else(|| anyhow!("API key not found: {}", env_keys.join(", ")))
}

pub fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
