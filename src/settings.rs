use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::FitParams;
use crate::render::Padding;
use crate::validation::FailurePolicy;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub translation_model: String,
    pub translation_temperature: f32,
    pub translation_dialect: String,
    pub system_prompt: String,
    pub rejection_phrases: Vec<String>,
    pub failure_policy: FailurePolicy,
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub font_size_step: u32,
    pub line_gap: u32,
    pub blank_line_before_long_word: bool,
    pub padding_x: u32,
    pub padding_y: u32,
    pub min_box: u32,
    pub font_path: String,
    pub font_fallback_families: Vec<String>,
    pub extensions: Vec<String>,
    pub output_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            translation_model: "gpt-4o".to_string(),
            translation_temperature: 0.7,
            translation_dialect: "Palestinian Levantine Arabic".to_string(),
            system_prompt: String::new(),
            rejection_phrases: Vec::new(),
            failure_policy: FailurePolicy::Strip,
            max_font_size: 23,
            min_font_size: 18,
            font_size_step: 2,
            line_gap: 4,
            blank_line_before_long_word: false,
            padding_x: 12,
            padding_y: 10,
            min_box: 10,
            font_path: "Noto_Naskh_Arabic/NotoNaskhArabic-VariableFont_wght.ttf".to_string(),
            font_fallback_families: vec!["sans-serif".to_string()],
            extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "webp".to_string(),
            ],
            output_prefix: "translated_".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    translation: Option<TranslationSettings>,
    layout: Option<LayoutSettings>,
    render: Option<RenderSettings>,
    font: Option<FontSettings>,
    batch: Option<BatchSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSettings {
    model: Option<String>,
    temperature: Option<f32>,
    dialect: Option<String>,
    system_prompt: Option<String>,
    rejection_phrases: Option<Vec<String>>,
    failure_policy: Option<FailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    max_font_size: Option<u32>,
    min_font_size: Option<u32>,
    font_size_step: Option<u32>,
    line_gap: Option<u32>,
    blank_line_before_long_word: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    padding_x: Option<u32>,
    padding_y: Option<u32>,
    min_box: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    path: Option<String>,
    fallback_families: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchSettings {
    extensions: Option<Vec<String>>,
    output_prefix: Option<String>,
}

/// Settings from the embedded `settings.toml` only, without consulting the
/// file system.
pub fn builtin_settings() -> Result<Settings> {
    let mut settings = Settings::default();
    let parsed: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse builtin settings")?;
    settings.merge(parsed);
    Ok(settings)
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = builtin_settings()?;
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn fit_params(&self) -> FitParams {
        FitParams {
            max_font_size: self.max_font_size,
            min_font_size: self.min_font_size,
            step: self.font_size_step,
            line_gap: self.line_gap,
            blank_line_before_long_word: self.blank_line_before_long_word,
        }
    }

    pub fn padding(&self) -> Padding {
        Padding {
            x: self.padding_x,
            y: self.padding_y,
            min_box: self.min_box,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_font_size == 0 {
            return Err(anyhow!("layout.min_font_size must be greater than zero"));
        }
        if self.min_font_size > self.max_font_size {
            return Err(anyhow!(
                "layout.min_font_size ({}) exceeds layout.max_font_size ({})",
                self.min_font_size,
                self.max_font_size
            ));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(anyhow!("translation.system_prompt is empty"));
        }
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(translation) = incoming.translation {
            if let Some(model) = translation.model {
                if !model.trim().is_empty() {
                    self.translation_model = model;
                }
            }
            if let Some(temperature) = translation.temperature {
                if (0.0..=2.0).contains(&temperature) {
                    self.translation_temperature = temperature;
                }
            }
            if let Some(dialect) = translation.dialect {
                if !dialect.trim().is_empty() {
                    self.translation_dialect = dialect;
                }
            }
            if let Some(prompt) = translation.system_prompt {
                if !prompt.trim().is_empty() {
                    self.system_prompt = prompt;
                }
            }
            if let Some(phrases) = translation.rejection_phrases {
                self.rejection_phrases = phrases
                    .into_iter()
                    .filter(|phrase| !phrase.trim().is_empty())
                    .collect();
            }
            if let Some(policy) = translation.failure_policy {
                self.failure_policy = policy;
            }
        }
        if let Some(layout) = incoming.layout {
            if let Some(size) = layout.max_font_size {
                if size > 0 {
                    self.max_font_size = size;
                }
            }
            if let Some(size) = layout.min_font_size {
                if size > 0 {
                    self.min_font_size = size;
                }
            }
            if let Some(step) = layout.font_size_step {
                if step > 0 {
                    self.font_size_step = step;
                }
            }
            if let Some(gap) = layout.line_gap {
                self.line_gap = gap;
            }
            if let Some(blank) = layout.blank_line_before_long_word {
                self.blank_line_before_long_word = blank;
            }
        }
        if let Some(render) = incoming.render {
            if let Some(padding) = render.padding_x {
                self.padding_x = padding;
            }
            if let Some(padding) = render.padding_y {
                self.padding_y = padding;
            }
            if let Some(min_box) = render.min_box {
                self.min_box = min_box;
            }
        }
        if let Some(font) = incoming.font {
            if let Some(path) = font.path {
                if !path.trim().is_empty() {
                    self.font_path = path;
                }
            }
            if let Some(families) = font.fallback_families {
                if !families.is_empty() {
                    self.font_fallback_families = families;
                }
            }
        }
        if let Some(batch) = incoming.batch {
            if let Some(extensions) = batch.extensions {
                let extensions = extensions
                    .into_iter()
                    .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect::<Vec<_>>();
                if !extensions.is_empty() {
                    self.extensions = extensions;
                }
            }
            if let Some(prefix) = batch.output_prefix {
                if !prefix.is_empty() {
                    self.output_prefix = prefix;
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".panel-translator"))
        }
    })
}
