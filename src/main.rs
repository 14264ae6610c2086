use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use panel_translator::{FailurePolicy, get_env, resolve_key};

#[derive(Parser, Debug)]
#[command(
    name = "panel-translator",
    version,
    about = "Replace text in comic panels with an Arabic translation"
)]
struct Cli {
    /// Directory of images to translate
    #[arg(long = "input", default_value = "images")]
    input: PathBuf,

    /// Directory translated images are written to (created if missing)
    #[arg(long = "output", default_value = "output")]
    output: PathBuf,

    /// Font file used to draw the translation (overrides settings [font])
    #[arg(long = "font")]
    font: Option<PathBuf>,

    /// Chat model used for translation (overrides settings [translation])
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// OpenAI API key (overrides OPENAI_API_KEY)
    #[arg(long = "openai-key")]
    openai_key: Option<String>,

    /// Google Vision API key (overrides GOOGLE_VISION_API_KEY / GOOGLE_API_KEY)
    #[arg(long = "vision-key")]
    vision_key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// What to draw when the translator fails
    #[arg(long = "failure-policy", value_enum)]
    failure_policy: Option<FailurePolicy>,

    /// Keep going with the next image when one fails
    #[arg(long = "continue-on-error")]
    continue_on_error: bool,

    /// Write OCR bounding box overlays next to the outputs
    #[arg(long = "debug-ocr")]
    debug_ocr: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    panel_translator::logging::init(cli.verbose)?;

    let openai_key = resolve_key(cli.openai_key.as_deref(), &["OPENAI_API_KEY"])
        .with_context(|| "no OpenAI API key found (use --openai-key or OPENAI_API_KEY)")?;
    let vision_key = resolve_key(
        cli.vision_key.as_deref(),
        &["GOOGLE_VISION_API_KEY", "GOOGLE_API_KEY"],
    )
    .with_context(|| "no Google Vision API key found (use --vision-key or GOOGLE_VISION_API_KEY)")?;

    let summary = panel_translator::run(panel_translator::Config {
        input_dir: cli.input,
        output_dir: cli.output,
        model: cli.model,
        openai_key,
        openai_base_url: get_env("OPENAI_BASE_URL"),
        vision_key,
        font_path: cli.font,
        settings_path: cli.read_settings,
        failure_policy: cli.failure_policy,
        continue_on_error: cli.continue_on_error,
        debug_ocr: cli.debug_ocr,
    })
    .await?;

    if summary.failed > 0 {
        anyhow::bail!("{} image(s) failed", summary.failed);
    }
    Ok(())
}
