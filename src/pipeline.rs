use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::layout::{FitParams, LayoutResult, Typeface, fit};
use crate::ocr::{OcrDebugConfig, OcrProvider, TextRegion, extract_regions, write_debug_overlay};
use crate::providers::Provider;
use crate::render::{Canvas, Padding, RenderRegion, RenderStats, Renderer};
use crate::translator::{TranslationOutcome, Translator};
use crate::validation::{Rejection, TranslationValidator, Verdict};

/// Terminal state of one region after an image has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionState {
    Rendered,
    ErasedOnly(EraseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseReason {
    /// The padded box is below the minimum drawable size; the region was
    /// never sent to the translator.
    TooSmall,
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct RegionReport {
    pub region: TextRegion,
    pub outcome: Option<TranslationOutcome>,
    pub state: RegionState,
}

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub width: u32,
    pub height: u32,
    pub regions: Vec<RegionReport>,
    pub render: RenderStats,
}

impl ImageReport {
    pub fn rendered(&self) -> usize {
        self.regions
            .iter()
            .filter(|report| report.state == RegionState::Rendered)
            .count()
    }

    pub fn erased_only(&self) -> usize {
        self.regions.len() - self.rendered()
    }
}

pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub report: ImageReport,
}

pub struct Pipeline<O: OcrProvider, P: Provider> {
    ocr: O,
    translator: Translator<P>,
    validator: TranslationValidator,
    face: Box<dyn Typeface>,
    fit_params: FitParams,
    padding: Padding,
}

impl<O: OcrProvider, P: Provider> Pipeline<O, P> {
    pub fn new(
        ocr: O,
        translator: Translator<P>,
        validator: TranslationValidator,
        face: Box<dyn Typeface>,
        fit_params: FitParams,
        padding: Padding,
    ) -> Self {
        Self {
            ocr,
            translator,
            validator,
            face,
            fit_params,
            padding,
        }
    }

    /// Runs one image end to end and returns the encoded result. An OCR
    /// failure or an undecodable image fails the whole image; everything
    /// that goes wrong for a single region only affects that region.
    pub async fn process_image(
        &self,
        image_bytes: &[u8],
        output_format: ImageFormat,
    ) -> Result<ProcessedImage> {
        let image =
            image::load_from_memory(image_bytes).with_context(|| "failed to decode image")?;
        let (width, height) = image.dimensions();

        let annotation = self
            .ocr
            .annotate(image_bytes)
            .await
            .with_context(|| "text detection failed")?;
        let regions = extract_regions(&annotation);
        debug!("{} region(s) after noise filtering", regions.len());

        let mut reports = Vec::with_capacity(regions.len());
        let mut render_regions = Vec::with_capacity(regions.len());
        for region in regions {
            let (report, layout) = self.plan_region(region).await;
            render_regions.push(RenderRegion {
                bbox: report.region.bbox,
                layout,
            });
            reports.push(report);
        }

        let mut canvas = Canvas::from_dynamic(image);
        let render =
            Renderer::new(self.face.as_ref(), self.padding).render(&mut canvas, &render_regions);

        let bytes = encode_image(DynamicImage::ImageRgb8(canvas.into_image()), output_format)?;
        Ok(ProcessedImage {
            bytes,
            report: ImageReport {
                width,
                height,
                regions: reports,
                render,
            },
        })
    }

    async fn plan_region(
        &self,
        region: TextRegion,
    ) -> (RegionReport, Option<LayoutResult>) {
        let padded = self.padding.apply(&region.bbox);
        if !self.padding.is_drawable(&padded) {
            let report = RegionReport {
                region,
                outcome: None,
                state: RegionState::ErasedOnly(EraseReason::TooSmall),
            };
            return (report, None);
        }

        let outcome = self.translator.translate(&region.text).await;
        match self.validator.validate_outcome(&outcome) {
            Verdict::Accepted(text) => {
                let layout = fit(
                    &text,
                    padded.width() as u32,
                    padded.height() as u32,
                    self.face.as_ref(),
                    &self.fit_params,
                );
                if !layout.fits {
                    debug!(
                        "'{}' overflows its {}x{} box at size {}",
                        text,
                        padded.width(),
                        padded.height(),
                        layout.font_size
                    );
                }
                let report = RegionReport {
                    region,
                    outcome: Some(outcome),
                    state: RegionState::Rendered,
                };
                (report, Some(layout))
            }
            Verdict::Rejected(rejection) => {
                match &rejection {
                    Rejection::KnownPhrase(_) => {
                        info!("Skipping invalid translation: {}", outcome.text())
                    }
                    Rejection::EmptyAfterStripping => {
                        info!("Translation was empty after removing English.")
                    }
                }
                let report = RegionReport {
                    region,
                    outcome: Some(outcome),
                    state: RegionState::ErasedOnly(EraseReason::Rejected(rejection)),
                };
                (report, None)
            }
        }
    }

    pub async fn run_batch(&self, options: &BatchOptions) -> Result<BatchSummary> {
        let matcher = build_extension_matcher(&options.extensions)?;
        let inputs = list_inputs(&options.input_dir, &matcher)?;
        std::fs::create_dir_all(&options.output_dir).with_context(|| {
            format!(
                "failed to create output directory: {}",
                options.output_dir.display()
            )
        })?;

        let mut summary = BatchSummary::default();
        for input in inputs {
            let file_name = input
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("invalid file name: {}", input.display()))?;
            let output = options
                .output_dir
                .join(format!("{}{}", options.output_prefix, file_name));
            info!("Processing: {}", file_name);

            match self.process_file(&input, &output, options).await {
                Ok(Some(report)) => {
                    summary.processed += 1;
                    summary.rendered += report.rendered();
                    summary.erased_only += report.erased_only();
                    info!("Translated and saved: {}", output.display());
                }
                Ok(None) => summary.skipped += 1,
                Err(err) if options.continue_on_error => {
                    error!("failed to process {}: {:#}", input.display(), err);
                    summary.failed += 1;
                }
                Err(err) => {
                    return Err(err.context(format!("failed to process {}", input.display())));
                }
            }
        }

        info!(
            "batch finished: {} processed, {} failed, {} skipped ({} regions rendered, {} erased only)",
            summary.processed,
            summary.failed,
            summary.skipped,
            summary.rendered,
            summary.erased_only
        );
        Ok(summary)
    }

    async fn process_file(
        &self,
        input: &Path,
        output: &Path,
        options: &BatchOptions,
    ) -> Result<Option<ImageReport>> {
        let bytes = std::fs::read(input)
            .with_context(|| format!("failed to read image: {}", input.display()))?;
        let Some(kind) = infer::get(&bytes)
            .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        else {
            warn!("skipping {}: not an image", input.display());
            return Ok(None);
        };
        let format = ImageFormat::from_path(output)
            .ok()
            .or_else(|| ImageFormat::from_mime_type(kind.mime_type()))
            .ok_or_else(|| anyhow!("unsupported output format: {}", output.display()))?;

        let processed = self.process_image(&bytes, format).await?;
        std::fs::write(output, &processed.bytes)
            .with_context(|| format!("failed to write image: {}", output.display()))?;

        if options.debug_ocr {
            let debug = OcrDebugConfig::new(&options.output_dir, input);
            let regions = processed
                .report
                .regions
                .iter()
                .map(|report| report.region.clone())
                .collect::<Vec<_>>();
            write_debug_overlay(
                &debug,
                &bytes,
                kind.mime_type(),
                processed.report.width,
                processed.report.height,
                &regions,
            )?;
        }
        Ok(Some(processed.report))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub extensions: Vec<String>,
    pub output_prefix: String,
    pub continue_on_error: bool,
    pub debug_ocr: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rendered: usize,
    pub erased_only: usize,
}

fn build_extension_matcher(extensions: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let glob = GlobBuilder::new(&format!("*.{}", ext))
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid extension pattern: {}", ext))?;
        builder.add(glob);
    }
    builder
        .build()
        .with_context(|| "failed to build extension matcher")
}

/// Files directly inside `dir` whose name matches the whitelist, sorted by
/// name so runs are reproducible.
fn list_inputs(dir: &Path, matcher: &GlobSet) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read input directory: {}", dir.display()))?;
    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        if matcher.is_match(Path::new(name)) {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

fn encode_image(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .with_context(|| format!("failed to encode {:?} image", format))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::stub::BlockFace;
    use crate::ocr::{
        BBox, Block, BoundingPoly, OcrFuture, Page, Paragraph, Symbol, TextAnnotation, Vertex,
        Word,
    };
    use crate::render::{ERASE_COLOR, TEXT_COLOR};
    use crate::settings::builtin_settings;
    use crate::translator::stub::StubProvider;
    use crate::validation::FailurePolicy;
    use image::{Rgb, RgbImage};

    struct StubOcr {
        result: std::result::Result<TextAnnotation, String>,
    }

    impl OcrProvider for StubOcr {
        fn annotate<'a>(&'a self, _image_bytes: &'a [u8]) -> OcrFuture<'a> {
            let result = self.result.clone().map_err(|message| anyhow!(message));
            Box::pin(async move { result })
        }
    }

    fn paragraph(text: &str, x0: i32, y0: i32, x1: i32, y1: i32) -> Paragraph {
        Paragraph {
            words: text
                .split(' ')
                .map(|token| Word {
                    bounding_box: Some(BoundingPoly {
                        vertices: vec![
                            Vertex { x: x0, y: y0 },
                            Vertex { x: x1, y: y0 },
                            Vertex { x: x1, y: y1 },
                            Vertex { x: x0, y: y1 },
                        ],
                    }),
                    symbols: token
                        .chars()
                        .map(|ch| Symbol {
                            text: ch.to_string(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn ocr(paragraphs: Vec<Paragraph>) -> StubOcr {
        StubOcr {
            result: Ok(TextAnnotation {
                pages: vec![Page {
                    blocks: vec![Block { paragraphs }],
                }],
            }),
        }
    }

    fn pipeline(
        ocr: StubOcr,
        provider: StubProvider,
        policy: FailurePolicy,
    ) -> Pipeline<StubOcr, StubProvider> {
        let settings = builtin_settings().unwrap();
        Pipeline::new(
            ocr,
            Translator::new(provider, &settings).unwrap(),
            TranslationValidator::new(&settings.rejection_phrases, policy),
            Box::new(BlockFace),
            settings.fit_params(),
            settings.padding(),
        )
    }

    fn gray_png(width: u32, height: u32) -> Vec<u8> {
        encode_image(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))),
            ImageFormat::Png,
        )
        .unwrap()
    }

    fn decode(bytes: &[u8]) -> RgbImage {
        image::load_from_memory(bytes).unwrap().to_rgb8()
    }

    const TRANSLATED: &str = "\u{0645}\u{0631}\u{062D}\u{0628}\u{0627}";

    #[tokio::test]
    async fn hello_world_is_erased_and_redrawn_centered() {
        let provider = StubProvider::new(&[("Hello world", TRANSLATED)]);
        let pipeline = pipeline(
            ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]),
            provider.clone(),
            FailurePolicy::Strip,
        );
        let processed = pipeline
            .process_image(&gray_png(200, 100), ImageFormat::Png)
            .await
            .unwrap();

        assert_eq!(provider.calls(), vec!["Hello world"]);
        let report = &processed.report;
        assert_eq!(report.regions.len(), 1);
        assert_eq!(report.regions[0].state, RegionState::Rendered);
        assert_eq!(
            report.regions[0].region.bbox,
            BBox {
                x0: 10,
                y0: 10,
                x1: 110,
                y1: 40
            }
        );

        // 5 letters at size 23 -> 57px wide, 25px tall: centered in 122x50
        let image = decode(&processed.bytes);
        let (x, y) = ((122 - 57) / 2, (50 - 25) / 2);
        assert_eq!(*image.get_pixel(x as u32, y as u32), TEXT_COLOR);
        assert_eq!(*image.get_pixel(x as u32 - 1, y as u32), ERASE_COLOR);
        assert_eq!(*image.get_pixel(0, 0), ERASE_COLOR);
        assert_eq!(*image.get_pixel(122, 50), ERASE_COLOR);
        assert_eq!(*image.get_pixel(123, 50), Rgb([90, 90, 90]));
    }

    #[tokio::test]
    async fn rejected_translation_leaves_a_blank_box_and_continues() {
        let provider = StubProvider::new(&[
            ("Hello world", "I'm sorry, but I can't assist with that."),
            ("Second one", TRANSLATED),
        ]);
        let pipeline = pipeline(
            ocr(vec![
                paragraph("Hello world", 10, 10, 110, 40),
                paragraph("Second one", 10, 150, 110, 180),
            ]),
            provider.clone(),
            FailurePolicy::Strip,
        );
        let processed = pipeline
            .process_image(&gray_png(200, 220), ImageFormat::Png)
            .await
            .unwrap();

        let states = processed
            .report
            .regions
            .iter()
            .map(|report| report.state.clone())
            .collect::<Vec<_>>();
        assert!(matches!(
            states[0],
            RegionState::ErasedOnly(EraseReason::Rejected(Rejection::KnownPhrase(_)))
        ));
        assert_eq!(states[1], RegionState::Rendered);
        assert_eq!(provider.calls().len(), 2);

        let image = decode(&processed.bytes);
        for y in 0..=50 {
            for x in 0..=122 {
                assert_eq!(*image.get_pixel(x, y), ERASE_COLOR);
            }
        }
        assert_eq!(processed.report.render.drawn, 1);
    }

    #[tokio::test]
    async fn latin_only_translation_is_erased_only() {
        let punctuated = pipeline(
            ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]),
            StubProvider::new(&[("Hello world", "Hello world!")]),
            FailurePolicy::Strip,
        );
        let processed = punctuated
            .process_image(&gray_png(200, 100), ImageFormat::Png)
            .await
            .unwrap();
        // "!" survives stripping, so the region is still drawn
        assert_eq!(processed.report.regions[0].state, RegionState::Rendered);

        let echoed = pipeline(
            ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]),
            StubProvider::new(&[("Hello world", "Hello world")]),
            FailurePolicy::Strip,
        );
        let processed = echoed
            .process_image(&gray_png(200, 100), ImageFormat::Png)
            .await
            .unwrap();
        assert_eq!(
            processed.report.regions[0].state,
            RegionState::ErasedOnly(EraseReason::Rejected(Rejection::EmptyAfterStripping))
        );
        assert_eq!(processed.report.render.drawn, 0);
    }

    #[tokio::test]
    async fn translator_failure_follows_the_failure_policy() {
        let regions = || ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]);

        let strict = pipeline(regions(), StubProvider::new(&[]), FailurePolicy::Strip);
        let processed = strict
            .process_image(&gray_png(200, 100), ImageFormat::Png)
            .await
            .unwrap();
        let report = &processed.report.regions[0];
        assert!(report.outcome.as_ref().unwrap().is_failed());
        assert_eq!(
            report.state,
            RegionState::ErasedOnly(EraseReason::Rejected(Rejection::EmptyAfterStripping))
        );

        let lenient = pipeline(
            regions(),
            StubProvider::new(&[]),
            FailurePolicy::KeepOriginal,
        );
        let processed = lenient
            .process_image(&gray_png(200, 100), ImageFormat::Png)
            .await
            .unwrap();
        assert_eq!(processed.report.regions[0].state, RegionState::Rendered);
    }

    #[tokio::test]
    async fn undersized_regions_are_not_translated() {
        let provider = StubProvider::new(&[("tiny", TRANSLATED)]);
        let settings = builtin_settings().unwrap();
        let pipeline = Pipeline::new(
            ocr(vec![paragraph("tiny", 40, 40, 90, 48)]),
            Translator::new(provider.clone(), &settings).unwrap(),
            TranslationValidator::new(&settings.rejection_phrases, FailurePolicy::Strip),
            Box::new(BlockFace),
            settings.fit_params(),
            Padding {
                x: 12,
                y: 0,
                min_box: 10,
            },
        );
        let processed = pipeline
            .process_image(&gray_png(120, 80), ImageFormat::Png)
            .await
            .unwrap();
        assert_eq!(
            processed.report.regions[0].state,
            RegionState::ErasedOnly(EraseReason::TooSmall)
        );
        assert!(provider.calls().is_empty());
        let image = decode(&processed.bytes);
        assert_eq!(*image.get_pixel(28, 44), ERASE_COLOR);
        assert_eq!(processed.report.render.too_small, 1);
    }

    #[tokio::test]
    async fn ocr_error_fails_the_image() {
        let pipeline = pipeline(
            StubOcr {
                result: Err("Bad image data.".to_string()),
            },
            StubProvider::new(&[]),
            FailurePolicy::Strip,
        );
        let err = pipeline
            .process_image(&gray_png(20, 20), ImageFormat::Png)
            .await
            .err()
            .expect("ocr error must fail the image");
        assert!(format!("{:#}", err).contains("Bad image data."));
    }

    #[tokio::test]
    async fn identical_input_produces_identical_bytes() {
        let provider = StubProvider::new(&[("Hello world", TRANSLATED)]);
        let pipeline = pipeline(
            ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]),
            provider,
            FailurePolicy::Strip,
        );
        let input = gray_png(160, 90);
        let first = pipeline.process_image(&input, ImageFormat::Png).await.unwrap();
        let second = pipeline.process_image(&input, ImageFormat::Png).await.unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn extension_matcher_is_case_insensitive() {
        let matcher = build_extension_matcher(&["jpg".to_string(), "png".to_string()]).unwrap();
        assert!(matcher.is_match("page.JPG"));
        assert!(matcher.is_match("page.png"));
        assert!(!matcher.is_match("page.gif"));
        assert!(!matcher.is_match("png"));
    }

    #[tokio::test]
    async fn batch_writes_prefixed_outputs_and_skips_other_files() {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        std::fs::write(input_dir.path().join("b.png"), gray_png(160, 90)).unwrap();
        std::fs::write(input_dir.path().join("a.PNG"), gray_png(160, 90)).unwrap();
        std::fs::write(input_dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(input_dir.path().join("fake.png"), "not an image").unwrap();

        let provider = StubProvider::new(&[("Hello world", TRANSLATED)]);
        let pipeline = pipeline(
            ocr(vec![paragraph("Hello world", 10, 10, 110, 40)]),
            provider,
            FailurePolicy::Strip,
        );
        let settings = builtin_settings().unwrap();
        let options = BatchOptions {
            input_dir: input_dir.path().to_path_buf(),
            output_dir: output_dir.path().join("out"),
            extensions: settings.extensions.clone(),
            output_prefix: settings.output_prefix.clone(),
            continue_on_error: false,
            debug_ocr: true,
        };
        let summary = pipeline.run_batch(&options).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rendered, 2);
        let out = output_dir.path().join("out");
        assert!(out.join("translated_a.PNG").exists());
        assert!(out.join("translated_b.png").exists());
        assert!(!out.join("translated_notes.txt").exists());
        assert!(out.join("a.PNG.ocr.png").exists());
        assert!(out.join("b.png.ocr.json").exists());
    }

    #[tokio::test]
    async fn batch_aborts_on_ocr_error_unless_isolated() {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        std::fs::write(input_dir.path().join("a.png"), gray_png(40, 40)).unwrap();
        std::fs::write(input_dir.path().join("b.png"), gray_png(40, 40)).unwrap();

        let failing = || {
            pipeline(
                StubOcr {
                    result: Err("quota exceeded".to_string()),
                },
                StubProvider::new(&[]),
                FailurePolicy::Strip,
            )
        };
        let mut options = BatchOptions {
            input_dir: input_dir.path().to_path_buf(),
            output_dir: output_dir.path().to_path_buf(),
            extensions: vec!["png".to_string()],
            output_prefix: "translated_".to_string(),
            continue_on_error: false,
            debug_ocr: false,
        };

        let err = failing().run_batch(&options).await.unwrap_err();
        assert!(format!("{:#}", err).contains("a.png"));

        options.continue_on_error = true;
        let summary = failing().run_batch(&options).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.processed, 0);
    }
}
