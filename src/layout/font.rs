use anyhow::{Context, Result, anyhow};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::{info, warn};
use ttf_parser::Face;
use ttf_parser::name_id;
use unicode_bidi::Direction;
use usvg::{Options, Tree, fontdb};

use super::Typeface;

/// Letter used to check that a font can render the target script.
const SCRIPT_PROBE: char = '\u{0628}';
/// Sample whose ink extent below the ascender line sets the line height.
const LINE_SAMPLE: &str = "Test";
const RLM: char = '\u{200F}';

/// An outline font loaded once per run. Text is measured and drawn through
/// SVG `<text>`, so joining, ligatures and bidi reordering come from the
/// shaper and `size` is always the em size in pixels.
pub struct FontAsset {
    fontdb: Arc<fontdb::Database>,
    family: String,
    source: String,
    units_per_em: f32,
    ascender: f32,
    descender: f32,
    /// Font units the line sample reaches below its baseline.
    sample_depth: f32,
}

impl FontAsset {
    pub fn from_data(data: Vec<u8>, index: u32, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let (units_per_em, ascender, descender, sample_depth, name) = {
            let face = Face::parse(&data, index)
                .map_err(|err| anyhow!("failed to parse font: {} ({})", source, err))?;
            if face.glyph_index(SCRIPT_PROBE).is_none() {
                warn!(
                    "font {} has no Arabic glyphs; translated text may render as boxes",
                    source
                );
            }
            let sample_depth = LINE_SAMPLE
                .chars()
                .filter_map(|ch| face.glyph_index(ch))
                .filter_map(|id| face.glyph_bounding_box(id))
                .map(|bbox| -(bbox.y_min as f32))
                .fold(0.0f32, f32::max);
            (
                face.units_per_em().max(1) as f32,
                face.ascender() as f32,
                face.descender() as f32,
                sample_depth,
                extract_family_name(&face),
            )
        };

        let mut db = fontdb::Database::new();
        db.load_font_data(data);
        let family = db
            .faces()
            .find(|face| face.index == index)
            .and_then(|face| face.families.first())
            .map(|(family, _)| family.clone())
            .or(name)
            .ok_or_else(|| anyhow!("font has no family name: {}", source))?;
        // system faces only serve glyphs the configured font lacks
        db.load_system_fonts();

        Ok(Self {
            fontdb: Arc::new(db),
            family,
            source,
            units_per_em,
            ascender,
            descender,
            sample_depth,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn scale(&self, size: u32) -> f32 {
        size as f32 / self.units_per_em
    }

    fn options(&self) -> Options<'static> {
        Options {
            fontdb: self.fontdb.clone(),
            ..Options::default()
        }
    }

    fn text_element(
        &self,
        x: f32,
        baseline: f32,
        size: u32,
        text: &str,
        color: Rgb<u8>,
    ) -> String {
        format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" font-family="{family}" fill="{fill}">{text}</text>"#,
            x = x,
            y = baseline,
            size = size,
            family = escape_xml(&self.family),
            fill = hex_color(color),
            text = escape_xml(&svg_line(text)),
        )
    }

    fn measure(&self, text: &str, size: u32) -> Result<f32> {
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1">{}</svg>"#,
            self.text_element(0.0, size as f32, size, text, Rgb([0, 0, 0]))
        );
        let tree = Tree::from_str(&svg, &self.options())
            .with_context(|| "failed to lay out text for measuring")?;
        Ok(text_advance(tree.root()).unwrap_or(0.0))
    }

    fn render_line(
        &self,
        image: &mut RgbImage,
        x: i32,
        y: i32,
        size: u32,
        text: &str,
        color: Rgb<u8>,
    ) -> Result<()> {
        let scale = self.scale(size);
        let ascent = self.ascender * scale;
        let margin = size as f32;
        let width = (self.text_width(text, size) as f32 + margin * 2.0).ceil();
        let height = ((self.ascender - self.descender) * scale + margin * 2.0).ceil();
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">{text}</svg>"#,
            w = width,
            h = height,
            text = self.text_element(margin, margin + ascent, size, text, color)
        );
        let tree =
            Tree::from_str(&svg, &self.options()).with_context(|| "failed to lay out text")?;
        let size = tree.size().to_int_size();
        let mut pixmap = Pixmap::new(size.width(), size.height())
            .ok_or_else(|| anyhow!("empty text surface"))?;
        resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
        let offset = margin as i32;
        composite(image, &pixmap, x - offset, y - offset);
        Ok(())
    }
}

/// Loads the configured font file, falling back to the first matching
/// system family when the file is missing or unreadable.
pub fn load_font(path: &Path, fallback_families: &[String]) -> Result<FontAsset> {
    let primary = std::fs::read(path)
        .with_context(|| format!("failed to read font: {}", path.display()))
        .and_then(|data| FontAsset::from_data(data, 0, path.display().to_string()));
    let err = match primary {
        Ok(asset) => {
            info!("using font {} ({})", asset.source(), asset.family());
            return Ok(asset);
        }
        Err(err) => err,
    };
    warn!("{:#}; falling back to a system font", err);

    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    for family in fallback_families {
        match load_system_family(&db, family) {
            Ok(asset) => {
                info!("using fallback font {} ({})", asset.source(), asset.family());
                return Ok(asset);
            }
            Err(err) => warn!("{:#}", err),
        }
    }
    Err(anyhow!(
        "no usable font: {} could not be loaded and no fallback family matched",
        path.display()
    ))
}

fn load_system_family(db: &fontdb::Database, family: &str) -> Result<FontAsset> {
    let is_sans = family.eq_ignore_ascii_case("sans-serif");
    let families = if is_sans {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    FontAsset::from_data(data, index, format!("system:{}", family))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

impl Typeface for FontAsset {
    fn text_width(&self, text: &str, size: u32) -> u32 {
        if text.trim().is_empty() {
            return 0;
        }
        match self.measure(text, size) {
            Ok(width) => width.max(0.0).ceil() as u32,
            Err(err) => {
                warn!("{:#}", err);
                0
            }
        }
    }

    /// Distance from the top of a line to the lowest ink of the line
    /// sample, so lines stack the same way regardless of their content.
    fn line_height(&self, size: u32) -> u32 {
        ((self.ascender + self.sample_depth) * self.scale(size)).ceil() as u32
    }

    fn draw_text(
        &self,
        image: &mut RgbImage,
        x: i32,
        y: i32,
        size: u32,
        text: &str,
        color: Rgb<u8>,
    ) {
        if text.trim().is_empty() {
            return;
        }
        if let Err(err) = self.render_line(image, x, y, size, text, color) {
            warn!("failed to draw '{}': {:#}", text, err);
        }
    }
}

/// Advance-based width of the first text element in the tree.
fn text_advance(group: &usvg::Group) -> Option<f32> {
    group.children().iter().find_map(|node| match node {
        usvg::Node::Text(text) => Some(text.bounding_box().width()),
        usvg::Node::Group(group) => text_advance(group),
        _ => None,
    })
}

/// The SVG text shaper lays every line out with a left-to-right base
/// direction. A line that starts right-to-left is wrapped in RLM marks so
/// its edge punctuation stays with the right-to-left run.
fn svg_line(line: &str) -> String {
    match unicode_bidi::get_base_direction(line) {
        Direction::Rtl => format!("{RLM}{line}{RLM}"),
        _ => line.to_string(),
    }
}

/// Source-over blend of a premultiplied pixmap onto an opaque RGB image.
fn composite(image: &mut RgbImage, pixmap: &Pixmap, left: i32, top: i32) {
    let width = pixmap.width() as i32;
    for (idx, src) in pixmap.pixels().iter().enumerate() {
        let alpha = src.alpha() as u32;
        if alpha == 0 {
            continue;
        }
        let x = left + idx as i32 % width;
        let y = top + idx as i32 / width;
        if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
            continue;
        }
        let dst = image.get_pixel_mut(x as u32, y as u32);
        let inverse = 255 - alpha;
        for (channel, value) in [src.red(), src.green(), src.blue()].into_iter().enumerate() {
            let blended = value as u32 + (dst.0[channel] as u32 * inverse + 127) / 255;
            dst.0[channel] = blended.min(255) as u8;
        }
    }
}

fn hex_color(color: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color.0[0], color.0[1], color.0[2])
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
