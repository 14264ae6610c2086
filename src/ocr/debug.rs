use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::info;
use usvg::{Options, Tree, fontdb};

use super::TextRegion;

/// Where OCR debug overlays for one input image are written.
#[derive(Debug, Clone)]
pub struct OcrDebugConfig {
    output_dir: PathBuf,
    base_name: String,
}

impl OcrDebugConfig {
    /// Debug files keep the input's extension in their name, so inputs that
    /// differ only by extension get separate overlays.
    pub fn new(output_dir: &Path, input_path: &Path) -> Self {
        let base = input_path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("input");
        Self {
            output_dir: output_dir.to_path_buf(),
            base_name: sanitize_filename_component(base),
        }
    }

    pub fn overlay_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.ocr.png", self.base_name))
    }

    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.ocr.json", self.base_name))
    }
}

pub fn write_debug_overlay(
    debug: &OcrDebugConfig,
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    regions: &[TextRegion],
) -> Result<()> {
    let svg = render_bbox_svg(image_bytes, image_mime, width, height, regions);
    let bytes = render_svg_bytes(&svg)?;
    let overlay_path = debug.overlay_path();
    std::fs::write(&overlay_path, bytes).with_context(|| {
        format!(
            "failed to write ocr debug image: {}",
            overlay_path.display()
        )
    })?;
    let json_path = debug.json_path();
    let json = serde_json::to_vec_pretty(regions)?;
    std::fs::write(&json_path, json)
        .with_context(|| format!("failed to write ocr debug json: {}", json_path.display()))?;
    info!("debug: wrote ocr bbox {}", overlay_path.display());
    Ok(())
}

pub fn render_bbox_svg(
    image_bytes: &[u8],
    image_mime: &str,
    width: u32,
    height: u32,
    regions: &[TextRegion],
) -> String {
    let encoded = BASE64.encode(image_bytes);
    let data_uri = format!("data:{};base64,{}", image_mime, encoded);

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for region in regions {
        let bbox = region.bbox;
        svg.push_str(&format!(
            r##"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="none" stroke="#00c853" stroke-width="2"/>"##,
            x = bbox.x0,
            y = bbox.y0,
            w = bbox.width().max(0),
            h = bbox.height().max(0)
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Rasterises an SVG document to PNG bytes.
pub fn render_svg_bytes(svg: &str) -> Result<Vec<u8>> {
    let options = Options {
        fontdb: Arc::new(fontdb::Database::new()),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .with_context(|| "failed to encode image from SVG")?;
    Ok(bytes)
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else if ch.is_whitespace() {
            out.push('_');
        }
    }
    if out.is_empty() {
        "input".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::BBox;

    #[test]
    fn bbox_svg_outlines_each_region() {
        let regions = vec![
            TextRegion {
                text: "a".to_string(),
                bbox: BBox {
                    x0: 1,
                    y0: 2,
                    x1: 11,
                    y1: 22,
                },
            },
            TextRegion {
                text: "b".to_string(),
                bbox: BBox {
                    x0: 30,
                    y0: 30,
                    x1: 40,
                    y1: 35,
                },
            },
        ];
        let svg = render_bbox_svg(b"png", "image/png", 64, 48, &regions);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"<rect x="1" y="2" width="10" height="20""#));
        assert!(svg.contains(r#"<rect x="30" y="30" width="10" height="5""#));
        assert_eq!(svg.matches("<rect").count(), 2);
    }

    #[test]
    fn debug_paths_use_sanitized_file_name() {
        let debug = OcrDebugConfig::new(Path::new("out"), Path::new("images/page 01 (1).png"));
        assert_eq!(debug.overlay_path(), Path::new("out/page_01_1.png.ocr.png"));
        assert_eq!(debug.json_path(), Path::new("out/page_01_1.png.ocr.json"));
    }

    #[test]
    fn same_stem_with_different_extensions_do_not_collide() {
        let png = OcrDebugConfig::new(Path::new("out"), Path::new("images/page.png"));
        let jpg = OcrDebugConfig::new(Path::new("out"), Path::new("images/page.jpg"));
        assert_ne!(png.overlay_path(), jpg.overlay_path());
        assert_ne!(png.json_path(), jpg.json_path());
        assert_eq!(jpg.overlay_path(), Path::new("out/page.jpg.ocr.png"));
    }
}
