//! Text detection: the OCR annotation tree, the regions extracted from it,
//! and the collaborator that produces the tree.

mod debug;
mod extract;
mod vision;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub use debug::{OcrDebugConfig, render_bbox_svg, render_svg_bytes, write_debug_overlay};
pub use extract::{extract_regions, is_noise};
pub use vision::{GoogleVision, parse_annotate_response};

/// Axis-aligned rectangle in pixel coordinates; `x1`/`y1` are inclusive
/// maxima taken from polygon vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BBox {
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextRegion {
    pub text: String,
    pub bbox: BBox,
}

/// Document text annotation as returned by the OCR service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAnnotation {
    #[serde(default)]
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Page {
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Block {
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Paragraph {
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    #[serde(default)]
    pub bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Symbol {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BoundingPoly {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

/// The wire format drops zero coordinates, so both default to 0.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

pub type OcrFuture<'a> = Pin<Box<dyn Future<Output = Result<TextAnnotation>> + Send + 'a>>;

pub trait OcrProvider: Send + Sync {
    /// Runs document text detection on encoded image bytes. An error from
    /// the service is returned as `Err`; there is no partial result.
    fn annotate<'a>(&'a self, image_bytes: &'a [u8]) -> OcrFuture<'a>;
}
