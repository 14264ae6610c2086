//! Fitting translated text into a rectangle: greedy word wrap, a
//! shrink-to-fit search over font sizes, and per-line centering.

mod font;

use image::{Rgb, RgbImage};

pub use font::{FontAsset, load_font};

/// Measurement and drawing primitives of a font face at a pixel size.
pub trait Typeface: Send + Sync {
    /// Advance width of `text` at `size`, in whole pixels.
    fn text_width(&self, text: &str, size: u32) -> u32;
    /// Height of one line at `size`, in whole pixels.
    fn line_height(&self, size: u32) -> u32;
    /// Draws `text` with its top-left corner at `(x, y)`. Lines arrive in
    /// logical order; shaping and bidi reordering are the face's job.
    fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, size: u32, text: &str, color: Rgb<u8>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitParams {
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub step: u32,
    pub line_gap: u32,
    /// Emit an empty first line when the first word alone is wider than
    /// the box.
    pub blank_line_before_long_word: bool,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            max_font_size: 23,
            min_font_size: 18,
            step: 2,
            line_gap: 4,
            blank_line_before_long_word: false,
        }
    }
}

impl FitParams {
    /// Sizes tried by the search, largest first: `max, max - step, ...`
    /// while not below `min`.
    pub fn candidate_sizes(&self) -> Vec<u32> {
        let step = self.step.max(1);
        let mut sizes = Vec::new();
        let mut size = self.max_font_size;
        while size >= self.min_font_size && size > 0 {
            sizes.push(size);
            match size.checked_sub(step) {
                Some(next) => size = next,
                None => break,
            }
        }
        sizes
    }
}

/// One display-ready line, positioned relative to the box's top-left
/// corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutResult {
    pub lines: Vec<LayoutLine>,
    pub font_size: u32,
    pub line_height: u32,
    pub total_height: u32,
    /// False when even the smallest size overflows the box vertically.
    pub fits: bool,
}

/// Greedy word wrap against measured widths. A word wider than
/// `max_width` is emitted alone on its own line, unmodified. With
/// `blank_line_before_long_word` an over-wide first word is preceded by an
/// empty line.
pub fn wrap_text(
    text: &str,
    face: &dyn Typeface,
    size: u32,
    max_width: u32,
    blank_line_before_long_word: bool,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if face.text_width(&candidate, size) <= max_width {
            current = candidate;
        } else {
            if !current.is_empty() || (lines.is_empty() && blank_line_before_long_word) {
                lines.push(std::mem::take(&mut current));
            }
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn block_height(line_height: u32, line_count: usize, gap: u32) -> u32 {
    if line_count == 0 {
        return 0;
    }
    let count = line_count as u32;
    line_height * count + gap * (count - 1)
}

struct Attempt {
    size: u32,
    lines: Vec<String>,
    line_height: u32,
    total_height: u32,
}

fn attempt(
    text: &str,
    face: &dyn Typeface,
    size: u32,
    box_width: u32,
    params: &FitParams,
) -> Attempt {
    let lines = wrap_text(
        text,
        face,
        size,
        box_width,
        params.blank_line_before_long_word,
    );
    let line_height = face.line_height(size);
    let total_height = block_height(line_height, lines.len(), params.line_gap);
    Attempt {
        size,
        lines,
        line_height,
        total_height,
    }
}

/// Chooses the largest candidate size whose wrapped block fits
/// `box_height`, falling back to the minimum size (and accepting overflow)
/// when none does, then centers every line in the box.
pub fn fit(
    text: &str,
    box_width: u32,
    box_height: u32,
    face: &dyn Typeface,
    params: &FitParams,
) -> LayoutResult {
    let gap = params.line_gap;
    let chosen = params
        .candidate_sizes()
        .into_iter()
        .map(|size| attempt(text, face, size, box_width, params))
        .find(|attempt| attempt.total_height <= box_height);
    let fits = chosen.is_some();
    let chosen =
        chosen.unwrap_or_else(|| attempt(text, face, params.min_font_size, box_width, params));

    let top = (box_height as i32 - chosen.total_height as i32).div_euclid(2);
    let advance = (chosen.line_height + gap) as i32;
    let lines = chosen
        .lines
        .into_iter()
        .enumerate()
        .map(|(idx, text)| {
            let width = face.text_width(&text, chosen.size);
            LayoutLine {
                x: (box_width as i32 - width as i32).div_euclid(2),
                y: top + idx as i32 * advance,
                width,
                text,
            }
        })
        .collect();

    LayoutResult {
        lines,
        font_size: chosen.size,
        line_height: chosen.line_height,
        total_height: chosen.total_height,
        fits,
    }
}
