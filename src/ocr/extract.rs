use tracing::debug;

use super::{BBox, Paragraph, TextAnnotation, TextRegion};

const NOISE_MAX_CHARS: usize = 6;
const NOISE_MIN_AREA: i64 = 40_000;

/// Flattens the annotation tree into one region per paragraph, in tree
/// order, dropping paragraphs that look like graphics rather than text.
pub fn extract_regions(annotation: &TextAnnotation) -> Vec<TextRegion> {
    let mut regions = Vec::new();
    for page in &annotation.pages {
        for block in &page.blocks {
            for paragraph in &block.paragraphs {
                let Some(region) = paragraph_region(paragraph) else {
                    continue;
                };
                if is_noise(&region) {
                    debug!(
                        "dropping noise region '{}' at {:?}",
                        region.text, region.bbox
                    );
                    continue;
                }
                regions.push(region);
            }
        }
    }
    regions
}

/// Short text over a large area is almost always a logo or artwork picked
/// up by document text detection.
pub fn is_noise(region: &TextRegion) -> bool {
    let short_and_large =
        region.text.chars().count() <= NOISE_MAX_CHARS && region.bbox.area() > NOISE_MIN_AREA;
    short_and_large || !region.text.chars().any(is_word_char)
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn paragraph_region(paragraph: &Paragraph) -> Option<TextRegion> {
    let mut words = Vec::with_capacity(paragraph.words.len());
    let mut bounds: Option<BBox> = None;

    for word in &paragraph.words {
        let token = word
            .symbols
            .iter()
            .map(|symbol| symbol.text.as_str())
            .collect::<String>();
        words.push(token);

        let vertices = word
            .bounding_box
            .as_ref()
            .map(|poly| poly.vertices.as_slice())
            .unwrap_or_default();
        for vertex in vertices {
            bounds = Some(match bounds {
                None => BBox {
                    x0: vertex.x,
                    y0: vertex.y,
                    x1: vertex.x,
                    y1: vertex.y,
                },
                Some(b) => BBox {
                    x0: b.x0.min(vertex.x),
                    y0: b.y0.min(vertex.y),
                    x1: b.x1.max(vertex.x),
                    y1: b.y1.max(vertex.y),
                },
            });
        }
    }

    let bbox = bounds?;
    let text = words.join(" ").trim().to_string();
    Some(TextRegion { text, bbox })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{Block, BoundingPoly, Page, Symbol, Vertex, Word};

    fn word(text: &str, vertices: &[(i32, i32)]) -> Word {
        Word {
            bounding_box: Some(BoundingPoly {
                vertices: vertices.iter().map(|&(x, y)| Vertex { x, y }).collect(),
            }),
            symbols: text
                .chars()
                .map(|ch| Symbol {
                    text: ch.to_string(),
                })
                .collect(),
        }
    }

    fn rect(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<(i32, i32)> {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    fn annotation(paragraphs: Vec<Vec<Word>>) -> TextAnnotation {
        TextAnnotation {
            pages: vec![Page {
                blocks: vec![Block {
                    paragraphs: paragraphs
                        .into_iter()
                        .map(|words| Paragraph { words })
                        .collect(),
                }],
            }],
        }
    }

    #[test]
    fn bbox_spans_every_vertex_of_every_word() {
        let tree = annotation(vec![vec![
            word("Hello", &rect(10, 12, 60, 40)),
            word("world", &[(64, 10), (110, 14), (108, 38), (66, 39)]),
        ]]);
        let regions = extract_regions(&tree);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "Hello world");
        assert_eq!(
            regions[0].bbox,
            BBox {
                x0: 10,
                y0: 10,
                x1: 110,
                y1: 40
            }
        );
    }

    #[test]
    fn keeps_tree_order_across_blocks_and_pages() {
        let mut tree = annotation(vec![vec![word("second", &rect(0, 200, 80, 220))]]);
        tree.pages.insert(
            0,
            Page {
                blocks: vec![Block {
                    paragraphs: vec![Paragraph {
                        words: vec![word("first", &rect(0, 300, 80, 320))],
                    }],
                }],
            },
        );
        let texts = extract_regions(&tree)
            .into_iter()
            .map(|region| region.text)
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn short_text_over_large_area_is_noise() {
        let tree = annotation(vec![
            vec![word("LOGO", &rect(0, 0, 300, 300))],
            vec![word("LOGO", &rect(0, 0, 100, 100))],
            vec![word("Longer text", &rect(0, 0, 300, 300))],
        ]);
        let regions = extract_regions(&tree);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].bbox.area(), 10_000);
        assert_eq!(regions[1].text, "Longer text");
    }

    #[test]
    fn area_exactly_at_threshold_is_kept() {
        let region = TextRegion {
            text: "BANG".to_string(),
            bbox: BBox {
                x0: 0,
                y0: 0,
                x1: 200,
                y1: 200,
            },
        };
        assert!(!is_noise(&region));
    }

    #[test]
    fn text_without_word_characters_is_noise() {
        let tree = annotation(vec![
            vec![word("...", &rect(0, 0, 20, 20)), word("!?", &rect(22, 0, 30, 20))],
            vec![word("_", &rect(0, 0, 5, 5))],
        ]);
        let regions = extract_regions(&tree);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "_");
    }

    #[test]
    fn missing_coordinates_count_as_zero() {
        let json = r#"{"pages":[{"blocks":[{"paragraphs":[{"words":[
            {"boundingBox":{"vertices":[{"y":5},{"x":40,"y":5},{"x":40,"y":25},{"y":25}]},
             "symbols":[{"text":"H"},{"text":"i"}]}
        ]}]}]}]}"#;
        let tree: TextAnnotation = serde_json::from_str(json).unwrap();
        let regions = extract_regions(&tree);
        assert_eq!(
            regions[0].bbox,
            BBox {
                x0: 0,
                y0: 5,
                x1: 40,
                y1: 25
            }
        );
    }

    #[test]
    fn paragraph_without_geometry_is_skipped() {
        let tree = annotation(vec![vec![Word {
            bounding_box: None,
            symbols: vec![Symbol {
                text: "x".to_string(),
            }],
        }]]);
        assert!(extract_regions(&tree).is_empty());
    }
}
