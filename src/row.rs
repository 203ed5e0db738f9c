//! Stage 2: Tokenizer/Row Grouper (spec §4.1). Clusters a page's tokens into
//! rows by baseline Y with tolerance `ε_y = 0.4·median_char_height`, then
//! sorts each row left to right.

use crate::types::{Page, Row, Token};

pub fn group_rows(page: &Page) -> Vec<Row> {
    group_rows_from_tokens(page.index, &page.tokens)
}

/// Same clustering as [`group_rows`] but over an explicit token set — used
/// when an `OcrProvider` has replaced a page's text-layer tokens with
/// recognized ones (SPEC_FULL §4.13).
pub fn group_rows_from_tokens(page_index: usize, tokens: &[Token]) -> Vec<Row> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let median_height = median_char_height(tokens);
    let epsilon_y = 0.4 * median_height;

    let mut sorted: Vec<&Token> = tokens.iter().collect();
    // PDF y grows upward; top-of-page rows come first in reading order.
    sorted.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(std::cmp::Ordering::Equal));

    let mut rows: Vec<Vec<Token>> = Vec::new();
    let mut baselines: Vec<f32> = Vec::new();

    for tok in sorted {
        if let Some(last) = baselines.last() {
            if (last - tok.y).abs() <= epsilon_y {
                rows.last_mut().unwrap().push(tok.clone());
                continue;
            }
        }
        rows.push(vec![tok.clone()]);
        baselines.push(tok.y);
    }

    rows.into_iter()
        .zip(baselines)
        .map(|(mut tokens, baseline_y)| {
            tokens.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));
            Row {
                tokens,
                baseline_y,
                page_index,
            }
        })
        .collect()
}

fn median_char_height(tokens: &[Token]) -> f32 {
    let mut heights: Vec<f32> = tokens.iter().map(|t| t.height).filter(|h| *h > 0.0).collect();
    if heights.is_empty() {
        return 10.0;
    }
    heights.sort_by(|a, b| a.partial_cmp(b).unwrap());
    heights[heights.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn page_with(tokens: Vec<Token>) -> Page {
        Page {
            index: 0,
            media_box: BoundingBox { x: 0.0, y: 0.0, width: 595.0, height: 842.0 },
            tokens,
            text_layer_used: true,
            text_quality: 1.0,
            requires_ocr: false,
            raster: None,
        }
    }

    fn tok(text: &str, x: f32, y: f32) -> Token {
        Token { text: text.into(), x, y, width: 20.0, height: 10.0, page_index: 0 }
    }

    #[test]
    fn groups_same_baseline_tokens_into_one_row_in_x_order() {
        let page = page_with(vec![tok("World", 50.0, 700.0), tok("Hello", 10.0, 700.2)]);
        let rows = group_rows(&page);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(), "Hello World");
    }

    #[test]
    fn separates_rows_beyond_tolerance() {
        let page = page_with(vec![tok("Top", 10.0, 700.0), tok("Bottom", 10.0, 650.0)]);
        let rows = group_rows(&page);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text(), "Top");
        assert_eq!(rows[1].text(), "Bottom");
    }
}
