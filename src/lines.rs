//! Stage 6: Line Extractor (spec §4.5). Infers quantity / unit price / line
//! total columns by clustering the X-centers of numeric tokens across all
//! items rows, then normalizes and validates each row into an `InvoiceLine`.

use crate::normalize::normalize;
use crate::types::{InvoiceLine, Row, Token};
use rust_decimal::Decimal;

const COLUMN_TOLERANCE: f32 = 8.0;

fn is_numeric_like(text: &str) -> bool {
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    digits > 0 && text.chars().all(|c| c.is_ascii_digit() || ".,- ".contains(c))
}

fn numeric_tokens(row: &Row) -> Vec<&Token> {
    row.tokens.iter().filter(|t| is_numeric_like(&t.text)).collect()
}

/// Clusters X-centers into columns; returns column centers in ascending X.
/// `tolerance` governs how close two numeric tokens' centers must be to
/// merge into the same column — widening it is one of the deterministic
/// fallback's alternate strategies (spec §4.9).
fn cluster_columns(rows: &[Row], tolerance: f32) -> Vec<f32> {
    let mut xs: Vec<f32> = rows.iter().flat_map(|r| numeric_tokens(r)).map(|t| t.x + t.width / 2.0).collect();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut columns: Vec<f32> = Vec::new();
    for x in xs.drain(..) {
        match columns.last_mut() {
            Some(last) if (x - *last).abs() <= tolerance => {
                *last = (*last + x) / 2.0;
            }
            _ => columns.push(x),
        }
    }
    columns
}

fn nearest_column(columns: &[f32], x: f32) -> Option<usize> {
    columns
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (**a - x).abs().partial_cmp(&(**b - x).abs()).unwrap())
        .map(|(i, _)| i)
}

struct RawLine {
    description: String,
    quantity_text: Option<String>,
    unit_price_text: Option<String>,
    line_total_text: Option<String>,
    row_index: usize,
}

fn extract_row(row: &Row, row_index: usize, columns: &[f32]) -> RawLine {
    let nums = numeric_tokens(row);
    if columns.len() < 2 || nums.is_empty() {
        return RawLine {
            description: row.text(),
            quantity_text: None,
            unit_price_text: None,
            line_total_text: None,
            row_index,
        };
    }

    let total_col = columns.len() - 1;
    let price_col = columns.len().saturating_sub(2);
    let qty_col = 0;

    let mut quantity_text = None;
    let mut unit_price_text = None;
    let mut line_total_text = None;
    let mut leftmost_numeric_x = f32::MAX;

    for tok in &nums {
        let center = tok.x + tok.width / 2.0;
        let Some(col) = nearest_column(columns, center) else { continue };
        if col == total_col {
            line_total_text = Some(tok.text.clone());
        } else if col == price_col && price_col != total_col {
            unit_price_text = Some(tok.text.clone());
        } else if col == qty_col && qty_col != price_col && qty_col != total_col {
            quantity_text = Some(tok.text.clone());
        }
        leftmost_numeric_x = leftmost_numeric_x.min(tok.x);
    }

    let description = row
        .tokens
        .iter()
        .filter(|t| t.x < leftmost_numeric_x && !is_numeric_like(&t.text))
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    RawLine {
        description,
        quantity_text,
        unit_price_text,
        line_total_text,
        row_index,
    }
}

fn is_wrapped_continuation(raw: &RawLine) -> bool {
    raw.line_total_text.is_none() && raw.quantity_text.is_none() && raw.unit_price_text.is_none()
}

/// Extracts invoice lines from the rows of an items segment. A row whose
/// `line_total` fails to parse and which lacks at least one of
/// {quantity, unit_price} is dropped with the caller expected to record a
/// `line_parse_failed` warning (spec §4.5).
pub fn extract_lines(rows: &[Row]) -> (Vec<InvoiceLine>, Vec<String>) {
    extract_lines_with_tolerance(rows, COLUMN_TOLERANCE)
}

/// Same as [`extract_lines`] but with an explicit column-clustering
/// tolerance, used by the deterministic fallback's re-clustered-columns
/// strategy (spec §4.9).
pub fn extract_lines_with_tolerance(rows: &[Row], tolerance: f32) -> (Vec<InvoiceLine>, Vec<String>) {
    let columns = cluster_columns(rows, tolerance);
    let mut raw_lines: Vec<RawLine> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let raw = extract_row(row, i, &columns);
        if is_wrapped_continuation(&raw) {
            if let Some(prev) = raw_lines.last_mut() {
                prev.description = format!("{} {}", prev.description, raw.description).trim().to_string();
                continue;
            }
        }
        raw_lines.push(raw);
    }

    let mut lines = Vec::new();
    let mut warnings = Vec::new();

    for raw in raw_lines {
        let line_total: Option<Decimal> = raw.line_total_text.as_deref().and_then(|s| normalize(s).ok());
        let quantity: Option<Decimal> = raw.quantity_text.as_deref().and_then(|s| normalize(s).ok());
        let unit_price: Option<Decimal> = raw.unit_price_text.as_deref().and_then(|s| normalize(s).ok());

        let Some(line_total) = line_total else {
            warnings.push(format!("line_parse_failed: row {}", raw.row_index));
            continue;
        };
        if quantity.is_none() && unit_price.is_none() {
            warnings.push(format!("line_parse_failed: row {}", raw.row_index));
            continue;
        }

        let confidence = 0.5
            + if quantity.is_some() { 0.2 } else { 0.0 }
            + if unit_price.is_some() { 0.2 } else { 0.0 }
            + 0.1;

        lines.push(InvoiceLine {
            description: raw.description.trim().to_string(),
            quantity: quantity.unwrap_or(Decimal::ONE),
            unit: None,
            unit_price: unit_price.unwrap_or(line_total),
            discount: None,
            line_total,
            confidence: confidence.min(1.0),
            source_rows: vec![raw.row_index],
        });
    }

    (lines, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn token(text: &str, x: f32) -> Token {
        Token { text: text.into(), x, y: 0.0, width: 20.0, height: 10.0, page_index: 0 }
    }

    fn row(tokens: Vec<Token>) -> Row {
        Row { tokens, baseline_y: 0.0, page_index: 0 }
    }

    #[test]
    fn extracts_quantity_price_and_total() {
        let rows = vec![row(vec![
            token("Widget", 0.0),
            token("2", 200.0),
            token("100,00", 260.0),
            token("200,00", 320.0),
        ])];
        let (lines, warnings) = extract_lines(&rows);
        assert!(warnings.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].description, "Widget");
        assert_eq!(lines[0].quantity, dec!(2));
        assert_eq!(lines[0].unit_price, dec!(100.00));
        assert_eq!(lines[0].line_total, dec!(200.00));
    }

    #[test]
    fn merges_wrapped_description_row() {
        let rows = vec![
            row(vec![token("Widget", 0.0), token("2", 200.0), token("100,00", 260.0), token("200,00", 320.0)]),
            row(vec![token("(backordered)", 0.0)]),
        ];
        let (lines, _warnings) = extract_lines(&rows);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].description.contains("backordered"));
    }

    #[test]
    fn drops_row_with_no_parsable_amounts() {
        let rows = vec![row(vec![token("Note:", 0.0), token("see terms", 100.0)])];
        let (lines, warnings) = extract_lines(&rows);
        assert!(lines.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn wider_tolerance_merges_close_columns() {
        let rows = vec![row(vec![token("100,00", 0.0), token("110,00", 15.0)])];
        let (narrow, _) = extract_lines_with_tolerance(&rows, 8.0);
        let (wide, warnings) = extract_lines_with_tolerance(&rows, 20.0);
        assert_eq!(narrow.len(), 1);
        assert!(wide.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
