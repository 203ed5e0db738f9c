//! Stage 11: Deterministic Fallback (spec §4.9). Runs BEFORE the AI policy
//! gate is ever consulted. Retries alternate parser strategies up to
//! `max_attempts`, re-validating after each; the first attempt reaching
//! `target_confidence` wins. The retry budget lives in exactly one place
//! (spec §9 — breaks the extractor/validator callback cycle).

use crate::header::extract_header;
use crate::lines::{extract_lines, extract_lines_with_tolerance};
use crate::profile::{FallbackConfig, ValidationConfig};
use crate::segment::segment_page;
use crate::types::{InvoiceHeader, InvoiceLine, Row, SegmentKind, ValidationResult};
use crate::validate::validate;

/// Column-clustering tolerance used by attempt (ii)'s re-clustered column
/// inference — wide enough to fold a near-duplicate column (e.g. a
/// discount column sitting close to unit price) into one, which is what
/// "one extra column" collapses down to when the default tolerance splits
/// it out by mistake (spec §4.9).
const WIDE_COLUMN_TOLERANCE: f32 = 20.0;

/// Called after each fallback attempt with its 1-based index and whether it
/// reached the target confidence, so a caller can report progress.
pub type ProgressCallback<'a> = dyn FnMut(usize, bool) + 'a;

pub struct FallbackOutcome {
    pub attempted: bool,
    pub passed: bool,
    pub header: InvoiceHeader,
    pub lines: Vec<InvoiceLine>,
    pub validation: ValidationResult,
}

fn aggregate_confidence(header: &InvoiceHeader, lines: &[InvoiceLine]) -> f64 {
    let header_confidences = [
        header.invoice_number.as_ref().map(|f| f.confidence),
        header.supplier.as_ref().map(|f| f.confidence),
        header.date.as_ref().map(|f| f.confidence),
        header.total_amount.as_ref().map(|f| f.confidence),
    ];
    let header_values: Vec<f64> = header_confidences.into_iter().flatten().collect();
    let line_values: Vec<f64> = lines.iter().map(|l| l.confidence).collect();
    let all: Vec<f64> = header_values.into_iter().chain(line_values).collect();
    if all.is_empty() {
        0.0
    } else {
        all.iter().sum::<f64>() / all.len() as f64
    }
}

/// Attempt (i): re-runs the footer extractor with a looser total-anchor
/// search (matches any row with a trailing amount, not just labeled ones).
fn attempt_looser_total_anchor(all_rows: &[Row], header: &mut InvoiceHeader) {
    if header.total_amount.is_some() {
        return;
    }
    for row in all_rows.iter().rev() {
        let amount_tokens: Vec<_> = row
            .tokens
            .iter()
            .filter(|t| t.text.chars().any(|c| c.is_ascii_digit()))
            .collect();
        if let Some(tok) = amount_tokens.last() {
            if let Ok(amount) = crate::normalize::normalize(&tok.text) {
                header.total_amount = Some(crate::types::FieldValue::new(
                    amount,
                    0.55,
                    Some(crate::types::Traceability {
                        page_index: row.page_index,
                        bbox: tok.bbox(),
                    }),
                ));
                break;
            }
        }
    }
}

/// Attempt (iii): re-runs the segmenter's items range with one extra
/// trailing row folded in, simulating a relaxed row tolerance that
/// recovers a line the default segmentation cut off too early.
fn attempt_relaxed_items_segment(rows: &[Row]) -> Vec<Row> {
    let segments = segment_page(rows, rows.first().map(|r| r.page_index).unwrap_or(0));
    let Some(items) = segments.iter().find(|s| s.kind == SegmentKind::Items) else {
        return Vec::new();
    };
    let relaxed_end = (items.row_range.end + 1).min(rows.len());
    rows[items.row_range.start..relaxed_end].to_vec()
}

fn default_items_rows(rows: &[Row]) -> Vec<Row> {
    let segments = segment_page(rows, rows.first().map(|r| r.page_index).unwrap_or(0));
    let Some(items) = segments.iter().find(|s| s.kind == SegmentKind::Items) else {
        return Vec::new();
    };
    rows[items.row_range.clone()].to_vec()
}

/// Selects one of the three alternate parser strategies from spec §4.9 by
/// 1-based attempt index, cycling if `max_attempts` exceeds 3 (the spec
/// only defines three distinct strategies).
fn run_attempt(attempt: usize, all_rows: &[Row]) -> (InvoiceHeader, Vec<InvoiceLine>) {
    let mut header = extract_header(all_rows);

    let lines = match ((attempt - 1) % 3) + 1 {
        1 => {
            // (i) looser total anchor, default column clustering.
            attempt_looser_total_anchor(all_rows, &mut header);
            let items = default_items_rows(all_rows);
            extract_lines(&items).0
        }
        2 => {
            // (ii) re-clustered column inference with a wider tolerance.
            attempt_looser_total_anchor(all_rows, &mut header);
            let items = default_items_rows(all_rows);
            extract_lines_with_tolerance(&items, WIDE_COLUMN_TOLERANCE).0
        }
        _ => {
            // (iii) relaxed row tolerance on the items segment.
            attempt_looser_total_anchor(all_rows, &mut header);
            let items = attempt_relaxed_items_segment(all_rows);
            extract_lines(&items).0
        }
    };

    (header, lines)
}

/// Runs the deterministic fallback loop. `all_rows` is every row across the
/// invoice's pages (header scan needs the whole page, not just the header
/// segment, for the looser-anchor attempt).
pub fn run_fallback(
    all_rows: &[Row],
    initial_header: &InvoiceHeader,
    initial_lines: &[InvoiceLine],
    initial_validation: &ValidationResult,
    fallback_config: &FallbackConfig,
    validation_config: &ValidationConfig,
    mut progress: Option<&mut ProgressCallback>,
) -> FallbackOutcome {
    if aggregate_confidence(initial_header, initial_lines) >= fallback_config.target_confidence {
        return FallbackOutcome {
            attempted: false,
            passed: false,
            header: initial_header.clone(),
            lines: initial_lines.to_vec(),
            validation: initial_validation.clone(),
        };
    }

    let mut best = FallbackOutcome {
        attempted: true,
        passed: false,
        header: initial_header.clone(),
        lines: initial_lines.to_vec(),
        validation: initial_validation.clone(),
    };
    let mut best_confidence = aggregate_confidence(initial_header, initial_lines);

    for attempt in 1..=fallback_config.max_attempts {
        let (header, lines) = run_attempt(attempt, all_rows);

        let validation = validate(&header, &lines, validation_config);
        let confidence = aggregate_confidence(&header, &lines);
        let passed = confidence >= fallback_config.target_confidence;

        if let Some(cb) = progress.as_deref_mut() {
            cb(attempt, passed);
        }

        if confidence > best_confidence {
            best_confidence = confidence;
            best = FallbackOutcome {
                attempted: true,
                passed,
                header,
                lines,
                validation,
            };
        }

        if passed {
            break;
        }
    }

    best
}
