//! Orchestrates stages 1-11 end to end (spec §2). Single-threaded per
//! document (spec §5): a caller processes multiple documents in parallel by
//! running independent `Pipeline` instances against the same immutable
//! `Profile` and `CalibrationRegistry`.

use crate::ai_policy::{evaluate_ai_policy, evaluate_edi_signals, ExtractionSourceKind};
use crate::boundary::detect_boundaries;
use crate::compare::{adopt_better_with_source, Candidate};
use crate::error::{ExtractError, Result};
use crate::fallback::{run_fallback, ProgressCallback};
use crate::footer::extract_footer;
use crate::header::extract_header;
use crate::lines::extract_lines;
use crate::normalize::normalize;
use crate::pdf::PdfContainer;
use crate::profile::{Profile, ValidationConfig};
use crate::provider::{AiCorrection, AiError, AiProvider, CancellationToken, OcrProvider, PageImage};
use crate::row::{group_rows, group_rows_from_tokens};
use crate::segment::{detect_split_page_suspected, segment_page};
use crate::types::{
    AIPolicyDecision, BoundaryDecision, Document, ExtractionDetail, ExtractionSource, FieldValue,
    InvoiceGroup, InvoiceHeader, InvoiceResult, Page, Row, Segment, SegmentKind, Token,
    ValidationStatus,
};
use crate::validate::{critical_fields_present, validate};
use tracing::instrument;

const AI_CORRECTION_CONFIDENCE: f64 = 0.6;

/// Rows on one page matching `kind`, given that page's own segments and rows.
fn rows_for_kind(segments: &[Segment], page_rows: &[Row], kind: SegmentKind) -> Vec<Row> {
    segments
        .iter()
        .filter(|s| s.kind == kind)
        .flat_map(|s| page_rows[s.row_range.clone()].iter().cloned())
        .collect()
}

/// Row grouping for one page, consulting the caller's `OcrProvider` when the
/// page has no usable text layer and carries a pre-rendered raster
/// (SPEC_FULL §4.13). Falls back to the page's own (possibly empty)
/// text-layer tokens when no provider or raster is available.
fn page_rows_for(page: &Page, ocr_provider: Option<&dyn OcrProvider>) -> Vec<Row> {
    if page.requires_ocr {
        if let (Some(provider), Some(raster)) = (ocr_provider, page.raster.as_ref()) {
            let image = PageImage {
                page_index: page.index,
                width: raster.width,
                height: raster.height,
                rgb8: raster.rgb8.clone(),
            };
            if let Ok(tokens) = provider.recognize(&image) {
                return group_rows_from_tokens(page.index, &tokens);
            }
        }
    }
    group_rows(page)
}

/// The header/items/footer/all-rows views of one invoice group, the input
/// to stages 5-9.
struct GroupRows {
    header: Vec<Row>,
    items: Vec<Row>,
    footer: Vec<Row>,
    all: Vec<Row>,
}

fn collect_group_rows(group: &InvoiceGroup, page_rows: &[Vec<Row>], page_segments: &[Vec<Segment>]) -> GroupRows {
    GroupRows {
        header: group
            .pages
            .iter()
            .flat_map(|&p| rows_for_kind(&page_segments[p], &page_rows[p], SegmentKind::Header))
            .collect(),
        items: group
            .pages
            .iter()
            .flat_map(|&p| rows_for_kind(&page_segments[p], &page_rows[p], SegmentKind::Items))
            .collect(),
        footer: group
            .pages
            .iter()
            .flat_map(|&p| rows_for_kind(&page_segments[p], &page_rows[p], SegmentKind::Footer))
            .collect(),
        all: group.pages.iter().flat_map(|&p| page_rows[p].clone()).collect(),
    }
}

/// Stages 5-9 (Header/Line/Footer Extractors, Number Normalizer, Validator)
/// over one group's rows.
fn extract_candidate(rows: &GroupRows, validation_config: &ValidationConfig) -> Candidate {
    let mut header = extract_header(&rows.header);
    extract_footer(&rows.footer, &mut header);
    let (lines, line_warnings) = extract_lines(&rows.items);
    let mut validation = validate(&header, &lines, validation_config);
    validation.warnings.extend(line_warnings);
    Candidate { header, lines, validation }
}

/// Stage 11: retries alternate parsers when validation did not pass,
/// reporting whether fallback ran and whether it then passed — both feed
/// the AI policy gate regardless of whether the result is adopted.
fn apply_fallback(
    candidate: Candidate,
    all_rows: &[Row],
    fallback_config: &crate::profile::FallbackConfig,
    validation_config: &ValidationConfig,
    progress: Option<&mut ProgressCallback>,
) -> (Candidate, bool, bool) {
    if matches!(candidate.validation.status, ValidationStatus::Ok) {
        return (candidate, false, false);
    }

    let outcome = run_fallback(
        all_rows,
        &candidate.header,
        &candidate.lines,
        &candidate.validation,
        fallback_config,
        validation_config,
        progress,
    );

    if outcome.attempted && matches!(outcome.validation.status, ValidationStatus::Ok | ValidationStatus::Partial) {
        (
            Candidate { header: outcome.header, lines: outcome.lines, validation: outcome.validation },
            outcome.attempted,
            outcome.passed,
        )
    } else {
        (candidate, outcome.attempted, outcome.passed)
    }
}

fn ai_context(candidate: &Candidate) -> String {
    serde_json::json!({
        "header": candidate.header,
        "lines": candidate.lines,
        "validation": candidate.validation,
    })
    .to_string()
}

fn apply_ai_correction(header: &mut InvoiceHeader, correction: AiCorrection) {
    if header.invoice_number.is_none() {
        if let Some(value) = correction.invoice_number {
            header.invoice_number = Some(FieldValue::new(value, AI_CORRECTION_CONFIDENCE, None));
        }
    }
    if header.supplier.is_none() {
        if let Some(value) = correction.supplier {
            header.supplier = Some(FieldValue::new(value, AI_CORRECTION_CONFIDENCE, None));
        }
    }
    if header.total_amount.is_none() {
        if let Some(raw) = correction.total_amount {
            if let Ok(value) = normalize(&raw) {
                header.total_amount = Some(FieldValue::new(value, AI_CORRECTION_CONFIDENCE, None));
            }
        }
    }
}

/// Stage 10's consultation leg: invokes the caller-supplied `AiProvider`
/// when the policy gate allowed it, applies any returned correction, and
/// enforces the scenario-6 override — if critical fields are still missing
/// after consultation, the result is FAILED rather than silently left as-is.
fn consult_ai(
    ai_provider: Option<&dyn AiProvider>,
    candidate: Candidate,
    ai_policy: &AIPolicyDecision,
    validation_config: &ValidationConfig,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Result<Candidate> {
    if !ai_policy.allow_ai {
        return Ok(candidate);
    }
    let Some(provider) = ai_provider else {
        return Ok(candidate);
    };

    let context = ai_context(&candidate);
    match provider.complete(&context, std::time::Duration::from_millis(timeout_ms), cancel) {
        Ok(correction) => {
            let mut header = candidate.header;
            apply_ai_correction(&mut header, correction);
            let mut validation = validate(&header, &candidate.lines, validation_config);
            if !critical_fields_present(&header) {
                validation.status = ValidationStatus::Failed;
                validation.errors.push("AI consultation could not recover critical fields".to_string());
            }
            Ok(Candidate { header, lines: candidate.lines, validation })
        }
        Err(AiError::Cancelled) => Err(ExtractError::Cancelled),
        Err(other) => {
            // Per spec §7: AIUnavailable is non-fatal when allow_ai=false,
            // but here allow_ai=true, so it becomes ValidationFailed.
            let mut validation = candidate.validation;
            validation.status = ValidationStatus::Failed;
            validation.errors.push(ExtractError::AIUnavailable(other.to_string()).to_string());
            Ok(Candidate { header: candidate.header, lines: candidate.lines, validation })
        }
    }
}

/// Runs the extraction pipeline over an already-loaded `Document` and
/// returns one `InvoiceResult` per detected invoice, in document order.
#[instrument(skip(document, profile, progress, cancel, ai_provider, ocr_provider))]
#[allow(clippy::too_many_arguments)]
pub fn run(
    document: &Document,
    profile: &Profile,
    cancel: &CancellationToken,
    mut progress: Option<&mut ProgressCallback>,
    ai_provider: Option<&dyn AiProvider>,
    ocr_provider: Option<&dyn OcrProvider>,
) -> Result<Vec<InvoiceResult>> {
    if document.pages.is_empty() {
        return Err(ExtractError::EmptyDocument);
    }

    let page_rows: Vec<Vec<Row>> = document.pages.iter().map(|p| page_rows_for(p, ocr_provider)).collect();
    let page_segments: Vec<Vec<Segment>> = page_rows
        .iter()
        .enumerate()
        .map(|(i, rows)| segment_page(rows, i))
        .collect();

    let page_header_rows: Vec<Vec<Row>> = page_segments
        .iter()
        .zip(&page_rows)
        .map(|(segments, rows)| rows_for_kind(segments, rows, SegmentKind::Header))
        .collect();

    let (groups, boundary_log) = detect_boundaries(&page_header_rows, &page_rows);

    let mut results = Vec::with_capacity(groups.len());

    for group in &groups {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let rows = collect_group_rows(group, &page_rows, &page_segments);
        let candidate = extract_candidate(&rows, &profile.validation);
        let (candidate, fallback_attempted, fallback_passed) =
            apply_fallback(candidate, &rows.all, &profile.fallback, &profile.validation, progress.as_deref_mut());

        let text_quality = group
            .pages
            .iter()
            .map(|&p| document.pages[p].text_quality)
            .sum::<f64>()
            / group.pages.len().max(1) as f64;
        let text_layer_used = group.pages.iter().all(|&p| document.pages[p].text_layer_used);

        let edi_signals = evaluate_edi_signals(
            text_layer_used,
            &format!("{} {}", header_rows_text(&rows.header), footer_rows_text(&rows.footer)),
            &rows.items,
            &profile.ai_policy,
            text_quality,
        );

        let source_kind = if text_layer_used { ExtractionSourceKind::TextLayer } else { ExtractionSourceKind::Ocr };
        let ai_policy: AIPolicyDecision = evaluate_ai_policy(
            source_kind,
            text_quality,
            &candidate.validation,
            &edi_signals,
            &profile.ai_policy,
            fallback_attempted,
            fallback_passed,
        );

        let candidate = consult_ai(
            ai_provider,
            candidate,
            &ai_policy,
            &profile.validation,
            profile.ai_policy.ai_timeout_ms,
            cancel,
        )?;

        let mut boundary_decision_log: Vec<_> = boundary_log
            .iter()
            .filter(|d| group.pages.contains(&d.page_index))
            .cloned()
            .collect();

        let mut validation = candidate.validation;
        for &p in &group.pages {
            if detect_split_page_suspected(&page_rows[p]) {
                boundary_decision_log.push(BoundaryDecision {
                    page_index: p,
                    decision: "split_page_suspected".to_string(),
                    reasons: vec!["two_total_anchors_with_header_between".to_string()],
                });
                validation
                    .warnings
                    .push(ExtractError::SegmentMissing("split page suspected".to_string()).to_string());
            }
        }

        results.push(InvoiceResult {
            header: candidate.header,
            lines: candidate.lines,
            validation,
            extraction_detail: ExtractionDetail {
                method_used: if fallback_attempted { "deterministic_fallback".into() } else { "primary".into() },
                text_layer_used,
                text_quality,
                ai_policy: Some(ai_policy),
                boundary_decision_log,
                source: if text_layer_used { ExtractionSource::TextLayer } else { ExtractionSource::Ocr },
            },
        });
    }

    Ok(results)
}

/// Dual-source extraction (spec §4.10). Stages 5-9 run once per token
/// source over the same page boundaries; `compare::adopt_better` scores the
/// two resulting candidates, and the AI policy gate (stage 10) runs exactly
/// once on the winner — never per-candidate — to preserve P4 policy parity.
///
/// Boundary detection (stage 4) runs once, against `document`'s own tokens:
/// the two sources are only assumed to agree on *what* a page contains, not
/// on which pages the boundary detector would group, so `secondary_tokens`
/// supplies an alternate per-page token set (e.g. OCR output) that is
/// segmented and extracted within the primary grouping.
#[instrument(skip(document, secondary_tokens, profile, progress, cancel, ai_provider))]
pub fn run_compare(
    document: &Document,
    secondary_tokens: &[Vec<Token>],
    profile: &Profile,
    cancel: &CancellationToken,
    mut progress: Option<&mut ProgressCallback>,
    ai_provider: Option<&dyn AiProvider>,
) -> Result<Vec<InvoiceResult>> {
    if document.pages.is_empty() {
        return Err(ExtractError::EmptyDocument);
    }
    if secondary_tokens.len() != document.pages.len() {
        return Err(ExtractError::InternalInvariant(
            "compare path requires one secondary token set per page".to_string(),
        ));
    }

    let primary_rows: Vec<Vec<Row>> = document.pages.iter().map(group_rows).collect();
    let primary_segments: Vec<Vec<Segment>> = primary_rows
        .iter()
        .enumerate()
        .map(|(i, rows)| segment_page(rows, i))
        .collect();

    let secondary_rows: Vec<Vec<Row>> = secondary_tokens
        .iter()
        .enumerate()
        .map(|(i, tokens)| group_rows_from_tokens(i, tokens))
        .collect();
    let secondary_segments: Vec<Vec<Segment>> = secondary_rows
        .iter()
        .enumerate()
        .map(|(i, rows)| segment_page(rows, i))
        .collect();

    let page_header_rows: Vec<Vec<Row>> = primary_segments
        .iter()
        .zip(&primary_rows)
        .map(|(segments, rows)| rows_for_kind(segments, rows, SegmentKind::Header))
        .collect();
    let (groups, boundary_log) = detect_boundaries(&page_header_rows, &primary_rows);

    let mut results = Vec::with_capacity(groups.len());

    for group in &groups {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let rows_a = collect_group_rows(group, &primary_rows, &primary_segments);
        let rows_b = collect_group_rows(group, &secondary_rows, &secondary_segments);

        let candidate_a = extract_candidate(&rows_a, &profile.validation);
        let candidate_b = extract_candidate(&rows_b, &profile.validation);

        let (candidate, b_won) = adopt_better_with_source(candidate_a, candidate_b);
        let adopted_rows = if b_won { &rows_b } else { &rows_a };

        let (candidate, fallback_attempted, fallback_passed) = apply_fallback(
            candidate,
            &adopted_rows.all,
            &profile.fallback,
            &profile.validation,
            progress.as_deref_mut(),
        );

        let text_quality = group
            .pages
            .iter()
            .map(|&p| document.pages[p].text_quality)
            .sum::<f64>()
            / group.pages.len().max(1) as f64;
        let text_layer_used = group.pages.iter().all(|&p| document.pages[p].text_layer_used);

        let edi_signals = evaluate_edi_signals(
            text_layer_used,
            &format!(
                "{} {}",
                header_rows_text(&adopted_rows.header),
                footer_rows_text(&adopted_rows.footer)
            ),
            &adopted_rows.items,
            &profile.ai_policy,
            text_quality,
        );

        let source_kind = if text_layer_used { ExtractionSourceKind::TextLayer } else { ExtractionSourceKind::Ocr };
        let ai_policy: AIPolicyDecision = evaluate_ai_policy(
            source_kind,
            text_quality,
            &candidate.validation,
            &edi_signals,
            &profile.ai_policy,
            fallback_attempted,
            fallback_passed,
        );

        let candidate = consult_ai(
            ai_provider,
            candidate,
            &ai_policy,
            &profile.validation,
            profile.ai_policy.ai_timeout_ms,
            cancel,
        )?;

        let boundary_decision_log: Vec<_> = boundary_log
            .iter()
            .filter(|d| group.pages.contains(&d.page_index))
            .cloned()
            .collect();

        results.push(InvoiceResult {
            header: candidate.header,
            lines: candidate.lines,
            validation: candidate.validation,
            extraction_detail: ExtractionDetail {
                method_used: if fallback_attempted { "deterministic_fallback".into() } else { "compare".into() },
                text_layer_used,
                text_quality,
                ai_policy: Some(ai_policy),
                boundary_decision_log,
                source: ExtractionSource::CompareAdopted,
            },
        });
    }

    Ok(results)
}

fn header_rows_text(rows: &[Row]) -> String {
    rows.iter().map(|r| r.text()).collect::<Vec<_>>().join(" ")
}

fn footer_rows_text(rows: &[Row]) -> String {
    rows.iter().map(|r| r.text()).collect::<Vec<_>>().join(" ")
}

/// Convenience entry point: loads a PDF from bytes and runs the pipeline.
#[allow(clippy::too_many_arguments)]
pub fn extract_from_bytes(
    bytes: &[u8],
    profile: &Profile,
    cancel: &CancellationToken,
    progress: Option<&mut ProgressCallback>,
    ai_provider: Option<&dyn AiProvider>,
    ocr_provider: Option<&dyn OcrProvider>,
) -> Result<Vec<InvoiceResult>> {
    let document = PdfContainer::load(bytes)?;
    run(&document, profile, cancel, progress, ai_provider, ocr_provider)
}
