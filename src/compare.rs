//! Compare path support (spec §4.10). `pipeline::run_compare` runs stages
//! 5-9 twice, once per token source, against the same invoice grouping;
//! this module scores the two resulting candidates and adopts the better
//! one. The AI policy gate must run exactly once on the adopted candidate
//! (P4 policy parity) — callers must not call `evaluate_ai_policy`
//! per-candidate.

use crate::types::{InvoiceHeader, InvoiceLine, ValidationResult, ValidationStatus};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub header: InvoiceHeader,
    pub lines: Vec<InvoiceLine>,
    pub validation: ValidationResult,
}

fn status_rank(status: ValidationStatus) -> u8 {
    match status {
        ValidationStatus::Ok => 3,
        ValidationStatus::Partial => 2,
        ValidationStatus::Review => 1,
        ValidationStatus::Failed => 0,
    }
}

fn critical_field_confidence_sum(header: &InvoiceHeader) -> f64 {
    [
        header.invoice_number.as_ref().map(|f| f.confidence),
        header.supplier.as_ref().map(|f| f.confidence),
        header.date.as_ref().map(|f| f.confidence),
        header.total_amount.as_ref().map(|f| f.confidence),
    ]
    .into_iter()
    .flatten()
    .sum()
}

fn score(candidate: &Candidate) -> (u8, f64, usize) {
    (
        status_rank(candidate.validation.status),
        critical_field_confidence_sum(&candidate.header),
        candidate.lines.len(),
    )
}

fn b_beats_a(a: (u8, f64, usize), b: (u8, f64, usize)) -> bool {
    if b.0 != a.0 {
        return b.0 > a.0;
    }
    if (b.1 - a.1).abs() > f64::EPSILON {
        return b.1 > a.1;
    }
    b.2 > a.2
}

/// Picks the better of two dual-source candidates by
/// (validation status rank, critical-field confidence sum, lines parsed).
/// Ties favor `a` (the primary/text-layer source), matching the normal
/// path's preference for the unmodified token source.
pub fn adopt_better(a: Candidate, b: Candidate) -> Candidate {
    adopt_better_with_source(a, b).0
}

/// Same as [`adopt_better`] but also reports whether `b` was the winner, so
/// a caller that needs to keep using the winning source's raw rows (e.g. for
/// the deterministic fallback, which is not part of stages 3-9) knows which
/// one that was.
pub fn adopt_better_with_source(a: Candidate, b: Candidate) -> (Candidate, bool) {
    if b_beats_a(score(&a), score(&b)) {
        (b, true)
    } else {
        (a, false)
    }
}
