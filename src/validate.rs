//! Stage 9: Validator (spec §4.7). Reconciles lines against the declared
//! total and produces a `ValidationResult` with a status that is a pure
//! function of the inputs and the profile's thresholds.

use crate::profile::ValidationConfig;
use crate::types::{InvoiceHeader, InvoiceLine, ValidationResult, ValidationStatus};
use rust_decimal::Decimal;

const CRITICAL_CONFIDENCE_THRESHOLD: f64 = 0.80;

fn within_tolerance(diff: Decimal, declared_total: Decimal, config: &ValidationConfig) -> bool {
    let eps_abs = Decimal::try_from(config.eps_abs).unwrap_or(Decimal::new(1, 2));
    let eps_rel = Decimal::try_from(config.eps_rel).unwrap_or(Decimal::new(5, 3));
    let bound = eps_abs.max(eps_rel * declared_total.abs());
    diff.abs() <= bound
}

pub(crate) fn critical_fields_present(header: &InvoiceHeader) -> bool {
    header.invoice_number.is_some()
        && header.supplier.is_some()
        && header.date.is_some()
        && header.total_amount.is_some()
}

fn any_critical_field_low_confidence(header: &InvoiceHeader) -> bool {
    let confidences = [
        header.invoice_number.as_ref().map(|f| f.confidence),
        header.supplier.as_ref().map(|f| f.confidence),
        header.date.as_ref().map(|f| f.confidence),
        header.total_amount.as_ref().map(|f| f.confidence),
    ];
    confidences.into_iter().flatten().any(|c| c < CRITICAL_CONFIDENCE_THRESHOLD)
}

/// Computes `lines_sum`, reconciles against `declared_total` when present,
/// and attempts the VAT-aware secondary reconciliation from SPEC_FULL
/// §10.2 only when the direct reconciliation fails.
pub fn validate(header: &InvoiceHeader, lines: &[InvoiceLine], config: &ValidationConfig) -> ValidationResult {
    let lines_sum: Decimal = lines.iter().map(|l| l.line_total).sum();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if lines.is_empty() {
        errors.push("no invoice lines could be parsed".to_string());
        return ValidationResult {
            status: ValidationStatus::Failed,
            lines_sum,
            declared_total: header.total_amount.as_ref().map(|f| f.value),
            diff: Decimal::ZERO,
            errors,
            warnings,
        };
    }

    let declared_total = header.total_amount.as_ref().map(|f| f.value);

    let (status, diff) = match declared_total {
        Some(total) => {
            let direct_diff = total - lines_sum;
            let direct_ok = within_tolerance(direct_diff, total, config);

            let reconciled_ok = if !direct_ok {
                if let Some(vat) = header.vat_amount.as_ref().map(|f| f.value) {
                    let vat_diff = total - (lines_sum + vat);
                    if within_tolerance(vat_diff, total, config) {
                        warnings.push("reconciled via secondary VAT-aware check".to_string());
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            } else {
                true
            };

            let arithmetic_ok = direct_ok || reconciled_ok;

            if !arithmetic_ok {
                errors.push(format!("lines_sum {} does not reconcile with declared total {}", lines_sum, total));
                (ValidationStatus::Review, direct_diff)
            } else if !critical_fields_present(header) {
                (ValidationStatus::Partial, direct_diff)
            } else if any_critical_field_low_confidence(header) {
                (ValidationStatus::Review, direct_diff)
            } else {
                (ValidationStatus::Ok, direct_diff)
            }
        }
        None => {
            // Per spec §8 scenario 2: a redacted/missing total with lines
            // that parsed is PARTIAL, not FAILED — FAILED is reserved for
            // lines that could not be parsed at all (handled above).
            warnings.push("declared total missing".to_string());
            (ValidationStatus::Partial, Decimal::ZERO)
        }
    };

    ValidationResult {
        status,
        lines_sum,
        declared_total,
        diff,
        errors,
        warnings,
    }
}
