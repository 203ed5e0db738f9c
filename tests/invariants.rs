//! Testable properties P1-P7 (spec §8), each exercised at the module that
//! actually owns the invariant rather than through the whole pipeline.

use invoice_extract::ai_policy::{evaluate_ai_policy, ExtractionSourceKind};
use invoice_extract::boundary::detect_boundaries;
use invoice_extract::normalize::{normalize, render};
use invoice_extract::profile::{AiPolicyConfig, ValidationConfig};
use invoice_extract::types::{
    EdiSignals, FieldValue, InvoiceHeader, InvoiceLine, Row, Token, ValidationResult,
    ValidationStatus,
};
use invoice_extract::validate::validate;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn row(text: &str) -> Row {
    Row {
        tokens: vec![Token { text: text.into(), x: 0.0, y: 0.0, width: 10.0, height: 10.0, page_index: 0 }],
        baseline_y: 0.0,
        page_index: 0,
    }
}

// P1: every amount this crate produces is a `rust_decimal::Decimal`, a type
// that cannot represent NaN or infinity by construction — the invariant is
// enforced at the type level, this just exercises the one entry point that
// is allowed to construct a monetary Decimal (spec §4.4, P1).
#[test]
fn p1_normalize_only_ever_returns_a_decimal_or_a_number_format_error() {
    for raw in ["1 234,50", "-1 234,00", "12.50 SEK", "0,00"] {
        let value: Decimal = normalize(raw).expect("well-formed Swedish-locale amount");
        // Round-tripping through string parsing would fail for any
        // non-representable value; Decimal itself has no NaN/infinity.
        assert_eq!(value.to_string().parse::<Decimal>().unwrap(), value);
    }
    assert!(normalize("not an amount").is_err());
}

// P2: for any document, the InvoiceGroups produced by the boundary detector
// form a contiguous partition of the page range. Holds structurally because
// every iteration of the detector's page loop appends the current page
// index to exactly one open group, in order; this test exercises that
// property over a fixture with a mix of signal types rather than re-proving
// the code's control flow.
#[test]
fn p2_groups_form_contiguous_partition_of_all_pages() {
    let headers = vec![
        vec![row("Fakturanr AAAA"), row("Sida 1/2")],
        vec![row("Sida 2/2")],
        vec![row("Fakturanr BBBB")],
        vec![row("Unrelated header text")],
        vec![row("Fakturanr CCCC"), row("Sida 1/1")],
    ];
    let all = headers.clone();
    let (groups, _log) = detect_boundaries(&headers, &all);

    let mut covered: Vec<usize> = groups.iter().flat_map(|g| g.pages.clone()).collect();
    covered.sort_unstable();
    assert_eq!(covered, (0..headers.len()).collect::<Vec<_>>());

    for group in &groups {
        assert!(!group.pages.is_empty());
        for pair in group.pages.windows(2) {
            assert_eq!(pair[1], pair[0] + 1, "a group's pages must be a contiguous run");
        }
    }
}

// P3: removing the declared total from every page must not change the set
// of InvoiceGroups — the boundary detector never looks at totals in the
// first place (only invoice_no, page numbering, header fingerprint), so
// this demonstrates that independence directly rather than asserting it by
// code inspection alone.
#[test]
fn p3_removing_declared_total_does_not_change_invoice_groups() {
    let headers = vec![
        vec![row("Fakturanr AAAA"), row("Sida 1/2")],
        vec![row("Sida 2/2")],
    ];
    let all_with_total = vec![
        vec![
            row("Fakturanr AAAA"),
            row("Sida 1/2"),
            row("Antal Pris Belopp"),
            row("Widget 2 100,00 200,00"),
            row("Att betala 200,00"),
        ],
        vec![row("Sida 2/2")],
    ];
    let all_without_total = vec![
        vec![row("Fakturanr AAAA"), row("Sida 1/2"), row("Antal Pris Belopp"), row("Widget 2 100,00 200,00")],
        vec![row("Sida 2/2")],
    ];

    let (with_total, _) = detect_boundaries(&headers, &all_with_total);
    let (without_total, _) = detect_boundaries(&headers, &all_without_total);

    let pages_with: Vec<Vec<usize>> = with_total.iter().map(|g| g.pages.clone()).collect();
    let pages_without: Vec<Vec<usize>> = without_total.iter().map(|g| g.pages.clone()).collect();
    assert_eq!(pages_with, pages_without);
}

fn base_validation(status: ValidationStatus) -> ValidationResult {
    ValidationResult {
        status,
        lines_sum: Decimal::ZERO,
        declared_total: Some(Decimal::ZERO),
        diff: Decimal::ZERO,
        errors: vec![],
        warnings: vec![],
    }
}

// P4: the AI policy gate is a pure function — identical inputs must
// produce a byte-identical decision, which is what lets the compare path
// run it once on the adopted candidate instead of once per candidate.
#[test]
fn p4_ai_policy_decision_is_a_pure_function_of_its_inputs() {
    let validation = base_validation(ValidationStatus::Review);
    let signals = EdiSignals::default();
    let config = AiPolicyConfig::default();

    let first = evaluate_ai_policy(ExtractionSourceKind::TextLayer, 0.9, &validation, &signals, &config, false, false);
    let second = evaluate_ai_policy(ExtractionSourceKind::TextLayer, 0.9, &validation, &signals, &config, false, false);

    assert_eq!(first.allow_ai, second.allow_ai);
    assert_eq!(first.reason_flags, second.reason_flags);
    assert_eq!(first.edi_like, second.edi_like);
    assert_eq!(first.policy_version, second.policy_version);
}

// P5: whenever `allow_ai=true`, either the deterministic fallback was
// attempted and failed, or no fallback was applicable in the first place.
#[test]
fn p5_fallback_passed_never_allows_ai() {
    let config = AiPolicyConfig::default();
    let decision = evaluate_ai_policy(
        ExtractionSourceKind::TextLayer,
        0.9,
        &base_validation(ValidationStatus::Review),
        &EdiSignals::default(),
        &config,
        true,
        true,
    );
    assert!(!decision.allow_ai);
}

#[test]
fn p5_allow_ai_true_implies_fallback_failed_or_not_applicable() {
    let config = AiPolicyConfig::default();

    // Low text quality: the fallback ran and didn't reach target confidence.
    let fallback_failed = evaluate_ai_policy(
        ExtractionSourceKind::TextLayer,
        0.1,
        &base_validation(ValidationStatus::Failed),
        &EdiSignals::default(),
        &config,
        true,
        false,
    );
    assert!(fallback_failed.allow_ai);

    // Missing critical fields with a text-quality page: fallback never ran.
    let mut missing_fields = base_validation(ValidationStatus::Failed);
    missing_fields.declared_total = None;
    let fallback_not_applicable = evaluate_ai_policy(
        ExtractionSourceKind::TextLayer,
        0.9,
        &missing_fields,
        &EdiSignals::default(),
        &config,
        false,
        false,
    );
    assert!(fallback_not_applicable.allow_ai);
}

fn complete_header(total: Decimal) -> InvoiceHeader {
    InvoiceHeader {
        invoice_number: Some(FieldValue::new("1".to_string(), 0.95, None)),
        supplier: Some(FieldValue::new("Acme".to_string(), 0.95, None)),
        date: Some(FieldValue::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 0.95, None)),
        currency: Some(FieldValue::new("SEK".to_string(), 0.9, None)),
        total_amount: Some(FieldValue::new(total, 0.95, None)),
        vat_amount: None,
    }
}

fn line(total: Decimal) -> InvoiceLine {
    InvoiceLine {
        description: "item".into(),
        quantity: dec!(1),
        unit: None,
        unit_price: total,
        discount: None,
        line_total: total,
        confidence: 0.9,
        source_rows: vec![0],
    }
}

// P6: reconciliation within tolerance must never produce REVIEW or FAILED.
#[test]
fn p6_reconciled_totals_yield_ok_or_partial() {
    let config = ValidationConfig::default();

    let complete = complete_header(dec!(100.00));
    let ok_result = validate(&complete, &[line(dec!(100.00))], &config);
    assert!(matches!(ok_result.status, ValidationStatus::Ok | ValidationStatus::Partial));

    let mut incomplete = InvoiceHeader::empty();
    incomplete.total_amount = Some(FieldValue::new(dec!(100.00), 0.95, None));
    let partial_result = validate(&incomplete, &[line(dec!(100.00))], &config);
    assert!(matches!(partial_result.status, ValidationStatus::Ok | ValidationStatus::Partial));
    assert_eq!(partial_result.status, ValidationStatus::Partial);
}

// P7: normalize(render(normalize(s))) == normalize(s) for parseable s.
#[test]
fn p7_normalizer_round_trip_is_idempotent() {
    for raw in ["1 234 567,89", "12.50", "-1 234,00", "1.234.567", "1 234,00-"] {
        let first = normalize(raw).unwrap();
        let again = normalize(&render(&first)).unwrap();
        assert_eq!(first, again);
    }
}
