//! End-to-end scenarios (spec §8) driven through the public pipeline entry
//! point, built from in-memory `Document` fixtures rather than real PDF
//! bytes — the container layer has its own unit tests in `src/pdf/`.

use invoice_extract::run_pipeline;
use invoice_extract::types::{BoundingBox, Document, Page, PageRaster, Token, ValidationStatus};
use invoice_extract::{
    AiCorrection, AiError, AiProvider, CancellationToken, OcrError, OcrProvider, PageImage, Profile,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn page_from_rows(index: usize, rows: &[Vec<&str>]) -> Page {
    let mut tokens = Vec::new();
    let mut y = 800.0;
    for parts in rows {
        for (i, text) in parts.iter().enumerate() {
            tokens.push(Token {
                text: (*text).to_string(),
                x: i as f32 * 90.0,
                y,
                width: 60.0,
                height: 10.0,
                page_index: index,
            });
        }
        y -= 20.0;
    }
    Page {
        index,
        media_box: BoundingBox { x: 0.0, y: 0.0, width: 595.0, height: 842.0 },
        tokens,
        text_layer_used: true,
        text_quality: 0.95,
        requires_ocr: false,
        raster: None,
    }
}

/// A complete one-page invoice: header, column headings, one item line, and
/// the declared total, closed (lines_sum == total) so validation passes.
fn invoice_page(index: usize, invoice_no: &str, total: &str) -> Page {
    page_from_rows(
        index,
        &[
            vec!["Fakturanr", invoice_no],
            vec!["Sida", "1/2"],
            vec!["Leverantör", "Acme", "AB"],
            vec!["Fakturadatum", "2024-03-15"],
            vec!["Valuta", "SEK"],
            vec!["Antal", "Pris", "Belopp"],
            vec!["Widget", "2", "100,00", total],
            vec!["Att", "betala", total],
        ],
    )
}

fn continuation_page(index: usize) -> Page {
    page_from_rows(index, &[vec!["Sida", "2/2"]])
}

#[test]
fn scenario_1_two_invoices_validate_ok_and_never_consult_ai() {
    let document = Document {
        pages: vec![
            invoice_page(0, "6789AAAA", "200,00"),
            continuation_page(1),
            invoice_page(2, "4321BBBB", "300,00"),
            continuation_page(3),
        ],
    };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].header.invoice_number.as_ref().unwrap().value, "6789AAAA");
    assert_eq!(results[1].header.invoice_number.as_ref().unwrap().value, "4321BBBB");

    for result in &results {
        assert_eq!(result.validation.status, ValidationStatus::Ok);
        let ai_policy = result.extraction_detail.ai_policy.as_ref().unwrap();
        assert!(!ai_policy.allow_ai);
        assert_eq!(
            ai_policy.reason_flags,
            vec![invoice_extract::types::ReasonFlag::ValidationOk]
        );
    }
}

#[test]
fn scenario_3_single_invoice_continues_via_page_numbering() {
    let document = Document {
        pages: vec![invoice_page(0, "6789AAAA", "200,00"), continuation_page(1)],
    };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].header.invoice_number.as_ref().unwrap().value, "6789AAAA");

    let log = &results[0].extraction_detail.boundary_decision_log;
    assert_eq!(log.len(), 2);
    assert!(log[1].reasons.contains(&"page_no_sequential".to_string()));
}

#[test]
fn scenario_4_ordernr_is_blacklisted_in_favor_of_fakturanr() {
    let page = page_from_rows(
        0,
        &[
            vec!["Ordernr", "12345"],
            vec!["Fakturanr", "6789AAAA"],
            vec!["Leverantör", "Acme", "AB"],
            vec!["Fakturadatum", "2024-03-15"],
            vec!["Valuta", "SEK"],
            vec!["Antal", "Pris", "Belopp"],
            vec!["Widget", "2", "100,00", "200,00"],
            vec!["Att", "betala", "200,00"],
        ],
    );
    let document = Document { pages: vec![page] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].header.invoice_number.as_ref().unwrap().value, "6789AAAA");
}

#[test]
fn scenario_split_page_suspected_is_flagged_not_silently_merged() {
    let page = page_from_rows(
        0,
        &[
            vec!["Fakturanr", "6789AAAA"],
            vec!["Leverantör", "Acme", "AB"],
            vec!["Fakturadatum", "2024-03-15"],
            vec!["Valuta", "SEK"],
            vec!["Antal", "Pris", "Belopp"],
            vec!["Widget", "2", "100,00", "200,00"],
            vec!["Att", "betala", "200,00"],
            vec!["Fakturanr", "4321BBBB"],
            vec!["Antal", "Pris", "Belopp"],
            vec!["Gadget", "1", "50,00", "50,00"],
            vec!["Att", "betala", "50,00"],
        ],
    );
    let document = Document { pages: vec![page] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap();

    assert_eq!(results.len(), 1);
    let log = &results[0].extraction_detail.boundary_decision_log;
    assert!(log.iter().any(|d| d.decision == "split_page_suspected"));
    assert!(results[0]
        .validation
        .warnings
        .iter()
        .any(|w| w.contains("split page suspected")));
}

#[test]
fn empty_document_is_rejected() {
    let document = Document { pages: vec![] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let err = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap_err();
    assert!(matches!(err, invoice_extract::ExtractError::EmptyDocument));
}

/// Stub `AiProvider` that hands back a fixed correction and counts calls.
struct StubAiProvider {
    calls: AtomicUsize,
    correction: AiCorrection,
}

impl AiProvider for StubAiProvider {
    fn complete(
        &self,
        _context: &str,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<AiCorrection, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.correction.clone())
    }
}

struct FailingAiProvider;

impl AiProvider for FailingAiProvider {
    fn complete(
        &self,
        _context: &str,
        _deadline: Duration,
        _cancel: &CancellationToken,
    ) -> Result<AiCorrection, AiError> {
        Err(AiError::Provider("simulated outage".to_string()))
    }
}

/// An otherwise-empty page: no header, no items, no total — lines fail to
/// parse (validate → FAILED), deterministic fallback has nothing to
/// recover either, so the AI policy gate allows a call.
fn unparseable_page(index: usize) -> Page {
    Page {
        index,
        media_box: BoundingBox { x: 0.0, y: 0.0, width: 595.0, height: 842.0 },
        tokens: vec![Token {
            text: "garbled".to_string(),
            x: 0.0,
            y: 700.0,
            width: 40.0,
            height: 10.0,
            page_index: index,
        }],
        text_layer_used: true,
        text_quality: 0.3,
        requires_ocr: false,
        raster: None,
    }
}

#[test]
fn ai_provider_is_consulted_and_correction_is_applied() {
    let document = Document { pages: vec![unparseable_page(0)] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();
    let provider = StubAiProvider {
        calls: AtomicUsize::new(0),
        correction: AiCorrection {
            invoice_number: Some("6789AAAA".to_string()),
            supplier: Some("Acme AB".to_string()),
            total_amount: Some("200,00".to_string()),
        },
    };

    let results = run_pipeline(&document, &profile, &cancel, None, Some(&provider), None).unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(results[0].header.invoice_number.as_ref().unwrap().value, "6789AAAA");
    assert_eq!(results[0].header.supplier.as_ref().unwrap().value, "Acme AB");
}

#[test]
fn ai_not_consulted_without_allow_ai() {
    let document = Document {
        pages: vec![invoice_page(0, "6789AAAA", "200,00"), continuation_page(1)],
    };
    let profile = Profile::default();
    let cancel = CancellationToken::new();
    let provider = StubAiProvider {
        calls: AtomicUsize::new(0),
        correction: AiCorrection::default(),
    };

    run_pipeline(&document, &profile, &cancel, None, Some(&provider), None).unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn scenario_6_ai_allowed_but_unrecoverable_is_failed() {
    let document = Document { pages: vec![unparseable_page(0)] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();
    // No correction for any field: AI was consulted but nothing was
    // recoverable, so the result must still be FAILED.
    let provider = StubAiProvider { calls: AtomicUsize::new(0), correction: AiCorrection::default() };

    let results = run_pipeline(&document, &profile, &cancel, None, Some(&provider), None).unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(results[0].validation.status, ValidationStatus::Failed);
}

#[test]
fn ai_provider_error_becomes_validation_failed() {
    let document = Document { pages: vec![unparseable_page(0)] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();
    let provider = FailingAiProvider;

    let results = run_pipeline(&document, &profile, &cancel, None, Some(&provider), None).unwrap();

    assert_eq!(results[0].validation.status, ValidationStatus::Failed);
    assert!(results[0].validation.errors.iter().any(|e| e.contains("AI provider")));
}

/// Stub `OcrProvider` that recognizes a complete, closed invoice regardless
/// of the page image it is handed.
struct StubOcrProvider;

impl OcrProvider for StubOcrProvider {
    fn recognize(&self, page: &PageImage) -> Result<Vec<Token>, OcrError> {
        let rows: Vec<Vec<&str>> = vec![
            vec!["Fakturanr", "6789AAAA"],
            vec!["Leverantör", "Acme", "AB"],
            vec!["Fakturadatum", "2024-03-15"],
            vec!["Valuta", "SEK"],
            vec!["Antal", "Pris", "Belopp"],
            vec!["Widget", "2", "100,00", "200,00"],
            vec!["Att", "betala", "200,00"],
        ];
        let mut tokens = Vec::new();
        let mut y = 800.0;
        for parts in rows {
            for (i, text) in parts.iter().enumerate() {
                tokens.push(Token {
                    text: text.to_string(),
                    x: i as f32 * 90.0,
                    y,
                    width: 60.0,
                    height: 10.0,
                    page_index: page.page_index,
                });
            }
            y -= 20.0;
        }
        Ok(tokens)
    }
}

#[test]
fn ocr_provider_recognizes_tokens_for_a_raster_only_page() {
    let page = Page {
        index: 0,
        media_box: BoundingBox { x: 0.0, y: 0.0, width: 595.0, height: 842.0 },
        tokens: vec![],
        text_layer_used: false,
        text_quality: 0.0,
        requires_ocr: true,
        raster: Some(PageRaster { width: 100, height: 100, rgb8: vec![0; 3] }),
    };
    let document = Document { pages: vec![page] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();
    let ocr = StubOcrProvider;

    let results = run_pipeline(&document, &profile, &cancel, None, None, Some(&ocr)).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].header.invoice_number.as_ref().unwrap().value, "6789AAAA");
    assert_eq!(results[0].validation.status, ValidationStatus::Ok);
}

#[test]
fn requires_ocr_without_provider_or_raster_yields_no_rows() {
    let page = Page {
        index: 0,
        media_box: BoundingBox { x: 0.0, y: 0.0, width: 595.0, height: 842.0 },
        tokens: vec![],
        text_layer_used: false,
        text_quality: 0.0,
        requires_ocr: true,
        raster: None,
    };
    let document = Document { pages: vec![page] };
    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results = run_pipeline(&document, &profile, &cancel, None, None, None).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].validation.status, ValidationStatus::Failed);
}

#[test]
fn compare_path_adopts_the_better_of_two_token_sources() {
    // Primary source: header parses but the items/total are garbled, so
    // validation fails. Secondary source: a clean, closed invoice.
    let primary = page_from_rows(0, &[vec!["Fakturanr", "6789AAAA"], vec!["garbled"]]);
    let document = Document { pages: vec![primary] };

    let clean = invoice_page(0, "6789AAAA", "200,00");
    let secondary_tokens: Vec<Vec<Token>> = vec![clean.tokens];

    let profile = Profile::default();
    let cancel = CancellationToken::new();

    let results =
        invoice_extract::run_pipeline_compare(&document, &secondary_tokens, &profile, &cancel, None, None).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].validation.status, ValidationStatus::Ok);
    assert_eq!(
        results[0].extraction_detail.source,
        invoice_extract::types::ExtractionSource::CompareAdopted
    );
}
