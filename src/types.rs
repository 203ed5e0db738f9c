//! Core data model (spec §3). Tokens and Rows live on the `Document` arena
//! and are referenced by index from every later stage; nothing here
//! duplicates glyph data once it has been tokenized.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Axis-aligned box in PDF user-space units, y growing upward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.width).max(other.x + other.width);
        let y1 = (self.y + self.height).max(other.y + other.height);
        BoundingBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

/// A single positioned glyph run from the text layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub page_index: usize,
}

impl Token {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Tokens sharing a baseline within `ε_y`, X-sorted (spec §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub tokens: Vec<Token>,
    pub baseline_y: f32,
    pub page_index: usize,
}

impl Row {
    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.tokens
            .iter()
            .map(Token::bbox)
            .reduce(|a, b| a.union(&b))
    }
}

/// A rendered page raster, supplied by the caller's loader for pages with
/// `requires_ocr = true` — the core never rasterizes a page itself
/// (SPEC_FULL §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRaster {
    pub width: u32,
    pub height: u32,
    pub rgb8: Vec<u8>,
}

/// A page, decoded into positioned tokens. Immutable after load (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    pub media_box: BoundingBox,
    pub tokens: Vec<Token>,
    pub text_layer_used: bool,
    pub text_quality: f64,
    pub requires_ocr: bool,
    pub raster: Option<PageRaster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Header,
    Items,
    Footer,
}

/// A contiguous row range on one page, labeled header/items/footer.
/// Advisory: downstream extractors validate their own content (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub row_range: Range<usize>,
    pub page_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundarySource {
    InvoiceNo,
    PageNumbering,
    HeaderFingerprint,
}

/// One boundary-detector decision, appended in page order (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryDecision {
    pub page_index: usize,
    pub decision: String,
    pub reasons: Vec<String>,
}

/// A contiguous run of pages belonging to one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceGroup {
    pub pages: Vec<usize>,
    pub invoice_no: Option<String>,
    pub source: BoundarySource,
}

/// The (page, bbox) evidence pointer attached to every extracted field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traceability {
    pub page_index: usize,
    pub bbox: BoundingBox,
}

/// A value plus the confidence ([0,1]) and evidence it was extracted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue<T> {
    pub value: T,
    pub confidence: f64,
    pub trace: Option<Traceability>,
}

impl<T> FieldValue<T> {
    pub fn new(value: T, confidence: f64, trace: Option<Traceability>) -> Self {
        FieldValue {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            trace,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldValue<U> {
        FieldValue {
            value: f(self.value),
            confidence: self.confidence,
            trace: self.trace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub invoice_number: Option<FieldValue<String>>,
    pub supplier: Option<FieldValue<String>>,
    pub date: Option<FieldValue<NaiveDate>>,
    pub currency: Option<FieldValue<String>>,
    pub total_amount: Option<FieldValue<Decimal>>,
    /// Supplemented field (SPEC_FULL §10.2): VAT/moms row, used only as a
    /// secondary reconciliation aid.
    pub vat_amount: Option<FieldValue<Decimal>>,
}

impl InvoiceHeader {
    pub fn empty() -> Self {
        InvoiceHeader {
            invoice_number: None,
            supplier: None,
            date: None,
            currency: None,
            total_amount: None,
            vat_amount: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub unit_price: Decimal,
    pub discount: Option<Decimal>,
    pub line_total: Decimal,
    pub confidence: f64,
    pub source_rows: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Ok,
    Partial,
    Review,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub lines_sum: Decimal,
    pub declared_total: Option<Decimal>,
    pub diff: Decimal,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonFlag {
    ValidationOk,
    EdiLikeBlocked,
    ForceReview,
    FallbackOk,
    FallbackFailed,
    LowTextQuality,
    MissingCriticalFields,
    NoTrigger,
}

impl ReasonFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonFlag::ValidationOk => "validation_ok",
            ReasonFlag::EdiLikeBlocked => "edi_like_blocked",
            ReasonFlag::ForceReview => "force_review",
            ReasonFlag::FallbackOk => "fallback_ok",
            ReasonFlag::FallbackFailed => "fallback_failed",
            ReasonFlag::LowTextQuality => "low_text_quality",
            ReasonFlag::MissingCriticalFields => "missing_critical_fields",
            ReasonFlag::NoTrigger => "no_trigger",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdiSignals {
    pub anchors_matched: Vec<String>,
    pub patterns_matched: Vec<String>,
    pub text_quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIPolicyDecision {
    pub allow_ai: bool,
    pub reason_flags: Vec<ReasonFlag>,
    pub edi_like: bool,
    pub edi_signals: EdiSignals,
    pub policy_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionSource {
    TextLayer,
    Ocr,
    CompareAdopted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionDetail {
    pub method_used: String,
    pub text_layer_used: bool,
    pub text_quality: f64,
    pub ai_policy: Option<AIPolicyDecision>,
    pub boundary_decision_log: Vec<BoundaryDecision>,
    pub source: ExtractionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub header: InvoiceHeader,
    pub lines: Vec<InvoiceLine>,
    pub validation: ValidationResult,
    pub extraction_detail: ExtractionDetail,
}
