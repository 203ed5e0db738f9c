use thiserror::Error;

/// Errors raised while reading the PDF container or its content streams.
///
/// Mirrors the structural/recoverable split the rest of the crate relies on:
/// `Unreadable` and `Unsupported` abort the document, everything else is
/// recorded against the page it came from.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("not a PDF file or header is missing")]
    InvalidHeader,

    #[error("document structure is broken: {0}")]
    Unreadable(String),

    #[error("construct not supported by this reader: {0}")]
    Unsupported(String),

    #[error("object reference {0} does not resolve")]
    DanglingReference(u32),

    #[error("stream decode failed: {0}")]
    Decode(String),

    #[error("content stream token error at offset {0}")]
    Token(usize),
}

/// Top level error taxonomy (spec §7). Only `Cancelled` and `InternalInvariant`
/// are allowed to propagate out of the pipeline untranslated; every other
/// variant is recorded on the in-flight `InvoiceResult` instead of raised,
/// the conversions below exist for the few call sites that must bail out of
/// a whole document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF could not be read")]
    PdfUnreadable(#[source] PdfError),

    #[error("document has no pages")]
    EmptyDocument,

    #[error("expected segment not found: {0}")]
    SegmentMissing(String),

    #[error("value is not a valid Swedish-locale amount: {0:?}")]
    NumberFormat(String),

    #[error("could not parse items row {0}")]
    LineParseFailed(usize),

    #[error("validation did not pass: {0}")]
    ValidationFailed(String),

    #[error("AI provider unavailable: {0}")]
    AIUnavailable(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl From<PdfError> for ExtractError {
    fn from(e: PdfError) -> Self {
        ExtractError::PdfUnreadable(e)
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
