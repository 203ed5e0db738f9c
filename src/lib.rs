//! Deterministic-first extraction of structured invoice data from Swedish
//! PDF invoices (typically EDI-origin, occasionally multi-page or scanned).
//!
//! The crate turns a PDF byte stream plus a [`Profile`] into a list of
//! [`InvoiceResult`]s. It owns no I/O beyond reading the PDF bytes handed
//! to it, no persistent state, and no AI transport — [`AiProvider`] and
//! [`OcrProvider`] are caller-supplied collaborators.

pub mod ai_policy;
pub mod boundary;
pub mod calibration;
pub mod compare;
pub mod error;
pub mod fallback;
pub mod footer;
pub mod header;
pub mod lines;
pub mod normalize;
pub mod pdf;
pub mod pipeline;
pub mod profile;
pub mod provider;
pub mod row;
pub mod segment;
pub mod types;
pub mod validate;

pub use error::{ExtractError, Result};
pub use pipeline::{extract_from_bytes, run as run_pipeline, run_compare as run_pipeline_compare};
pub use profile::Profile;
pub use provider::{AiCorrection, AiError, AiProvider, CancellationToken, OcrError, OcrProvider, PageImage};
pub use types::{InvoiceHeader, InvoiceLine, InvoiceResult, ValidationResult, ValidationStatus};
