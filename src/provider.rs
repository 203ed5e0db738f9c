//! External collaborator traits (SPEC_FULL §4.13, §5.1). The core never
//! implements OCR or calls a model provider directly — callers supply
//! implementations and the pipeline only calls through these seams.

use crate::types::Token;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Cheap, cloneable cancellation handle checked between pipeline stages and
/// around the blocking AI RPC (spec §5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Page image handoff for OCR providers that cannot read the text layer.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub rgb8: Vec<u8>,
}

pub trait OcrProvider: Send + Sync {
    fn recognize(&self, page: &PageImage) -> Result<Vec<Token>, OcrError>;
}

#[derive(Debug, Error)]
#[error("OCR provider failed: {0}")]
pub struct OcrError(pub String);

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("AI provider error: {0}")]
    Provider(String),
}

/// A structured correction proposal for header/line fields, not free text —
/// the core never parses natural-language output from a model provider.
#[derive(Debug, Clone, Default)]
pub struct AiCorrection {
    pub invoice_number: Option<String>,
    pub supplier: Option<String>,
    pub total_amount: Option<String>,
}

pub trait AiProvider: Send + Sync {
    /// Blocking call; implementations are responsible for honoring
    /// `deadline` and polling `cancel` themselves — the core passes both
    /// through but owns no transport (spec §5.1).
    fn complete(
        &self,
        context: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<AiCorrection, AiError>;
}
