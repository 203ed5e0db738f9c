//! PDF container and content-stream reading (SPEC_FULL §4.12). This module
//! is deliberately thin: it turns bytes into positioned text tokens and
//! nothing else. No writer, forms, signature, or encryption surface.

pub mod container;
pub mod content;
pub mod object;

pub use container::PdfContainer;
