//! Fact extractors.
//!
//! The pipeline picks an extractor per document type by key. Extraction is
//! an I/O boundary in general (OCR or model-backed extractors), so the
//! trait is async even though the built-in extractor is not.

use async_trait::async_trait;
use billguard_core::{extract_facts, DocumentType, ExtractionError, FactSet};

/// Key of the built-in extractor.
pub const HEURISTIC_EXTRACTOR: &str = "heuristic";

/// Produces a fact set from raw text.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    async fn extract(&self, text: &str, doc_type: DocumentType) -> Result<FactSet, ExtractionError>;
}

/// Labelled-field regex extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

#[async_trait]
impl FactExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        HEURISTIC_EXTRACTOR
    }

    async fn extract(&self, text: &str, doc_type: DocumentType) -> Result<FactSet, ExtractionError> {
        extract_facts(text, doc_type)
    }
}
