//! Seam traits for the external LLM-backed services.
//!
//! The pipeline core is deterministic; the extraction and selection
//! services are translators plugged in from outside. They never decide
//! quantities — only the shape of the input and which catalog entries to
//! consider.

use async_trait::async_trait;
use thiserror::Error;

use crate::geometry::ExtractedPayload;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// No provider credentials configured at all. Fatal: surfaced
    /// immediately rather than degraded.
    #[error("provider credentials are not configured: {0}")]
    CredentialsMissing(String),
    #[error("service call failed: {0}")]
    Unavailable(String),
    #[error("malformed service response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether the caller may substitute a safe default for this failure.
    /// Missing credentials are a configuration fault and never degradable.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, Self::CredentialsMissing(_))
    }
}

/// Structured extraction service: free text in, fixed-schema geometry out.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, raw_input_text: &str) -> Result<ExtractedPayload, ServiceError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectionRequest<'a> {
    pub catalog_names: &'a [String],
    pub extracted_payload: Option<&'a ExtractedPayload>,
    pub raw_input_excerpt: &'a str,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionResponse {
    pub selected: Vec<String>,
    pub notes: Option<String>,
}

/// Rule-set selection service: picks applicable master set names from the
/// catalog. Near-miss names are tolerated downstream; an empty selection
/// triggers the deterministic fallback.
#[async_trait]
pub trait SelectionService: Send + Sync {
    async fn select_rule_sets(
        &self,
        request: SelectionRequest<'_>,
    ) -> Result<SelectionResponse, ServiceError>;
}
