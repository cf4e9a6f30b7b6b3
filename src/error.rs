//! Per-request error kinds.
//!
//! Every stage of a scoring request reports failure through [`PipelineError`].
//! None of them is recovered from inside the pipeline: the first error ends
//! the request.

use thiserror::Error;

/// Failure of a single scoring request, tagged by the stage that failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Missing or invalid transaction field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Receipt image unreadable or undecodable.
    #[error("image processing failed: {0}")]
    Image(String),

    /// Artifact/schema mismatch or classifier failure.
    #[error("scoring failed: {0}")]
    Scoring(String),

    /// OCR engine invocation failure.
    #[error("receipt extraction failed: {0}")]
    Extraction(String),
}

impl PipelineError {
    /// Stable lowercase label for logs, metrics and error output.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Image(_) => "image",
            PipelineError::Scoring(_) => "scoring",
            PipelineError::Extraction(_) => "extraction",
        }
    }

    /// Message without the stage prefix.
    pub fn message(&self) -> &str {
        match self {
            PipelineError::Validation(m)
            | PipelineError::Image(m)
            | PipelineError::Scoring(m)
            | PipelineError::Extraction(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_and_display() {
        let err = PipelineError::Validation("Missing 'category' in transaction".to_string());
        assert_eq!(err.kind(), "validation");
        assert_eq!(
            err.to_string(),
            "validation failed: Missing 'category' in transaction"
        );
        assert_eq!(err.message(), "Missing 'category' in transaction");

        assert_eq!(PipelineError::Image(String::new()).kind(), "image");
        assert_eq!(PipelineError::Scoring(String::new()).kind(), "scoring");
        assert_eq!(PipelineError::Extraction(String::new()).kind(), "extraction");
    }
}
