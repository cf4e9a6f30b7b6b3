//! Fraud + Receipt Gateway Library
//!
//! Scores card transactions with a pre-trained classifier and reads the
//! merchant name and total off the matching receipt image.

pub mod config;
pub mod error;
pub mod feature_aligner;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod receipt;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use feature_aligner::{FeatureAligner, FeatureOrder, FeatureVector};
pub use models::{RiskScorer, ScoringArtifacts};
pub use pipeline::{ScoringPipeline, ScoringRequest};
pub use receipt::ReceiptProcessor;
pub use types::{result::ScoringResult, transaction::TransactionRecord};
