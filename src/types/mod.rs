//! Type definitions for the fraud + receipt gateway

pub mod result;
pub mod transaction;

pub use result::{ReceiptExtraction, RiskLevel, RiskLevelThresholds, ScoringResult};
pub use transaction::{Category, EncodingTable, Gender, TransactionRecord};
