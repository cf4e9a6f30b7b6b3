//! Scoring result data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Merchant name reported when no receipt line qualifies
pub const UNKNOWN_MERCHANT: &str = "UNKNOWN";

/// Risk band derived from the fraud probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds.
    ///
    /// Lower bounds are inclusive: a score equal to a threshold lands in the
    /// higher band.
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

/// Risk band cutoffs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.5,
            high: 0.85,
        }
    }
}

/// Merchant and total read off a receipt image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptExtraction {
    pub merchant_name: String,
    pub total_amount: f64,
}

impl Default for ReceiptExtraction {
    fn default() -> Self {
        Self {
            merchant_name: UNKNOWN_MERCHANT.to_string(),
            total_amount: 0.0,
        }
    }
}

/// Response for one transaction + receipt pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    /// Unique request identifier
    pub request_id: Uuid,

    /// Fraud probability (0.0 - 1.0), 4 decimal places
    pub fraud_score: f64,

    /// Risk band of the unrounded score
    #[serde(rename = "fraud_risk_level")]
    pub risk_level: RiskLevel,

    pub merchant_name: String,

    /// Receipt total, 2 decimal places
    pub total_amount: f64,

    /// Canonical feature order the classifier consumed
    pub features_used: Vec<String>,

    pub scored_at: DateTime<Utc>,
}

impl ScoringResult {
    /// Assemble a result, applying report rounding.
    pub fn new(
        fraud_score: f64,
        risk_level: RiskLevel,
        receipt: ReceiptExtraction,
        features_used: Vec<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            fraud_score: round_to(fraud_score, 4),
            risk_level,
            merchant_name: receipt.merchant_name,
            total_amount: round_to(receipt.total_amount, 2),
            features_used,
            scored_at: Utc::now(),
        }
    }
}

/// Round to `places` decimals, ties to even
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.0, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.4999, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.8499, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.85, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0, &thresholds), RiskLevel::High);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(12.344, 2), 12.34);
        assert_eq!(round_to(9.99, 2), 9.99);
        assert_eq!(round_to(0.0, 2), 0.0);
    }

    #[test]
    fn test_round_to_ties_go_to_even() {
        assert_eq!(round_to(0.03125, 4), 0.0312);
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(2.5, 0), 2.0);
    }

    #[test]
    fn test_receipt_extraction_default() {
        let receipt = ReceiptExtraction::default();
        assert_eq!(receipt.merchant_name, "UNKNOWN");
        assert_eq!(receipt.total_amount, 0.0);
    }

    #[test]
    fn test_scoring_result_serialization() {
        let result = ScoringResult::new(
            0.912345,
            RiskLevel::High,
            ReceiptExtraction {
                merchant_name: "ACME MARKET".to_string(),
                total_amount: 12.344,
            },
            vec!["category".to_string(), "amt".to_string()],
        );

        assert_eq!(result.fraud_score, 0.9123);
        assert_eq!(result.total_amount, 12.34);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["fraud_risk_level"], "High");
        assert_eq!(json["merchant_name"], "ACME MARKET");
        assert_eq!(json["features_used"][1], "amt");

        let back: ScoringResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.request_id, result.request_id);
        assert_eq!(back.risk_level, RiskLevel::High);
    }
}
