//! Per-request orchestration: score the transaction, read the receipt,
//! assemble the result.
//!
//! Scoring runs inline and fails fast, so a bad transaction never touches
//! the receipt image. Receipt processing is CPU-bound and runs on the
//! blocking pool; the request waits for it before answering. Either stage
//! failing fails the whole request.

use crate::error::PipelineError;
use crate::feature_aligner::{FeatureAligner, FeatureOrder};
use crate::metrics::{PipelineMetrics, Stage};
use crate::models::inference::{RiskAssessment, RiskScorer};
use crate::models::loader::ScoringArtifacts;
use crate::models::scaler::ScalerAdapter;
use crate::receipt::ReceiptProcessor;
use crate::types::result::{ReceiptExtraction, RiskLevelThresholds, ScoringResult};
use crate::types::transaction::TransactionRecord;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One transaction plus the receipt image to read
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRequest {
    pub transaction: TransactionRecord,
    pub receipt_path: PathBuf,
}

enum ReceiptInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// Shared, read-only request handler. Wrap in an `Arc` and call from as
/// many tasks as needed.
pub struct ScoringPipeline {
    aligner: FeatureAligner,
    scaler: ScalerAdapter,
    scorer: RiskScorer,
    receipts: Arc<ReceiptProcessor>,
    metrics: Arc<PipelineMetrics>,
}

impl ScoringPipeline {
    pub fn new(
        artifacts: ScoringArtifacts,
        thresholds: RiskLevelThresholds,
        receipts: ReceiptProcessor,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            aligner: FeatureAligner::new(artifacts.feature_order),
            scaler: artifacts.scaler,
            scorer: RiskScorer::new(artifacts.classifier, thresholds),
            receipts: Arc::new(receipts),
            metrics,
        }
    }

    pub fn feature_order(&self) -> &FeatureOrder {
        self.aligner.feature_order()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Align, scale and classify one transaction.
    pub fn score_transaction(
        &self,
        transaction: &TransactionRecord,
    ) -> Result<RiskAssessment, PipelineError> {
        let mut features = self.aligner.align(transaction)?;
        self.scaler.apply(&mut features)?;
        self.scorer.score(&features)
    }

    /// Handle a request whose receipt lives on disk.
    pub async fn process(&self, request: &ScoringRequest) -> Result<ScoringResult, PipelineError> {
        self.run(
            &request.transaction,
            ReceiptInput::Path(request.receipt_path.clone()),
        )
        .await
    }

    /// Handle a request whose receipt is already in memory.
    pub async fn process_bytes(
        &self,
        transaction: &TransactionRecord,
        image: Vec<u8>,
    ) -> Result<ScoringResult, PipelineError> {
        self.run(transaction, ReceiptInput::Bytes(image)).await
    }

    async fn run(
        &self,
        transaction: &TransactionRecord,
        receipt: ReceiptInput,
    ) -> Result<ScoringResult, PipelineError> {
        let start = Instant::now();
        let outcome = self.run_stages(transaction, receipt).await;
        self.metrics.record_stage(Stage::Total, start.elapsed());

        match &outcome {
            Ok(result) => {
                self.metrics
                    .record_result(result.fraud_score, result.risk_level);
                info!(
                    request_id = %result.request_id,
                    fraud_score = result.fraud_score,
                    risk_level = ?result.risk_level,
                    merchant_name = %result.merchant_name,
                    total_amount = result.total_amount,
                    processing_time_us = start.elapsed().as_micros() as u64,
                    "Request scored"
                );
            }
            Err(e) => {
                self.metrics.record_failure(e);
                warn!(kind = e.kind(), error = %e, "Request failed");
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        transaction: &TransactionRecord,
        receipt: ReceiptInput,
    ) -> Result<ScoringResult, PipelineError> {
        let scoring_start = Instant::now();
        let assessment = self.score_transaction(transaction)?;
        self.metrics
            .record_stage(Stage::Scoring, scoring_start.elapsed());

        let receipt_start = Instant::now();
        let extraction = self.read_receipt(receipt).await?;
        self.metrics
            .record_stage(Stage::Receipt, receipt_start.elapsed());

        debug!(
            fraud_score = assessment.fraud_score,
            merchant_name = %extraction.merchant_name,
            "Both stages complete"
        );

        Ok(ScoringResult::new(
            assessment.fraud_score,
            assessment.risk_level,
            extraction,
            self.feature_order().to_vec(),
        ))
    }

    async fn read_receipt(&self, input: ReceiptInput) -> Result<ReceiptExtraction, PipelineError> {
        let receipts = self.receipts.clone();
        tokio::task::spawn_blocking(move || match input {
            ReceiptInput::Path(path) => receipts.process_path(&path),
            ReceiptInput::Bytes(bytes) => receipts.process_bytes(&bytes),
        })
        .await
        .map_err(|e| PipelineError::Extraction(format!("Receipt worker failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inference::LogisticClassifier;
    use crate::models::scaler::{StandardScaler, NUMERICAL_COLUMNS};
    use crate::receipt::{OcrText, TextRecognizer};
    use crate::types::result::RiskLevel;
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed text and counts how often it was asked
    struct FixedText {
        text: &'static str,
        calls: AtomicUsize,
    }

    impl FixedText {
        fn new(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                text,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl TextRecognizer for FixedText {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<OcrText, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OcrText::from_raw(self.text.to_string()))
        }
    }

    struct FailingEngine;

    impl TextRecognizer for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<OcrText, PipelineError> {
            Err(PipelineError::Extraction("tesseract exited with 1".to_string()))
        }
    }

    const RECEIPT_TEXT: &str = "Thank you for shopping\nACME MARKET\n123 Main St\nMilk 3.99\nTOTAL 12.34\n";

    fn artifacts() -> ScoringArtifacts {
        let order: FeatureOrder = [
            "category",
            "amt",
            "gender",
            "city_pop",
            "merch_lat",
            "merch_long",
        ]
        .into_iter()
        .collect();

        // Centered on the reference transaction, so every scaled column is 0
        let scaler = StandardScaler {
            mean: vec![50.0, 40.7128, -74.006, 50000.0],
            scale: vec![10.0, 1.0, 1.0, 1000.0],
            columns: Some(NUMERICAL_COLUMNS.iter().map(|c| c.to_string()).collect()),
        };

        let classifier = LogisticClassifier {
            coefficients: vec![0.3, 1.0, 0.2, 0.5, 0.1, 0.1],
            intercept: 2.0,
        };

        ScoringArtifacts::new(Arc::new(classifier), scaler, order).unwrap()
    }

    fn pipeline(engine: Arc<dyn TextRecognizer>) -> ScoringPipeline {
        ScoringPipeline::new(
            artifacts(),
            RiskLevelThresholds::default(),
            ReceiptProcessor::new(engine),
            Arc::new(PipelineMetrics::new()),
        )
    }

    fn transaction() -> TransactionRecord {
        serde_json::from_value(json!({
            "category": "shopping",
            "amt": 50.0,
            "gender": "M",
            "city_pop": 50000,
            "merch_lat": 40.7128,
            "merch_long": -74.006
        }))
        .unwrap()
    }

    /// Light receipt with a dark text block, saved as PNG
    fn write_receipt(dir: &Path) -> PathBuf {
        let mut img = GrayImage::from_pixel(200, 300, Luma([235]));
        draw_filled_rect_mut(&mut img, Rect::at(40, 30).of_size(120, 20), Luma([20]));
        draw_filled_rect_mut(&mut img, Rect::at(40, 240).of_size(120, 14), Luma([20]));
        let path = dir.join("receipt.png");
        img.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_end_to_end_request() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FixedText::new(RECEIPT_TEXT);
        let pipeline = pipeline(engine.clone());

        let request = ScoringRequest {
            transaction: transaction(),
            receipt_path: write_receipt(dir.path()),
        };

        let first = pipeline.process(&request).await.unwrap();
        let second = pipeline.process(&request).await.unwrap();

        // Scaled numerics are all zero and both codes are 0: sigmoid(2.0)
        assert_eq!(first.fraud_score, 0.8808);
        assert_eq!(first.fraud_score, second.fraud_score);
        assert_eq!(first.risk_level, RiskLevel::High);
        assert_eq!(
            first.risk_level,
            RiskLevel::from_score(first.fraud_score, &RiskLevelThresholds::default())
        );
        assert_eq!(first.merchant_name, "ACME MARKET");
        assert_eq!(first.total_amount, 12.34);
        assert_eq!(
            first.features_used,
            vec!["category", "amt", "gender", "city_pop", "merch_lat", "merch_long"]
        );
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);

        let metrics = pipeline.metrics();
        assert_eq!(metrics.requests_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.get_stage_stats(Stage::Receipt).count, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = FixedText::new(RECEIPT_TEXT);
        let pipeline = Arc::new(pipeline(engine.clone()));
        let request = ScoringRequest {
            transaction: transaction(),
            receipt_path: write_receipt(dir.path()),
        };

        let tasks = (0..8).map(|_| {
            let pipeline = pipeline.clone();
            let request = request.clone();
            tokio::spawn(async move { pipeline.process(&request).await })
        });
        let results = futures::future::join_all(tasks).await;

        for result in results {
            let result = result.unwrap().unwrap();
            assert_eq!(result.fraud_score, 0.8808);
            assert_eq!(result.merchant_name, "ACME MARKET");
        }
        assert_eq!(engine.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_request_deserializes_from_json() {
        let request: ScoringRequest = serde_json::from_value(json!({
            "transaction": {"category": "travel", "gender": "F", "amt": 10.5},
            "receipt_path": "/tmp/receipt.png"
        }))
        .unwrap();

        assert_eq!(request.receipt_path, PathBuf::from("/tmp/receipt.png"));
        assert_eq!(request.transaction.get("category"), Some(&json!("travel")));
    }

    #[tokio::test]
    async fn test_missing_category_fails_before_image() {
        let engine = FixedText::new(RECEIPT_TEXT);
        let pipeline = pipeline(engine.clone());

        let mut fields = serde_json::Map::new();
        fields.insert("amt".to_string(), json!(50.0));
        fields.insert("gender".to_string(), json!("M"));

        let request = ScoringRequest {
            transaction: TransactionRecord::from(fields),
            // Never opened: validation fails first
            receipt_path: PathBuf::from("/nonexistent/receipt.png"),
        };

        let err = pipeline.process(&request).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.message().contains("category"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.metrics().get_failures_by_kind().get("validation"), Some(&1));
    }

    #[tokio::test]
    async fn test_missing_image_is_image_error() {
        let pipeline = pipeline(FixedText::new(RECEIPT_TEXT));
        let request = ScoringRequest {
            transaction: transaction(),
            receipt_path: PathBuf::from("/nonexistent/receipt.png"),
        };

        let err = pipeline.process(&request).await.unwrap_err();
        assert_eq!(err.kind(), "image");
    }

    #[tokio::test]
    async fn test_ocr_failure_fails_whole_request() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(FailingEngine));
        let request = ScoringRequest {
            transaction: transaction(),
            receipt_path: write_receipt(dir.path()),
        };

        let err = pipeline.process(&request).await.unwrap_err();
        assert_eq!(err.kind(), "extraction");

        let metrics = pipeline.metrics();
        assert_eq!(metrics.requests_processed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.requests_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_process_bytes_reads_in_memory_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = std::fs::read(write_receipt(dir.path())).unwrap();
        let pipeline = pipeline(FixedText::new("CORNER DELI\nTotal 8.75\n"));

        let result = pipeline.process_bytes(&transaction(), bytes).await.unwrap();
        assert_eq!(result.merchant_name, "CORNER DELI");
        assert_eq!(result.total_amount, 8.75);
    }

    #[test]
    fn test_score_transaction_ignores_unknown_fields() {
        let pipeline = pipeline(FixedText::new(""));
        let base = pipeline.score_transaction(&transaction()).unwrap();
        let extra = pipeline
            .score_transaction(&transaction().with("device_id", "abc-123"))
            .unwrap();
        assert_eq!(base, extra);
    }
}
