//! Receipt pipeline: image normalization, OCR, field extraction

pub mod fields;
pub mod normalize;
pub mod recognizer;

pub use fields::{FieldExtractor, OcrText};
pub use normalize::{ImageNormalizer, NormalizedImage};
pub use recognizer::{build_recognizer, TesseractCli, TextRecognizer};

use crate::error::PipelineError;
use crate::types::result::ReceiptExtraction;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Runs one receipt image end to end. CPU-bound and blocking; async callers
/// should move it off the runtime threads.
#[derive(Clone)]
pub struct ReceiptProcessor {
    normalizer: ImageNormalizer,
    recognizer: Arc<dyn TextRecognizer>,
    extractor: FieldExtractor,
}

impl ReceiptProcessor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            normalizer: ImageNormalizer::new(),
            recognizer,
            extractor: FieldExtractor::new(),
        }
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    pub fn process_path(&self, path: &Path) -> Result<ReceiptExtraction, PipelineError> {
        let normalized = self.normalizer.normalize_path(path)?;
        self.extract(normalized)
    }

    pub fn process_bytes(&self, bytes: &[u8]) -> Result<ReceiptExtraction, PipelineError> {
        let normalized = self.normalizer.normalize_bytes(bytes)?;
        self.extract(normalized)
    }

    fn extract(&self, normalized: NormalizedImage) -> Result<ReceiptExtraction, PipelineError> {
        let start = Instant::now();
        let text = self.recognizer.recognize(&normalized.image)?;
        let receipt = self.extractor.extract(&text);

        debug!(
            engine = self.recognizer.name(),
            skew_angle = normalized.skew_angle,
            lines = text.lines().len(),
            merchant_name = %receipt.merchant_name,
            total_amount = receipt.total_amount,
            ocr_time_us = start.elapsed().as_micros() as u64,
            "Receipt fields extracted"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Records the image it was given and returns fixed text
    struct FixedText {
        text: String,
        seen: Mutex<Option<(u32, u32)>>,
    }

    impl TextRecognizer for FixedText {
        fn name(&self) -> &str {
            "fixed"
        }

        fn recognize(&self, image: &GrayImage) -> Result<OcrText, PipelineError> {
            *self.seen.lock().unwrap() = Some(image.dimensions());
            Ok(OcrText::from_raw(self.text.clone()))
        }
    }

    struct FailingEngine;

    impl TextRecognizer for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&self, _image: &GrayImage) -> Result<OcrText, PipelineError> {
            Err(PipelineError::Extraction("engine crashed".to_string()))
        }
    }

    fn png() -> Vec<u8> {
        let img = GrayImage::from_pixel(60, 90, Luma([240]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_processes_image_through_engine() {
        let engine = Arc::new(FixedText {
            text: "Welcome!\nCORNER DELI\n42 Elm St\nTOTAL 8.75\n".to_string(),
            seen: Mutex::new(None),
        });
        let processor = ReceiptProcessor::new(engine.clone());

        let receipt = processor.process_bytes(&png()).unwrap();

        assert_eq!(receipt.merchant_name, "CORNER DELI");
        assert_eq!(receipt.total_amount, 8.75);
        assert_eq!(*engine.seen.lock().unwrap(), Some((60, 90)));
    }

    #[test]
    fn test_engine_failure_aborts_extraction() {
        let processor = ReceiptProcessor::new(Arc::new(FailingEngine));
        let err = processor.process_bytes(&png()).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn test_bad_image_fails_before_ocr() {
        let engine = Arc::new(FixedText {
            text: String::new(),
            seen: Mutex::new(None),
        });
        let processor = ReceiptProcessor::new(engine.clone());

        let err = processor.process_bytes(b"garbage").unwrap_err();
        assert_eq!(err.kind(), "image");
        assert!(engine.seen.lock().unwrap().is_none());
    }
}
