//! OCR engines for normalized receipt images.
//!
//! Receipts are a single dense column of text, so every engine runs
//! Tesseract with page segmentation mode 6 ("assume a single uniform block
//! of text") unless configured otherwise.

use crate::config::{OcrConfig, OcrEngineKind};
use crate::error::PipelineError;
use crate::receipt::fields::OcrText;
use anyhow::{bail, Context, Result};
use image::{GrayImage, ImageFormat};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a normalized image into raw OCR text lines.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, image: &GrayImage) -> Result<OcrText, PipelineError>;
}

/// Build the engine selected by `[ocr]`.
pub fn build_recognizer(config: &OcrConfig) -> Result<Arc<dyn TextRecognizer>> {
    match config.engine {
        OcrEngineKind::Cli => {
            let cli = TesseractCli::new(config);
            let version = cli.version()?;
            info!(command = %cli.command.display(), version = %version, "Tesseract executable found");
            Ok(Arc::new(cli))
        }
        #[cfg(feature = "tesseract-lib")]
        OcrEngineKind::Leptess => Ok(Arc::new(LepTessRecognizer::new(config)?)),
        #[cfg(not(feature = "tesseract-lib"))]
        OcrEngineKind::Leptess => {
            bail!("OCR engine 'leptess' requires building with the 'tesseract-lib' feature")
        }
    }
}

/// Encode to PNG in memory; both engines take encoded bytes
fn encode_png(image: &GrayImage) -> Result<Vec<u8>, PipelineError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Extraction(format!(
            "Image dimensions must be non-zero (got {}x{})",
            width, height
        )));
    }

    let mut png_buf = Cursor::new(Vec::new());
    image
        .write_to(&mut png_buf, ImageFormat::Png)
        .map_err(|e| PipelineError::Extraction(format!("Failed to encode image to PNG: {}", e)))?;
    Ok(png_buf.into_inner())
}

/// Tesseract invoked as a local executable, image piped through stdin.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: PathBuf,
    language: String,
    page_segmentation_mode: u32,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: PathBuf::from(&config.tesseract_cmd),
            language: config.language.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        }
    }

    /// First line of `tesseract --version`, failing if the executable is unusable
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.command)
            .arg("--version")
            .output()
            .with_context(|| format!("Failed to run {}", self.command.display()))?;

        if !output.status.success() {
            bail!(
                "{} --version exited with {}",
                self.command.display(),
                output.status
            );
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--psm".to_string(),
            self.page_segmentation_mode.to_string(),
            "-l".to_string(),
            self.language.clone(),
        ]
    }
}

impl TextRecognizer for TesseractCli {
    fn name(&self) -> &str {
        "tesseract-cli"
    }

    fn recognize(&self, image: &GrayImage) -> Result<OcrText, PipelineError> {
        let png = encode_png(image)?;

        let mut child = Command::new(&self.command)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::Extraction(format!(
                    "Failed to start {}: {}",
                    self.command.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Extraction("tesseract stdin unavailable".to_string()))?;
        // Feed stdin from another thread so a full stdout pipe cannot stall us
        let writer = std::thread::spawn(move || stdin.write_all(&png));

        let output = child.wait_with_output().map_err(|e| {
            PipelineError::Extraction(format!("Failed to wait for tesseract: {}", e))
        })?;

        if !output.status.success() {
            return Err(PipelineError::Extraction(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        writer
            .join()
            .map_err(|_| PipelineError::Extraction("tesseract stdin writer panicked".to_string()))?
            .map_err(|e| PipelineError::Extraction(format!("Failed to send image to tesseract: {}", e)))?;

        let raw = String::from_utf8(output.stdout).map_err(|e| {
            PipelineError::Extraction(format!("tesseract produced non-UTF-8 output: {}", e))
        })?;

        let text = OcrText::from_raw(raw);
        debug!(engine = self.name(), lines = text.lines().len(), "OCR complete");
        Ok(text)
    }
}

/// In-process libtesseract through `leptess`.
#[cfg(feature = "tesseract-lib")]
#[derive(Debug, Clone)]
pub struct LepTessRecognizer {
    language: String,
    page_segmentation_mode: u32,
}

#[cfg(feature = "tesseract-lib")]
impl LepTessRecognizer {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        // Verify Tesseract can initialize with the specified language
        leptess::LepTess::new(None, &config.language).map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize Tesseract with language '{}': {}",
                config.language,
                e
            )
        })?;

        Ok(Self {
            language: config.language.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        })
    }
}

#[cfg(feature = "tesseract-lib")]
impl TextRecognizer for LepTessRecognizer {
    fn name(&self) -> &str {
        "leptess"
    }

    fn recognize(&self, image: &GrayImage) -> Result<OcrText, PipelineError> {
        use leptess::{LepTess, Variable};

        let png = encode_png(image)?;

        // LepTess is not Sync; one instance per call
        let mut lt = LepTess::new(None, &self.language).map_err(|e| {
            PipelineError::Extraction(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_variable(
            Variable::TesseditPagesegMode,
            &self.page_segmentation_mode.to_string(),
        )
        .map_err(|e| PipelineError::Extraction(format!("Failed to set PSM: {}", e)))?;

        lt.set_image_from_mem(&png).map_err(|e| {
            PipelineError::Extraction(format!("Failed to set image from memory: {}", e))
        })?;

        let raw = lt
            .get_utf8_text()
            .map_err(|e| PipelineError::Extraction(format!("Failed to run OCR: {}", e)))?;

        Ok(OcrText::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cmd: &str) -> OcrConfig {
        OcrConfig {
            engine: OcrEngineKind::Cli,
            tesseract_cmd: cmd.to_string(),
            language: "eng".to_string(),
            page_segmentation_mode: 6,
        }
    }

    #[test]
    fn test_cli_arguments_use_single_block_mode() {
        let cli = TesseractCli::new(&config("tesseract"));
        assert_eq!(cli.args(), vec!["stdin", "stdout", "--psm", "6", "-l", "eng"]);
    }

    #[test]
    fn test_missing_executable_is_extraction_error() {
        let cli = TesseractCli::new(&config("/nonexistent/bin/tesseract"));
        let err = cli.recognize(&GrayImage::new(8, 8)).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(cli.version().is_err());
        assert!(build_recognizer(&config("/nonexistent/bin/tesseract")).is_err());
    }

    #[test]
    fn test_empty_image_rejected_before_ocr() {
        let err = encode_png(&GrayImage::new(0, 0)).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(!encode_png(&GrayImage::new(4, 4)).unwrap().is_empty());
    }
}
