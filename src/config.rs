//! Configuration management for the fraud + receipt gateway

use crate::types::result::RiskLevelThresholds;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Trained artifact bundle location
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory containing the artifact files
    pub dir: String,
    /// JSON array with the canonical feature order
    #[serde(default = "default_feature_order_file")]
    pub feature_order_file: String,
    /// JSON standard scaler parameters
    #[serde(default = "default_scaler_file")]
    pub scaler_file: String,
    /// `.onnx` model or `.json` logistic coefficients
    #[serde(default = "default_classifier_file")]
    pub classifier_file: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_feature_order_file() -> String {
    "feature_order.json".to_string()
}

fn default_scaler_file() -> String {
    "scaler.json".to_string()
}

fn default_classifier_file() -> String {
    "classifier.json".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

/// Detection configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectionConfig {
    /// Risk level classification thresholds
    #[serde(default)]
    pub risk_levels: RiskLevelThresholds,
}

/// OCR engine selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    /// Tesseract executable, image piped through stdin
    #[default]
    Cli,
    /// Linked libtesseract (needs the `tesseract-lib` feature)
    Leptess,
}

/// OCR configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub engine: OcrEngineKind,
    /// Path to the tesseract executable
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
    /// Tesseract language codes (e.g., "eng", "eng+fra")
    #[serde(default = "default_language")]
    pub language: String,
    /// Page segmentation mode (6 = single uniform block of text)
    #[serde(default = "default_psm")]
    pub page_segmentation_mode: u32,
}

fn default_tesseract_cmd() -> String {
    if cfg!(windows) {
        r"C:\Program Files\Tesseract-OCR\tesseract.exe".to_string()
    } else {
        "/usr/bin/tesseract".to_string()
    }
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_psm() -> u32 {
    6
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::Cli,
            tesseract_cmd: default_tesseract_cmd(),
            language: default_language(),
            page_segmentation_mode: default_psm(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requests processed concurrently
    pub workers: usize,
    /// Seconds between periodic metrics summaries (0 disables them)
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Config file read when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

impl AppConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`]
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific path, with `FRAUD_GATEWAY__*`
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD_GATEWAY").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject risk thresholds that break the banding rule
    pub fn validate(&self) -> Result<()> {
        let levels = &self.detection.risk_levels;
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(levels.medium) || !in_unit(levels.high) {
            bail!(
                "Risk thresholds must lie in [0, 1] (medium={}, high={})",
                levels.medium,
                levels.high
            );
        }
        if levels.medium > levels.high {
            bail!(
                "Medium risk threshold {} is above high threshold {}",
                levels.medium,
                levels.high
            );
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactsConfig {
                dir: "artifacts".to_string(),
                feature_order_file: default_feature_order_file(),
                scaler_file: default_scaler_file(),
                classifier_file: default_classifier_file(),
                onnx_threads: default_onnx_threads(),
            },
            detection: DetectionConfig::default(),
            ocr: OcrConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.artifacts.dir, "artifacts");
        assert_eq!(config.detection.risk_levels.medium, 0.5);
        assert_eq!(config.detection.risk_levels.high, 0.85);
        assert_eq!(config.ocr.engine, OcrEngineKind::Cli);
        assert_eq!(config.ocr.page_segmentation_mode, 6);
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn test_load_from_path_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[artifacts]
dir = "/srv/models"
classifier_file = "calibrated.onnx"

[ocr]
engine = "leptess"
language = "eng+fra"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();

        assert_eq!(config.artifacts.dir, "/srv/models");
        assert_eq!(config.artifacts.classifier_file, "calibrated.onnx");
        assert_eq!(config.artifacts.scaler_file, "scaler.json");
        assert_eq!(config.ocr.engine, OcrEngineKind::Leptess);
        assert_eq!(config.ocr.language, "eng+fra");
        assert_eq!(config.ocr.page_segmentation_mode, 6);
        assert_eq!(config.detection.risk_levels, RiskLevelThresholds::default());
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/config.toml");
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.artifacts.classifier_file, "classifier.json");
        assert_eq!(config.pipeline.metrics_interval_secs, 30);
    }

    #[test]
    fn test_load_reads_default_path() {
        // Tests run from the package root
        let config = AppConfig::load().unwrap();
        assert_eq!(config.artifacts.dir, "artifacts");
    }

    #[test]
    fn test_default_matches_shipped_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let shipped = AppConfig::load_from_path(path).unwrap();
        let default = AppConfig::default();

        assert_eq!(default.artifacts.feature_order_file, shipped.artifacts.feature_order_file);
        assert_eq!(default.artifacts.scaler_file, shipped.artifacts.scaler_file);
        assert_eq!(default.artifacts.classifier_file, shipped.artifacts.classifier_file);
        assert_eq!(default.artifacts.onnx_threads, shipped.artifacts.onnx_threads);
        assert_eq!(default.detection.risk_levels, shipped.detection.risk_levels);
        assert_eq!(default.ocr.engine, shipped.ocr.engine);
        assert_eq!(default.ocr.language, shipped.ocr.language);
        assert_eq!(default.pipeline.workers, shipped.pipeline.workers);
        assert_eq!(default.logging.level, shipped.logging.level);
        assert_eq!(default.logging.format, shipped.logging.format);
    }

    fn load_toml(contents: &str) -> Result<AppConfig> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        AppConfig::load_from_path(file.path())
    }

    #[test]
    fn test_rejects_inverted_risk_thresholds() {
        let err = load_toml(
            "[artifacts]\ndir = \"a\"\n[detection.risk_levels]\nmedium = 0.9\nhigh = 0.6\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("above high threshold"));
    }

    #[test]
    fn test_rejects_thresholds_outside_unit_interval() {
        assert!(load_toml("[artifacts]\ndir = \"a\"\n[detection.risk_levels]\nhigh = 1.5\n").is_err());
        assert!(load_toml("[artifacts]\ndir = \"a\"\n[detection.risk_levels]\nmedium = -0.1\n").is_err());
        assert!(load_toml("[artifacts]\ndir = \"a\"\n[detection.risk_levels]\nmedium = 0.7\n").is_ok());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load_from_path("/nonexistent/config.toml").is_err());
    }
}
