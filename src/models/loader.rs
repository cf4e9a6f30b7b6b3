//! Trained artifact loading (classifier, scaler, feature order)

use crate::config::ArtifactsConfig;
use crate::feature_aligner::FeatureOrder;
use crate::models::inference::{Classifier, LogisticClassifier, OnnxClassifier};
use crate::models::scaler::{ScalerAdapter, StandardScaler};
use anyhow::{bail, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything the scoring path needs from training.
///
/// Built once at startup and shared read-only behind an `Arc`; there is no
/// reload path.
pub struct ScoringArtifacts {
    pub classifier: Arc<dyn Classifier>,
    pub scaler: ScalerAdapter,
    pub feature_order: FeatureOrder,
}

impl ScoringArtifacts {
    /// Assemble a bundle, rejecting artifacts that disagree with each other.
    pub fn new(
        classifier: Arc<dyn Classifier>,
        scaler: StandardScaler,
        feature_order: FeatureOrder,
    ) -> Result<Self> {
        let scaler = ScalerAdapter::new(scaler);
        scaler
            .check_schema(feature_order.columns())
            .context("Scaler does not match feature order")?;

        if let Some(expected) = classifier.expected_features() {
            if expected != feature_order.len() {
                bail!(
                    "Classifier '{}' expects {} features, feature order has {}",
                    classifier.name(),
                    expected,
                    feature_order.len()
                );
            }
        }

        Ok(Self {
            classifier,
            scaler,
            feature_order,
        })
    }

    /// Load the bundle described by `[artifacts]`.
    pub fn load(config: &ArtifactsConfig) -> Result<Self> {
        let loader = ArtifactLoader::with_threads(config.onnx_threads);
        let dir = Path::new(&config.dir);

        let feature_order = loader.load_feature_order(dir.join(&config.feature_order_file))?;
        let scaler = loader.load_scaler(dir.join(&config.scaler_file))?;
        let classifier = loader.load_classifier(dir.join(&config.classifier_file))?;

        let artifacts = Self::new(classifier, scaler, feature_order)?;

        info!(
            classifier = %artifacts.classifier.name(),
            features = artifacts.feature_order.len(),
            feature_order = ?artifacts.feature_order.columns(),
            "Scoring artifacts loaded"
        );

        Ok(artifacts)
    }
}

/// Loader for trained artifacts
pub struct ArtifactLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ArtifactLoader {
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Canonical column order: a JSON array of unique, non-empty names
    pub fn load_feature_order<P: AsRef<Path>>(&self, path: P) -> Result<FeatureOrder> {
        let columns: Vec<String> = read_json(path.as_ref())?;

        if columns.is_empty() {
            bail!("Feature order in {} is empty", path.as_ref().display());
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() || !seen.insert(column.as_str()) {
                bail!(
                    "Feature order in {} has an empty or duplicate column '{}'",
                    path.as_ref().display(),
                    column
                );
            }
        }

        Ok(FeatureOrder::new(columns))
    }

    /// Fitted standard scaler: `{"mean": [...], "scale": [...], "columns": [...]?}`
    pub fn load_scaler<P: AsRef<Path>>(&self, path: P) -> Result<StandardScaler> {
        let scaler: StandardScaler = read_json(path.as_ref())?;

        if scaler.mean.len() != scaler.scale.len() {
            bail!(
                "Scaler in {} has {} means but {} scales",
                path.as_ref().display(),
                scaler.mean.len(),
                scaler.scale.len()
            );
        }
        if scaler
            .mean
            .iter()
            .chain(&scaler.scale)
            .any(|v| !v.is_finite())
        {
            bail!("Scaler in {} has non-finite parameters", path.as_ref().display());
        }

        Ok(scaler)
    }

    /// Classifier by file extension: `.onnx` or `.json` (logistic)
    pub fn load_classifier<P: AsRef<Path>>(&self, path: P) -> Result<Arc<dyn Classifier>> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("classifier")
            .to_string();

        match path.extension().and_then(|e| e.to_str()) {
            Some("onnx") => Ok(Arc::new(self.load_onnx(path, &name)?)),
            Some("json") => {
                let model: LogisticClassifier = read_json(path)?;
                info!(model = %name, features = model.coefficients.len(), "Logistic model loaded");
                Ok(Arc::new(model))
            }
            _ => bail!(
                "Unsupported classifier artifact {} (expected .onnx or .json)",
                path.display()
            ),
        }
    }

    /// Load an ONNX classifier
    pub fn load_onnx(&self, path: &Path, name: &str) -> Result<OnnxClassifier> {
        info!(model = %name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(OnnxClassifier::new(
            name.to_string(),
            session,
            input_name,
            output_name,
        ))
    }
}

impl Default for ArtifactLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse artifact {}", path.display()))
}
