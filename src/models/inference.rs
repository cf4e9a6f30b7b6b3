//! Fraud probability inference and risk banding

use crate::error::PipelineError;
use crate::feature_aligner::FeatureVector;
use crate::types::result::{RiskLevel, RiskLevelThresholds};
use ort::memory::Allocator;
use ort::session::Session;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Pre-trained probabilistic classifier, consumed as a black box.
pub trait Classifier: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Input width the classifier declares, when it declares one
    fn expected_features(&self) -> Option<usize>;

    /// Probability of the positive (fraud) class for one row
    fn predict_fraud_probability(&self, features: &[f64]) -> Result<f64, PipelineError>;
}

/// Classifier exported to ONNX and run with ONNX Runtime.
pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    pub fn new(name: String, session: Session, input_name: String, output_name: String) -> Self {
        Self {
            name,
            session: Mutex::new(session),
            input_name,
            output_name,
        }
    }

    /// Extract fraud probability from model output.
    /// Handles both tensor outputs and seq(map) outputs (scikit-learn zipmap)
    fn extract_probability(&self, outputs: &ort::session::SessionOutputs) -> Result<f64, PipelineError> {
        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Some(prob) = self.probability_from_value(output) {
                return Ok(prob);
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(prob) = self.probability_from_value(&output) {
                debug!(model = %self.name, output = %name, prob = prob, "Extracted from fallback output");
                return Ok(prob);
            }
        }

        Err(PipelineError::Scoring(format!(
            "model '{}' produced no readable fraud probability",
            self.name
        )))
    }

    fn probability_from_value(&self, output: &DynValue) -> Option<f64> {
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return fraud_prob_from_tensor(&dims, data);
        }

        if DynSequenceValueType::can_downcast(&output.dtype()) {
            return self.probability_from_sequence_map(output);
        }

        None
    }

    /// Probability from seq(map(int64, float)), class key 1
    fn probability_from_sequence_map(&self, output: &DynValue) -> Option<f64> {
        let allocator = Allocator::default();
        let sequence = output.downcast_ref::<DynSequenceValueType>().ok()?;
        let maps = sequence
            .try_extract_sequence::<DynMapValueType>(&allocator)
            .ok()?;
        let kv_pairs = maps.first()?.try_extract_key_values::<i64, f32>().ok()?;
        fraud_prob_from_class_map(&kv_pairs)
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn expected_features(&self) -> Option<usize> {
        None
    }

    fn predict_fraud_probability(&self, features: &[f64]) -> Result<f64, PipelineError> {
        let data: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, data.len() as i64];
        let input_tensor = Tensor::from_array((shape, data)).map_err(|e| {
            PipelineError::Scoring(format!("failed to build input tensor: {}", e))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| PipelineError::Scoring(format!("model lock poisoned: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| {
                PipelineError::Scoring(format!("model '{}' inference failed: {}", self.name, e))
            })?;

        self.extract_probability(&outputs)
    }
}

/// Class 1 probability from a class -> probability map, else `1 - p(0)`.
fn fraud_prob_from_class_map(kv_pairs: &[(i64, f32)]) -> Option<f64> {
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
        return Some(f64::from(*prob));
    }
    kv_pairs
        .iter()
        .find(|(class_id, _)| *class_id == 0)
        .map(|(_, prob)| 1.0 - f64::from(*prob))
}

/// Pick the positive-class probability out of a probability tensor.
fn fraud_prob_from_tensor(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = match dims {
        [_, classes] => *classes,
        [classes] => *classes,
        _ => return None,
    };

    match classes {
        // [batch, 2] or [2]: index 1 is the fraud class
        c if c >= 2 => data.get(1).map(|&p| f64::from(p)),
        1 => data.first().map(|&p| f64::from(p)),
        _ => None,
    }
}

/// Logistic regression coefficients: `sigmoid(w·x + b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Classifier for LogisticClassifier {
    fn name(&self) -> &str {
        "logistic"
    }

    fn expected_features(&self) -> Option<usize> {
        Some(self.coefficients.len())
    }

    fn predict_fraud_probability(&self, features: &[f64]) -> Result<f64, PipelineError> {
        if features.len() != self.coefficients.len() {
            return Err(PipelineError::Scoring(format!(
                "logistic model expects {} features, got {}",
                self.coefficients.len(),
                features.len()
            )));
        }

        let z: f64 = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;

        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// Score and band for one transaction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    /// Unrounded fraud probability
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
}

/// Runs the classifier on a scaled feature vector and bands the result.
#[derive(Clone)]
pub struct RiskScorer {
    classifier: Arc<dyn Classifier>,
    thresholds: RiskLevelThresholds,
}

impl RiskScorer {
    pub fn new(classifier: Arc<dyn Classifier>, thresholds: RiskLevelThresholds) -> Self {
        Self {
            classifier,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &RiskLevelThresholds {
        &self.thresholds
    }

    pub fn score(&self, features: &FeatureVector) -> Result<RiskAssessment, PipelineError> {
        if let Some(expected) = self.classifier.expected_features() {
            if expected != features.len() {
                return Err(PipelineError::Scoring(format!(
                    "classifier '{}' expects {} features, feature order has {}",
                    self.classifier.name(),
                    expected,
                    features.len()
                )));
            }
        }

        let fraud_score = self.classifier.predict_fraud_probability(features.values())?;
        if !(0.0..=1.0).contains(&fraud_score) {
            return Err(PipelineError::Scoring(format!(
                "classifier '{}' returned probability {} outside [0, 1]",
                self.classifier.name(),
                fraud_score
            )));
        }

        let risk_level = RiskLevel::from_score(fraud_score, &self.thresholds);

        debug!(
            model = %self.classifier.name(),
            fraud_score = fraud_score,
            risk_level = ?risk_level,
            "Transaction scored"
        );

        Ok(RiskAssessment {
            fraud_score,
            risk_level,
        })
    }
}
