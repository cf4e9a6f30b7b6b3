//! Pre-fitted numeric scaling of the feature vector

use crate::error::PipelineError;
use crate::feature_aligner::FeatureVector;
use serde::{Deserialize, Serialize};

/// Columns the scaler was fitted on, in fit order.
///
/// Encoded categorical columns are never scaled.
pub const NUMERICAL_COLUMNS: [&str; 4] = ["amt", "merch_lat", "merch_long", "city_pop"];

/// Fitted standard scaler parameters: `(x - mean) / scale` per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    /// Column names seen at fit time, when the exporter recorded them
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl StandardScaler {
    /// Number of columns the scaler was fitted on
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Transform one row in place.
    pub fn transform(&self, row: &mut [f64]) -> Result<(), PipelineError> {
        if row.len() != self.mean.len() || row.len() != self.scale.len() {
            return Err(PipelineError::Scoring(format!(
                "scaler expects {} columns, got {}",
                self.mean.len(),
                row.len()
            )));
        }

        for ((value, mean), scale) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            // Zero-variance columns are only centered
            let scale = if *scale == 0.0 { 1.0 } else { *scale };
            *value = (*value - mean) / scale;
        }

        Ok(())
    }
}

/// Applies the fitted scaler to the numerical subset of a feature vector.
#[derive(Debug, Clone)]
pub struct ScalerAdapter {
    scaler: StandardScaler,
}

impl ScalerAdapter {
    pub fn new(scaler: StandardScaler) -> Self {
        Self { scaler }
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Check the scaler against the numerical subset and a feature order.
    ///
    /// Run once when artifacts are loaded so schema drift fails at startup;
    /// [`ScalerAdapter::apply`] repeats the same checks per request.
    pub fn check_schema(&self, columns: &[String]) -> Result<(), PipelineError> {
        if self.scaler.n_features() != NUMERICAL_COLUMNS.len() {
            return Err(PipelineError::Scoring(format!(
                "scaler was fitted on {} columns, numerical subset has {}",
                self.scaler.n_features(),
                NUMERICAL_COLUMNS.len()
            )));
        }

        if let Some(fitted) = &self.scaler.columns {
            if fitted.iter().map(String::as_str).ne(NUMERICAL_COLUMNS) {
                return Err(PipelineError::Scoring(format!(
                    "scaler columns {:?} do not match numerical subset {:?}",
                    fitted, NUMERICAL_COLUMNS
                )));
            }
        }

        if let Some(missing) = NUMERICAL_COLUMNS
            .iter()
            .find(|col| !columns.iter().any(|c| c.as_str() == **col))
        {
            return Err(PipelineError::Scoring(format!(
                "numerical column '{}' missing from feature order",
                missing
            )));
        }

        Ok(())
    }

    /// Scale the numerical columns in place, leaving every other column alone.
    pub fn apply(&self, features: &mut FeatureVector) -> Result<(), PipelineError> {
        self.check_schema(features.columns())?;

        let mut subset: Vec<f64> = NUMERICAL_COLUMNS
            .iter()
            .map(|col| features.get(col).unwrap_or_default())
            .collect();

        self.scaler.transform(&mut subset)?;

        for (col, value) in NUMERICAL_COLUMNS.iter().zip(subset) {
            features.set(col, value);
        }

        Ok(())
    }
}
