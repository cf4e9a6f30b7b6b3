//! Feature alignment for fraud model inference.
//!
//! This module turns an open transaction record into the exact column
//! sequence the trained classifier expects. The canonical order is not
//! hard-coded: it ships with the trained artifacts and is loaded once at
//! startup.

use crate::error::PipelineError;
use crate::types::transaction::{EncodingTable, TransactionRecord};
use std::sync::Arc;

/// Canonical column sequence of the trained classifier.
///
/// Cheap to clone; every request shares the same backing slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOrder(Arc<[String]>);

impl FeatureOrder {
    pub fn new(columns: Vec<String>) -> Self {
        Self(columns.into())
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index of a column, if the classifier uses it
    pub fn position(&self, column: &str) -> Option<usize> {
        self.0.iter().position(|c| c == column)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.to_vec()
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureOrder {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Named numeric columns in [`FeatureOrder`] sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    order: FeatureOrder,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn order(&self) -> &FeatureOrder {
        &self.order
    }

    pub fn columns(&self) -> &[String] {
        self.order.columns()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.order.position(column).map(|i| self.values[i])
    }

    /// Overwrite a column in place, `false` if the column is unknown
    pub fn set(&mut self, column: &str, value: f64) -> bool {
        match self.order.position(column) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Single-precision copy for ONNX float inputs
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }
}

/// Builds fixed-order feature vectors from transaction records.
#[derive(Debug, Clone)]
pub struct FeatureAligner {
    table: EncodingTable,
    order: FeatureOrder,
}

impl FeatureAligner {
    pub fn new(order: FeatureOrder) -> Self {
        Self {
            table: EncodingTable,
            order,
        }
    }

    pub fn feature_order(&self) -> &FeatureOrder {
        &self.order
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.order.len()
    }

    /// Align a record to the canonical order.
    ///
    /// Categorical fields are required and encoded first, whether or not the
    /// classifier uses them. Any other canonical column the record lacks is 0;
    /// record fields outside the canonical order are dropped.
    pub fn align(&self, record: &TransactionRecord) -> Result<FeatureVector, PipelineError> {
        let mut encoded = Vec::with_capacity(EncodingTable::FIELDS.len());
        for field in EncodingTable::FIELDS {
            encoded.push((field, record.encoded(field, &self.table)?));
        }

        let mut values = Vec::with_capacity(self.order.len());
        for column in self.order.columns() {
            let value = match encoded.iter().find(|(field, _)| *field == column.as_str()) {
                Some((_, code)) => f64::from(*code),
                None => record.numeric(column)?.unwrap_or(0.0),
            };
            values.push(value);
        }

        Ok(FeatureVector {
            order: self.order.clone(),
            values,
        })
    }
}
