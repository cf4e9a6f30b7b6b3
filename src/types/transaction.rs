//! Transaction records and the categorical encoding table

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Merchant category of a card transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Shopping,
    FoodDining,
    Travel,
    GasTransport,
    Entertainment,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Shopping,
        Category::FoodDining,
        Category::Travel,
        Category::GasTransport,
        Category::Entertainment,
    ];

    /// Wire label, exactly as clients send it
    pub fn label(&self) -> &'static str {
        match self {
            Category::Shopping => "shopping",
            Category::FoodDining => "food_dining",
            Category::Travel => "travel",
            Category::GasTransport => "gas_transport",
            Category::Entertainment => "entertainment",
        }
    }

    /// Integer code the classifier was trained with
    pub fn code(&self) -> u8 {
        match self {
            Category::Shopping => 0,
            Category::FoodDining => 1,
            Category::Travel => 2,
            Category::GasTransport => 3,
            Category::Entertainment => 4,
        }
    }

    /// Case-sensitive lookup by wire label
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Cardholder gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn label(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Gender::M => 0,
            Gender::F => 1,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "M" => Some(Gender::M),
            "F" => Some(Gender::F),
            _ => None,
        }
    }
}

/// Fixed mapping from categorical field values to integer codes.
///
/// Both enumerations are closed; anything outside them is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingTable;

impl EncodingTable {
    /// Fields that must be present and encoded before alignment
    pub const FIELDS: [&'static str; 2] = ["category", "gender"];

    /// Encode `value` for the categorical `field`, `None` if either is unknown.
    pub fn encode(&self, field: &str, value: &str) -> Option<u8> {
        match field {
            "category" => Category::from_label(value).map(|c| c.code()),
            "gender" => Gender::from_label(value).map(|g| g.code()),
            _ => None,
        }
    }

    pub fn is_categorical(&self, field: &str) -> bool {
        Self::FIELDS.contains(&field)
    }
}

/// Numeric fields that may not be negative
const NON_NEGATIVE_FIELDS: [&str; 2] = ["amt", "city_pop"];

/// Transaction payload as submitted by the client.
///
/// Kept as an open key/value map because the canonical column set comes from
/// the trained artifacts, not from this type. Typed access goes through
/// [`TransactionRecord::encoded`] and [`TransactionRecord::numeric`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRecord {
    fields: Map<String, Value>,
}

impl TransactionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and tooling
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encoded value of a required categorical field.
    pub fn encoded(&self, field: &str, table: &EncodingTable) -> Result<u8, PipelineError> {
        let value = self
            .fields
            .get(field)
            .ok_or_else(|| PipelineError::Validation(format!("Missing '{}' in transaction", field)))?;

        value
            .as_str()
            .and_then(|label| table.encode(field, label))
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "Invalid value for '{}': {}",
                    field,
                    display_value(value)
                ))
            })
    }

    /// Value of an optional numeric field; `None` when absent or null.
    pub fn numeric(&self, field: &str) -> Result<Option<f64>, PipelineError> {
        let value = match self.fields.get(field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Bool(b)) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                PipelineError::Validation(format!("Field '{}' is not a finite number", field))
            })?,
            Some(other) => {
                return Err(PipelineError::Validation(format!(
                    "Field '{}' must be numeric, got {}",
                    field,
                    display_value(other)
                )))
            }
        };

        if NON_NEGATIVE_FIELDS.contains(&field) && value < 0.0 {
            return Err(PipelineError::Validation(format!(
                "Field '{}' must not be negative, got {}",
                field, value
            )));
        }

        Ok(Some(value))
    }
}

impl From<Map<String, Value>> for TransactionRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
