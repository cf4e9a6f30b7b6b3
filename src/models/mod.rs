//! Scoring components: scaling, classifier inference and artifact loading

pub mod inference;
pub mod loader;
pub mod scaler;

pub use inference::{Classifier, LogisticClassifier, OnnxClassifier, RiskAssessment, RiskScorer};
pub use loader::{ArtifactLoader, ScoringArtifacts};
pub use scaler::{ScalerAdapter, StandardScaler, NUMERICAL_COLUMNS};
