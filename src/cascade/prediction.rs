//! Prediction payloads returned by the cascade.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Strategy that produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Cache,
    Model,
    Engine,
}

impl PredictionSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            PredictionSource::Cache => "cache",
            PredictionSource::Model => "model",
            PredictionSource::Engine => "engine",
        }
    }
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted move in SAN.
    pub predicted_move: String,
    pub source: PredictionSource,
}

impl PredictionResult {
    pub fn new(predicted_move: impl Into<String>, source: PredictionSource) -> Self {
        Self {
            predicted_move: predicted_move.into(),
            source,
        }
    }
}
