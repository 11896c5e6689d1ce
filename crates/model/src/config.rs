use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Shape of the transformer stack.
///
/// Every field falls back to the GPT-2 small layout when omitted from a
/// configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    pub vocab_size: usize,
    pub context_size: usize,
    pub embedding_size: usize,
    pub head_count: usize,
    pub layer_count: usize,
    /// Dropout applied to attention weights, residual branches and the
    /// feed-forward activation during training.
    pub drop_probability: f32,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            vocab_size: 50257,
            context_size: 512,
            embedding_size: 64 * 12,
            head_count: 12,
            layer_count: 3,
            drop_probability: 0.2,
        }
    }
}

impl HyperParameters {
    /// Loads hyper-parameters from a `.toml` or `.json` file and validates them.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let params: HyperParameters = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => return Err(ModelError::ConfigFormat(other.to_string())),
        };
        params.validate()?;
        Ok(params)
    }

    /// Width of one attention head.
    pub fn head_size(&self) -> usize {
        self.embedding_size / self.head_count.max(1)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("context_size", self.context_size),
            ("embedding_size", self.embedding_size),
            ("head_count", self.head_count),
            ("layer_count", self.layer_count),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if self.head_count > 0 && self.embedding_size % self.head_count != 0 {
            errors.push(format!(
                "embedding_size ({}) must be divisible by head_count ({})",
                self.embedding_size, self.head_count
            ));
        }
        if !(0.0..1.0).contains(&self.drop_probability) {
            errors.push(format!(
                "drop_probability must be in [0, 1), got {}",
                self.drop_probability
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Validation(errors))
        }
    }
}
