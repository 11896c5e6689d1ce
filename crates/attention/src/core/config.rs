//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs such as causality and
//! dropout that callers can tune without swapping implementations.

use std::env;

use super::AttentionError;

/// Environment variable overriding [`Config::dropout_p`].
pub const DROPOUT_ENV: &str = "ATTENTION_DROPOUT_P";

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Build a causal mask whenever the caller does not supply one.
    pub causal: bool,
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
}

impl Config {
    pub fn causal() -> Self {
        Self {
            causal: true,
            dropout_p: None,
        }
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Replaces fields with values found in the process environment.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(DROPOUT_ENV) {
            match raw.trim().parse::<f32>() {
                Ok(p) => self.dropout_p = Some(p),
                Err(_) => log::warn!("ignoring {DROPOUT_ENV}={raw:?}: not a number"),
            }
        }
    }

    /// Effective dropout probability, `0.0` when disabled.
    pub fn dropout_probability(&self) -> f32 {
        self.dropout_p.unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        let p = self.dropout_probability();
        if !(0.0..1.0).contains(&p) {
            return Err(AttentionError::config(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }
        Ok(())
    }
}
