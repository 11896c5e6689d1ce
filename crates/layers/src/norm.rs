//! Layer normalisation over the feature axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention and are normalised
//! along the last axis. The encoder applies it before each sublayer
//! (pre-norm), and the transformer applies one more before the read-out.

use candle_core::{Device, Error, Result, Tensor, D};

use crate::checks;

/// Configuration for a layer normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }
}

/// LayerNorm with a learnable scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Constructs a LayerNorm from existing parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(Error::Msg("layer norm requires hidden_size > 0".into()));
        }
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Identity-initialised LayerNorm (scale = 1, bias = 0).
    pub fn with_defaults(config: NormConfig, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, candle_core::DType::F32, device)?;
        let bias = Tensor::zeros(config.hidden_size, candle_core::DType::F32, device)?;
        Self::new(weight, bias, config)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let mean = (hidden.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centred = hidden.broadcast_sub(&mean)?;
        let variance = (centred.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        centred
            .broadcast_div(&denom)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}
