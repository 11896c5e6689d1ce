//! Position-wise feed-forward sublayer.
//!
//! The MLP expands `(batch, seq, hidden)` to `intermediate_size`, applies the
//! activation, drops out, and contracts back to `hidden`.

use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;

use crate::{
    activations::ActivationKind,
    dropout::Dropout,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Configuration for the two-projection feed-forward network.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied after the first projection.
    pub activation: ActivationKind,
    /// Dropout probability applied between the projections.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    /// GPT layout: four-fold expansion with GELU.
    pub fn gpt(hidden_size: usize, dropout_p: f32) -> Self {
        Self {
            hidden_size,
            intermediate_size: 4 * hidden_size,
            activation: ActivationKind::Gelu,
            dropout_p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    dense1: Linear,
    dense2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(config: FeedForwardConfig, dense1: Linear, dense2: Linear) -> Result<Self> {
        let expected_up = LinearConfig::new(config.hidden_size, config.intermediate_size);
        let expected_down = LinearConfig::new(config.intermediate_size, config.hidden_size);
        if dense1.config().input_dim != expected_up.input_dim
            || dense1.config().output_dim != expected_up.output_dim
            || dense2.config().input_dim != expected_down.input_dim
            || dense2.config().output_dim != expected_down.output_dim
        {
            return Err(candle_core::Error::Msg(format!(
                "feed-forward projections must map {h} -> {i} -> {h}",
                h = config.hidden_size,
                i = config.intermediate_size
            )));
        }
        let dropout = Dropout::new(config.dropout_p)?;
        Ok(Self {
            config,
            dense1,
            dense2,
            dropout,
        })
    }

    pub fn with_init(config: FeedForwardConfig, init: &LinearInit, device: &Device) -> Result<Self> {
        let dense1 = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
        )?;
        let dense2 = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
        )?;
        Self::new(config, dense1, dense2)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor, rng: Option<&mut StdRng>) -> Result<Tensor> {
        let expanded = self.dense1.forward(hidden)?;
        let activated = self.config.activation.apply(&expanded)?;
        let dropped = self.dropout.forward(&activated, rng)?;
        self.dense2.forward(&dropped)
    }
}
