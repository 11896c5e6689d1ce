use std::fmt;

use attention::{Attention, AttentionState, Config as AttentionConfig, MultiHeadAttention};
use candle_core::{Device, Tensor};
use layers::{
    dropout::Dropout,
    linear::LinearInit,
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
};
use rand::rngs::StdRng;

use crate::{config::HyperParameters, errors::ModelError};

/// Pre-norm encoder block: self-attention then a GELU feed-forward network,
/// each wrapped as `x + dropout(sublayer(norm(x)))`.
#[derive(Clone)]
pub struct EncoderBlock {
    attention_norm: LayerNorm,
    attention: MultiHeadAttention,
    attention_dropout: Dropout,
    feed_forward_norm: LayerNorm,
    feed_forward: FeedForward,
    feed_forward_dropout: Dropout,
}

impl fmt::Debug for EncoderBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderBlock")
            .field("hidden", &self.attention.size())
            .field("heads", &self.attention.head_count())
            .field("dropout", &self.attention_dropout.probability())
            .finish()
    }
}

impl EncoderBlock {
    pub fn new(
        params: &HyperParameters,
        attention_config: &AttentionConfig,
        device: &Device,
    ) -> Result<Self, ModelError> {
        let size = params.embedding_size;
        let attention = MultiHeadAttention::new(size, params.head_count, attention_config, device)?;
        let feed_forward = FeedForward::with_init(
            FeedForwardConfig::gpt(size, params.drop_probability),
            &LinearInit::XavierUniform,
            device,
        )?;
        Ok(Self {
            attention_norm: LayerNorm::with_defaults(NormConfig::new(size), device)?,
            attention,
            attention_dropout: Dropout::new(params.drop_probability)?,
            feed_forward_norm: LayerNorm::with_defaults(NormConfig::new(size), device)?,
            feed_forward,
            feed_forward_dropout: Dropout::new(params.drop_probability)?,
        })
    }

    pub fn attention(&self) -> &MultiHeadAttention {
        &self.attention
    }

    /// Processes a whole `[batch, time, hidden]` sequence.
    pub fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, ModelError> {
        self.run(hidden, None, mask, rng)
    }

    /// Processes new positions, attending over and then extending `state`.
    pub fn forward_with_state(
        &self,
        hidden: &Tensor,
        state: &mut AttentionState,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, ModelError> {
        self.run(hidden, Some(state), mask, rng)
    }

    fn run(
        &self,
        hidden: &Tensor,
        state: Option<&mut AttentionState>,
        mask: Option<&Tensor>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<Tensor, ModelError> {
        let normed = self.attention_norm.forward(hidden)?;
        let attended = match state {
            Some(state) => self
                .attention
                .forward_with_state(&normed, state, mask, rng.as_deref_mut())?,
            None => self.attention.forward(&normed, mask, rng.as_deref_mut())?,
        };
        let attended = self.attention_dropout.forward(&attended, rng.as_deref_mut())?;
        let residual = hidden.add(&attended)?;

        let normed = self.feed_forward_norm.forward(&residual)?;
        let inferred = self.feed_forward.forward(&normed, rng.as_deref_mut())?;
        let inferred = self.feed_forward_dropout.forward(&inferred, rng)?;
        Ok(residual.add(&inferred)?)
    }
}
