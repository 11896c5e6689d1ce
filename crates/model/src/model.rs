use attention::{AttentionState, Config as AttentionConfig, KeyValueCache};
use candle_core::{Device, Tensor};
use embedding::{
    positional::{PositionalEmbedding, PositionalEmbeddingConfig},
    token::{TokenEmbedding, TokenEmbeddingConfig},
};
use layers::norm::{LayerNorm, NormConfig};
use rand::rngs::StdRng;

use crate::{
    block::EncoderBlock, config::HyperParameters, errors::ModelError, tokenizer::TokenEncoder,
};

/// GPT-style stack of causal encoder blocks with a weight-tied read-out.
///
/// The transformer owns one [`AttentionState`] per block. Every forward call
/// continues the current sequence: new tokens are placed after the cached
/// positions and attend over everything seen so far. Call
/// [`Transformer::reset_state`] to start an unrelated sequence.
#[derive(Debug)]
pub struct Transformer {
    params: HyperParameters,
    device: Device,
    token_embedding: TokenEmbedding,
    position_embedding: PositionalEmbedding,
    blocks: Vec<EncoderBlock>,
    final_norm: LayerNorm,
    states: Vec<AttentionState>,
}

impl Transformer {
    pub fn new(params: HyperParameters, device: &Device) -> Result<Self, ModelError> {
        params.validate()?;

        let token_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: params.vocab_size,
            hidden_dim: params.embedding_size,
            device: device.clone(),
        })?;
        let position_embedding = PositionalEmbedding::new(PositionalEmbeddingConfig {
            context_size: params.context_size,
            hidden_dim: params.embedding_size,
            device: device.clone(),
        })?;

        let mut attention_config = AttentionConfig::from_env();
        attention_config.causal = true;
        if attention_config.dropout_p.is_none() {
            attention_config.dropout_p = Some(params.drop_probability);
        }

        let blocks = (0..params.layer_count)
            .map(|_| EncoderBlock::new(&params, &attention_config, device))
            .collect::<Result<Vec<_>, _>>()?;
        let final_norm = LayerNorm::with_defaults(NormConfig::new(params.embedding_size), device)?;

        log::info!(
            "model init layers={} hidden={} heads={} context={} vocab={} attention_dropout={:?}",
            params.layer_count,
            params.embedding_size,
            params.head_count,
            params.context_size,
            params.vocab_size,
            attention_config.dropout_p
        );

        let mut model = Self {
            params,
            device: device.clone(),
            token_embedding,
            position_embedding,
            blocks,
            final_norm,
            states: Vec::new(),
        };
        model.reset_state();
        Ok(model)
    }

    pub fn params(&self) -> &HyperParameters {
        &self.params
    }

    pub fn blocks(&self) -> &[EncoderBlock] {
        &self.blocks
    }

    /// Number of positions held in the decode state.
    pub fn cached_len(&self) -> usize {
        self.states.first().map_or(0, |state| state.len())
    }

    /// Forgets every cached position.
    pub fn reset_state(&mut self) {
        self.states = self
            .blocks
            .iter()
            .map(|block| AttentionState::new(block.attention().core().size()))
            .collect();
        log::debug!("model state reset ({} layers)", self.states.len());
    }

    /// Drops the newest cached positions so that `len` remain.
    pub fn truncate_state(&mut self, len: usize) -> Result<(), ModelError> {
        for state in &mut self.states {
            state.truncate(len)?;
        }
        Ok(())
    }

    /// Runs `ids` through the stack, continuing the cached sequence.
    ///
    /// Returns logits shaped `(1, ids.len(), vocab_size)`. Passing `rng`
    /// enables dropout for a training-style pass.
    pub fn forward_tokens(
        &mut self,
        ids: &[u32],
        mut rng: Option<&mut StdRng>,
    ) -> Result<Tensor, ModelError> {
        let offset = self.cached_len();
        let requested = offset + ids.len();
        if requested > self.params.context_size {
            return Err(ModelError::ContextOverflow {
                requested,
                context_size: self.params.context_size,
            });
        }

        let tokens = Tensor::from_slice(ids, (1, ids.len()), &self.device)?;
        let positions = self.position_embedding.forward(offset, ids.len())?;
        let mut hidden = self.token_embedding.forward(&tokens)?.broadcast_add(&positions)?;

        for (block, state) in self.blocks.iter().zip(self.states.iter_mut()) {
            hidden = block.forward_with_state(&hidden, state, None, rng.as_deref_mut())?;
        }
        log::trace!("model step new={} cached={}", ids.len(), self.cached_len());

        let normed = self.final_norm.forward(&hidden)?;
        Ok(self.token_embedding.linear_out(&normed)?)
    }

    /// Encodes `text` and runs the resulting tokens through the stack.
    pub fn forward_text(
        &mut self,
        encoder: &dyn TokenEncoder,
        text: &str,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, ModelError> {
        let ids = encoder.encode(text)?;
        self.forward_tokens(&ids, rng)
    }
}
