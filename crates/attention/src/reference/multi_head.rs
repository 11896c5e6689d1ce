//! Multi-head self-attention built on [`ScaledDotProductAttention`].
//!
//! A fused projection maps hidden states `[B, T, E]` to `[B, T, 3E]`, heads are
//! folded into the batch axis, the core attends each head independently over
//! `E / heads` features, and the heads are joined and projected back to `E`.

use candle_core::{Device, Tensor};
use layers::{Linear, LinearConfig, LinearInit};
use rand::rngs::StdRng;

use super::ScaledDotProductAttention;
use crate::core::{Attention, AttentionError, Config};
use crate::heads::{join_heads, join_heads_backward, split_heads, split_heads_backward};
use crate::kv_cache::AttentionState;

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    size: usize,
    heads: usize,
    wqkv: Linear,
    wo: Linear,
    core: ScaledDotProductAttention,
}

impl MultiHeadAttention {
    /// Randomly initialised layer with Xavier-uniform projections.
    ///
    /// Logits are scaled per head by `sqrt(size / heads)`, not `sqrt(size)`.
    pub fn new(size: usize, heads: usize, config: &Config, device: &Device) -> Result<Self, AttentionError> {
        let wqkv = Linear::with_init(LinearConfig::new(size, 3 * size), &LinearInit::XavierUniform, device)?;
        let wo = Linear::with_init(LinearConfig::new(size, size), &LinearInit::XavierUniform, device)?;
        Self::with_projections(heads, wqkv, wo, config)
    }

    /// Builds the layer around existing projections. `wqkv` must map
    /// `E -> 3E` and `wo` must map `E -> E`, with `E` divisible by `heads`.
    pub fn with_projections(
        heads: usize,
        wqkv: Linear,
        wo: Linear,
        config: &Config,
    ) -> Result<Self, AttentionError> {
        let size = wo.config().output_dim;
        if heads == 0 || size == 0 || size % heads != 0 {
            return Err(AttentionError::shape(format!(
                "embedding size {size} is not divisible into {heads} heads"
            )));
        }
        let qkv_cfg = wqkv.config();
        if qkv_cfg.input_dim != size || qkv_cfg.output_dim != 3 * size || wo.config().input_dim != size {
            return Err(AttentionError::shape(format!(
                "projections must map {size} -> {} and {size} -> {size}",
                3 * size
            )));
        }
        let core = ScaledDotProductAttention::new(size / heads, config)?;
        log::debug!("attention::multi_head size={size} heads={heads} head_dim={}", size / heads);
        Ok(Self {
            size,
            heads,
            wqkv,
            wo,
            core,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn head_count(&self) -> usize {
        self.heads
    }

    pub fn core(&self) -> &ScaledDotProductAttention {
        &self.core
    }

    pub fn qkv_projection(&self) -> &Linear {
        &self.wqkv
    }

    pub fn output_projection(&self) -> &Linear {
        &self.wo
    }

    /// Fused `[B, T, 3E]` projection of the hidden states.
    pub fn project(&self, input: &Tensor) -> Result<Tensor, AttentionError> {
        Ok(self.wqkv.forward(input)?)
    }

    /// Gradient of `join_heads(core(split_heads(projected)))` with respect to
    /// `projected`, given the gradient of the joined heads.
    pub fn heads_backward(
        &self,
        projected: &Tensor,
        mask: Option<&Tensor>,
        grad_joined: &Tensor,
    ) -> Result<Tensor, AttentionError> {
        let folded = split_heads(projected, self.heads)?;
        let grad_folded = join_heads_backward(grad_joined, self.heads)?;
        let grad_fused = self.core.forward_backward(&folded, mask, &grad_folded)?;
        split_heads_backward(&grad_fused, self.heads)
    }
}

impl Attention for MultiHeadAttention {
    /// `input` is hidden states `[B, T, E]`.
    fn forward(
        &self,
        input: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError> {
        let folded = split_heads(&self.project(input)?, self.heads)?;
        let attended = self.core.forward(&folded, mask, rng)?;
        Ok(self.wo.forward(&join_heads(&attended, self.heads)?)?)
    }

    fn forward_with_state(
        &self,
        input: &Tensor,
        state: &mut AttentionState,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError> {
        let folded = split_heads(&self.project(input)?, self.heads)?;
        let attended = self.core.forward_with_state(&folded, state, mask, rng)?;
        Ok(self.wo.forward(&join_heads(&attended, self.heads)?)?)
    }

    fn empty_state(&self) -> AttentionState {
        self.core.empty_state()
    }
}
