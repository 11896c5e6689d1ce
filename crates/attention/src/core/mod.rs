//! Core traits and types shared across attention implementations.
//!
//! Implementations consume activations laid out `[batch, time, features]` and
//! return the same layout. Streaming calls thread an
//! [`AttentionState`](crate::kv_cache::AttentionState) through every step.

pub mod config;
pub mod errors;

use candle_core::Tensor;
use rand::rngs::StdRng;

use crate::kv_cache::AttentionState;

pub use config::Config;
pub use errors::AttentionError;

/// Unified interface for self-attention layers.
///
/// * The meaning of `input` is implementation specific: the core attention
///   takes a fused `[batch, time, 3 * size]` query/key/value tensor, while
///   the multi-head layer takes hidden states `[batch, time, size]`.
/// * Masks, when present, are `[query_steps, key_steps]` with `1` for allowed
///   pairs and `0` for suppressed ones; every row must allow at least one key.
/// * `rng` selects the training path (dropout active). `None` is inference.
pub trait Attention {
    /// Attends over the current input only.
    fn forward(
        &self,
        input: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError>;

    /// Attends the new positions over everything accumulated in `state`,
    /// then extends `state` with the new keys and values.
    fn forward_with_state(
        &self,
        input: &Tensor,
        state: &mut AttentionState,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError>;

    /// A zero-length state matching this layer's key/value width.
    fn empty_state(&self) -> AttentionState;
}
