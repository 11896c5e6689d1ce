//! Self-attention for GPT-style transformers, with hand-written gradients.
//!
//! Activations are laid out `[batch, time, features]`. The crate provides:
//!
//! * [`ops`]: batched matrix multiply and masked softmax, each paired with its
//!   vector-Jacobian product;
//! * [`qkv`] and [`heads`]: the layout plumbing between a fused projection and
//!   per-head attention;
//! * [`masks`]: multiplicative causal masks aligned for incremental decoding;
//! * [`kv_cache`]: the per-layer [`AttentionState`] threaded through streaming
//!   calls;
//! * [`reference`]: [`ScaledDotProductAttention`] and [`MultiHeadAttention`].
//!
//! Dropout on attention weights is a training-only concern: it runs only when
//! the caller passes a random source, and is otherwise the identity.

pub mod core;
pub mod heads;
pub mod kv_cache;
pub mod masks;
pub mod ops;
pub mod qkv;
pub mod reference;

pub use core::{Attention, AttentionError, Config};
pub use kv_cache::{AttentionState, KeyValueCache};
pub use qkv::{QueryKeyValue, QueryKeyValueGrad};
pub use reference::{AttentionTape, MultiHeadAttention, ScaledDotProductAttention};
