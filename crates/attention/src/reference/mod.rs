//! Portable, exact implementations of self-attention.
//!
//! These paths favour clarity over absolute performance; every operation has
//! a manual backward counterpart.

pub mod exact;
pub mod multi_head;

pub use exact::{AttentionTape, ScaledDotProductAttention};
pub use multi_head::MultiHeadAttention;

#[cfg(test)]
mod tests;
