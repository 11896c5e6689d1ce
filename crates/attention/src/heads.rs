//! Folding attention heads into the batch axis and back.
//!
//! `split_heads` maps `[batch, time, features]` to
//! `[batch * heads, time, features / heads]`, grouping rows batch-major so
//! that rows `b * heads .. (b + 1) * heads` belong to batch entry `b`.
//! `join_heads` is its exact inverse. Both are linear permutations, so each
//! one's gradient is the other.

use candle_core::Tensor;

use crate::core::AttentionError;

pub fn split_heads(input: &Tensor, heads: usize) -> Result<Tensor, AttentionError> {
    let (batch, time, features) = input
        .dims3()
        .map_err(|_| AttentionError::shape(format!("split_heads expects rank 3, got {:?}", input.dims())))?;
    if heads == 0 || features % heads != 0 {
        return Err(AttentionError::shape(format!(
            "features {features} are not divisible into {heads} heads"
        )));
    }
    let head_dim = features / heads;
    Ok(input
        .reshape((batch, time, heads, head_dim))?
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((batch * heads, time, head_dim))?)
}

pub fn join_heads(input: &Tensor, heads: usize) -> Result<Tensor, AttentionError> {
    let (folded, time, head_dim) = input
        .dims3()
        .map_err(|_| AttentionError::shape(format!("join_heads expects rank 3, got {:?}", input.dims())))?;
    if heads == 0 || folded % heads != 0 {
        return Err(AttentionError::shape(format!(
            "batch axis {folded} is not a multiple of {heads} heads"
        )));
    }
    let batch = folded / heads;
    Ok(input
        .reshape((batch, heads, time, head_dim))?
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((batch, time, heads * head_dim))?)
}

/// Gradient of [`split_heads`].
pub fn split_heads_backward(grad: &Tensor, heads: usize) -> Result<Tensor, AttentionError> {
    join_heads(grad, heads)
}

/// Gradient of [`join_heads`].
pub fn join_heads_backward(grad: &Tensor, heads: usize) -> Result<Tensor, AttentionError> {
    split_heads(grad, heads)
}
