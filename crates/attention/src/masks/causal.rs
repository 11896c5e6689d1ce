//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[q_len, k_len]`. Entries are `1.0` where attention is permitted and `0.0`
//! otherwise.

use candle_core::{Device, Tensor};

use crate::core::AttentionError;

/// Construct a causal mask for the supplied sequence dimensions.
///
/// Queries are right-aligned with keys: query `i` sits at the same absolute
/// position as key `i + k_len - q_len`, so during incremental decoding the
/// newest queries see the whole cached prefix and never a later key. With
/// `q_len == k_len` this is the lower triangle including the diagonal.
pub fn build_causal_mask(
    device: &Device,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor, AttentionError> {
    if q_len > k_len {
        return Err(AttentionError::shape(format!(
            "causal mask needs k_len >= q_len, got q_len={q_len} k_len={k_len}"
        )));
    }
    let offset = k_len - q_len;
    let mut data = vec![0f32; q_len * k_len];
    for q in 0..q_len {
        let row_start = q * k_len;
        for k in 0..=q + offset {
            data[row_start + k] = 1.0;
        }
    }
    Ok(Tensor::from_vec(data, (q_len, k_len), device)?)
}
