//! Softmax over the last axis with a multiplicative 0/1 mask.
//!
//! Masked entries are zeroed after exponentiation instead of being pushed to
//! negative infinity, so a row whose mask excludes every key yields zeros
//! rather than NaN.

use candle_core::{Tensor, D};

use crate::core::AttentionError;

/// Row-wise softmax of `logits` restricted to entries where `mask` is non-zero.
///
/// The row max is taken over admitted entries only. `mask` must end in the
/// same two axes as `logits` and is broadcast over any leading axes. `None`
/// behaves like an all-ones mask.
pub fn masked_softmax(logits: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, AttentionError> {
    let Some(mask) = mask else {
        let max = logits.max_keepdim(D::Minus1)?;
        let exp = logits.broadcast_sub(&max)?.exp()?;
        return Ok(exp.broadcast_div(&exp.sum_keepdim(D::Minus1)?)?);
    };
    let (l_dims, m_dims) = (logits.dims(), mask.dims());
    if m_dims.len() < 2
        || m_dims.len() > l_dims.len()
        || m_dims[m_dims.len() - 2..] != l_dims[l_dims.len() - 2..]
    {
        return Err(AttentionError::shape(format!(
            "softmax mask {m_dims:?} does not fit logits {l_dims:?}"
        )));
    }
    let admitted = mask.broadcast_as(logits.shape())?.ne(0.0)?;
    let floor = Tensor::full(f32::MIN, logits.shape(), logits.device())?.to_dtype(logits.dtype())?;
    let max = admitted.where_cond(logits, &floor)?.max_keepdim(D::Minus1)?;
    // Masked slots shift to zero and are cleared by the mask after `exp`.
    let shifted = admitted.where_cond(&logits.broadcast_sub(&max)?, &logits.zeros_like()?)?;
    let exp = shifted.exp()?.broadcast_mul(&mask.to_dtype(logits.dtype())?)?;
    let sum = exp.sum_keepdim(D::Minus1)?;
    // Empty rows divide by one instead of zero.
    let empty = sum.eq(0.0)?.to_dtype(sum.dtype())?;
    let denom = sum.add(&empty)?;
    Ok(exp.broadcast_div(&denom)?)
}

/// Gradient of [`masked_softmax`] given its `output` and the output gradient.
///
/// The mask does not appear: masked entries have zero output and therefore
/// receive zero gradient.
pub fn masked_softmax_backward(output: &Tensor, seed: &Tensor) -> Result<Tensor, AttentionError> {
    if output.dims() != seed.dims() {
        return Err(AttentionError::shape(format!(
            "softmax seed {:?} must match output {:?}",
            seed.dims(),
            output.dims()
        )));
    }
    let projected = seed.mul(output)?.sum_keepdim(D::Minus1)?;
    Ok(seed.broadcast_sub(&projected)?.mul(output)?)
}
