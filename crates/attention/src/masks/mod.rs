//! Mask utilities shared by attention implementations.
//!
//! Masks here are multiplicative: `f32` tensors shaped `[q_len, k_len]` with
//! `1.0` where a query may attend to a key and `0.0` where it may not. They
//! broadcast over every leading axis of the attention logits.

pub mod causal;

use candle_core::{DType, Tensor, D};

use crate::core::AttentionError;

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::build_causal_mask;

/// Checks that an explicit mask is `[q_len, k_len]` and leaves every query
/// at least one key to attend to. Returns the mask in [`MASK_DTYPE`].
pub fn validate_mask(mask: &Tensor, q_len: usize, k_len: usize) -> Result<Tensor, AttentionError> {
    if mask.dims() != [q_len, k_len].as_slice() {
        return Err(AttentionError::shape(format!(
            "mask must be [{q_len}, {k_len}], got {:?}",
            mask.dims()
        )));
    }
    let mask = mask.to_dtype(MASK_DTYPE)?;
    if q_len > 0 && k_len > 0 {
        let row_max = mask.max(D::Minus1)?.to_vec1::<f32>()?;
        if let Some(row) = row_max.iter().position(|m| *m <= 0.0) {
            return Err(AttentionError::shape(format!(
                "mask row {row} excludes every key"
            )));
        }
    }
    Ok(mask)
}
