//! Batched matrix multiply with optional adjoint (transposed) operands.
//!
//! Operands are `(..., rows, cols)` with identical leading axes; there is no
//! broadcasting between batch axes.

use candle_core::Tensor;

use crate::core::AttentionError;

fn matrix_dims(tensor: &Tensor, adjoint: bool) -> (usize, usize) {
    let dims = tensor.dims();
    let rank = dims.len();
    let (rows, cols) = (dims[rank - 2], dims[rank - 1]);
    if adjoint {
        (cols, rows)
    } else {
        (rows, cols)
    }
}

/// Shape of `op(left) · op(right)` or an error naming the mismatch.
fn output_dims(
    left: &Tensor,
    right: &Tensor,
    adjoint_left: bool,
    adjoint_right: bool,
) -> Result<Vec<usize>, AttentionError> {
    let (l_dims, r_dims) = (left.dims(), right.dims());
    if l_dims.len() < 2 || l_dims.len() != r_dims.len() {
        return Err(AttentionError::shape(format!(
            "batched matmul operands must share a rank >= 2, got {l_dims:?} and {r_dims:?}"
        )));
    }
    let batch = &l_dims[..l_dims.len() - 2];
    if batch != &r_dims[..r_dims.len() - 2] {
        return Err(AttentionError::shape(format!(
            "batched matmul batch axes differ: {l_dims:?} vs {r_dims:?}"
        )));
    }
    let (m, inner_l) = matrix_dims(left, adjoint_left);
    let (inner_r, n) = matrix_dims(right, adjoint_right);
    if inner_l != inner_r {
        return Err(AttentionError::shape(format!(
            "batched matmul inner dimensions differ: {inner_l} vs {inner_r} \
             (adjoint_left={adjoint_left}, adjoint_right={adjoint_right})"
        )));
    }
    let mut dims = batch.to_vec();
    dims.extend([m, n]);
    Ok(dims)
}

fn operand(tensor: &Tensor, adjoint: bool) -> Result<Tensor, AttentionError> {
    let view = if adjoint { tensor.t()? } else { tensor.clone() };
    Ok(view.contiguous()?)
}

/// Computes `op(left) · op(right)` where `op` transposes the last two axes
/// when the corresponding adjoint flag is set.
pub fn batched_matmul(
    left: &Tensor,
    right: &Tensor,
    adjoint_left: bool,
    adjoint_right: bool,
) -> Result<Tensor, AttentionError> {
    output_dims(left, right, adjoint_left, adjoint_right)?;
    let lhs = operand(left, adjoint_left)?;
    let rhs = operand(right, adjoint_right)?;
    Ok(lhs.matmul(&rhs)?)
}

/// Gradients of [`batched_matmul`] with respect to `left` and `right`.
///
/// `grad` is the gradient of the product and must match its shape.
pub fn batched_matmul_backward(
    left: &Tensor,
    right: &Tensor,
    adjoint_left: bool,
    adjoint_right: bool,
    grad: &Tensor,
) -> Result<(Tensor, Tensor), AttentionError> {
    let expected = output_dims(left, right, adjoint_left, adjoint_right)?;
    if grad.dims() != expected.as_slice() {
        return Err(AttentionError::shape(format!(
            "matmul gradient must be {expected:?}, got {:?}",
            grad.dims()
        )));
    }
    let grads = match (adjoint_left, adjoint_right) {
        (false, false) => (
            batched_matmul(grad, right, false, true)?,
            batched_matmul(left, grad, true, false)?,
        ),
        (false, true) => (
            batched_matmul(grad, right, false, false)?,
            batched_matmul(grad, left, true, false)?,
        ),
        (true, false) => (
            batched_matmul(right, grad, false, true)?,
            batched_matmul(left, grad, false, false)?,
        ),
        (true, true) => (
            batched_matmul(right, grad, true, true)?,
            batched_matmul(grad, left, true, true)?,
        ),
    };
    Ok(grads)
}
