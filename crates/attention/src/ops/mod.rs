//! Differentiable tensor primitives used by the attention core.
//!
//! Each forward function has a matching `*_backward` that maps the gradient
//! of the output (the seed) to gradients of the inputs. There is no tape or
//! global autodiff state; callers keep whatever forward values the backward
//! pass needs.

pub mod matmul;
pub mod softmax;

pub use matmul::{batched_matmul, batched_matmul_backward};
pub use softmax::{masked_softmax, masked_softmax_backward};
