//! Building blocks for the encoder stack.
//!
//! Everything in this crate consumes activations shaped `(batch, seq, hidden)`
//! and returns the same layout unless documented otherwise. Stochastic layers
//! never own hidden random state: callers thread an explicit
//! [`rand::rngs::StdRng`] handle through each forward call, and passing `None`
//! selects the deterministic inference path.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use activations::ActivationKind;
pub use dropout::Dropout;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
