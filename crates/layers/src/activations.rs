//! Activation catalogue for the position-wise feed-forward sublayer.
//!
//! * **GELU** uses the tanh approximation favoured by GPT-2 style models.
//! * **GELU (erf)** evaluates `0.5 * x * (1 + erf(x / sqrt(2)))` exactly.
//! * **ReLU** clamps negative values to zero.

use candle_core::{Result, Tensor};

/// Identifies which non-linearity a feed-forward stack applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// Identity function, useful for wiring plain projections.
    Identity,
    /// GELU with the tanh approximation.
    #[default]
    Gelu,
    /// GELU evaluated through the error function.
    GeluErf,
    /// Rectified linear unit.
    Relu,
}

impl ActivationKind {
    /// Applies the activation element-wise.
    pub fn apply(self, input: &Tensor) -> Result<Tensor> {
        match self {
            ActivationKind::Identity => Ok(input.clone()),
            ActivationKind::Gelu => input.gelu(),
            ActivationKind::GeluErf => input.gelu_erf(),
            ActivationKind::Relu => input.relu(),
        }
    }
}
