//! Inverted dropout driven by an explicit random source.
//!
//! The layer holds no random state of its own. Training-time calls pass a
//! `&mut StdRng`; each kept element is rescaled by `1 / (1 - p)` so the
//! expected activation is unchanged. Passing `None` is the inference path and
//! returns the input untouched, which keeps evaluation deterministic and lets a
//! fixed seed reproduce a training forward pass bit for bit.

use candle_core::{Error, Result, Tensor};
use rand::{rngs::StdRng, Rng};

/// Dropout layer with a fixed drop probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    probability: f32,
}

impl Dropout {
    /// Creates a dropout layer. `probability` must lie in `[0, 1)`.
    pub fn new(probability: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(Error::Msg(format!(
                "dropout probability must be in [0, 1), got {probability}"
            )));
        }
        Ok(Self { probability })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Applies dropout when `rng` is supplied, otherwise acts as identity.
    pub fn forward(&self, input: &Tensor, rng: Option<&mut StdRng>) -> Result<Tensor> {
        self.forward_with_mask(input, rng).map(|(output, _)| output)
    }

    /// Applies dropout and returns the scaled keep-mask that was used.
    ///
    /// The mask already carries the `1 / (1 - p)` factor, so the gradient of
    /// the layer is `grad * mask`. `None` means the identity path was taken.
    pub fn forward_with_mask(
        &self,
        input: &Tensor,
        rng: Option<&mut StdRng>,
    ) -> Result<(Tensor, Option<Tensor>)> {
        let rng = match rng {
            Some(rng) if self.probability > 0.0 => rng,
            _ => return Ok((input.clone(), None)),
        };

        let keep_prob = 1.0 - self.probability;
        let scale = 1.0 / keep_prob;
        let total = input.elem_count();
        let mut mask_data = Vec::with_capacity(total);
        for _ in 0..total {
            let sample: f32 = rng.gen();
            mask_data.push(if sample < keep_prob { scale } else { 0.0 });
        }
        let mask = Tensor::from_vec(mask_data, input.dims(), input.device())?
            .to_dtype(input.dtype())?;
        let output = input.mul(&mask)?;
        Ok((output, Some(mask)))
    }
}
