//! Dense affine projections applied independently at every time step.
//!
//! Inputs are shaped `(batch, seq, in_dim)` or `(rows, in_dim)`. The rank-3
//! path flattens batch and time into rows, multiplies by the transposed weight
//! and restores the original leading axes, so a single dense layer is shared
//! across all time steps. Weights follow the `(out_dim, in_dim)` convention.

use candle_core::{Device, Error, Result, Tensor};

use crate::checks;

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a biased projection.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)
            }
        }
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_shape("linear.weight", &weight, &[config.output_dim, config.input_dim])?;
        match (config.bias, bias.as_ref()) {
            (true, Some(tensor)) => checks::expect_shape("linear.bias", tensor, &[config.output_dim])?,
            (false, Some(_)) => {
                return Err(Error::Msg("bias provided but config disables bias".into()))
            }
            (true, None) => return Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => {}
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with randomly initialised weights and a zero bias.
    pub fn with_init(config: LinearConfig, init: &LinearInit, device: &Device) -> Result<Self> {
        let weight = init.sample((config.output_dim, config.input_dim), device)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, weight.dtype(), device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Applies the projection to every time step.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let weight_t = self.weight.t()?;
        let output = match hidden.dims() {
            [batch, seq, in_dim] if *in_dim == self.config.input_dim => {
                let flat = hidden.reshape((*batch * *seq, *in_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((*batch, *seq, self.config.output_dim))?
            }
            [_, in_dim] if *in_dim == self.config.input_dim => hidden.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear expects input shaped [B, T, {in_dim}] or [N, {in_dim}], got {dims:?}",
                    in_dim = self.config.input_dim
                )))
            }
        };

        match &self.bias {
            Some(bias) => output.broadcast_add(bias),
            None => Ok(output),
        }
    }
}
