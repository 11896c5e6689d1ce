//! Learned absolute positional embeddings.
//!
//! A `(context_size, hidden_dim)` table; row `p` is added to the token
//! embedding at absolute position `p`. During incremental decoding the caller
//! passes the number of cached positions as `offset`.

use candle_core::{bail, Device, Result, Tensor};

/// Configuration for a positional embedding table.
#[derive(Debug, Clone)]
pub struct PositionalEmbeddingConfig {
    /// Longest sequence the table covers.
    pub context_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Device hosting the parameters.
    pub device: Device,
}

#[derive(Debug, Clone)]
pub struct PositionalEmbedding {
    config: PositionalEmbeddingConfig,
    weight: Tensor,
}

impl PositionalEmbedding {
    /// Samples the table uniformly from `[0, 1)`.
    pub fn new(config: PositionalEmbeddingConfig) -> Result<Self> {
        let shape = (config.context_size, config.hidden_dim);
        if shape.0 == 0 || shape.1 == 0 {
            bail!("positional embedding requires context_size > 0 and hidden_dim > 0");
        }
        Self::from_weight(Tensor::rand(0f32, 1f32, shape, &config.device)?)
    }

    /// Wraps an existing `(context_size, hidden_dim)` table.
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        let (context_size, hidden_dim) = weight.dims2()?;
        if context_size == 0 || hidden_dim == 0 {
            bail!("positional embedding requires context_size > 0 and hidden_dim > 0");
        }
        let config = PositionalEmbeddingConfig {
            context_size,
            hidden_dim,
            device: weight.device().clone(),
        };
        Ok(Self { config, weight })
    }

    pub fn config(&self) -> &PositionalEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Embeddings for positions `offset .. offset + len`, shaped `(1, len, hidden)`
    /// so they broadcast over the batch axis.
    pub fn forward(&self, offset: usize, len: usize) -> Result<Tensor> {
        if offset + len > self.config.context_size {
            bail!(
                "positions {offset}..{} exceed context size {}",
                offset + len,
                self.config.context_size
            );
        }
        self.weight.narrow(0, offset, len)?.unsqueeze(0)
    }
}
