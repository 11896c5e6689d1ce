//! Token embedding layer and tied readout head.

use candle_core::{bail, DType, Device, Error, Result, Tensor};
use layers::checks;

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Token embedding table whose transpose doubles as the output projection.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Tensor,
}

impl TokenEmbedding {
    /// Builds a new token embedding table sampled uniformly from `[0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        let shape = (config.vocab_size, config.hidden_dim);
        Self::from_weight(Tensor::rand(0f32, 1f32, shape, &config.device)?)
    }

    /// Wraps an existing `(vocab_size, hidden_dim)` table.
    pub fn from_weight(weight: Tensor) -> Result<Self> {
        let (vocab_size, hidden_dim) = weight.dims2()?;
        if vocab_size == 0 || hidden_dim == 0 {
            bail!("token embedding table must be non-empty, got {:?}", weight.dims());
        }
        let config = TokenEmbeddingConfig {
            vocab_size,
            hidden_dim,
            device: weight.device().clone(),
        };
        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs follow the
    /// `(batch, seq, hidden)` layout.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let dims = token_ids.dims();

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.index_select(&flat, 0)?;
        let mut output_dims = dims.to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    /// Applies a tied linear projection using the transpose of the embedding weight.
    pub fn linear_out(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("linear_out", hidden, self.config.hidden_dim)?;
        let (batch, seq, hidden_dim) = hidden.dims3()?;
        let flat = hidden.reshape((batch * seq, hidden_dim))?;
        let logits = flat.matmul(&self.weight.t()?)?;
        logits.reshape((batch, seq, self.config.vocab_size))
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        checks::expect_rank("token_ids", token_ids, 2)?;
        if token_ids.dims().iter().any(|d| *d == 0) {
            bail!("token_ids must have non-zero batch and seq dimensions");
        }
        if !token_ids.dtype().is_int() {
            return Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )));
        }
        Ok(())
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            bail!("encountered negative token id {min_id} (minimum)");
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            bail!("token id {max_id} exceeds vocab size {vocab}");
        }
        Ok(())
    }
}
