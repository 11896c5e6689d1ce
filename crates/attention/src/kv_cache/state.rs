//! Per-layer key/value state for streaming self-attention.

use candle_core::Tensor;

use super::KeyValueCache;
use crate::core::AttentionError;

/// Accumulated keys and values of one attention layer.
///
/// Both tensors are `[batch, time, features]`, where `batch` is the folded
/// `batch * heads` axis for multi-head layers. The time axis only grows
/// through [`KeyValueCache::append`]; there is no built-in capacity, so callers
/// bound it with [`AttentionState::truncate`] or [`KeyValueCache::reset`]
/// (the transformer stack enforces its context size before every step).
#[derive(Debug, Clone)]
pub struct AttentionState {
    features: usize,
    key: Option<Tensor>,
    value: Option<Tensor>,
}

impl AttentionState {
    /// Empty state for keys and values `features` wide.
    pub fn new(features: usize) -> Self {
        Self {
            features,
            key: None,
            value: None,
        }
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Cached batch size, `None` while empty.
    pub fn batch(&self) -> Option<usize> {
        self.key.as_ref().map(|key| key.dims()[0])
    }

    /// Keys and values after appending `key`/`value`, without storing them.
    pub fn extended(&self, key: &Tensor, value: &Tensor) -> Result<(Tensor, Tensor), AttentionError> {
        let (batch, steps, features) = key
            .dims3()
            .map_err(|_| AttentionError::shape(format!("state key must be rank 3, got {:?}", key.dims())))?;
        if value.dims() != key.dims() {
            return Err(AttentionError::shape(format!(
                "state value {:?} must match key {:?}",
                value.dims(),
                key.dims()
            )));
        }
        if features != self.features {
            return Err(AttentionError::shape(format!(
                "state holds {}-wide entries, got {features}",
                self.features
            )));
        }
        if let Some(cached) = self.batch() {
            if cached != batch {
                return Err(AttentionError::shape(format!(
                    "state batch is {cached}, got {batch}"
                )));
            }
        }
        match (&self.key, &self.value) {
            (Some(k), Some(v)) if steps > 0 => Ok((Tensor::cat(&[k, key], 1)?, Tensor::cat(&[v, value], 1)?)),
            (Some(k), Some(v)) => Ok((k.clone(), v.clone())),
            _ => Ok((key.contiguous()?, value.contiguous()?)),
        }
    }

    fn store(&mut self, key: Tensor, value: Tensor) {
        self.key = Some(key);
        self.value = Some(value);
    }

    /// Keeps only the oldest `len` steps.
    pub fn truncate(&mut self, len: usize) -> Result<(), AttentionError> {
        if len >= self.len() {
            return Ok(());
        }
        if len == 0 {
            self.reset();
            return Ok(());
        }
        if let (Some(key), Some(value)) = (&self.key, &self.value) {
            let key = key.narrow(1, 0, len)?;
            let value = value.narrow(1, 0, len)?;
            self.store(key, value);
        }
        Ok(())
    }
}

impl KeyValueCache for AttentionState {
    fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<(), AttentionError> {
        let (key, value) = self.extended(key, value)?;
        self.store(key, value);
        Ok(())
    }

    fn view(&self) -> Option<(&Tensor, &Tensor)> {
        self.key.as_ref().zip(self.value.as_ref())
    }

    fn len(&self) -> usize {
        self.key.as_ref().map_or(0, |key| key.dims()[1])
    }

    fn reset(&mut self) {
        self.key = None;
        self.value = None;
    }
}
