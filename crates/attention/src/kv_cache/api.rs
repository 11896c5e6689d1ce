//! Public traits describing key/value cache behaviour.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Abstract cache capable of storing projected keys and values across steps.
pub trait KeyValueCache {
    /// Append a new slice of keys and values along the time axis.
    fn append(&mut self, key: &Tensor, value: &Tensor) -> Result<(), AttentionError>;

    /// Everything accumulated so far, or `None` before the first append.
    fn view(&self) -> Option<(&Tensor, &Tensor)>;

    /// Number of cached time steps.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached step.
    fn reset(&mut self);
}
