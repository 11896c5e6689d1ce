//! Scaled dot-product attention with a hand-written backward pass.
//!
//! `attend` computes `dropout(softmax(q · kᵀ / sqrt(size), mask)) · v`.
//! `attend_with_tape` additionally records the intermediates that
//! [`ScaledDotProductAttention::attend_backward`] needs to pull an output
//! gradient back to the query, key and value inputs.

use std::sync::OnceLock;

use candle_core::{Device, Tensor};
use layers::Dropout;
use rand::rngs::StdRng;

use crate::core::{Attention, AttentionError, Config};
use crate::kv_cache::{AttentionState, KeyValueCache};
use crate::masks::{build_causal_mask, validate_mask};
use crate::ops::{batched_matmul, batched_matmul_backward, masked_softmax, masked_softmax_backward};
use crate::qkv::{QueryKeyValue, QueryKeyValueGrad};

/// Forward intermediates of one [`ScaledDotProductAttention::attend_with_tape`] call.
#[derive(Debug, Clone)]
pub struct AttentionTape {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
    /// Softmax output before dropout.
    pub score: Tensor,
    /// Softmax output after dropout, the left operand of the value product.
    pub dropped: Tensor,
    /// Mask that was applied (explicit or causal), if any.
    pub mask: Option<Tensor>,
    /// Scaled dropout keep-mask; `None` when dropout was inactive.
    pub keep_mask: Option<Tensor>,
}

/// Attention over `[batch, time, size]` queries, keys and values.
#[derive(Debug, Clone)]
pub struct ScaledDotProductAttention {
    size: usize,
    scale: f64,
    config: Config,
    dropout: Dropout,
    first_call: OnceLock<()>,
}

impl ScaledDotProductAttention {
    /// Builds a core for `size`-wide queries. Logits are divided by `sqrt(size)`.
    pub fn new(size: usize, config: &Config) -> Result<Self, AttentionError> {
        if size == 0 {
            return Err(AttentionError::config("attention size must be positive"));
        }
        config.validate()?;
        let dropout = Dropout::new(config.dropout_probability())
            .map_err(|err| AttentionError::config(err.to_string()))?;
        Ok(Self {
            size,
            scale: (size as f64).sqrt(),
            config: config.clone(),
            dropout,
            first_call: OnceLock::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn log_first_call(&self) {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init size={} scale={:.4} causal={} dropout={:?}",
                self.size,
                self.scale,
                self.config.causal,
                self.config.dropout_p
            );
        }
    }

    fn effective_mask(
        &self,
        mask: Option<&Tensor>,
        q_len: usize,
        k_len: usize,
        device: &Device,
    ) -> Result<Option<Tensor>, AttentionError> {
        match mask {
            Some(mask) => validate_mask(mask, q_len, k_len).map(Some),
            None if self.config.causal => build_causal_mask(device, q_len, k_len).map(Some),
            None => Ok(None),
        }
    }

    /// Attends `query` over `key`/`value`.
    ///
    /// Shapes: `query [B, Q, size]`, `key [B, K, size]`, `value [B, K, F]`;
    /// the result is `[B, Q, F]`.
    pub fn attend(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError> {
        self.attend_with_tape(query, key, value, mask, rng)
            .map(|(output, _)| output)
    }

    /// Same as [`ScaledDotProductAttention::attend`], also returning the tape.
    pub fn attend_with_tape(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<(Tensor, AttentionTape), AttentionError> {
        self.log_first_call();

        let (batch, q_len, features) = query.dims3().map_err(|_| {
            AttentionError::shape(format!("query must be [batch, time, {}], got {:?}", self.size, query.dims()))
        })?;
        if features != self.size {
            return Err(AttentionError::shape(format!(
                "query width {features} does not match attention size {}",
                self.size
            )));
        }
        let (kb, k_len, kf) = key
            .dims3()
            .map_err(|_| AttentionError::shape(format!("key must be rank 3, got {:?}", key.dims())))?;
        let (vb, vk, _) = value
            .dims3()
            .map_err(|_| AttentionError::shape(format!("value must be rank 3, got {:?}", value.dims())))?;
        if kb != batch || kf != features {
            return Err(AttentionError::shape(format!(
                "key shape mismatch: expected [{batch}, ?, {features}] got [{kb}, {k_len}, {kf}]"
            )));
        }
        if vb != batch || vk != k_len {
            return Err(AttentionError::shape(format!(
                "value shape mismatch: expected [{batch}, {k_len}, ?] got {:?}",
                value.dims()
            )));
        }

        let mask = self.effective_mask(mask, q_len, k_len, query.device())?;
        let logits = batched_matmul(query, key, false, true)?.affine(1.0 / self.scale, 0.0)?;
        let score = masked_softmax(&logits, mask.as_ref())?;
        let (dropped, keep_mask) = self.dropout.forward_with_mask(&score, rng)?;
        let output = batched_matmul(&dropped, value, false, false)?;

        let tape = AttentionTape {
            query: query.clone(),
            key: key.clone(),
            value: value.clone(),
            score,
            dropped,
            mask,
            keep_mask,
        };
        Ok((output, tape))
    }

    /// Pulls `grad_output` back through the recorded forward pass.
    pub fn attend_backward(
        &self,
        tape: &AttentionTape,
        grad_output: &Tensor,
    ) -> Result<QueryKeyValueGrad, AttentionError> {
        let (grad_dropped, grad_value) =
            batched_matmul_backward(&tape.dropped, &tape.value, false, false, grad_output)?;
        let grad_score = match &tape.keep_mask {
            Some(keep) => grad_dropped.mul(keep)?,
            None => grad_dropped,
        };
        let grad_logits = masked_softmax_backward(&tape.score, &grad_score)?.affine(1.0 / self.scale, 0.0)?;
        let (grad_query, grad_key) =
            batched_matmul_backward(&tape.query, &tape.key, false, true, &grad_logits)?;
        Ok(QueryKeyValueGrad {
            query: grad_query,
            key: grad_key,
            value: grad_value,
        })
    }

    /// Gradient of [`Attention::forward`] with respect to the fused input,
    /// evaluated on the inference path.
    pub fn forward_backward(
        &self,
        fused: &Tensor,
        mask: Option<&Tensor>,
        grad_output: &Tensor,
    ) -> Result<Tensor, AttentionError> {
        let qkv = QueryKeyValue::split(fused)?;
        let (_, tape) = self.attend_with_tape(&qkv.query, &qkv.key, &qkv.value, mask, None)?;
        self.attend_backward(&tape, grad_output)?.concat()
    }
}

impl Attention for ScaledDotProductAttention {
    /// `input` is the fused `[batch, time, 3 * size]` projection.
    fn forward(
        &self,
        input: &Tensor,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError> {
        let qkv = QueryKeyValue::split(input)?;
        self.attend(&qkv.query, &qkv.key, &qkv.value, mask, rng)
    }

    fn forward_with_state(
        &self,
        input: &Tensor,
        state: &mut AttentionState,
        mask: Option<&Tensor>,
        rng: Option<&mut StdRng>,
    ) -> Result<Tensor, AttentionError> {
        let qkv = QueryKeyValue::split(input)?;
        let previous = state.len();
        state.append(&qkv.key, &qkv.value)?;
        let attended = match state.view() {
            Some((key, value)) => {
                log::trace!(
                    "attention::reference step new={} cached={}",
                    qkv.query.dims()[1],
                    key.dims()[1]
                );
                self.attend(&qkv.query, key, value, mask, rng)
            }
            None => Err(AttentionError::shape("state is empty after append")),
        };
        // A failed step rolls the state back to where it started.
        if attended.is_err() {
            state.truncate(previous)?;
        }
        attended
    }

    fn empty_state(&self) -> AttentionState {
        AttentionState::new(self.size)
    }
}
