//! Splitting a fused projection into query, key and value blocks.

use candle_core::Tensor;

use crate::core::AttentionError;

/// Query, key and value views of one fused `[batch, time, 3 * features]` tensor.
#[derive(Debug, Clone)]
pub struct QueryKeyValue {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
}

impl QueryKeyValue {
    /// Slices `fused` along the feature axis into three equal blocks, in the
    /// order query, key, value.
    pub fn split(fused: &Tensor) -> Result<Self, AttentionError> {
        let (_, _, features) = fused.dims3().map_err(|_| {
            AttentionError::shape(format!(
                "fused qkv must be [batch, time, 3 * features], got {:?}",
                fused.dims()
            ))
        })?;
        if features == 0 || features % 3 != 0 {
            return Err(AttentionError::shape(format!(
                "fused qkv feature axis must be a positive multiple of 3, got {features}"
            )));
        }
        let width = features / 3;
        let block = |index: usize| -> Result<Tensor, AttentionError> {
            Ok(fused.narrow(2, index * width, width)?.contiguous()?)
        };
        Ok(Self {
            query: block(0)?,
            key: block(1)?,
            value: block(2)?,
        })
    }

    /// Width of each block.
    pub fn features(&self) -> usize {
        self.query.dims().last().copied().unwrap_or(0)
    }
}

/// Gradients flowing back into the three blocks of a [`QueryKeyValue`].
#[derive(Debug, Clone)]
pub struct QueryKeyValueGrad {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
}

impl QueryKeyValueGrad {
    /// Gradient with respect to the fused tensor the split came from.
    pub fn concat(&self) -> Result<Tensor, AttentionError> {
        Ok(Tensor::cat(&[&self.query, &self.key, &self.value], 2)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn split_then_concat_round_trips() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let data: Vec<f32> = (0..2 * 3 * 6).map(|v| v as f32).collect();
        let fused = Tensor::from_vec(data, (2, 3, 6), &device)?;
        let qkv = QueryKeyValue::split(&fused)?;
        assert_eq!(qkv.features(), 2);
        assert_eq!(qkv.query.to_vec3::<f32>()?[0][0], vec![0.0, 1.0]);
        assert_eq!(qkv.key.to_vec3::<f32>()?[0][0], vec![2.0, 3.0]);
        assert_eq!(qkv.value.to_vec3::<f32>()?[1][2], vec![34.0, 35.0]);

        let grad = QueryKeyValueGrad {
            query: qkv.query,
            key: qkv.key,
            value: qkv.value,
        };
        let rebuilt = grad.concat()?;
        assert_eq!(rebuilt.to_vec3::<f32>()?, fused.to_vec3::<f32>()?);
        Ok(())
    }

    #[test]
    fn rejects_bad_layouts() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let not_divisible = Tensor::zeros((1, 2, 7), DType::F32, &device)?;
        assert!(matches!(
            QueryKeyValue::split(&not_divisible),
            Err(AttentionError::InvalidShape { .. })
        ));
        let rank2 = Tensor::zeros((2, 6), DType::F32, &device)?;
        assert!(QueryKeyValue::split(&rank2).is_err());
        Ok(())
    }
}
