use super::*;
use crate::core::{Attention, AttentionError, Config};
use crate::heads::{join_heads, split_heads};
use crate::kv_cache::KeyValueCache;
use crate::ops::gradcheck::{assert_close, numeric_gradient, weighted_sum};
use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, SeedableRng};
use static_assertions::assert_impl_all;

assert_impl_all!(ScaledDotProductAttention: Send, Sync, Clone);
assert_impl_all!(MultiHeadAttention: Send, Sync, Clone);

type Result<T> = std::result::Result<T, AttentionError>;

const VALUES: [[f32; 3]; 3] = [[0., 1., 2.], [3., 4., 5.], [6., 7., 8.]];

/// `sqrt(sqrt(3) * ln 2)`: with size 3 a matching query/key pair produces a
/// logit of exactly `ln 2`, so attention weights come out as simple fractions.
fn unit() -> f32 {
    (3f64.sqrt() * 2f64.ln()).sqrt() as f32
}

/// Fused `[1, 3, 9]` input whose query rows are `query_rows * unit`, keys are
/// `I * unit` and values count from 0 to 8.
fn fused_input(query_rows: [[f32; 3]; 3]) -> Result<Tensor> {
    let k = unit();
    let mut data = Vec::with_capacity(27);
    for t in 0..3 {
        data.extend(query_rows[t].iter().map(|q| q * k));
        data.extend((0..3).map(|j| if j == t { k } else { 0.0 }));
        data.extend(VALUES[t]);
    }
    Ok(Tensor::from_vec(data, (1, 3, 9), &Device::Cpu)?)
}

fn identity_seed() -> Result<Tensor> {
    let data = (0..9).map(|i| if i % 4 == 0 { 1f32 } else { 0.0 }).collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (1, 3, 3), &Device::Cpu)?)
}

fn assert_rows(actual: &Tensor, expected: &[&[f32]], tol: f32) -> Result<()> {
    let rows = actual.squeeze(0)?.to_vec2::<f32>()?;
    assert_eq!(rows.len(), expected.len());
    for (i, (row, want)) in rows.iter().zip(expected).enumerate() {
        assert_eq!(row.len(), want.len());
        for (j, (a, e)) in row.iter().zip(want.iter()).enumerate() {
            assert!((a - e).abs() < tol, "[{i}][{j}] = {a}, expected {e}");
        }
    }
    Ok(())
}

fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()?)
}

const NON_CAUSAL_QUERY: [[f32; 3]; 3] = [[0., 0., 1.], [0., 1., 0.], [1., 0., 0.]];
const CAUSAL_QUERY: [[f32; 3]; 3] = [[0., 1., 0.], [1., 0., 0.], [0., 0., 1.]];

#[test]
fn non_causal_scenario_output() -> Result<()> {
    let attention = ScaledDotProductAttention::new(3, &Config::default())?;
    let output = attention.forward(&fused_input(NON_CAUSAL_QUERY)?, None, None)?;
    assert_eq!(output.dims(), &[1, 3, 3]);
    assert_rows(
        &output,
        &[&[3.75, 4.75, 5.75], &[3.0, 4.0, 5.0], &[2.25, 3.25, 4.25]],
        1e-5,
    )
}

#[test]
fn non_causal_scenario_pullback() -> Result<()> {
    let attention = ScaledDotProductAttention::new(3, &Config::default())?;
    let qkv = crate::qkv::QueryKeyValue::split(&fused_input(NON_CAUSAL_QUERY)?)?;
    let (_, tape) = attention.attend_with_tape(&qkv.query, &qkv.key, &qkv.value, None, None)?;
    let grads = attention.attend_backward(&tape, &identity_seed()?)?;

    assert_rows(
        &grads.query,
        &[
            &[-0.5930669, -0.1186134, 0.7116803],
            &[-0.4744535, 0.0, 0.4744535],
            &[-0.7116803, 0.1186134, 0.5930669],
        ],
        1e-5,
    )?;
    assert_rows(
        &grads.key,
        &[
            &[-0.7116803, -0.4744535, -0.5930669],
            &[0.1186134, 0.0, -0.1186134],
            &[0.5930669, 0.4744535, 0.7116803],
        ],
        1e-5,
    )?;
    assert_rows(
        &grads.value,
        &[&[0.25, 0.25, 0.5], &[0.25, 0.5, 0.25], &[0.5, 0.25, 0.25]],
        1e-5,
    )
}

#[test]
fn causal_scenario_output_and_pullback() -> Result<()> {
    let attention = ScaledDotProductAttention::new(3, &Config::causal())?;
    let fused = fused_input(CAUSAL_QUERY)?;
    let output = attention.forward(&fused, None, None)?;
    assert_rows(
        &output,
        &[&[0.0, 1.0, 2.0], &[1.0, 2.0, 3.0], &[3.75, 4.75, 5.75]],
        1e-5,
    )?;

    let grad = attention.forward_backward(&fused, None, &identity_seed()?)?;
    assert_eq!(grad.dims(), &[1, 3, 9]);
    let third = 1.0 / 3.0;
    assert_rows(
        &grad,
        &[
            // d query | d key | d value
            &[0.0, 0.0, 0.0, -0.4217365, 0.0, -0.5930669, 1.0, 2.0 * third, 0.25],
            &[-0.4217365, 0.4217365, 0.0, 0.4217365, 0.0, -0.1186134, 0.0, third, 0.25],
            &[-0.5930669, -0.1186134, 0.7116803, 0.0, 0.0, 0.7116803, 0.0, 0.0, 0.5],
        ],
        1e-5,
    )
}

#[test]
fn causal_scores_vanish_above_the_diagonal() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(4, &Config::causal())?;
    let q = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?;
    let k = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?;
    let v = Tensor::randn(0f32, 1.0, (2, 5, 4), &device)?;
    let (_, tape) = attention.attend_with_tape(&q, &k, &v, None, None)?;
    for batch in tape.score.to_vec3::<f32>()? {
        for (i, row) in batch.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if j > i {
                    assert_eq!(*value, 0.0);
                }
            }
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    // two new queries over five keys: diagonal shifted by three
    let (_, tape) = attention.attend_with_tape(&q.narrow(1, 3, 2)?, &k, &v, None, None)?;
    let scores = tape.score.to_vec3::<f32>()?;
    assert_eq!(scores[0][0][4], 0.0);
    assert!(scores[0][0][3] > 0.0);
    assert!(scores[1][1][4] > 0.0);
    Ok(())
}

#[test]
fn causal_row_survives_a_dominant_future_logit() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(1, &Config::causal())?;
    let q = Tensor::from_vec(vec![20f32, 20.0], (1, 2, 1), &device)?;
    let k = Tensor::from_vec(vec![0f32, 20.0], (1, 2, 1), &device)?;
    let v = Tensor::from_vec(vec![7f32, 9.0], (1, 2, 1), &device)?;
    let output = attention.attend(&q, &k, &v, None, None)?;
    assert_rows(&output, &[&[7.0], &[9.0]], 1e-5)
}

#[test]
fn multi_head_scales_by_head_width() -> Result<()> {
    let attention = MultiHeadAttention::new(8, 2, &Config::causal(), &Device::Cpu)?;
    assert_eq!(attention.core().size(), 4);
    assert_eq!(attention.core().scale(), 2.0);
    Ok(())
}

#[test]
fn explicit_mask_overrides_causal_default() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(2, &Config::causal())?;
    let fused = Tensor::randn(0f32, 1.0, (1, 3, 6), &device)?;
    let everything = Tensor::ones((3, 3), DType::F32, &device)?;
    let with_full_mask = attention.forward(&fused, Some(&everything), None)?;
    let unmasked = ScaledDotProductAttention::new(2, &Config::default())?.forward(&fused, None, None)?;
    assert!(max_diff(&with_full_mask, &unmasked)? < 1e-6);
    Ok(())
}

#[test]
fn shape_violations_are_reported() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(2, &Config::default())?;
    let q = Tensor::zeros((1, 3, 2), DType::F32, &device)?;
    let k = Tensor::zeros((1, 4, 2), DType::F32, &device)?;
    let v = Tensor::zeros((1, 3, 2), DType::F32, &device)?;
    assert!(matches!(
        attention.attend(&q, &k, &v, None, None),
        Err(AttentionError::InvalidShape { .. })
    ));

    let wide = Tensor::zeros((1, 3, 3), DType::F32, &device)?;
    assert!(attention.attend(&wide, &wide, &wide, None, None).is_err());

    let empty_row = Tensor::from_vec(vec![1f32, 0., 0., 0., 0., 0., 1., 1., 1.], (3, 3), &device)?;
    assert!(matches!(
        attention.attend(&q, &v, &v, Some(&empty_row), None),
        Err(AttentionError::InvalidShape { .. })
    ));

    let causal = ScaledDotProductAttention::new(2, &Config::causal())?;
    let short = Tensor::zeros((1, 2, 2), DType::F32, &device)?;
    assert!(matches!(
        causal.attend(&q, &short, &short, None, None),
        Err(AttentionError::InvalidShape { .. })
    ));

    assert!(matches!(
        MultiHeadAttention::new(10, 3, &Config::default(), &device),
        Err(AttentionError::InvalidShape { .. })
    ));
    assert!(matches!(
        ScaledDotProductAttention::new(4, &Config::default().with_dropout(1.5)),
        Err(AttentionError::InvalidConfig { .. })
    ));
    Ok(())
}

#[test]
fn streaming_matches_full_sequence() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(4, &Config::causal())?;
    let fused = Tensor::randn(0f32, 1.0, (2, 6, 12), &device)?;
    let full = attention.forward(&fused, None, None)?;

    let mut state = attention.empty_state();
    let first = attention.forward_with_state(&fused.narrow(1, 0, 3)?, &mut state, None, None)?;
    let second = attention.forward_with_state(&fused.narrow(1, 3, 3)?, &mut state, None, None)?;
    assert_eq!(state.len(), 6);
    let streamed = Tensor::cat(&[&first, &second], 1)?;
    assert!(max_diff(&full, &streamed)? < 1e-5);
    Ok(())
}

#[test]
fn failed_step_leaves_state_untouched() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(2, &Config::causal())?;
    let mut state = attention.empty_state();
    attention.forward_with_state(&Tensor::randn(0f32, 1.0, (1, 2, 6), &device)?, &mut state, None, None)?;

    let step = Tensor::randn(0f32, 1.0, (1, 1, 6), &device)?;
    let empty_mask = Tensor::zeros((1, 3), DType::F32, &device)?;
    let keys_before = state.view().map(|(key, _)| key.clone());
    assert!(attention.forward_with_state(&step, &mut state, Some(&empty_mask), None).is_err());
    assert_eq!(state.len(), 2);
    match (&keys_before, state.view()) {
        (Some(before), Some((after, _))) => assert_eq!(max_diff(before, after)?, 0.0),
        _ => panic!("state should stay populated"),
    }

    let mut fresh = attention.empty_state();
    let first_mask = Tensor::zeros((1, 1), DType::F32, &device)?;
    assert!(attention.forward_with_state(&step, &mut fresh, Some(&first_mask), None).is_err());
    assert!(fresh.is_empty());
    assert_eq!(fresh.batch(), None);
    Ok(())
}

#[test]
fn multi_head_streaming_matches_full_sequence() -> Result<()> {
    let device = Device::Cpu;
    let attention = MultiHeadAttention::new(8, 2, &Config::causal(), &device)?;
    let input = Tensor::randn(0f32, 1.0, (1, 5, 8), &device)?;
    let full = attention.forward(&input, None, None)?;
    assert_eq!(full.dims(), &[1, 5, 8]);

    let mut state = attention.empty_state();
    assert_eq!(state.features(), 4);
    let mut pieces = Vec::new();
    for (start, len) in [(0, 2), (2, 1), (3, 2)] {
        pieces.push(attention.forward_with_state(&input.narrow(1, start, len)?, &mut state, None, None)?);
    }
    assert_eq!(state.len(), 5);
    assert_eq!(state.batch(), Some(2));
    let streamed = Tensor::cat(&pieces, 1)?;
    assert!(max_diff(&full, &streamed)? < 1e-5);
    Ok(())
}

#[test]
fn dropout_is_reproducible_and_off_at_inference() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(4, &Config::causal().with_dropout(0.5))?;
    let plain = ScaledDotProductAttention::new(4, &Config::causal())?;
    let fused = Tensor::randn(0f32, 1.0, (2, 4, 12), &device)?;

    let a = attention.forward(&fused, None, Some(&mut StdRng::seed_from_u64(9)))?;
    let b = attention.forward(&fused, None, Some(&mut StdRng::seed_from_u64(9)))?;
    assert_eq!(max_diff(&a, &b)?, 0.0);

    let inference = attention.forward(&fused, None, None)?;
    let reference = plain.forward(&fused, None, None)?;
    assert_eq!(max_diff(&inference, &reference)?, 0.0);
    Ok(())
}

#[test]
fn backward_through_dropout_matches_finite_differences() -> Result<()> {
    let device = Device::Cpu;
    let attention = ScaledDotProductAttention::new(3, &Config::causal().with_dropout(0.3))?;
    let q = Tensor::randn(0f32, 1.0, (1, 4, 3), &device)?;
    let k = Tensor::randn(0f32, 1.0, (1, 4, 3), &device)?;
    let v = Tensor::randn(0f32, 1.0, (1, 4, 3), &device)?;
    let seed = Tensor::randn(0f32, 1.0, (1, 4, 3), &device)?;

    let (_, tape) = attention.attend_with_tape(&q, &k, &v, None, Some(&mut StdRng::seed_from_u64(4)))?;
    assert!(tape.keep_mask.is_some());
    let grads = attention.attend_backward(&tape, &seed)?;

    let run = |q: &Tensor, k: &Tensor, v: &Tensor| -> Result<f32> {
        let out = attention.attend(q, k, v, None, Some(&mut StdRng::seed_from_u64(4)))?;
        weighted_sum(&out, &seed)
    };
    assert_close(&grads.query, &numeric_gradient(&q, 1e-3, |x| run(x, &k, &v))?, 1e-2)?;
    assert_close(&grads.key, &numeric_gradient(&k, 1e-3, |x| run(&q, x, &v))?, 1e-2)?;
    assert_close(&grads.value, &numeric_gradient(&v, 1e-3, |x| run(&q, &k, x))?, 1e-2)?;
    Ok(())
}

#[test]
fn heads_backward_matches_finite_differences() -> Result<()> {
    let device = Device::Cpu;
    let attention = MultiHeadAttention::new(4, 2, &Config::causal(), &device)?;
    let projected = Tensor::randn(0f32, 1.0, (1, 3, 12), &device)?;
    let seed = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;

    let analytic = attention.heads_backward(&projected, None, &seed)?;
    assert_eq!(analytic.dims(), projected.dims());
    let numeric = numeric_gradient(&projected, 1e-3, |p| {
        let attended = attention.core().forward(&split_heads(p, 2)?, None, None)?;
        weighted_sum(&join_heads(&attended, 2)?, &seed)
    })?;
    assert_close(&analytic, &numeric, 1e-2)
}
