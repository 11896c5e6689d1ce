use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::{
    activations::ActivationKind,
    linear::LinearInit,
    mlp::{FeedForward, FeedForwardConfig},
};
use rand::{rngs::StdRng, SeedableRng};

fn bench_mlp(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 4usize;
    let seq = 16usize;
    let hidden = 768usize;
    let variants = [
        ("gelu", ActivationKind::Gelu),
        ("gelu_erf", ActivationKind::GeluErf),
        ("relu", ActivationKind::Relu),
    ];

    let mut group = c.benchmark_group("mlp");
    for &(label, activation) in &variants {
        let config = FeedForwardConfig {
            activation,
            ..FeedForwardConfig::gpt(hidden, 0.1)
        };
        let mlp = FeedForward::with_init(config, &LinearInit::XavierNormal, &device).expect("mlp init");
        let input = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device).expect("input");
        group.throughput(Throughput::Elements((batch * seq * hidden) as u64));

        group.bench_with_input(BenchmarkId::new("inference", label), &input, |b, input| {
            b.iter(|| black_box(mlp.forward(black_box(input), None).expect("forward")));
        });
        group.bench_with_input(BenchmarkId::new("training", label), &input, |b, input| {
            let mut rng = StdRng::seed_from_u64(0);
            b.iter(|| black_box(mlp.forward(black_box(input), Some(&mut rng)).expect("forward")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mlp);
criterion_main!(benches);
