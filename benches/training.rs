//! Minibatch and forward-pass benchmarks on the host backend.
//!
//! A fresh trainer is built per topology so every run starts from the same
//! seeded weights. Criterion runs many minibatches on the same trainer, so
//! the steady state is measured, not the first load.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use neurotex::{
    Activation, ConnectivityConfig, HostBackend, IdentificationProblem, IdentificationSample, LayerConfig,
    Network, NetworkConfig, ProblemKind, TensorBuffer, TrainerBuilder, TrainerConfig, CHANNELS,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn make_data(side: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..side * side * CHANNELS).map(|_| rng.gen_range(0.0..1.0)).collect()
}

fn topologies() -> Vec<(&'static str, NetworkConfig)> {
    vec![
        (
            "dense",
            NetworkConfig::new(16, ProblemKind::Identification)
                .layer(LayerConfig::new(8, ConnectivityConfig::FullNPoT, Activation::Tanh))
                .layer(LayerConfig::new(4, ConnectivityConfig::FullNPoT, Activation::Linear))
                .with_seed(1),
        ),
        (
            "windowed",
            NetworkConfig::new(32, ProblemKind::Identification)
                .layer(LayerConfig::new(16, ConnectivityConfig::SquareFast { sparsity: 4 }, Activation::Relu))
                .layer(LayerConfig::new(8, ConnectivityConfig::Square { sparsity: 4 }, Activation::Tanh))
                .layer(LayerConfig::new(4, ConnectivityConfig::Full, Activation::Linear))
                .with_seed(2),
        ),
        (
            "conv",
            NetworkConfig::new(32, ProblemKind::Identification)
                .layer(
                    LayerConfig::new(
                        16,
                        ConnectivityConfig::Convolutional {
                            sparsity: 3,
                            kernels_count: 4,
                        },
                        Activation::Relu,
                    )
                    .with_max_pooling(2),
                )
                .layer(LayerConfig::new(4, ConnectivityConfig::FullNPoT, Activation::Linear))
                .with_seed(3),
        ),
    ]
}

fn bench_minibatch(c: &mut Criterion) {
    let minibatch_size = 8;
    let mut group = c.benchmark_group("minibatch");

    for (name, config) in topologies() {
        let in_size = config.input_size;
        let out_size = config.output_layer().map_or(1, |l| l.size);
        let mut problem = IdentificationProblem::new(1e-4);
        for seed in 0..4 {
            problem.add_training(IdentificationSample::new(
                make_data(in_size, seed),
                make_data(out_size, seed + 100),
            ));
        }

        let mut trainer = TrainerBuilder::new(HostBackend::new())
            .network(config)
            .problem(problem)
            .config(TrainerConfig {
                minibatch_size,
                test_minibatchs_interval: usize::MAX,
                ..TrainerConfig::default()
            })
            .build()
            .unwrap();
        trainer.train().unwrap();

        group.throughput(Throughput::Elements(minibatch_size as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| black_box(trainer.tick().unwrap()));
        });
    }

    group.finish();
}

fn bench_feedforward(c: &mut Criterion) {
    let mut group = c.benchmark_group("feedforward");

    for (name, config) in topologies() {
        let mut backend = HostBackend::new();
        let in_size = config.input_size;
        let mut network = Network::build(&mut backend, config).unwrap();
        let input = TensorBuffer::from_data(&mut backend, in_size, in_size, &make_data(in_size, 7)).unwrap();

        group.throughput(Throughput::Elements((in_size * in_size) as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                network
                    .feedforward(&mut backend, black_box(&input), false, None, None)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_feedforward, bench_minibatch);
criterion_main!(benches);
