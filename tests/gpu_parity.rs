//! GPU/host parity tests.
//!
//! The same network, parameters and sample run on [`WgpuBackend`] and on
//! [`HostBackend`]; outputs and trained parameters must agree.
//!
//! Run with: cargo test --features gpu --test gpu_parity -- --ignored

#![cfg(feature = "gpu")]

use neurotex::{
    Activation, Backend, ConnectivityConfig, CostFunction, Expected, HostBackend, LayerConfig, LayerParameters,
    LearningMask, Network, NetworkConfig, ProblemKind, Sample, SgdParams, StorageMode, TensorBuffer, WgpuBackend, WgpuOptions,
};

const EPSILON: f32 = 1e-4;

fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());
    let (idx, diff) = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .enumerate()
        .fold((0, 0.0f32), |best, (i, d)| if d > best.1 { (i, d) } else { best });
    assert!(
        diff <= tol,
        "Max difference {} at index {} exceeds tolerance {}. a={}, b={}",
        diff,
        idx,
        tol,
        a[idx],
        b[idx]
    );
}

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| ((i as f32) * 0.37).sin() * scale).collect()
}

fn mixed_config() -> NetworkConfig {
    NetworkConfig::new(8, ProblemKind::Identification)
        .layer(LayerConfig::new(8, ConnectivityConfig::Direct, Activation::Tanh))
        .layer(LayerConfig::new(4, ConnectivityConfig::SquareFast { sparsity: 2 }, Activation::Relu))
        .layer(LayerConfig::new(2, ConnectivityConfig::Full, Activation::Sigmoid))
        .with_seed(5)
}

/// Forward output and parameters after one training step.
fn run<B: Backend>(
    backend: &mut B,
    config: NetworkConfig,
    params: &[LayerParameters],
) -> (Vec<f32>, Vec<LayerParameters>) {
    let in_size = config.input_size;
    let out_size = config.output_layer().expect("output layer").size;
    let mut network = Network::from_parameters(backend, config, params).expect("network");
    let input = TensorBuffer::from_data(backend, in_size, in_size, &ramp(in_size * in_size * 4, 1.0)).expect("input");
    let expected =
        TensorBuffer::from_data(backend, out_size, out_size, &ramp(out_size * out_size * 4, 0.5)).expect("expected");

    network.feedforward(backend, &input, false, None, None).expect("forward");
    let output = network.download_output(backend).expect("download");

    let sample = Sample::new(&input, Expected::Tensor(&expected));
    let sgd = vec![SgdParams::new(0.05).with_momentum(0.5); network.layers_count()];
    network
        .train_sample(backend, &sample, CostFunction::Quadratic, &sgd, LearningMask::ALL)
        .expect("train");
    (output, network.parameters(backend).expect("parameters"))
}

#[test]
#[ignore = "Requires GPU"]
fn test_forward_and_step_parity() {
    let mut gpu = WgpuBackend::init(WgpuOptions::default()).expect("Failed to initialize GPU backend");
    let mut host = HostBackend::new();

    let params = Network::build(&mut host, mixed_config())
        .and_then(|n| n.parameters(&host))
        .expect("initial parameters");

    let (host_out, host_params) = run(&mut host, mixed_config(), &params);
    let (gpu_out, gpu_params) = run(&mut gpu, mixed_config(), &params);

    assert_approx_eq(&host_out, &gpu_out, EPSILON);
    for (h, g) in host_params.iter().zip(&gpu_params) {
        assert_approx_eq(&h.weights, &g.weights, EPSILON);
        assert_approx_eq(&h.bias, &g.bias, EPSILON);
    }
    assert!(gpu.dispatch_count() > 0);
    assert!(!gpu.pipelines().is_empty());
}

#[test]
#[ignore = "Requires GPU"]
fn test_convolution_parity() {
    let mut gpu = WgpuBackend::init(WgpuOptions::default()).expect("Failed to initialize GPU backend");
    let mut host = HostBackend::new();
    let config = || {
        NetworkConfig::new(8, ProblemKind::Identification)
            .layer(
                LayerConfig::new(
                    4,
                    ConnectivityConfig::Convolutional {
                        sparsity: 3,
                        kernels_count: 4,
                    },
                    Activation::Relu,
                )
                .with_max_pooling(2),
            )
            .layer(LayerConfig::new(2, ConnectivityConfig::FullNPoT, Activation::Linear))
            .with_seed(8)
    };
    let params = Network::build(&mut host, config())
        .and_then(|n| n.parameters(&host))
        .expect("initial parameters");

    let (host_out, host_params) = run(&mut host, config(), &params);
    let (gpu_out, gpu_params) = run(&mut gpu, config(), &params);

    assert_approx_eq(&host_out, &gpu_out, EPSILON);
    for (h, g) in host_params.iter().zip(&gpu_params) {
        assert_approx_eq(&h.weights, &g.weights, EPSILON);
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_byte_buffer_quantized_on_device() {
    let mut gpu = WgpuBackend::init(WgpuOptions::low_memory()).expect("Failed to initialize GPU backend");
    let data = [0.1f32, 0.5, 0.99, 0.0, 1.0, 0.25, 0.7, 0.3];
    let mut tensor = TensorBuffer::new(&mut gpu, 2, 1, StorageMode::Byte).expect("byte tensor");
    tensor.upload(&mut gpu, &data).expect("upload");
    let back = tensor.download(&gpu).expect("download");
    for (v, q) in data.iter().zip(&back) {
        assert!((v - q).abs() <= 0.5 / 255.0 + 1e-6, "{} -> {}", v, q);
    }
    assert!(gpu.name().starts_with("wgpu"));
}
