//! Export and import tests.
//!
//! - raw JSON and bincode documents rebuild identical parameters
//! - quantized documents stay within each payload's tolerance
//! - documents from another layout version are rejected

use neurotex::{
    export_network, import_network, Activation, ConnectivityConfig, ConnectivityRecord, ExportOptions, HostBackend,
    IdentificationProblem, IdentificationSample, LayerConfig, Network, NetworkConfig, NetworkDocument,
    NeurotexError, ProblemKind, RunState, TensorData, TrainerBuilder, TrainerConfig, DOCUMENT_VERSION,
};

fn config() -> NetworkConfig {
    NetworkConfig::new(8, ProblemKind::Identification)
        .layer(LayerConfig::new(
            8,
            ConnectivityConfig::Convolutional {
                sparsity: 3,
                kernels_count: 4,
            },
            Activation::Relu,
        ))
        .layer(LayerConfig::new(4, ConnectivityConfig::SquareFast { sparsity: 2 }, Activation::Tanh))
        .layer(LayerConfig::new(2, ConnectivityConfig::FullNPoT, Activation::Linear))
        .with_seed(21)
}

fn export(backend: &mut HostBackend, options: ExportOptions) -> (Network<HostBackend>, NetworkDocument) {
    let network = Network::build(backend, config()).expect("network");
    let document = export_network(backend, &network, None, options).expect("export");
    (network, document)
}

#[test]
fn test_json_round_trip_is_exact() {
    let mut backend = HostBackend::new();
    let (network, document) = export(&mut backend, ExportOptions::default());
    assert_eq!(document.document_version, DOCUMENT_VERSION);
    assert_eq!(document.layers.len(), 3);
    assert!(document.layers[0].connectivity.is_reorganize());
    assert!(matches!(
        document.layers[1].connectivity,
        ConnectivityRecord::SquareFast { sparsity: 2, .. }
    ));

    let json = document.to_json_pretty().unwrap();
    assert!(json.contains("\"isReorganize\": true"));
    let parsed = NetworkDocument::from_json(&json).unwrap();
    assert_eq!(parsed, document);

    let imported = import_network(&mut backend, &parsed).unwrap();
    assert_eq!(
        imported.parameters(&backend).unwrap(),
        network.parameters(&backend).unwrap()
    );
    assert_eq!(imported.config().layers, network.config().layers);
}

#[test]
fn test_bincode_round_trip() {
    let mut backend = HostBackend::new();
    let (_, document) = export(&mut backend, ExportOptions::default());
    let bytes = document.to_bytes().unwrap();
    assert_eq!(NetworkDocument::from_bytes(&bytes).unwrap(), document);
}

#[test]
fn test_quantized_export_within_tolerance() {
    let mut backend = HostBackend::new();
    let (network, document) = export(&mut backend, ExportOptions { quantize: true });
    let exact = network.parameters(&backend).unwrap();

    for (layer, (record, params)) in document.layers.iter().zip(&exact).enumerate() {
        for (data, values, what) in [
            (record.connectivity.weights(), &params.weights, "weights"),
            (&record.bias, &params.bias, "bias"),
        ] {
            assert!(matches!(data, TensorData::Quantized { .. }));
            let tolerance = data.tolerance() + 1e-6;
            for (a, b) in data.decode().iter().zip(values.iter()) {
                assert!((a - b).abs() <= tolerance, "layer {} {}: {} vs {}", layer, what, a, b);
            }
        }
    }

    // the lossy document still imports
    let imported = import_network(&mut backend, &document).unwrap();
    assert_eq!(imported.layers_count(), 3);
}

#[test]
fn test_other_version_is_rejected() {
    let mut backend = HostBackend::new();
    let (_, mut document) = export(&mut backend, ExportOptions::default());
    document.document_version = 99;
    let err = import_network(&mut backend, &document).unwrap_err();
    assert!(matches!(
        err,
        NeurotexError::IncompatibleVersion { got: 99, .. }
    ));
}

#[test]
fn test_mismatched_reorganize_flag_is_rejected() {
    let mut backend = HostBackend::new();
    let (_, mut document) = export(&mut backend, ExportOptions::default());
    if let ConnectivityRecord::Convolutional { is_reorganize, .. } = &mut document.layers[0].connectivity {
        *is_reorganize = false;
    }
    assert!(matches!(
        import_network(&mut backend, &document),
        Err(NeurotexError::Config(_))
    ));
}

#[test]
fn test_trainer_document_carries_progress() {
    let sample = IdentificationSample::new(vec![0.25; 256], vec![0.5; 16]);
    let mut problem = IdentificationProblem::new(1e-4);
    problem.add_training(sample.clone()).add_testing(sample);

    let mut trainer = TrainerBuilder::new(HostBackend::new())
        .network(config())
        .problem(problem)
        .config(TrainerConfig {
            test_minibatchs_interval: 2,
            stop_after_minibatchs_count: Some(4),
            ..TrainerConfig::default()
        })
        .build()
        .unwrap();
    assert_eq!(trainer.run().unwrap(), RunState::Finished);

    let document = trainer.export(ExportOptions::default()).unwrap();
    let json = document.to_json().unwrap();
    let parsed = NetworkDocument::from_json(&json).unwrap();
    let infos = parsed.training_infos.expect("training infos");
    assert_eq!(infos.minibatch_index, 4);
    assert_eq!(infos.tests_done, 2);
    assert_eq!(infos.learning_curve.len(), 2);
    assert!(infos.best_test.is_some());
}
