#![cfg(feature = "serde")]

use approx::assert_abs_diff_eq;
use tempfile::tempdir;

use ffnet::{Activation, DenseLayer, Error, Layer, Loss, Network, NetworkBuilder};

const GOLDEN: &str = include_str!("golden/network_v1.json");

fn trained_network() -> Network {
    let mut net = NetworkBuilder::new(4)
        .unwrap()
        .loss(Loss::CrossEntropy)
        .dense(8, Activation::ReLU)
        .unwrap()
        .batch_norm()
        .unwrap()
        .dropout(0.3)
        .unwrap()
        .dense(2, Activation::Sigmoid)
        .unwrap()
        .build_with_seed(3)
        .unwrap();

    let xs = vec![
        vec![0.0, 0.0, 1.0, 1.0],
        vec![1.0, 0.0, 0.0, 1.0],
        vec![1.0, 1.0, 0.0, 0.0],
        vec![0.0, 1.0, 1.0, 0.0],
    ];
    let ys = vec![
        vec![0.0, 1.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 0.0],
    ];
    net.train(&xs, &ys, 20, 0.01, 2).unwrap();
    net.set_training(false);
    net
}

#[test]
fn save_then_load_reproduces_forward_outputs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut net = trained_network();
    net.save(&path).unwrap();

    let mut loaded = Network::load_json(&path).unwrap();
    assert!(!loaded.is_training());
    assert_eq!(loaded.seed(), net.seed());
    assert_eq!(loaded.loss(), net.loss());
    assert_eq!(loaded.hyperparameters(), net.hyperparameters());

    let kinds: Vec<_> = loaded.layers().iter().map(Layer::kind).collect();
    assert_eq!(kinds, vec!["dense", "batch_norm", "dropout", "dense"]);

    for input in [[0.0_f32, 1.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0]] {
        assert_eq!(
            net.predict(&input).unwrap(),
            loaded.predict(&input).unwrap()
        );
    }
}

#[test]
fn load_replaces_existing_network() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut saved = trained_network();
    saved.save(&path).unwrap();

    let mut target = Network::with_seed(Loss::Mse, 0);
    target.load(&path).unwrap();

    assert_eq!(target.num_layers(), 4);
    assert_eq!(target.loss(), Loss::CrossEntropy);
    let input = [1.0_f32, 0.0, 1.0, 0.0];
    assert_eq!(
        saved.predict(&input).unwrap(),
        target.predict(&input).unwrap()
    );
}

#[test]
fn diverged_model_is_not_saved() {
    let mut net = Network::with_seed(Loss::Mse, 0);
    net.add_initialized_layer(
        DenseLayer::from_parts(1, 1, Activation::Identity, vec![0.5], vec![0.0]).unwrap(),
    )
    .unwrap();
    net.train(&[vec![1e20]], &[vec![0.0]], 5, 1e10, 1).unwrap();

    let Layer::Dense(dense) = &net.layers()[0] else {
        panic!("expected a dense layer");
    };
    assert!(!dense.weights()[0].is_finite());

    let dir = tempdir().unwrap();
    let path = dir.path().join("diverged.json");
    assert!(matches!(net.save(&path), Err(Error::InvalidData(_))));
    assert!(!path.exists());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = Network::load_json(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn failed_load_leaves_network_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, GOLDEN.replace(r#""type": "dropout""#, r#""type": "conv2d""#))
        .unwrap();

    let mut net = trained_network();
    let input = [0.0_f32, 1.0, 1.0, 0.0];
    let before = net.predict(&input).unwrap();

    let err = net.load(&path).unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert_eq!(net.num_layers(), 4);
    assert_eq!(net.predict(&input).unwrap(), before);
}

#[test]
fn malformed_document_is_a_format_error() {
    assert!(matches!(
        Network::from_json_str("{ \"format_version\": 1, \"layers\": ["),
        Err(Error::Format(_))
    ));
}

#[test]
fn golden_model_loads_and_predicts() {
    let mut net = Network::from_json_str(GOLDEN).unwrap();

    assert_eq!(net.seed(), 7);
    assert_eq!(net.loss(), Loss::Mse);
    assert!(!net.is_training());
    assert_eq!(net.hyperparameters().learning_rate, 0.01);
    assert_eq!(
        net.hyperparameters().features.get("use_residual_connections"),
        Some(&false)
    );

    // dense -> [1.5, 1.5]; batch norm -> [2 * 1 / 0.5, 1.5 / 2 + 1]; dropout is identity.
    let y = net.predict(&[1.0, 1.0]).unwrap();
    assert_eq!(y.len(), 1);
    assert_abs_diff_eq!(y[0], 5.75, epsilon = 1e-3);

    let y = net.predict(&[0.0, 0.0]).unwrap();
    assert_abs_diff_eq!(y[0], 0.75, epsilon = 1e-3);
}

#[test]
fn golden_model_survives_rewrite() {
    let net = Network::from_json_str(GOLDEN).unwrap();
    let again = Network::from_json_str(&net.to_json_string().unwrap()).unwrap();
    assert_eq!(
        net.to_json_string_pretty().unwrap(),
        again.to_json_string_pretty().unwrap()
    );
}
