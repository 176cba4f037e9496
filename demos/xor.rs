use std::time::Instant;

use ffnet::{Activation, Loss, NetworkBuilder};

fn main() -> ffnet::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Small XOR-like problem with two one-hot classes.
    let xs = vec![
        vec![0.0, 0.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0, 1.0],
        vec![0.0, 1.0, 0.0, 1.0],
        vec![0.0, 1.0, 1.0, 0.0],
        vec![1.0, 0.0, 0.0, 1.0],
        vec![1.0, 0.0, 1.0, 0.0],
        vec![1.0, 1.0, 0.0, 0.0],
        vec![1.0, 1.0, 1.0, 1.0],
    ];
    let ys = vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
    ];

    let mut net = NetworkBuilder::new(4)?
        .loss(Loss::CrossEntropy)
        .dense(64, Activation::ReLU)?
        .batch_norm()?
        .dropout(0.3)?
        .dense(32, Activation::ReLU)?
        .batch_norm()?
        .dropout(0.2)?
        .dense(2, Activation::Sigmoid)?
        .build()?;

    println!("training (seed {})...", net.seed());
    let start = Instant::now();
    let report = net.train(&xs, &ys, 1_000, 0.001, 4)?;
    println!(
        "trained in {}ms, final_loss={}",
        start.elapsed().as_millis(),
        report.final_loss
    );

    net.set_training(false);
    for x in &xs {
        let y = net.predict(x)?;
        println!("x={x:?} y=[{:.4}, {:.4}]", y[0], y[1]);
    }

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "xor_model.json".to_owned());
    net.save(&path)?;
    println!("model saved to {path}");

    Ok(())
}
