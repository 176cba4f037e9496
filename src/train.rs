use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::error::check_len;
use crate::{Dataset, Error, Network, Result};

/// Learning-rate factor commonly used with [`TrainConfig::lr_decay`].
pub const DEFAULT_LR_DECAY: f32 = 0.95;

/// How gradients inside a mini-batch are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Update after every sample; the batch size only groups samples.
    #[default]
    PerSample,
    /// Sum gradients over the batch and apply their mean once per batch.
    Mean,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub epochs: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub batch_mode: BatchMode,
    /// Log the epoch loss at `info` level every `log_every` epochs. `0` disables.
    pub log_every: usize,
    /// Adaptive learning rate: multiply the rate by this factor after every epoch whose
    /// average loss is higher than the previous epoch's. `None` keeps `lr` fixed.
    pub lr_decay: Option<f32>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            lr: 1e-3,
            batch_size: 32,
            batch_mode: BatchMode::PerSample,
            log_every: 100,
            lr_decay: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig("lr must be finite and > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        if let Some(factor) = self.lr_decay {
            if !(factor.is_finite() && factor > 0.0 && factor < 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "lr_decay must be in (0, 1), got {factor}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FitReport {
    /// Average loss of each epoch, in order.
    pub epoch_losses: Vec<f32>,
    pub final_loss: f32,
    /// Learning rate after the last epoch; differs from `TrainConfig::lr` only when
    /// `lr_decay` kicked in.
    pub final_lr: f32,
}

impl Network {
    /// Train on row-major samples with per-sample updates.
    ///
    /// Fails with `DatasetMismatch` if `inputs` and `targets` differ in length.
    pub fn train(
        &mut self,
        inputs: &[Vec<f32>],
        targets: &[Vec<f32>],
        epochs: usize,
        lr: f32,
        batch_size: usize,
    ) -> Result<FitReport> {
        let data = Dataset::from_rows(inputs, targets)?;
        self.fit(
            &data,
            TrainConfig {
                epochs,
                lr,
                batch_size,
                ..TrainConfig::default()
            },
        )
    }

    /// Train the network on a dataset.
    ///
    /// Every epoch reshuffles the sample order with the network RNG and walks it in
    /// contiguous batches of `cfg.batch_size`. Each sample goes through forward, loss,
    /// backward; parameters are then updated according to `cfg.batch_mode`.
    ///
    /// The learning rate in effect at the end is stored in
    /// [`crate::Hyperparameters::learning_rate`].
    ///
    /// The per-sample loop does not allocate.
    pub fn fit(&mut self, data: &Dataset, cfg: TrainConfig) -> Result<FitReport> {
        cfg.validate()?;
        if data.is_empty() {
            return Err(Error::InvalidData(
                "train dataset must not be empty".to_owned(),
            ));
        }
        if self.num_layers() == 0 {
            return Err(Error::InvalidConfig("network has no layers".to_owned()));
        }
        if let Some(input_dim) = self.input_dim() {
            check_len(input_dim, data.input_dim())?;
        }
        if let Some(output_dim) = self.output_dim() {
            check_len(output_dim, data.target_dim())?;
        }

        self.hyperparameters_mut().learning_rate = cfg.lr;
        let loss_fn = self.loss();
        let mut lr = cfg.lr;
        let mut prev_loss = f32::INFINITY;
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut epoch_losses = Vec::with_capacity(cfg.epochs);

        for epoch in 0..cfg.epochs {
            for (i, slot) in order.iter_mut().enumerate() {
                *slot = i;
            }
            order.shuffle(self.rng_mut());

            let mut total = 0.0_f32;
            for batch in order.chunks(cfg.batch_size) {
                for &idx in batch {
                    let target = data.target(idx);
                    let pred = self.forward(data.input(idx))?;
                    total += loss_fn.forward(pred, target);
                    self.backward(target)?;

                    match cfg.batch_mode {
                        BatchMode::PerSample => self.update(lr),
                        BatchMode::Mean => self.accumulate(),
                    }
                }
                if cfg.batch_mode == BatchMode::Mean {
                    self.apply_accumulated(lr, batch.len());
                }
            }

            let epoch_loss = total / data.len() as f32;
            if !epoch_loss.is_finite() {
                warn!("epoch {}: loss is not finite ({epoch_loss})", epoch + 1);
            }
            if cfg.log_every > 0 && (epoch + 1).is_multiple_of(cfg.log_every) {
                info!("epoch {}, loss {epoch_loss:.6}", epoch + 1);
            }
            epoch_losses.push(epoch_loss);

            if let Some(factor) = cfg.lr_decay {
                if epoch_loss > prev_loss {
                    lr *= factor;
                    debug!(
                        "epoch {}: loss rose to {epoch_loss:.6}, learning rate now {lr}",
                        epoch + 1
                    );
                    self.hyperparameters_mut().learning_rate = lr;
                }
                prev_loss = epoch_loss;
            }
        }

        let final_loss = epoch_losses.last().copied().unwrap_or(0.0);
        Ok(FitReport {
            epoch_losses,
            final_loss,
            final_lr: lr,
        })
    }

    /// Mean loss over a dataset in the network's current mode.
    pub fn evaluate(&mut self, data: &Dataset) -> Result<f32> {
        if data.is_empty() {
            return Err(Error::InvalidData("dataset must not be empty".to_owned()));
        }

        let loss_fn = self.loss();
        let mut total = 0.0_f32;
        for idx in 0..data.len() {
            let pred = self.forward(data.input(idx))?;
            check_len(pred.len(), data.target_dim())?;
            total += loss_fn.forward(pred, data.target(idx));
        }
        Ok(total / data.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{Activation, DenseLayer, Layer, Loss, NetworkBuilder};

    fn tiny_network(seed: u64) -> Network {
        let mut net = Network::with_seed(Loss::Mse, seed);
        net.add_layer(DenseLayer::new(2, 4, Activation::Tanh).unwrap())
            .unwrap();
        net.add_layer(DenseLayer::new(4, 1, Activation::Sigmoid).unwrap())
            .unwrap();
        net
    }

    fn xor() -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        (
            vec![
                vec![0.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
            ],
            vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
        )
    }

    #[test]
    fn train_rejects_mismatched_counts() {
        let mut net = tiny_network(0);
        let (xs, _) = xor();
        let ys = vec![vec![0.0]; 3];
        assert!(matches!(
            net.train(&xs, &ys, 1, 0.1, 2),
            Err(Error::DatasetMismatch {
                inputs: 4,
                targets: 3
            })
        ));
    }

    #[test]
    fn config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        assert!(TrainConfig {
            epochs: 0,
            ..TrainConfig::default()
        }
        .validate()
        .is_err());
        assert!(TrainConfig {
            lr: f32::NAN,
            ..TrainConfig::default()
        }
        .validate()
        .is_err());
        assert!(TrainConfig {
            batch_size: 0,
            ..TrainConfig::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn fit_rejects_feature_width_mismatch() {
        let mut net = tiny_network(0);
        let data = Dataset::from_rows(&[vec![0.0, 1.0, 2.0]], &[vec![1.0]]).unwrap();
        assert!(matches!(
            net.fit(&data, TrainConfig::default()),
            Err(Error::ShapeMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn report_has_one_loss_per_epoch_and_records_lr() {
        let mut net = tiny_network(1);
        let (xs, ys) = xor();
        let report = net.train(&xs, &ys, 7, 0.05, 3).unwrap();
        assert_eq!(report.epoch_losses.len(), 7);
        assert_eq!(report.final_loss, report.epoch_losses[6]);
        assert_eq!(net.hyperparameters().learning_rate, 0.05);
    }

    #[test]
    fn same_seed_replays_training_exactly() {
        let (xs, ys) = xor();
        let mut a = tiny_network(42);
        let mut b = tiny_network(42);
        let ra = a.train(&xs, &ys, 20, 0.1, 2).unwrap();
        let rb = b.train(&xs, &ys, 20, 0.1, 2).unwrap();
        assert_eq!(ra.epoch_losses, rb.epoch_losses);
        assert_eq!(a.predict(&xs[1]).unwrap(), b.predict(&xs[1]).unwrap());
    }

    fn regularized_network(seed: u64) -> Network {
        NetworkBuilder::new(2)
            .unwrap()
            .dense(6, Activation::ReLU)
            .unwrap()
            .batch_norm()
            .unwrap()
            .dropout(0.4)
            .unwrap()
            .dense(1, Activation::Sigmoid)
            .unwrap()
            .build_with_seed(seed)
            .unwrap()
    }

    fn dense_weights(net: &Network) -> Vec<f32> {
        net.layers()
            .iter()
            .filter_map(|layer| match layer {
                Layer::Dense(l) => Some(l.weights()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn dropout_mask(net: &Network) -> Vec<bool> {
        net.layers()
            .iter()
            .find_map(|layer| match layer {
                Layer::Dropout(l) => Some(l.mask().to_vec()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn same_seed_replays_dropout_and_batch_norm_training() {
        let (xs, ys) = xor();
        let run = |seed| {
            let mut net = regularized_network(seed);
            let report = net.train(&xs, &ys, 15, 0.05, 2).unwrap();
            (net, report)
        };

        let (a, ra) = run(17);
        let (b, rb) = run(17);
        assert_eq!(ra.epoch_losses, rb.epoch_losses);
        assert_eq!(dense_weights(&a), dense_weights(&b));
        assert_eq!(dropout_mask(&a), dropout_mask(&b));
        assert_eq!(dropout_mask(&a).len(), 6);

        let (c, rc) = run(18);
        assert_ne!(ra.epoch_losses, rc.epoch_losses);
        assert_ne!(dense_weights(&a), dense_weights(&c));
    }

    #[test]
    fn lr_decay_validation() {
        for bad in [0.0, 1.0, 1.5, -0.5, f32::NAN] {
            let cfg = TrainConfig {
                lr_decay: Some(bad),
                ..TrainConfig::default()
            };
            assert!(cfg.validate().is_err(), "{bad}");
        }
        assert!(TrainConfig {
            lr_decay: Some(DEFAULT_LR_DECAY),
            ..TrainConfig::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn lr_decays_when_epoch_loss_rises() {
        // One sample, one identity unit and a rate large enough to overshoot: the
        // error goes -1 -> 5 -> -25 -> 50 across epochs, so the rate is halved after
        // epochs 2, 3 and 4.
        let make = || {
            let mut net = Network::with_seed(Loss::Mse, 0);
            net.add_initialized_layer(
                DenseLayer::from_parts(1, 1, Activation::Identity, vec![0.0], vec![0.0])
                    .unwrap(),
            )
            .unwrap();
            net
        };
        let data = Dataset::from_rows(&[vec![1.0]], &[vec![1.0]]).unwrap();
        let cfg = TrainConfig {
            epochs: 4,
            lr: 1.5,
            batch_size: 1,
            lr_decay: Some(0.5),
            ..TrainConfig::default()
        };

        let mut net = make();
        let report = net.fit(&data, cfg).unwrap();
        assert_eq!(report.epoch_losses, vec![1.0, 25.0, 625.0, 2500.0]);
        assert_eq!(report.final_lr, 0.1875);
        assert_eq!(net.hyperparameters().learning_rate, 0.1875);

        let mut fixed = make();
        let report = fixed
            .fit(
                &data,
                TrainConfig {
                    lr_decay: None,
                    ..cfg
                },
            )
            .unwrap();
        assert_eq!(report.final_lr, 1.5);
        assert_eq!(fixed.hyperparameters().learning_rate, 1.5);
    }

    #[test]
    fn mean_batches_differ_from_per_sample_updates() {
        let (xs, ys) = xor();
        let data = Dataset::from_rows(&xs, &ys).unwrap();
        let base = tiny_network(3);

        let mut per_sample = base.clone();
        let mut mean = base;
        let cfg = TrainConfig {
            epochs: 5,
            lr: 0.5,
            batch_size: 4,
            ..TrainConfig::default()
        };
        per_sample.fit(&data, cfg).unwrap();
        mean.fit(
            &data,
            TrainConfig {
                batch_mode: BatchMode::Mean,
                ..cfg
            },
        )
        .unwrap();

        assert_ne!(
            per_sample.predict(&xs[0]).unwrap(),
            mean.predict(&xs[0]).unwrap()
        );
    }

    #[test]
    fn mean_batch_of_one_equals_per_sample() {
        let (xs, ys) = xor();
        let data = Dataset::from_rows(&xs, &ys).unwrap();
        let base = tiny_network(8);

        let mut per_sample = base.clone();
        let mut mean = base;
        let cfg = TrainConfig {
            epochs: 3,
            lr: 0.2,
            batch_size: 1,
            ..TrainConfig::default()
        };
        per_sample.fit(&data, cfg).unwrap();
        mean.fit(
            &data,
            TrainConfig {
                batch_mode: BatchMode::Mean,
                ..cfg
            },
        )
        .unwrap();

        let a = per_sample.predict(&xs[2]).unwrap();
        let b = mean.predict(&xs[2]).unwrap();
        assert!((a[0] - b[0]).abs() < 1e-5, "{a:?} vs {b:?}");
    }

    #[test]
    fn training_reduces_loss() {
        let (xs, _) = xor();
        // Logical OR: linearly separable, so a short run must make progress.
        let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![1.0]];
        let data = Dataset::from_rows(&xs, &ys).unwrap();
        let mut net = tiny_network(4);
        let before = net.evaluate(&data).unwrap();
        net.fit(
            &data,
            TrainConfig {
                epochs: 200,
                lr: 0.1,
                batch_size: 2,
                ..TrainConfig::default()
            },
        )
        .unwrap();
        let after = net.evaluate(&data).unwrap();
        assert!(after < before, "before={before} after={after}");
    }
}
