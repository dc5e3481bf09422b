//! Mini-batch training loop with validation split, early stopping,
//! plateau learning-rate decay and checkpointing.

use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::{PersistenceError, TrainingError};
use crate::loss::{LossFunction, MSELoss};
use crate::models::regressor::{RegressorGradients, SequenceRegressor};
use crate::optimizers::{Adam, Optimizer};
use crate::schedulers::ReduceLROnPlateau;
use crate::windowing::SupervisedSet;

/// Which loss early stopping watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStoppingMetric {
    ValidationLoss,
    TrainLoss,
}

/// Configuration for early stopping
#[derive(Debug, Clone)]
pub struct EarlyStoppingConfig {
    /// Epochs without improvement before stopping
    pub patience: usize,
    /// Minimum decrease that counts as an improvement
    pub min_delta: f64,
    pub restore_best_weights: bool,
    pub monitor: EarlyStoppingMetric,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        EarlyStoppingConfig {
            patience: 20,
            min_delta: 0.0,
            restore_best_weights: true,
            monitor: EarlyStoppingMetric::ValidationLoss,
        }
    }
}

/// Reduce-on-plateau settings, always monitoring the same loss as the
/// checkpoint (validation when available)
#[derive(Debug, Clone)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        PlateauConfig {
            factor: 0.5,
            patience: 10,
            min_lr: 1e-5,
        }
    }
}

/// Configuration for training hyperparameters
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the pairs held out for validation
    pub validation_split: f64,
    pub shuffle: bool,
    pub seed: u64,
    pub print_every: usize,
    pub clip_gradient: Option<f64>,
    pub log_lr_changes: bool,
    pub early_stopping: Option<EarlyStoppingConfig>,
    pub lr_plateau: Option<PlateauConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 200,
            batch_size: 32,
            validation_split: 0.15,
            shuffle: true,
            seed: 42,
            print_every: 10,
            clip_gradient: Some(5.0),
            log_lr_changes: true,
            early_stopping: Some(EarlyStoppingConfig::default()),
            lr_plateau: Some(PlateauConfig::default()),
        }
    }
}

/// Training metrics tracked during training
#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub time_elapsed: f64,
    pub learning_rate: f64,
}

impl TrainingMetrics {
    /// Validation loss when present, training loss otherwise
    pub fn monitored_loss(&self) -> f64 {
        self.validation_loss.unwrap_or(self.train_loss)
    }
}

/// Tracks the monitored loss and keeps a copy of the best weights
pub struct EarlyStopper {
    config: EarlyStoppingConfig,
    best_score: f64,
    wait: usize,
    best_epoch: Option<usize>,
    stopped_epoch: Option<usize>,
    best_weights: Option<SequenceRegressor>,
}

impl EarlyStopper {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        EarlyStopper {
            config,
            best_score: f64::INFINITY,
            wait: 0,
            best_epoch: None,
            stopped_epoch: None,
            best_weights: None,
        }
    }

    /// Returns `(should_stop, is_best)` for this epoch's metrics.
    pub fn should_stop(&mut self, metrics: &TrainingMetrics, model: &SequenceRegressor) -> (bool, bool) {
        let score = match self.config.monitor {
            EarlyStoppingMetric::ValidationLoss => metrics.monitored_loss(),
            EarlyStoppingMetric::TrainLoss => metrics.train_loss,
        };

        if score < self.best_score - self.config.min_delta {
            self.best_score = score;
            self.best_epoch = Some(metrics.epoch);
            self.wait = 0;
            if self.config.restore_best_weights {
                self.best_weights = Some(model.clone());
            }
            return (false, true);
        }

        self.wait += 1;
        if self.wait >= self.config.patience {
            self.stopped_epoch = Some(metrics.epoch);
            return (true, false);
        }
        (false, false)
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn take_best_weights(&mut self) -> Option<SequenceRegressor> {
        self.best_weights.take()
    }
}

/// Receives the model whenever the monitored loss reaches a new minimum
pub trait CheckpointSink {
    fn save_best(&mut self, model: &SequenceRegressor, metrics: &TrainingMetrics) -> Result<(), PersistenceError>;
}

/// Sink that discards checkpoints
pub struct NoCheckpoint;

impl CheckpointSink for NoCheckpoint {
    fn save_best(&mut self, _model: &SequenceRegressor, _metrics: &TrainingMetrics) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Mini-batch trainer for the sequence regressor
pub struct RegressorTrainer<L: LossFunction, O: Optimizer> {
    pub model: SequenceRegressor,
    pub loss_function: L,
    pub optimizer: O,
    pub config: TrainingConfig,
    pub metrics_history: Vec<TrainingMetrics>,
    best_epoch: Option<usize>,
    stopped_epoch: Option<usize>,
    restored_epoch: Option<usize>,
}

impl<L: LossFunction, O: Optimizer> RegressorTrainer<L, O> {
    pub fn new(model: SequenceRegressor, loss_function: L, optimizer: O) -> Self {
        RegressorTrainer {
            model,
            loss_function,
            optimizer,
            config: TrainingConfig::default(),
            metrics_history: Vec::new(),
            best_epoch: None,
            stopped_epoch: None,
            restored_epoch: None,
        }
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    /// One optimizer step on a batch; returns the batch loss before the update
    pub fn train_batch(&mut self, batch: &SupervisedSet) -> f64 {
        let targets = batch.targets.clone().insert_axis(Axis(0));
        let (output, cache) = self.model.forward_with_cache(batch.inputs.view());

        let (loss, d_output) = self.loss_function.loss_and_gradient(&output, &targets);
        let mut gradients = self.model.backward(&d_output, &cache);

        if let Some(clip_value) = self.config.clip_gradient {
            clip_gradients(&mut gradients, clip_value);
        }

        self.model.update_parameters(&gradients, &mut self.optimizer);
        loss
    }

    /// Splits off the trailing validation fraction, then trains
    pub fn train(&mut self, data: &SupervisedSet, checkpoint: &mut dyn CheckpointSink) -> Result<(), TrainingError> {
        let (train, validation) = data.split_validation(self.config.validation_split);
        let validation = if validation.is_empty() { None } else { Some(&validation) };
        self.fit(&train, validation, checkpoint)
    }

    /// Train for up to `config.epochs` epochs with optional validation data
    pub fn fit(
        &mut self,
        train: &SupervisedSet,
        validation: Option<&SupervisedSet>,
        checkpoint: &mut dyn CheckpointSink,
    ) -> Result<(), TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        if self.config.batch_size == 0 {
            return Err(TrainingError::InvalidBatchSize);
        }
        self.restored_epoch = None;

        info!(
            epochs = self.config.epochs,
            train_samples = train.len(),
            validation_samples = validation.map_or(0, |v| v.len()),
            batch_size = self.config.batch_size,
            "starting training"
        );

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut indices: Vec<usize> = (0..train.len()).collect();
        let mut stopper = self.config.early_stopping.clone().map(EarlyStopper::new);
        let mut plateau = self
            .config
            .lr_plateau
            .as_ref()
            .map(|p| ReduceLROnPlateau::with_params(p.factor, p.patience, 1e-4, 0, p.min_lr));
        let base_lr = self.optimizer.learning_rate();
        let mut best_checkpoint_loss = f64::INFINITY;

        for epoch in 0..self.config.epochs {
            let start_time = Instant::now();
            if self.config.shuffle {
                indices.shuffle(&mut rng);
            }

            let mut epoch_loss = 0.0;
            for chunk in indices.chunks(self.config.batch_size) {
                let batch = train.select(chunk);
                epoch_loss += self.train_batch(&batch) * chunk.len() as f64;
            }
            epoch_loss /= train.len() as f64;

            let validation_loss = validation.map(|v| self.evaluate(v));
            let metrics = TrainingMetrics {
                epoch,
                train_loss: epoch_loss,
                validation_loss,
                time_elapsed: start_time.elapsed().as_secs_f64(),
                learning_rate: self.optimizer.learning_rate(),
            };
            self.metrics_history.push(metrics.clone());

            if self.config.print_every > 0 && epoch % self.config.print_every == 0 {
                match validation_loss {
                    Some(val_loss) => info!(
                        epoch,
                        train_loss = epoch_loss,
                        val_loss,
                        lr = metrics.learning_rate,
                        elapsed = metrics.time_elapsed,
                        "epoch complete"
                    ),
                    None => info!(
                        epoch,
                        train_loss = epoch_loss,
                        lr = metrics.learning_rate,
                        elapsed = metrics.time_elapsed,
                        "epoch complete"
                    ),
                }
            }

            let monitored = metrics.monitored_loss();
            if monitored < best_checkpoint_loss {
                best_checkpoint_loss = monitored;
                self.best_epoch = Some(epoch);
                checkpoint.save_best(&self.model, &metrics)?;
                debug!(epoch, loss = monitored, "new best checkpoint");
            }

            if let Some(scheduler) = plateau.as_mut() {
                let old_lr = self.optimizer.learning_rate();
                let new_lr = scheduler.step(monitored, base_lr);
                if self.config.log_lr_changes && (new_lr - old_lr).abs() > f64::EPSILON {
                    info!(epoch, old_lr, new_lr, "learning rate changed");
                }
                self.optimizer.set_learning_rate(new_lr);
            }

            if let Some(stopper) = stopper.as_mut() {
                let (should_stop, _) = stopper.should_stop(&metrics, &self.model);
                if should_stop {
                    self.stopped_epoch = Some(epoch);
                    info!(epoch, best_epoch = ?stopper.best_epoch(), "early stopping");
                    break;
                }
            }
        }

        if let Some(stopper) = stopper.as_mut() {
            if let Some(best) = stopper.take_best_weights() {
                info!(best_epoch = ?stopper.best_epoch(), "restoring best weights");
                self.model = best;
                self.restored_epoch = stopper.best_epoch();
            }
        }

        info!(epochs_run = self.metrics_history.len(), "training completed");
        Ok(())
    }

    /// Mean loss over `data`, evaluated in batches
    pub fn evaluate(&self, data: &SupervisedSet) -> f64 {
        if data.is_empty() {
            return 0.0;
        }

        let batch_size = self.config.batch_size.max(1);
        let mut total_loss = 0.0;
        let indices: Vec<usize> = (0..data.len()).collect();
        for chunk in indices.chunks(batch_size) {
            let batch = data.select(chunk);
            let predictions = self.model.predict_batch(batch.inputs.view()).insert_axis(Axis(0));
            let targets = batch.targets.insert_axis(Axis(0));
            total_loss += self.loss_function.compute_loss(&predictions, &targets) * chunk.len() as f64;
        }
        total_loss / data.len() as f64
    }

    /// Predictions for every row of `inputs`
    pub fn predict(&self, inputs: ArrayView2<f64>) -> Array1<f64> {
        self.model.predict_batch(inputs)
    }

    pub fn get_latest_metrics(&self) -> Option<&TrainingMetrics> {
        self.metrics_history.last()
    }

    pub fn get_metrics_history(&self) -> &[TrainingMetrics] {
        &self.metrics_history
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Epoch whose weights were put back at the end of training
    pub fn restored_epoch(&self) -> Option<usize> {
        self.restored_epoch
    }

    /// Monitored loss of the weights the model holds now: the restored epoch
    /// when best weights were put back, otherwise the last epoch
    pub fn model_loss(&self) -> Option<f64> {
        let metrics = match self.restored_epoch {
            Some(epoch) => self.metrics_history.iter().rev().find(|m| m.epoch == epoch),
            None => self.metrics_history.last(),
        };
        metrics.map(TrainingMetrics::monitored_loss)
    }

    pub fn into_model(self) -> SequenceRegressor {
        self.model
    }
}

/// Clip each gradient matrix to a maximum L2 norm
fn clip_gradients(gradients: &mut RegressorGradients, max_norm: f64) {
    for matrix in gradients.matrices_mut() {
        clip_gradient_matrix(matrix, max_norm);
    }
}

fn clip_gradient_matrix(matrix: &mut Array2<f64>, max_norm: f64) {
    let norm = matrix.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        matrix.mapv_inplace(|x| x * scale);
    }
}

/// Create a trainer with Adam and MSE loss
pub fn create_adam_trainer(model: SequenceRegressor, learning_rate: f64) -> RegressorTrainer<MSELoss, Adam> {
    RegressorTrainer::new(model, MSELoss, Adam::new(learning_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windowing::make_supervised;

    fn small_model() -> SequenceRegressor {
        SequenceRegressor::with_rng(6, 1, 4, &mut StdRng::seed_from_u64(42))
    }

    fn metrics(epoch: usize, val: f64) -> TrainingMetrics {
        TrainingMetrics {
            epoch,
            train_loss: val,
            validation_loss: Some(val),
            time_elapsed: 0.0,
            learning_rate: 0.01,
        }
    }

    fn ramp_set() -> SupervisedSet {
        let series: Vec<f64> = (0..60).map(|i| 0.5 + 0.4 * (i as f64 * 0.3).sin()).collect();
        make_supervised(&series, 5).unwrap()
    }

    struct CountingSink {
        saves: Vec<usize>,
    }

    impl CheckpointSink for CountingSink {
        fn save_best(&mut self, _model: &SequenceRegressor, metrics: &TrainingMetrics) -> Result<(), PersistenceError> {
            self.saves.push(metrics.epoch);
            Ok(())
        }
    }

    #[test]
    fn test_early_stopper_min_delta() {
        let mut stopper = EarlyStopper::new(EarlyStoppingConfig {
            patience: 2,
            min_delta: 0.1,
            restore_best_weights: false,
            monitor: EarlyStoppingMetric::ValidationLoss,
        });
        let model = small_model();

        assert_eq!(stopper.should_stop(&metrics(0, 1.0), &model), (false, true));
        assert_eq!(stopper.should_stop(&metrics(1, 0.95), &model), (false, false));
        assert_eq!(stopper.should_stop(&metrics(2, 0.9), &model), (true, false));
        assert_eq!(stopper.stopped_epoch(), Some(2));
        assert_eq!(stopper.best_score(), 1.0);
    }

    #[test]
    fn test_early_stopper_keeps_best_weights() {
        let mut stopper = EarlyStopper::new(EarlyStoppingConfig {
            patience: 3,
            ..EarlyStoppingConfig::default()
        });
        let model = small_model();
        stopper.should_stop(&metrics(0, 0.5), &model);
        assert!(stopper.take_best_weights().is_some());
        assert!(stopper.take_best_weights().is_none());
    }

    #[test]
    fn test_training_reduces_loss() {
        let data = ramp_set();
        let config = TrainingConfig {
            epochs: 30,
            batch_size: 8,
            early_stopping: None,
            lr_plateau: None,
            ..TrainingConfig::default()
        };
        let mut trainer = create_adam_trainer(small_model(), 0.01).with_config(config);

        let before = trainer.evaluate(&data);
        trainer.train(&data, &mut NoCheckpoint).unwrap();
        let after = trainer.evaluate(&data);

        assert!(after < before, "loss did not improve: {} -> {}", before, after);
        assert_eq!(trainer.get_metrics_history().len(), 30);
    }

    #[test]
    fn test_no_early_stopping_runs_all_epochs() {
        let config = TrainingConfig {
            epochs: 4,
            batch_size: 16,
            early_stopping: None,
            ..TrainingConfig::default()
        };
        let mut trainer = create_adam_trainer(small_model(), 0.001).with_config(config);
        trainer.train(&ramp_set(), &mut NoCheckpoint).unwrap();

        assert_eq!(trainer.get_latest_metrics().unwrap().epoch, 3);
        assert!(trainer.stopped_epoch().is_none());
    }

    #[test]
    fn test_checkpoint_called_on_improvement() {
        let config = TrainingConfig {
            epochs: 5,
            batch_size: 8,
            ..TrainingConfig::default()
        };
        let mut trainer = create_adam_trainer(small_model(), 0.01).with_config(config);
        let mut sink = CountingSink { saves: Vec::new() };
        trainer.train(&ramp_set(), &mut sink).unwrap();

        // The first epoch is always an improvement over infinity
        assert_eq!(sink.saves.first(), Some(&0));
        assert!(sink.saves.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(trainer.best_epoch(), sink.saves.last().copied());
    }

    #[test]
    fn test_model_loss_describes_restored_weights() {
        let data = ramp_set();
        let config = TrainingConfig {
            epochs: 10,
            batch_size: 8,
            early_stopping: Some(EarlyStoppingConfig {
                patience: 2,
                min_delta: 10.0,
                ..EarlyStoppingConfig::default()
            }),
            lr_plateau: None,
            ..TrainingConfig::default()
        };
        let mut trainer = create_adam_trainer(small_model(), 0.01).with_config(config);
        trainer.train(&data, &mut NoCheckpoint).unwrap();

        assert_eq!(trainer.stopped_epoch(), Some(2));
        assert_eq!(trainer.restored_epoch(), Some(0));
        let epoch0 = trainer.get_metrics_history()[0].monitored_loss();
        assert_eq!(trainer.model_loss(), Some(epoch0));

        // The held weights really are the epoch-0 ones
        let (_, holdout) = data.split_validation(0.15);
        assert_eq!(trainer.evaluate(&holdout), epoch0);
    }

    #[test]
    fn test_model_loss_without_restore_is_last_epoch() {
        let config = TrainingConfig {
            epochs: 3,
            batch_size: 8,
            early_stopping: None,
            ..TrainingConfig::default()
        };
        let mut trainer = create_adam_trainer(small_model(), 0.01).with_config(config);
        trainer.train(&ramp_set(), &mut NoCheckpoint).unwrap();

        assert_eq!(trainer.restored_epoch(), None);
        let last = trainer.get_latest_metrics().unwrap().monitored_loss();
        assert_eq!(trainer.model_loss(), Some(last));
    }

    #[test]
    fn test_invalid_inputs() {
        let mut trainer = create_adam_trainer(small_model(), 0.01).with_config(TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        });
        assert!(matches!(
            trainer.fit(&ramp_set(), None, &mut NoCheckpoint),
            Err(TrainingError::InvalidBatchSize)
        ));

        let empty = SupervisedSet {
            inputs: Array2::zeros((0, 5)),
            targets: Array1::zeros(0),
        };
        let mut trainer = create_adam_trainer(small_model(), 0.01);
        assert!(matches!(
            trainer.fit(&empty, None, &mut NoCheckpoint),
            Err(TrainingError::EmptyDataset)
        ));
    }

    #[test]
    fn test_gradient_clipping() {
        let mut matrix = Array2::from_elem((2, 2), 3.0);
        clip_gradient_matrix(&mut matrix, 1.0);
        let norm = matrix.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }
}
