use std::{path::Path, time::Instant};

use candle_core::Device;
use candle_nn::{Optimizer, SGD};

use crate::{
    checkpoint::{self, Checkpointer},
    config::{TrainingError, TrainingRun},
    data::BatchSource,
    logging::Logger,
    metrics::{EpochAccumulator, EpochSnapshot, ValidationSummary},
    model::{Criterion, RegressionModel},
    splits::FoldSplitter,
};

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Running,
    Completed,
    Failed,
    BestLoaded,
}

/// Outcome of a completed fit.
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub epochs_completed: usize,
    pub best_metric: Option<f64>,
    pub best_epoch: Option<usize>,
}

/// Drives the epoch loop: training pass, validation pass, checkpoint
/// decision, progress record. The model and criterion are opaque
/// collaborators behind their call contracts; datasets arrive already scoped
/// to their chromosome partitions.
pub struct Trainer<M, C>
where
    M: RegressionModel,
    C: Criterion,
{
    run: TrainingRun,
    model: M,
    criterion: C,
    checkpointer: Checkpointer,
    logger: Logger,
    state: RunState,
    epochs_completed: usize,
}

impl<M, C> Trainer<M, C>
where
    M: RegressionModel,
    C: Criterion,
{
    /// Validates the immutable run parameters eagerly; a rejected
    /// configuration causes no side effects.
    pub fn new(
        run: TrainingRun,
        model: M,
        criterion: C,
        checkpointer: Checkpointer,
        logger: Logger,
    ) -> Result<Self, TrainingError> {
        let mut errors = Vec::new();
        if run.experiment_name.trim().is_empty() {
            errors.push("experiment name is undefined".to_string());
        }
        if run.batch_size == 0 {
            errors.push("batch size must be greater than zero".to_string());
        }
        if run.max_epochs == 0 {
            errors.push("epoch count must be greater than zero".to_string());
        }
        if !errors.is_empty() {
            return Err(TrainingError::Configuration(errors));
        }
        // Surfaces an unknown fold index before any dataset work.
        FoldSplitter::autosomal().split(run.fold)?;

        Ok(Self {
            run,
            model,
            criterion,
            checkpointer,
            logger,
            state: RunState::Configured,
            epochs_completed: 0,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&self) -> &TrainingRun {
        &self.run
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    pub fn checkpoint_path(&self) -> &Path {
        self.checkpointer.checkpoint_path()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs `nr_epochs` sequential epochs. Any error in a training or
    /// validation step propagates immediately and moves the run to `Failed`;
    /// the last successfully saved checkpoint stays intact because saves only
    /// happen after a fully completed epoch.
    pub fn fit<T, V>(
        &mut self,
        train: &mut T,
        val: &mut V,
        nr_epochs: usize,
        learning_rate: f64,
    ) -> Result<FitSummary, TrainingError>
    where
        T: BatchSource,
        V: BatchSource,
    {
        if nr_epochs == 0 {
            return Err(TrainingError::configuration(
                "nr_epochs must be greater than zero",
            ));
        }
        if learning_rate <= 0.0 {
            return Err(TrainingError::configuration(
                "learning rate must be greater than zero",
            ));
        }

        self.state = RunState::Running;
        let result = self.run_epochs(train, val, nr_epochs, learning_rate);
        self.state = match result {
            Ok(_) => RunState::Completed,
            Err(_) => RunState::Failed,
        };
        result
    }

    fn run_epochs<T, V>(
        &mut self,
        train: &mut T,
        val: &mut V,
        nr_epochs: usize,
        learning_rate: f64,
    ) -> Result<FitSummary, TrainingError>
    where
        T: BatchSource,
        V: BatchSource,
    {
        let parameters: Vec<_> = self
            .model
            .parameters()
            .into_iter()
            .map(|(_, var)| var)
            .collect();
        if parameters.is_empty() {
            return Err(TrainingError::runtime(
                "model produced no trainable parameters",
            ));
        }
        let mut optimizer = SGD::new(parameters, learning_rate).map_err(to_runtime_error)?;

        for epoch in 1..=nr_epochs {
            let started = Instant::now();

            let train_loss = self.train_epoch(train, &mut optimizer)?;
            let summary = self.validate_pass(val)?;
            let metric = summary.mean_loss;

            if self.checkpointer.is_best(metric) {
                self.checkpointer.save(&self.model, metric, epoch)?;
            }
            self.epochs_completed = epoch;

            self.logger.log_epoch(&EpochSnapshot {
                epoch,
                train_loss,
                val_metric: metric,
                val_examples: summary.examples,
                duration: started.elapsed(),
            });
        }

        self.logger.flush();
        Ok(FitSummary {
            epochs_completed: self.epochs_completed,
            best_metric: self.checkpointer.best_metric(),
            best_epoch: self.checkpointer.best_epoch(),
        })
    }

    /// One full pass over the training batches in the dataset's iteration
    /// order, with an optimizer step per batch.
    fn train_epoch<T>(&self, train: &mut T, optimizer: &mut SGD) -> Result<f64, TrainingError>
    where
        T: BatchSource,
    {
        train.reset()?;
        let mut accumulator = EpochAccumulator::default();

        while let Some(batch) = train.next_batch()? {
            let predictions = self.model.forward(&batch.inputs).map_err(to_runtime_error)?;
            let output =
                self.criterion
                    .compute(&predictions, &batch.targets, batch.map_mask.as_ref())?;
            optimizer
                .backward_step(&output.loss)
                .map_err(to_runtime_error)?;
            accumulator.update(output.metrics.mean_loss(), output.metrics.examples());
        }

        accumulator
            .finalize()
            .map(|summary| summary.mean_loss)
            .ok_or_else(|| TrainingError::runtime("training pass produced no batches"))
    }

    /// One full validation pass with no gradient updates, aggregating the
    /// criterion's example-weighted mean.
    fn validate_pass<V>(&self, val: &mut V) -> Result<ValidationSummary, TrainingError>
    where
        V: BatchSource,
    {
        val.reset()?;
        let mut accumulator = EpochAccumulator::default();

        while let Some(batch) = val.next_batch()? {
            let inputs = batch.inputs.detach();
            let predictions = self.model.forward(&inputs).map_err(to_runtime_error)?;
            let output =
                self.criterion
                    .compute(&predictions, &batch.targets, batch.map_mask.as_ref())?;
            accumulator.update(output.metrics.mean_loss(), output.metrics.examples());
        }

        accumulator
            .finalize()
            .ok_or_else(|| TrainingError::runtime("validation pass produced no examples"))
    }

    /// Restores the best checkpoint written by this run's experiment.
    /// A run that never wrote a checkpoint is a hard error, never a silent
    /// fallback to stale or default weights.
    pub fn load_best_weights(&mut self) -> Result<(), TrainingError> {
        let path = self.checkpointer.checkpoint_path().to_path_buf();
        self.load_weights(&path)
    }

    pub fn load_weights(&mut self, path: &Path) -> Result<(), TrainingError> {
        let device = self.parameter_device();
        checkpoint::apply_weights(&self.model, path, &device)?;
        self.state = RunState::BestLoaded;
        Ok(())
    }

    fn parameter_device(&self) -> Device {
        self.model
            .parameters()
            .first()
            .map(|(_, var)| var.device().clone())
            .unwrap_or(Device::Cpu)
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
