use std::fs;

use candle_core::Device;
use chromtrain::{
    Checkpointer, ChromosomeSet, FoldSplitter, IntervalExample, IntervalTable, LinearRegressor,
    Logger, LoggingSettings, MetricDirection, PoissonNllLoss, RunDescriptor, RunState, Trainer,
    TrainingError, TrainingRun, CHECKPOINT_FILENAME,
};
use tempfile::tempdir;

fn synthetic_table() -> IntervalTable {
    let mut examples = Vec::new();
    for chrom in 1..=22u32 {
        for i in 0..6u64 {
            let x = i as f32 / 6.0;
            examples.push(IntervalExample {
                chrom,
                start: i * 1_000,
                end: (i + 1) * 1_000,
                features: vec![x, 1.0 - x],
                target: (chrom % 3 + (i as u32) % 2) as f32,
                mappable: i != 5,
            });
        }
    }
    IntervalTable::from_examples(examples).unwrap()
}

fn run_settings(experiment_name: &str) -> TrainingRun {
    TrainingRun {
        experiment_name: experiment_name.to_string(),
        fold: 0,
        batch_size: 8,
        learning_rate: 1e-2,
        max_epochs: 1,
        use_map: false,
    }
}

fn quiet_logger() -> Logger {
    Logger::new(
        LoggingSettings::from_config(false, None, 1),
        &RunDescriptor::default(),
    )
    .unwrap()
}

#[test]
fn single_epoch_run_writes_one_best_checkpoint() {
    let tmp = tempdir().unwrap();
    let device = Device::Cpu;
    let table = synthetic_table();

    let split = FoldSplitter::autosomal().split(0).unwrap();
    let mut train_view = table.scoped(&split.train, &device, 8).unwrap();
    let mut val_view = table.scoped(&split.val, &device, 8).unwrap();
    assert_eq!(train_view.len(), 18 * 6);
    assert_eq!(val_view.len(), 2 * 6);

    let tensorboard_dir = tmp.path().join("fit-smoke").join("tensorboard");
    let logger = Logger::new(
        LoggingSettings::from_config(false, Some(tensorboard_dir.clone()), 1),
        &RunDescriptor::default(),
    )
    .unwrap();
    let checkpointer = Checkpointer::new(tmp.path(), "fit-smoke", MetricDirection::Minimize);
    let model = LinearRegressor::new(table.feature_dim(), &device).unwrap();
    let mut trainer = Trainer::new(
        run_settings("fit-smoke"),
        model,
        PoissonNllLoss::new(),
        checkpointer,
        logger,
    )
    .unwrap();
    assert_eq!(trainer.state(), RunState::Configured);

    // No epoch has completed, so there is no best checkpoint to reload.
    let err = trainer.load_best_weights().unwrap_err();
    assert!(matches!(err, TrainingError::CheckpointNotFound(_)));
    assert_eq!(trainer.state(), RunState::Configured);

    let summary = trainer.fit(&mut train_view, &mut val_view, 1, 1e-2).unwrap();
    assert_eq!(trainer.state(), RunState::Completed);
    assert_eq!(summary.epochs_completed, 1);
    assert_eq!(summary.best_epoch, Some(1));
    let metric = summary.best_metric.unwrap();
    assert!(metric.is_finite());
    assert!(metric >= 0.0, "poisson validation metric went negative");

    let checkpoint_path = tmp.path().join("fit-smoke").join(CHECKPOINT_FILENAME);
    assert!(checkpoint_path.is_file(), "no best checkpoint written");

    // One epoch produced one progress record in the event file.
    let event_bytes: u64 = fs::read_dir(&tensorboard_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.metadata().map(|meta| meta.len()).unwrap_or(0))
        .sum();
    assert!(event_bytes > 0, "no progress records logged");

    trainer.load_best_weights().unwrap();
    assert_eq!(trainer.state(), RunState::BestLoaded);
}

#[test]
fn later_epochs_cannot_regress_the_best_metric() {
    let tmp = tempdir().unwrap();
    let device = Device::Cpu;
    let table = synthetic_table();

    let split = FoldSplitter::autosomal().split(0).unwrap();
    let mut train_view = table.scoped(&split.train, &device, 8).unwrap();
    let mut val_view = table.scoped(&split.val, &device, 8).unwrap();

    let checkpointer = Checkpointer::new(tmp.path(), "multi-epoch", MetricDirection::Minimize);
    let model = LinearRegressor::new(table.feature_dim(), &device).unwrap();
    let mut trainer = Trainer::new(
        run_settings("multi-epoch"),
        model,
        PoissonNllLoss::new(),
        checkpointer,
        quiet_logger(),
    )
    .unwrap();

    let first = trainer.fit(&mut train_view, &mut val_view, 1, 1e-2).unwrap();
    let first_best = first.best_metric.unwrap();

    let second = trainer.fit(&mut train_view, &mut val_view, 3, 1e-2).unwrap();
    let second_best = second.best_metric.unwrap();
    assert!(
        second_best <= first_best,
        "best metric regressed from {first_best} to {second_best}"
    );
    assert_eq!(second.epochs_completed, 3);
}

#[test]
fn a_failing_validation_pass_moves_the_run_to_failed() {
    let tmp = tempdir().unwrap();
    let device = Device::Cpu;
    let table = synthetic_table();

    let split = FoldSplitter::autosomal().split(0).unwrap();
    let mut train_view = table.scoped(&split.train, &device, 8).unwrap();
    // An empty scope yields no validation examples, which is a hard error.
    let mut empty_view = table.scoped(&ChromosomeSet::new(), &device, 8).unwrap();

    let checkpointer = Checkpointer::new(tmp.path(), "failing", MetricDirection::Minimize);
    let model = LinearRegressor::new(table.feature_dim(), &device).unwrap();
    let mut trainer = Trainer::new(
        run_settings("failing"),
        model,
        PoissonNllLoss::new(),
        checkpointer,
        quiet_logger(),
    )
    .unwrap();

    let err = trainer
        .fit(&mut train_view, &mut empty_view, 1, 1e-2)
        .unwrap_err();
    assert!(matches!(err, TrainingError::Runtime(_)));
    assert_eq!(trainer.state(), RunState::Failed);

    // The failed epoch never reached the checkpoint decision.
    let checkpoint_path = tmp.path().join("failing").join(CHECKPOINT_FILENAME);
    assert!(!checkpoint_path.exists());
}

#[test]
fn invalid_run_parameters_are_rejected_at_construction() {
    let tmp = tempdir().unwrap();
    let device = Device::Cpu;

    let mut run = run_settings("rejected");
    run.batch_size = 0;
    let err = Trainer::new(
        run,
        LinearRegressor::new(2, &device).unwrap(),
        PoissonNllLoss::new(),
        Checkpointer::new(tmp.path(), "rejected", MetricDirection::Minimize),
        quiet_logger(),
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err, TrainingError::Configuration(_)));

    let mut run = run_settings("rejected");
    run.fold = 99;
    let err = Trainer::new(
        run,
        LinearRegressor::new(2, &device).unwrap(),
        PoissonNllLoss::new(),
        Checkpointer::new(tmp.path(), "rejected", MetricDirection::Minimize),
        quiet_logger(),
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err, TrainingError::Configuration(_)));

    // A rejected configuration leaves no artifacts behind.
    assert!(!tmp.path().join("rejected").exists());
}

#[test]
fn scoping_to_an_unknown_chromosome_fails_fast() {
    let table = synthetic_table();
    let mut chroms = ChromosomeSet::new();
    chroms.insert(40);
    let err = table.scoped(&chroms, &Device::Cpu, 8).unwrap_err();
    assert!(matches!(err, TrainingError::InvalidChromosome(_)));
}
