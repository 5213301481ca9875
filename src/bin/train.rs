use std::path::PathBuf;

use candle_core::Device;
use chromtrain::{
    assemble, Checkpointer, FoldSplitter, IntervalTable, LinearRegressor, Logger, LoggingSettings,
    MetricDirection, PoissonNllLoss, TaskConfig, Trainer, TrainingError,
};
use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("training failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fold-partitioned training CLI", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Path to task config file")]
    config: PathBuf,

    #[arg(long, help = "Override task_params.fold")]
    fold: Option<u32>,

    #[arg(long, help = "Override task_params.trainer.max_epochs")]
    epochs: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Override cfg.logs_root")]
    logs_root: Option<PathBuf>,

    #[arg(long, help = "Disable the TensorBoard event writer")]
    no_tensorboard: bool,
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();

    let mut config = TaskConfig::load(&args.config)?;
    if let Some(fold) = args.fold {
        config.task_params.fold = Some(fold);
    }
    if let Some(epochs) = args.epochs {
        config.task_params.trainer.max_epochs = epochs;
    }
    if let Some(logs_root) = args.logs_root {
        config.cfg.logs_root = logs_root;
    }
    config.validate()?;

    let run = config.training_run()?;
    let run_config = assemble(&config)?;

    let device = select_device();

    let split = FoldSplitter::autosomal().split(run.fold)?;
    println!(
        "fold {}: {} train / {} val / {} test chromosomes",
        run.fold,
        split.train.len(),
        split.val.len(),
        split.test.len()
    );

    let train_table = IntervalTable::from_path(&config.task_params.train_dataset)?;
    let val_table = IntervalTable::from_path(&config.task_params.val_dataset)?;
    let mut train_view = train_table.scoped(&split.train, &device, run.batch_size)?;
    let mut val_view = val_table.scoped(&split.val, &device, run.batch_size)?;
    println!(
        "scoped datasets ready ({} train / {} val intervals)",
        train_view.len(),
        val_view.len()
    );

    let experiment_dir = config.cfg.logs_root.join(&run.experiment_name);
    let logger = Logger::new(
        LoggingSettings::from_config(
            true,
            (!args.no_tensorboard).then(|| experiment_dir.join("tensorboard")),
            1,
        ),
        &run_config,
    )?;

    let mut checkpointer = Checkpointer::new(
        &config.cfg.logs_root,
        &run.experiment_name,
        MetricDirection::Minimize,
    );
    if let Some(save_file) = config.task_params.save_file.as_deref() {
        checkpointer = checkpointer.with_file_name(save_file);
    }

    let model = LinearRegressor::new(train_table.feature_dim(), &device)?;
    let criterion = PoissonNllLoss::new().with_map_mask(run.use_map);
    let mut trainer = Trainer::new(run.clone(), model, criterion, checkpointer, logger)?;

    let summary = trainer.fit(
        &mut train_view,
        &mut val_view,
        run.max_epochs,
        run.learning_rate,
    )?;
    if let (Some(metric), Some(epoch)) = (summary.best_metric, summary.best_epoch) {
        println!("best validation loss {:.4} at epoch {}", metric, epoch);
    }

    // Evaluation consumes the best checkpoint, not the last epoch's weights.
    println!(
        "loading best model weights from {}",
        trainer.checkpoint_path().display()
    );
    trainer.load_best_weights()?;

    let descriptor = config.experiment_descriptor()?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);

    Ok(())
}

fn select_device() -> Device {
    match Device::cuda_if_available(0) {
        Ok(device) => {
            if device.is_cuda() {
                println!("device: using CUDA GPU #0");
            } else {
                println!("device: using CPU");
            }
            device
        }
        Err(err) => {
            eprintln!("cuda reported available but initialization failed: {err}");
            Device::Cpu
        }
    }
}
