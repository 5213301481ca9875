pub mod checkpoint;
pub mod config;
pub mod data;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod splits;
pub mod trainer;

pub use checkpoint::{Checkpointer, MetricDirection, CHECKPOINT_FILENAME};
pub use config::{
    assemble, ExperimentDescriptor, RunDescriptor, TaskConfig, TrainingError, TrainingRun,
};
pub use data::{
    BatchSource, Chromosome, ChromosomeSet, IntervalBatch, IntervalExample, IntervalTable,
    ScopedIntervals,
};
pub use logging::{Logger, LoggingSettings};
pub use metrics::{EpochSnapshot, ValidationSummary};
pub use model::{Criterion, LinearRegressor, LossMetrics, LossOutput, PoissonNllLoss, RegressionModel};
pub use splits::{ChromosomeSplit, FoldSplitter};
pub use trainer::{FitSummary, RunState, Trainer};
