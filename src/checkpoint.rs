use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use candle_core::{safetensors::load as load_safetensors, Device, Tensor};

use crate::{config::TrainingError, model::RegressionModel};

/// Canonical file name for the single best checkpoint of a run.
pub const CHECKPOINT_FILENAME: &str = "checkpoint.safetensors";

/// Which way the monitored validation metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDirection {
    Minimize,
    Maximize,
}

/// Persists and restores model weights for one experiment, keeping exactly
/// one best-so-far checkpoint file (bounded disk use per run; no versioned
/// history).
#[derive(Debug)]
pub struct Checkpointer {
    path: PathBuf,
    direction: MetricDirection,
    best_metric: Option<f64>,
    best_epoch: Option<usize>,
}

impl Checkpointer {
    pub fn new(logs_root: &Path, experiment_name: &str, direction: MetricDirection) -> Self {
        Self {
            path: logs_root.join(experiment_name).join(CHECKPOINT_FILENAME),
            direction,
            best_metric: None,
            best_epoch: None,
        }
    }

    /// Overrides the canonical file name, keeping the per-experiment layout.
    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.path = self
            .path
            .parent()
            .map(|dir| dir.join(file_name))
            .unwrap_or_else(|| PathBuf::from(file_name));
        self
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.path
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.best_metric
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Strict improvement over the best metric recorded so far. Ties never
    /// count as improvement, so an equal-scoring epoch cannot churn the
    /// checkpoint; non-finite metrics are never best.
    pub fn is_best(&self, metric: f64) -> bool {
        if !metric.is_finite() {
            return false;
        }
        match self.best_metric {
            None => true,
            Some(best) => match self.direction {
                MetricDirection::Minimize => metric < best,
                MetricDirection::Maximize => metric > best,
            },
        }
    }

    /// Serializes the model parameters and atomically replaces the canonical
    /// checkpoint: the blob is written to a sibling temp file and renamed, so
    /// a reader never observes a partial file.
    pub fn save<M: RegressionModel>(
        &mut self,
        model: &M,
        metric: f64,
        epoch: usize,
    ) -> Result<(), TrainingError> {
        let named_parameters = model.parameters();
        if named_parameters.is_empty() {
            return Err(TrainingError::runtime(
                "model contains no parameters to checkpoint",
            ));
        }

        let Some(dir) = self.path.parent() else {
            return Err(TrainingError::runtime(format!(
                "checkpoint path {} has no parent directory",
                self.path.display()
            )));
        };
        fs::create_dir_all(dir).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create checkpoint directory {}: {err}",
                dir.display()
            ))
        })?;

        let mut tensors = HashMap::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            tensors.insert(name, var.as_tensor().clone());
        }

        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TrainingError::runtime(format!(
                    "checkpoint file name is not valid UTF-8: {}",
                    self.path.display()
                ))
            })?;
        let staging = dir.join(format!("{file_name}.tmp"));

        candle_core::safetensors::save(&tensors, &staging).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to serialize model weights to {}: {err}",
                staging.display()
            ))
        })?;
        fs::rename(&staging, &self.path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to replace checkpoint {}: {err}",
                self.path.display()
            ))
        })?;

        self.best_metric = Some(metric);
        self.best_epoch = Some(epoch);
        Ok(())
    }
}

/// Reads a checkpoint blob. A missing file and an undecodable file are
/// distinct failures; neither is silently substituted with a default model.
pub fn load(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>, TrainingError> {
    if !path.is_file() {
        return Err(TrainingError::CheckpointNotFound(path.to_path_buf()));
    }
    load_safetensors(path, device).map_err(|err| {
        TrainingError::checkpoint_corrupt(format!(
            "failed to deserialize {}: {err}",
            path.display()
        ))
    })
}

/// Restores persisted weights into the model's parameters. The persisted
/// state must cover every model parameter exactly; missing or surplus
/// tensors mean the checkpoint does not match the expected shape.
pub fn apply_weights<M: RegressionModel>(
    model: &M,
    path: &Path,
    device: &Device,
) -> Result<(), TrainingError> {
    let mut tensors = load(path, device)?;

    for (name, var) in model.parameters() {
        let tensor = tensors.remove(&name).ok_or_else(|| {
            TrainingError::checkpoint_corrupt(format!("checkpoint missing parameter {name}"))
        })?;
        let desired_dtype = var.as_tensor().dtype();
        let tensor = if tensor.dtype() == desired_dtype {
            tensor
        } else {
            tensor.to_dtype(desired_dtype).map_err(|err| {
                TrainingError::checkpoint_corrupt(format!(
                    "parameter {name} has incompatible dtype: {err}"
                ))
            })?
        };
        var.set(&tensor).map_err(|err| {
            TrainingError::checkpoint_corrupt(format!(
                "parameter {name} does not fit the model: {err}"
            ))
        })?;
    }

    if !tensors.is_empty() {
        let extra = tensors.keys().cloned().collect::<Vec<_>>().join(", ");
        return Err(TrainingError::checkpoint_corrupt(format!(
            "checkpoint contains unused parameters: {extra}"
        )));
    }

    Ok(())
}
