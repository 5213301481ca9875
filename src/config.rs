use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

/// Nested task configuration, loaded once per invocation. Field layout follows
/// the experiment configuration files consumed by the evaluation tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub cfg: RunSection,
    pub task_params: TaskParams,
    pub model: ModelSection,
    pub cell_line: CellLineSection,
}

impl TaskConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TaskConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    /// Fails fast on missing or invalid required fields, before any dataset
    /// scoping or training work happens.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        match self.cfg.experiment_name.as_deref() {
            None => errors.push("cfg.experiment_name is undefined".to_string()),
            Some(name) if name.trim().is_empty() => {
                errors.push("cfg.experiment_name must not be empty".to_string())
            }
            Some(_) => {}
        }

        if self.task_params.fold.is_none() {
            errors.push("task_params.fold is undefined".to_string());
        }

        if self.task_params.trainer.max_epochs == 0 {
            errors.push("task_params.trainer.max_epochs must be greater than 0".to_string());
        }

        if self.model.name.trim().is_empty() {
            errors.push("model.name must not be empty".to_string());
        }

        if self.model.batch_size == 0 {
            errors.push("model.batch_size must be greater than 0".to_string());
        }

        if self.model.learning_rate <= 0.0 {
            errors.push("model.learning_rate must be greater than 0".to_string());
        }

        if self.cell_line.exp_name.trim().is_empty() {
            errors.push("cell_line.exp_name must not be empty".to_string());
        }

        if !errors.is_empty() {
            return Err(TrainingError::Configuration(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.cfg.logs_root, base);
        absolutize_in_place(&mut self.task_params.train_dataset, base);
        absolutize_in_place(&mut self.task_params.val_dataset, base);
    }

    /// Collapses the validated configuration into the immutable per-run
    /// parameter aggregate the orchestrator is constructed with.
    pub fn training_run(&self) -> Result<TrainingRun, TrainingError> {
        self.validate()?;
        Ok(TrainingRun {
            experiment_name: self
                .cfg
                .experiment_name
                .clone()
                .unwrap_or_default(),
            fold: self.task_params.fold.unwrap_or_default(),
            batch_size: self.model.batch_size,
            learning_rate: self.model.learning_rate,
            max_epochs: self.task_params.trainer.max_epochs,
            use_map: self.model.use_map,
        })
    }

    /// Flat summary record for downstream evaluation consumers. The
    /// `checkpoint` key plus a known logs root is enough to locate the best
    /// checkpoint on disk.
    pub fn experiment_descriptor(&self) -> Result<ExperimentDescriptor, TrainingError> {
        self.validate()?;
        Ok(ExperimentDescriptor {
            checkpoint: self.cfg.experiment_name.clone().unwrap_or_default(),
            model: self.model.name.clone(),
            experiment: self.cfg.experiment_name.clone().unwrap_or_default(),
            cell_line: self.cell_line.exp_name.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(default = "default_logs_root")]
    pub logs_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default)]
    pub fold: Option<u32>,
    #[serde(default)]
    pub save_file: Option<String>,
    pub train_dataset: PathBuf,
    pub val_dataset: PathBuf,
    #[serde(default)]
    pub trainer: TrainerParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerParams {
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    pub name: String,
    #[serde(default)]
    pub use_map: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellLineSection {
    pub exp_name: String,
}

/// Immutable per-run parameters. Only the orchestrator's epoch counter and
/// best-metric bookkeeping change after construction.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub experiment_name: String,
    pub fold: u32,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub max_epochs: usize,
    pub use_map: bool,
}

/// Flat mapping emitted after training for evaluation collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    pub checkpoint: String,
    pub model: String,
    pub experiment: String,
    pub cell_line: String,
}

/// Fully resolved, flat run configuration: dot-separated keys mapped to
/// concrete string values with no interpolation left to do downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDescriptor {
    values: BTreeMap<String, String>,
}

impl RunDescriptor {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolves the nested configuration into a flat descriptor, expanding
/// `${section.key}` references to their concrete values. Unresolved or cyclic
/// references are rejected here rather than deferred to consumers.
pub fn assemble(config: &TaskConfig) -> Result<RunDescriptor, TrainingError> {
    let value = serde_json::to_value(config)?;
    let mut raw = BTreeMap::new();
    flatten("", &value, &mut raw);

    let keys: Vec<String> = raw.keys().cloned().collect();
    let mut resolved = BTreeMap::new();
    for key in &keys {
        let mut stack = Vec::new();
        resolve_key(key, &raw, &mut resolved, &mut stack)?;
    }

    Ok(RunDescriptor { values: resolved })
}

fn flatten(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}.{index}"), child, out);
            }
        }
        serde_json::Value::Null => {}
        serde_json::Value::String(text) => {
            out.insert(prefix.to_string(), text.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn resolve_key(
    key: &str,
    raw: &BTreeMap<String, String>,
    resolved: &mut BTreeMap<String, String>,
    stack: &mut Vec<String>,
) -> Result<String, TrainingError> {
    if let Some(value) = resolved.get(key) {
        return Ok(value.clone());
    }
    if stack.iter().any(|entry| entry == key) {
        return Err(TrainingError::configuration(format!(
            "cyclic interpolation involving '{key}'"
        )));
    }
    let Some(template) = raw.get(key) else {
        return Err(TrainingError::configuration(format!(
            "unresolved reference '${{{key}}}'"
        )));
    };

    stack.push(key.to_string());
    let mut out = String::new();
    let mut rest = template.as_str();
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(TrainingError::configuration(format!(
                "malformed interpolation in '{key}'"
            )));
        };
        let reference = &after[..end];
        let expansion = resolve_key(reference, raw, resolved, stack)?;
        out.push_str(&expansion);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    stack.pop();

    resolved.insert(key.to_string(), out.clone());
    Ok(out)
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_logs_root() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_epochs() -> usize {
    30
}

fn default_batch_size() -> usize {
    64
}

fn default_learning_rate() -> f64 {
    1e-3
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Configuration(Vec<String>),
    InvalidChromosome(String),
    CheckpointNotFound(PathBuf),
    CheckpointCorrupt(String),
    Runtime(String),
}

impl TrainingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(vec![message.into()])
    }

    pub fn invalid_chromosome(message: impl Into<String>) -> Self {
        Self::InvalidChromosome(message.into())
    }

    pub fn checkpoint_corrupt(message: impl Into<String>) -> Self {
        Self::CheckpointCorrupt(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "failed to read config: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Configuration(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::InvalidChromosome(msg) => write!(f, "unknown chromosome: {}", msg),
            TrainingError::CheckpointNotFound(path) => {
                write!(f, "checkpoint not found at {}", path.display())
            }
            TrainingError::CheckpointCorrupt(msg) => write!(f, "checkpoint is corrupt: {}", msg),
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}
