use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::TrainingError;

pub type Chromosome = u32;

/// Ordered set of chromosome identifiers. Ordering keeps scoped iteration
/// deterministic; membership is what matters for partitioning.
pub type ChromosomeSet = BTreeSet<Chromosome>;

/// Result alias for data pipeline fallible operations.
pub type Result<T> = std::result::Result<T, TrainingError>;

/// One genomic interval with its feature vector and measured signal count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalExample {
    pub chrom: Chromosome,
    pub start: u64,
    pub end: u64,
    pub features: Vec<f32>,
    pub target: f32,
    #[serde(default = "default_mappable")]
    pub mappable: bool,
}

/// Batch surfaced to the orchestrator: `inputs` is `[batch, features]`,
/// `targets` is `[batch]`. `map_mask` is present only when the batch contains
/// unmappable intervals; it weights each example 1.0 (mapped) or 0.0.
#[derive(Debug)]
pub struct IntervalBatch {
    pub inputs: Tensor,
    pub targets: Tensor,
    pub map_mask: Option<Tensor>,
    pub examples: usize,
}

/// Lazy, restartable batch producer. `reset` rewinds to the first batch with
/// no residual state, so every epoch re-iterates from the start.
pub trait BatchSource {
    fn reset(&mut self) -> Result<()>;
    fn next_batch(&mut self) -> Result<Option<IntervalBatch>>;
}

/// Per-chromosome interval store. The on-disk format is a consumed contract:
/// a JSON array of examples, materialized fully at load time.
#[derive(Debug, Clone)]
pub struct IntervalTable {
    by_chrom: BTreeMap<Chromosome, Vec<IntervalExample>>,
    feature_dim: usize,
}

impl IntervalTable {
    pub fn from_examples(examples: Vec<IntervalExample>) -> Result<Self> {
        let Some(first) = examples.first() else {
            return Err(TrainingError::runtime(
                "interval table requires at least one example",
            ));
        };
        let feature_dim = first.features.len();
        if feature_dim == 0 {
            return Err(TrainingError::runtime(
                "interval examples must carry at least one feature",
            ));
        }

        let mut by_chrom: BTreeMap<Chromosome, Vec<IntervalExample>> = BTreeMap::new();
        for example in examples {
            if example.features.len() != feature_dim {
                return Err(TrainingError::runtime(format!(
                    "inconsistent feature width: expected {}, found {} on chromosome {}",
                    feature_dim,
                    example.features.len(),
                    example.chrom
                )));
            }
            if !example.target.is_finite() || example.target < 0.0 {
                return Err(TrainingError::runtime(format!(
                    "interval target must be a non-negative count (chromosome {}, start {})",
                    example.chrom, example.start
                )));
            }
            by_chrom.entry(example.chrom).or_default().push(example);
        }

        for intervals in by_chrom.values_mut() {
            intervals.sort_by_key(|example| (example.start, example.end));
        }

        Ok(Self {
            by_chrom,
            feature_dim,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let examples: Vec<IntervalExample> = serde_json::from_str(&contents)?;
        Self::from_examples(examples)
    }

    pub fn chromosomes(&self) -> ChromosomeSet {
        self.by_chrom.keys().copied().collect()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn len(&self) -> usize {
        self.by_chrom.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_chrom.is_empty()
    }

    /// Returns a new view restricted to `chroms` instead of mutating shared
    /// state. Any identifier outside this table's universe is rejected here,
    /// before an epoch is wasted on it.
    pub fn scoped(
        &self,
        chroms: &ChromosomeSet,
        device: &Device,
        batch_size: usize,
    ) -> Result<ScopedIntervals> {
        if batch_size == 0 {
            return Err(TrainingError::configuration(
                "batch size must be greater than zero",
            ));
        }

        let known = self.chromosomes();
        let unknown: Vec<String> = chroms
            .iter()
            .filter(|chrom| !known.contains(chrom))
            .map(|chrom| chrom.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(TrainingError::invalid_chromosome(unknown.join(", ")));
        }

        let mut examples = Vec::new();
        for chrom in chroms {
            if let Some(intervals) = self.by_chrom.get(chrom) {
                examples.extend(intervals.iter().cloned());
            }
        }

        Ok(ScopedIntervals {
            examples,
            feature_dim: self.feature_dim,
            device: device.clone(),
            batch_size,
            cursor: 0,
        })
    }
}

/// Scoped view over one chromosome partition. Iterates in
/// chromosome-then-position order; no shuffling is applied.
#[derive(Debug)]
pub struct ScopedIntervals {
    examples: Vec<IntervalExample>,
    feature_dim: usize,
    device: Device,
    batch_size: usize,
    cursor: usize,
}

impl ScopedIntervals {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

impl BatchSource for ScopedIntervals {
    fn reset(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<IntervalBatch>> {
        if self.cursor >= self.examples.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.batch_size).min(self.examples.len());
        let slice = &self.examples[self.cursor..end];
        self.cursor = end;

        let rows = slice.len();
        let mut inputs = Vec::with_capacity(rows * self.feature_dim);
        let mut targets = Vec::with_capacity(rows);
        let mut mask = Vec::with_capacity(rows);
        let mut any_unmapped = false;
        for example in slice {
            inputs.extend_from_slice(&example.features);
            targets.push(example.target);
            mask.push(if example.mappable { 1.0f32 } else { 0.0 });
            any_unmapped |= !example.mappable;
        }

        let inputs = Tensor::from_vec(inputs, (rows, self.feature_dim), &self.device)
            .map_err(to_runtime_error)?;
        let targets = Tensor::from_vec(targets, rows, &self.device).map_err(to_runtime_error)?;
        let map_mask = if any_unmapped {
            Some(Tensor::from_vec(mask, rows, &self.device).map_err(to_runtime_error)?)
        } else {
            None
        };

        Ok(Some(IntervalBatch {
            inputs,
            targets,
            map_mask,
            examples: rows,
        }))
    }
}

fn default_mappable() -> bool {
    true
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(format!("failed to materialize interval batch: {err}"))
}
