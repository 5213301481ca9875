use crate::{config::TrainingError, data::ChromosomeSet};

/// Autosomes 1..=22, the chromosome universe the fold tables are defined over.
pub const AUTOSOME_COUNT: u32 = 22;

/// Each fold holds out one contiguous block of this many chromosomes.
const HOLDOUT_BLOCK: u32 = 4;

/// One disjoint train/validation/test partition of the chromosome universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeSplit {
    pub train: ChromosomeSet,
    pub val: ChromosomeSet,
    pub test: ChromosomeSet,
}

/// Maps a fold index to a fixed chromosome partition. Pure: repeated calls
/// with the same fold always return the same sets.
#[derive(Debug, Clone)]
pub struct FoldSplitter {
    universe: ChromosomeSet,
}

impl FoldSplitter {
    /// Splitter over the canonical autosomal universe.
    pub fn autosomal() -> Self {
        Self {
            universe: (1..=AUTOSOME_COUNT).collect(),
        }
    }

    pub fn universe(&self) -> &ChromosomeSet {
        &self.universe
    }

    /// Number of recognized fold indices (0-based).
    pub fn fold_count(&self) -> u32 {
        (AUTOSOME_COUNT - 2) / HOLDOUT_BLOCK
    }

    /// Fold `k` holds out the block {19-4k .. 22-4k}: the lower two
    /// chromosomes validate, the upper two test, everything else trains.
    /// Fold 0 therefore gives train = {1..18}, val = {19, 20}, test = {21, 22}.
    pub fn split(&self, fold: u32) -> Result<ChromosomeSplit, TrainingError> {
        if fold >= self.fold_count() {
            return Err(TrainingError::configuration(format!(
                "unknown training fold {} (recognized folds: 0..{})",
                fold,
                self.fold_count()
            )));
        }

        let offset = HOLDOUT_BLOCK * fold;
        let val: ChromosomeSet = [19 - offset, 20 - offset].into_iter().collect();
        let test: ChromosomeSet = [21 - offset, 22 - offset].into_iter().collect();
        let train: ChromosomeSet = self
            .universe
            .iter()
            .copied()
            .filter(|chrom| !val.contains(chrom) && !test.contains(chrom))
            .collect();

        Ok(ChromosomeSplit { train, val, test })
    }
}

impl Default for FoldSplitter {
    fn default() -> Self {
        Self::autosomal()
    }
}
