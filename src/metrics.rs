use std::time::Duration;

/// Example-weighted running mean of per-batch losses.
#[derive(Debug, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    examples: u64,
}

impl EpochAccumulator {
    pub fn update(&mut self, mean_loss: f32, examples: usize) {
        self.loss_sum += mean_loss as f64 * examples as f64;
        self.examples += examples as u64;
    }

    pub fn finalize(self) -> Option<ValidationSummary> {
        if self.examples == 0 {
            None
        } else {
            Some(ValidationSummary {
                mean_loss: self.loss_sum / self.examples as f64,
                examples: self.examples,
            })
        }
    }
}

/// Aggregate of one full pass: the criterion's mean over all examples seen.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub mean_loss: f64,
    pub examples: u64,
}

/// One structured per-epoch progress record.
#[derive(Debug, Clone)]
pub struct EpochSnapshot {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_metric: f64,
    pub val_examples: u64,
    pub duration: Duration,
}
