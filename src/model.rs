use candle_core::{DType, Device, Tensor, Var};

use crate::config::TrainingError;

/// Call contract the orchestrator drives models through. Implementations are
/// opaque, swappable units: `forward` maps a `[batch, features]` tensor to a
/// `[batch]` tensor of non-negative predicted rates.
pub trait RegressionModel {
    fn forward(&self, inputs: &Tensor) -> candle_core::Result<Tensor>;
    fn parameters(&self) -> Vec<(String, Var)>;
}

/// Scalar loss and criterion contract. `map_mask`, when honored, weights each
/// example 1.0 or 0.0.
pub trait Criterion {
    fn compute(
        &self,
        predictions: &Tensor,
        targets: &Tensor,
        map_mask: Option<&Tensor>,
    ) -> Result<LossOutput, TrainingError>;
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone)]
pub struct LossMetrics {
    mean_loss: f32,
    examples: usize,
}

impl LossMetrics {
    pub fn mean_loss(&self) -> f32 {
        self.mean_loss
    }

    pub fn examples(&self) -> usize {
        self.examples
    }
}

/// Poisson negative log-likelihood over predicted rates. Includes the
/// `t·ln t − t` normalizing term, so the per-example loss is bounded below by
/// zero; the mean validation metric is therefore never negative.
#[derive(Debug, Clone)]
pub struct PoissonNllLoss {
    eps: f64,
    use_map: bool,
}

impl PoissonNllLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, intervals flagged unmappable are excluded from the mean.
    pub fn with_map_mask(mut self, use_map: bool) -> Self {
        self.use_map = use_map;
        self
    }
}

impl Default for PoissonNllLoss {
    fn default() -> Self {
        Self {
            eps: 1e-8,
            use_map: false,
        }
    }
}

impl Criterion for PoissonNllLoss {
    fn compute(
        &self,
        predictions: &Tensor,
        targets: &Tensor,
        map_mask: Option<&Tensor>,
    ) -> Result<LossOutput, TrainingError> {
        if predictions.dims().len() != 1 {
            return Err(TrainingError::runtime(
                "poisson nll expects one-dimensional prediction tensors",
            ));
        }
        if predictions.dims() != targets.dims() {
            return Err(TrainingError::runtime(
                "prediction and target tensors must have matching dimensions",
            ));
        }
        let total = predictions.dims()[0];
        if total == 0 {
            return Err(TrainingError::runtime(
                "no examples available for loss computation",
            ));
        }

        let rate_log = predictions
            .affine(1.0, self.eps)
            .map_err(to_runtime_error)?
            .log()
            .map_err(to_runtime_error)?;
        let target_log = targets
            .affine(1.0, self.eps)
            .map_err(to_runtime_error)?
            .log()
            .map_err(to_runtime_error)?;

        // rate − t·ln(rate) + t·ln(t) − t, floored at zero against epsilon
        // wobble near the optimum.
        let nll = (predictions - (targets * &rate_log).map_err(to_runtime_error)?)
            .map_err(to_runtime_error)?;
        let norm = ((targets * &target_log).map_err(to_runtime_error)? - targets)
            .map_err(to_runtime_error)?;
        let per_example = (&nll + &norm)
            .map_err(to_runtime_error)?
            .relu()
            .map_err(to_runtime_error)?;

        let mask = if self.use_map { map_mask } else { None };
        let (weighted, denom) = match mask {
            Some(mask) => {
                if mask.dims() != targets.dims() {
                    return Err(TrainingError::runtime(
                        "map mask must match target dimensions",
                    ));
                }
                let weighted = (&per_example * mask).map_err(to_runtime_error)?;
                let denom = mask
                    .sum_all()
                    .map_err(to_runtime_error)?
                    .to_vec0::<f32>()
                    .map_err(to_runtime_error)?;
                (weighted, denom)
            }
            None => (per_example, total as f32),
        };

        if denom <= 0.0 {
            return Err(TrainingError::runtime(
                "no mapped examples remain for loss computation",
            ));
        }

        let loss = weighted
            .sum_all()
            .map_err(to_runtime_error)?
            .affine(1.0 / denom as f64, 0.0)
            .map_err(to_runtime_error)?;
        let mean_loss = loss.to_vec0::<f32>().map_err(to_runtime_error)?;

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                mean_loss,
                examples: denom.round() as usize,
            },
        })
    }
}

/// Log-linear Poisson regressor: exp of an affine map over the interval
/// features. Small on purpose; it exercises the orchestration loop and the
/// CLI without standing in for a real architecture.
#[derive(Debug)]
pub struct LinearRegressor {
    weight: Var,
    bias: Var,
}

impl LinearRegressor {
    pub fn new(feature_dim: usize, device: &Device) -> Result<Self, TrainingError> {
        if feature_dim == 0 {
            return Err(TrainingError::configuration(
                "model feature dimension must be greater than zero",
            ));
        }
        let init = Tensor::arange(0f32, feature_dim as f32, device)
            .and_then(|ramp| ramp.affine(0.01, 0.0))
            .and_then(|ramp| ramp.reshape((feature_dim, 1)))
            .map_err(to_init_error)?;
        let weight = Var::from_tensor(&init).map_err(to_init_error)?;
        let bias = Var::zeros(1, DType::F32, device).map_err(to_init_error)?;
        Ok(Self { weight, bias })
    }
}

impl RegressionModel for LinearRegressor {
    fn forward(&self, inputs: &Tensor) -> candle_core::Result<Tensor> {
        if inputs.dims().len() != 2 {
            candle_core::bail!("linear regressor expects [batch, features] inputs");
        }
        inputs
            .matmul(self.weight.as_tensor())?
            .squeeze(1)?
            .broadcast_add(self.bias.as_tensor())?
            .exp()
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![
            ("weight".to_string(), self.weight.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }
}

fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}

fn to_init_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(format!("failed to initialize model parameters: {err}"))
}
