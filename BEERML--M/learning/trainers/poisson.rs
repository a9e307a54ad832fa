use ndarray::{Array1, ArrayView1};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{check_descent, matrix::FeatureMatrix};
use crate::errors::{PipelineError, PipelineResult};

/// Margins are clamped to this magnitude before exponentiation.
const MAX_EXP: f32 = 30.0;
const HESS_MIN: f32 = 1e-6;

/// Hyperparameters for [`PoissonTrainer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoissonOptions {
    /// Maximum passes over all coordinates.
    pub max_iterations: usize,
    /// L2 penalty on weights (the bias is not penalised).
    pub l2: f32,
    /// Stop once the largest weight change of a pass falls below this.
    pub tolerance: f32,
    /// Largest change a single Newton step may apply to one coordinate.
    pub max_delta_step: f32,
}

impl PoissonOptions {
    /// Fails with `InvalidConfig` on settings the trainer cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        check_descent(self.max_iterations, self.l2, self.tolerance)?;
        if self.max_delta_step.is_nan() || self.max_delta_step <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "max_delta_step must be positive, got {}",
                self.max_delta_step
            )));
        }
        Ok(())
    }
}

impl Default for PoissonOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            l2: 1e-2,
            tolerance: 1e-4,
            max_delta_step: 0.7,
        }
    }
}

/// Log-linear count regressor: `prediction = exp(w·x + b)`.
#[derive(Debug, Clone)]
pub struct PoissonTrainer {
    options: PoissonOptions,
    seed: u64,
}

impl PoissonTrainer {
    /// Creates a trainer; `seed` drives the coordinate visiting order.
    #[must_use]
    pub fn new(options: PoissonOptions, seed: u64) -> Self {
        Self { options, seed }
    }

    /// Fits the model. Every label must be finite and non-negative.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&self, features: &FeatureMatrix, labels: &[f32]) -> PipelineResult<PoissonModel> {
        self.options.validate()?;
        let rows = features.num_rows();
        if rows == 0 {
            return Err(PipelineError::EmptyDataset("poisson training set".into()));
        }
        if labels.len() != rows {
            return Err(PipelineError::mismatch(format!(
                "{} labels for {rows} feature rows",
                labels.len()
            )));
        }
        for (row, value) in labels.iter().enumerate() {
            if value.is_nan() || value.is_infinite() {
                return Err(PipelineError::mismatch(format!(
                    "regression label at row {row} is not finite"
                )));
            }
            if *value < 0.0 {
                return Err(PipelineError::NegativeTarget { row, value: *value });
            }
        }

        let mean = labels.iter().sum::<f32>() / rows as f32;
        let mut model = PoissonModel {
            weights: Array1::zeros(features.num_features()),
            bias: mean.max(HESS_MIN).ln(),
        };
        let mut margins = vec![model.bias; rows];
        let mut means: Vec<f32> = margins.iter().map(|m| expected(*m)).collect();

        let step_limit = self.options.max_delta_step;
        let mut order: Vec<usize> = (0..features.num_features()).collect();
        let mut rng = SmallRng::seed_from_u64(self.seed);

        for _ in 0..self.options.max_iterations {
            order.shuffle(&mut rng);
            let mut max_change = 0.0f32;

            let grad: f32 = means.iter().zip(labels).map(|(mu, y)| mu - y).sum();
            let hess: f32 = means.iter().sum::<f32>().max(HESS_MIN);
            let delta = (-grad / hess).clamp(-step_limit, step_limit);
            if delta.abs() > 1e-10 {
                model.bias += delta;
                for (margin, mu) in margins.iter_mut().zip(means.iter_mut()) {
                    *margin += delta;
                    *mu = expected(*margin);
                }
                max_change = max_change.max(delta.abs());
            }

            for &feature in &order {
                let entries = features.column(feature);
                if entries.is_empty() {
                    continue;
                }
                let weight = model.weights[feature];
                let mut grad = self.options.l2 * weight;
                let mut hess = self.options.l2;
                for &(row, value) in entries {
                    grad += (means[row] - labels[row]) * value;
                    hess += means[row] * value * value;
                }
                let delta = (-grad / hess.max(HESS_MIN)).clamp(-step_limit, step_limit);
                if delta.abs() <= 1e-10 {
                    continue;
                }
                model.weights[feature] = weight + delta;
                for &(row, value) in entries {
                    margins[row] += delta * value;
                    means[row] = expected(margins[row]);
                }
                max_change = max_change.max(delta.abs());
            }

            if max_change < self.options.tolerance {
                break;
            }
        }
        Ok(model)
    }
}

fn expected(margin: f32) -> f32 {
    margin.clamp(-MAX_EXP, MAX_EXP).exp()
}

/// Fitted Poisson regression model.
#[derive(Debug, Clone, PartialEq)]
pub struct PoissonModel {
    weights: Array1<f32>,
    bias: f32,
}

impl PoissonModel {
    /// Expected feature width.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.weights.len()
    }

    /// Expected count for one feature vector; never negative.
    pub fn predict(&self, features: &[f32]) -> PipelineResult<f32> {
        if features.len() != self.num_features() {
            return Err(PipelineError::mismatch(format!(
                "model expects {} features, got {}",
                self.num_features(),
                features.len()
            )));
        }
        let margin = self.weights.dot(&ArrayView1::from(features)) + self.bias;
        Ok(expected(margin))
    }
}
