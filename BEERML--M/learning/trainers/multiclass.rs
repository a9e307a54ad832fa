use ndarray::{Array1, Array2, ArrayView1};
use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{check_descent, matrix::FeatureMatrix};
use crate::errors::{PipelineError, PipelineResult};

/// Upper bound of the softmax curvature `p(1-p)`; using it keeps every coordinate step a descent step.
const CURVATURE_BOUND: f32 = 0.25;

/// Hyperparameters for [`MulticlassTrainer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MulticlassOptions {
    /// Maximum passes over all coordinates.
    pub max_iterations: usize,
    /// L2 penalty on weights (biases are not penalised).
    pub l2: f32,
    /// Stop once the largest weight change of a pass falls below this.
    pub tolerance: f32,
}

impl MulticlassOptions {
    /// Fails with `InvalidConfig` on settings the trainer cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        check_descent(self.max_iterations, self.l2, self.tolerance)
    }
}

impl Default for MulticlassOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            l2: 1e-3,
            tolerance: 1e-4,
        }
    }
}

/// Linear softmax classifier trained by cyclic coordinate descent.
#[derive(Debug, Clone)]
pub struct MulticlassTrainer {
    options: MulticlassOptions,
    seed: u64,
}

impl MulticlassTrainer {
    /// Creates a trainer; `seed` drives the coordinate visiting order.
    #[must_use]
    pub fn new(options: MulticlassOptions, seed: u64) -> Self {
        Self { options, seed }
    }

    /// Fits weights for `num_classes` classes; `labels[i]` is the class of row `i`.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        &self,
        features: &FeatureMatrix,
        labels: &[u32],
        num_classes: usize,
    ) -> PipelineResult<MulticlassModel> {
        self.options.validate()?;
        let rows = features.num_rows();
        let dims = features.num_features();
        if rows == 0 {
            return Err(PipelineError::EmptyDataset("multiclass training set".into()));
        }
        if labels.len() != rows {
            return Err(PipelineError::mismatch(format!(
                "{} labels for {rows} feature rows",
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|label| **label as usize >= num_classes) {
            return Err(PipelineError::mismatch(format!(
                "label key {bad} outside {num_classes} classes"
            )));
        }

        let mut model = MulticlassModel {
            weights: Array2::zeros((num_classes, dims)),
            bias: Array1::zeros(num_classes),
        };
        let mut counts = vec![0usize; num_classes];
        for label in labels {
            counts[*label as usize] += 1;
        }
        for (class, count) in counts.iter().enumerate() {
            model.bias[class] = (*count as f32 / rows as f32).max(1e-6).ln();
        }

        let mut margins = Array2::<f32>::zeros((rows, num_classes));
        for mut row in margins.outer_iter_mut() {
            row.assign(&model.bias);
        }
        let mut probs = margins.clone();
        for row in 0..rows {
            refresh_row(&margins, &mut probs, row);
        }
        let target = |row: usize, class: usize| f32::from(u8::from(labels[row] as usize == class));

        let mut order: Vec<usize> = (0..dims).collect();
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let bias_curvature = rows as f32 * CURVATURE_BOUND;

        for _ in 0..self.options.max_iterations {
            order.shuffle(&mut rng);
            let mut max_change = 0.0f32;
            for class in 0..num_classes {
                let grad: f32 = (0..rows).map(|row| probs[[row, class]] - target(row, class)).sum();
                let delta = -grad / bias_curvature;
                if delta.abs() > 1e-10 {
                    model.bias[class] += delta;
                    for row in 0..rows {
                        margins[[row, class]] += delta;
                        refresh_row(&margins, &mut probs, row);
                    }
                    max_change = max_change.max(delta.abs());
                }

                for &feature in &order {
                    let entries = features.column(feature);
                    if entries.is_empty() {
                        continue;
                    }
                    let weight = model.weights[[class, feature]];
                    let mut grad = self.options.l2 * weight;
                    let mut curvature = self.options.l2;
                    for &(row, value) in entries {
                        grad += (probs[[row, class]] - target(row, class)) * value;
                        curvature += CURVATURE_BOUND * value * value;
                    }
                    let delta = -grad / curvature;
                    if delta.abs() <= 1e-10 {
                        continue;
                    }
                    model.weights[[class, feature]] = weight + delta;
                    for &(row, value) in entries {
                        margins[[row, class]] += delta * value;
                        refresh_row(&margins, &mut probs, row);
                    }
                    max_change = max_change.max(delta.abs());
                }
            }
            if max_change < self.options.tolerance {
                break;
            }
        }
        Ok(model)
    }
}

fn refresh_row(margins: &Array2<f32>, probs: &mut Array2<f32>, row: usize) {
    let margins = margins.row(row);
    let max = margins.fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
    let mut out = probs.row_mut(row);
    let mut total = 0.0f32;
    for (p, m) in out.iter_mut().zip(margins.iter()) {
        *p = (m - max).exp();
        total += *p;
    }
    out /= total;
}

fn softmax(margins: ArrayView1<'_, f32>) -> Array1<f32> {
    let max = margins.fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
    let exp = margins.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

/// Fitted linear softmax model: one weight row and bias per class.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticlassModel {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl MulticlassModel {
    /// Number of classes.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.bias.len()
    }

    /// Expected feature width.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.weights.ncols()
    }

    /// Class probabilities; index `k` is the class with label key `k`.
    pub fn scores(&self, features: &[f32]) -> PipelineResult<Vec<f32>> {
        if features.len() != self.num_features() {
            return Err(PipelineError::mismatch(format!(
                "model expects {} features, got {}",
                self.num_features(),
                features.len()
            )));
        }
        let margins = self.weights.dot(&ArrayView1::from(features)) + &self.bias;
        Ok(softmax(margins.view()).to_vec())
    }

    /// Predicted key (highest score, lowest key on ties) and the score vector.
    pub fn predict(&self, features: &[f32]) -> PipelineResult<(u32, Vec<f32>)> {
        let scores = self.scores(features)?;
        let mut best = 0usize;
        for (class, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = class;
            }
        }
        let key = u32::try_from(best)
            .map_err(|_| PipelineError::mismatch("class index exceeds key range"))?;
        Ok((key, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_rows() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.1, 0.9, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 0.2, 0.8],
        ]
    }

    fn toy() -> (FeatureMatrix, Vec<u32>) {
        (FeatureMatrix::from_rows(&toy_rows()).unwrap(), vec![0, 0, 1, 1, 2, 2])
    }

    #[test]
    fn separable_classes_are_learned() {
        let (matrix, labels) = toy();
        let model = MulticlassTrainer::new(MulticlassOptions::default(), 0)
            .fit(&matrix, &labels, 3)
            .unwrap();
        for (row, label) in toy_rows().iter().zip(&labels) {
            let (key, scores) = model.predict(row).unwrap();
            assert_eq!(key, *label);
            assert_eq!(scores.len(), 3);
            assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn same_seed_same_model() {
        let (matrix, labels) = toy();
        let trainer = MulticlassTrainer::new(MulticlassOptions::default(), 7);
        let a = trainer.fit(&matrix, &labels, 3).unwrap();
        let b = trainer.fit(&matrix, &labels, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn negative_or_nan_l2_is_a_config_error() {
        let (matrix, labels) = toy();
        for l2 in [-0.5, f32::NAN] {
            let options = MulticlassOptions {
                l2,
                ..MulticlassOptions::default()
            };
            let err = MulticlassTrainer::new(options, 0)
                .fit(&matrix, &labels, 3)
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfig(_)), "{l2}");
        }
    }

    #[test]
    fn single_class_always_predicted() {
        let matrix = FeatureMatrix::from_rows(&[vec![1.0], vec![0.5]]).unwrap();
        let model = MulticlassTrainer::new(MulticlassOptions::default(), 0)
            .fit(&matrix, &[0, 0], 1)
            .unwrap();
        assert_eq!(model.predict(&[0.0]).unwrap(), (0, vec![1.0]));
    }

    #[test]
    fn wrong_width_and_empty_input_fail() {
        let (matrix, labels) = toy();
        let model = MulticlassTrainer::new(MulticlassOptions::default(), 0)
            .fit(&matrix, &labels, 3)
            .unwrap();
        assert!(model.predict(&[1.0]).is_err());
        let empty = FeatureMatrix::from_rows(&[]).unwrap();
        assert!(matches!(
            MulticlassTrainer::new(MulticlassOptions::default(), 0).fit(&empty, &[], 2),
            Err(PipelineError::EmptyDataset(_))
        ));
    }
}
