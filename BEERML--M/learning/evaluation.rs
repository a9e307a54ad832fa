use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{PipelineError, PipelineResult},
    loader::Dataset,
    predictor::{FittedPredictor, TrainedModel, PREDICTED_LABEL, SCORE},
};

const EPS: f64 = 1e-15;

/// Held-out metrics for a multiclass model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticlassMetrics {
    /// Rows whose predicted key equals the true key.
    pub correct: usize,
    /// Rows evaluated.
    pub total: usize,
    /// `correct / total`.
    pub micro_accuracy: f64,
    /// Mean of per-class accuracies over the true classes present.
    pub macro_accuracy: f64,
    /// Mean negative log-probability of the true class.
    pub log_loss: f64,
}

impl MulticlassMetrics {
    /// Scores predictions against the truth. `truth[i] == None` is a label never seen in training,
    /// which always counts as incorrect.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(
        truth: &[Option<u32>],
        predicted: &[u32],
        scores: &[Vec<f32>],
    ) -> PipelineResult<Self> {
        let total = truth.len();
        if total == 0 {
            return Err(PipelineError::EmptyDataset("evaluation set".into()));
        }
        if predicted.len() != total || scores.len() != total {
            return Err(PipelineError::mismatch(format!(
                "{total} labels, {} predictions, {} score rows",
                predicted.len(),
                scores.len()
            )));
        }

        let mut correct = 0usize;
        let mut loss = 0.0f64;
        let mut per_class: IndexMap<Option<u32>, (usize, usize)> = IndexMap::new();
        for ((label, guess), row) in truth.iter().zip(predicted).zip(scores) {
            let hit = *label == Some(*guess);
            let entry = per_class.entry(*label).or_default();
            entry.1 += 1;
            if hit {
                correct += 1;
                entry.0 += 1;
            }
            let prob = label
                .and_then(|key| row.get(key as usize))
                .map_or(0.0, |p| f64::from(*p));
            loss -= prob.clamp(EPS, 1.0 - EPS).ln();
        }

        let macro_accuracy = per_class
            .values()
            .map(|(hits, count)| *hits as f64 / *count as f64)
            .sum::<f64>()
            / per_class.len() as f64;
        Ok(Self {
            correct,
            total,
            micro_accuracy: correct as f64 / total as f64,
            macro_accuracy,
            log_loss: loss / total as f64,
        })
    }

    /// Micro accuracy as a percentage.
    #[must_use]
    pub fn accuracy_percent(&self) -> f64 {
        self.micro_accuracy * 100.0
    }
}

/// Held-out metrics for a regression model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Rows evaluated.
    pub total: usize,
    /// Mean absolute error.
    pub l1: f64,
    /// Mean squared error.
    pub l2: f64,
    /// Root mean squared error.
    pub rms: f64,
}

impl RegressionMetrics {
    /// Scores estimates against targets.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(targets: &[f32], estimates: &[f32]) -> PipelineResult<Self> {
        let total = targets.len();
        if total == 0 {
            return Err(PipelineError::EmptyDataset("evaluation set".into()));
        }
        if estimates.len() != total {
            return Err(PipelineError::mismatch(format!(
                "{total} targets, {} estimates",
                estimates.len()
            )));
        }
        let (abs, sq) = targets
            .iter()
            .zip(estimates)
            .fold((0.0f64, 0.0f64), |(abs, sq), (y, p)| {
                let err = f64::from(*p) - f64::from(*y);
                (abs + err.abs(), sq + err * err)
            });
        let l2 = sq / total as f64;
        Ok(Self {
            total,
            l1: abs / total as f64,
            l2,
            rms: l2.sqrt(),
        })
    }
}

/// Evaluates a classifier on a labeled held-out dataset.
pub fn evaluate_multiclass(model: &TrainedModel, dataset: &Dataset) -> PipelineResult<MulticlassMetrics> {
    if dataset.is_empty() {
        return Err(PipelineError::EmptyDataset(dataset.name.clone()));
    }
    if !matches!(model.predictor(), FittedPredictor::Multiclass { .. }) {
        return Err(PipelineError::mismatch("multiclass evaluation needs a classifier"));
    }
    let frame = model.score_labeled(&dataset.records)?;
    let truth = frame.keys(model.label_column(), "evaluate")?;
    let predicted = frame
        .keys(PREDICTED_LABEL, "evaluate")?
        .iter()
        .map(|key| key.ok_or_else(|| PipelineError::mismatch("prediction without a label key")))
        .collect::<PipelineResult<Vec<u32>>>()?;
    MulticlassMetrics::compute(truth, &predicted, frame.vectors(SCORE, "evaluate")?)
}

/// Evaluates a regressor on a labeled held-out dataset.
pub fn evaluate_regression(model: &TrainedModel, dataset: &Dataset) -> PipelineResult<RegressionMetrics> {
    if dataset.is_empty() {
        return Err(PipelineError::EmptyDataset(dataset.name.clone()));
    }
    if !matches!(model.predictor(), FittedPredictor::Poisson(_)) {
        return Err(PipelineError::mismatch("regression evaluation needs a regressor"));
    }
    let frame = model.score_labeled(&dataset.records)?;
    let numeric = |name: &str| -> PipelineResult<Vec<f32>> {
        frame
            .values(name, "evaluate")?
            .iter()
            .map(|value| {
                value
                    .as_f32()
                    .ok_or_else(|| PipelineError::mismatch(format!("`{name}` is not numeric")))
            })
            .collect()
    };
    RegressionMetrics::compute(&numeric(model.label_column())?, &numeric(SCORE)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_of_ten_is_exactly_seventy_percent() {
        let truth: Vec<Option<u32>> = vec![0, 0, 1, 1, 2, 2, 0, 1, 2, 0].into_iter().map(Some).collect();
        let predicted = vec![0, 0, 1, 1, 2, 2, 0, 2, 0, 1];
        let scores = vec![vec![0.4, 0.3, 0.3]; 10];
        let metrics = MulticlassMetrics::compute(&truth, &predicted, &scores).unwrap();
        assert_eq!(metrics.correct, 7);
        assert_eq!(metrics.total, 10);
        assert_eq!(metrics.micro_accuracy, 0.7);
        assert!(metrics.log_loss > 0.0);
    }

    #[test]
    fn unseen_truth_counts_as_incorrect() {
        let metrics = MulticlassMetrics::compute(
            &[Some(0), None],
            &[0, 0],
            &[vec![1.0], vec![1.0]],
        )
        .unwrap();
        assert_eq!(metrics.correct, 1);
        assert_eq!(metrics.micro_accuracy, 0.5);
        assert_eq!(metrics.macro_accuracy, 0.5);
    }

    #[test]
    fn macro_accuracy_weights_classes_equally() {
        let truth = [Some(0), Some(0), Some(0), Some(1)];
        let metrics =
            MulticlassMetrics::compute(&truth, &[0, 0, 0, 0], &vec![vec![0.5, 0.5]; 4]).unwrap();
        assert_eq!(metrics.micro_accuracy, 0.75);
        assert_eq!(metrics.macro_accuracy, 0.5);
    }

    #[test]
    fn empty_sets_are_rejected() {
        assert!(matches!(
            MulticlassMetrics::compute(&[], &[], &[]),
            Err(PipelineError::EmptyDataset(_))
        ));
        assert!(matches!(
            RegressionMetrics::compute(&[], &[]),
            Err(PipelineError::EmptyDataset(_))
        ));
    }

    #[test]
    fn regression_errors() {
        let metrics = RegressionMetrics::compute(&[1.0, 3.0], &[2.0, 1.0]).unwrap();
        assert!((metrics.l1 - 1.5).abs() < 1e-12);
        assert!((metrics.l2 - 2.5).abs() < 1e-12);
        assert!((metrics.rms - 2.5f64.sqrt()).abs() < 1e-12);
    }
}
