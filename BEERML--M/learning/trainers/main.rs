//! Linear trainers consuming a feature-vector column and a label column.

/// Feature storage for coordinate descent.
pub mod matrix;
/// Softmax multiclass trainer.
pub mod multiclass;
/// Poisson regression trainer.
pub mod poisson;

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};

pub use matrix::FeatureMatrix;
pub use multiclass::{MulticlassModel, MulticlassOptions, MulticlassTrainer};
pub use poisson::{PoissonModel, PoissonOptions, PoissonTrainer};

/// Which trainer to run and the columns it binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainerSpec {
    /// Multiclass classification over a key label column.
    Multiclass {
        /// Vector column with the engineered features.
        features: String,
        /// Key column with the class of each row.
        label: String,
        /// Hyperparameters.
        #[serde(default)]
        options: MulticlassOptions,
    },
    /// Count regression over a numeric label column.
    Poisson {
        /// Vector column with the engineered features.
        features: String,
        /// Numeric label column.
        label: String,
        /// Hyperparameters.
        #[serde(default)]
        options: PoissonOptions,
    },
}

impl TrainerSpec {
    /// Multiclass trainer over the conventional `Features` / `Label` columns.
    #[must_use]
    pub fn multiclass(options: MulticlassOptions) -> Self {
        Self::Multiclass {
            features: "Features".into(),
            label: "Label".into(),
            options,
        }
    }

    /// Poisson trainer over the conventional `Features` / `Label` columns.
    #[must_use]
    pub fn poisson(options: PoissonOptions) -> Self {
        Self::Poisson {
            features: "Features".into(),
            label: "Label".into(),
            options,
        }
    }

    /// Feature column.
    #[must_use]
    pub fn features(&self) -> &str {
        match self {
            Self::Multiclass { features, .. } | Self::Poisson { features, .. } => features,
        }
    }

    /// Label column.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Multiclass { label, .. } | Self::Poisson { label, .. } => label,
        }
    }

    /// Rejects hyperparameters the trainer cannot run with.
    pub fn check_options(&self) -> PipelineResult<()> {
        match self {
            Self::Multiclass { options, .. } => options.validate(),
            Self::Poisson { options, .. } => options.validate(),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Multiclass { .. } => "linear_multiclass",
            Self::Poisson { .. } => "poisson_regression",
        }
    }
}

/// Rejects the coordinate-descent settings shared by both trainers.
pub(crate) fn check_descent(max_iterations: usize, l2: f32, tolerance: f32) -> PipelineResult<()> {
    if max_iterations == 0 {
        return Err(PipelineError::InvalidConfig(
            "max_iterations must be positive".into(),
        ));
    }
    if l2.is_nan() || l2 < 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "l2 must be non-negative, got {l2}"
        )));
    }
    if tolerance.is_nan() || tolerance < 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "tolerance must be non-negative, got {tolerance}"
        )));
    }
    Ok(())
}
