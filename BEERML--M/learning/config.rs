use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    errors::{PipelineError, PipelineResult},
    trainers::{MulticlassOptions, PoissonOptions},
};

/// Directory holding the bundled sample datasets.
pub const DATASET_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/dataset");

fn dataset(file: &str) -> PathBuf {
    Path::new(DATASET_DIR).join(file)
}

/// Top-level run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Seed shared by every trainer in the run.
    #[serde(default)]
    pub seed: u64,
    /// Drink type classification demo.
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Consumption forecast demo.
    #[serde(default)]
    pub regression: RegressionConfig,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Classification settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationConfig {
    /// Labeled training CSV (`FullName,Type,Country`).
    #[serde(default = "default_classification_train")]
    pub train: PathBuf,
    /// Labeled held-out CSV.
    #[serde(default = "default_classification_validate")]
    pub validate: PathBuf,
    /// Trainer hyperparameters.
    #[serde(default)]
    pub trainer: MulticlassOptions,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            train: default_classification_train(),
            validate: default_classification_validate(),
            trainer: MulticlassOptions::default(),
        }
    }
}

/// Regression settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegressionConfig {
    /// Labeled training CSV.
    #[serde(default = "default_regression_train")]
    pub train: PathBuf,
    /// Rows to forecast; the consumption column is not read.
    #[serde(default = "default_forecast_input")]
    pub forecast_input: Option<PathBuf>,
    /// Forecast CSV destination.
    #[serde(default = "default_forecast_output")]
    pub forecast_output: PathBuf,
    /// Optional labeled held-out CSV for regression metrics.
    #[serde(default)]
    pub validate: Option<PathBuf>,
    /// Trainer hyperparameters.
    #[serde(default)]
    pub trainer: PoissonOptions,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            train: default_regression_train(),
            forecast_input: default_forecast_input(),
            forecast_output: default_forecast_output(),
            validate: None,
            trainer: PoissonOptions::default(),
        }
    }
}

/// Telemetry sinks; both optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

fn default_classification_train() -> PathBuf {
    dataset("problem2_train.csv")
}

fn default_classification_validate() -> PathBuf {
    dataset("problem2_validate.csv")
}

fn default_regression_train() -> PathBuf {
    dataset("consumption_training.csv")
}

#[allow(clippy::unnecessary_wraps)]
fn default_forecast_input() -> Option<PathBuf> {
    Some(dataset("consumption_result.csv"))
}

fn default_forecast_output() -> PathBuf {
    PathBuf::from("forecast.csv")
}

impl RunConfig {
    /// Loads a TOML file, resolving relative paths against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let mut config = Self::from_toml(&raw)?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        config.resolve_relative(&base);
        Ok(config)
    }

    /// Parses and validates a TOML document without touching paths.
    pub fn from_toml(raw: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| PipelineError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects hyperparameters no trainer can work with.
    pub fn validate(&self) -> PipelineResult<()> {
        self.classification
            .trainer
            .validate()
            .map_err(|err| in_section("classification", err))?;
        self.regression
            .trainer
            .validate()
            .map_err(|err| in_section("regression", err))
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.classification.train);
        resolve(&mut self.classification.validate);
        resolve(&mut self.regression.train);
        resolve(&mut self.regression.forecast_output);
        for path in [
            self.regression.forecast_input.as_mut(),
            self.regression.validate.as_mut(),
            self.telemetry.log_path.as_mut(),
            self.telemetry.event_log.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
    }
}

fn in_section(section: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::InvalidConfig(reason) => {
            PipelineError::InvalidConfig(format!("{section}.trainer.{reason}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_bundled_datasets() {
        let config = RunConfig::from_toml("").unwrap();
        assert_eq!(config.seed, 0);
        assert!(config.classification.train.ends_with("dataset/problem2_train.csv"));
        assert!(config.classification.train.exists());
        assert!(config.regression.validate.is_none());
        assert_eq!(config.classification.trainer.max_iterations, 100);
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(
            &path,
            r#"
seed = 7

[classification]
train = "data/train.csv"

[regression]
forecast_output = "/tmp/out.csv"
validate = "data/holdout.csv"

[regression.trainer]
max_iterations = 20

[telemetry]
log_path = "logs/run.log"
"#,
        )
        .unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.classification.train, dir.path().join("data/train.csv"));
        assert_eq!(config.regression.forecast_output, PathBuf::from("/tmp/out.csv"));
        assert_eq!(config.regression.validate, Some(dir.path().join("data/holdout.csv")));
        assert_eq!(config.regression.trainer.max_iterations, 20);
        assert_eq!(config.telemetry.log_path, Some(dir.path().join("logs/run.log")));
        assert!(config.classification.validate.is_absolute());
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let err = RunConfig::from_toml("[classification.trainer]\nmax_iterations = 0\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        let err = RunConfig::from_toml("[regression.trainer]\nl2 = -1.0\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        let err = RunConfig::from_toml("bogus = 1\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        let err = RunConfig::from_toml("[regression.trainer]\nmax_delta_step = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("regression.trainer.max_delta_step"));
    }

    #[test]
    fn misspelled_trainer_keys_are_rejected() {
        let err = RunConfig::from_toml("[classification.trainer]\nmax_iteration = 5\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        let err = RunConfig::from_toml("[regression.trainer]\nmax_delta = 0.5\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            RunConfig::load(dir.path().join("absent.toml")),
            Err(PipelineError::Io { .. })
        ));
    }
}
