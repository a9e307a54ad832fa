use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::{PipelineError, PipelineResult},
    evaluation::{MulticlassMetrics, RegressionMetrics},
};

/// Header of the forecast CSV.
pub const FORECAST_HEADER: &str = "year,month,day,weekday,predicted_consumption";

/// Identity and timing shared by both demo reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run id (`run-<uuid>`).
    pub run_id: String,
    /// When training finished.
    pub trained_at: DateTime<Utc>,
    /// Wall-clock training time.
    pub training_seconds: f64,
    /// Rows used for training.
    pub training_rows: usize,
}

impl RunSummary {
    /// Stamps a finished training stage.
    #[must_use]
    pub fn new(training_seconds: f64, training_rows: usize) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            trained_at: Utc::now(),
            training_seconds,
            training_rows,
        }
    }

    /// Whole seconds spent training.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn whole_seconds(&self) -> u64 {
        self.training_seconds.max(0.0).floor() as u64
    }
}

/// Predicted type for one drink name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrinkPrediction {
    /// Drink name as given.
    pub name: String,
    /// Predicted type.
    pub label: String,
    /// Probability per class, in [`ClassificationReport::classes`] order.
    pub scores: Vec<f32>,
}

/// Result of the classification demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Run identity and timing.
    pub run: RunSummary,
    /// Class labels in score order.
    pub classes: Vec<String>,
    /// Predictions in request order.
    pub predictions: Vec<DrinkPrediction>,
    /// Held-out metrics.
    pub metrics: MulticlassMetrics,
}

impl ClassificationReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[classification] run={} classes={} predictions={} accuracy={:.2}% macro={:.2}% log_loss={:.4}",
            self.run.run_id,
            self.classes.len(),
            self.predictions.len(),
            self.metrics.accuracy_percent(),
            self.metrics.macro_accuracy * 100.0,
            self.metrics.log_loss
        )
    }
}

/// One forecast row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Year.
    pub year: i32,
    /// Month.
    pub month: i32,
    /// Day of month.
    pub day: i32,
    /// Weekday number as given in the input.
    pub weekday: i32,
    /// Predicted consumption (never negative).
    pub consumption: f32,
}

impl Forecast {
    /// CSV line without the trailing newline.
    #[must_use]
    pub fn csv_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.year, self.month, self.day, self.weekday, self.consumption
        )
    }
}

/// Result of the regression demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    /// Run identity and timing.
    pub run: RunSummary,
    /// Forecasts in input order.
    pub forecasts: Vec<Forecast>,
    /// Held-out metrics, when a labeled validate file was configured.
    pub metrics: Option<RegressionMetrics>,
}

impl RegressionReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        let metrics = self.metrics.as_ref().map_or_else(
            || "n/a".to_string(),
            |m| format!("l1={:.4} l2={:.4} rms={:.4}", m.l1, m.l2, m.rms),
        );
        format!(
            "[regression] run={} forecasts={} metrics={metrics}",
            self.run.run_id,
            self.forecasts.len()
        )
    }
}

/// Writes forecasts as CSV with a header row, in the given order.
pub fn write_forecast(path: impl AsRef<Path>, forecasts: &[Forecast]) -> PipelineResult<()> {
    let path = path.as_ref();
    let io = |err| PipelineError::io(path, err);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io)?;
    }
    let mut writer = BufWriter::new(File::create(path).map_err(io)?);
    writeln!(writer, "{FORECAST_HEADER}").map_err(io)?;
    for forecast in forecasts {
        writeln!(writer, "{}", forecast.csv_line()).map_err(io)?;
    }
    writer.flush().map_err(io)
}
