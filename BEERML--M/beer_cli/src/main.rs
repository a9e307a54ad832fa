use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use beerml_learning::{
    demos::{classification, regression},
    reporter::{write_forecast, ClassificationReport, RegressionReport},
    LearningTelemetry, RunConfig,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "beerml", version, about = "Drink classification and consumption forecasting demos")]
struct Cli {
    /// JSON-lines log file (overrides `[telemetry].log_path`).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// JSON-lines event file (overrides `[telemetry].event_log`).
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains the drink type classifier, predicts drink names and reports accuracy.
    Classify {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Drink names to classify; defaults to the built-in list.
        #[arg(long, num_args = 1..)]
        predict: Vec<String>,
    },
    /// Trains the consumption regressor and writes a forecast CSV.
    Regress {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Rows to forecast (overrides `[regression].forecast_input`).
        #[arg(long)]
        input: Option<PathBuf>,
        /// Forecast destination (overrides `[regression].forecast_output`).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Runs both demos in sequence.
    RunAll {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sinks = Sinks {
        log_file: cli.log_file,
        event_log: cli.event_log,
    };
    match cli.command {
        Commands::Classify { config, predict } => {
            let config = load_config(config.as_deref())?;
            handle_classify(&config, &sinks, predict)
        }
        Commands::Regress {
            config,
            input,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if input.is_some() {
                config.regression.forecast_input = input;
            }
            if let Some(output) = output {
                config.regression.forecast_output = output;
            }
            handle_regress(&config, &sinks)
        }
        Commands::RunAll { config } => {
            let config = load_config(config.as_deref())?;
            handle_classify(&config, &sinks, Vec::new())?;
            println!();
            handle_regress(&config, &sinks)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

/// Command-line overrides for the telemetry sinks.
struct Sinks {
    log_file: Option<PathBuf>,
    event_log: Option<PathBuf>,
}

impl Sinks {
    fn telemetry(&self, module: &str, config: &RunConfig) -> Result<LearningTelemetry> {
        let mut builder = LearningTelemetry::builder(module);
        if let Some(path) = self.log_file.as_ref().or(config.telemetry.log_path.as_ref()) {
            builder = builder.log_path(path);
        }
        if let Some(path) = self.event_log.as_ref().or(config.telemetry.event_log.as_ref()) {
            let publisher = FileEventPublisher::new(path)
                .with_context(|| format!("opening event log {}", path.display()))?;
            builder = builder.event_publisher(Arc::new(publisher));
        }
        builder.build()
    }
}

fn handle_classify(config: &RunConfig, sinks: &Sinks, names: Vec<String>) -> Result<()> {
    let telemetry = sinks.telemetry("classification", config)?;
    let names = if names.is_empty() {
        classification::default_drinks()
    } else {
        names
    };
    let report = classification::run(&config.classification, config.seed, &names, &telemetry)
        .map_err(|err| fail(&telemetry, err))
        .context("classification run failed")?;
    for line in classification_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

fn handle_regress(config: &RunConfig, sinks: &Sinks) -> Result<()> {
    let telemetry = sinks.telemetry("regression", config)?;
    let report = regression::run(&config.regression, config.seed, &telemetry)
        .map_err(|err| fail(&telemetry, err))
        .context("regression run failed")?;
    for line in regression_lines(&report) {
        println!("{line}");
    }
    if config.regression.forecast_input.is_some() {
        let output = &config.regression.forecast_output;
        write_forecast(output, &report.forecasts)
            .map_err(|err| fail(&telemetry, err))
            .with_context(|| format!("writing forecast {}", output.display()))?;
        telemetry.stage(
            "forecast_written",
            json!({ "path": output.display().to_string(), "rows": report.forecasts.len() }),
        );
        telemetry.announce(
            "beerml.regression.forecast",
            json!({ "run_id": report.run.run_id, "path": output.display().to_string(), "rows": report.forecasts.len() }),
        );
        println!("Forecast written to {}", output.display());
    }
    Ok(())
}

fn fail<E: std::fmt::Display>(telemetry: &LearningTelemetry, err: E) -> E {
    let _ = telemetry.log(LogLevel::Error, "run_failed", json!({ "error": err.to_string() }));
    err
}

fn classification_lines(report: &ClassificationReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Trained the model in: {} seconds.",
        report.run.whole_seconds()
    )];
    lines.extend(
        report
            .predictions
            .iter()
            .map(|p| format!("{} is {}", p.name, p.label)),
    );
    lines.push(format!("Accuracy: {:.2}%", report.metrics.accuracy_percent()));
    lines
}

fn regression_lines(report: &RegressionReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Trained the model in: {} seconds.",
        report.run.whole_seconds()
    )];
    lines.extend(
        report
            .forecasts
            .iter()
            .map(|f| format!("{}-{}-{} is {}", f.year, f.month, f.day, f.consumption)),
    );
    if let Some(metrics) = &report.metrics {
        lines.push(format!(
            "L1: {:.4} L2: {:.4} RMS: {:.4}",
            metrics.l1, metrics.l2, metrics.rms
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use beerml_learning::{
        reporter::{DrinkPrediction, Forecast, RunSummary},
        MulticlassMetrics,
    };
    use tempfile::tempdir;

    #[test]
    fn classification_output_shape() {
        let truth: Vec<Option<u32>> = (0..10).map(|i| Some(u32::from(i >= 7))).collect();
        let report = ClassificationReport {
            run: RunSummary::new(2.4, 100),
            classes: vec!["Beer".into(), "Whisky".into()],
            predictions: vec![DrinkPrediction {
                name: "Weird Stout".into(),
                label: "Beer".into(),
                scores: vec![0.9, 0.1],
            }],
            metrics: MulticlassMetrics::compute(&truth, &[0; 10], &vec![vec![0.5, 0.5]; 10])
                .unwrap(),
        };
        assert_eq!(
            classification_lines(&report),
            vec![
                "Trained the model in: 2 seconds.",
                "Weird Stout is Beer",
                "Accuracy: 70.00%",
            ]
        );
    }

    #[test]
    fn regression_output_shape() {
        let report = RegressionReport {
            run: RunSummary::new(0.1, 10),
            forecasts: vec![Forecast {
                year: 2018,
                month: 3,
                day: 1,
                weekday: 4,
                consumption: 42.5,
            }],
            metrics: None,
        };
        assert_eq!(
            regression_lines(&report),
            vec!["Trained the model in: 0 seconds.", "2018-3-1 is 42.5"]
        );
    }

    #[test]
    fn cli_overrides_telemetry_sinks() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("cli.log");
        let sinks = Sinks {
            log_file: Some(log.clone()),
            event_log: Some(dir.path().join("events.jsonl")),
        };
        let telemetry = sinks.telemetry("classification", &RunConfig::default()).unwrap();
        telemetry.stage("schema_loaded", json!({ "rows": 1 }));
        telemetry.announce("beerml.classification.trained", json!({}));
        assert!(std::fs::read_to_string(&log).unwrap().contains("schema_loaded"));
        assert!(std::fs::read_to_string(dir.path().join("events.jsonl"))
            .unwrap()
            .contains("beerml.classification.trained"));
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempdir().unwrap();
        let err = load_config(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
        assert!(err.to_string().contains("loading config"));
    }
}
