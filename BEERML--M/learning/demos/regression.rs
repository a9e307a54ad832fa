use std::time::Instant;

use serde_json::json;

use crate::{
    config::RegressionConfig,
    errors::{PipelineError, PipelineResult},
    evaluation::evaluate_regression,
    loader::TextLoader,
    pipeline::PipelineSpec,
    predictor::{BatchPredictor, Prediction, TrainingPipeline},
    reporter::{Forecast, RegressionReport, RunSummary},
    schema::{FieldDescriptor, FieldKind, Record, Schema},
    telemetry::LearningTelemetry,
    trainers::{PoissonOptions, TrainerSpec},
};

/// Daily consumption rows; columns 0-2 (site identifiers) are not read.
pub fn consumption_schema() -> PipelineResult<Schema> {
    Schema::new(vec![
        FieldDescriptor::new("Year", FieldKind::Int32, 3),
        FieldDescriptor::new("Month", FieldKind::Int32, 4),
        FieldDescriptor::new("Day", FieldKind::Int32, 5),
        FieldDescriptor::new("Weekday", FieldKind::Int32, 6),
        FieldDescriptor::new("Consumption", FieldKind::Float32, 7),
        FieldDescriptor::new("Temperature", FieldKind::Float32, 8),
    ])
}

/// Same layout with the target left unread.
pub fn forecast_schema() -> PipelineResult<Schema> {
    consumption_schema()?.without(&["Consumption"])
}

/// Calendar and temperature one-hot encodings into a Poisson regressor.
#[must_use]
pub fn consumption_pipeline(options: PoissonOptions) -> TrainingPipeline {
    let features = PipelineSpec::builder()
        .copy_column("Consumption", "Label")
        .one_hot_encode("Year", "YearEncoded")
        .one_hot_encode("Month", "MonthEncoded")
        .one_hot_encode("Day", "DayEncoded")
        .one_hot_encode("Temperature", "TemperatureEncoded")
        .concatenate(
            "Features",
            &["YearEncoded", "MonthEncoded", "DayEncoded", "TemperatureEncoded"],
        )
        .build();
    TrainingPipeline::new(features, TrainerSpec::poisson(options))
}

/// Trains on the configured file, forecasts the configured input and, when a labeled
/// validate file is configured, reports regression metrics.
pub fn run(
    config: &RegressionConfig,
    seed: u64,
    telemetry: &LearningTelemetry,
) -> PipelineResult<RegressionReport> {
    let loader = TextLoader::new(consumption_schema()?);
    let train = loader.read(&config.train)?;
    telemetry.stage(
        "schema_loaded",
        json!({ "path": config.train.display().to_string(), "rows": train.len() }),
    );

    let pipeline = consumption_pipeline(config.trainer.clone());
    let columns = pipeline.validate(loader.schema())?;
    telemetry.stage(
        "pipeline_validated",
        json!({ "columns": columns.names().collect::<Vec<_>>() }),
    );

    telemetry.stage("training_start", json!({ "rows": train.len(), "seed": seed }));
    let watch = Instant::now();
    let model = pipeline.fit(&train, seed)?;
    let run = RunSummary::new(watch.elapsed().as_secs_f64(), train.len());
    telemetry.stage(
        "training_complete",
        json!({ "seconds": run.training_seconds, "required_fields": model.required_fields() }),
    );
    telemetry.announce(
        "beerml.regression.trained",
        json!({ "run_id": run.run_id, "rows": train.len() }),
    );

    let forecasts = match &config.forecast_input {
        Some(path) => {
            let input = TextLoader::new(forecast_schema()?).read(path)?;
            let forecasts = BatchPredictor::new(&model)
                .run_dataset(input)?
                .into_iter()
                .map(|(record, prediction)| to_forecast(&record, &prediction))
                .collect::<PipelineResult<Vec<_>>>()?;
            telemetry.stage(
                "batch_prediction_complete",
                json!({ "path": path.display().to_string(), "predictions": forecasts.len() }),
            );
            forecasts
        }
        None => Vec::new(),
    };

    let metrics = match &config.validate {
        Some(path) => {
            let holdout = loader.read(path)?;
            let metrics = evaluate_regression(&model, &holdout)?;
            telemetry.stage(
                "evaluation_complete",
                json!({ "path": path.display().to_string(), "l1": metrics.l1, "rms": metrics.rms }),
            );
            Some(metrics)
        }
        None => None,
    };

    let report = RegressionReport {
        run,
        forecasts,
        metrics,
    };
    telemetry.stage("run_complete", json!({ "summary": report.summary() }));
    Ok(report)
}

fn to_forecast(record: &Record, prediction: &Prediction) -> PipelineResult<Forecast> {
    let field = |name: &str| {
        record
            .int(name)
            .ok_or_else(|| PipelineError::mismatch(format!("forecast row lacks integer `{name}`")))
    };
    let consumption = prediction
        .value()
        .ok_or_else(|| PipelineError::mismatch("regressor returned a class"))?;
    Ok(Forecast {
        year: field("Year")?,
        month: field("Month")?,
        day: field("Day")?,
        weekday: field("Weekday")?,
        consumption,
    })
}
