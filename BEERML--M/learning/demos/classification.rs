use std::{path::Path, time::Instant};

use serde_json::json;

use crate::{
    config::ClassificationConfig,
    errors::{PipelineError, PipelineResult},
    evaluation::evaluate_multiclass,
    loader::TextLoader,
    pipeline::PipelineSpec,
    predictor::{BatchPredictor, Prediction, TrainingPipeline, PREDICTED_LABEL},
    reporter::{ClassificationReport, DrinkPrediction, RunSummary},
    schema::{FieldDescriptor, FieldKind, Record, Schema},
    telemetry::LearningTelemetry,
    trainers::{MulticlassOptions, TrainerSpec},
};

/// Drinks predicted when the caller supplies none.
pub const DEFAULT_DRINKS: [&str; 10] = [
    "Weird Stout",
    "Folkes Röda IPA",
    "Fryken Havre Ale",
    "Barolo Gramolere",
    "Château de Lavison",
    "Korlat Cabernet Sauvignon",
    "Glengoyne 25 Years",
    "Oremus Late Harvest Tokaji Cuvée",
    "Izadi Blanco",
    "Ca'Montini Prosecco Extra Dry",
];

/// `FullName,Type,Country`.
pub fn drinks_schema() -> PipelineResult<Schema> {
    Schema::new(vec![
        FieldDescriptor::new("FullName", FieldKind::Text, 0),
        FieldDescriptor::new("Type", FieldKind::Text, 1),
        FieldDescriptor::new("Country", FieldKind::Text, 2),
    ])
}

/// Type label, featurized name and encoded country into a softmax classifier whose predicted
/// key is mapped back to the type string.
#[must_use]
pub fn drinks_pipeline(options: MulticlassOptions) -> TrainingPipeline {
    let features = PipelineSpec::builder()
        .map_value_to_key("Type", "Label")
        .featurize_text("FullName", "FullNameFeaturized")
        .one_hot_encode("Country", "CountryEncoded")
        .concatenate("Features", &["FullNameFeaturized", "CountryEncoded"])
        .build();
    TrainingPipeline::new(features, TrainerSpec::multiclass(options)).with_postprocess(
        PipelineSpec::builder()
            .map_key_to_value(PREDICTED_LABEL, PREDICTED_LABEL)
            .build(),
    )
}

/// Unlabeled record for a drink name.
#[must_use]
pub fn drink(name: &str) -> Record {
    Record::new()
        .with("FullName", name)
        .with("Type", "")
        .with("Country", "")
}

/// Trains on the configured file, predicts `names` and evaluates on the held-out file.
pub fn run(
    config: &ClassificationConfig,
    seed: u64,
    names: &[String],
    telemetry: &LearningTelemetry,
) -> PipelineResult<ClassificationReport> {
    let loader = TextLoader::new(drinks_schema()?);
    let train = loader.read(&config.train)?;
    telemetry.stage(
        "schema_loaded",
        json!({ "path": display(&config.train), "rows": train.len() }),
    );

    let pipeline = drinks_pipeline(config.trainer.clone());
    let columns = pipeline.validate(loader.schema())?;
    telemetry.stage(
        "pipeline_validated",
        json!({ "columns": columns.names().collect::<Vec<_>>() }),
    );

    telemetry.stage("training_start", json!({ "rows": train.len(), "seed": seed }));
    let watch = Instant::now();
    let model = pipeline.fit(&train, seed)?;
    let run = RunSummary::new(watch.elapsed().as_secs_f64(), train.len());
    let classes = model.classes();
    telemetry.stage(
        "training_complete",
        json!({ "seconds": run.training_seconds, "classes": classes }),
    );
    telemetry.announce(
        "beerml.classification.trained",
        json!({ "run_id": run.run_id, "rows": train.len(), "classes": classes.len() }),
    );

    let requests: Vec<Record> = names.iter().map(|name| drink(name)).collect();
    let predictions = BatchPredictor::new(&model)
        .run(requests)?
        .into_iter()
        .map(|(record, prediction)| to_drink(&record, prediction))
        .collect::<PipelineResult<Vec<_>>>()?;
    telemetry.stage(
        "batch_prediction_complete",
        json!({ "predictions": predictions.len() }),
    );

    let holdout = loader.read(&config.validate)?;
    let metrics = evaluate_multiclass(&model, &holdout)?;
    telemetry.stage(
        "evaluation_complete",
        json!({
            "path": display(&config.validate),
            "correct": metrics.correct,
            "total": metrics.total,
            "micro_accuracy": metrics.micro_accuracy,
        }),
    );
    telemetry.announce(
        "beerml.classification.evaluated",
        json!({ "run_id": run.run_id, "micro_accuracy": metrics.micro_accuracy }),
    );

    let report = ClassificationReport {
        run,
        classes,
        predictions,
        metrics,
    };
    telemetry.stage("run_complete", json!({ "summary": report.summary() }));
    Ok(report)
}

/// Default drink names as owned strings.
#[must_use]
pub fn default_drinks() -> Vec<String> {
    DEFAULT_DRINKS.iter().map(ToString::to_string).collect()
}

fn to_drink(record: &Record, prediction: Prediction) -> PipelineResult<DrinkPrediction> {
    let name = record.text("FullName").unwrap_or_default().to_string();
    match prediction {
        Prediction::Class { label, scores, .. } => Ok(DrinkPrediction {
            name,
            label,
            scores,
        }),
        Prediction::Value(_) => Err(PipelineError::mismatch("classifier returned a scalar")),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, rows: &[String]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut content = String::from("FullName,Type,Country\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn whisky_run_on_synthetic_files() {
        let dir = tempdir().unwrap();
        let mut rows = vec!["Glen Speyside 12,Whisky,Scotland".to_string()];
        for age in 10..40 {
            rows.push(format!("Glen Moray {age},Whisky,Scotland"));
        }
        for idx in 0..10 {
            rows.push(format!("Chateau Margaux {idx},Red wine,France"));
            rows.push(format!("\"Hoppy Pale Ale, batch {idx}\",Beer,Sweden"));
        }
        let train = write(dir.path(), "train.csv", &rows);
        let holdout = write(
            dir.path(),
            "validate.csv",
            &[
                "Glen Moray 18,Whisky,Scotland".to_string(),
                "Chateau Margaux 3,Red wine,France".to_string(),
            ],
        );
        let config = ClassificationConfig {
            train,
            validate: holdout,
            trainer: MulticlassOptions::default(),
        };
        let log_path = dir.path().join("classification.log");
        let telemetry = LearningTelemetry::builder("classification")
            .log_path(log_path.clone())
            .build()
            .unwrap();
        let report = run(&config, 0, &["Glen Speyside 12".to_string()], &telemetry).unwrap();
        let records = shared_logging::read_records(&log_path).unwrap();
        let last = records.last().unwrap();
        assert_eq!(last.message, "run_complete");
        assert_eq!(last.metadata["summary"], json!(report.summary()));
        assert_eq!(report.classes, vec!["Whisky", "Red wine", "Beer"]);
        assert_eq!(report.predictions[0].label, "Whisky");
        assert_eq!(report.predictions[0].scores.len(), 3);
        assert_eq!(report.metrics.total, 2);
        assert_eq!(report.run.training_rows, 51);
    }

    #[test]
    fn empty_holdout_fails_the_run() {
        let dir = tempdir().unwrap();
        let rows: Vec<String> = (0..5)
            .flat_map(|idx| {
                [
                    format!("Glen Moray {idx},Whisky,Scotland"),
                    format!("Weird Stout {idx},Beer,Sweden"),
                ]
            })
            .collect();
        let config = ClassificationConfig {
            train: write(dir.path(), "train.csv", &rows),
            validate: write(dir.path(), "validate.csv", &[]),
            trainer: MulticlassOptions::default(),
        };
        let err = run(&config, 0, &[], &LearningTelemetry::disabled("classification")).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset(_)));
    }

    #[test]
    fn bundled_dataset_predicts_every_default_drink() {
        let config = RunConfig::default();
        let report = run(
            &config.classification,
            config.seed,
            &default_drinks(),
            &LearningTelemetry::disabled("classification"),
        )
        .unwrap();
        assert_eq!(report.predictions.len(), DEFAULT_DRINKS.len());
        for (prediction, name) in report.predictions.iter().zip(DEFAULT_DRINKS) {
            assert_eq!(prediction.name, name);
            assert!(report.classes.contains(&prediction.label));
            assert!((prediction.scores.iter().sum::<f32>() - 1.0).abs() < 1e-3);
        }
        assert!(report.metrics.micro_accuracy > 0.5);
    }
}
