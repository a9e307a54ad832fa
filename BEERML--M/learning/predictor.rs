use serde::{Deserialize, Serialize};

use crate::{
    errors::{PipelineError, PipelineResult},
    loader::Dataset,
    pipeline::{
        Column, ColumnKind, ColumnTypes, FittedPipeline, Frame, KeyDomains, KeyMapping,
        PipelineSpec,
    },
    schema::{FieldKind, Record, Schema},
    trainers::{
        FeatureMatrix, MulticlassModel, MulticlassTrainer, PoissonModel, PoissonTrainer,
        TrainerSpec,
    },
};

/// Column the trainer writes the predicted key to.
pub const PREDICTED_LABEL: &str = "PredictedLabel";
/// Column the trainer writes scores (classification) or the estimate (regression) to.
pub const SCORE: &str = "Score";

/// Feature steps, a trainer and optional post-prediction steps, validated together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPipeline {
    /// Feature engineering applied before the trainer.
    pub features: PipelineSpec,
    /// Trainer and the columns it binds to.
    pub trainer: TrainerSpec,
    /// Steps applied to the trainer outputs (e.g. `map_key_to_value(PredictedLabel)`).
    #[serde(default)]
    pub postprocess: PipelineSpec,
}

impl TrainingPipeline {
    /// Assembles a pipeline without post-processing.
    #[must_use]
    pub fn new(features: PipelineSpec, trainer: TrainerSpec) -> Self {
        Self {
            features,
            trainer,
            postprocess: PipelineSpec::default(),
        }
    }

    /// Adds post-prediction steps.
    #[must_use]
    pub fn with_postprocess(mut self, postprocess: PipelineSpec) -> Self {
        self.postprocess = postprocess;
        self
    }

    /// Checks trainer options and every column reference and kind before any fitting; returns the final columns.
    pub fn validate(&self, schema: &Schema) -> PipelineResult<ColumnTypes> {
        self.trainer.check_options()?;
        let mut columns = self.features.validate(schema)?;
        let step = self.trainer.name();
        let features = self.trainer.features();
        match columns.require(features, step)? {
            ColumnKind::Vector => {}
            other => {
                return Err(PipelineError::ColumnKind {
                    column: features.to_string(),
                    step: step.to_string(),
                    expected: "a vector column".into(),
                    found: other.to_string(),
                })
            }
        }
        let label = self.trainer.label();
        let label_kind = columns.require(label, step)?.clone();
        match (&self.trainer, &label_kind) {
            (TrainerSpec::Multiclass { .. }, ColumnKind::Key { .. }) => {
                columns.insert(PREDICTED_LABEL, label_kind.clone());
                columns.insert(SCORE, ColumnKind::Vector);
            }
            (TrainerSpec::Poisson { .. }, ColumnKind::Scalar(FieldKind::Int32 | FieldKind::Float32)) => {
                columns.insert(SCORE, ColumnKind::Scalar(FieldKind::Float32));
            }
            (TrainerSpec::Multiclass { .. }, other) => {
                return Err(kind_error(label, step, "a key column", other))
            }
            (TrainerSpec::Poisson { .. }, other) => {
                return Err(kind_error(label, step, "a numeric column", other))
            }
        }
        columns.apply(self.postprocess.steps())?;
        Ok(columns)
    }

    /// Validates, fits the feature steps, trains, and binds everything into a [`TrainedModel`].
    pub fn fit(&self, dataset: &Dataset, seed: u64) -> PipelineResult<TrainedModel> {
        self.validate(&dataset.schema)?;
        if dataset.is_empty() {
            return Err(PipelineError::EmptyDataset(dataset.name.clone()));
        }
        let field_names: Vec<&str> = dataset
            .schema
            .fields()
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        let mut frame = Frame::from_records(&dataset.records, &field_names)?;
        let mut domains = KeyDomains::new();
        let features = FittedPipeline::fit(&self.features, &mut frame, &mut domains)?;

        let matrix = FeatureMatrix::from_rows(frame.vectors(self.trainer.features(), "trainer")?)?;
        let predictor = match &self.trainer {
            TrainerSpec::Multiclass { label, options, .. } => {
                let keys = frame.keys(label, "trainer")?;
                let labels = keys
                    .iter()
                    .map(|key| key.ok_or_else(|| PipelineError::mismatch("training label without key")))
                    .collect::<PipelineResult<Vec<u32>>>()?;
                let domain = domains
                    .get(label.as_str())
                    .cloned()
                    .ok_or_else(|| PipelineError::not_found(label, "label key domain"))?;
                let model = MulticlassTrainer::new(options.clone(), seed).fit(
                    &matrix,
                    &labels,
                    domain.len(),
                )?;
                domains.insert(PREDICTED_LABEL.to_string(), domain.clone());
                FittedPredictor::Multiclass {
                    model,
                    classes: domain,
                }
            }
            TrainerSpec::Poisson { label, options, .. } => {
                let labels = frame
                    .values(label, "trainer")?
                    .iter()
                    .map(|value| {
                        value
                            .as_f32()
                            .ok_or_else(|| PipelineError::mismatch("regression label is not numeric"))
                    })
                    .collect::<PipelineResult<Vec<f32>>>()?;
                FittedPredictor::Poisson(PoissonTrainer::new(options.clone(), seed).fit(&matrix, &labels)?)
            }
        };

        predictor.score(&mut frame, self.trainer.features())?;
        let postprocess = FittedPipeline::fit(&self.postprocess, &mut frame, &mut domains)?;

        let (prediction_steps, required_fields) =
            self.features.dependencies(&[self.trainer.features()]);
        Ok(TrainedModel {
            schema: dataset.schema.clone(),
            features,
            feature_column: self.trainer.features().to_string(),
            label_column: self.trainer.label().to_string(),
            predictor,
            postprocess,
            prediction_steps,
            required_fields,
        })
    }
}

fn kind_error(column: &str, step: &str, expected: &str, found: &ColumnKind) -> PipelineError {
    PipelineError::ColumnKind {
        column: column.to_string(),
        step: step.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// Trained model variant.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedPredictor {
    /// Classifier with the label dictionary its score indices refer to.
    Multiclass {
        /// Weights.
        model: MulticlassModel,
        /// Label dictionary; score index `k` is `classes.to_value(k)`.
        classes: KeyMapping,
    },
    /// Count regressor.
    Poisson(PoissonModel),
}

impl FittedPredictor {
    /// Writes trainer outputs for every row of the frame.
    fn score(&self, frame: &mut Frame, features: &str) -> PipelineResult<()> {
        let vectors = frame.vectors(features, "predictor")?;
        match self {
            Self::Multiclass { model, .. } => {
                let (keys, scores): (Vec<_>, Vec<_>) = vectors
                    .iter()
                    .map(|row| model.predict(row))
                    .collect::<PipelineResult<Vec<_>>>()?
                    .into_iter()
                    .map(|(key, scores)| (Some(key), scores))
                    .unzip();
                frame.insert(PREDICTED_LABEL, Column::Keys(keys))?;
                frame.insert(SCORE, Column::Vectors(scores))
            }
            Self::Poisson(model) => {
                let values = vectors
                    .iter()
                    .map(|row| model.predict(row).map(Into::into))
                    .collect::<PipelineResult<Vec<_>>>()?;
                frame.insert(SCORE, Column::Values(values))
            }
        }
    }
}

/// Output for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prediction {
    /// Classification result.
    Class {
        /// Predicted label key.
        key: u32,
        /// Predicted label value.
        label: String,
        /// Probability per class, indexed by label key.
        scores: Vec<f32>,
    },
    /// Regression estimate (non-negative).
    Value(f32),
}

impl Prediction {
    /// Predicted label, for classification.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Class { label, .. } => Some(label),
            Self::Value(_) => None,
        }
    }

    /// Estimate, for regression.
    #[must_use]
    pub const fn value(&self) -> Option<f32> {
        match self {
            Self::Class { .. } => None,
            Self::Value(value) => Some(*value),
        }
    }
}

/// Everything fitted during training, bound together for prediction and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    schema: Schema,
    features: FittedPipeline,
    feature_column: String,
    label_column: String,
    predictor: FittedPredictor,
    postprocess: FittedPipeline,
    prediction_steps: Vec<usize>,
    required_fields: Vec<String>,
}

impl TrainedModel {
    /// Schema of the training data.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Raw fields a record must carry to be predicted.
    #[must_use]
    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Trained predictor.
    #[must_use]
    pub fn predictor(&self) -> &FittedPredictor {
        &self.predictor
    }

    /// Fitted feature steps.
    #[must_use]
    pub fn feature_pipeline(&self) -> &FittedPipeline {
        &self.features
    }

    /// Class labels in score order (empty for regression).
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        match &self.predictor {
            FittedPredictor::Multiclass { classes, .. } => {
                classes.values().map(ToString::to_string).collect()
            }
            FittedPredictor::Poisson(_) => Vec::new(),
        }
    }

    /// Runs the bound feature steps, the model and the post steps over unlabeled records.
    fn predict_frame(&self, records: &[Record]) -> PipelineResult<Frame> {
        for record in records {
            self.schema.check_fields(record, &self.required_fields)?;
        }
        let mut frame = Frame::from_records(records, &self.required_fields)?;
        self.features
            .transform_selected(&mut frame, &self.prediction_steps)?;
        self.predictor.score(&mut frame, &self.feature_column)?;
        self.postprocess.transform(&mut frame)?;
        Ok(frame)
    }

    /// Runs every feature step (labels included) and the model over labeled records.
    pub(crate) fn score_labeled(&self, records: &[Record]) -> PipelineResult<Frame> {
        let names: Vec<&str> = self
            .schema
            .fields()
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        for record in records {
            self.schema.check_fields(record, &names)?;
        }
        let mut frame = Frame::from_records(records, &names)?;
        self.features.transform(&mut frame)?;
        self.predictor.score(&mut frame, &self.feature_column)?;
        Ok(frame)
    }

    /// Label column name.
    #[must_use]
    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    /// Predicts one record.
    pub fn predict(&self, record: &Record) -> PipelineResult<Prediction> {
        let mut predictions = self.predict_batch(std::slice::from_ref(record))?;
        predictions
            .pop()
            .ok_or_else(|| PipelineError::EmptyDataset("prediction batch".into()))
    }

    /// Predicts every record, returning predictions in input order.
    pub fn predict_batch(&self, records: &[Record]) -> PipelineResult<Vec<Prediction>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let frame = self.predict_frame(records)?;
        match &self.predictor {
            FittedPredictor::Multiclass { classes, .. } => {
                let keys = frame.keys(PREDICTED_LABEL, "predictor")
                    .map(<[Option<u32>]>::to_vec)
                    .or_else(|_| {
                        frame.values(PREDICTED_LABEL, "predictor").map(|values| {
                            values.iter().map(|value| classes.to_key(value)).collect()
                        })
                    })?;
                let scores = frame.vectors(SCORE, "predictor")?;
                keys.into_iter()
                    .zip(scores)
                    .map(|(key, scores)| {
                        let key = key.ok_or_else(|| {
                            PipelineError::mismatch("prediction without a label key")
                        })?;
                        let label = classes
                            .to_value(key)
                            .map(ToString::to_string)
                            .ok_or_else(|| PipelineError::mismatch("prediction key outside label domain"))?;
                        Ok(Prediction::Class {
                            key,
                            label,
                            scores: scores.clone(),
                        })
                    })
                    .collect()
            }
            FittedPredictor::Poisson(_) => frame
                .values(SCORE, "predictor")?
                .iter()
                .map(|value| {
                    value
                        .as_f32()
                        .map(Prediction::Value)
                        .ok_or_else(|| PipelineError::mismatch("regression score is not numeric"))
                })
                .collect(),
        }
    }
}

/// Applies a trained model to a finite sequence of records.
#[derive(Debug, Clone, Copy)]
pub struct BatchPredictor<'a> {
    model: &'a TrainedModel,
}

impl<'a> BatchPredictor<'a> {
    /// Binds a predictor to a model.
    #[must_use]
    pub const fn new(model: &'a TrainedModel) -> Self {
        Self { model }
    }

    /// Predicts every record, pairing each with its prediction in input order.
    pub fn run(&self, records: Vec<Record>) -> PipelineResult<Vec<(Record, Prediction)>> {
        let predictions = self.model.predict_batch(&records)?;
        Ok(records.into_iter().zip(predictions).collect())
    }

    /// Predicts every record of a dataset.
    pub fn run_dataset(&self, dataset: Dataset) -> PipelineResult<Vec<(Record, Prediction)>> {
        self.run(dataset.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{FieldDescriptor, Value},
        trainers::{MulticlassOptions, PoissonOptions},
    };

    fn drinks_schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor::new("FullName", FieldKind::Text, 0),
            FieldDescriptor::new("Type", FieldKind::Text, 1),
            FieldDescriptor::new("Country", FieldKind::Text, 2),
        ])
        .unwrap()
    }

    fn drink(name: &str, kind: &str, country: &str) -> Record {
        Record::new()
            .with("FullName", name)
            .with("Type", kind)
            .with("Country", country)
    }

    fn drinks_pipeline() -> TrainingPipeline {
        TrainingPipeline::new(
            PipelineSpec::builder()
                .map_value_to_key("Type", "Label")
                .featurize_text("FullName", "FullNameFeaturized")
                .one_hot_encode("Country", "CountryEncoded")
                .concatenate("Features", &["FullNameFeaturized", "CountryEncoded"])
                .build(),
            TrainerSpec::multiclass(MulticlassOptions::default()),
        )
        .with_postprocess(
            PipelineSpec::builder()
                .map_key_to_value(PREDICTED_LABEL, PREDICTED_LABEL)
                .build(),
        )
    }

    fn whisky_training_set() -> Dataset {
        let mut records = vec![drink("Glen Speyside 12", "Whisky", "Scotland")];
        for age in 0..30 {
            records.push(drink(&format!("Glen Moray {}", age + 10), "Whisky", "Scotland"));
        }
        for idx in 0..10 {
            records.push(drink(&format!("Chateau Margaux {idx}"), "Red wine", "France"));
            records.push(drink(&format!("Hoppy Pale Ale {idx}"), "Beer", "Sweden"));
        }
        Dataset::from_records("whisky", drinks_schema(), records).unwrap()
    }

    #[test]
    fn known_whisky_is_predicted_with_normalised_scores() {
        let model = drinks_pipeline().fit(&whisky_training_set(), 0).unwrap();
        let prediction = model.predict(&drink("Glen Speyside 12", "", "")).unwrap();
        let Prediction::Class { label, scores, .. } = prediction else {
            panic!("expected a class prediction");
        };
        assert_eq!(label, "Whisky");
        assert_eq!(scores.len(), 3);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(model.classes(), vec!["Whisky", "Red wine", "Beer"]);
    }

    #[test]
    fn batch_preserves_input_order() {
        let model = drinks_pipeline().fit(&whisky_training_set(), 0).unwrap();
        let inputs = vec![
            drink("Hoppy Pale Ale 3", "", ""),
            drink("Glen Moray 15", "", ""),
            drink("Chateau Margaux 2", "", ""),
        ];
        let outputs = BatchPredictor::new(&model).run(inputs.clone()).unwrap();
        let names: Vec<_> = outputs.iter().map(|(r, _)| r.text("FullName").unwrap()).collect();
        assert_eq!(names, vec!["Hoppy Pale Ale 3", "Glen Moray 15", "Chateau Margaux 2"]);
        let labels: Vec<_> = outputs.iter().map(|(_, p)| p.label().unwrap()).collect();
        assert_eq!(labels, vec!["Beer", "Whisky", "Red wine"]);
        for (record, (_, batched)) in inputs.iter().zip(&outputs) {
            assert_eq!(&model.predict(record).unwrap(), batched);
        }
    }

    #[test]
    fn prediction_does_not_need_the_label_field() {
        let model = drinks_pipeline().fit(&whisky_training_set(), 0).unwrap();
        assert_eq!(model.required_fields(), &["Country", "FullName"]);
        let unlabeled = Record::new()
            .with("FullName", "Glen Moray 12")
            .with("Country", "");
        assert_eq!(model.predict(&unlabeled).unwrap().label(), Some("Whisky"));
        let missing = Record::new().with("FullName", "Glen Moray 12");
        assert!(matches!(
            model.predict(&missing),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn refitting_with_same_seed_is_identical() {
        let data = whisky_training_set();
        let a = drinks_pipeline().fit(&data, 0).unwrap();
        let b = drinks_pipeline().fit(&data, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn validation_catches_bad_trainer_bindings() {
        let pipeline = TrainingPipeline::new(
            PipelineSpec::builder()
                .featurize_text("FullName", "Features")
                .build(),
            TrainerSpec::multiclass(MulticlassOptions::default()),
        );
        assert!(matches!(
            pipeline.validate(&drinks_schema()),
            Err(PipelineError::ColumnNotFound { ref column, .. }) if column == "Label"
        ));
        let pipeline = TrainingPipeline::new(
            PipelineSpec::builder()
                .featurize_text("FullName", "Features")
                .build(),
            TrainerSpec::Multiclass {
                features: "Features".into(),
                label: "Type".into(),
                options: MulticlassOptions::default(),
            },
        );
        assert!(matches!(
            pipeline.validate(&drinks_schema()),
            Err(PipelineError::ColumnKind { .. })
        ));
    }

    fn monthly_consumption() -> Dataset {
        let schema = Schema::new(vec![
            FieldDescriptor::new("Month", FieldKind::Int32, 0),
            FieldDescriptor::new("Consumption", FieldKind::Float32, 1),
        ])
        .unwrap();
        let records = (0..24)
            .map(|idx| {
                let month = idx % 12 + 1;
                #[allow(clippy::cast_precision_loss)]
                let consumption = (month * 10) as f32;
                Record::new().with("Month", month).with("Consumption", consumption)
            })
            .collect();
        Dataset::from_records("consumption", schema, records).unwrap()
    }

    fn monthly_pipeline(options: PoissonOptions) -> TrainingPipeline {
        TrainingPipeline::new(
            PipelineSpec::builder()
                .copy_column("Consumption", "Label")
                .one_hot_encode("Month", "MonthEncoded")
                .concatenate("Features", &["MonthEncoded"])
                .build(),
            TrainerSpec::poisson(options),
        )
    }

    #[test]
    fn poisson_pipeline_predicts_non_negative_counts() {
        let model = monthly_pipeline(PoissonOptions::default())
            .fit(&monthly_consumption(), 0)
            .unwrap();
        assert_eq!(model.required_fields(), &["Month"]);
        let unseen = Record::new().with("Month", 13);
        let value = model.predict(&unseen).unwrap().value().unwrap();
        assert!(value >= 0.0);
        let july = model.predict(&Record::new().with("Month", 7)).unwrap().value().unwrap();
        let january = model.predict(&Record::new().with("Month", 1)).unwrap().value().unwrap();
        assert!(july > january);
    }

    #[test]
    fn mistyped_fields_are_schema_mismatches() {
        let data = monthly_consumption();
        let model = monthly_pipeline(PoissonOptions::default()).fit(&data, 0).unwrap();
        for month in [Value::from("July"), Value::from("7"), Value::Float32(7.0)] {
            let record = Record::new().with("Month", month);
            assert!(matches!(
                model.predict(&record),
                Err(PipelineError::SchemaMismatch { .. })
            ));
        }
        let mut labeled = data.records.clone();
        labeled[3] = Record::new().with("Month", 4).with("Consumption", 40);
        assert!(matches!(
            model.score_labeled(&labeled),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn invalid_trainer_options_fail_instead_of_panicking() {
        let options = PoissonOptions {
            max_delta_step: -1.0,
            ..PoissonOptions::default()
        };
        assert!(matches!(
            monthly_pipeline(options).fit(&monthly_consumption(), 0),
            Err(PipelineError::InvalidConfig(_))
        ));
        let options = MulticlassOptions {
            l2: -1.0,
            ..MulticlassOptions::default()
        };
        let pipeline = TrainingPipeline {
            trainer: TrainerSpec::multiclass(options),
            ..drinks_pipeline()
        };
        assert!(matches!(
            pipeline.fit(&whisky_training_set(), 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn negative_regression_targets_abort_fitting() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("Month", FieldKind::Int32, 0),
            FieldDescriptor::new("Consumption", FieldKind::Float32, 1),
        ])
        .unwrap();
        let records = vec![
            Record::new().with("Month", 1).with("Consumption", 3.0f32),
            Record::new().with("Month", 2).with("Consumption", -1.0f32),
        ];
        let data = Dataset::from_records("bad", schema, records).unwrap();
        let pipeline = TrainingPipeline::new(
            PipelineSpec::builder()
                .one_hot_encode("Month", "Features")
                .build(),
            TrainerSpec::Poisson {
                features: "Features".into(),
                label: "Consumption".into(),
                options: PoissonOptions::default(),
            },
        );
        assert!(matches!(
            pipeline.fit(&data, 0),
            Err(PipelineError::NegativeTarget { row: 1, .. })
        ));
    }
}
