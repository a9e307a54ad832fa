#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! BeerML learning stack: schema-driven CSV loading, declarative feature pipelines, linear
//! trainers, batch prediction and evaluation.

/// Error type shared by every stage.
#[path = "../errors.rs"]
pub mod errors;

/// Schema descriptors, typed values and records.
#[path = "../schema.rs"]
pub mod schema;

/// Delimited-text loading.
#[path = "../loader.rs"]
pub mod loader;

/// Feature pipeline steps and fitted transforms.
#[path = "../pipeline/main.rs"]
pub mod pipeline;

/// Multiclass and Poisson trainers.
#[path = "../trainers/main.rs"]
pub mod trainers;

/// Training pipelines, fitted models and batch prediction.
#[path = "../predictor.rs"]
pub mod predictor;

/// Held-out metrics.
#[path = "../evaluation.rs"]
pub mod evaluation;

/// Structured run reports and forecast output.
#[path = "../reporter.rs"]
pub mod reporter;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// TOML run configuration.
#[path = "../config.rs"]
pub mod config;

/// End-to-end demos.
#[path = "../demos/main.rs"]
pub mod demos;

pub use config::RunConfig;
pub use errors::{PipelineError, PipelineResult};
pub use evaluation::{evaluate_multiclass, evaluate_regression, MulticlassMetrics, RegressionMetrics};
pub use loader::{Dataset, TextLoader};
pub use pipeline::{PipelineBuilder, PipelineSpec, TransformStep};
pub use predictor::{BatchPredictor, Prediction, TrainedModel, TrainingPipeline};
pub use reporter::{write_forecast, ClassificationReport, Forecast, RegressionReport};
pub use schema::{FieldDescriptor, FieldKind, Record, Schema, Value};
pub use telemetry::{LearningTelemetry, LearningTelemetryBuilder};
pub use trainers::{MulticlassOptions, PoissonOptions, TrainerSpec};
