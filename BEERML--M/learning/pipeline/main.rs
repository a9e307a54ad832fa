//! Feature pipelines: step descriptors, static validation and fitted transforms.

/// Key dictionaries and one-hot encoding.
pub mod encoding;
/// Column-oriented batches and fitted transforms.
pub mod frame;
/// Step descriptors, builder and column-kind validation.
pub mod steps;
/// Text featurization.
pub mod text;

pub use encoding::{KeyMapping, OneHotEncoder};
pub use frame::{Column, FittedPipeline, FittedTransform, Frame, KeyDomains};
pub use steps::{ColumnKind, ColumnTypes, PipelineBuilder, PipelineSpec, TransformStep};
pub use text::TextFeaturizer;
