use indexmap::IndexMap;

use super::{
    encoding::{KeyMapping, OneHotEncoder},
    steps::{PipelineSpec, TransformStep},
    text::TextFeaturizer,
};
use crate::{
    errors::{PipelineError, PipelineResult},
    schema::{Record, Value},
};

/// Column data for a batch of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Raw or copied scalars.
    Values(Vec<Value>),
    /// Keys; `None` marks a value unseen while fitting.
    Keys(Vec<Option<u32>>),
    /// Fixed-width vectors.
    Vectors(Vec<Vec<f32>>),
}

impl Column {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Values(v) => v.len(),
            Self::Keys(k) => k.len(),
            Self::Vectors(v) => v.len(),
        }
    }

    /// Whether the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Column-oriented batch that transforms read from and write to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    rows: usize,
    columns: IndexMap<String, Column>,
}

impl Frame {
    /// Builds a frame holding the named fields of each record.
    ///
    /// A record lacking one of the fields is a [`PipelineError::SchemaMismatch`].
    pub fn from_records<S: AsRef<str>>(records: &[Record], fields: &[S]) -> PipelineResult<Self> {
        let mut columns = IndexMap::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            let values = records
                .iter()
                .enumerate()
                .map(|(row, record)| {
                    record.get(field).cloned().ok_or_else(|| {
                        PipelineError::mismatch(format!(
                            "record {row} is missing field `{field}` required by the pipeline"
                        ))
                    })
                })
                .collect::<PipelineResult<Vec<_>>>()?;
            columns.insert(field.to_string(), Column::Values(values));
        }
        Ok(Self {
            rows: records.len(),
            columns,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column lookup.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Column lookup failing with [`PipelineError::ColumnNotFound`].
    pub fn require(&self, name: &str, step: &str) -> PipelineResult<&Column> {
        self.column(name)
            .ok_or_else(|| PipelineError::not_found(name, step))
    }

    /// Adds or replaces a column.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> PipelineResult<()> {
        let name = name.into();
        if column.len() != self.rows {
            return Err(PipelineError::mismatch(format!(
                "column `{name}` has {} rows, frame has {}",
                column.len(),
                self.rows
            )));
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Scalars of a column, failing if it holds keys or vectors.
    pub fn values(&self, name: &str, step: &str) -> PipelineResult<&[Value]> {
        match self.require(name, step)? {
            Column::Values(values) => Ok(values),
            _ => Err(PipelineError::mismatch(format!(
                "{step} expects scalar values in `{name}`"
            ))),
        }
    }

    /// Keys of a column.
    pub fn keys(&self, name: &str, step: &str) -> PipelineResult<&[Option<u32>]> {
        match self.require(name, step)? {
            Column::Keys(keys) => Ok(keys),
            _ => Err(PipelineError::mismatch(format!(
                "{step} expects keys in `{name}`"
            ))),
        }
    }

    /// Vectors of a column.
    pub fn vectors(&self, name: &str, step: &str) -> PipelineResult<&[Vec<f32>]> {
        match self.require(name, step)? {
            Column::Vectors(vectors) => Ok(vectors),
            _ => Err(PipelineError::mismatch(format!(
                "{step} expects vectors in `{name}`"
            ))),
        }
    }
}

/// A transform with its fitted state.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedTransform {
    /// Fitted `map_value_to_key`.
    MapValueToKey {
        /// Source column.
        input: String,
        /// Key column.
        output: String,
        /// Learned dictionary.
        mapping: KeyMapping,
    },
    /// Fitted `one_hot_encode`.
    OneHotEncode {
        /// Source column.
        input: String,
        /// Vector column.
        output: String,
        /// Learned categories.
        encoder: OneHotEncoder,
    },
    /// Fitted `featurize_text`.
    FeaturizeText {
        /// Source column.
        input: String,
        /// Vector column.
        output: String,
        /// Learned vocabulary.
        featurizer: TextFeaturizer,
    },
    /// `concatenate` (stateless).
    Concatenate {
        /// Joined columns.
        inputs: Vec<String>,
        /// Vector column.
        output: String,
    },
    /// `copy_column` (stateless).
    CopyColumn {
        /// Source column.
        input: String,
        /// Copy.
        output: String,
    },
    /// `map_key_to_value` bound to the dictionary of its key domain.
    MapKeyToValue {
        /// Key column.
        input: String,
        /// Value column.
        output: String,
        /// Dictionary of the domain.
        mapping: KeyMapping,
    },
}

impl FittedTransform {
    /// Applies the transform to every row of the frame.
    pub fn apply(&self, frame: &mut Frame) -> PipelineResult<()> {
        match self {
            Self::MapValueToKey {
                input,
                output,
                mapping,
            } => {
                let keys = frame
                    .values(input, "map_value_to_key")?
                    .iter()
                    .map(|value| mapping.to_key(value))
                    .collect();
                frame.insert(output.clone(), Column::Keys(keys))
            }
            Self::OneHotEncode {
                input,
                output,
                encoder,
            } => {
                let vectors = frame
                    .values(input, "one_hot_encode")?
                    .iter()
                    .map(|value| encoder.encode(value))
                    .collect();
                frame.insert(output.clone(), Column::Vectors(vectors))
            }
            Self::FeaturizeText {
                input,
                output,
                featurizer,
            } => {
                let vectors = frame
                    .values(input, "featurize_text")?
                    .iter()
                    .map(|value| {
                        value.as_text().map(|text| featurizer.transform(text)).ok_or_else(|| {
                            PipelineError::mismatch(format!(
                                "featurize_text expects text in `{input}`, got {}",
                                value.kind()
                            ))
                        })
                    })
                    .collect::<PipelineResult<Vec<_>>>()?;
                frame.insert(output.clone(), Column::Vectors(vectors))
            }
            Self::Concatenate { inputs, output } => {
                let mut joined = vec![Vec::new(); frame.rows()];
                for input in inputs {
                    match frame.require(input, "concatenate")? {
                        Column::Vectors(vectors) => {
                            for (row, vector) in joined.iter_mut().zip(vectors) {
                                row.extend_from_slice(vector);
                            }
                        }
                        Column::Values(values) => {
                            for (row, value) in joined.iter_mut().zip(values) {
                                row.push(value.as_f32().ok_or_else(|| {
                                    PipelineError::mismatch(format!(
                                        "concatenate cannot use text column `{input}`"
                                    ))
                                })?);
                            }
                        }
                        Column::Keys(_) => {
                            return Err(PipelineError::mismatch(format!(
                                "concatenate cannot use key column `{input}`"
                            )))
                        }
                    }
                }
                frame.insert(output.clone(), Column::Vectors(joined))
            }
            Self::CopyColumn { input, output } => {
                let copy = frame.require(input, "copy_column")?.clone();
                frame.insert(output.clone(), copy)
            }
            Self::MapKeyToValue {
                input,
                output,
                mapping,
            } => {
                let values = frame
                    .keys(input, "map_key_to_value")?
                    .iter()
                    .map(|key| {
                        key.and_then(|key| mapping.to_value(key).cloned())
                            .ok_or_else(|| {
                                PipelineError::mismatch(format!(
                                    "`{input}` holds a key with no value in its domain"
                                ))
                            })
                    })
                    .collect::<PipelineResult<Vec<_>>>()?;
                frame.insert(output.clone(), Column::Values(values))
            }
        }
    }

    /// Output column.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::MapValueToKey { output, .. }
            | Self::OneHotEncode { output, .. }
            | Self::FeaturizeText { output, .. }
            | Self::Concatenate { output, .. }
            | Self::CopyColumn { output, .. }
            | Self::MapKeyToValue { output, .. } => output,
        }
    }

    /// Width of the produced vectors, for vector-valued transforms with a fixed width.
    #[must_use]
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::OneHotEncode { encoder, .. } => Some(encoder.cardinality()),
            Self::FeaturizeText { featurizer, .. } => Some(featurizer.width()),
            _ => None,
        }
    }
}

/// Dictionaries of every key domain fitted so far, by domain name.
pub type KeyDomains = IndexMap<String, KeyMapping>;

/// Fitted counterpart of a [`PipelineSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FittedPipeline {
    transforms: Vec<FittedTransform>,
}

impl FittedPipeline {
    /// Fits each step on the frame in order, transforming the frame as it goes.
    ///
    /// `domains` receives the dictionary of every `map_value_to_key` step and supplies the
    /// dictionaries `map_key_to_value` steps bind to.
    pub fn fit(
        spec: &PipelineSpec,
        frame: &mut Frame,
        domains: &mut KeyDomains,
    ) -> PipelineResult<Self> {
        let mut transforms = Vec::with_capacity(spec.steps().len());
        for step in spec.steps() {
            let fitted = fit_step(step, frame, domains)?;
            fitted.apply(frame)?;
            transforms.push(fitted);
        }
        Ok(Self { transforms })
    }

    /// Applies every transform.
    pub fn transform(&self, frame: &mut Frame) -> PipelineResult<()> {
        self.transforms
            .iter()
            .try_for_each(|transform| transform.apply(frame))
    }

    /// Applies only the transforms at the given indices, in order.
    pub fn transform_selected(&self, frame: &mut Frame, indices: &[usize]) -> PipelineResult<()> {
        indices
            .iter()
            .filter_map(|idx| self.transforms.get(*idx))
            .try_for_each(|transform| transform.apply(frame))
    }

    /// Fitted transforms in order.
    #[must_use]
    pub fn transforms(&self) -> &[FittedTransform] {
        &self.transforms
    }
}

fn fit_step(
    step: &TransformStep,
    frame: &Frame,
    domains: &mut KeyDomains,
) -> PipelineResult<FittedTransform> {
    let label = step.to_string();
    Ok(match step {
        TransformStep::MapValueToKey { input, output } => {
            let mapping = KeyMapping::fit(frame.values(input, &label)?);
            domains.insert(output.clone(), mapping.clone());
            FittedTransform::MapValueToKey {
                input: input.clone(),
                output: output.clone(),
                mapping,
            }
        }
        TransformStep::OneHotEncode { input, output } => FittedTransform::OneHotEncode {
            input: input.clone(),
            output: output.clone(),
            encoder: OneHotEncoder::fit(frame.values(input, &label)?),
        },
        TransformStep::FeaturizeText { input, output } => {
            let texts = frame
                .values(input, &label)?
                .iter()
                .filter_map(Value::as_text);
            FittedTransform::FeaturizeText {
                input: input.clone(),
                output: output.clone(),
                featurizer: TextFeaturizer::fit(texts),
            }
        }
        TransformStep::Concatenate { inputs, output } => FittedTransform::Concatenate {
            inputs: inputs.clone(),
            output: output.clone(),
        },
        TransformStep::CopyColumn { input, output } => {
            if let Some(domain) = domains.get(input).cloned() {
                domains.insert(output.clone(), domain);
            }
            FittedTransform::CopyColumn {
                input: input.clone(),
                output: output.clone(),
            }
        }
        TransformStep::MapKeyToValue { input, output } => {
            let mapping = domains
                .get(input)
                .cloned()
                .ok_or_else(|| PipelineError::not_found(input, label.clone()))?;
            FittedTransform::MapKeyToValue {
                input: input.clone(),
                output: output.clone(),
                mapping,
            }
        }
    })
}
