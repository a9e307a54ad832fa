use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{PipelineError, PipelineResult},
    schema::{FieldKind, Schema},
};

/// Kind of a column flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Raw scalar read from the file.
    Scalar(FieldKind),
    /// Integer key produced by `map_value_to_key`.
    Key {
        /// Output column of the `map_value_to_key` step that owns the mapping.
        domain: String,
        /// Kind of the values the keys stand for.
        value_kind: FieldKind,
    },
    /// Fixed-width numeric vector.
    Vector,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "{kind}"),
            Self::Key { domain, .. } => write!(f, "key<{domain}>"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// One transform in a feature pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformStep {
    /// Assigns a stable integer key per distinct value, in first-seen order.
    MapValueToKey {
        /// Source column.
        input: String,
        /// Key column.
        output: String,
    },
    /// Indicator vector over the categories seen while fitting.
    OneHotEncode {
        /// Source column.
        input: String,
        /// Vector column.
        output: String,
    },
    /// Token-statistics vector for a text column.
    FeaturizeText {
        /// Source text column.
        input: String,
        /// Vector column.
        output: String,
    },
    /// Ordered concatenation of vector or numeric columns.
    Concatenate {
        /// Columns joined in this order.
        inputs: Vec<String>,
        /// Vector column.
        output: String,
    },
    /// Duplicates a column under a new name.
    CopyColumn {
        /// Source column.
        input: String,
        /// Copy.
        output: String,
    },
    /// Turns keys back into the values they were assigned from.
    MapKeyToValue {
        /// Key column.
        input: String,
        /// Value column.
        output: String,
    },
}

impl TransformStep {
    /// Columns read by this step.
    #[must_use]
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Concatenate { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            Self::MapValueToKey { input, .. }
            | Self::OneHotEncode { input, .. }
            | Self::FeaturizeText { input, .. }
            | Self::CopyColumn { input, .. }
            | Self::MapKeyToValue { input, .. } => vec![input.as_str()],
        }
    }

    /// Column written by this step.
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

    /// Operation name.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::MapValueToKey { .. } => "map_value_to_key",
            Self::OneHotEncode { .. } => "one_hot_encode",
            Self::FeaturizeText { .. } => "featurize_text",
            Self::Concatenate { .. } => "concatenate",
            Self::CopyColumn { .. } => "copy_column",
            Self::MapKeyToValue { .. } => "map_key_to_value",
        }
    }

    /// Kind of the output column given the current column kinds.
    fn resolve(&self, columns: &IndexMap<String, ColumnKind>) -> PipelineResult<ColumnKind> {
        let label = self.to_string();
        let lookup = |name: &str| {
            columns
                .get(name)
                .ok_or_else(|| PipelineError::not_found(name, label.clone()))
        };
        let reject = |name: &str, expected: &str, found: &ColumnKind| PipelineError::ColumnKind {
            column: name.to_string(),
            step: label.clone(),
            expected: expected.to_string(),
            found: found.to_string(),
        };
        match self {
            Self::MapValueToKey { input, output } => match lookup(input.as_str())? {
                ColumnKind::Scalar(kind) => Ok(ColumnKind::Key {
                    domain: output.clone(),
                    value_kind: *kind,
                }),
                other => Err(reject(input.as_str(), "a scalar column", other)),
            },
            Self::OneHotEncode { input, .. } => match lookup(input.as_str())? {
                ColumnKind::Scalar(_) => Ok(ColumnKind::Vector),
                other => Err(reject(input.as_str(), "a scalar column", other)),
            },
            Self::FeaturizeText { input, .. } => match lookup(input.as_str())? {
                ColumnKind::Scalar(FieldKind::Text) => Ok(ColumnKind::Vector),
                other => Err(reject(input.as_str(), "a text column", other)),
            },
            Self::Concatenate { inputs, .. } => {
                if inputs.is_empty() {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{label} needs at least one input column"
                    )));
                }
                for input in inputs {
                    match lookup(input.as_str())? {
                        ColumnKind::Vector
                        | ColumnKind::Scalar(FieldKind::Int32 | FieldKind::Float32) => {}
                        other => return Err(reject(input.as_str(), "a vector or numeric column", other)),
                    }
                }
                Ok(ColumnKind::Vector)
            }
            Self::CopyColumn { input, .. } => lookup(input.as_str()).cloned(),
            Self::MapKeyToValue { input, .. } => match lookup(input.as_str())? {
                ColumnKind::Key { value_kind, .. } => Ok(ColumnKind::Scalar(*value_kind)),
                other => Err(reject(input.as_str(), "a key column", other)),
            },
        }
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) -> {}",
            self.op(),
            self.inputs().join(", "),
            self.output()
        )
    }
}

/// Column kinds available at some point of a pipeline, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypes {
    columns: IndexMap<String, ColumnKind>,
}

impl ColumnTypes {
    /// Raw columns of a schema.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            columns: schema
                .fields()
                .iter()
                .map(|field| (field.name.clone(), ColumnKind::Scalar(field.kind)))
                .collect(),
        }
    }

    /// Kind of a column, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ColumnKind> {
        self.columns.get(name)
    }

    /// Looks a column up, failing with [`PipelineError::ColumnNotFound`].
    pub fn require(&self, name: &str, step: &str) -> PipelineResult<&ColumnKind> {
        self.get(name)
            .ok_or_else(|| PipelineError::not_found(name, step))
    }

    /// Adds or shadows a column.
    pub fn insert(&mut self, name: impl Into<String>, kind: ColumnKind) {
        self.columns.insert(name.into(), kind);
    }

    /// Applies the steps in order, rejecting forward references and kind errors.
    pub fn apply(&mut self, steps: &[TransformStep]) -> PipelineResult<()> {
        for step in steps {
            let kind = step.resolve(&self.columns)?;
            self.columns.insert(step.output().to_string(), kind);
        }
        Ok(())
    }

    /// Column names in creation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Ordered, side-effect-free list of transform steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    steps: Vec<TransformStep>,
}

impl PipelineSpec {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Wraps an explicit step list.
    #[must_use]
    pub fn from_steps(steps: Vec<TransformStep>) -> Self {
        Self { steps }
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Validates the steps against a schema and returns the resulting column kinds.
    pub fn validate(&self, schema: &Schema) -> PipelineResult<ColumnTypes> {
        let mut columns = ColumnTypes::from_schema(schema);
        columns.apply(&self.steps)?;
        Ok(columns)
    }

    /// Indices of the steps needed to produce `targets`, and the raw columns those steps read.
    ///
    /// Walks the steps backwards so that shadowed outputs resolve to their last writer.
    #[must_use]
    pub fn dependencies(&self, targets: &[&str]) -> (Vec<usize>, Vec<String>) {
        let mut needed: Vec<String> = targets.iter().map(ToString::to_string).collect();
        let mut selected = Vec::new();
        for (idx, step) in self.steps.iter().enumerate().rev() {
            if let Some(pos) = needed.iter().position(|name| name == step.output()) {
                needed.swap_remove(pos);
                selected.push(idx);
                for input in step.inputs() {
                    if !needed.iter().any(|name| name == input) {
                        needed.push(input.to_string());
                    }
                }
            }
        }
        selected.reverse();
        needed.sort();
        (selected, needed)
    }
}

/// Fluent builder for a [`PipelineSpec`]. Nothing is fitted until the spec is handed to a trainer.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    steps: Vec<TransformStep>,
}

impl PipelineBuilder {
    /// Appends `map_value_to_key(input) -> output`.
    #[must_use]
    pub fn map_value_to_key(mut self, input: &str, output: &str) -> Self {
        self.steps.push(TransformStep::MapValueToKey {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// Appends `one_hot_encode(input) -> output`.
    #[must_use]
    pub fn one_hot_encode(mut self, input: &str, output: &str) -> Self {
        self.steps.push(TransformStep::OneHotEncode {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// Appends `featurize_text(input) -> output`.
    #[must_use]
    pub fn featurize_text(mut self, input: &str, output: &str) -> Self {
        self.steps.push(TransformStep::FeaturizeText {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// Appends `concatenate(inputs...) -> output`.
    #[must_use]
    pub fn concatenate(mut self, output: &str, inputs: &[&str]) -> Self {
        self.steps.push(TransformStep::Concatenate {
            inputs: inputs.iter().map(ToString::to_string).collect(),
            output: output.into(),
        });
        self
    }

    /// Appends `copy_column(input) -> output`.
    #[must_use]
    pub fn copy_column(mut self, input: &str, output: &str) -> Self {
        self.steps.push(TransformStep::CopyColumn {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// Appends `map_key_to_value(input) -> output`.
    #[must_use]
    pub fn map_key_to_value(mut self, input: &str, output: &str) -> Self {
        self.steps.push(TransformStep::MapKeyToValue {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    /// Finishes the list.
    #[must_use]
    pub fn build(self) -> PipelineSpec {
        PipelineSpec { steps: self.steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;

    fn drinks() -> Schema {
        Schema::new(vec![
            FieldDescriptor::new("FullName", FieldKind::Text, 0),
            FieldDescriptor::new("Type", FieldKind::Text, 1),
            FieldDescriptor::new("Country", FieldKind::Text, 2),
        ])
        .unwrap()
    }

    fn drinks_pipeline() -> PipelineSpec {
        PipelineSpec::builder()
            .map_value_to_key("Type", "Label")
            .featurize_text("FullName", "FullNameFeaturized")
            .one_hot_encode("Country", "CountryEncoded")
            .concatenate("Features", &["FullNameFeaturized", "CountryEncoded"])
            .build()
    }

    #[test]
    fn valid_pipeline_produces_expected_kinds() {
        let columns = drinks_pipeline().validate(&drinks()).unwrap();
        assert_eq!(columns.get("Features"), Some(&ColumnKind::Vector));
        assert_eq!(
            columns.get("Label"),
            Some(&ColumnKind::Key {
                domain: "Label".into(),
                value_kind: FieldKind::Text
            })
        );
    }

    #[test]
    fn forward_reference_is_column_not_found() {
        let spec = PipelineSpec::builder()
            .concatenate("Features", &["CountryEncoded"])
            .one_hot_encode("Country", "CountryEncoded")
            .build();
        let err = spec.validate(&drinks()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ColumnNotFound { ref column, .. } if column == "CountryEncoded"
        ));
    }

    #[test]
    fn concatenating_text_is_rejected() {
        let spec = PipelineSpec::builder()
            .concatenate("Features", &["FullName"])
            .build();
        assert!(matches!(
            spec.validate(&drinks()).unwrap_err(),
            PipelineError::ColumnKind { .. }
        ));
    }

    #[test]
    fn dependencies_skip_label_steps() {
        let (steps, raw) = drinks_pipeline().dependencies(&["Features"]);
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(raw, vec!["Country".to_string(), "FullName".to_string()]);
    }

    #[test]
    fn in_place_steps_keep_their_input() {
        let spec = PipelineSpec::builder()
            .one_hot_encode("Country", "Country")
            .concatenate("Features", &["Country"])
            .build();
        let (steps, raw) = spec.dependencies(&["Features"]);
        assert_eq!(steps, vec![0, 1]);
        assert_eq!(raw, vec!["Country".to_string()]);
    }

    #[test]
    fn steps_render_readably() {
        let spec = drinks_pipeline();
        assert_eq!(
            spec.steps()[3].to_string(),
            "concatenate(FullNameFeaturized, CountryEncoded) -> Features"
        );
    }
}
