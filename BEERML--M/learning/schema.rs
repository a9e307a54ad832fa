use std::{collections::HashSet, fmt};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, PipelineResult};

/// Declared type of a raw column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// UTF-8 text.
    Text,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit float.
    Float32,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
        })
    }
}

/// One named, typed column read from a fixed position of the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Column name used by pipeline steps.
    pub name: String,
    /// Declared kind.
    pub kind: FieldKind,
    /// 0-based position in the delimited row.
    pub source_index: usize,
}

impl FieldDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind, source_index: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            source_index,
        }
    }
}

/// Typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Text value.
    Text(String),
    /// Integer value.
    Int32(i32),
    /// Float value.
    Float32(f32),
}

impl Value {
    /// Parses raw text as the given kind. Text is kept verbatim; numbers are trimmed first.
    pub fn parse(raw: &str, kind: FieldKind) -> Result<Self, String> {
        match kind {
            FieldKind::Text => Ok(Self::Text(raw.to_string())),
            FieldKind::Int32 => raw
                .trim()
                .parse::<i32>()
                .map(Self::Int32)
                .map_err(|_| format!("`{raw}` is not a valid int32")),
            FieldKind::Float32 => match raw.trim().parse::<f32>() {
                Ok(value) if value.is_finite() => Ok(Self::Float32(value)),
                _ => Err(format!("`{raw}` is not a valid float32")),
            },
        }
    }

    /// Kind of this value.
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Int32(_) => FieldKind::Int32,
            Self::Float32(_) => FieldKind::Float32,
        }
    }

    /// Numeric view (text has none).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Text(_) => None,
            Self::Int32(value) => Some(*value as f32),
            Self::Float32(value) => Some(*value),
        }
    }

    /// Text view (numbers have none).
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Canonical string used as a category identity by encoders.
    #[must_use]
    pub fn category(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Int32(value) => write!(f, "{value}"),
            Self::Float32(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float32(value)
    }
}

/// Immutable flat record keyed by column name, in schema order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Starts an empty record; use [`Record::with`] to add fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record extended with one more field.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Text field lookup.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_text)
    }

    /// Integer field lookup.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(Value::Int32(value)) => Some(*value),
            _ => None,
        }
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordered list of field descriptors describing one delimited file layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    /// Builds a schema, rejecting duplicate names or duplicate source indices.
    pub fn new(fields: Vec<FieldDescriptor>) -> PipelineResult<Self> {
        if fields.is_empty() {
            return Err(PipelineError::mismatch("schema declares no columns"));
        }
        let mut names = HashSet::new();
        let mut indices = HashSet::new();
        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(PipelineError::mismatch(format!(
                    "duplicate column name `{}`",
                    field.name
                )));
            }
            if !indices.insert(field.source_index) {
                return Err(PipelineError::mismatch(format!(
                    "source index {} declared twice (column `{}`)",
                    field.source_index, field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Descriptors in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Highest source index plus one: the minimum row width this schema can read.
    #[must_use]
    pub fn min_width(&self) -> usize {
        self.fields
            .iter()
            .map(|field| field.source_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Copy of this schema without the named columns.
    pub fn without(&self, names: &[&str]) -> PipelineResult<Self> {
        Self::new(
            self.fields
                .iter()
                .filter(|field| !names.contains(&field.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Checks that a header row is wide enough for every declared index.
    pub fn check_width(&self, width: usize, line: usize) -> PipelineResult<()> {
        if let Some(field) = self.fields.iter().find(|f| f.source_index >= width) {
            return Err(PipelineError::mismatch_at(
                line,
                format!(
                    "column `{}` reads index {} but the row has {width} fields",
                    field.name, field.source_index
                ),
            ));
        }
        Ok(())
    }

    /// Parses one split row into a record.
    pub fn parse_row<S: AsRef<str>>(&self, cells: &[S], line: usize) -> PipelineResult<Record> {
        self.check_width(cells.len(), line)?;
        let mut fields = IndexMap::with_capacity(self.fields.len());
        for field in &self.fields {
            let raw = cells[field.source_index].as_ref();
            let value = Value::parse(raw, field.kind).map_err(|reason| {
                PipelineError::mismatch_at(line, format!("column `{}`: {reason}", field.name))
            })?;
            fields.insert(field.name.clone(), value);
        }
        Ok(Record { fields })
    }

    /// Verifies an in-memory record carries every declared field with the declared kind.
    pub fn check_record(&self, record: &Record) -> PipelineResult<()> {
        for field in &self.fields {
            Self::check_field(field, record)?;
        }
        Ok(())
    }

    /// Like [`Schema::check_record`], narrowed to the named fields.
    pub fn check_fields<S: AsRef<str>>(&self, record: &Record, names: &[S]) -> PipelineResult<()> {
        for name in names {
            let name = name.as_ref();
            let field = self.field(name).ok_or_else(|| PipelineError::not_found(name, "record check"))?;
            Self::check_field(field, record)?;
        }
        Ok(())
    }

    fn check_field(field: &FieldDescriptor, record: &Record) -> PipelineResult<()> {
        match record.get(&field.name) {
            None => Err(PipelineError::mismatch(format!(
                "record is missing field `{}`",
                field.name
            ))),
            Some(value) if value.kind() != field.kind => Err(PipelineError::mismatch(format!(
                "field `{}` is {} but the schema declares {}",
                field.name,
                value.kind(),
                field.kind
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drinks() -> Schema {
        Schema::new(vec![
            FieldDescriptor::new("FullName", FieldKind::Text, 0),
            FieldDescriptor::new("Type", FieldKind::Text, 1),
            FieldDescriptor::new("Country", FieldKind::Text, 2),
        ])
        .unwrap()
    }

    #[test]
    fn well_formed_rows_parse() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("Year", FieldKind::Int32, 3),
            FieldDescriptor::new("Consumption", FieldKind::Float32, 7),
        ])
        .unwrap();
        let row = ["m", "d", "p", "2018", "1", "2", "3", "12.5", "-4"];
        let record = schema.parse_row(&row, 2).unwrap();
        assert_eq!(record.int("Year"), Some(2018));
        assert_eq!(record.get("Consumption"), Some(&Value::Float32(12.5)));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = drinks().parse_row(&["Glen Speyside 12", "Whisky"], 4).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { line: Some(4), .. }));
    }

    #[test]
    fn non_numeric_int_is_rejected() {
        let schema = Schema::new(vec![FieldDescriptor::new("Year", FieldKind::Int32, 0)]).unwrap();
        let err = schema.parse_row(&["twenty"], 9).unwrap_err();
        assert!(err.to_string().contains("`Year`"));
    }

    #[test]
    fn duplicate_names_and_indices_are_rejected() {
        let dup_name = Schema::new(vec![
            FieldDescriptor::new("A", FieldKind::Text, 0),
            FieldDescriptor::new("A", FieldKind::Text, 1),
        ]);
        assert!(dup_name.is_err());
        let dup_index = Schema::new(vec![
            FieldDescriptor::new("A", FieldKind::Text, 0),
            FieldDescriptor::new("B", FieldKind::Text, 0),
        ]);
        assert!(dup_index.is_err());
    }

    #[test]
    fn record_check_reports_missing_fields() {
        let record = Record::new().with("FullName", "Weird Stout");
        assert!(drinks().check_record(&record).is_err());
        let full = record.with("Type", "").with("Country", "");
        drinks().check_record(&full).unwrap();
    }

    #[test]
    fn narrowed_check_rejects_wrong_kinds() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("Month", FieldKind::Int32, 4),
            FieldDescriptor::new("Consumption", FieldKind::Float32, 7),
        ])
        .unwrap();
        let record = Record::new().with("Month", "July");
        let err = schema.check_fields(&record, &["Month"]).unwrap_err();
        assert!(err.to_string().contains("`Month`"));
        schema
            .check_fields(&Record::new().with("Month", 7), &["Month"])
            .unwrap();
        assert!(matches!(
            schema.check_fields(&record, &["Weekday"]),
            Err(PipelineError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn categories_use_canonical_text() {
        assert_eq!(Value::Int32(7).category(), "7");
        assert_eq!(Value::Float32(-3.5).category(), "-3.5");
        assert_eq!(Value::from("Sweden").category(), "Sweden");
    }
}
