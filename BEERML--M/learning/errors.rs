use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, assembling pipelines, fitting or scoring.
///
/// Every variant is fatal to the current run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed schema, short row or a value that does not parse as its declared kind.
    #[error("schema mismatch{}: {reason}", location(.line))]
    SchemaMismatch {
        /// 1-based line in the source file, when the failure came from a file.
        line: Option<usize>,
        /// Human-readable cause.
        reason: String,
    },
    /// A step referenced a column that no earlier step or the schema produces.
    #[error("column `{column}` not found (referenced by {step})")]
    ColumnNotFound {
        /// Missing column.
        column: String,
        /// Step that referenced it.
        step: String,
    },
    /// A step was applied to a column of an unsupported kind.
    #[error("column `{column}` is {found} but {step} expects {expected}")]
    ColumnKind {
        /// Offending column.
        column: String,
        /// Step that rejected it.
        step: String,
        /// Accepted kinds.
        expected: String,
        /// Actual kind.
        found: String,
    },
    /// Poisson regression requires non-negative labels.
    #[error("negative regression target {value} at row {row}")]
    NegativeTarget {
        /// 0-based row index within the training set.
        row: usize,
        /// Offending label.
        value: f32,
    },
    /// The operation needs at least one record.
    #[error("dataset `{0}` has no records")]
    EmptyDataset(String),
    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O failure.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            line: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch_at(line: usize, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            line: Some(line),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(column: &str, step: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.to_string(),
            step: step.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn location(line: &Option<usize>) -> String {
    line.map_or_else(String::new, |line| format!(" at line {line}"))
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = PipelineError::mismatch_at(7, "expected int32 in `Year`, got `abc`");
        assert_eq!(
            err.to_string(),
            "schema mismatch at line 7: expected int32 in `Year`, got `abc`"
        );
        let err = PipelineError::not_found("Features", "trainer");
        assert!(err.to_string().contains("`Features`"));
    }
}
