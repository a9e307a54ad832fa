use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    errors::{PipelineError, PipelineResult},
    schema::{Record, Schema},
};

/// Records parsed from one file, together with the schema that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Source label (file name or caller-chosen tag).
    pub name: String,
    /// Schema the records conform to.
    pub schema: Schema,
    /// Records in file order.
    pub records: Vec<Record>,
}

impl Dataset {
    /// Wraps in-memory records after checking each against the schema.
    pub fn from_records(
        name: impl Into<String>,
        schema: Schema,
        records: Vec<Record>,
    ) -> PipelineResult<Self> {
        for record in &records {
            schema.check_record(record)?;
        }
        Ok(Self {
            name: name.into(),
            schema,
            records,
        })
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Delimited-text reader driven by a [`Schema`].
#[derive(Debug, Clone)]
pub struct TextLoader {
    schema: Schema,
    separator: char,
    has_header: bool,
}

impl TextLoader {
    /// Comma-separated loader expecting a header row.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            separator: ',',
            has_header: true,
        }
    }

    /// Overrides the field separator.
    #[must_use]
    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Declares whether the first line is a header.
    #[must_use]
    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Schema used for parsing.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reads and parses a file.
    pub fn read(&self, path: impl AsRef<Path>) -> PipelineResult<Dataset> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.read_from(BufReader::new(file), name)
            .map_err(|err| match err {
                PipelineError::Io { source, .. } => PipelineError::io(path, source),
                other => other,
            })
    }

    /// Parses delimited text from any buffered reader.
    pub fn read_from<R: BufRead>(
        &self,
        reader: R,
        name: impl Into<String>,
    ) -> PipelineResult<Dataset> {
        let mut records = Vec::new();
        let mut header_seen = !self.has_header;
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|err| PipelineError::io("<reader>", err))?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let cells = split_line(line, self.separator)
                .map_err(|reason| PipelineError::mismatch_at(line_no, reason))?;
            if header_seen {
                records.push(self.schema.parse_row(&cells, line_no)?);
            } else {
                self.schema.check_width(cells.len(), line_no)?;
                header_seen = true;
            }
        }
        Ok(Dataset {
            name: name.into(),
            schema: self.schema.clone(),
            records,
        })
    }
}

/// Splits one delimited line, honouring double quotes (`""` escapes a quote inside quotes).
pub fn split_line(line: &str, separator: char) -> Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' && current.is_empty() {
            in_quotes = true;
        } else if ch == separator {
            cells.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    cells.push(current);
    Ok(cells)
}
