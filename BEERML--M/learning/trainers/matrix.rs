use ndarray::Array2;

use crate::errors::{PipelineError, PipelineResult};

/// Dense row-major features plus per-column lists of non-zero entries.
///
/// Coordinate descent visits one feature at a time, so every update only touches the rows
/// where that feature is non-zero.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    rows: Array2<f32>,
    columns: Vec<Vec<(usize, f32)>>,
}

impl FeatureMatrix {
    /// Builds the matrix from equally sized feature vectors.
    pub fn from_rows(rows: &[Vec<f32>]) -> PipelineResult<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
            return Err(PipelineError::mismatch(format!(
                "feature row {idx} has width {} but row 0 has {width}",
                row.len()
            )));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let dense = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|err| PipelineError::mismatch(format!("feature matrix: {err}")))?;

        let mut columns = vec![Vec::new(); width];
        for (row_idx, row) in dense.outer_iter().enumerate() {
            for (col_idx, value) in row.iter().enumerate() {
                if *value != 0.0 {
                    columns[col_idx].push((row_idx, *value));
                }
            }
        }
        Ok(Self {
            rows: dense,
            columns,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.nrows()
    }

    /// Number of features.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.rows.ncols()
    }

    /// Non-zero `(row, value)` entries of a feature.
    #[must_use]
    pub fn column(&self, feature: usize) -> &[(usize, f32)] {
        &self.columns[feature]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_hold_non_zero_entries() {
        let matrix =
            FeatureMatrix::from_rows(&[vec![1.0, 0.0, 2.0], vec![0.0, 3.0, 0.0], vec![4.0, 0.0, 5.0]])
                .unwrap();
        assert_eq!(matrix.num_rows(), 3);
        assert_eq!(matrix.column(0), &[(0, 1.0), (2, 4.0)]);
        assert_eq!(matrix.column(1), &[(1, 3.0)]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(FeatureMatrix::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
