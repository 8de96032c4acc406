use crate::error::CgCoreError;
use crate::traits::Matrix;
use serde::Serialize;

/// Sparse matrix in Compressed Sparse Row (CSR) format, host resident.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    /// Non-zero values, row by row.
    pub(crate) values: Vec<f64>,
    /// Column index of each entry in `values`.
    pub(crate) col_indices: Vec<usize>,
    /// `rows + 1` offsets; row `i` occupies `row_ptr[i]..row_ptr[i + 1]`.
    pub(crate) row_ptr: Vec<usize>,
}

/// Shape summary of a matrix, as reported by the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixShape {
    pub rows: usize,
    pub cols: usize,
    pub nnz: usize,
}

impl SparseMatrix {
    /// Creates an empty matrix with the given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        SparseMatrix {
            rows,
            cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0; rows + 1],
        }
    }

    /// Creates a matrix from CSR components, checking their shapes.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    ) -> Result<Self, CgCoreError> {
        if row_ptr.len() != rows + 1 {
            return Err(CgCoreError::InvalidDimensions(format!(
                "{} row offsets for {} rows",
                row_ptr.len(),
                rows
            )));
        }
        if values.len() != col_indices.len() {
            return Err(CgCoreError::InvalidDimensions(format!(
                "{} values but {} column indices",
                values.len(),
                col_indices.len()
            )));
        }
        if row_ptr.last() != Some(&values.len()) {
            return Err(CgCoreError::InvalidDimensions(format!(
                "row offsets end at {:?}, expected nnz {}",
                row_ptr.last(),
                values.len()
            )));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(CgCoreError::InvalidDimensions(
                "row offsets decrease".to_string(),
            ));
        }
        if let Some(&c) = col_indices.iter().find(|&&c| c >= cols) {
            return Err(CgCoreError::InvalidDimensions(format!(
                "column {} outside a matrix with {} columns",
                c, cols
            )));
        }

        Ok(SparseMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Checks that every row holds strictly increasing column indices.
    ///
    /// `from_csr` accepts any in-bounds layout; assembled operators are
    /// expected to also pass this check.
    pub fn validate_structure(&self) -> Result<(), CgCoreError> {
        for row in 0..self.rows {
            let cols = &self.col_indices[self.row_ptr[row]..self.row_ptr[row + 1]];
            if let Some(w) = cols.windows(2).find(|w| w[0] >= w[1]) {
                return Err(CgCoreError::InvalidDimensions(format!(
                    "row {} has unsorted or duplicate columns {} and {}",
                    row, w[0], w[1]
                )));
            }
        }
        Ok(())
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Returns the number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn shape(&self) -> MatrixShape {
        MatrixShape {
            rows: self.rows,
            cols: self.cols,
            nnz: self.nnz(),
        }
    }

    /// Looks up a single entry. Linear in the row length; meant for tests
    /// and diagnostics.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        self.col_indices[range.clone()]
            .iter()
            .position(|&c| c == col)
            .map(|offset| self.values[range.start + offset])
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        (&self.col_indices[range.clone()], &self.values[range])
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Builds a matrix from a dense row-major representation, skipping zeros.
    pub fn from_dense(dense: &[Vec<f64>]) -> Result<Self, CgCoreError> {
        let rows = dense.len();
        let cols = dense.first().map_or(0, |row| row.len());
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = vec![0; rows + 1];

        for (r, row_vec) in dense.iter().enumerate() {
            if row_vec.len() != cols {
                return Err(CgCoreError::InvalidDimensions(format!(
                    "dense row {} has {} columns, expected {}",
                    r,
                    row_vec.len(),
                    cols
                )));
            }
            for (c, &val) in row_vec.iter().enumerate() {
                if val != 0.0 {
                    values.push(val);
                    col_indices.push(c);
                }
            }
            row_ptr[r + 1] = values.len();
        }
        SparseMatrix::from_csr(rows, cols, values, col_indices, row_ptr)
    }

    /// Iterates over the stored entries in row-major order.
    pub fn iter(&self) -> SparseMatrixIter<'_> {
        SparseMatrixIter {
            matrix: self,
            row: 0,
            index: 0,
        }
    }
}

/// A stored `(row, col, value)` entry, as yielded by [`SparseMatrix::iter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    row: usize,
    col: usize,
    value: f64,
}

impl Entry {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

pub struct SparseMatrixIter<'a> {
    matrix: &'a SparseMatrix,
    row: usize,
    index: usize,
}

impl Iterator for SparseMatrixIter<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.matrix.rows && self.index >= self.matrix.row_ptr[self.row + 1] {
            self.row += 1;
        }
        if self.row >= self.matrix.rows {
            return None;
        }
        let item = Entry {
            row: self.row,
            col: self.matrix.col_indices[self.index],
            value: self.matrix.values[self.index],
        };
        self.index += 1;
        Some(item)
    }
}

impl Matrix for SparseMatrix {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Order-4 operator with the shift already on the diagonal.
    fn shifted_tridiagonal() -> SparseMatrix {
        SparseMatrix::from_dense(&[
            vec![2.5, -1.0, 0.0, 0.0],
            vec![-1.0, 2.5, -1.0, 0.0],
            vec![0.0, -1.0, 2.5, -1.0],
            vec![0.0, 0.0, -1.0, 2.5],
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_matrix_has_zero_offsets() {
        let a = SparseMatrix::new(4, 4);
        assert_eq!(a.shape(), MatrixShape { rows: 4, cols: 4, nnz: 0 });
        assert_eq!(a.row_ptr(), &[0, 0, 0, 0, 0]);
        assert_eq!(a.iter().count(), 0);
    }

    #[test]
    fn test_from_dense_keeps_row_order() {
        let a = shifted_tridiagonal();
        assert!(a.is_square());
        assert_eq!(a.nnz(), 10);
        assert_eq!(a.row_ptr(), &[0, 2, 5, 8, 10]);
        assert_eq!(a.row(2), (&[1usize, 2, 3][..], &[-1.0, 2.5, -1.0][..]));
        assert!(a.validate_structure().is_ok());
    }

    #[test]
    fn test_from_csr_rejects_bad_components() {
        let cases = [
            // too few offsets
            (vec![1.0], vec![0], vec![0, 1]),
            // offsets do not end at nnz
            (vec![1.0, 2.0], vec![0, 1], vec![0, 1, 1]),
            // column past the edge
            (vec![1.0, 2.0], vec![0, 2], vec![0, 1, 2]),
            // decreasing offsets
            (vec![1.0, 2.0], vec![0, 1], vec![0, 3, 2]),
        ];
        for (values, cols, offsets) in cases {
            let result = SparseMatrix::from_csr(2, 2, values, cols, offsets.clone());
            assert!(
                matches!(result, Err(CgCoreError::InvalidDimensions(_))),
                "offsets {:?} accepted",
                offsets
            );
        }
    }

    #[test]
    fn test_from_dense_rejects_ragged_rows() {
        let result = SparseMatrix::from_dense(&[vec![1.0, 0.0], vec![1.0]]);
        match result {
            Err(CgCoreError::InvalidDimensions(msg)) => assert!(msg.contains("dense row 1")),
            other => panic!("expected a dimension error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_structure_rejects_repeated_column() {
        let a = SparseMatrix::from_csr(1, 3, vec![1.0, 2.0], vec![2, 2], vec![0, 2]).unwrap();
        assert!(a.validate_structure().is_err());
    }

    #[test]
    fn test_get_reads_stored_entries_only() {
        let a = shifted_tridiagonal();
        assert_eq!(a.get(0, 0), Some(2.5));
        assert_eq!(a.get(3, 2), Some(-1.0));
        assert_eq!(a.get(0, 3), None);
        assert_eq!(a.get(4, 0), None);
    }

    #[test]
    fn test_iter_walks_rows_and_skips_empty_ones() {
        let a = SparseMatrix::from_dense(&[vec![0.0, 7.0], vec![0.0, 0.0], vec![3.0, 0.0]]).unwrap();
        let entries: Vec<Entry> = a.iter().collect();
        assert_eq!(entries, vec![Entry::new(0, 1, 7.0), Entry::new(2, 0, 3.0)]);
    }
}
