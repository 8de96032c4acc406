//! Generation of the benchmark matrix.
//!
//! Each column `i` gets a random sparse template with its own diagonal
//! forced to 0.5. The matrix is the sum over columns of the scaled outer
//! products of those templates, plus `(rcond - shift)` on the diagonal.
//! Assembly runs in three phases: count entries per row, place and
//! coalesce entries in sorted order, then squeeze out the slots left
//! unused by coalesced duplicates.

use crate::error::CgError;
use crate::params::ProblemParams;
use crate::randdp::RandomStream;
use crate::sampler::{sample, smallest_pow2_at_least, ColumnTemplate};
use crate::schedule::{CallSite, PolicyCache};
use cgbench_core::SparseMatrix;
use rayon::prelude::*;
use std::mem;

/// Marks a slot that has not been claimed yet.
const EMPTY_SLOT: usize = usize::MAX;

/// Diagonal value forced into every column template.
const TEMPLATE_DIAGONAL: f64 = 0.5;

/// Inclusive, 0-based row and column range owned by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub firstrow: usize,
    pub lastrow: usize,
    pub firstcol: usize,
    pub lastcol: usize,
}

impl Partition {
    /// The whole `n x n` matrix.
    pub fn full(n: usize) -> Self {
        Self {
            firstrow: 0,
            lastrow: n.saturating_sub(1),
            firstcol: 0,
            lastcol: n.saturating_sub(1),
        }
    }

    pub fn rows(&self) -> usize {
        self.lastrow + 1 - self.firstrow
    }

    pub fn cols(&self) -> usize {
        self.lastcol + 1 - self.firstcol
    }

    fn owns_row(&self, row: usize) -> bool {
        (self.firstrow..=self.lastrow).contains(&row)
    }

    fn owns_col(&self, col: usize) -> bool {
        (self.firstcol..=self.lastcol).contains(&col)
    }
}

/// Draws the template of every column, in column order.
pub fn generate_templates(stream: &mut RandomStream, params: &ProblemParams) -> Vec<ColumnTemplate> {
    let n = params.na;
    let domain = smallest_pow2_at_least(n);
    (0..n)
        .map(|column| {
            let mut template = sample(stream, n, params.nonzer, domain);
            template.set_or_append(column + 1, TEMPLATE_DIAGONAL);
            template
        })
        .collect()
}

/// Builds the compressed-row matrix from column templates.
#[derive(Debug, Clone)]
pub struct MatrixAssembler {
    params: ProblemParams,
    partition: Partition,
    capacity: usize,
}

impl MatrixAssembler {
    /// Assembler for the whole matrix with the default capacity.
    pub fn new(params: ProblemParams) -> Self {
        Self {
            partition: Partition::full(params.na),
            capacity: params.nz_max(),
            params,
        }
    }

    /// Overrides the maximum number of stored entries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Generates the templates from `stream` and assembles the matrix.
    pub fn generate(
        &self,
        stream: &mut RandomStream,
        policy: &PolicyCache,
    ) -> Result<SparseMatrix, CgError> {
        // Sampling only terminates for parameters that pass validation.
        self.params.validate()?;
        let templates = generate_templates(stream, &self.params);
        self.assemble(&templates, policy)
    }

    /// Runs the count, place and compact phases over `templates`.
    ///
    /// Only products landing inside the partition are kept; column indices
    /// of the result are relative to `firstcol`.
    pub fn assemble(
        &self,
        templates: &[ColumnTemplate],
        policy: &PolicyCache,
    ) -> Result<SparseMatrix, CgError> {
        let partition = self.partition;
        if partition.firstrow > partition.lastrow
            || partition.firstcol > partition.lastcol
            || partition.lastrow >= self.params.na
            || partition.lastcol >= self.params.na
        {
            return Err(CgError::InvalidParams(format!(
                "partition {:?} exceeds matrix order {}",
                partition, self.params.na
            )));
        }

        let mut row_ptr = self.count_entries(templates)?;
        let (mut values, mut col_indices, duplicates) = self.place_entries(templates, &row_ptr)?;
        compact(
            policy,
            &mut row_ptr,
            &mut values,
            &mut col_indices,
            &duplicates,
        )?;

        if partition.firstcol > 0 {
            col_indices.iter_mut().for_each(|c| *c -= partition.firstcol);
        }

        log::info!(
            "Assembled {}x{} matrix with {} nonzeros",
            partition.rows(),
            partition.cols(),
            values.len()
        );
        Ok(SparseMatrix::from_csr(
            partition.rows(),
            partition.cols(),
            values,
            col_indices,
            row_ptr,
        )?)
    }

    /// Phase A: slots reserved per row, as prefix-summed row offsets.
    fn count_entries(&self, templates: &[ColumnTemplate]) -> Result<Vec<usize>, CgError> {
        let partition = self.partition;
        let mut row_ptr = vec![0usize; partition.rows() + 1];
        for template in templates {
            let owned_cols = template
                .positions
                .iter()
                .filter(|&&p| partition.owns_col(p - 1))
                .count();
            for &position in &template.positions {
                let row = position - 1;
                if partition.owns_row(row) {
                    row_ptr[row - partition.firstrow + 1] += owned_cols;
                }
            }
        }
        for j in 1..row_ptr.len() {
            row_ptr[j] += row_ptr[j - 1];
        }

        let requested = row_ptr[partition.rows()];
        if requested > self.capacity {
            return Err(CgError::CapacityExceeded {
                requested,
                capacity: self.capacity,
            });
        }
        log::debug!("Reserved {} slots (capacity {})", requested, self.capacity);
        Ok(row_ptr)
    }

    /// Phase B: places every product into its row in ascending column
    /// order, summing duplicates. Returns the slot arrays and the number of
    /// coalesced duplicates per row.
    fn place_entries(
        &self,
        templates: &[ColumnTemplate],
        row_ptr: &[usize],
    ) -> Result<(Vec<f64>, Vec<usize>, Vec<usize>), CgError> {
        let partition = self.partition;
        let slots = row_ptr[partition.rows()];
        let mut values = vec![0.0f64; slots];
        let mut col_indices = vec![EMPTY_SLOT; slots];
        let mut duplicates = vec![0usize; partition.rows()];

        let n = self.params.na;
        let rcond = self.params.rcond;
        let shift = self.params.shift;
        let ratio = rcond.powf(1.0 / n as f64);
        let mut size = 1.0f64;

        for (i, template) in templates.iter().enumerate() {
            for (&row_position, &row_value) in template.positions.iter().zip(&template.values) {
                let j = row_position - 1;
                if !partition.owns_row(j) {
                    continue;
                }
                let local = j - partition.firstrow;
                let start = row_ptr[local];
                let end = row_ptr[local + 1];
                let scale = size * row_value;

                for (&col_position, &col_value) in template.positions.iter().zip(&template.values)
                {
                    let jcol = col_position - 1;
                    if !partition.owns_col(jcol) {
                        continue;
                    }
                    let mut va = col_value * scale;
                    if jcol == j && j == i {
                        va += rcond - shift;
                    }

                    let k = (start..end)
                        .find(|&k| col_indices[k] == EMPTY_SLOT || col_indices[k] >= jcol)
                        .ok_or(CgError::InsertionFailed { row: j, column: i })?;

                    if col_indices[k] == EMPTY_SLOT {
                        col_indices[k] = jcol;
                    } else if col_indices[k] == jcol {
                        duplicates[local] += 1;
                    } else {
                        // Shift the occupied tail right by one slot.
                        for kk in (k..end - 1).rev() {
                            if col_indices[kk] != EMPTY_SLOT {
                                values[kk + 1] = values[kk];
                                col_indices[kk + 1] = col_indices[kk];
                            }
                        }
                        col_indices[k] = jcol;
                        values[k] = 0.0;
                    }
                    values[k] += va;
                }
            }
            size *= ratio;
        }
        Ok((values, col_indices, duplicates))
    }
}

/// Splits `data` into consecutive mutable row slices of the lengths given
/// by `row_ptr`.
fn split_rows<'a, T>(mut data: &'a mut [T], row_ptr: &[usize]) -> Vec<&'a mut [T]> {
    let mut rows = Vec::with_capacity(row_ptr.len().saturating_sub(1));
    for w in row_ptr.windows(2) {
        let (head, tail) = mem::take(&mut data).split_at_mut(w[1] - w[0]);
        rows.push(head);
        data = tail;
    }
    rows
}

/// Phase C: drops the unused tail of every row. Rows are copied in
/// parallel into freshly allocated arrays.
fn compact(
    policy: &PolicyCache,
    row_ptr: &mut Vec<usize>,
    values: &mut Vec<f64>,
    col_indices: &mut Vec<usize>,
    duplicates: &[usize],
) -> Result<(), CgError> {
    let nrows = duplicates.len();
    let mut new_row_ptr = vec![0usize; nrows + 1];
    for j in 0..nrows {
        let live = row_ptr[j + 1] - row_ptr[j] - duplicates[j];
        new_row_ptr[j + 1] = new_row_ptr[j] + live;
    }
    let nnz = new_row_ptr[nrows];

    let mut new_values = vec![0.0f64; nnz];
    let mut new_col_indices = vec![0usize; nnz];
    {
        let old_row_ptr: &[usize] = row_ptr;
        let old_values: &[f64] = values;
        let old_col_indices: &[usize] = col_indices;
        let value_rows = split_rows(&mut new_values, &new_row_ptr);
        let col_rows = split_rows(&mut new_col_indices, &new_row_ptr);
        policy.region(CallSite::MatrixCompaction, nrows, |region| {
            region
                .tune(value_rows.into_par_iter().zip(col_rows.into_par_iter()))
                .enumerate()
                .for_each(|(j, (vals, cols))| {
                    let start = old_row_ptr[j];
                    vals.copy_from_slice(&old_values[start..start + vals.len()]);
                    cols.copy_from_slice(&old_col_indices[start..start + cols.len()]);
                });
        })?;
    }

    log::debug!(
        "Compaction removed {} duplicate slots",
        values.len() - nnz
    );
    *row_ptr = new_row_ptr;
    *values = new_values;
    *col_indices = new_col_indices;
    Ok(())
}

/// Builds the benchmark matrix for `params` from the standard stream,
/// advancing it once before the first template as the benchmark does.
pub fn build_matrix(params: &ProblemParams, policy: &PolicyCache) -> Result<SparseMatrix, CgError> {
    let mut stream = RandomStream::default();
    stream.next_value();
    MatrixAssembler::new(*params).generate(&mut stream, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> ProblemParams {
        ProblemParams {
            na: 64,
            nonzer: 4,
            niter: 1,
            shift: 5.0,
            rcond: 0.1,
        }
    }

    fn template(positions: &[usize], values: &[f64]) -> ColumnTemplate {
        ColumnTemplate {
            positions: positions.to_vec(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_templates_carry_diagonal() {
        let params = small_params();
        let templates = generate_templates(&mut RandomStream::default(), &params);
        assert_eq!(templates.len(), 64);
        for (i, t) in templates.iter().enumerate() {
            let k = t.positions.iter().position(|&p| p == i + 1).unwrap();
            assert_eq!(t.values[k], 0.5);
            assert!(t.len() == params.nonzer || t.len() == params.nonzer + 1);
        }
    }

    #[test]
    fn test_structure_invariants() {
        let policy = PolicyCache::default();
        let a = build_matrix(&small_params(), &policy).unwrap();
        let row_ptr = a.row_ptr();
        assert_eq!(row_ptr[0], 0);
        assert!(row_ptr.windows(2).all(|w| w[0] <= w[1]));
        assert!(a.validate_structure().is_ok());
        assert!(a.col_indices().iter().all(|&c| c < 64));
        assert!(a.nnz() <= small_params().nz_max());
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let a = build_matrix(&small_params(), &PolicyCache::default()).unwrap();
        for entry in a.iter() {
            let mirror = a.get(entry.col(), entry.row()).unwrap();
            let tolerance = 1e-12 * entry.value().abs().max(1.0);
            assert!((mirror - entry.value()).abs() <= tolerance);
        }
    }

    #[test]
    fn test_duplicates_are_coalesced() {
        // Two columns whose templates overlap in rows 1 and 2.
        let params = ProblemParams {
            na: 3,
            nonzer: 1,
            niter: 1,
            shift: 0.0,
            rcond: 1.0,
        };
        let templates = vec![template(&[1, 2], &[0.5, 1.0]), template(&[2, 1], &[0.5, 2.0])];
        let a = MatrixAssembler::new(params)
            .assemble(&templates, &PolicyCache::default())
            .unwrap();

        assert_eq!(a.row_ptr(), &[0, 2, 4, 4]);
        assert_eq!(a.col_indices(), &[0, 1, 0, 1]);
        // column 0: 0.5*0.5 + (1 - 0) on its diagonal; column 1 adds 2*2
        assert_eq!(a.get(0, 0), Some(0.25 + 1.0 + 4.0));
        // off-diagonals: 0.5*1 from column 0, 2*0.5 from column 1
        assert_eq!(a.get(0, 1), Some(1.5));
        assert_eq!(a.get(1, 0), Some(1.5));
        // column 1 diagonal: 0.5*0.5 + 1; column 0 adds 1*1
        assert_eq!(a.get(1, 1), Some(1.0 + 0.25 + 1.0));
    }

    #[test]
    fn test_out_of_order_columns_are_inserted_sorted() {
        let params = ProblemParams {
            na: 4,
            nonzer: 2,
            niter: 1,
            shift: 0.0,
            rcond: 1.0,
        };
        let templates = vec![
            template(&[4, 1, 2], &[1.0, 1.0, 1.0]),
            template(&[2], &[1.0]),
            template(&[3], &[1.0]),
            template(&[4], &[1.0]),
        ];
        let a = MatrixAssembler::new(params)
            .assemble(&templates, &PolicyCache::default())
            .unwrap();
        assert!(a.validate_structure().is_ok());
        assert_eq!(a.row(0).0, &[0, 1, 3]);
    }

    #[test]
    fn test_capacity_exceeded() {
        let params = small_params();
        let templates = generate_templates(&mut RandomStream::default(), &params);
        let ok = MatrixAssembler::new(params).assemble(&templates, &PolicyCache::default());
        let reserved: usize = templates.iter().map(|t| t.len() * t.len()).sum();
        assert!(ok.is_ok());

        let err = MatrixAssembler::new(params)
            .with_capacity(reserved - 1)
            .assemble(&templates, &PolicyCache::default())
            .unwrap_err();
        match err {
            CgError::CapacityExceeded {
                requested,
                capacity,
            } => {
                assert_eq!(requested, reserved);
                assert_eq!(capacity, reserved - 1);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }

        assert!(MatrixAssembler::new(params)
            .with_capacity(reserved)
            .assemble(&templates, &PolicyCache::default())
            .is_ok());
    }

    #[test]
    fn test_partition_matches_block_of_full_matrix() {
        let params = small_params();
        let policy = PolicyCache::default();
        let templates = generate_templates(&mut RandomStream::default(), &params);
        let full = MatrixAssembler::new(params)
            .assemble(&templates, &policy)
            .unwrap();

        let partition = Partition {
            firstrow: 0,
            lastrow: 31,
            firstcol: 32,
            lastcol: 63,
        };
        let block = MatrixAssembler::new(params)
            .with_partition(partition)
            .assemble(&templates, &policy)
            .unwrap();

        assert_eq!(block.dims(), (32, 32));
        assert!(block.validate_structure().is_ok());
        let expected: Vec<_> = full
            .iter()
            .filter(|e| e.row() <= 31 && e.col() >= 32)
            .collect();
        assert_eq!(block.nnz(), expected.len());
        for entry in expected {
            let got = block.get(entry.row(), entry.col() - 32).unwrap();
            assert!((got - entry.value()).abs() <= 1e-12 * entry.value().abs().max(1.0));
        }
    }

    #[test]
    fn test_generate_with_column_partition() {
        let partition = Partition {
            firstrow: 16,
            lastrow: 47,
            firstcol: 40,
            lastcol: 55,
        };
        let a = MatrixAssembler::new(small_params())
            .with_partition(partition)
            .generate(&mut RandomStream::default(), &PolicyCache::default())
            .unwrap();
        assert_eq!(a.dims(), (32, 16));
        assert!(a.col_indices().iter().all(|&c| c < 16));
    }

    #[test]
    fn test_inverted_partition_is_rejected() {
        let partition = Partition {
            firstrow: 10,
            lastrow: 5,
            firstcol: 0,
            lastcol: 63,
        };
        let result = MatrixAssembler::new(small_params())
            .with_partition(partition)
            .assemble(&[], &PolicyCache::default());
        assert!(matches!(result, Err(CgError::InvalidParams(_))));
    }

    #[test]
    fn test_generate_validates_params() {
        // One more nonzero per column than the order allows; sampling
        // would never finish.
        let params = ProblemParams {
            na: 4,
            nonzer: 5,
            ..small_params()
        };
        let result = MatrixAssembler::new(params)
            .generate(&mut RandomStream::default(), &PolicyCache::default());
        assert!(matches!(result, Err(CgError::InvalidParams(_))));
    }

    #[test]
    fn test_split_rows() {
        let mut data = [1, 2, 3, 4, 5];
        let rows = split_rows(&mut data, &[0, 2, 2, 5]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], &[1, 2]);
        assert!(rows[1].is_empty());
        assert_eq!(rows[2], &[3, 4, 5]);
    }
}
