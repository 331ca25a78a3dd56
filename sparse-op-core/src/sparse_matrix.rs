use crate::context::GpuContext;
use crate::error::SparseOpError;
use crate::traits::Matrix;
use std::sync::Arc;

/// Represents a sparse matrix in Compressed Sparse Row (CSR) format on the CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    /// Number of rows.
    rows: usize,
    /// Number of columns.
    cols: usize,
    /// Vector containing the non-zero values of the matrix.
    pub(crate) values: Vec<f64>,
    /// Vector containing the column indices corresponding to the values.
    pub(crate) col_indices: Vec<usize>,
    /// Vector containing the pointers to the start of each row in `values` and `col_indices`.
    /// The length of this vector is `rows + 1`. `row_ptr[i]` gives the index in `values`
    /// where row `i` starts, and `row_ptr[rows]` gives the total number of non-zero elements (nnz).
    pub(crate) row_ptr: Vec<usize>,
}

impl SparseMatrix {
    /// Creates a new empty SparseMatrix with given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        SparseMatrix {
            rows,
            cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0; rows + 1],
        }
    }

    /// Builds a CSR matrix from unordered coordinate entries.
    /// Entries are sorted by (row, col); duplicates are kept as separate entries.
    pub fn from_triplets(
        rows: usize,
        cols: usize,
        triplets: Vec<Triplete>,
    ) -> Result<Self, SparseOpError> {
        let mut coords = triplets;
        coords.sort_unstable_by_key(|&Triplete { row, col, .. }| (row, col));

        // Count non-zeros per row
        let mut row_ptr = vec![0usize; rows + 1];
        for &Triplete { row, .. } in &coords {
            if row >= rows {
                return Err(SparseOpError::InvalidDimensions(
                    "Row index out of bounds".to_string(),
                ));
            }
            row_ptr[row + 1] += 1;
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        let nnz = coords.len();
        let mut values = vec![0.0; nnz];
        let mut col_indices = vec![0usize; nnz];
        let mut next = row_ptr.clone();
        for &Triplete { row, col, value } in &coords {
            if col >= cols {
                return Err(SparseOpError::InvalidDimensions(
                    "Column index out of bounds".to_string(),
                ));
            }
            let pos = next[row];
            values[pos] = value;
            col_indices[pos] = col;
            next[row] += 1;
        }

        Ok(SparseMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Creates a SparseMatrix from CSR components.
    ///
    /// # Errors
    /// Returns `InvalidDimensions` if the triplet violates the CSR invariants:
    /// `row_ptr` has `rows + 1` entries, starts at 0, never decreases and ends at nnz,
    /// and every column index is below `cols`.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        col_indices: Vec<usize>,
        row_ptr: Vec<usize>,
    ) -> Result<Self, SparseOpError> {
        if row_ptr.len() != rows + 1 {
            return Err(SparseOpError::InvalidDimensions(
                "row_ptr length must be rows + 1".to_string(),
            ));
        }
        if values.len() != col_indices.len() {
            return Err(SparseOpError::InvalidDimensions(
                "values and col_indices must have the same length".to_string(),
            ));
        }
        if row_ptr[0] != 0 {
            return Err(SparseOpError::InvalidDimensions(
                "First element of row_ptr must be 0".to_string(),
            ));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SparseOpError::InvalidDimensions(
                "row_ptr must be non-decreasing".to_string(),
            ));
        }
        if row_ptr[rows] != values.len() {
            return Err(SparseOpError::InvalidDimensions(
                "Last element of row_ptr must equal the number of non-zero values".to_string(),
            ));
        }
        if col_indices.iter().any(|&c| c >= cols) {
            return Err(SparseOpError::InvalidDimensions(
                "Column index out of bounds".to_string(),
            ));
        }

        Ok(SparseMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Creates an `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        SparseMatrix {
            rows: n,
            cols: n,
            values: vec![1.0; n],
            col_indices: (0..n).collect(),
            row_ptr: (0..=n).collect(),
        }
    }

    /// Creates a square matrix with `diag` on its main diagonal.
    pub fn from_diagonal(diag: &[f64]) -> Self {
        SparseMatrix {
            values: diag.to_vec(),
            ..Self::identity(diag.len())
        }
    }

    /// Returns the dimensions of the matrix (rows, cols).
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of non-zero elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Gets the value at a specific row and column.
    /// This is inefficient for sparse matrices, primarily for testing/debugging.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }

        let row_start = self.row_ptr[row];
        let row_end = self.row_ptr[row + 1];
        (row_start..row_end)
            .find(|&i| self.col_indices[i] == col)
            .map(|i| self.values[i])
    }

    /// Returns a slice containing the non-zero values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns a slice containing the column indices.
    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// Returns a slice containing the row pointers.
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Creates a SparseMatrix from a dense row-major representation, dropping exact zeros.
    /// The column count is taken from the first row.
    pub fn from_dense(dense: &[Vec<f64>]) -> Self {
        let rows = dense.len();
        if rows == 0 {
            return SparseMatrix::new(0, 0);
        }
        let cols = dense.first().map_or(0, |row| row.len());
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_ptr = vec![0; rows + 1];

        for (r, row_vec) in dense.iter().enumerate() {
            for (c, &val) in row_vec.iter().take(cols).enumerate() {
                if val != 0.0 {
                    values.push(val);
                    col_indices.push(c);
                }
            }
            row_ptr[r + 1] = values.len();
        }

        SparseMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        }
    }

    /// Returns the CSR transpose (`cols x rows`, same nnz).
    ///
    /// Counting sort over column indices: rows of the result list their
    /// column indices in ascending order regardless of the input ordering.
    pub fn transpose(&self) -> SparseMatrix {
        let nnz = self.nnz();
        let mut row_ptr = vec![0usize; self.cols + 1];
        for &c in &self.col_indices {
            row_ptr[c + 1] += 1;
        }
        for i in 1..=self.cols {
            row_ptr[i] += row_ptr[i - 1];
        }

        let mut values = vec![0.0; nnz];
        let mut col_indices = vec![0usize; nnz];
        let mut next = row_ptr.clone();
        for row in 0..self.rows {
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                let c = self.col_indices[k];
                let pos = next[c];
                col_indices[pos] = row;
                values[pos] = self.values[k];
                next[c] += 1;
            }
        }

        SparseMatrix {
            rows: self.cols,
            cols: self.rows,
            values,
            col_indices,
            row_ptr,
        }
    }

    /// Converts to a dense row-major representation. Intended for tests and debugging.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.cols]; self.rows];
        for Triplete { row, col, value } in self.iter() {
            dense[row][col] += value;
        }
        dense
    }

    pub fn iter(&self) -> SparseMatrixIter<'_> {
        SparseMatrixIter {
            matrix: self,
            row: 0,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplete {
    row: usize,
    col: usize,
    value: f64,
}

impl Triplete {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Triplete { row, col, value }
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

/// Iterates over the stored entries of a `SparseMatrix` in row-major order.
pub struct SparseMatrixIter<'a> {
    matrix: &'a SparseMatrix,
    row: usize,
    offset: usize,
}

impl Iterator for SparseMatrixIter<'_> {
    type Item = Triplete;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.matrix.rows {
            let row_start = self.matrix.row_ptr[self.row];
            let row_end = self.matrix.row_ptr[self.row + 1];
            if self.offset < row_end - row_start {
                let index = row_start + self.offset;
                self.offset += 1;
                return Some(Triplete {
                    row: self.row,
                    col: self.matrix.col_indices[index],
                    value: self.matrix.values[index],
                });
            }
            self.row += 1;
            self.offset = 0;
        }
        None
    }
}

impl Matrix for SparseMatrix {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz(&self) -> usize {
        self.values.len()
    }
}

/// Represents a sparse matrix in CSR format stored on the GPU.
///
/// Index buffers hold `u32`, the value buffer holds `f64`. Buffers are never
/// zero-sized: an empty matrix carries a single padding entry that no row
/// pointer ever reaches.
#[derive(Debug)]
pub struct SparseMatrixGpu {
    rows: usize,
    cols: usize,
    nnz: usize,
    values_buffer: wgpu::Buffer,
    col_indices_buffer: wgpu::Buffer,
    row_pointers_buffer: wgpu::Buffer,
    pub(crate) context: Arc<GpuContext>,
}

impl Matrix for SparseMatrixGpu {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nnz(&self) -> usize {
        self.nnz
    }
}

impl SparseMatrixGpu {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        rows: usize,
        cols: usize,
        nnz: usize,
        values_buffer: wgpu::Buffer,
        col_indices_buffer: wgpu::Buffer,
        row_pointers_buffer: wgpu::Buffer,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            rows,
            cols,
            nnz,
            values_buffer,
            col_indices_buffer,
            row_pointers_buffer,
            context,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn nnz(&self) -> usize {
        self.nnz
    }
    pub(crate) fn values_buffer(&self) -> &wgpu::Buffer {
        &self.values_buffer
    }
    pub(crate) fn col_indices_buffer(&self) -> &wgpu::Buffer {
        &self.col_indices_buffer
    }
    pub(crate) fn row_pointers_buffer(&self) -> &wgpu::Buffer {
        &self.row_pointers_buffer
    }
}

#[cfg(test)]
mod tests {
    use crate::sparse_matrix::Triplete;
    use crate::{SparseMatrix, SparseOpError};

    fn sample() -> SparseMatrix {
        // [ 1.0, 0.0, 2.0, 0.0 ]
        // [ 0.0, 3.0, 0.0, 4.0 ]
        // [ 0.0, 0.0, 5.0, 0.0 ]
        SparseMatrix::from_csr(
            3,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 1, 3, 2],
            vec![0, 2, 4, 5],
        )
        .unwrap()
    }

    #[test]
    fn test_sparse_matrix_new() {
        let matrix = SparseMatrix::new(3, 4);
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 0);
        assert_eq!(matrix.row_ptr, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_sparse_matrix_from_csr_valid() {
        let matrix = sample();
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 5);
        assert_eq!(matrix.row_ptr(), &[0, 2, 4, 5]);
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_row_ptr_len() {
        let matrix = SparseMatrix::from_csr(3, 4, vec![1.0], vec![0], vec![0, 1]);
        match matrix {
            Err(SparseOpError::InvalidDimensions(msg)) => assert!(msg.contains("row_ptr length")),
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_last_row_ptr() {
        let matrix = SparseMatrix::from_csr(3, 4, vec![1.0, 2.0], vec![0, 1], vec![0, 1, 1, 1]);
        match matrix {
            Err(SparseOpError::InvalidDimensions(msg)) => {
                assert!(msg.contains("Last element of row_ptr"))
            }
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_sparse_matrix_from_csr_decreasing_row_ptr() {
        let matrix = SparseMatrix::from_csr(2, 2, vec![1.0, 2.0], vec![0, 1], vec![0, 2, 1]);
        match matrix {
            Err(SparseOpError::InvalidDimensions(msg)) => assert!(msg.contains("non-decreasing")),
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_sparse_matrix_from_csr_invalid_col_index() {
        let matrix = SparseMatrix::from_csr(2, 3, vec![1.0, 2.0], vec![0, 3], vec![0, 1, 2]);
        match matrix {
            Err(SparseOpError::InvalidDimensions(msg)) => {
                assert!(msg.contains("Column index out of bounds"))
            }
            other => panic!("Expected InvalidDimensions error, got {:?}", other),
        }
    }

    #[test]
    fn test_sparse_matrix_get() {
        let matrix = sample();
        assert_eq!(matrix.get(0, 0), Some(1.0));
        assert_eq!(matrix.get(0, 2), Some(2.0));
        assert_eq!(matrix.get(1, 3), Some(4.0));
        assert_eq!(matrix.get(2, 2), Some(5.0));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.get(2, 3), None);
        assert_eq!(matrix.get(3, 0), None);
        assert_eq!(matrix.get(0, 4), None);
    }

    #[test]
    fn test_from_triplets_sorts_entries() {
        let matrix = SparseMatrix::from_triplets(
            2,
            3,
            vec![
                Triplete::new(1, 2, 6.0),
                Triplete::new(0, 1, 2.0),
                Triplete::new(1, 0, 4.0),
            ],
        )
        .unwrap();
        assert_eq!(matrix.row_ptr(), &[0, 1, 3]);
        assert_eq!(matrix.col_indices(), &[1, 0, 2]);
        assert_eq!(matrix.values(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_from_triplets_out_of_bounds() {
        let result = SparseMatrix::from_triplets(2, 2, vec![Triplete::new(2, 0, 1.0)]);
        assert!(matches!(result, Err(SparseOpError::InvalidDimensions(_))));
    }

    #[test]
    fn test_transpose_matches_dense() {
        let matrix = sample();
        let transposed = matrix.transpose();
        assert_eq!(transposed.dims(), (4, 3));
        assert_eq!(transposed.nnz(), matrix.nnz());

        let dense = matrix.to_dense();
        let dense_t = transposed.to_dense();
        for (i, row) in dense.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                assert_eq!(dense_t[j][i], value);
            }
        }
        // Column indices come out sorted within each row.
        assert_eq!(transposed.row_ptr(), &[0, 1, 2, 4, 5]);
        assert_eq!(transposed.col_indices(), &[0, 1, 0, 2, 1]);
    }

    #[test]
    fn test_transpose_twice_is_identity() {
        let matrix = sample();
        assert_eq!(matrix.transpose().transpose(), matrix);
    }

    #[test]
    fn test_transpose_empty_rows_and_cols() {
        let matrix = SparseMatrix::from_triplets(3, 2, vec![Triplete::new(2, 0, 7.0)]).unwrap();
        let transposed = matrix.transpose();
        assert_eq!(transposed.row_ptr(), &[0, 1, 1]);
        assert_eq!(transposed.get(0, 2), Some(7.0));
    }

    #[test]
    fn test_iter_skips_empty_rows() {
        let matrix = SparseMatrix::from_triplets(
            4,
            2,
            vec![Triplete::new(0, 1, 1.0), Triplete::new(3, 0, 2.0)],
        )
        .unwrap();
        let entries: Vec<_> = matrix.iter().collect();
        assert_eq!(
            entries,
            vec![Triplete::new(0, 1, 1.0), Triplete::new(3, 0, 2.0)]
        );
    }

    #[test]
    fn test_from_dense_and_identity() {
        let matrix = SparseMatrix::from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(matrix, SparseMatrix::identity(2));
        let diag = SparseMatrix::from_diagonal(&[2.0, 3.0]);
        assert_eq!(diag.get(1, 1), Some(3.0));
        assert_eq!(diag.get(0, 1), None);
    }
}
