//! Host reference device.
//!
//! Implements the same [`SparseBackend`] seam as [`crate::GpuDevice`] on plain
//! `Vec<f64>` storage. Operations complete before they return, so there is
//! nothing to synchronize.

use crate::error::SparseOpError;
use crate::sparse_matrix::SparseMatrix;
use crate::traits::{Device, SparseBackend, SpmvWorkspace, Vector};
use num_traits::Float;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Represents a CPU execution device.
///
/// Clones share the allocation counters.
#[derive(Debug, Clone, Default)]
pub struct CpuDevice {
    workspace_allocations: Arc<AtomicUsize>,
    vector_allocations: Arc<AtomicUsize>,
}

/// Dense vector in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostVector {
    data: Vec<f64>,
}

impl HostVector {
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

impl Vector for HostVector {
    type Value = f64;

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Host products need no scratch memory; the workspace only pins the
/// pattern it was sized for so a reuse with another matrix is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWorkspace {
    rows: usize,
    cols: usize,
    nnz: usize,
}

impl SpmvWorkspace for HostWorkspace {
    fn pattern(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.nnz)
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a HostVector initialized with a copy of `data`.
    pub fn create_vector(&self, label: &str, data: &[f64]) -> Result<HostVector, SparseOpError> {
        if data.is_empty() {
            return Err(SparseOpError::InvalidDimensions(
                "Cannot create host vector from empty slice".to_string(),
            ));
        }
        self.vector_allocations.fetch_add(1, Ordering::Relaxed);
        log::trace!("Copying {} elements into host vector '{}'", data.len(), label);
        Ok(HostVector::new(data.to_vec()))
    }

    /// Number of product workspaces allocated through this device so far.
    pub fn workspace_allocations(&self) -> usize {
        self.workspace_allocations.load(Ordering::Relaxed)
    }

    /// Number of vectors allocated through this device so far.
    pub fn vector_allocations(&self) -> usize {
        self.vector_allocations.load(Ordering::Relaxed)
    }
}

impl Device for CpuDevice {}

impl SparseBackend for CpuDevice {
    type Vector = HostVector;
    type Matrix = SparseMatrix;
    type Workspace = HostWorkspace;

    fn create_empty_vector(&self, label: &str, size: usize) -> Result<HostVector, SparseOpError> {
        if size == 0 {
            return Err(SparseOpError::InvalidDimensions(
                "Cannot create empty host vector with size 0".to_string(),
            ));
        }
        self.vector_allocations.fetch_add(1, Ordering::Relaxed);
        log::trace!("Allocating host vector '{}' of {} elements", label, size);
        Ok(HostVector::new(vec![0.0; size]))
    }

    async fn transpose(&self, matrix: &SparseMatrix) -> Result<SparseMatrix, SparseOpError> {
        Ok(matrix.transpose())
    }

    fn spmv_workspace(&self, matrix: &SparseMatrix) -> Result<HostWorkspace, SparseOpError> {
        self.workspace_allocations.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Host SpMV workspace sized for {}x{} pattern with {} entries",
            matrix.rows(),
            matrix.cols(),
            matrix.nnz()
        );
        Ok(HostWorkspace {
            rows: matrix.rows(),
            cols: matrix.cols(),
            nnz: matrix.nnz(),
        })
    }

    async fn spmv(
        &self,
        workspace: &HostWorkspace,
        matrix: &SparseMatrix,
        x: &HostVector,
        y: &mut HostVector,
    ) -> Result<(), SparseOpError> {
        if !workspace.fits(matrix) {
            return Err(SparseOpError::InvalidDimensions(format!(
                "SpMV workspace sized for {:?} reused with a {}x{} matrix with {} entries",
                workspace.pattern(),
                matrix.rows(),
                matrix.cols(),
                matrix.nnz()
            )));
        }
        if matrix.cols() != x.len() || matrix.rows() != y.len() {
            return Err(SparseOpError::InvalidDimensions(format!(
                "SpMV with a {}x{} matrix needs x of {} and y of {}, got {} and {}",
                matrix.rows(),
                matrix.cols(),
                matrix.cols(),
                matrix.rows(),
                x.len(),
                y.len()
            )));
        }
        csr_spmv(
            matrix.row_ptr(),
            matrix.col_indices(),
            matrix.values(),
            x.as_slice(),
            y.as_mut_slice(),
        );
        Ok(())
    }

    async fn scale_elements(
        &self,
        diag: &HostVector,
        y: &mut HostVector,
    ) -> Result<(), SparseOpError> {
        if diag.len() != y.len() {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Diagonal length ({}) does not match vector size ({}) for scale_elements",
                diag.len(),
                y.len()
            )));
        }
        hadamard_in_place(diag.as_slice(), y.as_mut_slice());
        Ok(())
    }

    async fn axpby(
        &self,
        alpha: f64,
        x: &HostVector,
        beta: f64,
        y: &mut HostVector,
    ) -> Result<(), SparseOpError> {
        if x.len() != y.len() {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Vector sizes for axpby mismatch: {} != {}",
                x.len(),
                y.len()
            )));
        }
        axpby(alpha, x.as_slice(), beta, y.as_mut_slice());
        Ok(())
    }

    async fn dot(&self, x: &HostVector, y: &HostVector) -> Result<f64, SparseOpError> {
        if x.len() != y.len() {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Vector sizes for dot product mismatch: {} != {}",
                x.len(),
                y.len()
            )));
        }
        Ok(dot(x.as_slice(), y.as_slice()))
    }

    fn copy(&self, src: &HostVector, dst: &mut HostVector) -> Result<(), SparseOpError> {
        if src.len() != dst.len() {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Vector sizes for copy mismatch: {} != {}",
                src.len(),
                dst.len()
            )));
        }
        dst.as_mut_slice().copy_from_slice(src.as_slice());
        Ok(())
    }
}

// --- Host kernels ---

/// `y = A * x` for a CSR matrix; every entry of `y` is overwritten.
fn csr_spmv<T: Float>(
    row_ptr: &[usize],
    col_indices: &[usize],
    values: &[T],
    x: &[T],
    y: &mut [T],
) {
    for (row, out) in y.iter_mut().enumerate() {
        let (start, end) = (row_ptr[row], row_ptr[row + 1]);
        *out = col_indices[start..end]
            .iter()
            .zip(&values[start..end])
            .fold(T::zero(), |acc, (&col, &value)| acc + value * x[col]);
    }
}

fn hadamard_in_place<T: Float>(diag: &[T], y: &mut [T]) {
    for (out, &d) in y.iter_mut().zip(diag) {
        *out = d * *out;
    }
}

/// BLAS semantics: with `beta == 0` the old contents of `y` are not read.
fn axpby<T: Float>(alpha: T, x: &[T], beta: T, y: &mut [T]) {
    for (out, &xi) in y.iter_mut().zip(x) {
        *out = if beta == T::zero() {
            alpha * xi
        } else {
            alpha * xi + beta * *out
        };
    }
}

fn dot<T: Float>(x: &[T], y: &[T]) -> T {
    x.iter().zip(y).fold(T::zero(), |acc, (&a, &b)| acc + a * b)
}
