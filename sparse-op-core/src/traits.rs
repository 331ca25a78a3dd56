use bytemuck::{Pod, Zeroable};
use std::fmt::Debug;
use std::future::Future;

use crate::error::Result;

/// Generic trait representing a matrix.
/// Implementations can be host-resident or GPU-resident.
pub trait Matrix: Debug {
    /// The underlying numeric type of the matrix elements.
    type Value: Copy + Debug + Default + Pod + Zeroable;

    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    /// Returns the number of rows.
    fn rows(&self) -> usize {
        self.dims().0
    }

    /// Returns the number of columns.
    fn cols(&self) -> usize {
        self.dims().1
    }

    /// Returns the number of stored entries.
    fn nnz(&self) -> usize;
}

/// Generic trait representing a dense vector.
pub trait Vector: Debug {
    /// The underlying numeric type of the vector elements.
    type Value: Copy + Debug + Default + Pod + Zeroable;

    /// Returns the number of elements in the vector.
    fn len(&self) -> usize;

    /// Checks if the vector is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A product workspace sized for one sparsity pattern.
pub trait SpmvWorkspace: Debug {
    /// Pattern dimensions this workspace was sized for: (rows, cols, nnz).
    fn pattern(&self) -> (usize, usize, usize);

    /// Whether `matrix` has the pattern this workspace was sized for.
    fn fits<M: Matrix>(&self, matrix: &M) -> bool {
        self.pattern() == (matrix.rows(), matrix.cols(), matrix.nnz())
    }
}

/// Marker trait for execution devices (CPU, GPU).
pub trait Device: Debug {}

/// Sparse-BLAS style primitives an execution device provides.
///
/// Every operation is issued in program order on the device's single queue,
/// so the result of one call is visible to the next without explicit
/// synchronization. Results only become host-observable through a readback.
pub trait SparseBackend: Device {
    /// Dense vector resident on the device.
    type Vector: Vector<Value = f64>;
    /// CSR matrix resident on the device.
    type Matrix: Matrix<Value = f64>;
    /// Reusable product workspace, valid only for the sparsity pattern it was sized for.
    type Workspace: SpmvWorkspace;

    /// Allocates a vector of `size` elements. Contents are unspecified.
    fn create_empty_vector(&self, label: &str, size: usize) -> Result<Self::Vector>;

    /// Builds the CSR transpose of `matrix`. Transient work memory is released before returning.
    fn transpose(&self, matrix: &Self::Matrix) -> impl Future<Output = Result<Self::Matrix>>;

    /// Sizes and allocates a workspace for repeated `spmv` calls with `matrix`.
    fn spmv_workspace(&self, matrix: &Self::Matrix) -> Result<Self::Workspace>;

    /// `y = matrix * x`, overwriting `y`.
    fn spmv(
        &self,
        workspace: &Self::Workspace,
        matrix: &Self::Matrix,
        x: &Self::Vector,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// `y = diag ⊙ y`, element-wise and in place.
    fn scale_elements(
        &self,
        diag: &Self::Vector,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// `y = alpha * x + beta * y`.
    fn axpby(
        &self,
        alpha: f64,
        x: &Self::Vector,
        beta: f64,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// `x^T * y`, read back to the host.
    fn dot(&self, x: &Self::Vector, y: &Self::Vector) -> impl Future<Output = Result<f64>>;

    /// `dst = src`.
    fn copy(&self, src: &Self::Vector, dst: &mut Self::Vector) -> Result<()>;
}
