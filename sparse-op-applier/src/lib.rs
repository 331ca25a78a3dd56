//! `sparse-op-applier`: matrix-free application of `S = t·Q + Aᵗ·H·A`.
//!
//! Provides the [`OperatorApplier`], which evaluates `S·v` on a CPU or wgpu
//! device while reusing its scratch buffers across calls, and iterative
//! solvers that consume it through the [`LinearOperator`] trait.

pub mod algorithms;
pub mod applier;

pub use algorithms::{ConjugateGradient, ConjugateGradientMetadata, LinearOperator, SolveResult};
pub use applier::OperatorApplier;

// Re-export from sparse_op_core
pub use sparse_op_core::{
    CpuDevice, GpuDevice, GpuDeviceOptions, GpuVector, HostVector, Matrix, SparseBackend,
    SparseMatrix, SparseMatrixGpu, SparseOpError, Triplete, Vector,
};
