//! # Sparse Operator Core Library
//!
//! Provides CSR matrices, dense vectors and the sparse-BLAS primitives
//! (`SparseBackend`) that the operator applier is built on, with a wgpu
//! compute device and a host reference device.

// Declare modules
mod context;
pub mod cpu;
pub mod device;
pub mod error;
mod ops;
pub mod sparse_matrix;
pub mod traits;
pub mod vector;

// Re-export public types
pub use context::GpuDeviceOptions;
pub use cpu::{CpuDevice, HostVector, HostWorkspace};
pub use device::{GpuDevice, TransferStats};
pub use error::SparseOpError;
pub use ops::GpuSpmvWorkspace;
pub use sparse_matrix::{SparseMatrix, SparseMatrixGpu, Triplete};
pub use vector::GpuVector;

pub use traits::{Device, Matrix, SparseBackend, SpmvWorkspace, Vector};
