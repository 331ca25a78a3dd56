use sparse_op_core::{error::Result, SparseBackend};
use std::future::Future;

use crate::applier::OperatorApplier;

// --- Operator Trait Definition ---
/// A square linear operator whose action can be applied to device vectors.
/// Generic over the backend (CPU/GPU) the vectors live on.
pub trait LinearOperator<B: SparseBackend> {
    /// Length of the vectors the operator maps between.
    fn size(&self) -> usize;

    /// Computes `y = S * x`, overwriting `y`.
    fn apply(&mut self, x: &B::Vector, y: &mut B::Vector) -> impl Future<Output = Result<()>>;
}

impl<B: SparseBackend> LinearOperator<B> for OperatorApplier<'_, B> {
    fn size(&self) -> usize {
        self.dims().1
    }

    async fn apply(&mut self, x: &B::Vector, y: &mut B::Vector) -> Result<()> {
        OperatorApplier::apply(self, x, y).await
    }
}

pub struct SolveResult<X, M> {
    pub x: X,        // Solution vector
    pub metadata: M, // Metadata about the solve process
}

// --- Algorithm Implementations ---
pub mod conjugate_gradient;

pub use conjugate_gradient::ConjugateGradientMetadata;

// --- Algorithm Struct Definitions ---

/// Conjugate Gradient Algorithm for symmetric positive-definite operators.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    /// Stop once `‖r‖ <= tolerance * ‖b‖`.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 1000,
        }
    }
}

impl ConjugateGradient {
    /// Creates a new instance of the Conjugate Gradient algorithm with default parameters.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new instance of the Conjugate Gradient algorithm with specified parameters.
    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}
