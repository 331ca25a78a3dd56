use log::{debug, info, warn};
use sparse_op_core::{error::Result, SparseBackend, SparseOpError, Vector};

use super::{ConjugateGradient, LinearOperator, SolveResult};

#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradientMetadata {
    pub iterations: usize,
    pub residual_norm: f64,
}

impl ConjugateGradient {
    /// Solves `S * x = b` from a zero initial guess, where `S` is `operator`.
    ///
    /// `S` must be symmetric positive-definite. The solution stays on the
    /// backend; read it back through the backend's vector type.
    ///
    /// # Errors
    /// `NonConvergence` when `max_iterations` is reached, `Breakdown` when
    /// `pᵗ·S·p` vanishes, plus any failure from the backend or the operator.
    pub async fn solve<B, O>(
        &self,
        backend: &B,
        operator: &mut O,
        b: &B::Vector,
    ) -> Result<SolveResult<B::Vector, ConjugateGradientMetadata>>
    where
        B: SparseBackend,
        O: LinearOperator<B>,
    {
        let n = operator.size();
        if b.len() != n {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Operator size ({}) must match b vector length ({})",
                n,
                b.len()
            )));
        }

        // x = 0, r = b - S*x = b, p = r
        let mut x = backend.create_empty_vector("x (solution)", n)?;
        backend.axpby(0.0, b, 0.0, &mut x).await?;
        let mut r = backend.create_empty_vector("r (residual)", n)?;
        backend.copy(b, &mut r)?;
        let mut p = backend.create_empty_vector("p (direction)", n)?;
        backend.copy(&r, &mut p)?;
        let mut sp = backend.create_empty_vector("sp (S*p)", n)?;

        let mut rs_old = backend.dot(&r, &r).await?;
        let b_norm = rs_old.sqrt();
        info!("Initial residual norm: {}", b_norm);

        if b_norm == 0.0 {
            info!("Right-hand side is zero; returning the zero solution.");
            return Ok(SolveResult {
                x,
                metadata: ConjugateGradientMetadata {
                    iterations: 0,
                    residual_norm: 0.0,
                },
            });
        }
        let threshold = self.tolerance * b_norm;

        let mut iterations = 0;
        loop {
            if iterations >= self.max_iterations {
                warn!(
                    "CG reached maximum iterations ({}) without converging.",
                    self.max_iterations
                );
                return Err(SparseOpError::NonConvergence);
            }

            operator.apply(&p, &mut sp).await?;

            let pt_sp = backend.dot(&p, &sp).await?;
            // For SPD S, pᵗSp >= λ_min ‖p‖² and ‖p‖² >= ‖r‖².
            if pt_sp.is_nan() || pt_sp.abs() <= f64::EPSILON * rs_old {
                warn!("CG breakdown: p^T * S * p is close to zero.");
                return Err(SparseOpError::Breakdown {
                    iteration: iterations,
                    value_name: "p^T * S * p".to_string(),
                    value: pt_sp,
                });
            }
            let alpha = rs_old / pt_sp;

            // x = x + alpha * p
            backend.axpby(alpha, &p, 1.0, &mut x).await?;
            // r = r - alpha * Sp
            backend.axpby(-alpha, &sp, 1.0, &mut r).await?;

            let rs_new = backend.dot(&r, &r).await?;
            let residual_norm = rs_new.sqrt();
            iterations += 1;
            debug!("Iteration {}: residual norm = {}", iterations, residual_norm);

            if residual_norm <= threshold {
                info!("CG converged in {} iterations.", iterations);
                return Ok(SolveResult {
                    x,
                    metadata: ConjugateGradientMetadata {
                        iterations,
                        residual_norm,
                    },
                });
            }

            // p = r + beta * p
            let beta = rs_new / rs_old;
            backend.axpby(1.0, &r, beta, &mut p).await?;

            rs_old = rs_new;
        }
    }
}
