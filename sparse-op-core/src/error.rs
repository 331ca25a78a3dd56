use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparseOpError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("H diagonal has not been loaded")]
    MissingDiagonal,

    #[error("Algorithm did not converge")]
    NonConvergence,

    #[error("Breakdown at iteration {iteration}: {value_name} ({value}) is near zero")]
    Breakdown {
        iteration: usize,
        value_name: String, // e.g. "p^T * S * p"
        value: f64,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, SparseOpError>;
