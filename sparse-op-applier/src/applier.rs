//! Matrix-free evaluation of `S = t·Q + Aᵗ·H·A`.
//!
//! The applier borrows `A`, `Q` and the diagonal of `H` from the caller and owns
//! only what it derives: the transpose `Aᵗ`, built once in [`OperatorApplier::new`],
//! and the scratch state used by [`OperatorApplier::apply`].
//!
//! Scratch is split in two independently allocated parts. The linear part
//! (`w` of length `m` and the product workspaces for `A` and `Aᵗ`) is created on
//! the first `apply`. The quadratic part (`r` of length `n` and the workspace
//! for `Q`) is created on the first `apply` made while quadratic mode is on.
//! Each part is kept as an `Option` whose presence is the allocation state, and
//! both are reused by every later call.
//!
//! All products are issued in order on the backend's single queue. On an
//! asynchronous device the output is only observable after a readback or an
//! explicit synchronization.

use sparse_op_core::{error::Result, Matrix, SparseBackend, SparseOpError, SpmvWorkspace, Vector};

/// Scratch for the `Aᵗ·H·A` term.
#[derive(Debug)]
struct LinearScratch<B: SparseBackend> {
    w: B::Vector,
    a_workspace: B::Workspace,
    at_workspace: B::Workspace,
}

impl<B: SparseBackend> LinearScratch<B> {
    fn allocate(backend: &B, a: &B::Matrix, a_t: &B::Matrix) -> Result<Self> {
        log::debug!(
            "Allocating linear scratch for {}x{} A with {} entries",
            a.rows(),
            a.cols(),
            a.nnz()
        );
        Ok(Self {
            w: backend.create_empty_vector("w (A*v)", a.rows())?,
            a_workspace: backend.spmv_workspace(a)?,
            at_workspace: backend.spmv_workspace(a_t)?,
        })
    }
}

/// Scratch for the `t·Q` term, sized for one Q pattern.
#[derive(Debug)]
struct QuadraticScratch<B: SparseBackend> {
    r: B::Vector,
    workspace: B::Workspace,
}

impl<B: SparseBackend> QuadraticScratch<B> {
    fn allocate(backend: &B, q: &B::Matrix) -> Result<Self> {
        log::debug!(
            "Allocating quadratic scratch for {}x{} Q with {} entries",
            q.rows(),
            q.cols(),
            q.nnz()
        );
        Ok(Self {
            r: backend.create_empty_vector("r (Q*v)", q.rows())?,
            workspace: backend.spmv_workspace(q)?,
        })
    }
}

/// A loaded Q together with the scratch sized for it.
#[derive(Debug)]
struct QuadraticTerm<'a, B: SparseBackend> {
    q: &'a B::Matrix,
    enabled: bool,
    scratch: Option<QuadraticScratch<B>>,
}

/// Applies `S = t·Q + Aᵗ·H·A` to device vectors without forming `S`.
///
/// `apply` takes `&mut self`: one application at a time per instance, since
/// every call overwrites the shared scratch vectors.
#[derive(Debug)]
pub struct OperatorApplier<'a, B: SparseBackend> {
    backend: &'a B,
    a: &'a B::Matrix,
    a_t: B::Matrix,
    h: Option<&'a B::Vector>,
    t: f64,
    quadratic: Option<QuadraticTerm<'a, B>>,
    linear: Option<LinearScratch<B>>,
}

impl<'a, B: SparseBackend> OperatorApplier<'a, B> {
    /// Builds an applier for the `m x n` matrix `A`, computing `Aᵗ` immediately.
    ///
    /// Supplying `q` is equivalent to calling [`load_q_matrix`](Self::load_q_matrix)
    /// afterwards: quadratic mode starts enabled.
    ///
    /// # Errors
    /// `InvalidDimensions` if `q` is not `n x n`; backend failures from the
    /// transpose are propagated unchanged.
    pub async fn new(backend: &'a B, a: &'a B::Matrix, q: Option<&'a B::Matrix>) -> Result<Self> {
        let (m, n) = a.dims();
        if let Some(q) = q {
            check_q_dims(q, n)?;
        }
        let a_t = backend.transpose(a).await?;
        log::info!(
            "Operator applier ready: A is {}x{} with {} entries, quadratic term {}",
            m,
            n,
            a.nnz(),
            if q.is_some() { "loaded" } else { "absent" }
        );
        Ok(Self {
            backend,
            a,
            a_t,
            h: None,
            t: 1.0,
            quadratic: q.map(|q| QuadraticTerm {
                q,
                enabled: true,
                scratch: None,
            }),
            linear: None,
        })
    }

    /// Attaches `q` and enables quadratic mode.
    ///
    /// Existing quadratic scratch is kept. Its product workspace is reused when
    /// `q` has the same (rows, cols, nnz) pattern as the previous Q and resized
    /// here otherwise, so `is_quadratic_allocated` never goes back to false.
    pub fn load_q_matrix(&mut self, q: &'a B::Matrix) -> Result<()> {
        check_q_dims(q, self.a.cols())?;
        let resized = match self.quadratic.as_ref().and_then(|term| term.scratch.as_ref()) {
            Some(scratch) if !scratch.workspace.fits(q) => {
                log::debug!("Resizing the Q product workspace for a new pattern");
                Some(self.backend.spmv_workspace(q)?)
            }
            _ => None,
        };
        let mut scratch = self.quadratic.take().and_then(|term| term.scratch);
        if let (Some(scratch), Some(workspace)) = (scratch.as_mut(), resized) {
            scratch.workspace = workspace;
        }
        self.quadratic = Some(QuadraticTerm {
            q,
            enabled: true,
            scratch,
        });
        Ok(())
    }

    /// Replaces the diagonal of `H`. Nothing is copied or allocated.
    pub fn load_h_matrix(&mut self, h: &'a B::Vector) -> Result<()> {
        let m = self.a.rows();
        if h.len() != m {
            return Err(SparseOpError::InvalidDimensions(format!(
                "H diagonal has length {}, A has {} rows",
                h.len(),
                m
            )));
        }
        self.h = Some(h);
        Ok(())
    }

    /// Sets the weight `t` of the quadratic term. Defaults to 1.0.
    pub fn set_q_scalar(&mut self, t: f64) {
        self.t = t;
    }

    /// Turns quadratic mode on or off.
    ///
    /// Without a loaded Q the mode stays off whatever is requested.
    pub fn set_quadratic(&mut self, enabled: bool) {
        match self.quadratic.as_mut() {
            Some(term) => term.enabled = enabled,
            None if enabled => {
                log::warn!("Quadratic mode requested without a Q matrix; staying linear-only")
            }
            None => {}
        }
    }

    /// `out = Aᵗ·(H ⊙ (A·v))`, plus `t·Q·v` in quadratic mode.
    ///
    /// Every call fully overwrites `out`; its previous contents are never read.
    ///
    /// # Errors
    /// `MissingDiagonal` before any H is loaded, `InvalidDimensions` if `v` or
    /// `out` is not of length `n`. Backend failures are propagated unchanged.
    pub async fn apply(&mut self, v: &B::Vector, out: &mut B::Vector) -> Result<()> {
        let h = self.h.ok_or(SparseOpError::MissingDiagonal)?;
        let n = self.a.cols();
        if v.len() != n || out.len() != n {
            return Err(SparseOpError::InvalidDimensions(format!(
                "apply expects vectors of length {}, got v = {} and out = {}",
                n,
                v.len(),
                out.len()
            )));
        }
        let backend = self.backend;

        let linear = match &mut self.linear {
            Some(scratch) => scratch,
            slot => slot.insert(LinearScratch::allocate(backend, self.a, &self.a_t)?),
        };
        backend
            .spmv(&linear.a_workspace, self.a, v, &mut linear.w)
            .await?;
        backend.scale_elements(h, &mut linear.w).await?;
        backend
            .spmv(&linear.at_workspace, &self.a_t, &linear.w, out)
            .await?;

        if let Some(term) = self.quadratic.as_mut().filter(|term| term.enabled) {
            let scratch = match &mut term.scratch {
                Some(scratch) => scratch,
                slot => slot.insert(QuadraticScratch::allocate(backend, term.q)?),
            };
            backend
                .spmv(&scratch.workspace, term.q, v, &mut scratch.r)
                .await?;
            backend.axpby(self.t, &scratch.r, 1.0, out).await?;
        }
        Ok(())
    }

    /// Blocking variant of [`apply`](Self::apply) for synchronous callers.
    #[cfg(feature = "native")]
    pub fn apply_blocking(&mut self, v: &B::Vector, out: &mut B::Vector) -> Result<()> {
        pollster::block_on(self.apply(v, out))
    }

    pub fn is_linear_allocated(&self) -> bool {
        self.linear.is_some()
    }

    /// True once quadratic scratch exists for the currently loaded Q.
    pub fn is_quadratic_allocated(&self) -> bool {
        self.quadratic
            .as_ref()
            .is_some_and(|term| term.scratch.is_some())
    }

    /// True only when a Q is loaded and the mode is enabled.
    pub fn is_quadratic(&self) -> bool {
        self.quadratic.as_ref().is_some_and(|term| term.enabled)
    }

    pub fn q_scalar(&self) -> f64 {
        self.t
    }

    /// Dimensions `(m, n)` of `A`.
    pub fn dims(&self) -> (usize, usize) {
        self.a.dims()
    }

    /// The transpose built at construction.
    pub fn a_transpose(&self) -> &B::Matrix {
        &self.a_t
    }
}

fn check_q_dims<M: Matrix>(q: &M, n: usize) -> Result<()> {
    if q.dims() != (n, n) {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Q must be {}x{} to match the columns of A, got {}x{}",
            n,
            n,
            q.rows(),
            q.cols()
        )));
    }
    Ok(())
}
