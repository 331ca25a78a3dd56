use crate::context::{GpuContext, GpuDeviceOptions};
use crate::error::SparseOpError;
use crate::ops::{self, GpuSpmvWorkspace};
use crate::sparse_matrix::{SparseMatrix, SparseMatrixGpu};
use crate::traits::{Device, SparseBackend};
use crate::vector::GpuVector;
use std::{mem, sync::Arc};

const VECTOR_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Represents a GPU execution device, holding the WGPU context.
///
/// Cloning is cheap and yields a handle to the same device and queue.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDevice {
    /// Creates a new GpuDevice with default adapter options.
    pub async fn new() -> Result<Self, SparseOpError> {
        Self::with_options(&GpuDeviceOptions::default()).await
    }

    /// Creates a new GpuDevice, selecting the adapter according to `options`.
    pub async fn with_options(options: &GpuDeviceOptions) -> Result<Self, SparseOpError> {
        let context = GpuContext::new(options).await?;
        log::info!("GpuDevice created successfully");
        Ok(Self {
            context: Arc::new(context),
        })
    }

    /// Blocking variant of [`GpuDevice::new`] for synchronous callers.
    #[cfg(feature = "native")]
    pub fn new_blocking() -> Result<Self, SparseOpError> {
        pollster::block_on(Self::new())
    }

    // --- Resource Creation ---

    /// Creates a GpuVector initialized with data from a CPU slice.
    pub fn create_vector(&self, label: &str, data: &[f64]) -> Result<GpuVector, SparseOpError> {
        let size = data.len();
        if size == 0 {
            return Err(SparseOpError::InvalidDimensions(
                "Cannot create GPU vector from empty slice".to_string(),
            ));
        }
        let buffer = self
            .context
            .upload(label, bytemuck::cast_slice(data), VECTOR_USAGE);
        Ok(GpuVector::new(buffer, size, Arc::clone(&self.context)))
    }

    /// Creates an uninitialized GpuVector with a specified size.
    pub fn create_empty_vector(
        &self,
        label: &str,
        size: usize,
    ) -> Result<GpuVector, SparseOpError> {
        if size == 0 {
            return Err(SparseOpError::InvalidDimensions(
                "Cannot create empty GPU vector with size 0".to_string(),
            ));
        }
        let byte_size = (size * mem::size_of::<f64>()) as u64;
        let buffer = self.context.allocate(label, byte_size, VECTOR_USAGE);
        Ok(GpuVector::new(buffer, size, Arc::clone(&self.context)))
    }

    /// Clones a host CSR matrix into GPU storage buffers.
    pub fn create_sparse_matrix(
        &self,
        cpu_matrix: &SparseMatrix,
    ) -> Result<SparseMatrixGpu, SparseOpError> {
        let (rows, cols) = cpu_matrix.dims();
        let nnz = cpu_matrix.nnz();
        if rows > u32::MAX as usize || cols > u32::MAX as usize || nnz > u32::MAX as usize {
            return Err(SparseOpError::UnsupportedOperation(format!(
                "Matrix {}x{} with {} entries exceeds u32 GPU indexing",
                rows, cols, nnz
            )));
        }

        // Pad empty arrays so no binding is zero-sized; row pointers never reach the padding.
        let mut values = cpu_matrix.values.clone();
        let mut col_indices_u32: Vec<u32> =
            cpu_matrix.col_indices.iter().map(|&x| x as u32).collect();
        if nnz == 0 {
            values.push(0.0);
            col_indices_u32.push(0);
        }
        let row_ptr_u32: Vec<u32> = cpu_matrix.row_ptr.iter().map(|&x| x as u32).collect();

        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let values_buffer = self.context.upload(
            "GPU Sparse Matrix Values Buffer",
            bytemuck::cast_slice(&values),
            usage,
        );
        let col_indices_buffer = self.context.upload(
            "GPU Sparse Matrix Col Indices Buffer",
            bytemuck::cast_slice(&col_indices_u32),
            usage,
        );
        let row_pointers_buffer = self.context.upload(
            "GPU Sparse Matrix Row Pointers Buffer",
            bytemuck::cast_slice(&row_ptr_u32),
            usage,
        );

        Ok(SparseMatrixGpu::new_internal(
            rows,
            cols,
            nnz,
            values_buffer,
            col_indices_buffer,
            row_pointers_buffer,
            Arc::clone(&self.context),
        ))
    }

    /// Reads a GPU CSR matrix back into host memory.
    pub async fn read_sparse_matrix(
        &self,
        matrix: &SparseMatrixGpu,
    ) -> Result<SparseMatrix, SparseOpError> {
        let row_ptr: Vec<u32> = self
            .context
            .download(matrix.row_pointers_buffer(), matrix.rows() + 1)
            .await?;
        let col_indices: Vec<u32> = self
            .context
            .download(matrix.col_indices_buffer(), matrix.nnz())
            .await?;
        let values: Vec<f64> = self
            .context
            .download(matrix.values_buffer(), matrix.nnz())
            .await?;
        SparseMatrix::from_csr(
            matrix.rows(),
            matrix.cols(),
            values,
            col_indices.into_iter().map(|c| c as usize).collect(),
            row_ptr.into_iter().map(|r| r as usize).collect(),
        )
    }

    /// Bytes moved between host and device since creation or the last reset.
    pub fn get_transfer_stats(&self) -> TransferStats {
        self.context.transfer_stats()
    }

    /// Resets the GPU transfer statistics counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }

    /// Blocks until every command submitted to this device's queue has finished.
    pub fn synchronize(&self) -> Result<(), SparseOpError> {
        self.context.wait_idle()
    }

    /// Number of compute pipelines compiled on this device so far.
    ///
    /// Each kernel is compiled once, on its first use.
    pub fn cached_pipeline_count(&self) -> usize {
        self.context.pipelines.compiled()
    }
}

impl Device for GpuDevice {}

impl SparseBackend for GpuDevice {
    type Vector = GpuVector;
    type Matrix = SparseMatrixGpu;
    type Workspace = GpuSpmvWorkspace;

    fn create_empty_vector(&self, label: &str, size: usize) -> Result<GpuVector, SparseOpError> {
        GpuDevice::create_empty_vector(self, label, size)
    }

    /// Round-trips the pattern through host memory; the staging copies are dropped on return.
    async fn transpose(&self, matrix: &SparseMatrixGpu) -> Result<SparseMatrixGpu, SparseOpError> {
        let host = self.read_sparse_matrix(matrix).await?;
        let transposed = host.transpose();
        log::debug!(
            "Transposed {}x{} matrix with {} entries",
            host.rows(),
            host.cols(),
            host.nnz()
        );
        self.create_sparse_matrix(&transposed)
    }

    fn spmv_workspace(&self, matrix: &SparseMatrixGpu) -> Result<GpuSpmvWorkspace, SparseOpError> {
        ops::internal_spmv_workspace(&self.context, matrix)
    }

    async fn spmv(
        &self,
        workspace: &GpuSpmvWorkspace,
        matrix: &SparseMatrixGpu,
        x: &GpuVector,
        y: &mut GpuVector,
    ) -> Result<(), SparseOpError> {
        if !Arc::ptr_eq(&matrix.context, &self.context) {
            return Err(SparseOpError::UnsupportedOperation(
                "Matrix was created on a different device".to_string(),
            ));
        }
        ops::internal_spmv(&self.context, workspace, matrix, x, y)
    }

    async fn scale_elements(
        &self,
        diag: &GpuVector,
        y: &mut GpuVector,
    ) -> Result<(), SparseOpError> {
        ops::internal_scale_elements(&self.context, diag, y)
    }

    async fn axpby(
        &self,
        alpha: f64,
        x: &GpuVector,
        beta: f64,
        y: &mut GpuVector,
    ) -> Result<(), SparseOpError> {
        ops::internal_axpby(&self.context, alpha, x, beta, y)
    }

    async fn dot(&self, x: &GpuVector, y: &GpuVector) -> Result<f64, SparseOpError> {
        ops::internal_dot(&self.context, x, y).await
    }

    fn copy(&self, src: &GpuVector, dst: &mut GpuVector) -> Result<(), SparseOpError> {
        dst.copy_from(src)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}
