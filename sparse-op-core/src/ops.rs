// Internal implementation of the GPU compute kernels. The public entry points
// are the `SparseBackend` methods on `GpuDevice`.

use crate::{
    context::GpuContext,
    error::SparseOpError,
    sparse_matrix::SparseMatrixGpu,
    traits::{SpmvWorkspace, Vector},
    vector::GpuVector,
};
use bytemuck::{Pod, Zeroable};
use std::{mem, sync::OnceLock};

/// Must match `@workgroup_size` in every shader under `shaders/`.
const WORKGROUP_SIZE: u32 = 256;

// --- Helper Structs (Internal) ---
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SpmvParams {
    rows: u32,
    cols: u32,
    nnz: u32,
    _padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SizeParams {
    size: u32,
    _padding: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AxpbyParams {
    alpha: f64,
    beta: f64,
    size: u32,
    _padding: [u32; 3],
}

/// SpMV uniform parameters for one CSR pattern.
///
/// Reusing it with a matrix of a different shape or nnz is rejected by
/// [`internal_spmv`]; dropping it releases the uniform buffer.
#[derive(Debug)]
pub struct GpuSpmvWorkspace {
    rows: usize,
    cols: usize,
    nnz: usize,
    params_buffer: wgpu::Buffer,
}

impl SpmvWorkspace for GpuSpmvWorkspace {
    fn pattern(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.nnz)
    }
}

/// A compiled compute pipeline with its single bind group layout.
#[derive(Debug)]
struct Kernel {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Pipelines compiled on first use and shared by every call on one device.
#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    spmv: OnceLock<Kernel>,
    scale: OnceLock<Kernel>,
    axpby: OnceLock<Kernel>,
    dot_partial: OnceLock<Kernel>,
    dot_final: OnceLock<Kernel>,
}

impl PipelineCache {
    /// Number of pipelines compiled so far.
    pub(crate) fn compiled(&self) -> usize {
        [
            &self.spmv,
            &self.scale,
            &self.axpby,
            &self.dot_partial,
            &self.dot_final,
        ]
        .iter()
        .filter(|slot| slot.get().is_some())
        .count()
    }

    fn spmv(&self, device: &wgpu::Device) -> &Kernel {
        self.spmv.get_or_init(|| {
            build_kernel(
                device,
                "SpMV CSR",
                include_str!("./shaders/spmv_csr.wgsl"),
                "main_spmv_csr_per_row",
                &[
                    uniform_entry(0),
                    // row_pointers, col_indices, values, x
                    storage_entry(1, true),
                    storage_entry(2, true),
                    storage_entry(3, true),
                    storage_entry(4, true),
                    // y
                    storage_entry(5, false),
                ],
            )
        })
    }

    fn scale(&self, device: &wgpu::Device) -> &Kernel {
        self.scale.get_or_init(|| {
            build_kernel(
                device,
                "Scale Elements",
                include_str!("./shaders/scale_elements.wgsl"),
                "main",
                &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
            )
        })
    }

    fn axpby(&self, device: &wgpu::Device) -> &Kernel {
        self.axpby.get_or_init(|| {
            build_kernel(
                device,
                "AXPBY",
                include_str!("./shaders/axpby.wgsl"),
                "main",
                &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
            )
        })
    }

    fn dot_partial(&self, device: &wgpu::Device) -> &Kernel {
        self.dot_partial.get_or_init(|| {
            build_kernel(
                device,
                "Dot Product Pass 1",
                include_str!("./shaders/dot_product_pass1.wgsl"),
                "main",
                &[
                    uniform_entry(0),
                    storage_entry(1, true),
                    storage_entry(2, true),
                    storage_entry(3, false),
                ],
            )
        })
    }

    fn dot_final(&self, device: &wgpu::Device) -> &Kernel {
        self.dot_final.get_or_init(|| {
            build_kernel(
                device,
                "Dot Product Pass 2",
                include_str!("./shaders/dot_product_pass2.wgsl"),
                "main",
                &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
            )
        })
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Compiles `source` and builds a single-bind-group compute pipeline for it.
fn build_kernel(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Kernel {
    log::debug!("Compiling {} pipeline", label);
    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader_module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    });
    Kernel { layout, pipeline }
}

fn bind_buffers(
    context: &GpuContext,
    label: &str,
    kernel: &Kernel,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    context.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &kernel.layout,
        entries: &entries,
    })
}

fn workgroups_for(size: usize) -> Result<u32, SparseOpError> {
    let count = size.div_ceil(WORKGROUP_SIZE as usize);
    let limit = wgpu::Limits::default().max_compute_workgroups_per_dimension as usize;
    if count > limit {
        return Err(SparseOpError::UnsupportedOperation(format!(
            "Vector of {} elements needs {} workgroups, limit is {}",
            size, count, limit
        )));
    }
    Ok(count as u32)
}

/// Records a single compute pass into `encoder`.
fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    kernel: &Kernel,
    bind_group: &wgpu::BindGroup,
    workgroups: u32,
) {
    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    compute_pass.set_pipeline(&kernel.pipeline);
    compute_pass.set_bind_group(0, bind_group, &[]);
    compute_pass.dispatch_workgroups(workgroups, 1, 1);
}

fn submit_single_pass(
    context: &GpuContext,
    label: &str,
    kernel: &Kernel,
    bind_group: &wgpu::BindGroup,
    workgroups: u32,
) {
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    encode_pass(&mut encoder, label, kernel, bind_group, workgroups);
    context.queue.submit(std::iter::once(encoder.finish()));
}

// --- Internal GPU Operation Functions ---

/// Uploads the pattern parameters for `matrix`, compiling the SpMV kernel on first use.
pub(crate) fn internal_spmv_workspace(
    context: &GpuContext,
    matrix: &SparseMatrixGpu,
) -> Result<GpuSpmvWorkspace, SparseOpError> {
    context.pipelines.spmv(&context.device);
    let params = SpmvParams {
        rows: matrix.rows() as u32,
        cols: matrix.cols() as u32,
        nnz: matrix.nnz() as u32,
        _padding: 0,
    };
    let params_buffer = context.upload(
        "SpMV Params Buffer",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    log::debug!(
        "SpMV workspace sized for {}x{} pattern with {} entries",
        matrix.rows(),
        matrix.cols(),
        matrix.nnz()
    );
    Ok(GpuSpmvWorkspace {
        rows: matrix.rows(),
        cols: matrix.cols(),
        nnz: matrix.nnz(),
        params_buffer,
    })
}

/// `y = matrix * x` using a workspace previously sized for `matrix`.
pub(crate) fn internal_spmv(
    context: &GpuContext,
    workspace: &GpuSpmvWorkspace,
    matrix: &SparseMatrixGpu,
    x: &GpuVector,
    y: &mut GpuVector,
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
    if matrix.cols() != x.len() {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Matrix cols ({}) do not match vector x size ({}) for SpMV",
            matrix.cols(),
            x.len()
        )));
    }
    if matrix.rows() != y.len() {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Matrix rows ({}) do not match vector y size ({}) for SpMV",
            matrix.rows(),
            y.len()
        )));
    }
    let workgroups = workgroups_for(matrix.rows())?;
    if workgroups == 0 {
        return Ok(());
    }

    let kernel = context.pipelines.spmv(&context.device);
    let bind_group = bind_buffers(
        context,
        "SpMV CSR Bind Group",
        kernel,
        &[
            &workspace.params_buffer,
            matrix.row_pointers_buffer(),
            matrix.col_indices_buffer(),
            matrix.values_buffer(),
            x.inner(),
            y.inner(),
        ],
    );
    submit_single_pass(context, "SpMV CSR Pass", kernel, &bind_group, workgroups);
    Ok(())
}

/// `y = diag ⊙ y` on the GPU.
pub(crate) fn internal_scale_elements(
    context: &GpuContext,
    diag: &GpuVector,
    y: &mut GpuVector,
) -> Result<(), SparseOpError> {
    let size = y.len();
    if diag.len() != size {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Diagonal length ({}) does not match vector size ({}) for scale_elements",
            diag.len(),
            size
        )));
    }
    let workgroups = workgroups_for(size)?;
    let params = SizeParams {
        size: size as u32,
        _padding: [0; 3],
    };
    let params_buffer = context.upload(
        "Scale Elements Params Buffer",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let kernel = context.pipelines.scale(&context.device);
    let bind_group = bind_buffers(
        context,
        "Scale Elements Bind Group",
        kernel,
        &[&params_buffer, diag.inner(), y.inner()],
    );
    submit_single_pass(context, "Scale Elements Pass", kernel, &bind_group, workgroups);
    Ok(())
}

/// `y = alpha * x + beta * y` on the GPU.
pub(crate) fn internal_axpby(
    context: &GpuContext,
    alpha: f64,
    x: &GpuVector,
    beta: f64,
    y: &mut GpuVector,
) -> Result<(), SparseOpError> {
    let size = y.len();
    if x.len() != size {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Vector sizes for axpby mismatch: {} != {}",
            x.len(),
            size
        )));
    }
    let workgroups = workgroups_for(size)?;
    let params = AxpbyParams {
        alpha,
        beta,
        size: size as u32,
        _padding: [0; 3],
    };
    let params_buffer = context.upload(
        "AXPBY Params Buffer",
        bytemuck::bytes_of(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let kernel = context.pipelines.axpby(&context.device);
    let bind_group = bind_buffers(
        context,
        "AXPBY Bind Group",
        kernel,
        &[&params_buffer, x.inner(), y.inner()],
    );
    submit_single_pass(context, "AXPBY Pass", kernel, &bind_group, workgroups);
    Ok(())
}

/// `x^T * y` on the GPU with a two-pass reduction, read back to the host.
pub(crate) async fn internal_dot(
    context: &GpuContext,
    x: &GpuVector,
    y: &GpuVector,
) -> Result<f64, SparseOpError> {
    if y.len() != x.len() {
        return Err(SparseOpError::InvalidDimensions(format!(
            "Vector sizes for dot product mismatch: {} != {}",
            x.len(),
            y.len()
        )));
    }
    let num_workgroups = workgroups_for(x.len())?;
    if num_workgroups == 0 {
        return Ok(0.0);
    }

    // --- Pass 1: one partial sum per workgroup ---
    let partial_results_buffer = context.allocate(
        "Dot Product Partial Results Buffer",
        num_workgroups as u64 * mem::size_of::<f64>() as u64,
        wgpu::BufferUsages::STORAGE,
    );
    let params_pass1 = SizeParams {
        size: x.len() as u32,
        _padding: [0; 3],
    };
    let params_buffer_pass1 = context.upload(
        "Dot Product Pass 1 Params Buffer",
        bytemuck::bytes_of(&params_pass1),
        wgpu::BufferUsages::UNIFORM,
    );
    let kernel_pass1 = context.pipelines.dot_partial(&context.device);
    let bind_group_pass1 = bind_buffers(
        context,
        "Dot Product Pass 1 Bind Group",
        kernel_pass1,
        &[
            &params_buffer_pass1,
            x.inner(),
            y.inner(),
            &partial_results_buffer,
        ],
    );

    // --- Pass 2: sum of the partials ---
    let final_result_buffer = context.allocate(
        "Dot Product Final Result Buffer",
        mem::size_of::<f64>() as u64,
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );
    let params_pass2 = SizeParams {
        size: num_workgroups,
        _padding: [0; 3],
    };
    let params_buffer_pass2 = context.upload(
        "Dot Product Pass 2 Params Buffer",
        bytemuck::bytes_of(&params_pass2),
        wgpu::BufferUsages::UNIFORM,
    );
    let kernel_pass2 = context.pipelines.dot_final(&context.device);
    let bind_group_pass2 = bind_buffers(
        context,
        "Dot Product Pass 2 Bind Group",
        kernel_pass2,
        &[
            &params_buffer_pass2,
            &partial_results_buffer,
            &final_result_buffer,
        ],
    );

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Dot Product Encoder"),
        });
    encode_pass(
        &mut encoder,
        "Dot Product Pass 1",
        kernel_pass1,
        &bind_group_pass1,
        num_workgroups,
    );
    encode_pass(
        &mut encoder,
        "Dot Product Pass 2",
        kernel_pass2,
        &bind_group_pass2,
        1,
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let result = context.download::<f64>(&final_result_buffer, 1).await?;
    result.first().copied().ok_or_else(|| {
        SparseOpError::Internal("Dot product readback returned empty vector".to_string())
    })
}
