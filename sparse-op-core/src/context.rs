use crate::device::TransferStats;
use crate::error::SparseOpError;
use crate::ops::PipelineCache;
use bytemuck::Pod;
use cfg_if::cfg_if;
use futures::channel::oneshot;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use wgpu::util::DeviceExt;

/// Adapter selection options for a `GpuDevice`.
#[derive(Debug, Clone)]
pub struct GpuDeviceOptions {
    pub power_preference: wgpu::PowerPreference,
    pub backends: wgpu::Backends,
    pub force_fallback_adapter: bool,
}

impl Default for GpuDeviceOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            backends: wgpu::Backends::PRIMARY,
            force_fallback_adapter: false,
        }
    }
}

/// Host/device byte counters for every upload and readback made through a context.
#[derive(Debug, Default)]
struct TransferCounters {
    to_gpu: AtomicU64,
    from_gpu: AtomicU64,
}

impl TransferCounters {
    fn record_upload(&self, bytes: u64) {
        let total = self.to_gpu.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("Uploaded {} bytes, {} in total", bytes, total);
    }

    fn record_download(&self, bytes: u64) {
        let total = self.from_gpu.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("Read back {} bytes, {} in total", bytes, total);
    }

    fn snapshot(&self) -> TransferStats {
        TransferStats {
            bytes_to_gpu: self.to_gpu.load(Ordering::Relaxed),
            bytes_from_gpu: self.from_gpu.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.to_gpu.store(0, Ordering::Relaxed);
        self.from_gpu.store(0, Ordering::Relaxed);
    }
}

/// One wgpu device and its queue, shared behind an `Arc` by every vector,
/// matrix and workspace created from it.
///
/// All work is submitted on `queue` and executes in submission order.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) pipelines: PipelineCache,
    transfers: TransferCounters,
}

impl GpuContext {
    /// Requests an adapter and a device able to run the `f64` sparse kernels.
    ///
    /// Fails with `WgpuInitError` when no adapter matches `options` or the
    /// adapter lacks `SHADER_F64`.
    pub(crate) async fn new(options: &GpuDeviceOptions) -> Result<Self, SparseOpError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .map_err(|e| SparseOpError::WgpuInitError(format!("No adapter: {:?}", e)))?;
        log::info!("Selected adapter: {:?}", adapter.get_info());

        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            return Err(SparseOpError::WgpuInitError(
                "Adapter does not support SHADER_F64".to_string(),
            ));
        }

        let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
        // SpMV binds three CSR arrays plus x and y.
        limits.max_storage_buffers_per_shader_stage =
            limits.max_storage_buffers_per_shader_stage.max(5);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("sparse_op_core device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::SHADER_F64,
                required_limits: limits,
            })
            .await
            .map_err(|e| SparseOpError::WgpuInitError(format!("Device request failed: {}", e)))?;
        log::debug!("Device limits: {:?}", device.limits());

        Ok(Self {
            device,
            queue,
            pipelines: PipelineCache::default(),
            transfers: TransferCounters::default(),
        })
    }

    /// Creates a buffer holding `contents`, counted as an upload.
    pub(crate) fn upload(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.transfers.record_upload(contents.len() as u64);
        buffer
    }

    /// Creates an uninitialized buffer of `size` bytes. Nothing is transferred.
    pub(crate) fn allocate(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::trace!("Allocating buffer '{}' of {} bytes", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Queues a write of `data` to the start of `buffer`, counted as an upload.
    pub(crate) fn write<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        data: &[T],
    ) -> Result<(), SparseOpError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as u64 > buffer.size() {
            return Err(SparseOpError::Internal(format!(
                "Write of {} bytes into a {}-byte buffer",
                bytes.len(),
                buffer.size()
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.queue.write_buffer(buffer, 0, bytes);
        self.transfers.record_upload(bytes.len() as u64);
        Ok(())
    }

    /// Blocks until every submission on the queue has finished.
    pub(crate) fn wait_idle(&self) -> Result<(), SparseOpError> {
        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                self.device
                    .poll(wgpu::PollType::Wait)
                    .map_err(|e| SparseOpError::WgpuError(format!("Device poll failed: {:?}", e)))?;
            }
        }
        Ok(())
    }

    /// Copies the first `count` elements of `buffer` back to the host.
    ///
    /// The copy is queued after all earlier submissions, so the result reflects them.
    pub(crate) async fn download<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> Result<Vec<T>, SparseOpError> {
        let byte_len = (count * mem::size_of::<T>()) as u64;
        if byte_len == 0 {
            return Ok(Vec::new());
        }
        if byte_len > buffer.size() {
            return Err(SparseOpError::Internal(format!(
                "Readback of {} bytes from a {}-byte buffer",
                byte_len,
                buffer.size()
            )));
        }

        let staging = self.allocate(
            "readback staging",
            byte_len,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                log::warn!("Readback finished after its caller went away");
            }
        });
        // Native backends only run map callbacks while polled.
        self.wait_idle()?;
        receiver
            .await
            .map_err(|_| SparseOpError::Internal("Readback callback was dropped".to_string()))?
            .map_err(|e| SparseOpError::WgpuError(format!("Readback mapping failed: {:?}", e)))?;

        let data = bytemuck::cast_slice::<u8, T>(&slice.get_mapped_range()).to_vec();
        staging.unmap();
        self.transfers.record_download(byte_len);
        Ok(data)
    }

    pub(crate) fn transfer_stats(&self) -> TransferStats {
        self.transfers.snapshot()
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.transfers.reset();
        log::debug!("Transfer counters reset");
    }
}
