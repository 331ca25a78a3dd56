use crate::context::GpuContext;
use crate::error::SparseOpError;
use crate::traits::Vector;
use std::{mem, sync::Arc};

/// Dense `f64` vector in a GPU storage buffer.
///
/// Keeps its device alive; the buffer is released on drop.
#[derive(Debug)]
pub struct GpuVector {
    buffer: wgpu::Buffer,
    len: usize,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuVector {
    pub(crate) fn new(buffer: wgpu::Buffer, len: usize, context: Arc<GpuContext>) -> Self {
        Self {
            buffer,
            len,
            context,
        }
    }

    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    fn byte_len(&self) -> u64 {
        (self.len * mem::size_of::<f64>()) as u64
    }

    /// Reads the vector back to the host once all queued work has run.
    pub async fn read_contents(&self) -> Result<Vec<f64>, SparseOpError> {
        self.context.download(&self.buffer, self.len).await
    }

    /// Overwrites the whole vector with `data`.
    ///
    /// The write is queued; it is ordered before any later submission on the device.
    pub fn write_contents(&self, data: &[f64]) -> Result<(), SparseOpError> {
        if data.len() != self.len {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Cannot write {} values into a GPU vector of length {}",
                data.len(),
                self.len
            )));
        }
        self.context.write(&self.buffer, data)
    }

    /// Queues a device-side copy of `source` into this vector.
    pub fn copy_from(&mut self, source: &GpuVector) -> Result<(), SparseOpError> {
        if !Arc::ptr_eq(&self.context, &source.context) {
            return Err(SparseOpError::UnsupportedOperation(
                "Cannot copy between vectors of different devices".to_string(),
            ));
        }
        if self.len != source.len {
            return Err(SparseOpError::InvalidDimensions(format!(
                "Copy between GPU vectors of length {} and {}",
                source.len, self.len
            )));
        }
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vector copy"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &self.buffer, 0, self.byte_len());
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl Vector for GpuVector {
    type Value = f64;

    fn len(&self) -> usize {
        self.len
    }
}
