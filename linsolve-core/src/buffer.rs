use crate::context::GpuContext;
use crate::error::{LinsolveError, Result};
use crate::traits::Vector;
use std::{mem, sync::Arc};

/// How a kernel is allowed to use a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Operand uploaded from the host, only read by the kernel.
    ReadOnly,
    /// Kernel output, copied back to the host after the launch.
    WriteOnly,
    /// Seeded from the host, updated in place by the kernel, then read back.
    ReadWrite,
}

/// Device-resident `f64` storage paired with the host data it was created from.
///
/// The underlying `wgpu::Buffer` is destroyed when the handle is dropped, so a
/// buffer never outlives the dispatch that created it, whichever way that
/// dispatch returns.
#[derive(Debug)]
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: usize, // Number of f64 elements
    access: BufferAccess,
    label: String,
    context: Arc<GpuContext>,
}

impl DeviceBuffer {
    /// Uploads `data` into a new read-only storage buffer.
    pub(crate) fn upload(context: &Arc<GpuContext>, label: &str, data: &[f64]) -> Result<Self> {
        Self::from_host(context, label, data, BufferAccess::ReadOnly)
    }

    /// Uploads `data` into a storage buffer the kernel may overwrite and the
    /// host may read back.
    pub(crate) fn upload_mut(context: &Arc<GpuContext>, label: &str, data: &[f64]) -> Result<Self> {
        Self::from_host(context, label, data, BufferAccess::ReadWrite)
    }

    fn from_host(
        context: &Arc<GpuContext>,
        label: &str,
        data: &[f64],
        access: BufferAccess,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(LinsolveError::EmptyInput(format!(
                "cannot create device buffer '{}' from an empty slice",
                label
            )));
        }
        let usage = match access {
            BufferAccess::ReadOnly => wgpu::BufferUsages::STORAGE,
            _ => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        };
        let buffer = context.upload(label, bytemuck::cast_slice(data), usage);
        Ok(Self {
            buffer,
            size: data.len(),
            access,
            label: label.to_string(),
            context: Arc::clone(context),
        })
    }

    /// Allocates an uninitialized output buffer of `size` elements.
    pub(crate) fn output(context: &Arc<GpuContext>, label: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(LinsolveError::EmptyInput(format!(
                "cannot create device buffer '{}' with size 0",
                label
            )));
        }
        let buffer = context.allocate(
            label,
            (size * mem::size_of::<f64>()) as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        Ok(Self {
            buffer,
            size,
            access: BufferAccess::WriteOnly,
            label: label.to_string(),
            context: Arc::clone(context),
        })
    }

    /// Number of `f64` elements.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn size_bytes(&self) -> u64 {
        (self.size * mem::size_of::<f64>()) as u64
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub(crate) fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    /// Copies a kernel-written buffer back into host memory, blocking until the device is done.
    pub async fn read_contents(&self) -> Result<Vec<f64>> {
        if self.access == BufferAccess::ReadOnly {
            return Err(LinsolveError::Internal(format!(
                "buffer '{}' is read-only on the device and cannot be read back",
                self.label
            )));
        }
        self.context.download(&self.buffer, self.size).await
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        log::trace!("Releasing device buffer '{}'", self.label);
        self.buffer.destroy();
    }
}

impl Vector for DeviceBuffer {
    type Value = f64;

    fn len(&self) -> usize {
        self.size()
    }
}
