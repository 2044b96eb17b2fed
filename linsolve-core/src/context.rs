//! Device bring-up and host <-> device copies.
//!
//! Every byte that crosses the bus goes through [`GpuContext::upload`] or
//! [`GpuContext::download`] so the counters in [`TransferCounters`] stay exact.

use crate::device::TransferStats;
use crate::error::{LinsolveError, Result};
use cfg_if::cfg_if;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use wgpu::{util::DeviceExt, PollType};

/// The widest kernel binds four storage buffers (A, b, x_prev, x_next).
const MIN_STORAGE_BUFFERS: u32 = 4;

#[derive(Debug, Default)]
pub(crate) struct TransferCounters {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

impl TransferCounters {
    fn record_upload(&self, bytes: u64) {
        let total = self.uploaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("uploaded {} bytes ({} total)", bytes, total);
    }

    fn record_download(&self, bytes: u64) {
        let total = self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        log::trace!("downloaded {} bytes ({} total)", bytes, total);
    }

    fn snapshot(&self) -> TransferStats {
        TransferStats {
            bytes_to_gpu: self.uploaded.load(Ordering::Relaxed),
            bytes_from_gpu: self.downloaded.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.uploaded.store(0, Ordering::Relaxed);
        self.downloaded.store(0, Ordering::Relaxed);
    }
}

/// One adapter, its logical device and queue. Shared behind an `Arc` by
/// `GpuDevice` and every `DeviceBuffer` it creates.
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    counters: TransferCounters,
}

async fn select_adapter() -> Result<wgpu::Adapter> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| LinsolveError::WgpuInitError(format!("no usable adapter: {}", e)))
}

fn compute_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
    let mut limits = wgpu::Limits::default().using_resolution(adapter.limits());
    limits.max_storage_buffers_per_shader_stage = limits
        .max_storage_buffers_per_shader_stage
        .max(MIN_STORAGE_BUFFERS);
    limits
}

impl GpuContext {
    pub(crate) async fn new() -> Result<Self> {
        let adapter = select_adapter().await?;
        let adapter_info = adapter.get_info();
        log::info!(
            "Using adapter '{}' ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        // Requesting a feature the adapter lacks fails the whole device, so f64
        // is only asked for when present and its absence shows up in build logs.
        let required_features = adapter.features() & wgpu::Features::SHADER_F64;
        if required_features.is_empty() {
            log::warn!("'{}' has no SHADER_F64 support", adapter_info.name);
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("linsolve device"),
                required_features,
                required_limits: compute_limits(&adapter),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| LinsolveError::WgpuInitError(format!("device request failed: {}", e)))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
            counters: TransferCounters::default(),
        })
    }

    /// `"name (Backend)"`, the key used in build logs.
    pub(crate) fn device_name(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }

    pub(crate) fn supports_f64(&self) -> bool {
        self.device.features().contains(wgpu::Features::SHADER_F64)
    }

    /// Creates a buffer initialized with `contents`; counted as host-to-device traffic.
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
        self.counters.record_upload(contents.len() as u64);
        buffer
    }

    /// Creates an uninitialized buffer of `size` bytes. Not counted.
    pub(crate) fn allocate(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Blocks until all submitted work has finished.
    pub(crate) fn wait_idle(&self) -> Result<()> {
        cfg_if! {
            if #[cfg(not(target_arch = "wasm32"))] {
                self.device
                    .poll(PollType::Wait)
                    .map_err(|e| LinsolveError::Dispatch(format!("device poll failed: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Copies the first `len` values of a `COPY_SRC` buffer into host memory.
    pub(crate) async fn download(&self, source: &wgpu::Buffer, len: usize) -> Result<Vec<f64>> {
        let bytes = (len * mem::size_of::<f64>()) as u64;
        if bytes == 0 {
            return Ok(Vec::new());
        }
        if source.size() < bytes {
            return Err(LinsolveError::Internal(format!(
                "cannot read {} bytes from a {} byte buffer",
                bytes,
                source.size()
            )));
        }

        let staging = self.allocate(
            "readback staging",
            bytes,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            // The receiver only goes away if the caller stopped waiting.
            let _ = sender.send(mapped);
        });
        self.wait_idle()?;

        receiver
            .await
            .map_err(|_| LinsolveError::Internal("readback channel closed".to_string()))?
            .map_err(|e| LinsolveError::Dispatch(format!("buffer mapping failed: {}", e)))?;

        let view = slice.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, f64>(&view).to_vec();
        drop(view);
        staging.unmap();
        self.counters.record_download(bytes);
        Ok(values)
    }

    pub(crate) fn transfer_stats(&self) -> TransferStats {
        self.counters.snapshot()
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.counters.reset();
        log::debug!("transfer counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_and_reset() {
        let counters = TransferCounters::default();
        counters.record_upload(64);
        counters.record_upload(16);
        counters.record_download(24);
        assert_eq!(
            counters.snapshot(),
            TransferStats {
                bytes_to_gpu: 80,
                bytes_from_gpu: 24
            }
        );
        counters.reset();
        assert_eq!(counters.snapshot(), TransferStats::default());
    }
}
