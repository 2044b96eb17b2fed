use crate::buffer::DeviceBuffer;
use crate::context::GpuContext;
use crate::dense::DenseMatrix;
use crate::error::Result;
use crate::ops;
use crate::program::{self, CompiledProgram, Kernel};
use std::sync::Arc;

/// Marker trait for execution devices (CPU, GPU).
pub trait Device: std::fmt::Debug {}

/// Represents a CPU execution device.
#[derive(Debug, Clone, Default)]
pub struct CpuDevice {}
impl Device for CpuDevice {}

/// Represents a GPU execution device, holding the WGPU context.
///
/// Adapter selection happens here once; everything downstream treats the
/// device as an opaque execution context.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDevice {
    /// Creates a new GpuDevice, initializing the underlying WGPU context asynchronously.
    pub async fn new() -> Result<Self> {
        let context = GpuContext::new().await?;
        log::info!("GpuDevice created successfully");
        Ok(Self {
            context: Arc::new(context),
        })
    }

    /// Blocking variant of [`GpuDevice::new`].
    #[cfg(feature = "native")]
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    /// Adapter name and backend, e.g. `"NVIDIA GeForce RTX 3060 (Vulkan)"`.
    pub fn name(&self) -> String {
        self.context.device_name()
    }

    /// Whether kernels on this device may use `f64`.
    pub fn supports_f64(&self) -> bool {
        self.context.supports_f64()
    }

    // --- Resource Creation ---

    /// Uploads host data into a read-only device buffer.
    pub fn upload(&self, label: &str, data: &[f64]) -> Result<DeviceBuffer> {
        DeviceBuffer::upload(&self.context, label, data)
    }

    /// Allocates a write-only device buffer of `size` elements.
    pub fn create_output_buffer(&self, label: &str, size: usize) -> Result<DeviceBuffer> {
        DeviceBuffer::output(&self.context, label, size)
    }

    // --- Programs and launches ---

    /// Builds `source` as `kernel`.
    ///
    /// # Errors
    /// `LinsolveError::Compilation` with the full build log if the source does not
    /// compile or does not match the kernel's binding layout.
    pub async fn compile(&self, kernel: Kernel, source: &str) -> Result<CompiledProgram> {
        program::internal_compile(&self.context, kernel, source).await
    }

    /// Builds the WGSL that ships with the crate for `kernel`.
    pub async fn compile_bundled(&self, kernel: Kernel) -> Result<CompiledProgram> {
        self.compile(kernel, kernel.bundled_source()).await
    }

    /// Performs one Jacobi sweep on the device and returns the new iterate.
    ///
    /// `a` is `n x n`, `b` and `x_prev` have length `n`. The call blocks until
    /// the launch has finished and the result is back in host memory.
    pub async fn dispatch_row_update(
        &self,
        program: &CompiledProgram,
        a: &DenseMatrix,
        b: &[f64],
        x_prev: &[f64],
    ) -> Result<Vec<f64>> {
        ops::internal_row_update(&self.context, program, a, b, x_prev).await
    }

    /// `A v` on the device, one work-item per row.
    pub async fn mat_vec(
        &self,
        program: &CompiledProgram,
        a: &DenseMatrix,
        v: &[f64],
    ) -> Result<Vec<f64>> {
        ops::internal_mat_vec(&self.context, program, a, v).await
    }

    /// One steepest-descent update along the residual `r`, given `ar = A r`.
    /// Returns the new iterate and the updated residual.
    pub async fn descent_step(
        &self,
        program: &CompiledProgram,
        r: &[f64],
        ar: &[f64],
        x: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        ops::internal_descent_step(&self.context, program, r, ar, x).await
    }

    /// Solves `U x = y` for upper-triangular `U` with a column sweep on the device.
    ///
    /// Entries below the diagonal of `u` are ignored.
    pub async fn back_substitute(
        &self,
        program: &CompiledProgram,
        u: &DenseMatrix,
        y: &[f64],
    ) -> Result<Vec<f64>> {
        ops::internal_back_substitute(&self.context, program, u, y).await
    }

    // --- Utility ---

    /// Returns the current GPU transfer statistics.
    pub fn transfer_stats(&self) -> TransferStats {
        self.context.transfer_stats()
    }

    /// Resets the GPU transfer statistics counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}
impl Device for GpuDevice {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAccess;
    use crate::error::LinsolveError;
    use crate::program::JACOBI_ROW_KERNEL;
    use pollster::block_on;

    fn f64_gpu() -> Option<GpuDevice> {
        let _ = env_logger::builder().is_test(true).try_init();
        match GpuDevice::new_blocking() {
            Ok(device) if device.supports_f64() => Some(device),
            Ok(device) => {
                log::warn!("Skipping: {} has no SHADER_F64 support", device.name());
                None
            }
            Err(e) => {
                assert!(matches!(e, LinsolveError::WgpuInitError(_)));
                log::warn!("Skipping: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_buffers_record_access_and_size() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let input = device.upload("input", &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(input.access(), BufferAccess::ReadOnly);
        assert_eq!(input.size_bytes(), 24);
        assert!(block_on(input.read_contents()).is_err());

        let output = device.create_output_buffer("output", 4).unwrap();
        assert_eq!(output.access(), BufferAccess::WriteOnly);
        assert_eq!(output.label(), "output");

        assert!(matches!(
            device.upload("empty", &[]),
            Err(LinsolveError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_identity_row_update_returns_rhs() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let program = block_on(device.compile(Kernel::JacobiRow, JACOBI_ROW_KERNEL)).unwrap();
        assert_eq!(program.entry_point(), "jacobi_row");
        assert!(!program.build_log().has_errors());

        let a = DenseMatrix::identity(4);
        let b = [1.0, -2.0, 3.5, 0.25];
        let x = block_on(device.dispatch_row_update(&program, &a, &b, &[9.0; 4])).unwrap();
        assert_eq!(x, b.to_vec());
    }

    #[test]
    fn test_mat_vec_matches_host() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let program = block_on(device.compile_bundled(Kernel::MatVec)).unwrap();
        let a = DenseMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        let y = block_on(device.mat_vec(&program, &a, &[1.0, 0.5, -1.0])).unwrap();
        assert_eq!(y, crate::linalg::mat_vec(&a, &[1.0, 0.5, -1.0]).unwrap());
        assert_eq!(y, vec![-1.0, 0.5]);
    }

    #[test]
    fn test_back_substitution_matches_host() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let program = block_on(device.compile_bundled(Kernel::BackSubstitution)).unwrap();
        let u = DenseMatrix::from_rows(&[
            vec![2.0, -1.0, 0.0],
            vec![0.0, 1.5, -1.0],
            vec![0.0, 0.0, 4.0 / 3.0],
        ])
        .unwrap();
        let y = [200.0, 100.0, 1400.0 / 3.0];
        let x = block_on(device.back_substitute(&program, &u, &y)).unwrap();
        let expected = crate::linalg::back_substitute(&u, &y).unwrap();
        for (xi, ei) in x.iter().zip(&expected) {
            assert!((xi - ei).abs() < 1e-9, "{:?} vs {:?}", x, expected);
        }

        let singular = DenseMatrix::from_rows(&[vec![1.0, 1.0], vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            block_on(device.back_substitute(&program, &singular, &[1.0, 1.0])),
            Err(LinsolveError::SingularMatrix { pivot: 1 })
        ));
    }

    #[test]
    fn test_descent_step_moves_along_residual() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let program = block_on(device.compile_bundled(Kernel::DescentStep)).unwrap();
        // A = 2I: s = (r.r)/(r.2r) = 0.5, so one step lands on x + r/2.
        let r = [2.0, -4.0];
        let ar = [4.0, -8.0];
        let (x, r_next) = block_on(device.descent_step(&program, &r, &ar, &[1.0, 1.0])).unwrap();
        assert_eq!(x, vec![2.0, -1.0]);
        assert_eq!(r_next, vec![0.0, 0.0]);
    }

    #[test]
    fn test_program_must_match_launch() {
        let Some(device) = f64_gpu() else {
            return;
        };
        let program = block_on(device.compile_bundled(Kernel::MatVec)).unwrap();
        let a = DenseMatrix::identity(2);
        assert!(matches!(
            block_on(device.dispatch_row_update(&program, &a, &[1.0, 1.0], &[0.0, 0.0])),
            Err(LinsolveError::Dispatch(_))
        ));
    }
}
