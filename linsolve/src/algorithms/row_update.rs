//! Executors for a single Jacobi sweep.
//!
//! The controller in [`super::jacobi`] only knows about [`RowUpdate`]; whether
//! the sweep runs on the GPU or on the host is decided by the executor it is
//! given.

use std::future::Future;

use linsolve_core::{
    CompiledProgram, DenseMatrix, GpuDevice, Kernel, LinsolveError, Matrix, Result,
    JACOBI_ROW_KERNEL,
};

/// Computes `x_next[i] = (b[i] - sum_{k != i} A[i,k] * x_prev[k]) / A[i,i]` for every row.
pub trait RowUpdate {
    fn row_update(
        &self,
        a: &DenseMatrix,
        b: &[f64],
        x_prev: &[f64],
    ) -> impl Future<Output = Result<Vec<f64>>>;
}

impl<T: RowUpdate + ?Sized> RowUpdate for &T {
    fn row_update(
        &self,
        a: &DenseMatrix,
        b: &[f64],
        x_prev: &[f64],
    ) -> impl Future<Output = Result<Vec<f64>>> {
        (**self).row_update(a, b, x_prev)
    }
}

/// Runs the sweep on the host. Used as the reference for the device path and
/// on machines without a usable adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRowUpdate;

impl RowUpdate for HostRowUpdate {
    async fn row_update(&self, a: &DenseMatrix, b: &[f64], x_prev: &[f64]) -> Result<Vec<f64>> {
        host_sweep(a, b, x_prev)
    }
}

/// One Jacobi sweep on the host.
pub fn host_sweep(a: &DenseMatrix, b: &[f64], x_prev: &[f64]) -> Result<Vec<f64>> {
    let n = a.rows();
    if !a.is_square() || b.len() != n || x_prev.len() != n {
        return Err(LinsolveError::InvalidDimensions(format!(
            "sweep needs a square matrix and vectors of matching length (A: {}x{}, b: {}, x_prev: {})",
            a.rows(),
            a.cols(),
            b.len(),
            x_prev.len()
        )));
    }

    Ok((0..n)
        .map(|i| {
            let row = a.row(i);
            let sum: f64 = row
                .iter()
                .zip(x_prev)
                .enumerate()
                .filter(|&(k, _)| k != i)
                .map(|(_, (aik, xk))| aik * xk)
                .sum();
            (b[i] - sum) / row[i]
        })
        .collect())
}

/// Runs the sweep on a GPU with a program compiled once up front.
#[derive(Debug)]
pub struct GpuRowUpdate<'d> {
    device: &'d GpuDevice,
    program: CompiledProgram,
}

impl<'d> GpuRowUpdate<'d> {
    /// Compiles the bundled row-update kernel for `device`.
    pub async fn new(device: &'d GpuDevice) -> Result<Self> {
        Self::with_source(device, JACOBI_ROW_KERNEL).await
    }

    /// Compiles a caller-supplied kernel. It must follow the row-update binding layout.
    pub async fn with_source(device: &'d GpuDevice, source: &str) -> Result<Self> {
        let program = device.compile(Kernel::JacobiRow, source).await?;
        Ok(Self { device, program })
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn device(&self) -> &GpuDevice {
        self.device
    }
}

impl RowUpdate for GpuRowUpdate<'_> {
    async fn row_update(&self, a: &DenseMatrix, b: &[f64], x_prev: &[f64]) -> Result<Vec<f64>> {
        self.device
            .dispatch_row_update(&self.program, a, b, x_prev)
            .await
    }
}
