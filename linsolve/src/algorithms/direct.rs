use log::{debug, info};

use linsolve_core::linalg::{abs_residual, back_substitute, decompose_lu, max_abs, upper_triangularize};
use linsolve_core::{CpuDevice, DenseMatrix, GpuDevice, Kernel, Matrix, Result};

use super::{DirectLu, GaussianElimination, SolveAlgorithm, SolveResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectMetadata {
    /// `max_i |b_i - (Ax)_i|` at the computed solution.
    pub residual_norm: f64,
}

fn residual_norm(a: &DenseMatrix, b: &[f64], x: &[f64]) -> Result<f64> {
    max_abs(&abs_residual(a, b, x)?)
}

impl SolveAlgorithm<CpuDevice, DenseMatrix> for DirectLu {
    type Value = f64;
    type Metadata = DirectMetadata;

    async fn solve(
        &self,
        _device: &CpuDevice,
        a: &DenseMatrix,
        b: &[f64],
    ) -> Result<SolveResult<f64, DirectMetadata>> {
        <Self as SolveAlgorithm<CpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        let lu = decompose_lu(a)?;
        debug!("LU decomposition of {}x{} matrix done", lu.dim(), lu.dim());
        let x = lu.solve(b)?;
        let residual_norm = residual_norm(a, b, &x)?;
        info!("LU solve finished, max residual = {}", residual_norm);
        Ok(SolveResult {
            x,
            metadata: DirectMetadata { residual_norm },
        })
    }
}

impl SolveAlgorithm<CpuDevice, DenseMatrix> for GaussianElimination {
    type Value = f64;
    type Metadata = DirectMetadata;

    async fn solve(
        &self,
        _device: &CpuDevice,
        a: &DenseMatrix,
        b: &[f64],
    ) -> Result<SolveResult<f64, DirectMetadata>> {
        <Self as SolveAlgorithm<CpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        let (u, y) = triangularize(a, b)?;
        let x = back_substitute(&u, &y)?;
        let residual_norm = residual_norm(a, b, &x)?;
        info!("Gaussian elimination finished, max residual = {}", residual_norm);
        Ok(SolveResult {
            x,
            metadata: DirectMetadata { residual_norm },
        })
    }
}

impl SolveAlgorithm<GpuDevice, DenseMatrix> for GaussianElimination {
    type Value = f64;
    type Metadata = DirectMetadata;

    /// Eliminates on the host, then back-substitutes on the device.
    async fn solve(
        &self,
        device: &GpuDevice,
        a: &DenseMatrix,
        b: &[f64],
    ) -> Result<SolveResult<f64, DirectMetadata>> {
        <Self as SolveAlgorithm<GpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        let (u, y) = triangularize(a, b)?;
        let program = device.compile_bundled(Kernel::BackSubstitution).await?;
        let x = device.back_substitute(&program, &u, &y).await?;
        let residual_norm = residual_norm(a, b, &x)?;
        info!(
            "Gaussian elimination on {} finished, max residual = {}",
            device.name(),
            residual_norm
        );
        Ok(SolveResult {
            x,
            metadata: DirectMetadata { residual_norm },
        })
    }
}

fn triangularize(a: &DenseMatrix, b: &[f64]) -> Result<(DenseMatrix, Vec<f64>)> {
    let mut u = a.clone();
    let mut y = b.to_vec();
    upper_triangularize(&mut u, &mut y)?;
    debug!("Eliminated {}x{} system to upper-triangular form", u.rows(), u.cols());
    Ok((u, y))
}
