//! Steepest descent for symmetric positive definite systems.
//!
//! Each iteration needs `A r` and then a step along `r`; both are behind
//! [`DescentKernels`] so the same loop runs on the host or on a GPU.

use std::future::Future;

use log::{debug, error, info, warn};

use linsolve_core::linalg::{dot, max_abs, residual};
use linsolve_core::{
    linalg, CompiledProgram, CpuDevice, DenseMatrix, GpuDevice, Kernel, LinsolveError, Matrix,
    Result,
};

use super::{IterativeMetadata, IterativeReport, SolveAlgorithm, SolveResult, SteepestDescent, Termination};

/// The two device operations one descent iteration is made of.
pub trait DescentKernels {
    /// `A v`.
    fn mat_vec(&self, a: &DenseMatrix, v: &[f64]) -> impl Future<Output = Result<Vec<f64>>>;

    /// With `s = (r.r)/(r.Ar)`, returns `(x + s r, r - s Ar)`.
    fn descent_step(
        &self,
        r: &[f64],
        ar: &[f64],
        x: &[f64],
    ) -> impl Future<Output = Result<(Vec<f64>, Vec<f64>)>>;
}

impl<T: DescentKernels + ?Sized> DescentKernels for &T {
    fn mat_vec(&self, a: &DenseMatrix, v: &[f64]) -> impl Future<Output = Result<Vec<f64>>> {
        (**self).mat_vec(a, v)
    }

    fn descent_step(
        &self,
        r: &[f64],
        ar: &[f64],
        x: &[f64],
    ) -> impl Future<Output = Result<(Vec<f64>, Vec<f64>)>> {
        (**self).descent_step(r, ar, x)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostDescent;

impl DescentKernels for HostDescent {
    async fn mat_vec(&self, a: &DenseMatrix, v: &[f64]) -> Result<Vec<f64>> {
        linalg::mat_vec(a, v)
    }

    async fn descent_step(
        &self,
        r: &[f64],
        ar: &[f64],
        x: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        host_descent_step(r, ar, x)
    }
}

/// One steepest-descent update on the host.
///
/// `r.Ar == 0` is not trapped here: the step becomes infinite and the caller
/// sees a non-finite iterate.
pub fn host_descent_step(r: &[f64], ar: &[f64], x: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    if ar.len() != r.len() || x.len() != r.len() {
        return Err(LinsolveError::InvalidDimensions(format!(
            "descent step needs vectors of one length (r: {}, ar: {}, x: {})",
            r.len(),
            ar.len(),
            x.len()
        )));
    }
    let s = dot(r, r)? / dot(r, ar)?;
    let x_next = x.iter().zip(r).map(|(xi, ri)| xi + s * ri).collect();
    let r_next = r.iter().zip(ar).map(|(ri, ari)| ri - s * ari).collect();
    Ok((x_next, r_next))
}

/// Both descent kernels compiled for one device.
#[derive(Debug)]
pub struct GpuDescent<'d> {
    device: &'d GpuDevice,
    mat_vec: CompiledProgram,
    step: CompiledProgram,
}

impl<'d> GpuDescent<'d> {
    pub async fn new(device: &'d GpuDevice) -> Result<Self> {
        let mat_vec = device.compile_bundled(Kernel::MatVec).await?;
        let step = device.compile_bundled(Kernel::DescentStep).await?;
        Ok(Self {
            device,
            mat_vec,
            step,
        })
    }
}

impl DescentKernels for GpuDescent<'_> {
    async fn mat_vec(&self, a: &DenseMatrix, v: &[f64]) -> Result<Vec<f64>> {
        self.device.mat_vec(&self.mat_vec, a, v).await
    }

    async fn descent_step(
        &self,
        r: &[f64],
        ar: &[f64],
        x: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        self.device.descent_step(&self.step, r, ar, x).await
    }
}

/// Signed residual at the initial guess of a validated system.
struct Start {
    r: Vec<f64>,
    residual_norm: f64,
}

fn start(config: &SteepestDescent, a: &DenseMatrix, b: &[f64], x0: &[f64]) -> Result<Start> {
    config.validate()?;
    if !a.is_square() {
        return Err(LinsolveError::InvalidDimensions(format!(
            "Matrix A must be square (dims: {}x{})",
            a.rows(),
            a.cols()
        )));
    }
    let n = a.rows();
    if n == 0 {
        return Err(LinsolveError::EmptyInput(
            "cannot iterate on a 0x0 system".to_string(),
        ));
    }
    if b.len() != n || x0.len() != n {
        return Err(LinsolveError::InvalidDimensions(format!(
            "b and x0 must have length {} (got {} and {})",
            n,
            b.len(),
            x0.len()
        )));
    }
    if !a.is_symmetric() {
        warn!("Matrix is not symmetric; steepest descent may not converge");
    }

    let r = residual(a, b, x0)?;
    let residual_norm = norm(&r)?;
    Ok(Start { r, residual_norm })
}

fn norm(r: &[f64]) -> Result<f64> {
    let abs: Vec<f64> = r.iter().map(|ri| ri.abs()).collect();
    max_abs(&abs)
}

fn report(
    x: Vec<f64>,
    termination: Termination,
    iterations: usize,
    residual_norm: f64,
) -> IterativeReport {
    SolveResult {
        x,
        metadata: IterativeMetadata {
            termination,
            iterations,
            residual_norm,
        },
    }
}

impl SteepestDescent {
    /// Runs steepest descent from `x0` with the given kernels.
    ///
    /// The step direction is the residual carried by the step kernel. The
    /// stopping test uses `b - Ax` recomputed on the host.
    pub async fn solve_with_guess<K: DescentKernels>(
        &self,
        kernels: K,
        a: &DenseMatrix,
        b: &[f64],
        x0: &[f64],
    ) -> Result<IterativeReport> {
        let start = start(self, a, b, x0)?;
        Ok(self.iterate(kernels, a, b, x0.to_vec(), start).await)
    }

    async fn iterate<K: DescentKernels>(
        &self,
        kernels: K,
        a: &DenseMatrix,
        b: &[f64],
        mut x: Vec<f64>,
        start: Start,
    ) -> IterativeReport {
        let Start {
            mut r,
            mut residual_norm,
        } = start;
        let mut iterations = 0;
        info!(
            "Steepest descent start: n = {}, tolerance = {:e}, max iterations = {}, initial max residual = {}",
            x.len(),
            self.tolerance,
            self.max_iterations,
            residual_norm
        );

        loop {
            if residual_norm <= self.tolerance {
                info!(
                    "Steepest descent converged after {} iterations (max residual {})",
                    iterations, residual_norm
                );
                return report(x, Termination::Converged, iterations, residual_norm);
            }
            if iterations >= self.max_iterations {
                warn!(
                    "Steepest descent stopped at the iteration cap ({}) with max residual {}",
                    iterations, residual_norm
                );
                return report(x, Termination::MaxIterationsReached, iterations, residual_norm);
            }

            let stepped = match kernels.mat_vec(a, &r).await {
                Ok(ar) => kernels.descent_step(&r, &ar, &x).await,
                Err(err) => Err(err),
            };
            let (x_next, r_next) = match stepped {
                Ok(next) => next,
                Err(err) => {
                    error!("Steepest descent failed in iteration {}: {}", iterations + 1, err);
                    return report(x, Termination::Failed(err), iterations, residual_norm);
                }
            };
            if x_next.iter().any(|xi| !xi.is_finite()) {
                let err = LinsolveError::Breakdown {
                    iterations,
                    reason: "step length is not finite (r.Ar = 0?)".to_string(),
                };
                error!("{}", err);
                return report(x, Termination::Failed(err), iterations, residual_norm);
            }

            let measured = residual(a, b, &x_next).and_then(|r| norm(&r));
            match measured {
                Ok(value) => residual_norm = value,
                Err(err) => {
                    return report(x, Termination::Failed(err), iterations, residual_norm);
                }
            }
            x = x_next;
            r = r_next;
            iterations += 1;
            debug!("iter = {} | max residual = {}", iterations, residual_norm);
        }
    }

    /// Validates once, then awaits `kernels` and runs from a zero guess.
    async fn run_with<K: DescentKernels>(
        &self,
        a: &DenseMatrix,
        b: &[f64],
        kernels: impl Future<Output = Result<K>>,
    ) -> Result<IterativeReport> {
        let x0 = vec![0.0; a.rows()];
        let start = start(self, a, b, &x0)?;
        match kernels.await {
            Ok(kernels) => Ok(self.iterate(kernels, a, b, x0, start).await),
            Err(err) => {
                error!("Descent kernels could not be set up: {}", err);
                let residual_norm = start.residual_norm;
                Ok(report(x0, Termination::Failed(err), 0, residual_norm))
            }
        }
    }
}

impl SolveAlgorithm<CpuDevice, DenseMatrix> for SteepestDescent {
    type Value = f64;
    type Metadata = IterativeMetadata;

    async fn solve(
        &self,
        _device: &CpuDevice,
        a: &DenseMatrix,
        b: &[f64],
    ) -> Result<IterativeReport> {
        <Self as SolveAlgorithm<CpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        self.run_with(a, b, async { Ok(HostDescent) }).await
    }
}

impl SolveAlgorithm<GpuDevice, DenseMatrix> for SteepestDescent {
    type Value = f64;
    type Metadata = IterativeMetadata;

    async fn solve(
        &self,
        device: &GpuDevice,
        a: &DenseMatrix,
        b: &[f64],
    ) -> Result<IterativeReport> {
        <Self as SolveAlgorithm<GpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        info!("Compiling descent kernels on {}", device.name());
        self.run_with(a, b, GpuDescent::new(device)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linsolve_core::linalg::decompose_lu;
    use linsolve_core::BuildLog;
    use pollster::block_on;

    fn tridiagonal() -> (DenseMatrix, Vec<f64>) {
        let a = DenseMatrix::from_rows(&[
            vec![2.0, -1.0, 0.0],
            vec![-1.0, 2.0, -1.0],
            vec![0.0, -1.0, 2.0],
        ])
        .unwrap();
        (a, vec![200.0, 0.0, 400.0])
    }

    struct BrokenMatVec;

    impl DescentKernels for BrokenMatVec {
        async fn mat_vec(&self, _a: &DenseMatrix, _v: &[f64]) -> Result<Vec<f64>> {
            Err(LinsolveError::Dispatch("device lost".to_string()))
        }

        async fn descent_step(
            &self,
            r: &[f64],
            ar: &[f64],
            x: &[f64],
        ) -> Result<(Vec<f64>, Vec<f64>)> {
            host_descent_step(r, ar, x)
        }
    }

    #[test]
    fn test_solves_tridiagonal_like_lu() {
        let (a, b) = tridiagonal();
        let config = SteepestDescent::with_params(1e-9, 1000);
        let report = block_on(config.solve(&CpuDevice::default(), &a, &b)).unwrap();
        assert!(report.is_converged());
        assert!(report.metadata.residual_norm <= 1e-9);

        let lu = decompose_lu(&a).unwrap().solve(&b).unwrap();
        for (xs, xl) in report.x.iter().zip(&lu) {
            assert!((xs - xl).abs() < 1e-6, "{} vs {}", xs, xl);
        }
    }

    #[test]
    fn test_single_unknown_takes_one_step() {
        let a = DenseMatrix::from_rows(&[vec![4.0]]).unwrap();
        let report = block_on(SteepestDescent::new().solve_with_guess(
            HostDescent,
            &a,
            &[10.0],
            &[0.0],
        ))
        .unwrap();
        assert!(report.is_converged());
        assert_eq!(report.metadata.iterations, 1);
        assert_eq!(report.x, vec![2.5]);
    }

    #[test]
    fn test_cap_is_reported_with_remaining_residual() {
        let (a, b) = tridiagonal();
        let report = block_on(SteepestDescent::with_params(1e-12, 2).solve_with_guess(
            HostDescent,
            &a,
            &b,
            &[0.0; 3],
        ))
        .unwrap();
        assert!(matches!(
            report.metadata.termination,
            Termination::MaxIterationsReached
        ));
        assert_eq!(report.metadata.iterations, 2);
        assert!(report.metadata.residual_norm > 1e-12);
    }

    #[test]
    fn test_indefinite_matrix_breaks_down() {
        // r = [1, 1] gives r.Ar = 0 on the first step.
        let a = DenseMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, -1.0]]).unwrap();
        let report = block_on(SteepestDescent::new().solve_with_guess(
            HostDescent,
            &a,
            &[1.0, 1.0],
            &[0.0, 0.0],
        ))
        .unwrap();
        assert!(matches!(
            report.metadata.termination,
            Termination::Failed(LinsolveError::Breakdown { iterations: 0, .. })
        ));
        assert_eq!(report.x, vec![0.0, 0.0]);
    }

    #[test]
    fn test_kernel_failure_keeps_guess() {
        let (a, b) = tridiagonal();
        let report = block_on(SteepestDescent::new().solve_with_guess(
            &BrokenMatVec,
            &a,
            &b,
            &[1.0, 1.0, 1.0],
        ))
        .unwrap();
        assert!(matches!(
            report.metadata.termination,
            Termination::Failed(LinsolveError::Dispatch(_))
        ));
        assert_eq!(report.x, vec![1.0, 1.0, 1.0]);
        assert_eq!(report.metadata.residual_norm, 399.0);
    }

    #[test]
    fn test_host_descent_step() {
        let (x, r) = host_descent_step(&[2.0, -4.0], &[4.0, -8.0], &[1.0, 1.0]).unwrap();
        assert_eq!(x, vec![2.0, -1.0]);
        assert_eq!(r, vec![0.0, 0.0]);
        assert!(matches!(
            host_descent_step(&[1.0], &[1.0, 2.0], &[0.0]),
            Err(LinsolveError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_missing_kernels_report_failure() {
        let (a, b) = tridiagonal();
        let report = block_on(SteepestDescent::new().run_with(&a, &b, async {
            Err::<HostDescent, _>(LinsolveError::Compilation(BuildLog::default()))
        }))
        .unwrap();
        assert!(matches!(
            report.metadata.termination,
            Termination::Failed(LinsolveError::Compilation(_))
        ));
        assert_eq!(report.x, vec![0.0; 3]);
        assert_eq!(report.metadata.iterations, 0);
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config: SteepestDescent = serde_json::from_str(r#"{"max_iterations":50}"#).unwrap();
        assert_eq!(config.tolerance, 1e-3);
        assert_eq!(config.max_iterations, 50);
        assert!(matches!(
            SteepestDescent::with_params(1e-3, 0).validate(),
            Err(LinsolveError::InvalidConfig(_))
        ));
    }
}
