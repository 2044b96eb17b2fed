use linsolve::{
    algorithms::direct::DirectMetadata, linalg::linspace, CpuDevice, DenseMatrix, DirectLu,
    GpuDevice, IterativeReport, Jacobi, SolveAlgorithm, SolveResult, SteepestDescent,
    TransferStats,
};
use std::time::Instant;

/// Steady-state 1-D diffusion on `n` nodes with fixed boundary values.
///
/// Interior rows carry the `[-1, 2, -1]` stencil; the boundary values enter
/// through the first and last entries of `b`.
fn create_diffusion_system(n: usize, left: f64, right: f64) -> (DenseMatrix, Vec<f64>) {
    let mut a = DenseMatrix::zeros(n, n);
    for i in 0..n {
        *a.get_mut(i, i).expect("diagonal in bounds") = 2.0;
        if i > 0 {
            *a.get_mut(i, i - 1).expect("sub-diagonal in bounds") = -1.0;
        }
        if i + 1 < n {
            *a.get_mut(i, i + 1).expect("super-diagonal in bounds") = -1.0;
        }
    }
    let mut b = vec![0.0; n];
    b[0] = left;
    b[n - 1] += right;
    (a, b)
}

fn log_report(label: &str, report: &IterativeReport) {
    log::info!("{}:", label);
    log::info!("  Termination: {:?}", report.metadata.termination);
    log::info!("  Iterations: {}", report.metadata.iterations);
    log::info!("  Max residual: {:.6e}", report.metadata.residual_norm);
}

#[tokio::main]
async fn main() {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let n = 21;
    let (a, b) = create_diffusion_system(n, 200.0, 400.0);
    let jacobi = Jacobi::with_params(1e-3, 5_000);
    log::info!(
        "Solving {}x{} diffusion system (tolerance {}, max iterations {})",
        n,
        n,
        jacobi.tolerance,
        jacobi.max_iterations
    );

    // 1. Direct solve as the reference
    let start_time = Instant::now();
    let direct: SolveResult<f64, DirectMetadata> =
        match DirectLu.solve(&CpuDevice::default(), &a, &b).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("LU solve failed: {}", e);
                return;
            }
        };
    log::info!(
        "LU solve: {:?}, max residual {:.6e}",
        start_time.elapsed(),
        direct.metadata.residual_norm
    );

    // 2. Jacobi on the host
    let start_time = Instant::now();
    match jacobi.solve(&CpuDevice::default(), &a, &b).await {
        Ok(report) => {
            log_report("Host Jacobi", &report);
            log::info!("  Time elapsed: {:?}", start_time.elapsed());
        }
        Err(e) => log::error!("Host Jacobi rejected the system: {}", e),
    }

    // 3. Jacobi with the sweep on the GPU
    let gpu_device = match GpuDevice::new().await {
        Ok(device) if device.supports_f64() => device,
        Ok(device) => {
            log::warn!("{} cannot run f64 kernels, skipping the GPU solve", device.name());
            return;
        }
        Err(e) => {
            log::warn!("No GPU available ({}), skipping the GPU solve", e);
            return;
        }
    };
    log::info!("Using {}", gpu_device.name());
    gpu_device.reset_transfer_stats();

    let start_time = Instant::now();
    let report = match jacobi.solve(&gpu_device, &a, &b).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("GPU Jacobi rejected the system: {}", e);
            return;
        }
    };
    let duration = start_time.elapsed();
    log_report("GPU Jacobi", &report);
    log::info!("  Time elapsed: {:?}", duration);

    let TransferStats {
        bytes_to_gpu,
        bytes_from_gpu,
    } = gpu_device.transfer_stats();
    log::info!("GPU Transfer Stats:");
    log::info!("  Bytes CPU -> GPU: {}", bytes_to_gpu);
    log::info!("  Bytes GPU -> CPU: {}", bytes_from_gpu);

    let max_diff = report
        .x
        .iter()
        .zip(&direct.x)
        .map(|(xj, xl)| (xj - xl).abs())
        .fold(0.0, f64::max);
    log::info!("Max difference from LU: {:.6e}", max_diff);

    // 4. Steepest descent with A r and the step on the GPU
    let descent = SteepestDescent::with_params(jacobi.tolerance, jacobi.max_iterations);
    let start_time = Instant::now();
    match descent.solve(&gpu_device, &a, &b).await {
        Ok(report) => {
            log_report("GPU steepest descent", &report);
            log::info!("  Time elapsed: {:?}", start_time.elapsed());
        }
        Err(e) => log::error!("GPU steepest descent rejected the system: {}", e),
    }

    for (position, value) in linspace(0.0, 1.0, n).iter().zip(&report.x).step_by(5) {
        log::info!("  u({:.2}) = {:.4}", position, value);
    }
}
