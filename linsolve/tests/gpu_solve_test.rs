use linsolve::{
    linalg::{self, decompose_lu, linspace},
    CpuDevice, DenseMatrix, DirectLu, GaussianElimination, GpuDevice, GpuRowUpdate, HostRowUpdate,
    Jacobi, JacobiController, Kernel, LinsolveError, RowUpdate, SolveAlgorithm, SteepestDescent,
    Termination,
};
use pollster::block_on;

// Helper for float comparison in tests
fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

/// A device that can run the f64 row-update kernel, or `None` on machines without one.
fn f64_gpu() -> Option<GpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    match block_on(GpuDevice::new()) {
        Ok(device) if device.supports_f64() => Some(device),
        Ok(device) => {
            log::warn!("Skipping: {} has no SHADER_F64 support", device.name());
            None
        }
        Err(e) => {
            log::warn!("Skipping: no GPU adapter ({})", e);
            None
        }
    }
}

fn tridiagonal() -> (DenseMatrix, Vec<f64>) {
    let a = DenseMatrix::from_rows(&[
        vec![2.0, -1.0, 0.0],
        vec![-1.0, 2.0, -1.0],
        vec![0.0, -1.0, 2.0],
    ])
    .unwrap();
    (a, vec![200.0, 0.0, 400.0])
}

/// Random strictly diagonally dominant `n x n` matrix.
fn random_dominant(rng: &mut fastrand::Rng, n: usize) -> DenseMatrix {
    let mut a = DenseMatrix::zeros(n, n);
    for i in 0..n {
        let mut off = 0.0;
        for j in 0..n {
            if i != j {
                let v = rng.f64() * 2.0 - 1.0;
                *a.get_mut(i, j).unwrap() = v;
                off += v.abs();
            }
        }
        *a.get_mut(i, i).unwrap() = off + 1.0 + rng.f64();
    }
    a
}

#[test]
fn test_gpu_jacobi_matches_lu() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let (a, b) = tridiagonal();

        let report = Jacobi::with_params(1e-8, 500)
            .solve(&gpu_device, &a, &b)
            .await?;
        assert!(report.is_converged(), "{:?}", report.metadata);

        let expected = decompose_lu(&a)?.solve(&b)?;
        assert_approx_eq_vec(&report.x, &expected, 1e-6);
        assert_approx_eq_vec(&report.x, &[250.0, 300.0, 350.0], 1e-6);
        Ok(())
    })
}

#[test]
fn test_gpu_and_host_sweeps_agree() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let (a, b) = tridiagonal();
        let executor = GpuRowUpdate::new(&gpu_device).await?;
        let x_prev = [1.0, 1.0, 1.0];

        let first = executor.row_update(&a, &b, &x_prev).await?;
        let second = executor.row_update(&a, &b, &x_prev).await?;
        assert_eq!(first, second);
        assert_approx_eq_vec(&first, &[100.5, 1.0, 200.5], 1e-12);
        Ok(())
    })
}

#[test]
fn test_gpu_single_unknown() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let a = DenseMatrix::from_rows(&[vec![4.0]])?;
        let executor = GpuRowUpdate::new(&gpu_device).await?;
        let report = JacobiController::new(&executor, &a, &[10.0], &[0.0], Jacobi::new())?
            .run()
            .await;
        assert!(report.is_converged());
        assert_eq!(report.metadata.iterations, 1);
        assert_approx_eq_vec(&report.x, &[2.5], 1e-12);
        Ok(())
    })
}

#[test]
fn test_gpu_reference_run_from_ones() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let (a, b) = tridiagonal();
        let config = Jacobi::with_params(1e-3, 200);
        let x0 = [1.0, 1.0, 1.0];

        let executor = GpuRowUpdate::new(&gpu_device).await?;
        let gpu = config.solve_with_guess(&executor, &a, &b, &x0).await?;
        let host = config.solve_with_guess(HostRowUpdate, &a, &b, &x0).await?;

        assert!(gpu.is_converged(), "{:?}", gpu.metadata);
        assert!(gpu.metadata.iterations <= 200);
        assert!(gpu.metadata.residual_norm <= 1e-3);
        assert_approx_eq_vec(&gpu.x, &[250.0, 300.0, 350.0], 1e-2);
        assert_approx_eq_vec(&gpu.x, &host.x, 1e-9);

        // Another sweep from the converged iterate stays within tolerance.
        let again = executor.row_update(&a, &b, &gpu.x).await?;
        assert_approx_eq_vec(&again, &gpu.x, config.tolerance);
        Ok(())
    })
}

#[test]
fn test_gpu_mat_vec_matches_host() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    let mut rng = fastrand::Rng::with_seed(7);
    let data: Vec<f64> = (0..7 * 5).map(|_| rng.f64() * 2.0 - 1.0).collect();
    let a = DenseMatrix::new(7, 5, data)?;
    let v = linspace(-2.0, 2.0, 5);
    block_on(async {
        let program = gpu_device.compile_bundled(Kernel::MatVec).await?;
        let y = gpu_device.mat_vec(&program, &a, &v).await?;
        assert_approx_eq_vec(&y, &linalg::mat_vec(&a, &v)?, 1e-12);
        Ok(())
    })
}

#[test]
fn test_gpu_steepest_descent_matches_lu() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let (a, b) = tridiagonal();
        let report = SteepestDescent::with_params(1e-9, 1000)
            .solve(&gpu_device, &a, &b)
            .await?;
        assert!(report.is_converged(), "{:?}", report.metadata);
        assert_approx_eq_vec(&report.x, &decompose_lu(&a)?.solve(&b)?, 1e-6);
        Ok(())
    })
}

#[test]
fn test_gpu_gaussian_elimination_matches_host() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    let mut rng = fastrand::Rng::with_seed(11);
    let a = random_dominant(&mut rng, 16);
    let b = linspace(0.0, 3.0, 16);
    block_on(async {
        let gpu = GaussianElimination.solve(&gpu_device, &a, &b).await?;
        let host = GaussianElimination.solve(&CpuDevice::default(), &a, &b).await?;
        assert_approx_eq_vec(&gpu.x, &host.x, 1e-9);
        assert!(gpu.metadata.residual_norm < 1e-9);
        Ok(())
    })
}

#[test]
fn test_gpu_compile_error_has_build_log() {
    let Some(gpu_device) = f64_gpu() else {
        return;
    };
    let result = block_on(GpuRowUpdate::with_source(
        &gpu_device,
        "@compute @workgroup_size(1) fn jacobi_row( { }",
    ));
    match result {
        Err(LinsolveError::Compilation(log)) => {
            assert!(log.has_errors());
            assert!(!log.to_string().is_empty());
        }
        other => panic!("expected a compilation error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_gpu_transfer_stats() -> Result<(), LinsolveError> {
    let Some(gpu_device) = f64_gpu() else {
        return Ok(());
    };
    block_on(async {
        let (a, b) = tridiagonal();
        let executor = GpuRowUpdate::new(&gpu_device).await?;
        gpu_device.reset_transfer_stats();

        executor.row_update(&a, &b, &[0.0; 3]).await?;

        let stats = gpu_device.transfer_stats();
        // A, b and x_prev go up; x_next comes back.
        assert!(stats.bytes_to_gpu >= (9 + 3 + 3) * 8);
        assert_eq!(stats.bytes_from_gpu, 3 * 8);
        Ok(())
    })
}

#[test]
fn test_host_jacobi_reaches_iteration_cap() {
    let a = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 1.0]]).unwrap();
    let report = block_on(Jacobi::with_params(1e-3, 5).solve(&CpuDevice::default(), &a, &[3.0, 4.0]))
        .unwrap();
    assert!(matches!(
        report.metadata.termination,
        Termination::MaxIterationsReached
    ));
    assert!(report.metadata.residual_norm > 1e-3);
    assert!(matches!(
        report.into_result(),
        Err(LinsolveError::NonConvergence { iterations: 5, .. })
    ));
}

#[test]
fn test_random_dominant_systems_round_trip() {
    let mut rng = fastrand::Rng::with_seed(42);
    let cpu = CpuDevice::default();
    for n in [1, 2, 5, 16] {
        let a = random_dominant(&mut rng, n);
        let x_true = linspace(-1.0, 1.0, n);
        let b: Vec<f64> = (0..n)
            .map(|i| a.row(i).iter().zip(&x_true).map(|(aij, xj)| aij * xj).sum())
            .collect();

        let lu = block_on(DirectLu.solve(&cpu, &a, &b)).unwrap();
        assert_approx_eq_vec(&lu.x, &x_true, 1e-9);

        let gauss = block_on(GaussianElimination.solve(&cpu, &a, &b)).unwrap();
        assert_approx_eq_vec(&gauss.x, &x_true, 1e-9);

        let jacobi = block_on(Jacobi::with_params(1e-10, 1000).solve(&cpu, &a, &b))
            .unwrap()
            .into_result()
            .unwrap();
        assert_approx_eq_vec(&jacobi, &x_true, 1e-8);
    }
}
