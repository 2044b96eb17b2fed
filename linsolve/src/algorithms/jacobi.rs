//! Jacobi iteration driven from the host.
//!
//! The controller owns the iterate and the stopping rule; each sweep is handed
//! to a [`RowUpdate`] executor, which is where the GPU comes in.

use std::future::Future;

use log::{debug, error, info, warn};

use linsolve_core::linalg::{abs_residual, max_abs};
use linsolve_core::{CpuDevice, DenseMatrix, GpuDevice, LinsolveError, Matrix, Result};

use super::row_update::{GpuRowUpdate, HostRowUpdate, RowUpdate};
use super::{IterativeMetadata, IterativeReport, Jacobi, SolveAlgorithm, SolveResult, Termination};

pub type JacobiReport = IterativeReport;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Initializing,
    Iterating,
    Converged,
    MaxIterationsReached,
    Failed,
}

impl SolverState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SolverState::Converged | SolverState::MaxIterationsReached | SolverState::Failed
        )
    }
}

/// The two most recent iterates and the number of completed sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    pub x: Vec<f64>,
    pub x_prev: Vec<f64>,
    pub iteration: usize,
    pub converged: bool,
}

/// A system that passed validation, with its residual at the initial guess.
struct PreparedSystem {
    residual: Vec<f64>,
    residual_norm: f64,
}

/// Checks the configuration and that `(a, b, x0)` is a system Jacobi can
/// iterate on, then evaluates the initial residual.
fn prepare(config: &Jacobi, a: &DenseMatrix, b: &[f64], x0: &[f64]) -> Result<PreparedSystem> {
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
    a.check_diagonal()?;
    if !a.is_diagonally_dominant() {
        warn!("Matrix is not strictly diagonally dominant; Jacobi may not converge");
    }

    let residual = abs_residual(a, b, x0)?;
    let residual_norm = max_abs(&residual)?;
    Ok(PreparedSystem {
        residual,
        residual_norm,
    })
}

/// Host-side state machine for one Jacobi solve.
///
/// `Initializing -> Iterating -> {Converged | MaxIterationsReached | Failed}`.
/// Every transition happens in [`JacobiController::step`].
pub struct JacobiController<'a, E: RowUpdate> {
    executor: E,
    a: &'a DenseMatrix,
    b: &'a [f64],
    config: Jacobi,
    state: SolverState,
    iterate: IterationState,
    residual: Vec<f64>,
    residual_norm: f64,
    failure: Option<LinsolveError>,
}

impl<'a, E: RowUpdate> JacobiController<'a, E> {
    /// Validates the configuration and the system and seeds the iterate with `x0`.
    pub fn new(
        executor: E,
        a: &'a DenseMatrix,
        b: &'a [f64],
        x0: &[f64],
        config: Jacobi,
    ) -> Result<Self> {
        let prepared = prepare(&config, a, b, x0)?;
        Ok(Self::from_prepared(executor, a, b, x0, config, prepared))
    }

    fn from_prepared(
        executor: E,
        a: &'a DenseMatrix,
        b: &'a [f64],
        x0: &[f64],
        config: Jacobi,
        prepared: PreparedSystem,
    ) -> Self {
        Self {
            executor,
            a,
            b,
            config,
            state: SolverState::Initializing,
            iterate: IterationState {
                x: x0.to_vec(),
                x_prev: x0.to_vec(),
                iteration: 0,
                converged: false,
            },
            residual: prepared.residual,
            residual_norm: prepared.residual_norm,
            failure: None,
        }
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn iterate(&self) -> &IterationState {
        &self.iterate
    }

    /// Element-wise `|b - Ax|` at the current iterate.
    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    pub fn residual_norm(&self) -> f64 {
        self.residual_norm
    }

    pub fn config(&self) -> &Jacobi {
        &self.config
    }

    /// Performs one transition and returns the new state. No-op once terminal.
    pub async fn step(&mut self) -> SolverState {
        match self.state {
            SolverState::Initializing => {
                info!(
                    "Jacobi start: n = {}, tolerance = {:e}, max iterations = {}, initial max residual = {}",
                    self.iterate.x.len(),
                    self.config.tolerance,
                    self.config.max_iterations,
                    self.residual_norm
                );
                if self.residual_norm <= self.config.tolerance {
                    self.finish(SolverState::Converged);
                } else {
                    self.state = SolverState::Iterating;
                }
            }
            SolverState::Iterating => self.sweep().await,
            _ => {}
        }
        self.state
    }

    async fn sweep(&mut self) {
        self.iterate.x_prev.copy_from_slice(&self.iterate.x);

        let next = match self
            .executor
            .row_update(self.a, self.b, &self.iterate.x_prev)
            .await
        {
            Ok(next) => next,
            Err(err) => return self.fail(err),
        };
        if next.len() != self.iterate.x.len() {
            return self.fail(LinsolveError::Internal(format!(
                "row update returned {} values for a system of size {}",
                next.len(),
                self.iterate.x.len()
            )));
        }
        self.iterate.x = next;
        self.iterate.iteration += 1;

        let measured = abs_residual(self.a, self.b, &self.iterate.x)
            .and_then(|residual| Ok((max_abs(&residual)?, residual)));
        match measured {
            Ok((norm, residual)) => {
                self.residual = residual;
                self.residual_norm = norm;
            }
            Err(err) => return self.fail(err),
        }
        debug!(
            "iter = {} | max residual = {}",
            self.iterate.iteration, self.residual_norm
        );

        if self.residual_norm <= self.config.tolerance {
            self.finish(SolverState::Converged);
        } else if self.iterate.iteration >= self.config.max_iterations {
            self.finish(SolverState::MaxIterationsReached);
        }
    }

    fn finish(&mut self, state: SolverState) {
        self.state = state;
        match state {
            SolverState::Converged => {
                self.iterate.converged = true;
                info!(
                    "Jacobi converged after {} iterations (max residual {})",
                    self.iterate.iteration, self.residual_norm
                );
            }
            SolverState::MaxIterationsReached => warn!(
                "Jacobi stopped at the iteration cap ({}) with max residual {}",
                self.iterate.iteration, self.residual_norm
            ),
            _ => {}
        }
    }

    fn fail(&mut self, err: LinsolveError) {
        error!(
            "Jacobi failed during sweep {}: {}",
            self.iterate.iteration + 1,
            err
        );
        self.failure = Some(err);
        self.state = SolverState::Failed;
    }

    /// Steps until a terminal state is reached.
    pub async fn run(mut self) -> JacobiReport {
        while !self.state.is_terminal() {
            self.step().await;
        }
        self.into_report()
    }

    /// Blocking variant of [`JacobiController::run`].
    #[cfg(feature = "native")]
    pub fn run_blocking(self) -> JacobiReport {
        pollster::block_on(self.run())
    }

    fn into_report(mut self) -> JacobiReport {
        let termination = match self.state {
            SolverState::Converged => Termination::Converged,
            SolverState::MaxIterationsReached => Termination::MaxIterationsReached,
            SolverState::Failed => Termination::Failed(self.failure.take().unwrap_or_else(|| {
                LinsolveError::Internal("failed without recording an error".to_string())
            })),
            SolverState::Initializing | SolverState::Iterating => Termination::Failed(
                LinsolveError::Internal("report taken before a terminal state".to_string()),
            ),
        };
        SolveResult {
            x: self.iterate.x,
            metadata: IterativeMetadata {
                termination,
                iterations: self.iterate.iteration,
                residual_norm: self.residual_norm,
            },
        }
    }
}

impl Jacobi {
    /// Runs Jacobi from `x0` with the given executor.
    ///
    /// Returns `Err` only for invalid configuration or inputs. A run that does
    /// not converge still yields a report; see [`Termination`].
    pub async fn solve_with_guess<E: RowUpdate>(
        &self,
        executor: E,
        a: &DenseMatrix,
        b: &[f64],
        x0: &[f64],
    ) -> Result<JacobiReport> {
        let controller = JacobiController::new(executor, a, b, x0, self.clone())?;
        Ok(controller.run().await)
    }

    /// Validates once, then awaits `executor` and runs from a zero guess.
    ///
    /// If the executor cannot be built (a kernel that does not compile) the
    /// report is `Failed` with `x` left at zero.
    async fn run_with<E: RowUpdate>(
        &self,
        a: &DenseMatrix,
        b: &[f64],
        executor: impl Future<Output = Result<E>>,
    ) -> Result<JacobiReport> {
        let x0 = vec![0.0; a.rows()];
        let prepared = prepare(self, a, b, &x0)?;
        match executor.await {
            Ok(executor) => {
                let controller =
                    JacobiController::from_prepared(executor, a, b, &x0, self.clone(), prepared);
                Ok(controller.run().await)
            }
            Err(err) => {
                error!("Row-update executor could not be set up: {}", err);
                Ok(SolveResult {
                    x: x0,
                    metadata: IterativeMetadata {
                        termination: Termination::Failed(err),
                        iterations: 0,
                        residual_norm: prepared.residual_norm,
                    },
                })
            }
        }
    }
}

impl SolveAlgorithm<CpuDevice, DenseMatrix> for Jacobi {
    type Value = f64;
    type Metadata = IterativeMetadata;

    async fn solve(&self, _device: &CpuDevice, a: &DenseMatrix, b: &[f64]) -> Result<JacobiReport> {
        <Self as SolveAlgorithm<CpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        self.run_with(a, b, async { Ok(HostRowUpdate) }).await
    }
}

impl SolveAlgorithm<GpuDevice, DenseMatrix> for Jacobi {
    type Value = f64;
    type Metadata = IterativeMetadata;

    async fn solve(&self, device: &GpuDevice, a: &DenseMatrix, b: &[f64]) -> Result<JacobiReport> {
        <Self as SolveAlgorithm<GpuDevice, DenseMatrix>>::validate_inputs(self, a, b)?;
        info!("Compiling row-update kernel on {}", device.name());
        self.run_with(a, b, GpuRowUpdate::new(device)).await
    }
}
