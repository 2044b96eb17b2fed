use linsolve_core::{device::Device, LinsolveError, Matrix};
use num_traits::Float;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct SolveResult<V: Float, M> {
    pub x: Vec<V>,   // Solution vector
    pub metadata: M, // Metadata about the solve process
}

// --- Algorithm Trait Definition ---
/// Trait representing a specific linear system solving algorithm.
/// Generic over the Device (CPU/GPU) and Matrix type it supports.
pub trait SolveAlgorithm<D: Device, M: Matrix> {
    /// The numeric type the algorithm operates on. Must match `M::Value`.
    type Value: Float + Copy + Send + Sync + std::fmt::Debug + Default + bytemuck::Pod;
    type Metadata: std::fmt::Debug;

    /// Solves the linear system Ax = b for x.
    ///
    /// # Arguments
    ///
    /// * `device` - The execution device (CPU or GPU).
    /// * `a` - The coefficient matrix A.
    /// * `b` - The right-hand side vector b.
    fn solve(
        &self,
        device: &D,
        a: &M,
        b: &[Self::Value],
    ) -> impl std::future::Future<
        Output = Result<SolveResult<Self::Value, Self::Metadata>, LinsolveError>,
    >;

    /// Shape checks shared by every implementation.
    fn validate_inputs(&self, a: &M, b: &[Self::Value]) -> Result<(), LinsolveError> {
        let (rows, cols) = a.dims();
        if !a.is_square() {
            return Err(LinsolveError::InvalidDimensions(format!(
                "Matrix A must be square (dims: {}x{})",
                rows, cols
            )));
        }
        if rows != b.len() {
            return Err(LinsolveError::InvalidDimensions(format!(
                "Matrix A rows ({}) must match RHS vector b length ({})",
                rows,
                b.len()
            )));
        }
        Ok(())
    }
}

/// Why an iterative run stopped.
#[derive(Debug)]
pub enum Termination {
    Converged,
    MaxIterationsReached,
    /// The executor failed or the iteration broke down. The report's `x` is
    /// the last good iterate.
    Failed(LinsolveError),
}

/// Metadata of an iterative solve.
#[derive(Debug)]
pub struct IterativeMetadata {
    pub termination: Termination,
    /// Completed iterations.
    pub iterations: usize,
    /// `max_i |b_i - (Ax)_i|` at the reported `x`.
    pub residual_norm: f64,
}

pub type IterativeReport = SolveResult<f64, IterativeMetadata>;

impl SolveResult<f64, IterativeMetadata> {
    pub fn is_converged(&self) -> bool {
        matches!(self.metadata.termination, Termination::Converged)
    }

    /// The solution if the run converged, the reason it did not otherwise.
    pub fn into_result(self) -> Result<Vec<f64>, LinsolveError> {
        match self.metadata.termination {
            Termination::Converged => Ok(self.x),
            Termination::MaxIterationsReached => Err(LinsolveError::NonConvergence {
                iterations: self.metadata.iterations,
                residual_norm: self.metadata.residual_norm,
            }),
            Termination::Failed(err) => Err(err),
        }
    }
}

// --- Algorithm Implementations ---

pub mod direct; // LU and Gaussian elimination, host or GPU back substitution
pub mod jacobi; // Jacobi iteration driven by a row-update executor
pub mod row_update; // Host and GPU row-update executors
pub mod steepest_descent; // Steepest descent with host or GPU kernels

// --- Algorithm Struct Definitions ---

/// Jacobi iteration.
///
/// Stops when the largest absolute residual `max_i |b_i - (Ax)_i|` drops to
/// `tolerance` or after `max_iterations` sweeps, whichever comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jacobi {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for Jacobi {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 200,
        }
    }
}

impl Jacobi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    /// Rejects a non-positive or non-finite tolerance and a zero iteration cap.
    pub fn validate(&self) -> Result<(), LinsolveError> {
        validate_stopping_rule(self.tolerance, self.max_iterations)
    }
}

fn validate_stopping_rule(tolerance: f64, max_iterations: usize) -> Result<(), LinsolveError> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(LinsolveError::InvalidConfig(format!(
            "tolerance must be a positive finite number, got {}",
            tolerance
        )));
    }
    if max_iterations == 0 {
        return Err(LinsolveError::InvalidConfig(
            "max_iterations must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Steepest descent for symmetric positive definite systems.
///
/// Each iteration moves `x` along the residual `r` by `s = (r.r)/(r.Ar)`.
/// Same stopping rule as [`Jacobi`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteepestDescent {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SteepestDescent {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iterations: 1000,
        }
    }
}

impl SteepestDescent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    pub fn validate(&self) -> Result<(), LinsolveError> {
        validate_stopping_rule(self.tolerance, self.max_iterations)
    }
}

/// Doolittle LU decomposition followed by forward and back substitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectLu;

/// Gaussian elimination to upper-triangular form followed by back substitution.
/// On a `GpuDevice` the back substitution runs as a column sweep on the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianElimination;
