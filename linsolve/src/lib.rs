//! `linsolve`: dense linear system solvers with GPU-accelerated paths.
//!
//! Systems `Ax = b` are solved either directly (LU, or Gaussian elimination
//! with optional device back substitution) or iteratively with Jacobi or
//! steepest descent, where the per-iteration work runs as compute kernels and
//! the host decides when to stop.

pub mod algorithms;

pub use algorithms::direct::DirectMetadata;
pub use algorithms::jacobi::{IterationState, JacobiController, JacobiReport, SolverState};
pub use algorithms::row_update::{GpuRowUpdate, HostRowUpdate, RowUpdate};
pub use algorithms::steepest_descent::{DescentKernels, GpuDescent, HostDescent};
pub use algorithms::{
    DirectLu, GaussianElimination, IterativeMetadata, IterativeReport, Jacobi, SolveAlgorithm,
    SolveResult, SteepestDescent, Termination,
};

// Re-export from linsolve_core
pub use linsolve_core::{
    linalg, BuildLog, CpuDevice, DenseMatrix, Device, GpuDevice, Kernel, LinsolveError, Matrix,
    Result, TransferStats, Vector,
};
