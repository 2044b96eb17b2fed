//! # linsolve-core
//!
//! Dense linear algebra on the host and the GPU dispatch layer used by the
//! iterative solvers in `linsolve`.

pub mod buffer;
pub(crate) mod context;
pub mod dense;
pub mod device;
pub mod error;
pub mod linalg;
mod ops;
pub mod program;
pub mod traits;

pub use buffer::{BufferAccess, DeviceBuffer};
pub use dense::DenseMatrix;
pub use device::{CpuDevice, Device, GpuDevice, TransferStats};
pub use error::{BuildLog, DeviceBuildLog, Diagnostic, DiagnosticLevel, LinsolveError, Result};
pub use linalg::LuDecomposition;
pub use program::{
    CompiledProgram, Kernel, BACK_SUBSTITUTION_KERNEL, DESCENT_STEP_KERNEL, JACOBI_ROW_KERNEL,
    MAT_VEC_KERNEL, ROW_UPDATE_ENTRY_POINT,
};
pub use traits::{Matrix, Vector};
