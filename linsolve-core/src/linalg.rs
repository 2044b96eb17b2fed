//! Dense linear algebra on the host.
//!
//! These routines are the sequential baseline the device path is checked
//! against. All of them are deterministic and leave their inputs alone except
//! [`upper_triangularize`], which works in place.

use crate::dense::DenseMatrix;
use crate::error::{LinsolveError, Result};
use crate::traits::Matrix;

/// Unit lower-triangular and upper-triangular factors of a square matrix, `A = L * U`.
#[derive(Debug, Clone, PartialEq)]
pub struct LuDecomposition {
    pub lower: DenseMatrix,
    pub upper: DenseMatrix,
}

impl LuDecomposition {
    /// Solves `Ax = b` as `Ly = b` followed by `Ux = y`.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>> {
        let y = forward_substitute(&self.lower, b)?;
        back_substitute(&self.upper, &y)
    }

    pub fn dim(&self) -> usize {
        self.lower.rows()
    }
}

/// Computes the `m x p` product of the `m x n` matrix `a` and the `n x p` matrix `b`.
///
/// The caller guarantees compatible dimensions. With `n == 0` the result is the
/// zero matrix.
pub fn matmult(a: &[f64], b: &[f64], m: usize, n: usize, p: usize) -> Vec<f64> {
    debug_assert_eq!(a.len(), m * n, "left operand is not {}x{}", m, n);
    debug_assert_eq!(b.len(), n * p, "right operand is not {}x{}", n, p);

    let mut c = vec![0.0; m * p];
    for i in 0..m {
        for k in 0..n {
            let aik = a[i * n + k];
            for j in 0..p {
                c[i * p + j] += aik * b[k * p + j];
            }
        }
    }
    c
}

/// Returns the largest element of `v`.
///
/// Residual vectors are non-negative, so on them this is the infinity norm.
/// A `NaN` anywhere in `v` makes the result `NaN`.
pub fn max_abs(v: &[f64]) -> Result<f64> {
    let (first, rest) = v.split_first().ok_or_else(|| {
        LinsolveError::EmptyInput("cannot take the maximum of an empty vector".to_string())
    })?;
    let mut max = *first;
    for &value in rest {
        if value.is_nan() {
            return Ok(f64::NAN);
        }
        if value > max {
            max = value;
        }
    }
    Ok(max)
}

/// `A v`. `v` must have one entry per column of `a`.
pub fn mat_vec(a: &DenseMatrix, v: &[f64]) -> Result<Vec<f64>> {
    let (rows, cols) = a.dims();
    require_len(v, cols, "v")?;
    Ok(matmult(a.data(), v, rows, cols, 1))
}

/// Signed residual `b - A x`.
pub fn residual(a: &DenseMatrix, b: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    require_len(b, a.rows(), "b")?;
    let ax = mat_vec(a, x)?;
    Ok(b.iter().zip(ax).map(|(bi, axi)| bi - axi).collect())
}

/// Element-wise `|b_i - (A x)_i|`.
pub fn abs_residual(a: &DenseMatrix, b: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    Ok(residual(a, b, x)?.into_iter().map(f64::abs).collect())
}

pub fn dot(u: &[f64], v: &[f64]) -> Result<f64> {
    require_len(v, u.len(), "v")?;
    Ok(u.iter().zip(v).map(|(ui, vi)| ui * vi).sum())
}

/// `n` evenly spaced values from `x0` to `xf` inclusive.
pub fn linspace(x0: f64, xf: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![x0],
        _ => {
            let dx = (xf - x0) / (n - 1) as f64;
            (0..n).map(|i| x0 + i as f64 * dx).collect()
        }
    }
}

fn require_square(a: &DenseMatrix, what: &str) -> Result<usize> {
    if !a.is_square() {
        return Err(LinsolveError::InvalidDimensions(format!(
            "{} requires a square matrix (dims: {}x{})",
            what,
            a.rows(),
            a.cols()
        )));
    }
    Ok(a.rows())
}

fn require_len(v: &[f64], n: usize, name: &str) -> Result<()> {
    if v.len() != n {
        return Err(LinsolveError::InvalidDimensions(format!(
            "Vector {} has length {}, expected {}",
            name,
            v.len(),
            n
        )));
    }
    Ok(())
}

/// Doolittle LU decomposition without pivoting.
///
/// Fails with [`LinsolveError::SingularMatrix`] as soon as a pivot `U[k,k]` is zero.
pub fn decompose_lu(a: &DenseMatrix) -> Result<LuDecomposition> {
    let n = require_square(a, "LU decomposition")?;
    let a = a.data();
    let mut lower = DenseMatrix::identity(n);
    let mut upper = DenseMatrix::zeros(n, n);

    {
        let l = lower.data_mut();
        let u = upper.data_mut();
        for k in 0..n {
            for m in k..n {
                let sum: f64 = (0..k).map(|j| l[k * n + j] * u[j * n + m]).sum();
                u[k * n + m] = a[k * n + m] - sum;
            }

            let pivot = u[k * n + k];
            if pivot == 0.0 {
                return Err(LinsolveError::SingularMatrix { pivot: k });
            }

            for i in (k + 1)..n {
                let sum: f64 = (0..k).map(|j| l[i * n + j] * u[j * n + k]).sum();
                l[i * n + k] = (a[i * n + k] - sum) / pivot;
            }
        }
    }

    Ok(LuDecomposition { lower, upper })
}

/// Solves `Lx = b` for unit lower-triangular `L`.
///
/// The diagonal of `l` is taken to be 1 whatever is stored there.
pub fn forward_substitute(l: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = require_square(l, "Forward substitution")?;
    require_len(b, n, "b")?;

    let mut x = vec![0.0; n];
    for i in 0..n {
        let row = l.row(i);
        let sum: f64 = row[..i].iter().zip(&x[..i]).map(|(lij, xj)| lij * xj).sum();
        x[i] = b[i] - sum;
    }
    Ok(x)
}

/// Solves `Ux = b` for upper-triangular `U`, from the last row up.
pub fn back_substitute(u: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>> {
    let n = require_square(u, "Back substitution")?;
    require_len(b, n, "b")?;

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let row = u.row(i);
        let pivot = row[i];
        if pivot == 0.0 {
            return Err(LinsolveError::SingularMatrix { pivot: i });
        }
        let sum: f64 = row[i + 1..]
            .iter()
            .zip(&x[i + 1..])
            .map(|(uij, xj)| uij * xj)
            .sum();
        x[i] = (b[i] - sum) / pivot;
    }
    Ok(x)
}

/// Gaussian elimination without pivoting, in place.
///
/// On success `a` is upper-triangular and `b` holds the matching right-hand side.
/// On failure both are left exactly as they were passed in.
pub fn upper_triangularize(a: &mut DenseMatrix, b: &mut [f64]) -> Result<()> {
    let n = require_square(a, "Upper triangularization")?;
    require_len(b, n, "b")?;

    let mut m = a.data().to_vec();
    let mut rhs = b.to_vec();

    for k in 0..n {
        let pivot = m[k * n + k];
        if pivot == 0.0 {
            return Err(LinsolveError::SingularMatrix { pivot: k });
        }
        for i in (k + 1)..n {
            let factor = m[i * n + k] / pivot;
            rhs[i] -= factor * rhs[k];
            for j in k..n {
                m[i * n + j] -= factor * m[k * n + j];
            }
        }
    }

    a.data_mut().copy_from_slice(&m);
    b.copy_from_slice(&rhs);
    Ok(())
}
