use serde::{Deserialize, Serialize};

use crate::error::{LinsolveError, Result};
use crate::traits::Matrix;

/// Represents a dense matrix stored in row-major order on the CPU.
///
/// Element `(row, col)` lives at `data[row * cols + col]`. This is also the
/// layout uploaded to the device, so no repacking happens at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDenseMatrix")]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

/// Wire form of [`DenseMatrix`]; goes through [`DenseMatrix::new`] so a
/// deserialized matrix always has `rows * cols` elements.
#[derive(Deserialize)]
struct RawDenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl TryFrom<RawDenseMatrix> for DenseMatrix {
    type Error = LinsolveError;

    fn try_from(raw: RawDenseMatrix) -> Result<Self> {
        DenseMatrix::new(raw.rows, raw.cols, raw.data)
    }
}

impl DenseMatrix {
    /// Creates a new DenseMatrix from raw row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(LinsolveError::InvalidDimensions(format!(
                "Data length ({}) does not match dimensions ({}x{})",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a new DenseMatrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Creates the `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Builds a matrix from a slice of rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, |row| row.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(LinsolveError::InvalidDimensions(format!(
                    "Row {} has {} columns, expected {}",
                    r,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Gets the element at the specified row and column.
    /// Returns None if indices are out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            self.data.get(row * self.cols + col).copied()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut f64> {
        if row < self.rows && col < self.cols {
            self.data.get_mut(row * self.cols + col)
        } else {
            None
        }
    }

    /// Returns row `row` as a slice. Panics if out of bounds.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Main diagonal, `min(rows, cols)` elements.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols))
            .map(|i| self.data[i * self.cols + i])
            .collect()
    }

    /// Checks the matrix is square and its diagonal has no zero entry.
    ///
    /// Both Jacobi sweeps and substitution divide by the diagonal.
    pub fn check_diagonal(&self) -> Result<()> {
        if !self.is_square() {
            return Err(LinsolveError::InvalidDimensions(format!(
                "Matrix must be square (dims: {}x{})",
                self.rows, self.cols
            )));
        }
        match self.diagonal().iter().position(|&d| d == 0.0) {
            Some(pivot) => Err(LinsolveError::SingularMatrix { pivot }),
            None => Ok(()),
        }
    }

    /// `A[i,j] == A[j,i]` for every pair. Steepest descent assumes it.
    pub fn is_symmetric(&self) -> bool {
        let n = self.cols;
        self.is_square()
            && (0..n).all(|i| (i + 1..n).all(|j| self.data[i * n + j] == self.data[j * n + i]))
    }

    /// Row-wise strict diagonal dominance: `|a_ii| > sum_{j != i} |a_ij|` for every row.
    pub fn is_diagonally_dominant(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        (0..self.rows).all(|i| {
            let row = self.row(i);
            let off: f64 = row
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, v)| v.abs())
                .sum();
            row[i].abs() > off
        })
    }
}

impl Matrix for DenseMatrix {
    type Value = f64;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}
