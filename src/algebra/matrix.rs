//! Dense matrices of plaintexts or ciphertexts, and their wire format.
//!
//! `Matrix<T>` is backed by a boxed slice in row-major order, since we never grow
//! or shrink a matrix once built. It is never empty and always rectangular.
//!
//! On the wire a matrix is just its elements, row by row, each written at a fixed
//! width. The format carries no dimensions, so the receiver must already know
//! the shape it expects.

use std::borrow::Borrow;

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("Matrix must have at least one row and one column, got {rows}x{cols}")]
    Empty { rows: usize, cols: usize },
    #[error("Expected {expected} elements, got {got}")]
    Length { expected: usize, got: usize },
    #[error("Rows must all have length {expected}, found one of length {got}")]
    Ragged { expected: usize, got: usize },
    #[error("Element needs {needed} bytes but the width is {width}")]
    Overflow { needed: usize, width: usize },
    #[error("Elements need a width of at least one byte")]
    ZeroWidth,
    #[error("Cannot multiply a {0:?} matrix with a {1:?} matrix")]
    Incompatible((usize, usize), (usize, usize)),
}

/// Element with a fixed-width big-endian byte encoding
pub trait FixedWidth: Sized {
    /// Write the element into `out`, left-padded with zeros.
    fn write_fixed(&self, out: &mut [u8]) -> Result<(), MatrixError>;

    fn read_fixed(bytes: &[u8]) -> Self;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Box<[T]>,
}

impl<T> Matrix<T> {
    /// Construct a matrix from its elements in row-major order
    ///
    /// * `rows`: number of rows
    /// * `cols`: number of columns
    /// * `data`: exactly `rows * cols` elements
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, MatrixError> {
        if rows == 0 || cols == 0 {
            return Err(MatrixError::Empty { rows, cols });
        }
        if data.len() != rows * cols {
            return Err(MatrixError::Length {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            data: data.into_boxed_slice(),
        })
    }

    /// Construct a `n×1` matrix.
    pub fn column(data: Vec<T>) -> Result<Self, MatrixError> {
        let rows = data.len();
        Self::new(rows, 1, data)
    }

    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, MatrixError> {
        let n = rows.len();
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            if row.len() != cols {
                return Err(MatrixError::Ragged {
                    expected: cols,
                    got: row.len(),
                });
            }
            data.extend(row);
        }
        Self::new(n, cols, data)
    }

    pub fn from_fn(
        rows: usize,
        cols: usize,
        mut f: impl FnMut(usize, usize) -> T,
    ) -> Result<Self, MatrixError> {
        let data = (0..rows)
            .flat_map(|i| (0..cols).map(move |j| (i, j)))
            .map(|(i, j)| f(i, j))
            .collect();
        Self::new(rows, cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.cols)
    }

    /// Iterate all elements in row-major order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect(),
        }
    }

    pub fn try_map<U, E>(&self, f: impl FnMut(&T) -> Result<U, E>) -> Result<Matrix<U>, E> {
        let data = self.data.iter().map(f).collect::<Result<_, E>>()?;
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

impl<T> std::ops::Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (i, j): (usize, usize)) -> &Self::Output {
        assert!(j < self.cols, "Column {j} out of bounds for {} columns", self.cols);
        &self.data[i * self.cols + j]
    }
}

impl<T> IntoIterator for Matrix<T> {
    type Item = T;

    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_vec().into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Matrix<T> {
    type Item = &'a T;

    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<T: FixedWidth> Matrix<T> {
    /// Serialize row-major with every element at `width` bytes.
    ///
    /// The result is exactly `rows * cols * width` bytes.
    pub fn to_bytes(&self, width: usize) -> Result<Vec<u8>, MatrixError> {
        if width == 0 {
            return Err(MatrixError::ZeroWidth);
        }
        let mut buf = vec![0u8; self.data.len() * width];
        for (elem, chunk) in self.data.iter().zip(buf.chunks_exact_mut(width)) {
            elem.write_fixed(chunk)?;
        }
        Ok(buf)
    }

    /// Inverse of `to_bytes`, given the same shape and width.
    pub fn from_bytes(
        bytes: &[u8],
        rows: usize,
        cols: usize,
        width: usize,
    ) -> Result<Self, MatrixError> {
        if width == 0 {
            return Err(MatrixError::ZeroWidth);
        }
        let expected = rows * cols * width;
        if bytes.len() != expected {
            return Err(MatrixError::Length {
                expected,
                got: bytes.len(),
            });
        }
        let data = bytes.chunks_exact(width).map(T::read_fixed).collect();
        Self::new(rows, cols, data)
    }
}

fn as_big<T: Borrow<BigUint>>(v: &T) -> &BigUint {
    v.borrow()
}

impl<T: Borrow<BigUint>> Matrix<T> {
    /// Matrix-vector product `self · v mod modulus`, with `v` a column.
    pub fn mul_vector_mod<V: Borrow<BigUint>>(
        &self,
        v: &Matrix<V>,
        modulus: &BigUint,
    ) -> Result<Matrix<BigUint>, MatrixError> {
        if v.cols != 1 || v.rows != self.cols {
            return Err(MatrixError::Incompatible(self.shape(), v.shape()));
        }
        let data = self
            .iter_rows()
            .map(|row| {
                row.iter()
                    .zip(v.iter())
                    .fold(BigUint::default(), |acc, (a, b)| {
                        (acc + as_big(a) * as_big(b)) % modulus
                    })
            })
            .collect();
        Matrix::new(self.rows, 1, data)
    }

    /// Element-wise sum modulo `modulus`.
    pub fn add_mod<V: Borrow<BigUint>>(
        &self,
        other: &Matrix<V>,
        modulus: &BigUint,
    ) -> Result<Matrix<BigUint>, MatrixError> {
        if self.shape() != other.shape() {
            return Err(MatrixError::Incompatible(self.shape(), other.shape()));
        }
        let data = self
            .iter()
            .zip(other.iter())
            .map(|(a, b)| (as_big(a) + as_big(b)) % modulus)
            .collect();
        Matrix::new(self.rows, self.cols, data)
    }
}

impl FixedWidth for BigUint {
    fn write_fixed(&self, out: &mut [u8]) -> Result<(), MatrixError> {
        let bytes = self.to_bytes_be();
        if bytes.len() > out.len() {
            return Err(MatrixError::Overflow {
                needed: bytes.len(),
                width: out.len(),
            });
        }
        let (pad, tail) = out.split_at_mut(out.len() - bytes.len());
        pad.fill(0);
        tail.copy_from_slice(&bytes);
        Ok(())
    }

    fn read_fixed(bytes: &[u8]) -> Self {
        BigUint::from_bytes_be(bytes)
    }
}
