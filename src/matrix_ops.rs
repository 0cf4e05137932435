//! Helpers for building, accumulating and finalising matrices.
//!
//! Matrices are built or summed in a wide working type (`i64` or `f64`) and then finalised
//! exactly once before being written: the representation is chosen from the fill ratio and
//! integer matrices are narrowed to the smallest type that holds every value losslessly.

use crate::error::MatrixStoreError;
use crate::matrix::{with_matrix, AnyMatrix, Matrix, SparseMatrix};
use crate::models::DType;
use crate::types::Element;

use ndarray::{Array2, ErrorKind, ShapeError, Zip};
use ndarray_stats::QuantileExt;

/// Above this ratio of non-zero to total cells a matrix is stored densely.
pub const DENSITY_THRESHOLD: f64 = 0.5;

/// Physical representation chosen for a finalised matrix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Representation {
    Dense,
    Sparse,
}

impl Representation {
    /// Choose a representation from the number of non-zero cells.
    ///
    /// # Arguments
    ///
    /// * `nnz`: Number of non-zero cells
    /// * `cells`: Total number of cells
    /// * `threshold`: Density above which the dense representation is used
    pub fn for_density(nnz: usize, cells: usize, threshold: f64) -> Self {
        if cells > 0 && nnz as f64 / cells as f64 > threshold {
            Self::Dense
        } else {
            Self::Sparse
        }
    }
}

/// Returns the smallest integer type able to hold every value in `min..=max`.
///
/// Unsigned types are preferred when no value is negative.
pub fn smallest_int_dtype(min: i64, max: i64) -> DType {
    if min >= 0 {
        if max <= u8::MAX as i64 {
            DType::Uint8
        } else if max <= u16::MAX as i64 {
            DType::Uint16
        } else if max <= u32::MAX as i64 {
            DType::Uint32
        } else {
            DType::Uint64
        }
    } else if min >= i8::MIN as i64 && max <= i8::MAX as i64 {
        DType::Int8
    } else if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
        DType::Int16
    } else if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
        DType::Int32
    } else {
        DType::Int64
    }
}

fn with_representation<T: Element>(matrix: Matrix<T>, representation: Representation) -> Matrix<T> {
    match representation {
        Representation::Dense => matrix.into_dense(),
        Representation::Sparse => matrix.into_sparse(),
    }
}

fn cast<U: Element>(matrix: Matrix<i64>) -> Matrix<U> {
    match matrix {
        Matrix::Dense(array) => Matrix::Dense(array.mapv(U::from_i64)),
        Matrix::Sparse(sparse) => {
            let (rows, cols) = sparse.shape();
            Matrix::Sparse(SparseMatrix::from_parts_unchecked(
                rows,
                cols,
                sparse.indptr().to_vec(),
                sparse.indices().to_vec(),
                sparse.data().iter().copied().map(U::from_i64).collect(),
            ))
        }
    }
}

/// Minimum and maximum value of an integer matrix, counting implicit zeros.
fn int_range(matrix: &Matrix<i64>) -> (i64, i64) {
    match matrix {
        Matrix::Dense(array) => match (array.min(), array.max()) {
            (Ok(min), Ok(max)) => (*min, *max),
            _ => (0, 0),
        },
        Matrix::Sparse(sparse) => sparse
            .data()
            .iter()
            .fold((0, 0), |(min, max), value| (min.min(*value), max.max(*value))),
    }
}

/// Narrow an integer matrix to the smallest lossless integer type.
pub fn shrink_integers(matrix: Matrix<i64>) -> AnyMatrix {
    let (min, max) = int_range(&matrix);
    match smallest_int_dtype(min, max) {
        DType::Uint8 => cast::<u8>(matrix).into(),
        DType::Uint16 => cast::<u16>(matrix).into(),
        DType::Uint32 => cast::<u32>(matrix).into(),
        DType::Int8 => cast::<i8>(matrix).into(),
        DType::Int16 => cast::<i16>(matrix).into(),
        DType::Int32 => cast::<i32>(matrix).into(),
        _ => matrix.into(),
    }
}

/// Finalise an integer matrix with the given representation.
pub fn finalize_int(matrix: Matrix<i64>, representation: Representation) -> AnyMatrix {
    shrink_integers(with_representation(matrix, representation))
}

/// Finalise a floating point matrix with the given representation.
pub fn finalize_float(matrix: Matrix<f64>, representation: Representation) -> AnyMatrix {
    with_representation(matrix, representation).into()
}

/// Finalise any matrix, choosing the representation from its own fill ratio.
///
/// Integer matrices are narrowed to their smallest lossless type. Floating point matrices keep
/// their type.
pub fn finalize(matrix: AnyMatrix, threshold: f64) -> AnyMatrix {
    let (rows, cols) = matrix.shape();
    let representation = Representation::for_density(matrix.nnz(), rows * cols, threshold);
    match matrix {
        AnyMatrix::Float32(m) => with_representation(m, representation).into(),
        AnyMatrix::Float64(m) => finalize_float(m, representation),
        integer => {
            let wide = with_matrix!(integer, m => widen_int(m));
            finalize_int(wide, representation)
        }
    }
}

fn widen_int<T: Element>(matrix: Matrix<T>) -> Matrix<i64> {
    match matrix {
        Matrix::Dense(array) => Matrix::Dense(array.mapv(|value| value.as_i64())),
        Matrix::Sparse(sparse) => {
            let (rows, cols) = sparse.shape();
            Matrix::Sparse(SparseMatrix::from_parts_unchecked(
                rows,
                cols,
                sparse.indptr().to_vec(),
                sparse.indices().to_vec(),
                sparse.data().iter().map(|value| value.as_i64()).collect(),
            ))
        }
    }
}

fn out_of_bounds() -> MatrixStoreError {
    MatrixStoreError::ShapeInvalid(ShapeError::from_kind(ErrorKind::OutOfBounds))
}

fn incompatible_shape() -> MatrixStoreError {
    MatrixStoreError::ShapeInvalid(ShapeError::from_kind(ErrorKind::IncompatibleShape))
}

/// Append-only construction of a [SparseMatrix].
///
/// Values must be pushed in non-decreasing (row, column) order, which is what sorted extract
/// input produces. Pushing the same coordinate again adds to the stored value. Only the matrix
/// being built is held in memory.
#[derive(Debug)]
pub struct SparseBuilder<T> {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<T>,
    last: Option<(usize, usize)>,
}

impl<T: Element> SparseBuilder<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            indptr: vec![0],
            indices: vec![],
            data: vec![],
            last: None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of values stored so far.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Add `value` at `(row, column)`.
    pub fn push(&mut self, row: usize, column: usize, value: T) -> Result<(), MatrixStoreError> {
        if row >= self.rows || column >= self.cols {
            return Err(out_of_bounds());
        }
        if let Some(last) = self.last {
            if (row, column) < last {
                return Err(MatrixStoreError::UnsortedInput {
                    previous: format!("{:?}", last),
                    current: format!("{:?}", (row, column)),
                });
            }
        }
        self.last = Some((row, column));
        if value.is_zero() {
            return Ok(());
        }
        // Close every row before this one.
        while self.indptr.len() <= row {
            self.indptr.push(self.data.len());
        }
        let row_start = self.indptr[row];
        if self.data.len() > row_start && self.indices.last() == Some(&column) {
            if let Some(stored) = self.data.last_mut() {
                *stored += value;
            }
        } else {
            self.indices.push(column);
            self.data.push(value);
        }
        Ok(())
    }

    /// Convert the values pushed so far, e.g. to promote an integer builder to floating point.
    pub fn map<U: Element>(self, f: impl Fn(T) -> U) -> SparseBuilder<U> {
        SparseBuilder {
            rows: self.rows,
            cols: self.cols,
            indptr: self.indptr,
            indices: self.indices,
            data: self.data.into_iter().map(f).collect(),
            last: self.last,
        }
    }

    /// Complete the matrix.
    pub fn finish(mut self) -> SparseMatrix<T> {
        while self.indptr.len() <= self.rows {
            self.indptr.push(self.data.len());
        }
        // Sums of opposite signs can leave explicit zeros behind.
        if self.data.iter().any(|value| value.is_zero()) {
            let mut indptr = Vec::with_capacity(self.rows + 1);
            let mut indices = vec![];
            let mut data = vec![];
            indptr.push(0);
            for row in 0..self.rows {
                for position in self.indptr[row]..self.indptr[row + 1] {
                    if !self.data[position].is_zero() {
                        indices.push(self.indices[position]);
                        data.push(self.data[position]);
                    }
                }
                indptr.push(data.len());
            }
            return SparseMatrix::from_parts_unchecked(self.rows, self.cols, indptr, indices, data);
        }
        SparseMatrix::from_parts_unchecked(
            self.rows,
            self.cols,
            self.indptr,
            self.indices,
            self.data,
        )
    }
}

/// Running element-wise sum of matrices.
///
/// Integer matrices are summed as `i64`. Adding a floating point matrix promotes the
/// accumulator to `f64`.
#[derive(Clone, Debug, PartialEq)]
pub enum Accumulator {
    Int(Array2<i64>),
    Float(Array2<f64>),
}

/// Returns a zero-valued accumulator of the given shape.
///
/// # Arguments
///
/// * `rows`, `cols`: Shape
/// * `integer`: Whether to start with an integer accumulator
pub fn zeros(rows: usize, cols: usize, integer: bool) -> Accumulator {
    if integer {
        Accumulator::Int(Array2::zeros((rows, cols)))
    } else {
        Accumulator::Float(Array2::zeros((rows, cols)))
    }
}

/// Returns a zero-valued accumulator with the shape and kind of `matrix`.
pub fn zeros_like(matrix: &AnyMatrix) -> Accumulator {
    let (rows, cols) = matrix.shape();
    zeros(rows, cols, matrix.dtype().is_integer())
}

fn add_into<T: Element, W: Copy + std::ops::AddAssign>(
    accumulator: &mut Array2<W>,
    matrix: &Matrix<T>,
    widen: impl Fn(T) -> W,
) {
    match matrix {
        Matrix::Dense(array) => {
            Zip::from(accumulator)
                .and(array)
                .for_each(|total, value| *total += widen(*value));
        }
        Matrix::Sparse(sparse) => {
            let (rows, _) = sparse.shape();
            for row in 0..rows {
                let (columns, values) = sparse.row(row);
                for (column, value) in columns.iter().zip(values) {
                    accumulator[[row, *column]] += widen(*value);
                }
            }
        }
    }
}

impl Accumulator {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Int(array) => array.dim(),
            Self::Float(array) => array.dim(),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Number of non-zero cells.
    pub fn nnz(&self) -> usize {
        match self {
            Self::Int(array) => array.iter().filter(|value| **value != 0).count(),
            Self::Float(array) => array.iter().filter(|value| **value != 0.0).count(),
        }
    }

    /// Add a matrix of the same shape.
    pub fn add(&mut self, matrix: &AnyMatrix) -> Result<(), MatrixStoreError> {
        if matrix.shape() != self.shape() {
            return Err(incompatible_shape());
        }
        if let Self::Int(array) = self {
            if !matrix.dtype().is_integer() {
                *self = Self::Float(array.mapv(|value| value as f64));
            }
        }
        match self {
            Self::Int(array) => with_matrix!(matrix, m => add_into(array, m, |v| v.as_i64())),
            Self::Float(array) => with_matrix!(matrix, m => add_into(array, m, |v| v.as_f64())),
        }
        Ok(())
    }

    /// Finalise with a representation chosen from this accumulator's own fill ratio.
    pub fn finalize(self, threshold: f64) -> AnyMatrix {
        let (rows, cols) = self.shape();
        let representation = Representation::for_density(self.nnz(), rows * cols, threshold);
        self.finalize_as(representation)
    }

    /// Finalise with a given representation.
    pub fn finalize_as(self, representation: Representation) -> AnyMatrix {
        match self {
            Self::Int(array) => finalize_int(Matrix::Dense(array), representation),
            Self::Float(array) => finalize_float(Matrix::Dense(array), representation),
        }
    }
}
