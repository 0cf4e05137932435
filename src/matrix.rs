//! Two dimensional matrices with a dense or sparse representation.
//!
//! Every stored matrix has the logical shape (organisations × months). Most cells are absent,
//! so the usual representation is [SparseMatrix], a compressed sparse row (CSR) layout. Matrices
//! that are mostly filled are kept as dense [ndarray] arrays instead. The choice is made once,
//! when the matrix is finalised (see [crate::matrix_ops::finalize]).
//!
//! [AnyMatrix] carries the element type as a runtime tag so that matrices of different widths can
//! be stored, decoded and passed around uniformly.

use crate::codec;
use crate::error::MatrixStoreError;
use crate::models::DType;
use crate::types::Element;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Compressed sparse row matrix.
///
/// Row `r` holds the values `data[indptr[r]..indptr[r + 1]]` at the columns
/// `indices[indptr[r]..indptr[r + 1]]`. Column indices increase strictly within a row and explicit
/// zeros are never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix<T> {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> SparseMatrix<T> {
    /// An empty matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            indptr: vec![0; rows + 1],
            indices: vec![],
            data: vec![],
        }
    }

    /// Build a sparse matrix from its CSR components, validating them.
    ///
    /// # Arguments
    ///
    /// * `rows`, `cols`: Logical shape
    /// * `indptr`: Row start offsets, `rows + 1` entries
    /// * `indices`: Column index of each stored value
    /// * `data`: Stored values
    pub fn from_parts(
        rows: usize,
        cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<T>,
    ) -> Result<Self, MatrixStoreError> {
        let corrupt = |reason: &str| MatrixStoreError::CorruptBlob {
            reason: reason.to_string(),
        };
        if indptr.len() != rows + 1 {
            return Err(corrupt("row pointer length does not match row count"));
        }
        if indices.len() != data.len() {
            return Err(corrupt("index and value counts differ"));
        }
        if indptr[0] != 0 || indptr[rows] != data.len() {
            return Err(corrupt("row pointers do not span the stored values"));
        }
        if indptr.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(corrupt("row pointers are not monotonic"));
        }
        for row in 0..rows {
            let columns = &indices[indptr[row]..indptr[row + 1]];
            if columns.iter().any(|column| *column >= cols) {
                return Err(corrupt("column index out of range"));
            }
            if columns.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(corrupt("column indices are not sorted"));
            }
        }
        Ok(Self {
            rows,
            cols,
            indptr,
            indices,
            data,
        })
    }

    /// Build from components known to be valid, e.g. by [crate::matrix_ops::SparseBuilder].
    pub(crate) fn from_parts_unchecked(
        rows: usize,
        cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<T>,
    ) -> Self {
        debug_assert_eq!(indptr.len(), rows + 1);
        Self {
            rows,
            cols,
            indptr,
            indices,
            data,
        }
    }

    /// Convert a dense array, dropping zeros.
    pub fn from_dense(array: &ArrayView2<T>) -> Self {
        let (rows, cols) = array.dim();
        let mut indptr = Vec::with_capacity(rows + 1);
        let mut indices = vec![];
        let mut data = vec![];
        indptr.push(0);
        for row in array.axis_iter(Axis(0)) {
            for (column, value) in row.iter().enumerate() {
                if !value.is_zero() {
                    indices.push(column);
                    data.push(*value);
                }
            }
            indptr.push(data.len());
        }
        Self {
            rows,
            cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored (non-zero) values.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Column indices and values stored in one row.
    pub fn row(&self, row: usize) -> (&[usize], &[T]) {
        let (start, end) = (self.indptr[row], self.indptr[row + 1]);
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Value at a coordinate, zero when absent.
    pub fn get(&self, row: usize, column: usize) -> T {
        let (columns, values) = self.row(row);
        match columns.binary_search(&column) {
            Ok(position) => values[position],
            Err(_) => T::zero(),
        }
    }

    pub fn to_dense(&self) -> Array2<T> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for row in 0..self.rows {
            let (columns, values) = self.row(row);
            for (column, value) in columns.iter().zip(values) {
                dense[[row, *column]] = *value;
            }
        }
        dense
    }
}

/// A matrix with either a dense or a sparse representation.
#[derive(Clone, Debug, PartialEq)]
pub enum Matrix<T> {
    Dense(Array2<T>),
    Sparse(SparseMatrix<T>),
}

impl<T: Element> Matrix<T> {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Dense(array) => array.dim(),
            Self::Sparse(sparse) => sparse.shape(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Number of non-zero cells.
    pub fn nnz(&self) -> usize {
        match self {
            Self::Dense(array) => array.iter().filter(|value| !value.is_zero()).count(),
            Self::Sparse(sparse) => sparse.nnz(),
        }
    }

    /// Value at a coordinate.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate is out of bounds.
    pub fn get(&self, row: usize, column: usize) -> T {
        match self {
            Self::Dense(array) => array[[row, column]],
            Self::Sparse(sparse) => sparse.get(row, column),
        }
    }

    /// Call `f(column, value)` for each potentially non-zero cell of `row`.
    pub fn for_each_in_row(&self, row: usize, mut f: impl FnMut(usize, T)) {
        match self {
            Self::Dense(array) => array
                .row(row)
                .iter()
                .enumerate()
                .for_each(|(column, value)| f(column, *value)),
            Self::Sparse(sparse) => {
                let (columns, values) = sparse.row(row);
                columns
                    .iter()
                    .zip(values)
                    .for_each(|(column, value)| f(*column, *value));
            }
        }
    }

    /// Dense copy of the given rows, in the given order.
    ///
    /// # Panics
    ///
    /// Panics if any row is out of bounds.
    pub fn select_rows(&self, rows: &[usize]) -> Array2<T> {
        match self {
            Self::Dense(array) => array.select(Axis(0), rows),
            Self::Sparse(sparse) => {
                let mut selected = Array2::zeros((rows.len(), sparse.cols));
                for (out_row, row) in rows.iter().enumerate() {
                    let (columns, values) = sparse.row(*row);
                    for (column, value) in columns.iter().zip(values) {
                        selected[[out_row, *column]] = *value;
                    }
                }
                selected
            }
        }
    }

    pub fn to_dense(&self) -> Array2<T> {
        match self {
            Self::Dense(array) => array.clone(),
            Self::Sparse(sparse) => sparse.to_dense(),
        }
    }

    /// The same values with a sparse representation.
    pub fn into_sparse(self) -> Self {
        match self {
            Self::Dense(array) => Self::Sparse(SparseMatrix::from_dense(&array.view())),
            sparse => sparse,
        }
    }

    /// The same values with a dense representation.
    pub fn into_dense(self) -> Self {
        match self {
            Self::Sparse(sparse) => Self::Dense(sparse.to_dense()),
            dense => dense,
        }
    }
}

/// A matrix whose element type is only known at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyMatrix {
    Int8(Matrix<i8>),
    Int16(Matrix<i16>),
    Int32(Matrix<i32>),
    Int64(Matrix<i64>),
    Uint8(Matrix<u8>),
    Uint16(Matrix<u16>),
    Uint32(Matrix<u32>),
    Uint64(Matrix<u64>),
    Float32(Matrix<f32>),
    Float64(Matrix<f64>),
}

/// Evaluate an expression generically over the typed matrix held by an [AnyMatrix].
///
/// `with_matrix!(any, m => body)` binds `m` to the inner [Matrix] of whichever variant `any` is
/// and evaluates `body` for it.
macro_rules! with_matrix {
    ($any:expr, $m:ident => $body:expr) => {
        match $any {
            $crate::matrix::AnyMatrix::Int8($m) => $body,
            $crate::matrix::AnyMatrix::Int16($m) => $body,
            $crate::matrix::AnyMatrix::Int32($m) => $body,
            $crate::matrix::AnyMatrix::Int64($m) => $body,
            $crate::matrix::AnyMatrix::Uint8($m) => $body,
            $crate::matrix::AnyMatrix::Uint16($m) => $body,
            $crate::matrix::AnyMatrix::Uint32($m) => $body,
            $crate::matrix::AnyMatrix::Uint64($m) => $body,
            $crate::matrix::AnyMatrix::Float32($m) => $body,
            $crate::matrix::AnyMatrix::Float64($m) => $body,
        }
    };
}
pub(crate) use with_matrix;

impl AnyMatrix {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Uint8(_) => DType::Uint8,
            Self::Uint16(_) => DType::Uint16,
            Self::Uint32(_) => DType::Uint32,
            Self::Uint64(_) => DType::Uint64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        with_matrix!(self, m => m.shape())
    }

    pub fn is_sparse(&self) -> bool {
        with_matrix!(self, m => m.is_sparse())
    }

    pub fn nnz(&self) -> usize {
        with_matrix!(self, m => m.nnz())
    }

    /// Value at a coordinate, widened to `f64`.
    pub fn get_f64(&self, row: usize, column: usize) -> f64 {
        with_matrix!(self, m => m.get(row, column).as_f64())
    }

    /// Dense copy with every value widened to `i64`.
    pub fn to_i64_array(&self) -> Array2<i64> {
        with_matrix!(self, m => m.to_dense().mapv(|value| value.as_i64()))
    }

    /// Dense copy with every value widened to `f64`.
    pub fn to_f64_array(&self) -> Array2<f64> {
        with_matrix!(self, m => m.to_dense().mapv(|value| value.as_f64()))
    }
}

impl<T: Element> From<Matrix<T>> for AnyMatrix {
    fn from(matrix: Matrix<T>) -> Self {
        T::into_any(matrix)
    }
}

impl<T: Element> From<Array2<T>> for AnyMatrix {
    fn from(array: Array2<T>) -> Self {
        T::into_any(Matrix::Dense(array))
    }
}

// Matrices travel through caches and other serde formats as compressed blobs.
impl Serialize for AnyMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let blob = codec::serialize_compressed(self).map_err(serde::ser::Error::custom)?;
        blob.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnyMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let blob = Vec::<u8>::deserialize(deserializer)?;
        codec::deserialize(&blob).map_err(de::Error::custom)
    }
}
