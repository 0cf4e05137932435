//! Grouped summation of matrix rows.
//!
//! A [RowGrouper] maps row offsets (organisations) to group identifiers, e.g. practices to the
//! area that contains them, and sums the rows of a matrix within each group. Groups are ordered
//! lexically by identifier, so output row `i` always belongs to `grouper.ids()[i]`.

use crate::error::MatrixStoreError;
use crate::matrix::{with_matrix, AnyMatrix, Matrix};
use crate::types::Element;

use hashbrown::HashMap;
use ndarray::{Array, Array2, Axis, Dimension, ErrorKind, Ix1, Ix2, ShapeError};
use num_traits::Zero;
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Result of a grouped sum.
///
/// Integer matrices are summed into `i64`, floating point matrices into `f64`.
#[derive(Clone, Debug, PartialEq)]
pub enum Summed<D: Dimension> {
    Int(Array<i64, D>),
    Float(Array<f64, D>),
}

impl<D: Dimension> Summed<D> {
    /// The values widened to `f64`.
    pub fn to_f64(&self) -> Array<f64, D> {
        match self {
            Self::Int(array) => array.mapv(|value| value as f64),
            Self::Float(array) => array.clone(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Int(array) => array.shape(),
            Self::Float(array) => array.shape(),
        }
    }
}

impl Summed<Ix2> {
    fn into_first_row(self) -> Summed<Ix1> {
        match self {
            Self::Int(array) => Summed::Int(array.index_axis_move(Axis(0), 0)),
            Self::Float(array) => Summed::Float(array.index_axis_move(Axis(0), 0)),
        }
    }
}

/// Sums matrix rows by group.
#[derive(Clone, Debug)]
pub struct RowGrouper {
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    rows: Vec<Vec<usize>>,
    max_row: Option<usize>,
    fast_path: bool,
}

impl RowGrouper {
    /// Build a grouper from `(row offset, group id)` pairs.
    pub fn new<I, S>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (row, id) in assignments {
            groups.entry(id.into()).or_default().push(row);
        }
        let mut ids = Vec::with_capacity(groups.len());
        let mut rows = Vec::with_capacity(groups.len());
        for (id, mut members) in groups {
            members.sort_unstable();
            members.dedup();
            ids.push(id);
            rows.push(members);
        }
        let positions = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();
        let max_row = rows.iter().flatten().copied().max();
        let fast_path = rows.iter().all(|members| members.len() == 1);
        Self {
            ids,
            positions,
            rows,
            max_row,
            fast_path,
        }
    }

    /// Disable the single-row selection shortcut.
    pub fn without_fast_path(mut self) -> Self {
        self.fast_path = false;
        self
    }

    /// Group identifiers in output order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row offsets belonging to a group.
    pub fn members(&self, id: &str) -> Result<&[usize], MatrixStoreError> {
        Ok(&self.rows[self.position(id)?])
    }

    fn position(&self, id: &str) -> Result<usize, MatrixStoreError> {
        self.positions
            .get(id)
            .copied()
            .ok_or_else(|| MatrixStoreError::UnknownGroup {
                group: id.to_string(),
            })
    }

    fn check_rows(&self, matrix: &AnyMatrix) -> Result<(), MatrixStoreError> {
        let (rows, _) = matrix.shape();
        match self.max_row {
            Some(max_row) if max_row >= rows => Err(MatrixStoreError::ShapeInvalid(
                ShapeError::from_kind(ErrorKind::OutOfBounds),
            )),
            _ => Ok(()),
        }
    }

    fn sum_typed<T: Element, W: Copy + Zero + AddAssign>(
        &self,
        matrix: &Matrix<T>,
        groups: &[usize],
        widen: impl Fn(T) -> W,
    ) -> Array2<W> {
        if self.fast_path {
            let rows: Vec<usize> = groups.iter().map(|group| self.rows[*group][0]).collect();
            return matrix.select_rows(&rows).mapv(widen);
        }
        let (_, cols) = matrix.shape();
        let mut summed = Array2::zeros((groups.len(), cols));
        for (output_row, group) in groups.iter().enumerate() {
            for row in &self.rows[*group] {
                matrix.for_each_in_row(*row, |column, value| {
                    summed[[output_row, column]] += widen(value)
                });
            }
        }
        summed
    }

    /// Sum the rows of each group.
    ///
    /// # Arguments
    ///
    /// * `matrix`: Matrix with one row per organisation
    /// * `groups`: Optional subset of groups, in the order wanted. Defaults to every group in
    ///   lexical order.
    pub fn sum(
        &self,
        matrix: &AnyMatrix,
        groups: Option<&[&str]>,
    ) -> Result<Summed<Ix2>, MatrixStoreError> {
        self.check_rows(matrix)?;
        let positions: Vec<usize> = match groups {
            Some(ids) => ids
                .iter()
                .map(|id| self.position(id))
                .collect::<Result<_, _>>()?,
            None => (0..self.ids.len()).collect(),
        };
        let summed = if matrix.dtype().is_integer() {
            Summed::Int(with_matrix!(matrix, m => self.sum_typed(m, &positions, |v| v.as_i64())))
        } else {
            Summed::Float(with_matrix!(matrix, m => self.sum_typed(m, &positions, |v| v.as_f64())))
        };
        Ok(summed)
    }

    /// Sum the rows of a single group.
    pub fn sum_one_group(
        &self,
        matrix: &AnyMatrix,
        id: &str,
    ) -> Result<Summed<Ix1>, MatrixStoreError> {
        Ok(self.sum(matrix, Some(&[id]))?.into_first_row())
    }

    /// The member rows of one group, unsummed, keeping the matrix's element type.
    pub fn get_group(&self, matrix: &AnyMatrix, id: &str) -> Result<AnyMatrix, MatrixStoreError> {
        self.check_rows(matrix)?;
        let rows = &self.rows[self.position(id)?];
        Ok(with_matrix!(matrix, m => AnyMatrix::from(m.select_rows(rows))))
    }
}
