//! The `MATRIX_SUM` SQL aggregate.
//!
//! `SELECT MATRIX_SUM(items) FROM presentation WHERE ...` decodes every non-null blob in the
//! group, adds them element-wise and returns the finalised sum as a compressed blob, or NULL
//! when the group has no non-null blobs.

use crate::codec;
use crate::error::MatrixStoreError;
use crate::matrix_ops::{self, Accumulator, DENSITY_THRESHOLD};

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

/// Name under which the aggregate is registered.
pub const MATRIX_SUM: &str = "MATRIX_SUM";

struct MatrixSum;

fn user_error(error: MatrixStoreError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(error))
}

impl Aggregate<Option<Accumulator>, Option<Vec<u8>>> for MatrixSum {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<Option<Accumulator>> {
        Ok(None)
    }

    fn step(&self, ctx: &mut Context<'_>, sum: &mut Option<Accumulator>) -> rusqlite::Result<()> {
        let blob = match ctx.get_raw(0) {
            ValueRef::Null => return Ok(()),
            ValueRef::Blob(blob) => blob,
            _ => {
                return Err(user_error(MatrixStoreError::CorruptBlob {
                    reason: "MATRIX_SUM argument is not a blob".to_string(),
                }))
            }
        };
        let matrix = codec::deserialize(blob).map_err(user_error)?;
        let accumulator = sum.get_or_insert_with(|| matrix_ops::zeros_like(&matrix));
        accumulator.add(&matrix).map_err(user_error)
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        sum: Option<Option<Accumulator>>,
    ) -> rusqlite::Result<Option<Vec<u8>>> {
        match sum.flatten() {
            Some(accumulator) => {
                let matrix = accumulator.finalize(DENSITY_THRESHOLD);
                codec::serialize_compressed(&matrix)
                    .map(Some)
                    .map_err(user_error)
            }
            None => Ok(None),
        }
    }
}

/// Register `MATRIX_SUM` on a connection.
pub fn register(connection: &Connection) -> Result<(), MatrixStoreError> {
    connection.create_aggregate_function(
        MATRIX_SUM,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        MatrixSum,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::matrix::{AnyMatrix, Matrix};
    use ndarray::array;

    fn connection_with(blobs: &[Option<Vec<u8>>]) -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        register(&connection).unwrap();
        connection
            .execute_batch("CREATE TABLE t (grp TEXT, value BLOB)")
            .unwrap();
        for blob in blobs {
            connection
                .execute("INSERT INTO t (grp, value) VALUES ('a', ?1)", [blob])
                .unwrap();
        }
        connection
    }

    fn sum(connection: &Connection) -> Option<AnyMatrix> {
        let blob: Option<Vec<u8>> = connection
            .query_row("SELECT MATRIX_SUM(value) FROM t", [], |row| row.get(0))
            .unwrap();
        blob.map(|blob| codec::deserialize(&blob).unwrap())
    }

    #[test]
    fn test_sum_mixed_types_and_representations() {
        let a: AnyMatrix = array![[1_u8, 0], [0, 0]].into();
        let b: AnyMatrix = Matrix::Dense(array![[0_i16, -3], [0, 0]]).into_sparse().into();
        let c: AnyMatrix = array![[1000_u16, 0], [0, 2]].into();
        let blobs: Vec<Option<Vec<u8>>> = [a, b, c]
            .iter()
            .map(|m| Some(codec::serialize_compressed(m).unwrap()))
            .chain([None])
            .collect();
        let connection = connection_with(&blobs);
        let total = sum(&connection).unwrap();
        assert_eq!(array![[1001_i64, -3], [0, 2]], total.to_i64_array());
        assert!(total.dtype().is_integer());
    }

    #[test]
    fn test_sum_floats() {
        let a: AnyMatrix = array![[1.5_f64, 0.0]].into();
        let b: AnyMatrix = array![[2_u8, 1]].into();
        let blobs = vec![
            Some(codec::serialize(&a).unwrap()),
            Some(codec::serialize(&b).unwrap()),
        ];
        let total = sum(&connection_with(&blobs)).unwrap();
        assert_eq!(array![[3.5, 1.0]], total.to_f64_array());
    }

    #[test]
    fn test_sum_empty_is_null() {
        assert_eq!(None, sum(&connection_with(&[])));
        assert_eq!(None, sum(&connection_with(&[None, None])));
    }

    #[test]
    fn test_sum_corrupt_blob_fails() {
        let connection = connection_with(&[Some(b"garbage".to_vec())]);
        let result: rusqlite::Result<Option<Vec<u8>>> =
            connection.query_row("SELECT MATRIX_SUM(value) FROM t", [], |row| row.get(0));
        assert!(result.is_err());
    }
}
