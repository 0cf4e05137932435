//! Fourth stage: fold retired presentation codes into their replacements.

use super::{BuildFile, PrescribingImported, Remapped};
use crate::codec;
use crate::error::MatrixStoreError;
use crate::extract::RecordSource;
use crate::matrix_ops::{self, Accumulator, Representation};
use crate::models::{Field, RemapRecord};

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::{event, instrument, Level};

/// A presentation row as stored during the build.
struct StoredRow {
    name: String,
    is_generic: bool,
    adq_per_quantity: Option<f64>,
    blobs: [Option<Vec<u8>>; 4],
}

fn read_row(transaction: &Transaction, code: &str) -> Result<Option<StoredRow>, MatrixStoreError> {
    let row = transaction
        .query_row(
            "SELECT name, is_generic, adq_per_quantity, items, quantity, actual_cost, net_cost
             FROM presentation WHERE code = ?1",
            params![code],
            |row| {
                Ok(StoredRow {
                    name: row.get(0)?,
                    is_generic: row.get(1)?,
                    adq_per_quantity: row.get(2)?,
                    blobs: [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?],
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Element-wise sums of the former and current rows' matrices, one per field.
fn sum_rows(
    former: &StoredRow,
    current: Option<&StoredRow>,
    (rows, cols): (usize, usize),
) -> Result<Vec<Accumulator>, MatrixStoreError> {
    Field::ALL
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let mut sum = matrix_ops::zeros(rows, cols, field.is_integer());
            let blobs = std::iter::once(&former.blobs[index])
                .chain(current.map(|current| &current.blobs[index]));
            for blob in blobs.flatten() {
                sum.add(&codec::deserialize(blob)?)?;
            }
            Ok(sum)
        })
        .collect()
}

/// Move one former code's data to its current code.
///
/// Returns whether anything was moved.
fn remap_pair(
    transaction: &Transaction,
    pair: &RemapRecord,
    shape: (usize, usize),
    threshold: f64,
) -> Result<bool, MatrixStoreError> {
    let former = match read_row(transaction, &pair.former)? {
        Some(former) => former,
        None => {
            event!(
                Level::INFO,
                "No data for {} to remap to {}",
                pair.former,
                pair.current
            );
            return Ok(false);
        }
    };
    let current = read_row(transaction, &pair.current)?;
    let sums = sum_rows(&former, current.as_ref(), shape)?;

    let nnz = sums.iter().map(Accumulator::nnz).max().unwrap_or(0);
    let representation = Representation::for_density(nnz, shape.0 * shape.1, threshold);
    let blobs = sums
        .into_iter()
        .map(|sum| codec::serialize_compressed(&sum.finalize_as(representation)))
        .collect::<Result<Vec<_>, _>>()?;

    if current.is_some() {
        transaction.execute(
            "UPDATE presentation
             SET items = ?2, quantity = ?3, actual_cost = ?4, net_cost = ?5
             WHERE code = ?1",
            params![pair.current, blobs[0], blobs[1], blobs[2], blobs[3]],
        )?;
    } else {
        transaction.execute(
            "INSERT INTO presentation
             (code, name, is_generic, adq_per_quantity, items, quantity, actual_cost, net_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                pair.current,
                former.name,
                former.is_generic,
                former.adq_per_quantity,
                blobs[0],
                blobs[1],
                blobs[2],
                blobs[3]
            ],
        )?;
    }
    transaction.execute(
        "DELETE FROM presentation WHERE code = ?1",
        params![pair.former],
    )?;
    Ok(true)
}

impl BuildFile<PrescribingImported> {
    /// Fold each former code's matrices into its current code and delete the former row.
    ///
    /// Pairs are applied in order, each in its own transaction, so a chain `A -> B`, `B -> C`
    /// ends with everything under `C`. A former code with no row is skipped.
    #[instrument(skip_all)]
    pub fn remap(
        mut self,
        pairs: &dyn RecordSource<RemapRecord>,
    ) -> Result<BuildFile<Remapped>, MatrixStoreError> {
        let shape = self.shape();
        let threshold = self.threshold;
        let mut remapped = 0;
        for pair in pairs.records()? {
            let pair = pair?;
            if pair.former == pair.current {
                event!(Level::DEBUG, "Skipping remap of {} to itself", pair.former);
                continue;
            }
            let transaction = self.connection.transaction()?;
            if remap_pair(&transaction, &pair, shape, threshold)? {
                remapped += 1;
            }
            transaction.commit()?;
        }
        event!(Level::INFO, "Remapped {} presentation codes", remapped);
        Ok(self.advance())
    }
}
