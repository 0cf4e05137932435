//! Third stage: one row per presentation.

use super::{BuildFile, PrescribingImported, StatisticsImported};
use crate::codec;
use crate::error::MatrixStoreError;
use crate::extract::{read_all, RecordSource};
use crate::matrix::{AnyMatrix, Matrix};
use crate::matrix_ops::{finalize_float, finalize_int, Representation, SparseBuilder};
use crate::models::{parse_date, PrescribingRecord, PresentationRecord};

use hashbrown::HashMap;
use rusqlite::{params, Transaction};
use tracing::{event, instrument, Level};

/// The four matrices of the presentation currently being imported.
struct RowBuilder {
    code: String,
    items: SparseBuilder<i64>,
    quantity: SparseBuilder<f64>,
    actual_cost: SparseBuilder<f64>,
    net_cost: SparseBuilder<f64>,
}

impl RowBuilder {
    fn new(code: String, (rows, cols): (usize, usize)) -> Self {
        Self {
            code,
            items: SparseBuilder::new(rows, cols),
            quantity: SparseBuilder::new(rows, cols),
            actual_cost: SparseBuilder::new(rows, cols),
            net_cost: SparseBuilder::new(rows, cols),
        }
    }

    fn push(
        &mut self,
        (row, column): (usize, usize),
        record: &PrescribingRecord,
    ) -> Result<(), MatrixStoreError> {
        self.items.push(row, column, record.items)?;
        self.quantity.push(row, column, record.quantity)?;
        self.actual_cost.push(row, column, record.actual_cost)?;
        self.net_cost.push(row, column, record.net_cost)?;
        Ok(())
    }

    /// Finalise the four matrices with a shared representation, decided by the densest.
    ///
    /// Returns `None` when the presentation has no activity within the build.
    fn finish(self, threshold: f64) -> Option<(String, [AnyMatrix; 4])> {
        let (rows, cols) = self.items.shape();
        let items = self.items.finish();
        let quantity = self.quantity.finish();
        let actual_cost = self.actual_cost.finish();
        let net_cost = self.net_cost.finish();
        let nnz = [items.nnz(), quantity.nnz(), actual_cost.nnz(), net_cost.nnz()]
            .into_iter()
            .max()
            .unwrap_or(0);
        if nnz == 0 {
            return None;
        }
        let representation = Representation::for_density(nnz, rows * cols, threshold);
        Some((
            self.code,
            [
                finalize_int(Matrix::Sparse(items), representation),
                finalize_float(Matrix::Sparse(quantity), representation),
                finalize_float(Matrix::Sparse(actual_cost), representation),
                finalize_float(Matrix::Sparse(net_cost), representation),
            ],
        ))
    }
}

fn write_row(
    transaction: &Transaction,
    code: &str,
    matrices: &[AnyMatrix; 4],
    presentation: Option<&PresentationRecord>,
) -> Result<(), MatrixStoreError> {
    let (name, is_generic, adq_per_quantity) = match presentation {
        Some(presentation) => (
            presentation.name.as_str(),
            presentation.is_generic,
            presentation.adq_per_quantity,
        ),
        None => ("", false, None),
    };
    let mut statement = transaction.prepare_cached(
        "INSERT INTO presentation
         (code, name, is_generic, adq_per_quantity, items, quantity, actual_cost, net_cost)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    statement.execute(params![
        code,
        name,
        is_generic,
        adq_per_quantity,
        codec::serialize_compressed(&matrices[0])?,
        codec::serialize_compressed(&matrices[1])?,
        codec::serialize_compressed(&matrices[2])?,
        codec::serialize_compressed(&matrices[3])?,
    ])?;
    Ok(())
}

impl BuildFile<StatisticsImported> {
    /// Write one row per presentation with activity in the build.
    ///
    /// Records must be sorted by (code, organisation, date); repeated keys are added together.
    /// Only the presentation being imported is held in memory. Descriptive attributes come from
    /// `presentations` where given; presentations without prescribing get no row.
    #[instrument(skip_all)]
    pub fn import_prescribing(
        mut self,
        source: &dyn RecordSource<PrescribingRecord>,
        presentations: Option<&dyn RecordSource<PresentationRecord>>,
    ) -> Result<BuildFile<PrescribingImported>, MatrixStoreError> {
        let presentations: HashMap<String, PresentationRecord> = match presentations {
            Some(source) => read_all(source)?
                .into_iter()
                .map(|presentation| (presentation.code.clone(), presentation))
                .collect(),
            None => HashMap::new(),
        };
        let shape = self.shape();
        let threshold = self.threshold;
        let mut written = 0;
        let mut previous: Option<(String, String, String)> = None;
        let mut current: Option<RowBuilder> = None;

        let transaction = self.connection.transaction()?;
        for record in source.records()? {
            let record = record?;
            let key = (
                record.code.clone(),
                record.organisation.clone(),
                record.date.clone(),
            );
            if let Some(previous) = &previous {
                if &key < previous {
                    return Err(MatrixStoreError::UnsortedInput {
                        previous: format!("{} {} {}", previous.0, previous.1, previous.2),
                        current: format!("{} {} {}", key.0, key.1, key.2),
                    });
                }
            }
            previous = Some(key);

            if current.as_ref().map(|row| row.code != record.code).unwrap_or(true) {
                let next = RowBuilder::new(record.code.clone(), shape);
                if let Some((code, matrices)) =
                    current.replace(next).and_then(|row| row.finish(threshold))
                {
                    write_row(&transaction, &code, &matrices, presentations.get(&code))?;
                    written += 1;
                }
            }
            let cell = self
                .organisations
                .offset(record.organisation.as_str())
                .zip(self.dates.offset(&parse_date(&record.date)?));
            if let (Some(cell), Some(row)) = (cell, current.as_mut()) {
                row.push(cell, &record)?;
            }
        }
        if let Some((code, matrices)) = current.and_then(|row| row.finish(threshold)) {
            write_row(&transaction, &code, &matrices, presentations.get(&code))?;
            written += 1;
        }
        transaction.commit()?;

        event!(
            Level::INFO,
            "Imported {} presentations with shape {:?}",
            written,
            shape
        );
        Ok(self.advance())
    }
}
