//! Second stage: organisation statistics.

use super::{BuildFile, Initialised, StatisticsImported};
use crate::codec;
use crate::error::MatrixStoreError;
use crate::extract::RecordSource;
use crate::matrix::Matrix;
use crate::matrix_ops::{finalize_float, finalize_int, Representation, SparseBuilder};
use crate::models::{parse_date, StatisticValue, StatisticsRecord};

use rusqlite::params;
use std::collections::BTreeMap;
use tracing::{event, instrument, Level};

/// Builds one statistic's matrix. Starts as integer and turns floating point at the first
/// non-integer value.
enum StatisticBuilder {
    Int(SparseBuilder<i64>),
    Float(SparseBuilder<f64>),
}

impl StatisticBuilder {
    fn promote(&mut self) {
        if let Self::Int(builder) = self {
            let (rows, cols) = builder.shape();
            let builder = std::mem::replace(builder, SparseBuilder::new(rows, cols));
            *self = Self::Float(builder.map(|value| value as f64));
        }
    }

    fn push(
        &mut self,
        row: usize,
        column: usize,
        value: StatisticValue,
    ) -> Result<(), MatrixStoreError> {
        match (self, value) {
            (Self::Int(builder), StatisticValue::Int(value)) => builder.push(row, column, value),
            (Self::Float(builder), value) => builder.push(row, column, value.as_f64()),
            (this, value) => {
                this.promote();
                this.push(row, column, value)
            }
        }
    }

    fn finish(self, threshold: f64) -> crate::matrix::AnyMatrix {
        match self {
            Self::Int(builder) => {
                let (rows, cols) = builder.shape();
                let representation =
                    Representation::for_density(builder.nnz(), rows * cols, threshold);
                finalize_int(Matrix::Sparse(builder.finish()), representation)
            }
            Self::Float(builder) => {
                let (rows, cols) = builder.shape();
                let representation =
                    Representation::for_density(builder.nnz(), rows * cols, threshold);
                finalize_float(Matrix::Sparse(builder.finish()), representation)
            }
        }
    }
}

impl BuildFile<Initialised> {
    /// Write one matrix per named statistic.
    ///
    /// Records must be sorted by (organisation, date). Records for organisations or months
    /// outside the build are skipped.
    #[instrument(skip_all)]
    pub fn import_statistics(
        mut self,
        source: &dyn RecordSource<StatisticsRecord>,
    ) -> Result<BuildFile<StatisticsImported>, MatrixStoreError> {
        let (rows, cols) = self.shape();
        let mut builders: BTreeMap<String, StatisticBuilder> = BTreeMap::new();
        let mut previous: Option<(String, String)> = None;
        let mut skipped = 0;
        for record in source.records()? {
            let StatisticsRecord {
                organisation,
                date,
                values,
            } = record?;
            let key = (organisation, date);
            if let Some(previous) = &previous {
                if &key < previous {
                    return Err(MatrixStoreError::UnsortedInput {
                        previous: format!("{} {}", previous.0, previous.1),
                        current: format!("{} {}", key.0, key.1),
                    });
                }
            }
            let cell = self.cell(&key.0, &parse_date(&key.1)?);
            previous = Some(key);
            let (row, column) = match cell {
                Some(cell) => cell,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            for (name, value) in values {
                let builder = builders
                    .entry(name)
                    .or_insert_with(|| StatisticBuilder::Int(SparseBuilder::new(rows, cols)));
                if let Some(value) = value {
                    builder.push(row, column, value)?;
                }
            }
        }
        if skipped > 0 {
            event!(
                Level::INFO,
                "Skipped {} statistics records outside the build",
                skipped
            );
        }

        let threshold = self.threshold;
        let transaction = self.connection.transaction()?;
        {
            let mut statement = transaction
                .prepare("INSERT INTO organisation_statistic (name, value) VALUES (?1, ?2)")?;
            for (name, builder) in builders {
                let matrix = builder.finish(threshold);
                event!(
                    Level::DEBUG,
                    "Statistic {} is {} with {} values",
                    name,
                    matrix.dtype(),
                    matrix.nnz()
                );
                statement.execute(params![name, codec::serialize_compressed(&matrix)?])?;
            }
        }
        transaction.commit()?;
        Ok(self.advance())
    }
}
