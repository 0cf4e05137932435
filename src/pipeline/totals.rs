//! Fifth stage: the all-presentations totals.

use super::{BuildFile, Remapped, TotalsCalculated};
use crate::aggregate::MATRIX_SUM;
use crate::error::MatrixStoreError;
use crate::schema::ALL_PRESENTATIONS_ID;

use rusqlite::params;
use tracing::{event, instrument, Level};

impl BuildFile<Remapped> {
    /// Sum every presentation row into the single `all_presentations` row.
    ///
    /// Runs after remapping so that totals cover the final set of rows.
    #[instrument(skip_all)]
    pub fn calculate_totals(mut self) -> Result<BuildFile<TotalsCalculated>, MatrixStoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO all_presentations (id, items, quantity, actual_cost, net_cost)
             SELECT ?1, {0}(items), {0}(quantity), {0}(actual_cost), {0}(net_cost)
             FROM presentation",
            MATRIX_SUM
        );
        let transaction = self.connection.transaction()?;
        transaction.execute(&sql, params![ALL_PRESENTATIONS_ID])?;
        transaction.commit()?;
        event!(Level::INFO, "Calculated totals");
        Ok(self.advance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec;
    use crate::models::{Field, PrescribingRecord, RemapRecord, StatisticsRecord};
    use crate::pipeline::BuildOptions;
    use ndarray::array;

    fn record(code: &str, organisation: &str, items: i64) -> PrescribingRecord {
        PrescribingRecord {
            code: code.to_string(),
            organisation: organisation.to_string(),
            date: "2021-01-01".to_string(),
            items,
            quantity: items as f64,
            actual_cost: items as f64 / 2.0,
            net_cost: items as f64 / 4.0,
        }
    }

    fn totals(dir: &std::path::Path, records: &Vec<PrescribingRecord>) -> BuildFile<TotalsCalculated> {
        let statistics: Vec<StatisticsRecord> = vec![];
        let remap: Vec<RemapRecord> = vec![];
        let options = BuildOptions::new("2021-01".parse().unwrap(), 1);
        BuildFile::create(dir, &options, records)
            .unwrap()
            .import_statistics(&statistics)
            .unwrap()
            .import_prescribing(records, None)
            .unwrap()
            .remap(&remap)
            .unwrap()
            .calculate_totals()
            .unwrap()
    }

    fn total(file: &BuildFile<TotalsCalculated>, field: Field) -> Option<Vec<u8>> {
        file.connection
            .query_row(
                &format!(
                    "SELECT {} FROM all_presentations WHERE id = ?1",
                    field.column()
                ),
                params![ALL_PRESENTATIONS_ID],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_calculate_totals() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("A", "P1", 2), record("A", "P2", 4), record("B", "P1", 3)];
        let file = totals(dir.path(), &records);
        let items = codec::deserialize(&total(&file, Field::Items).unwrap()).unwrap();
        assert_eq!(array![[5], [4]], items.to_i64_array());
        let net_cost = codec::deserialize(&total(&file, Field::NetCost).unwrap()).unwrap();
        assert_eq!(array![[1.25], [1.0]], net_cost.to_f64_array());
    }

    #[test]
    fn test_calculate_totals_no_presentations() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<PrescribingRecord> = vec![];
        let file = totals(dir.path(), &records);
        for field in Field::ALL {
            assert_eq!(None, total(&file, field));
        }
    }
}
