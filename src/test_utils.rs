use crate::aggregate;
use crate::codec;
use crate::matrix::AnyMatrix;
use crate::matrix_ops::{finalize, DENSITY_THRESHOLD};
use crate::schema;

use ndarray::{array, Array2};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub(crate) const ALPHA: &str = "0101010A0AAAAAA";
pub(crate) const BETA: &str = "0101010B0BBBBBB";
pub(crate) const GAMMA: &str = "0202020C0CCCCCC";

pub(crate) fn alpha_items() -> Array2<i64> {
    array![[1, 0, 0], [0, 2, 0], [0, 0, 3]]
}

pub(crate) fn beta_items() -> Array2<i64> {
    array![[0, 0, 4], [0, 0, 0], [5, 0, 0]]
}

pub(crate) fn gamma_items() -> Array2<i64> {
    Array2::from_elem((3, 3), 7)
}

fn blob(matrix: AnyMatrix) -> Vec<u8> {
    codec::serialize_compressed(&finalize(matrix, DENSITY_THRESHOLD)).unwrap()
}

fn insert_presentation(
    connection: &Connection,
    code: &str,
    name: &str,
    is_generic: bool,
    adq_per_quantity: Option<f64>,
    items: Array2<i64>,
) {
    let quantity = items.mapv(|v| v as f64 * 10.0);
    let actual_cost = items.mapv(|v| v as f64 * 1.25);
    let net_cost = items.mapv(|v| v as f64 * 1.5);
    connection
        .execute(
            "INSERT INTO presentation
             (code, name, is_generic, adq_per_quantity, items, quantity, actual_cost, net_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                code,
                name,
                is_generic,
                adq_per_quantity,
                blob(items.into()),
                blob(quantity.into()),
                blob(actual_cost.into()),
                blob(net_cost.into()),
            ],
        )
        .unwrap();
}

/// Fill an empty database with three organisations, three months and three presentations.
pub(crate) fn populate(connection: &Connection) {
    schema::create(connection).unwrap();
    aggregate::register(connection).unwrap();
    for (position, code) in ["P1", "P2", "P3"].iter().enumerate() {
        connection
            .execute(
                "INSERT INTO organisation (position, code) VALUES (?1, ?2)",
                params![position as i64, code],
            )
            .unwrap();
    }
    for (position, date) in ["2020-01-01", "2020-02-01", "2020-03-01"].iter().enumerate() {
        connection
            .execute(
                "INSERT INTO date (position, date) VALUES (?1, ?2)",
                params![position as i64, date],
            )
            .unwrap();
    }
    insert_presentation(connection, ALPHA, "Alpha 10mg tablets", true, Some(0.5), alpha_items());
    insert_presentation(connection, BETA, "Beta 5mg capsules", false, None, beta_items());
    insert_presentation(connection, GAMMA, "Gamma cream", true, None, gamma_items());
    let list_size: AnyMatrix = array![[100_i64, 100, 100], [200, 200, 200], [300, 300, 300]].into();
    connection
        .execute(
            "INSERT INTO organisation_statistic (name, value) VALUES ('list_size', ?1)",
            params![blob(list_size)],
        )
        .unwrap();
    connection
        .execute_batch(
            "INSERT INTO all_presentations (id, items, quantity, actual_cost, net_cost)
             SELECT 1, MATRIX_SUM(items), MATRIX_SUM(quantity), MATRIX_SUM(actual_cost),
                    MATRIX_SUM(net_cost)
             FROM presentation",
        )
        .unwrap();
}

/// In-memory database holding the sample store.
pub(crate) fn sample_connection() -> Connection {
    let connection = Connection::open_in_memory().unwrap();
    populate(&connection);
    connection
}

/// Write the sample store to a file.
pub(crate) fn write_sample_file(path: &Path) {
    let connection = Connection::open(path).unwrap();
    populate(&connection);
}

/// Write records as JSON Lines.
pub(crate) fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) {
    let mut file = std::fs::File::create(path).unwrap();
    for record in records {
        serde_json::to_writer(&mut file, record).unwrap();
        file.write_all(b"\n").unwrap();
    }
}
