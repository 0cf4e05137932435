//! This crate provides an embedded, read-optimised store of prescribing data.
//!
//! Each presentation (a specific drug product) has four matrices: items, quantity, actual cost
//! and net cost. Every matrix has one row per prescribing organisation and one column per month,
//! and is stored as a compressed blob in a single SQLite file. Store files are produced offline
//! by a [build pipeline](pipeline), never modified afterwards, and swapped in for readers via a
//! [live pointer](live).
//!
//! The crate is built on top of a number of open source components.
//!
//! * [rusqlite] embeds SQLite and lets the store register its `MATRIX_SUM` aggregate.
//! * [ndarray] provides the dense arrays behind matrix arithmetic and row grouping.
//! * [flate2] and [zune_inflate] compress and decompress matrix blobs.
//! * [Serde](serde) reads the JSON lines extracts a build is made from.
//! * [AWS SDK for S3](aws_sdk_s3) fetches extracts from S3-compatible object stores.
//! * [cached] backs the disk cache used to memoise expensive queries.

pub mod aggregate;
pub mod axis;
pub mod cli;
pub mod codec;
pub mod compression;
pub mod error;
pub mod extract;
pub mod filters;
pub mod live;
pub mod matrix;
pub mod matrix_ops;
pub mod memoize;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod registry;
pub mod row_grouper;
pub mod s3_client;
pub mod schema;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
