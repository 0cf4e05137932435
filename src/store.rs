//! Read-only access to a published store file.
//!
//! A [MatrixStore] holds a small pool of read-only SQLite connections to one immutable file,
//! each with the `MATRIX_SUM` aggregate registered, together with the organisation and calendar
//! axes loaded once at open time. Queries select presentation rows by a [PresentationFilter]
//! and either return the rows, with their matrix blobs decoded on demand, or let SQLite sum the
//! matching matrices.

use crate::aggregate;
use crate::axis::Axis;
use crate::codec;
use crate::error::MatrixStoreError;
use crate::live;
use crate::matrix::{AnyMatrix, Matrix, SparseMatrix};
use crate::models::{format_date, parse_date, Field};
use crate::naming::{self, BuildName};
use crate::row_grouper::RowGrouper;
use crate::schema::{self, ALL_PRESENTATIONS_ID};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::Date;
use tracing::{event, instrument, Level};

/// Selects presentation rows.
#[derive(Clone, Debug, PartialEq)]
pub enum PresentationFilter {
    /// Every row
    All,
    /// The row with exactly this code
    Code(String),
    /// Rows whose code starts with this prefix, e.g. a BNF chapter or chemical
    CodePrefix(String),
    /// Rows with any of these codes
    Codes(Vec<String>),
    /// Rows whose generic flag has this value
    Generic(bool),
    /// Rows matching every one of these filters
    And(Vec<PresentationFilter>),
}

impl PresentationFilter {
    /// SQL condition for this filter, pushing its parameters in placeholder order.
    fn where_clause(&self, params: &mut Vec<Value>) -> String {
        match self {
            Self::All => "1".to_string(),
            Self::Code(code) => {
                params.push(Value::Text(code.clone()));
                "code = ?".to_string()
            }
            Self::CodePrefix(prefix) => {
                params.push(Value::Text(prefix.clone()));
                // The length is a number we computed, not caller input.
                format!("substr(code, 1, {}) = ?", prefix.chars().count())
            }
            Self::Codes(codes) if codes.is_empty() => "0".to_string(),
            Self::Codes(codes) => {
                params.extend(codes.iter().cloned().map(Value::Text));
                format!("code IN ({})", vec!["?"; codes.len()].join(", "))
            }
            Self::Generic(is_generic) => {
                params.push(Value::Integer(*is_generic as i64));
                "is_generic = ?".to_string()
            }
            Self::And(filters) if filters.is_empty() => "1".to_string(),
            Self::And(filters) => filters
                .iter()
                .map(|filter| format!("({})", filter.where_clause(params)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

impl fmt::Display for PresentationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all presentations"),
            Self::Code(code) => write!(f, "code = {}", code),
            Self::CodePrefix(prefix) => write!(f, "code prefix {}", prefix),
            Self::Codes(codes) => write!(f, "codes [{}]", codes.join(", ")),
            Self::Generic(is_generic) => write!(f, "is_generic = {}", is_generic),
            Self::And(filters) => {
                let parts: Vec<String> = filters.iter().map(|filter| filter.to_string()).collect();
                write!(f, "{}", parts.join(" and "))
            }
        }
    }
}

/// A presentation row returned by a query.
///
/// Only the requested fields are fetched. Their blobs are kept encoded until [Self::matrix] is
/// called.
#[derive(Clone, Debug, PartialEq)]
pub struct Presentation {
    pub code: String,
    pub name: String,
    pub is_generic: bool,
    pub adq_per_quantity: Option<f64>,
    shape: (usize, usize),
    blobs: Vec<(Field, Option<Vec<u8>>)>,
}

impl Presentation {
    /// The encoded blob of a requested field, if the row has one.
    pub fn blob(&self, field: Field) -> Option<&[u8]> {
        self.blobs
            .iter()
            .find(|(f, _)| *f == field)
            .and_then(|(_, blob)| blob.as_deref())
    }

    /// Decode the matrix of a requested field.
    pub fn matrix(&self, field: Field) -> Result<AnyMatrix, MatrixStoreError> {
        match self.blobs.iter().find(|(f, _)| *f == field) {
            None => Err(MatrixStoreError::InvalidArgument {
                message: format!("field {} was not requested", field),
            }),
            Some((_, None)) => Ok(zero_matrix(self.shape, field)),
            Some((_, Some(blob))) => codec::deserialize(blob),
        }
    }
}

/// An all-zero matrix of the given shape, typed as a finalised matrix of `field` would be.
fn zero_matrix((rows, cols): (usize, usize), field: Field) -> AnyMatrix {
    if field.is_integer() {
        Matrix::Sparse(SparseMatrix::<u8>::zeros(rows, cols)).into()
    } else {
        Matrix::Sparse(SparseMatrix::<f64>::zeros(rows, cols)).into()
    }
}

fn decode_or_zero(
    blob: Option<Vec<u8>>,
    shape: (usize, usize),
    field: Field,
) -> Result<AnyMatrix, MatrixStoreError> {
    match blob {
        Some(blob) => codec::deserialize(&blob),
        None => Ok(zero_matrix(shape, field)),
    }
}

fn select_sql(filter: &PresentationFilter, fields: &[Field], params: &mut Vec<Value>) -> String {
    let mut columns = vec!["code", "name", "is_generic", "adq_per_quantity"];
    columns.extend(fields.iter().map(|field| field.column()));
    format!(
        "SELECT {} FROM presentation WHERE {} ORDER BY code",
        columns.join(", "),
        filter.where_clause(params)
    )
}

fn read_presentation(
    row: &Row,
    fields: &[Field],
    shape: (usize, usize),
) -> rusqlite::Result<Presentation> {
    let blobs = fields
        .iter()
        .enumerate()
        .map(|(index, field)| Ok((*field, row.get::<_, Option<Vec<u8>>>(4 + index)?)))
        .collect::<rusqlite::Result<_>>()?;
    Ok(Presentation {
        code: row.get(0)?,
        name: row.get(1)?,
        is_generic: row.get(2)?,
        adq_per_quantity: row.get(3)?,
        shape,
        blobs,
    })
}

fn to_usize(position: i64) -> Result<usize, MatrixStoreError> {
    Ok(usize::try_from(position)?)
}

fn load_organisations(connection: &Connection) -> Result<Axis<String>, MatrixStoreError> {
    let mut statement = connection.prepare("SELECT code, position FROM organisation")?;
    let pairs = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .map(|pair| {
            let (code, position) = pair?;
            Ok((code, to_usize(position)?))
        })
        .collect::<Result<Vec<_>, MatrixStoreError>>()?;
    Axis::from_offsets(pairs).ok_or_else(|| MatrixStoreError::CorruptStore {
        reason: "organisation positions are not contiguous".to_string(),
    })
}

fn load_dates(connection: &Connection) -> Result<Axis<Date>, MatrixStoreError> {
    let mut statement = connection.prepare("SELECT date, position FROM date")?;
    let pairs = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .map(|pair| {
            let (date, position) = pair?;
            Ok((parse_date(&date)?, to_usize(position)?))
        })
        .collect::<Result<Vec<_>, MatrixStoreError>>()?;
    Axis::from_offsets(pairs).ok_or_else(|| MatrixStoreError::CorruptStore {
        reason: "date positions are not contiguous".to_string(),
    })
}

/// Read-only handle on one store file.
#[derive(Debug)]
pub struct MatrixStore {
    path: Option<PathBuf>,
    connections: Vec<Mutex<Connection>>,
    cursor: AtomicUsize,
    organisations: Axis<String>,
    dates: Axis<Date>,
    cache_key: String,
}

impl MatrixStore {
    /// Open a store file.
    ///
    /// # Arguments
    ///
    /// * `path`: Store file, or a live pointer to one
    /// * `read_pool_size`: Number of read connections. At least one is always opened.
    #[instrument(level = "debug")]
    pub fn open(path: &Path, read_pool_size: usize) -> Result<Self, MatrixStoreError> {
        // Resolve a live pointer once so every connection reads the same file.
        let resolved = path.canonicalize()?;
        let mut connections = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let connection = schema::open_read_only(&resolved)?;
            aggregate::register(&connection)?;
            connections.push(Mutex::new(connection));
        }
        let cache_key = match resolved
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(BuildName::parse)
        {
            Some(name) => name.hash,
            None => naming::hash_file(&resolved)?,
        };
        let store = Self::from_connections(Some(resolved), connections, cache_key)?;
        event!(
            Level::INFO,
            "Opened store {} with {} organisations and {} months",
            path.display(),
            store.organisations.len(),
            store.dates.len()
        );
        Ok(store)
    }

    /// Open the store the live pointer in `build_dir` refers to.
    ///
    /// The pointer is resolved once. Later swaps do not affect the returned store.
    pub fn open_live(build_dir: &Path) -> Result<Self, MatrixStoreError> {
        let pointer = live::pointer_path(build_dir);
        if std::fs::symlink_metadata(&pointer).is_err() {
            return Err(MatrixStoreError::NoLiveStore);
        }
        Self::open(&pointer, num_cpus::get())
    }

    /// Wrap an already open connection, e.g. to an in-memory database.
    ///
    /// The cache key is random, so memoised results are never shared with another store.
    pub fn from_connection(connection: Connection) -> Result<Self, MatrixStoreError> {
        schema::check_version(&connection)?;
        aggregate::register(&connection)?;
        let cache_key = uuid::Uuid::new_v4().simple().to_string();
        Self::from_connections(None, vec![Mutex::new(connection)], cache_key)
    }

    fn from_connections(
        path: Option<PathBuf>,
        connections: Vec<Mutex<Connection>>,
        cache_key: String,
    ) -> Result<Self, MatrixStoreError> {
        let (organisations, dates) = {
            let connection = connections[0].lock().unwrap_or_else(PoisonError::into_inner);
            (load_organisations(&connection)?, load_dates(&connection)?)
        };
        Ok(Self {
            path,
            connections,
            cursor: AtomicUsize::new(0),
            organisations,
            dates,
            cache_key,
        })
    }

    /// Returns the next read connection using round-robin selection.
    fn connection(&self) -> MutexGuard<'_, Connection> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        // Connections hold no state a panicking reader could have left inconsistent.
        self.connections[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolved path of the store file, if it is not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stable identifier of the file content, used in cache keys.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Logical shape (organisations × months) of every matrix in the store.
    pub fn shape(&self) -> (usize, usize) {
        (self.organisations.len(), self.dates.len())
    }

    pub fn organisations(&self) -> &[String] {
        self.organisations.labels()
    }

    pub fn dates(&self) -> &[Date] {
        self.dates.labels()
    }

    /// Latest month held by the store.
    pub fn latest_date(&self) -> Option<Date> {
        self.dates.last().copied()
    }

    /// Row offset of an organisation.
    pub fn organisation_offset(&self, code: &str) -> Result<usize, MatrixStoreError> {
        self.organisations
            .offset(code)
            .ok_or_else(|| MatrixStoreError::UnknownOrganisation {
                code: code.to_string(),
            })
    }

    /// Column offset of a month.
    pub fn date_offset(&self, date: Date) -> Result<usize, MatrixStoreError> {
        self.dates
            .offset(&date)
            .ok_or_else(|| MatrixStoreError::UnknownDate {
                date: format_date(date),
            })
    }

    /// Fetch the matching rows, ordered by code.
    ///
    /// All rows are read in a single transaction. The returned vector may be iterated any number
    /// of times; matrices are decoded only when asked for.
    #[instrument(level = "debug", skip(self))]
    pub fn query(
        &self,
        filter: &PresentationFilter,
        fields: &[Field],
    ) -> Result<Vec<Presentation>, MatrixStoreError> {
        let mut presentations = vec![];
        self.query_each(filter, fields, |presentation| {
            presentations.push(presentation);
            Ok(())
        })?;
        event!(Level::DEBUG, "{} rows match {}", presentations.len(), filter);
        Ok(presentations)
    }

    /// Call `f` for each matching row, ordered by code, without collecting them.
    ///
    /// `f` runs while a pooled connection is held, so it must not query this store when the
    /// pool has a single connection.
    pub fn query_each<F>(
        &self,
        filter: &PresentationFilter,
        fields: &[Field],
        mut f: F,
    ) -> Result<(), MatrixStoreError>
    where
        F: FnMut(Presentation) -> Result<(), MatrixStoreError>,
    {
        let mut params = vec![];
        let sql = select_sql(filter, fields, &mut params);
        let shape = self.shape();
        let mut connection = self.connection();
        let transaction = connection.transaction()?;
        {
            let mut statement = transaction.prepare(&sql)?;
            let mut rows = statement.query(params_from_iter(params.iter()))?;
            while let Some(row) = rows.next()? {
                f(read_presentation(row, fields, shape)?)?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    /// Fetch exactly one matching row.
    pub fn query_one(
        &self,
        filter: &PresentationFilter,
        fields: &[Field],
    ) -> Result<Presentation, MatrixStoreError> {
        let mut presentations = self.query(filter, fields)?;
        match presentations.len() {
            0 => Err(MatrixStoreError::NotFound {
                query: filter.to_string(),
            }),
            1 => Ok(presentations.remove(0)),
            count => Err(MatrixStoreError::AmbiguousResult {
                query: filter.to_string(),
                count,
            }),
        }
    }

    /// Element-wise sum of one field over the matching rows.
    ///
    /// When nothing matches the result is an all-zero matrix of the full shape.
    #[instrument(level = "debug", skip(self))]
    pub fn sum_matching(
        &self,
        filter: &PresentationFilter,
        field: Field,
    ) -> Result<AnyMatrix, MatrixStoreError> {
        let mut params = vec![];
        let sql = format!(
            "SELECT {}({}) FROM presentation WHERE {}",
            aggregate::MATRIX_SUM,
            field.column(),
            filter.where_clause(&mut params)
        );
        let blob: Option<Vec<u8>> =
            self.connection()
                .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        decode_or_zero(blob, self.shape(), field)
    }

    /// The precomputed sum of one field over every row.
    pub fn total(&self, field: Field) -> Result<AnyMatrix, MatrixStoreError> {
        let sql = format!(
            "SELECT {} FROM all_presentations WHERE id = ?1",
            field.column()
        );
        let blob: Option<Vec<u8>> = self
            .connection()
            .query_row(&sql, params![ALL_PRESENTATIONS_ID], |row| row.get(0))
            .optional()?
            .flatten();
        decode_or_zero(blob, self.shape(), field)
    }

    /// Names of the stored organisation statistics.
    pub fn organisation_statistic_names(&self) -> Result<Vec<String>, MatrixStoreError> {
        let connection = self.connection();
        let mut statement =
            connection.prepare("SELECT name FROM organisation_statistic ORDER BY name")?;
        let names = statement
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// One organisation statistic matrix.
    pub fn organisation_statistic(&self, name: &str) -> Result<AnyMatrix, MatrixStoreError> {
        let blob: Option<Vec<u8>> = self
            .connection()
            .query_row(
                "SELECT value FROM organisation_statistic WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => codec::deserialize(&blob),
            None => Err(MatrixStoreError::NotFound {
                query: format!("organisation statistic {}", name),
            }),
        }
    }

    /// Build a [RowGrouper] from `(organisation code, group id)` pairs.
    ///
    /// Organisations not on this store's axis are skipped.
    pub fn organisation_grouper<I, C, G>(&self, assignments: I) -> RowGrouper
    where
        I: IntoIterator<Item = (C, G)>,
        C: AsRef<str>,
        G: Into<String>,
    {
        RowGrouper::new(assignments.into_iter().filter_map(|(code, group)| {
            match self.organisations.offset(code.as_ref()) {
                Some(offset) => Some((offset, group)),
                None => {
                    event!(
                        Level::DEBUG,
                        "Skipping unknown organisation {} in grouping",
                        code.as_ref()
                    );
                    None
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::DType;
    use crate::test_utils;
    use ndarray::array;
    use time::macros::date;

    fn store() -> MatrixStore {
        MatrixStore::from_connection(test_utils::sample_connection()).unwrap()
    }

    fn codes(presentations: &[Presentation]) -> Vec<&str> {
        presentations.iter().map(|p| p.code.as_str()).collect()
    }

    #[test]
    fn test_axes() {
        let store = store();
        assert_eq!((3, 3), store.shape());
        assert_eq!(&["P1", "P2", "P3"], store.organisations());
        assert_eq!(Some(date!(2020 - 03 - 01)), store.latest_date());
        assert_eq!(1, store.organisation_offset("P2").unwrap());
        assert_eq!(2, store.date_offset(date!(2020 - 03 - 01)).unwrap());
        assert_eq!(32, store.cache_key().len());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_unknown_axis_labels() {
        let store = store();
        match store.organisation_offset("P9").unwrap_err() {
            MatrixStoreError::UnknownOrganisation { code } => assert_eq!("P9", code),
            err => panic!("unexpected error {}", err),
        }
        match store.date_offset(date!(2019 - 12 - 01)).unwrap_err() {
            MatrixStoreError::UnknownDate { date } => assert_eq!("2019-12-01", date),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_query_all() {
        let presentations = store().query(&PresentationFilter::All, &[Field::Items]).unwrap();
        assert_eq!(
            vec![test_utils::ALPHA, test_utils::BETA, test_utils::GAMMA],
            codes(&presentations)
        );
        let alpha = &presentations[0];
        assert_eq!("Alpha 10mg tablets", alpha.name);
        assert!(alpha.is_generic);
        assert_eq!(Some(0.5), alpha.adq_per_quantity);
        let items = alpha.matrix(Field::Items).unwrap();
        assert_eq!(test_utils::alpha_items(), items.to_i64_array());
        assert_eq!(DType::Uint8, items.dtype());
    }

    #[test]
    fn test_query_unrequested_field() {
        let alpha = store()
            .query_one(
                &PresentationFilter::Code(test_utils::ALPHA.to_string()),
                &[Field::Items],
            )
            .unwrap();
        assert!(alpha.blob(Field::Items).is_some());
        assert!(alpha.blob(Field::NetCost).is_none());
        match alpha.matrix(Field::NetCost).unwrap_err() {
            MatrixStoreError::InvalidArgument { message: _ } => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_query_filters() {
        let store = store();
        let prefix = store
            .query(&PresentationFilter::CodePrefix("0101".to_string()), &[])
            .unwrap();
        assert_eq!(vec![test_utils::ALPHA, test_utils::BETA], codes(&prefix));

        let listed = store
            .query(
                &PresentationFilter::Codes(vec![
                    test_utils::GAMMA.to_string(),
                    test_utils::ALPHA.to_string(),
                    "9999".to_string(),
                ]),
                &[],
            )
            .unwrap();
        assert_eq!(vec![test_utils::ALPHA, test_utils::GAMMA], codes(&listed));

        let generic_in_chapter = store
            .query(
                &PresentationFilter::And(vec![
                    PresentationFilter::CodePrefix("01".to_string()),
                    PresentationFilter::Generic(true),
                ]),
                &[],
            )
            .unwrap();
        assert_eq!(vec![test_utils::ALPHA], codes(&generic_in_chapter));

        assert!(store
            .query(&PresentationFilter::Codes(vec![]), &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_query_prefix_is_literal() {
        // LIKE wildcards in a prefix match nothing.
        let store = store();
        assert!(store
            .query(&PresentationFilter::CodePrefix("01%".to_string()), &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_query_each_streams_in_order() {
        let mut seen = vec![];
        store()
            .query_each(&PresentationFilter::All, &[Field::Quantity], |p| {
                seen.push(p.code);
                Ok(())
            })
            .unwrap();
        assert_eq!(vec![test_utils::ALPHA, test_utils::BETA, test_utils::GAMMA], seen);
    }

    #[test]
    fn test_query_one_errors() {
        let store = store();
        match store
            .query_one(&PresentationFilter::Code("missing".to_string()), &[])
            .unwrap_err()
        {
            MatrixStoreError::NotFound { query } => assert_eq!("code = missing", query),
            err => panic!("unexpected error {}", err),
        }
        match store
            .query_one(&PresentationFilter::CodePrefix("0101".to_string()), &[])
            .unwrap_err()
        {
            MatrixStoreError::AmbiguousResult { query, count } => {
                assert_eq!("code prefix 0101", query);
                assert_eq!(2, count);
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_sum_matching() {
        let store = store();
        let filter = PresentationFilter::CodePrefix("0101".to_string());
        let summed = store.sum_matching(&filter, Field::Items).unwrap();
        assert_eq!(
            test_utils::alpha_items() + test_utils::beta_items(),
            summed.to_i64_array()
        );
        let manual: ndarray::Array2<f64> = store
            .query(&filter, &[Field::ActualCost])
            .unwrap()
            .iter()
            .map(|p| p.matrix(Field::ActualCost).unwrap().to_f64_array())
            .fold(ndarray::Array2::zeros((3, 3)), |acc, m| acc + m);
        let summed = store.sum_matching(&filter, Field::ActualCost).unwrap();
        assert_eq!(manual, summed.to_f64_array());
    }

    #[test]
    fn test_sum_matching_nothing_is_zero() {
        let store = store();
        let summed = store
            .sum_matching(&PresentationFilter::Code("missing".to_string()), Field::NetCost)
            .unwrap();
        assert_eq!((3, 3), summed.shape());
        assert_eq!(0, summed.nnz());
        assert_eq!(DType::Float64, summed.dtype());
    }

    #[test]
    fn test_total() {
        let store = store();
        let total = store.total(Field::Items).unwrap();
        assert_eq!(
            test_utils::alpha_items() + test_utils::beta_items() + test_utils::gamma_items(),
            total.to_i64_array()
        );
        let summed = store
            .sum_matching(&PresentationFilter::All, Field::Items)
            .unwrap();
        assert_eq!(summed.to_i64_array(), total.to_i64_array());
    }

    #[test]
    fn test_organisation_statistic() {
        let store = store();
        assert_eq!(
            vec!["list_size".to_string()],
            store.organisation_statistic_names().unwrap()
        );
        let list_size = store.organisation_statistic("list_size").unwrap();
        assert_eq!(
            array![[100, 100, 100], [200, 200, 200], [300, 300, 300]],
            list_size.to_i64_array()
        );
        match store.organisation_statistic("nope").unwrap_err() {
            MatrixStoreError::NotFound { query } => {
                assert_eq!("organisation statistic nope", query)
            }
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_organisation_grouper() {
        let store = store();
        let grouper =
            store.organisation_grouper([("P1", "north"), ("P3", "north"), ("P2", "south"), ("P9", "x")]);
        assert_eq!(&["north", "south"], grouper.ids());
        let items = store.total(Field::Items).unwrap();
        let summed = grouper.sum_one_group(&items, "north").unwrap().to_f64();
        let expected = store
            .total(Field::Items)
            .unwrap()
            .to_f64_array()
            .select(ndarray::Axis(0), &[0, 2])
            .sum_axis(ndarray::Axis(0));
        assert_eq!(expected, summed);
    }

    #[test]
    fn test_filter_display() {
        let filter = PresentationFilter::And(vec![
            PresentationFilter::Generic(false),
            PresentationFilter::Codes(vec!["A".to_string(), "B".to_string()]),
        ]);
        assert_eq!("is_generic = false and codes [A, B]", filter.to_string());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.sqlite");
        test_utils::write_sample_file(&path);
        let store = MatrixStore::open(&path, 2).unwrap();
        assert_eq!((3, 3), store.shape());
        assert_eq!(naming::hash_file(&path).unwrap(), store.cache_key());
        // Round-robin over both connections.
        for _ in 0..4 {
            store.total(Field::Quantity).unwrap();
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_open_through_pointer_resolves_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("first.sqlite");
        test_utils::write_sample_file(&target);
        let pointer = dir.path().join("pointer.sqlite");
        std::os::unix::fs::symlink("first.sqlite", &pointer).unwrap();

        let store = MatrixStore::open(&pointer, 3).unwrap();
        let resolved = target.canonicalize().unwrap();
        assert_eq!(Some(resolved.as_path()), store.path());
        assert_eq!(naming::hash_file(&target).unwrap(), store.cache_key());

        // Removing the pointer after open does not affect connections already in the pool.
        std::fs::remove_file(&pointer).unwrap();
        for _ in 0..6 {
            assert_eq!((3, 3), store.shape());
            store.total(Field::Quantity).unwrap();
        }
    }

    #[test]
    fn test_open_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.sqlite");
        let connection = Connection::open(&path).unwrap();
        connection.pragma_update(None, "user_version", 99).unwrap();
        drop(connection);
        match MatrixStore::open(&path, 1).unwrap_err() {
            MatrixStoreError::SchemaMismatch { expected: _, found } => assert_eq!(99, found),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn test_open_live_without_pointer() {
        let dir = tempfile::tempdir().unwrap();
        match MatrixStore::open_live(dir.path()).unwrap_err() {
            MatrixStoreError::NoLiveStore => (),
            err => panic!("unexpected error {}", err),
        }
    }
}
