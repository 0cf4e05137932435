//! First stage: schema and axes.

use super::{BuildFile, BuildOptions, Initialised};
use crate::aggregate;
use crate::axis::Axis;
use crate::error::MatrixStoreError;
use crate::extract::{tmp_dir, RecordSource};
use crate::models::{format_date, parse_date, PrescribingRecord};
use crate::schema;

use hashbrown::HashSet;
use rusqlite::{params, Transaction};
use std::marker::PhantomData;
use std::path::Path;
use time::Date;
use tracing::{event, instrument, Level};

fn write_organisations(
    transaction: &Transaction,
    organisations: &Axis<String>,
) -> Result<(), MatrixStoreError> {
    let mut statement =
        transaction.prepare("INSERT INTO organisation (position, code) VALUES (?1, ?2)")?;
    for (position, code) in organisations.labels().iter().enumerate() {
        statement.execute(params![i64::try_from(position)?, code])?;
    }
    Ok(())
}

fn write_dates(transaction: &Transaction, dates: &Axis<Date>) -> Result<(), MatrixStoreError> {
    let mut statement = transaction.prepare("INSERT INTO date (position, date) VALUES (?1, ?2)")?;
    for (position, date) in dates.labels().iter().enumerate() {
        statement.execute(params![i64::try_from(position)?, format_date(*date)])?;
    }
    Ok(())
}

impl BuildFile<Initialised> {
    /// Create a new build file in `<build_dir>/tmp/` holding the schema and both axes.
    ///
    /// The calendar axis is the `options.months` months ending with `options.end_month`. The
    /// organisation axis is every organisation with a prescribing record in that window, which
    /// costs one pass over the prescribing source.
    #[instrument(skip(prescribing))]
    pub fn create(
        build_dir: &Path,
        options: &BuildOptions,
        prescribing: &dyn RecordSource<PrescribingRecord>,
    ) -> Result<Self, MatrixStoreError> {
        if options.months == 0 {
            return Err(MatrixStoreError::InvalidArgument {
                message: "a build needs at least one month".to_string(),
            });
        }
        let dates = Axis::new(options.end_month.window(options.months));

        let mut codes = HashSet::new();
        for record in prescribing.records()? {
            let record = record?;
            if dates.offset(&parse_date(&record.date)?).is_some()
                && !codes.contains(&record.organisation)
            {
                codes.insert(record.organisation);
            }
        }
        let organisations = Axis::new(codes);

        let path = tmp_dir(build_dir)?.join(format!(
            "build_{}.sqlite",
            uuid::Uuid::new_v4().simple()
        ));
        event!(Level::INFO, "Starting build in {}", path.display());
        let mut connection = schema::open_for_build(&path)?;
        schema::create(&connection)?;
        aggregate::register(&connection)?;
        let transaction = connection.transaction()?;
        write_dates(&transaction, &dates)?;
        write_organisations(&transaction, &organisations)?;
        transaction.commit()?;
        event!(
            Level::INFO,
            "Created axes with {} organisations and {} months ending {}",
            organisations.len(),
            dates.len(),
            options.end_month
        );

        Ok(Self {
            build_dir: build_dir.to_path_buf(),
            path,
            connection,
            organisations,
            dates,
            threshold: options.threshold,
            state: PhantomData,
        })
    }
}
