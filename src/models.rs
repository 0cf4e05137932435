//! Data types and associated functions and methods

use crate::error::MatrixStoreError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;
use time::macros::format_description;
use time::{Date, Month};

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i8]
    Int8,
    /// [i16]
    Int16,
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u8]
    Uint8,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int8 => std::mem::size_of::<i8>(),
            Self::Int16 => std::mem::size_of::<i16>(),
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint8 => std::mem::size_of::<u8>(),
            Self::Uint16 => std::mem::size_of::<u16>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }

    /// Returns the one byte tag identifying this type in a matrix blob.
    pub fn tag(self) -> u8 {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::Uint8 => 5,
            Self::Uint16 => 6,
            Self::Uint32 => 7,
            Self::Uint64 => 8,
            Self::Float32 => 9,
            Self::Float64 => 10,
        }
    }

    /// Returns the type identified by a blob tag, if any.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let dtype = match tag {
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Uint8,
            6 => Self::Uint16,
            7 => Self::Uint32,
            8 => Self::Uint64,
            9 => Self::Float32,
            10 => Self::Float64,
            _ => return None,
        };
        Some(dtype)
    }

    /// Whether values of this type are integers.
    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Numeric fields stored for each presentation.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    /// Number of prescription items
    Items,
    /// Quantity of the presentation dispensed
    Quantity,
    /// Actual cost
    ActualCost,
    /// Net ingredient cost
    NetCost,
}

impl Field {
    /// All fields, in column order.
    pub const ALL: [Field; 4] = [
        Field::Items,
        Field::Quantity,
        Field::ActualCost,
        Field::NetCost,
    ];

    /// Name of the SQL column holding this field.
    pub fn column(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Quantity => "quantity",
            Self::ActualCost => "actual_cost",
            Self::NetCost => "net_cost",
        }
    }

    /// Whether this field only ever holds whole numbers.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Items)
    }
}

/// A calendar month, written `YYYY-MM`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct YearMonth {
    year: i32,
    month: u8,
}

impl YearMonth {
    /// Return a new YearMonth object, or `None` if `month` is not in `1..=12`.
    pub fn new(year: i32, month: u8) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The month containing `date`.
    pub fn of(date: Date) -> Self {
        Self {
            year: date.year(),
            month: date.month() as u8,
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u8 {
        self.month
    }

    /// The first day of the month.
    pub fn first_day(self) -> Date {
        // Month and day are always in range, so this cannot fail.
        let month = Month::try_from(self.month).unwrap_or(Month::January);
        Date::from_calendar_date(self.year, month, 1).unwrap_or(Date::MIN)
    }

    /// The month `n` months before this one.
    pub fn minus_months(self, n: u32) -> Self {
        let index = self.year as i64 * 12 + (self.month as i64 - 1) - n as i64;
        Self {
            year: index.div_euclid(12) as i32,
            month: (index.rem_euclid(12) + 1) as u8,
        }
    }

    /// The `months` consecutive first-of-month dates ending with this month.
    pub fn window(self, months: u32) -> Vec<Date> {
        (0..months)
            .rev()
            .map(|n| self.minus_months(n).first_day())
            .collect()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = MatrixStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || MatrixStoreError::InvalidMonth {
            value: value.to_string(),
        };
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u8>().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<Date, MatrixStoreError> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).map_err(|source| {
        MatrixStoreError::InvalidDate {
            value: value.to_string(),
            source,
        }
    })
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

/// One line of the prescribing extract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrescribingRecord {
    /// Presentation code
    pub code: String,
    /// Organisation code
    pub organisation: String,
    /// First day of the month, `YYYY-MM-DD`
    pub date: String,
    #[serde(default)]
    pub items: i64,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub actual_cost: f64,
    #[serde(default)]
    pub net_cost: f64,
}

/// One line of the organisation statistics extract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsRecord {
    /// Organisation code
    pub organisation: String,
    /// First day of the month, `YYYY-MM-DD`
    pub date: String,
    /// Named numeric values. A null value is treated as absent.
    pub values: BTreeMap<String, Option<StatisticValue>>,
}

/// One organisation statistic value.
///
/// JSON numbers without a fraction or exponent are integers.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatisticValue {
    Int(i64),
    Float(f64),
}

impl StatisticValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

/// Descriptive attributes of a presentation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PresentationRecord {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_generic: bool,
    #[serde(default)]
    pub adq_per_quantity: Option<f64>,
}

/// One former/current code pair from the remap extract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemapRecord {
    pub former: String,
    pub current: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_test::{assert_de_tokens, assert_tokens, Token};
    use time::macros::date;

    #[test]
    fn test_dtype_size_of() {
        assert_eq!(1, DType::Int8.size_of());
        assert_eq!(2, DType::Uint16.size_of());
        assert_eq!(4, DType::Float32.size_of());
        assert_eq!(8, DType::Uint64.size_of());
    }

    #[test]
    fn test_dtype_tags_round_trip() {
        for dtype in [
            DType::Int8,
            DType::Int16,
            DType::Int32,
            DType::Int64,
            DType::Uint8,
            DType::Uint16,
            DType::Uint32,
            DType::Uint64,
            DType::Float32,
            DType::Float64,
        ] {
            assert_eq!(Some(dtype), DType::from_tag(dtype.tag()));
        }
        assert_eq!(None, DType::from_tag(0));
        assert_eq!(None, DType::from_tag(11));
    }

    #[test]
    fn test_dtype_serde() {
        assert_tokens(
            &DType::Uint16,
            &[Token::UnitVariant {
                name: "DType",
                variant: "uint16",
            }],
        );
    }

    #[test]
    fn test_field_serde_and_display() {
        assert_de_tokens(
            &Field::ActualCost,
            &[Token::UnitVariant {
                name: "Field",
                variant: "actual_cost",
            }],
        );
        assert_eq!("net_cost", Field::NetCost.to_string());
        assert_eq!("actual_cost", Field::ActualCost.column());
    }

    #[test]
    fn test_year_month_parse() {
        let ym: YearMonth = "2018-06".parse().unwrap();
        assert_eq!(2018, ym.year());
        assert_eq!(6, ym.month());
        assert_eq!("2018-06", ym.to_string());
    }

    #[test]
    fn test_year_month_parse_invalid() {
        for value in ["2018", "2018-13", "2018-00", "18-06", "2018-6", "abcd-ef"] {
            match value.parse::<YearMonth>().unwrap_err() {
                MatrixStoreError::InvalidMonth { value: v } => assert_eq!(value, v),
                err => panic!("unexpected error {}", err),
            }
        }
    }

    #[test]
    fn test_year_month_minus_months() {
        let ym = YearMonth::new(2021, 3).unwrap();
        assert_eq!(YearMonth::new(2021, 1).unwrap(), ym.minus_months(2));
        assert_eq!(YearMonth::new(2020, 12).unwrap(), ym.minus_months(3));
        assert_eq!(YearMonth::new(2019, 3).unwrap(), ym.minus_months(24));
    }

    #[test]
    fn test_year_month_window() {
        let ym = YearMonth::new(2021, 1).unwrap();
        assert_eq!(
            vec![date!(2020 - 11 - 01), date!(2020 - 12 - 01), date!(2021 - 01 - 01)],
            ym.window(3)
        );
        assert!(ym.window(0).is_empty());
    }

    #[test]
    fn test_parse_and_format_date() {
        let date = parse_date("2021-02-01").unwrap();
        assert_eq!(date!(2021 - 02 - 01), date);
        assert_eq!("2021-02-01", format_date(date));
        assert!(matches!(
            parse_date("2021-02"),
            Err(MatrixStoreError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_prescribing_record_defaults() {
        let record: PrescribingRecord = serde_json::from_str(
            r#"{"code":"D1","organisation":"P1","date":"2021-01-01","items":5}"#,
        )
        .unwrap();
        assert_eq!(5, record.items);
        assert_eq!(0.0, record.quantity);
    }

    #[test]
    fn test_prescribing_record_unknown_field() {
        let result = serde_json::from_str::<PrescribingRecord>(
            r#"{"code":"D1","organisation":"P1","date":"2021-01-01","foo":1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_statistics_record_values() {
        let record: StatisticsRecord = serde_json::from_str(
            r#"{"organisation":"P1","date":"2021-01-01","values":{"a":3,"b":2.5,"c":null}}"#,
        )
        .unwrap();
        assert_eq!(Some(StatisticValue::Int(3)), record.values["a"]);
        assert_eq!(Some(StatisticValue::Float(2.5)), record.values["b"]);
        assert_eq!(None, record.values["c"]);
        let result = serde_json::from_str::<StatisticsRecord>(
            r#"{"organisation":"P1","date":"2021-01-01","values":{"a":"3"}}"#,
        );
        assert!(result.is_err());
    }
}
