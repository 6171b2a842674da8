//! Column data types and the ordering of raw field values under each type.
//!
//! Fact-table rows carry every field as a string. Range tracking and key
//! sorting must still compare `"9"` and `"10"` as numbers and
//! `"2024-3-1"` and `"2024-02-28"` as dates, so every comparison goes through
//! [`DataType::compare`] instead of a byte comparison.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Semantic type of a flat-table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Varchar,
    Char,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Date,
    Timestamp,
    Boolean,
}

impl DataType {
    #[must_use]
    pub const fn is_integer_family(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Integer | Self::BigInt
        )
    }

    #[must_use]
    pub const fn is_number_family(self) -> bool {
        self.is_integer_family() || matches!(self, Self::Float | Self::Double | Self::Decimal)
    }

    #[must_use]
    pub const fn is_date_time_family(self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }

    #[must_use]
    pub const fn is_string_family(self) -> bool {
        matches!(self, Self::Varchar | Self::Char)
    }

    /// Compare two raw values under this type's native ordering.
    ///
    /// Values that do not parse as the column's type sort after every value
    /// that does, and among themselves by byte order. This keeps the ordering
    /// total so that min/max stay associative on dirty data.
    #[must_use]
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        self.order_key(a).cmp(&self.order_key(b))
    }

    /// Whether `raw` is a well-formed value of this type. Every string is a
    /// valid varchar.
    #[must_use]
    pub fn accepts(self, raw: &str) -> bool {
        self.is_string_family() || !matches!(self.order_key(raw), OrderKey::Text(_))
    }

    fn order_key(self, raw: &str) -> OrderKey<'_> {
        let trimmed = raw.trim();
        let parsed = if self.is_integer_family() {
            trimmed.parse::<i64>().ok().map(OrderKey::Int)
        } else if self.is_number_family() {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .map(|v| OrderKey::Num(OrderedFloat(v)))
        } else if self.is_date_time_family() {
            parse_date_time(trimmed).map(OrderKey::DateTime)
        } else if self == Self::Boolean {
            parse_bool(trimmed).map(OrderKey::Bool)
        } else {
            None
        };
        parsed.unwrap_or(OrderKey::Text(raw))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Varchar => "varchar",
            Self::Char => "char",
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Parsed form of a raw value. Variant order puts parsed values before `Text`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum OrderKey<'a> {
    Int(i64),
    Num(OrderedFloat<f64>),
    DateTime([u32; 7]),
    Bool(bool),
    Text(&'a str),
}

/// Parse `YYYY-MM-DD[( |T)HH:MM:SS[.fff]]` into comparable components.
///
/// Month/day/time parts may omit leading zeros.
fn parse_date_time(s: &str) -> Option<[u32; 7]> {
    let (date, time) = match s.find([' ', 'T']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let mut out = [0u32; 7];
    let mut parts = date.split('-');
    for slot in out.iter_mut().take(3) {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() || !(1..=12).contains(&out[1]) || !(1..=31).contains(&out[2]) {
        return None;
    }
    if let Some(time) = time {
        let (hms, frac) = match time.split_once('.') {
            Some((hms, frac)) => (hms, Some(frac)),
            None => (time, None),
        };
        let mut parts = hms.split(':');
        for slot in out.iter_mut().skip(3).take(3) {
            *slot = match parts.next() {
                Some(p) => p.parse().ok()?,
                None => 0,
            };
        }
        if parts.next().is_some() {
            return None;
        }
        if let Some(frac) = frac {
            // normalize to milliseconds so ".5" and ".500" agree
            let digits: String = frac.chars().chain("000".chars()).take(3).collect();
            out[6] = digits.parse().ok()?;
        }
    }
    Some(out)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
