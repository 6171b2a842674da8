//! Local dictionary building in the merge stage.
//!
//! A builder is picked from the column's data type. Types without a builder
//! make the merge stage fall back to emitting raw values, which an external
//! builder picks up later.

use crate::types::DataType;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Sorted distinct values of one column; a value's id is
/// `base_id + index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    pub data_type: DataType,
    pub base_id: u32,
    values: Vec<String>,
}

impl Dictionary {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.values
            .binary_search_by(|v| self.data_type.compare(v, value))
            .ok()
            .map(|i| self.base_id + i as u32)
    }

    #[must_use]
    pub fn value_of(&self, id: u32) -> Option<&str> {
        let index = id.checked_sub(self.base_id)?;
        self.values.get(index as usize).map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).context("failed to serialize dictionary")
    }

    /// # Errors
    ///
    /// Returns an error on a truncated or foreign payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).context("failed to deserialize dictionary")
    }
}

/// Incremental dictionary construction.
pub trait DictionaryBuilder: Send {
    /// Reset the builder; ids will start at `base_id`.
    fn init(&mut self, base_id: u32);

    /// # Errors
    ///
    /// Fails when the value cannot be encoded by this builder.
    fn add_value(&mut self, value: &str) -> Result<()>;

    /// # Errors
    ///
    /// Fails when the id space is exhausted.
    fn build(self: Box<Self>) -> Result<Dictionary>;
}

/// Builder for the data type, or `None` when values must go out raw.
#[must_use]
pub fn builder_for(data_type: DataType) -> Option<Box<dyn DictionaryBuilder>> {
    if data_type.is_string_family() {
        Some(Box::new(StringDictionaryBuilder::new(data_type)))
    } else if data_type.is_number_family() || data_type.is_date_time_family() {
        Some(Box::new(ParsedDictionaryBuilder::new(data_type)))
    } else {
        None
    }
}

#[derive(Debug)]
pub struct StringDictionaryBuilder {
    data_type: DataType,
    base_id: u32,
    values: HashSet<String>,
}

impl StringDictionaryBuilder {
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            base_id: 0,
            values: HashSet::new(),
        }
    }
}

impl DictionaryBuilder for StringDictionaryBuilder {
    fn init(&mut self, base_id: u32) {
        self.base_id = base_id;
        self.values.clear();
    }

    fn add_value(&mut self, value: &str) -> Result<()> {
        if !self.values.contains(value) {
            self.values.insert(value.to_string());
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Dictionary> {
        let mut values: Vec<String> = self.values.into_iter().collect();
        values.sort_unstable();
        finish(self.data_type, self.base_id, values)
    }
}

/// Numbers and dates: values must parse, and spellings of the same value
/// (`"1"` and `"01"`) share one id.
#[derive(Debug)]
pub struct ParsedDictionaryBuilder {
    data_type: DataType,
    base_id: u32,
    values: HashSet<String>,
}

impl ParsedDictionaryBuilder {
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            base_id: 0,
            values: HashSet::new(),
        }
    }
}

impl DictionaryBuilder for ParsedDictionaryBuilder {
    fn init(&mut self, base_id: u32) {
        self.base_id = base_id;
        self.values.clear();
    }

    fn add_value(&mut self, value: &str) -> Result<()> {
        if !self.data_type.accepts(value) {
            bail!("'{value}' is not a valid {} value", self.data_type);
        }
        if !self.values.contains(value) {
            self.values.insert(value.to_string());
        }
        Ok(())
    }

    fn build(self: Box<Self>) -> Result<Dictionary> {
        let dt = self.data_type;
        let mut values: Vec<String> = self.values.into_iter().collect();
        // shortest spelling first among equal values, then keep one
        values.sort_unstable_by(|a, b| {
            dt.compare(a, b)
                .then_with(|| a.len().cmp(&b.len()))
                .then_with(|| a.cmp(b))
        });
        values.dedup_by(|later, kept| dt.compare(later, kept) == Ordering::Equal);
        finish(dt, self.base_id, values)
    }
}

fn finish(data_type: DataType, base_id: u32, values: Vec<String>) -> Result<Dictionary> {
    let last = u32::try_from(values.len())
        .ok()
        .and_then(|n| base_id.checked_add(n));
    if last.is_none() {
        bail!("dictionary with {} values overflows the id space", values.len());
    }
    Ok(Dictionary {
        data_type,
        base_id,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(data_type: DataType, values: &[&str]) -> Result<Dictionary> {
        let mut b = builder_for(data_type).context("no builder")?;
        b.init(0);
        for v in values {
            b.add_value(v)?;
        }
        b.build()
    }

    #[test]
    fn number_dictionary_is_numeric_and_merges_spellings() -> Result<()> {
        let dict = build(DataType::Integer, &["10", "9", "09", "10"])?;
        assert_eq!(dict.values(), ["9", "10"]);
        assert_eq!(dict.id_of("09"), Some(0));
        assert_eq!(dict.value_of(1), Some("10"));
        Ok(())
    }

    #[test]
    fn bad_number_is_rejected() -> Result<()> {
        let mut b = builder_for(DataType::Double).context("no builder")?;
        assert!(b.add_value("abc").is_err());
        Ok(())
    }

    #[test]
    fn boolean_has_no_builder() {
        assert!(builder_for(DataType::Boolean).is_none());
    }

    #[test]
    fn postcard_payload_restores_dictionary() -> Result<()> {
        let dict = build(DataType::Varchar, &["b", "a", "c"])?;
        assert_eq!(Dictionary::from_bytes(&dict.to_bytes()?)?, dict);
        Ok(())
    }
}
