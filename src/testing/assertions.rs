//! Assertion functions for job outputs.

use crate::output::{OutputChannel, OutputRecord};
use crate::runner::JobOutput;
use std::fmt::Debug;

/// Assert that two collections contain the same elements, ignoring order.
///
/// # Panics
///
/// Panics if the sorted collections differ.
pub fn assert_collections_unordered_equal<T: Debug + Ord + Clone>(actual: &[T], expected: &[T]) {
    let mut a = actual.to_vec();
    let mut e = expected.to_vec();
    a.sort();
    e.sort();
    assert_eq!(
        a, e,
        "Collections differ (order ignored):\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Raw values written to the column-values channel under `file_name`.
#[must_use]
pub fn column_values(output: &JobOutput, file_name: &str) -> Vec<String> {
    output
        .channel(OutputChannel::ColumnValues)
        .filter(|r| r.file_name == file_name)
        .map(|r| String::from_utf8_lossy(&r.value).into_owned())
        .collect()
}

/// `(min, max)` written to the dimension-range channel under `file_name`.
///
/// # Panics
///
/// Panics unless exactly two records exist for the file.
#[must_use]
pub fn dimension_range(output: &JobOutput, file_name: &str) -> (String, String) {
    let bounds: Vec<&OutputRecord> = output
        .channel(OutputChannel::DimensionRange)
        .filter(|r| r.file_name == file_name)
        .collect();
    assert_eq!(
        bounds.len(),
        2,
        "expected a min and a max record for {file_name}, got {bounds:?}"
    );
    (
        String::from_utf8_lossy(&bounds[0].value).into_owned(),
        String::from_utf8_lossy(&bounds[1].value).into_owned(),
    )
}
