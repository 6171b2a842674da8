//! Testing utilities for fact-distinct jobs.
//!
//! - **Fixtures**: small cube models and row generators with known
//!   cardinalities
//! - **Assertions**: order-independent comparison of output records and
//!   helpers that pull values out of a [`JobOutput`](crate::JobOutput)
//!
//! # Quick Start
//!
//! ```
//! use fact_distinct::testing::*;
//! use fact_distinct::{JobConfig, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let model = id_and_city_model();
//! let rows = id_and_city_rows(100, 10);
//! let out = Runner::sequential(2).run(&model, &JobConfig::default(), &rows)?;
//! assert!(out.counters.source_records == 100);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
