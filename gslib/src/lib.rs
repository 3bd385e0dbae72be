//! GSLIB / GeoEAS plain-text tables.
//!
//! The format is a title line, the number of columns, one column name per
//! line, then whitespace separated rows of numbers:
//!
//! ```text
//! drill hole data
//! 3
//! x
//! y
//! grade
//! 0.0   10.0   1.25
//! 5.0   10.0   -999
//! ```
//!
//! Values at or below [`MISSING_THRESHOLD`] are missing by convention.
//!
//! # Example
//!
//! ```rust
//! use spatialcluster_gslib::Table;
//!
//! let text = "demo\n2\nx\nv\n0 1.5\n1 -999\n";
//! let mut table = Table::parse(text.as_bytes()).unwrap();
//! assert_eq!(table.nrows(), 2);
//! assert_eq!(table.missing_rows(&[1]), vec![1]);
//!
//! table.push_column("label", vec![0.0, 1.0]).unwrap();
//! let mut out = Vec::new();
//! table.write_to(&mut out).unwrap();
//! ```

mod error;
mod table;

pub use error::{GslibError, Result};
pub use table::{MISSING_THRESHOLD, Table};

#[cfg(test)]
mod tests;
