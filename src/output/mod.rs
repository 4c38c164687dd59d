//! Spreadsheet output for the export stage.

mod csv;

pub use self::csv::*;
