//! Terminal output for the command-line tool

pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{diagnostics, dim, empty, error, file_deleted, header, info, success, timing, warn};
pub use progress::Spinner;
pub use table::{result_table, TableBuilder};
pub use theme::{theme, Theme};
