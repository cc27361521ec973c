//! Output helpers: JSON flattening, CSV export, timestamp formatting

mod json;
mod table;
mod time;

pub use json::{cell_text, ValueExt};
pub use table::{export_to_csv, flatten, to_table, Table, SCALAR_COLUMN};
pub use time::{convert_utc_to, convert_utc_to_local, LOCAL_FORMAT};
