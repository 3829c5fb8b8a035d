pub mod progress;
pub mod row_source;
