pub mod properties;
pub mod row;
