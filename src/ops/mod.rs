pub mod interface;
pub mod registry;
pub mod shared;
pub mod sources;
