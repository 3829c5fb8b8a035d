pub mod postgres;
pub mod random;
