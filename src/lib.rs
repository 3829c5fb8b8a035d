pub mod base;
pub mod error;
pub mod execution;
pub mod ops;
pub mod prelude;
pub mod settings;

pub use base::properties::{Properties, PropertyValue, Value, ValueKind};
pub use base::row::Row;
pub use error::{Error, Result};
pub use execution::progress::ProgressSink;
pub use execution::row_source::{BoxedRowSource, RowLimit, RowRequest, RowSource};
pub use ops::interface::{DataProvider, ProviderFactory};
pub use ops::registry::ProviderRegistry;
pub use settings::Settings;
