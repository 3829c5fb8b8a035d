use crate::prelude::*;

use crate::base::properties::Properties;
use crate::base::row::Row;
use crate::execution::progress::ProgressSink;
use crate::execution::row_source::{BoxedRowSource, RowLimit, RowRequest};

/// A configured source of tabular rows.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Registry key of the factory that built this provider.
    fn name(&self) -> &str;

    /// Snapshot of the current configuration.
    fn properties(&self) -> Properties;

    /// Replaces the configuration. Row sources already open keep reading with
    /// the configuration they were opened with.
    fn update_properties(&self, properties: Properties);

    /// Opens a fresh row source for `request`. The caller owns the returned
    /// source and must close it.
    async fn open_rows(&self, request: RowRequest) -> Result<BoxedRowSource>;

    async fn preview_rows(&self, limit: RowLimit) -> Result<BoxedRowSource> {
        info!("Providing preview data from `{}` (limit: {limit})", self.name());
        self.open_rows(RowRequest::preview(limit)).await
    }

    async fn import_rows(
        &self,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BoxedRowSource> {
        info!("Providing import data from `{}`", self.name());
        self.open_rows(RowRequest::import(progress)).await
    }

    /// The header row, or `None` when the source produced nothing.
    async fn default_column_definition(&self) -> Result<Option<Row>> {
        info!("Providing default column names from `{}`", self.name());
        let mut rows = self.open_rows(RowRequest::column_definition()).await?;
        let first = rows.try_next().await;
        rows.close().await;
        first
    }

    /// Whether the external source can be reached. Never fails.
    async fn check_availability(&self) -> bool;

    /// Human-readable problems with the current configuration; empty when valid.
    async fn validate(&self) -> Vec<String>;
}

pub trait ProviderFactory: Send + Sync {
    /// Registry key, e.g. `random`.
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn default_properties(&self) -> Properties;

    fn build(&self, properties: Properties) -> Result<Arc<dyn DataProvider>>;
}
