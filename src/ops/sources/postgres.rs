use crate::prelude::*;

use crate::base::properties::{Properties, PropertyValue, validate_properties};
use crate::error::root_cause_message;
use crate::execution::row_source::{
    BoxedRowSource, Cells, LazyRows, RowFeed, RowLimit, RowRequest,
};
use crate::ops::interface::{DataProvider, ProviderFactory};
use crate::ops::registry::ProviderRegistry;
use crate::ops::shared::postgres::{
    DATABASE, DatabaseConnectionSpec, HOST, PASSWORD, PORT, PoolHandle, USER,
};
use crate::settings::{PoolSettings, Settings};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Column, Connection, Executor, PgConnection, Postgres, Row, Statement, ValueRef};

pub const SQL_QUERY: &str = "sqlQuery";

const CURSOR_NAME: &str = "datarows_cursor";
const FETCH_NEXT: &str = "FETCH NEXT FROM datarows_cursor";
const SIZE_PROBE_SAVEPOINT: &str = "datarows_size_probe";

/// `query` with statement terminators and line breaks blanked out, so it can
/// be nested as a subquery.
pub fn inner_query(query: &str) -> String {
    query.replace(|c: char| c == ';' || c == '\n', " ")
}

pub fn count_query(query: &str) -> String {
    format!("select count(*) from ({}) as t", inner_query(query))
}

/// `query` without trailing statement terminators.
fn cursor_query(query: &str) -> &str {
    query.trim_end().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Created,
    Streaming,
    Exhausted,
    Closed,
}

/// Streams the rows of one query through a server-side cursor, inside a
/// transaction on a connection it owns until [`RowFeed::release`].
pub struct PgCursor {
    conn: Option<PoolConnection<Postgres>>,
    query: String,
    state: CursorState,
    size_probed: bool,
}

impl PgCursor {
    /// Opens a transaction on `conn`. On failure the connection goes back to
    /// its pool untouched.
    pub async fn open(mut conn: PoolConnection<Postgres>, query: impl Into<String>) -> Result<Self> {
        conn.execute("BEGIN").await?;
        Ok(Self {
            conn: Some(conn),
            query: query.into(),
            state: CursorState::Created,
            size_probed: false,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    #[cfg(test)]
    fn without_connection(query: &str) -> Self {
        Self {
            conn: None,
            query: query.to_string(),
            state: CursorState::Created,
            size_probed: false,
        }
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::iteration_state("Cursor is closed"))
    }

    async fn declare(&mut self) -> Result<()> {
        let sql = format!(
            "DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {}",
            cursor_query(&self.query)
        );
        debug!("Declaring cursor: {sql}");
        self.connection()?.execute(sql.as_str()).await?;
        self.state = CursorState::Streaming;
        Ok(())
    }
}

/// Runs the count query under a savepoint, so a failure leaves the
/// transaction usable.
async fn count_rows(conn: &mut PgConnection, query: &str) -> Result<u64> {
    let sql = count_query(query);
    debug!("Probing size: {sql}");
    conn.execute(format!("SAVEPOINT {SIZE_PROBE_SAVEPOINT}").as_str())
        .await?;
    match sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut *conn).await {
        Ok(total) => {
            conn.execute(format!("RELEASE SAVEPOINT {SIZE_PROBE_SAVEPOINT}").as_str())
                .await?;
            Ok(u64::try_from(total).unwrap_or(0))
        }
        Err(err) => {
            conn.execute(format!("ROLLBACK TO SAVEPOINT {SIZE_PROBE_SAVEPOINT}").as_str())
                .await?;
            Err(err.into())
        }
    }
}

/// Every column in its text representation. Only valid for rows fetched
/// over the simple query protocol.
fn row_cells(row: &PgRow) -> Result<Cells> {
    (0..row.len())
        .map(|i| -> Result<Option<String>> {
            let value = row.try_get_raw(i)?;
            if value.is_null() {
                return Ok(None);
            }
            let text = value.as_str().map_err(sqlx::Error::Decode)?;
            Ok(Some(text.to_string()))
        })
        .collect()
}

#[async_trait]
impl RowFeed for PgCursor {
    async fn column_names(&mut self) -> Result<Vec<String>> {
        let query = cursor_query(&self.query).to_string();
        let statement = self.connection()?.prepare(query.as_str()).await?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }

    async fn probe_total(&mut self) -> Option<u64> {
        if self.size_probed || self.state != CursorState::Created {
            return None;
        }
        self.size_probed = true;
        let query = self.query.clone();
        let conn = self.connection().ok()?;
        match count_rows(conn, &query).await {
            Ok(total) => Some(total),
            Err(err) => {
                warn!("Cannot determine the number of rows: {err}");
                None
            }
        }
    }

    async fn fetch_next(&mut self) -> Result<Option<Cells>> {
        match self.state {
            CursorState::Created => self.declare().await?,
            CursorState::Streaming => {}
            CursorState::Exhausted => return Ok(None),
            CursorState::Closed => return Err(Error::iteration_state("Cursor is closed")),
        }
        match self.connection()?.fetch_optional(FETCH_NEXT).await? {
            Some(row) => row_cells(&row).map(Some),
            None => {
                self.state = CursorState::Exhausted;
                Ok(None)
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.state = CursorState::Closed;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match conn.execute("COMMIT").await {
            Ok(_) => Ok(()),
            Err(source) => {
                if let Err(err) = conn.detach().close().await {
                    debug!("Closing connection after failed commit: {err}");
                }
                Err(Error::Resource {
                    resource: "PostgreSQL transaction",
                    source,
                })
            }
        }
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Cursor dropped without being closed, discarding its connection");
            drop(conn.detach());
        }
    }
}

pub struct PostgresProvider {
    properties: RwLock<Properties>,
    pool: PoolHandle,
}

impl PostgresProvider {
    pub fn default_properties() -> Properties {
        Properties::new()
            .with(HOST, PropertyValue::string(Some("db.example.com"), true))
            .with(PORT, PropertyValue::integer(Some(5432), true))
            .with(DATABASE, PropertyValue::string(Some("MyDatabaseName"), true))
            .with(USER, PropertyValue::string(None, false))
            .with(PASSWORD, PropertyValue::string(None, false).sensitive())
            .with(
                SQL_QUERY,
                PropertyValue::string(Some(r#"SELECT "column1", "column2" FROM MyTable;"#), true),
            )
    }

    pub fn new(properties: Properties, pool_settings: PoolSettings) -> Self {
        Self {
            properties: RwLock::new(properties),
            pool: PoolHandle::new(pool_settings),
        }
    }

    async fn connect(&self) -> Result<PoolConnection<Postgres>> {
        let spec = DatabaseConnectionSpec::from_properties(&self.properties())?;
        let pool = self.pool.get(&spec);
        pool.acquire().await.map_err(|source| Error::Connectivity {
            target: spec.target(),
            source,
        })
    }

    async fn check_connection(&self) -> Result<()> {
        self.connect().await.map(drop)
    }

    /// Connects, then fetches one preview row so SQL errors surface too.
    async fn probe(&self) -> Result<()> {
        self.check_connection().await?;
        let mut rows = self.preview_rows(RowLimit::new(1)).await?;
        let result = rows.has_next().await;
        rows.close().await;
        result.map(drop)
    }
}

#[async_trait]
impl DataProvider for PostgresProvider {
    fn name(&self) -> &str {
        "postgres"
    }

    fn properties(&self) -> Properties {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The next request connects with the new properties.
    fn update_properties(&self, properties: Properties) {
        *self.properties.write().unwrap_or_else(|e| e.into_inner()) = properties;
        self.pool.invalidate();
    }

    async fn open_rows(&self, request: RowRequest) -> Result<BoxedRowSource> {
        let query = self.properties().get_string(SQL_QUERY)?;
        let conn = self.connect().await?;
        let cursor = PgCursor::open(conn, query).await?;
        Ok(Box::new(LazyRows::new(cursor, request)))
    }

    async fn check_availability(&self) -> bool {
        match self.check_connection().await {
            Ok(()) => true,
            Err(err) => {
                info!("PostgreSQL is not available: {}", root_cause_message(&err));
                false
            }
        }
    }

    async fn validate(&self) -> Vec<String> {
        let mut errors = validate_properties(&self.properties());
        match self.probe().await {
            Ok(()) => {}
            // Missing values are already listed.
            Err(Error::Configuration(msg)) if errors.contains(&msg) => {}
            Err(err) => errors.push(root_cause_message(&err)),
        }
        info!("Configuration validation ended with {} errors", errors.len());
        errors
    }
}

pub struct Factory {
    pool_settings: PoolSettings,
}

impl Factory {
    pub fn new(pool_settings: PoolSettings) -> Self {
        Self { pool_settings }
    }
}

impl ProviderFactory for Factory {
    fn name(&self) -> &str {
        "postgres"
    }

    fn display_name(&self) -> &str {
        "PostgreSQL"
    }

    fn default_properties(&self) -> Properties {
        PostgresProvider::default_properties()
    }

    fn build(&self, properties: Properties) -> Result<Arc<dyn DataProvider>> {
        Ok(Arc::new(PostgresProvider::new(
            properties,
            self.pool_settings.clone(),
        )))
    }
}

pub fn register(registry: &mut ProviderRegistry, settings: &Settings) -> Result<()> {
    registry.register(Arc::new(Factory::new(settings.pool.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_query() {
        assert_eq!(
            count_query("SELECT a,\nb FROM t;"),
            "select count(*) from (SELECT a, b FROM t ) as t"
        );
        assert_eq!(
            count_query(r#"SELECT "column1", "column2" FROM MyTable;"#),
            r#"select count(*) from (SELECT "column1", "column2" FROM MyTable ) as t"#
        );
    }

    #[test]
    fn test_cursor_query() {
        assert_eq!(cursor_query("SELECT 1;"), "SELECT 1");
        assert_eq!(cursor_query("SELECT 1 ; \n"), "SELECT 1");
        assert_eq!(cursor_query("SELECT ';'"), "SELECT ';'");
        assert!(FETCH_NEXT.ends_with(CURSOR_NAME));
    }

    #[test]
    fn test_default_properties() {
        let props = PostgresProvider::default_properties();
        let names: Vec<_> = props.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![HOST, PORT, DATABASE, USER, PASSWORD, SQL_QUERY]);
        assert!(props.get(PASSWORD).unwrap().is_sensitive());
        assert!(validate_properties(&props).is_empty());
    }

    #[tokio::test]
    async fn test_update_properties_invalidates_pool() {
        let provider: Arc<dyn DataProvider> = Arc::new(PostgresProvider::new(
            PostgresProvider::default_properties(),
            PoolSettings::default(),
        ));
        let concrete =
            PostgresProvider::new(PostgresProvider::default_properties(), PoolSettings::default());
        let spec = DatabaseConnectionSpec::from_properties(&concrete.properties()).unwrap();
        concrete.pool.get(&spec);
        assert!(concrete.pool.is_initialized());
        concrete.update_properties(PostgresProvider::default_properties());
        assert!(!concrete.pool.is_initialized());

        let mut props = provider.properties();
        props.apply_strings([(SQL_QUERY, "SELECT 1")]).unwrap();
        provider.update_properties(props);
        assert_eq!(provider.properties().get_string(SQL_QUERY).unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_cursor_without_connection() {
        let mut cursor = PgCursor::without_connection("SELECT 1;");
        assert_eq!(cursor.query(), "SELECT 1;");
        assert_eq!(cursor.probe_total().await, None);
        assert!(matches!(cursor.fetch_next().await, Err(Error::IterationState(_))));
        assert!(matches!(cursor.column_names().await, Err(Error::IterationState(_))));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let mut cursor = PgCursor::without_connection("SELECT 1");
        cursor.release().await.unwrap();
        assert_eq!(cursor.state, CursorState::Closed);
        cursor.release().await.unwrap();
        assert!(cursor.conn.is_none());
        assert!(matches!(cursor.fetch_next().await, Err(Error::IterationState(_))));
    }

    #[tokio::test]
    async fn test_exhausted_cursor_stays_exhausted() {
        let mut cursor = PgCursor::without_connection("SELECT 1");
        cursor.state = CursorState::Exhausted;
        assert_eq!(cursor.fetch_next().await.unwrap(), None);
        assert_eq!(cursor.probe_total().await, None);
        cursor.release().await.unwrap();
        assert!(matches!(cursor.fetch_next().await, Err(Error::IterationState(_))));
    }
}
