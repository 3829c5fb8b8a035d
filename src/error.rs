use std::error::Error as StdError;
use thiserror::Error;

/// All errors produced by row sources and data providers.
#[derive(Debug, Error)]
pub enum Error {
    /// A property is missing, has the wrong type, or cannot be parsed.
    #[error("{0}")]
    Configuration(String),

    /// The external source cannot be reached.
    #[error("cannot connect to {target}")]
    Connectivity {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    /// `next_row` was called while no row is available.
    #[error("{0}")]
    IterationState(String),

    /// Releasing an owned resource (connection, cursor) failed.
    #[error("failed to release {resource}")]
    Resource {
        resource: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("provider `{0}` is already registered")]
    DuplicateProvider(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn iteration_state(msg: impl Into<String>) -> Self {
        Error::IterationState(msg.into())
    }

    /// Short name of the error category, used when rendering messages for users.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Connectivity { .. } => "ConnectivityError",
            Error::IterationState(_) => "IterationStateError",
            Error::Resource { .. } => "ResourceError",
            Error::UnknownProvider(_) => "UnknownProviderError",
            Error::DuplicateProvider(_) => "DuplicateProviderError",
            Error::Database(e) => sqlx_error_kind(e),
        }
    }
}

/// Follows the `source()` chain down to the innermost error.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current
}

/// Renders the root cause of `err` as `<kind>: <message>`.
pub fn root_cause_message(err: &Error) -> String {
    let root = root_cause(err);
    format!("{}: {}", error_kind(root), root)
}

fn error_kind(err: &(dyn StdError + 'static)) -> String {
    if let Some(e) = err.downcast_ref::<Error>() {
        return e.kind().to_string();
    }
    if let Some(e) = err.downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        return format!("DatabaseError[{}]", e.code());
    }
    if let Some(e) = err.downcast_ref::<sqlx::Error>() {
        if let Some(code) = e.as_database_error().and_then(|db| db.code()) {
            return format!("DatabaseError[{code}]");
        }
        return sqlx_error_kind(e).to_string();
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return format!("IoError({:?})", e.kind());
    }
    "Error".to_string()
}

fn sqlx_error_kind(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::Configuration(_) => "ConfigurationError",
        sqlx::Error::Database(_) => "DatabaseError",
        sqlx::Error::Io(_) => "IoError",
        sqlx::Error::Tls(_) => "TlsError",
        sqlx::Error::Protocol(_) => "ProtocolError",
        sqlx::Error::RowNotFound => "RowNotFound",
        sqlx::Error::PoolTimedOut => "PoolTimedOut",
        sqlx::Error::PoolClosed => "PoolClosed",
        _ => "SqlError",
    }
}
