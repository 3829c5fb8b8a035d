use crate::prelude::*;

use crate::base::properties::Properties;
use crate::settings::PoolSettings;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::fmt;

pub const HOST: &str = "host";
pub const PORT: &str = "port";
pub const DATABASE: &str = "database";
pub const USER: &str = "user";
pub const PASSWORD: &str = "password";

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConnectionSpec {
    pub host: String,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DatabaseConnectionSpec {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let port = match properties.get(PORT).and_then(|p| p.value_or_default()) {
            None => None,
            Some(_) => {
                let port = properties.get_int(PORT)?;
                Some(u16::try_from(port).map_err(|_| {
                    Error::configuration(format!("Property `{PORT}` is not a valid port: {port}"))
                })?)
            }
        };
        Ok(Self {
            host: properties.get_string(HOST)?,
            port,
            database: properties.get_optional_string(DATABASE)?,
            user: properties.get_optional_string(USER)?,
            password: properties.get_optional_string(PASSWORD)?,
        })
    }

    /// `host:port/database`, safe to show to users.
    pub fn target(&self) -> String {
        let mut target = self.host.clone();
        if let Some(port) = self.port {
            target.push_str(&format!(":{port}"));
        }
        if let Some(database) = &self.database {
            target.push('/');
            target.push_str(database);
        }
        target
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .application_name("datarows");
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

impl fmt::Debug for DatabaseConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnectionSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A pool owned by one provider. Created on first use and dropped by
/// [`PoolHandle::invalidate`]; connections still checked out stay valid.
pub struct PoolHandle {
    settings: PoolSettings,
    pool: Mutex<Option<PgPool>>,
}

impl PoolHandle {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            pool: Mutex::new(None),
        }
    }

    /// Must run inside a tokio runtime.
    pub fn get(&self, spec: &DatabaseConnectionSpec) -> PgPool {
        let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
        pool.get_or_insert_with(|| {
            info!("Creating connection pool for {}", spec.target());
            PgPoolOptions::new()
                .max_connections(self.settings.max_connections)
                .acquire_timeout(self.settings.acquire_timeout())
                .connect_lazy_with(spec.connect_options())
        })
        .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.pool
            .lock()
            .map(|p| p.is_some())
            .unwrap_or_else(|e| e.into_inner().is_some())
    }

    pub fn invalidate(&self) {
        let previous = self.pool.lock().unwrap_or_else(|e| e.into_inner()).take();
        if previous.is_some() {
            debug!("Connection pool invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::properties::{PropertyValue, Value};

    fn properties() -> Properties {
        Properties::new()
            .with(HOST, PropertyValue::string(Some("db.example.com"), true))
            .with(PORT, PropertyValue::integer(Some(5432), true))
            .with(DATABASE, PropertyValue::string(Some("sales"), true))
            .with(USER, PropertyValue::string(None, false))
            .with(PASSWORD, PropertyValue::string(None, false).sensitive())
    }

    #[test]
    fn test_spec_from_properties() {
        let mut props = properties();
        props
            .apply([
                (USER, Value::String("reader".to_string())),
                (PASSWORD, Value::String("s3cret".to_string())),
            ])
            .unwrap();
        let spec = DatabaseConnectionSpec::from_properties(&props).unwrap();
        assert_eq!(spec.target(), "db.example.com:5432/sales");
        assert_eq!(spec.user.as_deref(), Some("reader"));

        let debug = format!("{spec:?}");
        assert!(!debug.contains("s3cret"), "{debug}");

        let options = spec.connect_options();
        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("sales"));
        assert_eq!(options.get_username(), "reader");
    }

    #[test]
    fn test_invalid_port() {
        let mut props = properties();
        props.apply([(PORT, Value::Integer(70_000))]).unwrap();
        let err = DatabaseConnectionSpec::from_properties(&props).unwrap_err();
        assert_eq!(err.to_string(), "Property `port` is not a valid port: 70000");
    }

    #[tokio::test]
    async fn test_pool_handle_lifecycle() {
        let handle = PoolHandle::new(PoolSettings::default());
        assert!(!handle.is_initialized());
        let spec = DatabaseConnectionSpec::from_properties(&properties()).unwrap();
        let _pool = handle.get(&spec);
        assert!(handle.is_initialized());
        handle.invalidate();
        assert!(!handle.is_initialized());
    }
}
