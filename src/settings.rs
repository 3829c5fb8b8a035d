use crate::prelude::*;

use crate::base::properties::Value;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout_secs: 10,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub pool: PoolSettings,
    /// Property values per provider, applied over the provider's defaults.
    pub providers: IndexMap<String, IndexMap<String, Value>>,
}

impl Settings {
    pub const ENV_PREFIX: &'static str = "DATAROWS";

    /// Layers an optional settings file under `DATAROWS__*` environment
    /// variables (`DATAROWS__POOL__MAX_CONNECTIONS=8`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::configuration(format!("Invalid settings: {e}")))
    }

    pub fn provider_overrides(&self, provider: &str) -> Option<&IndexMap<String, Value>> {
        self.providers.get(provider)
    }
}
