use crate::prelude::*;

use crate::base::properties::Properties;
use crate::ops::interface::{DataProvider, ProviderFactory};
use crate::settings::Settings;

/// Provider factories by name. Built explicitly and passed around; there is
/// no process-wide registry.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: IndexMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the random generator and the PostgreSQL provider.
    pub fn with_builtin_factories(settings: &Settings) -> Result<Self> {
        let mut registry = Self::new();
        crate::ops::sources::random::register(&mut registry)?;
        crate::ops::sources::postgres::register(&mut registry, settings)?;
        Ok(registry)
    }

    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) -> Result<()> {
        let name = factory.name().to_string();
        if self.factories.contains_key(&name) {
            return Err(Error::DuplicateProvider(name));
        }
        debug!("Registering provider `{name}`");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn ProviderFactory>> {
        self.factories
            .get(name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn ProviderFactory>> {
        self.factories.values()
    }

    /// Defaults of `name`, overlaid with the values `settings` holds for it.
    pub fn configured_properties(&self, name: &str, settings: &Settings) -> Result<Properties> {
        let mut properties = self.get(name)?.default_properties();
        if let Some(overrides) = settings.provider_overrides(name) {
            properties.apply(overrides.iter().map(|(k, v)| (k, v.clone())))?;
        }
        Ok(properties)
    }

    pub fn build(&self, name: &str, properties: Properties) -> Result<Arc<dyn DataProvider>> {
        self.get(name)?.build(properties)
    }
}
