use crate::prelude::*;

use crate::base::properties::{Properties, PropertyValue, validate_properties};
use crate::execution::row_source::{BoxedRowSource, Cells, LazyRows, RowFeed, RowRequest};
use crate::ops::interface::{DataProvider, ProviderFactory};
use crate::ops::registry::ProviderRegistry;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const NUMBER_OF_INDICATORS: &str = "numberOfIndicators";
pub const NUMBER_OF_ATTRIBUTES: &str = "numberOfAttributes";
pub const NUMBER_OF_ROWS: &str = "numberOfRows";
pub const ATTRIBUTE_PREFIX: &str = "attributePrefix";
pub const FAILS_ON_VALIDATION: &str = "failsOnValidation";
pub const OPTIONAL_STRING_FIELD: &str = "optionalStringField";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shape of the generated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    pub number_of_rows: u64,
    pub number_of_attributes: usize,
    pub number_of_indicators: usize,
    pub attribute_prefix: String,
}

impl Spec {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self {
            number_of_rows: non_negative(properties, NUMBER_OF_ROWS)?,
            number_of_attributes: non_negative(properties, NUMBER_OF_ATTRIBUTES)?,
            number_of_indicators: non_negative(properties, NUMBER_OF_INDICATORS)?,
            attribute_prefix: properties
                .get_optional_string(ATTRIBUTE_PREFIX)?
                .unwrap_or_default(),
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(1 + self.number_of_attributes + self.number_of_indicators);
        names.push("Date and time".to_string());
        names.extend((1..=self.number_of_attributes).map(|i| format!("Attribute {i}")));
        names.extend((1..=self.number_of_indicators).map(|i| format!("Indicator {i}")));
        names
    }
}

fn non_negative<T: TryFrom<i64>>(properties: &Properties, name: &str) -> Result<T> {
    let value = properties.get_int(name)?;
    T::try_from(value)
        .map_err(|_| Error::configuration(format!("Property `{name}` must not be negative, got {value}")))
}

/// Generates rows in memory. The total is known up front.
pub struct RandomFeed {
    spec: Spec,
    generated: u64,
    rng: StdRng,
}

impl RandomFeed {
    pub fn new(spec: Spec) -> Self {
        Self::with_rng(spec, StdRng::from_os_rng())
    }

    /// Reproducible output, for tests.
    pub fn seeded(spec: Spec, seed: u64) -> Self {
        Self::with_rng(spec, StdRng::seed_from_u64(seed))
    }

    fn with_rng(spec: Spec, rng: StdRng) -> Self {
        Self {
            spec,
            generated: 0,
            rng,
        }
    }

    fn generate(&mut self) -> Cells {
        let mut cells = Vec::with_capacity(1 + self.spec.number_of_attributes + self.spec.number_of_indicators);
        cells.push(Some(chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()));
        for i in 1..=self.spec.number_of_attributes {
            let letter = char::from(self.rng.random_range(b'A'..=b'Z'));
            cells.push(Some(format!("{}{i} {letter}", self.spec.attribute_prefix)));
        }
        for i in 1..=self.spec.number_of_indicators {
            let digits: u16 = self.rng.random_range(0..10_000);
            cells.push(Some(format!("{i}{digits:04}")));
        }
        cells
    }
}

#[async_trait]
impl RowFeed for RandomFeed {
    async fn column_names(&mut self) -> Result<Vec<String>> {
        Ok(self.spec.column_names())
    }

    async fn probe_total(&mut self) -> Option<u64> {
        Some(self.spec.number_of_rows)
    }

    async fn fetch_next(&mut self) -> Result<Option<Cells>> {
        if self.generated >= self.spec.number_of_rows {
            return Ok(None);
        }
        self.generated += 1;
        Ok(Some(self.generate()))
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct RandomProvider {
    properties: RwLock<Properties>,
    seed: Option<u64>,
}

impl RandomProvider {
    pub fn default_properties() -> Properties {
        Properties::new()
            .with(NUMBER_OF_INDICATORS, PropertyValue::integer(Some(3), true))
            .with(NUMBER_OF_ATTRIBUTES, PropertyValue::integer(Some(4), true))
            .with(NUMBER_OF_ROWS, PropertyValue::integer(Some(5), true))
            .with(ATTRIBUTE_PREFIX, PropertyValue::string(Some("Sample"), true))
            .with(FAILS_ON_VALIDATION, PropertyValue::boolean(Some(false), true))
            .with(OPTIONAL_STRING_FIELD, PropertyValue::string(None, false))
    }

    pub fn new(properties: Properties) -> Self {
        Self {
            properties: RwLock::new(properties),
            seed: None,
        }
    }

    /// Every row source opened afterwards generates the same values.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl DataProvider for RandomProvider {
    fn name(&self) -> &str {
        "random"
    }

    fn properties(&self) -> Properties {
        self.properties
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update_properties(&self, properties: Properties) {
        *self.properties.write().unwrap_or_else(|e| e.into_inner()) = properties;
    }

    async fn open_rows(&self, request: RowRequest) -> Result<BoxedRowSource> {
        let spec = Spec::from_properties(&self.properties())?;
        debug!("Generating random rows: {spec:?}, {request:?}");
        let feed = match self.seed {
            Some(seed) => RandomFeed::seeded(spec, seed),
            None => RandomFeed::new(spec),
        };
        Ok(Box::new(LazyRows::new(feed, request)))
    }

    async fn check_availability(&self) -> bool {
        info!("Checking availability of the random generator");
        true
    }

    async fn validate(&self) -> Vec<String> {
        let properties = self.properties();
        let mut errors = validate_properties(&properties);
        if properties.get_bool(FAILS_ON_VALIDATION).unwrap_or(false) {
            errors.push(format!(
                "Validation failed due to your choice in property '{FAILS_ON_VALIDATION}'"
            ));
        }
        info!("Configuration validation ended with {} errors", errors.len());
        errors
    }
}

pub struct Factory;

impl ProviderFactory for Factory {
    fn name(&self) -> &str {
        "random"
    }

    fn display_name(&self) -> &str {
        "Random Generator"
    }

    fn default_properties(&self) -> Properties {
        RandomProvider::default_properties()
    }

    fn build(&self, properties: Properties) -> Result<Arc<dyn DataProvider>> {
        Ok(Arc::new(RandomProvider::new(properties)))
    }
}

pub fn register(registry: &mut ProviderRegistry) -> Result<()> {
    registry.register(Arc::new(Factory))
}
