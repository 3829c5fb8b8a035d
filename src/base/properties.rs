use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    Integer,
    Boolean,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
        }
    }

    /// Parses `text` as a value of the given kind.
    pub fn parse(kind: ValueKind, text: &str) -> std::result::Result<Self, String> {
        match kind {
            ValueKind::String => Ok(Value::String(text.to_string())),
            ValueKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| format!("`{text}` is not an integer: {e}")),
            ValueKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(format!("`{text}` is not a boolean")),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// A declared connector property: its type, default, the user-supplied value
/// and whether it must be present.
#[derive(Clone, PartialEq, Eq)]
pub struct PropertyValue {
    kind: ValueKind,
    value: Option<Value>,
    default: Option<Value>,
    required: bool,
    sensitive: bool,
}

impl PropertyValue {
    fn new(kind: ValueKind, default: Option<Value>, required: bool) -> Self {
        Self {
            kind,
            value: None,
            default,
            required,
            sensitive: false,
        }
    }

    pub fn string(default: Option<&str>, required: bool) -> Self {
        Self::new(
            ValueKind::String,
            default.map(|s| Value::String(s.to_string())),
            required,
        )
    }

    pub fn integer(default: Option<i64>, required: bool) -> Self {
        Self::new(ValueKind::Integer, default.map(Value::Integer), required)
    }

    pub fn boolean(default: Option<bool>, required: bool) -> Self {
        Self::new(ValueKind::Boolean, default.map(Value::Boolean), required)
    }

    /// Marks the property as holding a secret. Its value is never printed.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn value_or_default(&self) -> Option<&Value> {
        self.value.as_ref().or(self.default.as_ref())
    }

    pub fn value_or_default_as_string(&self) -> Option<String> {
        self.value_or_default().map(|v| v.to_string())
    }

    /// A required property with neither a value nor a default is invalid.
    pub fn is_valid(&self) -> bool {
        !self.required || self.value_or_default().is_some()
    }

    /// Text is parsed into the declared kind, scalars are accepted as text for
    /// string properties, anything else of the wrong kind is rejected.
    pub fn set(&mut self, value: Value) -> std::result::Result<(), String> {
        let value = match value {
            v if v.kind() == self.kind => v,
            Value::String(text) => Value::parse(self.kind, &text)?,
            other if self.kind == ValueKind::String => Value::String(other.to_string()),
            other => {
                return Err(format!(
                    "expected a {} value, got a {}",
                    self.kind,
                    other.kind()
                ));
            }
        };
        self.value = Some(value);
        Ok(())
    }

    pub fn set_from_str(&mut self, text: &str) -> std::result::Result<(), String> {
        let value = Value::parse(self.kind, text)?;
        self.value = Some(value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.value = None;
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PropertyValue");
        s.field("kind", &self.kind);
        if self.sensitive {
            s.field("value", &self.value.as_ref().map(|_| "***"));
            s.field("default", &self.default.as_ref().map(|_| "***"));
        } else {
            s.field("value", &self.value);
            s.field("default", &self.default);
        }
        s.field("required", &self.required)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

/// Connector configuration: property name to declared value, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: IndexMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, property: PropertyValue) -> Self {
        self.insert(name, property);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, property: PropertyValue) {
        self.entries.insert(name.into(), property);
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PropertyValue> {
        self.entries.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// One line per property with its kind, whether it is required and its
    /// effective value. Sensitive values are masked.
    pub fn describe(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        for (name, property) in self.iter() {
            let value = match property.value_or_default() {
                None => "-".to_string(),
                Some(_) if property.is_sensitive() => "***".to_string(),
                Some(v) => v.to_string(),
            };
            let required = if property.is_required() {
                "required"
            } else {
                "optional"
            };
            let _ = writeln!(out, "{name}: {} ({required}) = {value}", property.kind());
        }
        out
    }

    /// Sets user values by name. Unknown names and mistyped values are rejected.
    pub fn apply<I, K>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (name, value) in overrides {
            let name = name.as_ref();
            let property = self.lookup_mut(name)?;
            let sensitive = property.is_sensitive();
            property.set(value).map_err(|e| {
                if sensitive {
                    Error::configuration(format!("Invalid value for `{name}`"))
                } else {
                    Error::configuration(format!("Invalid value for `{name}`: {e}"))
                }
            })?;
        }
        Ok(())
    }

    /// Like [`Properties::apply`], but parses each value from text according
    /// to the declared kind of the property.
    pub fn apply_strings<I, K, V>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, text) in overrides {
            let name = name.as_ref();
            let property = self.lookup_mut(name)?;
            let sensitive = property.is_sensitive();
            property.set_from_str(text.as_ref()).map_err(|e| {
                if sensitive {
                    Error::configuration(format!("Invalid value for `{name}`"))
                } else {
                    Error::configuration(format!("Invalid value for `{name}`: {e}"))
                }
            })?;
        }
        Ok(())
    }

    /// Exact match first, then case-insensitive: layered config sources may
    /// lowercase keys.
    fn lookup_mut(&mut self, name: &str) -> Result<&mut PropertyValue> {
        let index = self
            .entries
            .get_index_of(name)
            .or_else(|| {
                self.entries
                    .keys()
                    .position(|k| k.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| Error::configuration(format!("Unknown property `{name}`")))?;
        Ok(&mut self.entries[index])
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.entries
            .get(name)
            .and_then(|p| p.value_or_default())
            .ok_or_else(|| Error::configuration(format!("You must provide a value for {name}")))
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::configuration(format!(
                "Property `{name}` must be a string, got a {}",
                other.kind()
            ))),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Integer(i) => Ok(*i),
            other => Err(Error::configuration(format!(
                "Property `{name}` must be an integer, got a {}",
                other.kind()
            ))),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Boolean(b) => Ok(*b),
            other => Err(Error::configuration(format!(
                "Property `{name}` must be a boolean, got a {}",
                other.kind()
            ))),
        }
    }

    /// Same as [`Properties::get_string`] but a missing value is `None`.
    pub fn get_optional_string(&self, name: &str) -> Result<Option<String>> {
        match self.entries.get(name).and_then(|p| p.value_or_default()) {
            None => Ok(None),
            Some(_) => self.get_string(name).map(Some),
        }
    }
}

/// Reports every invalid property, in declaration order.
pub fn validate_properties(properties: &Properties) -> Vec<String> {
    properties
        .iter()
        .filter(|(_, p)| !p.is_valid())
        .map(|(name, _)| format!("You must provide a value for {name}"))
        .collect()
}
