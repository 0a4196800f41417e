//! Layered configuration resolution.
//!
//! A [`Config`] is built once per run by merging ranked partial sources
//! against a schema of [`Variable`] declarations, and is immutable from
//! then on. Derived configurations are produced with
//! [`Config::with_overrides`], which never touches the original.

use crate::config::{Value, Variable};
use crate::errors::ConfigError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// One ranked source of configuration values (run overrides, the design's
/// own config document, the environment, PDK defaults...). The resolver
/// does not care where a source came from, only about its position in the
/// priority order.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub name: String,
    pub values: BTreeMap<String, Value>,
}

impl ConfigSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn from_map(name: &str, values: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }
}

#[derive(Debug)]
struct ConfigInner {
    values: BTreeMap<String, Value>,
    schema: BTreeMap<String, Variable>,
}

/// An immutable, schema-validated configuration.
///
/// Cheap to clone and safe to share across concurrently running steps;
/// there is no way to mutate a `Config` after resolution.
#[derive(Debug, Clone)]
pub struct Config {
    inner: Arc<ConfigInner>,
}

impl Config {
    /// Merge `sources` (ordered highest priority first) against `schema`.
    ///
    /// For every declared variable the first source that defines it wins.
    /// A variable absent from every source falls back to its default; a
    /// required variable with neither fails. Every resolved value is
    /// type-checked and constraint-checked.
    pub fn resolve(sources: &[ConfigSource], schema: Vec<Variable>) -> Result<Self, ConfigError> {
        let schema: BTreeMap<String, Variable> = schema
            .into_iter()
            .map(|var| (var.name.clone(), var))
            .collect();

        let mut values = BTreeMap::new();
        for var in schema.values() {
            match lookup(sources, var) {
                Some(value) => {
                    values.insert(var.name.clone(), var.validate(value)?);
                }
                None => match &var.default {
                    Some(default) => {
                        values.insert(var.name.clone(), var.validate(default.clone())?);
                    }
                    None if var.required => {
                        return Err(ConfigError::Missing {
                            variable: var.name.clone(),
                        });
                    }
                    None => {}
                },
            }
        }

        for source in sources {
            for key in source.values.keys() {
                if !schema.contains_key(key) && !known_as_deprecated(&schema, key) {
                    warn!(source = %source.name, variable = %key, "ignoring undeclared variable");
                }
            }
        }

        Ok(Self {
            inner: Arc::new(ConfigInner { values, schema }),
        })
    }

    /// Pure derivation: a new `Config` identical to this one except for the
    /// named keys. Only the overridden keys are re-validated. The original
    /// is untouched.
    pub fn with_overrides(
        &self,
        overrides: BTreeMap<String, Value>,
    ) -> Result<Self, ConfigError> {
        let mut values = self.inner.values.clone();
        for (name, value) in overrides {
            let var = self
                .inner
                .schema
                .get(&name)
                .ok_or_else(|| ConfigError::Unknown {
                    variable: name.clone(),
                })?;
            values.insert(name, var.validate(value)?);
        }
        Ok(Self {
            inner: Arc::new(ConfigInner {
                values,
                schema: self.inner.schema.clone(),
            }),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.values.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.values.contains_key(name)
    }

    fn require(&self, name: &str) -> Result<&Value, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::Missing {
            variable: name.to_string(),
        })
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ConfigError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| self.mismatch(name, "bool", value))
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ConfigError> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| self.mismatch(name, "int", value))
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ConfigError> {
        let value = self.require(name)?;
        value
            .as_float()
            .ok_or_else(|| self.mismatch(name, "float", value))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, ConfigError> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(name, "string", value))
    }

    pub fn get_path(&self, name: &str) -> Result<&Path, ConfigError> {
        let value = self.require(name)?;
        value
            .as_path()
            .ok_or_else(|| self.mismatch(name, "path", value))
    }

    fn mismatch(&self, name: &str, expected: &str, value: &Value) -> ConfigError {
        ConfigError::TypeMismatch {
            variable: name.to_string(),
            expected: expected.to_string(),
            received: format!("{} ({})", value, value.kind_name()),
        }
    }

    /// Iterate over all resolved (name, value) pairs, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner
            .values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    /// Write the resolved values as pretty JSON, for the run directory.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.inner.values)
            .map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Find the highest-priority value for `var`, honoring deprecated names.
fn lookup(sources: &[ConfigSource], var: &Variable) -> Option<Value> {
    for source in sources {
        if let Some(value) = source.values.get(&var.name) {
            return Some(value.clone());
        }
        for old in &var.deprecated_names {
            if let Some(value) = source.values.get(old) {
                warn!(
                    source = %source.name,
                    old = %old,
                    new = %var.name,
                    "variable name is deprecated"
                );
                return Some(value.clone());
            }
        }
    }
    None
}

fn known_as_deprecated(schema: &BTreeMap<String, Variable>, key: &str) -> bool {
    schema
        .values()
        .any(|var| var.deprecated_names.iter().any(|old| old == key))
}
