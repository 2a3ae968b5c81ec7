//! Ordered, typed key/value configuration threaded from parent to child.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-transition workload, in milliseconds.
pub const DURATION: &str = "duration";
/// Display name of a model.
pub const NAME: &str = "name";
/// Number of incoming edges of a model in its parent's topology.
pub const NEIGHBOUR_NUMBER: &str = "neighbour_number";
/// Path of the TGF file describing a coupled model's children.
pub const TGF_FILESOURCE: &str = "tgf-filesource";
/// Topology file format tag; `1` is TGF.
pub const TGF_FORMAT: &str = "tgf-format";
/// Topology file of the enclosing coupled model; set on every child.
pub const TGF_PARENT: &str = "tgf-parent";
/// Length of the simulated window, used by teardown consistency checks.
pub const SIMULATION_DURATION: &str = "simulation-duration";

/// A configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::UInt(_) => "unsigned integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Errors raised when reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is absent.
    #[error("missing configuration field `{key}`")]
    Missing { key: String },
    /// The key exists but holds a value of another type.
    #[error("configuration field `{key}` holds a {found}, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    /// Name of the expected type, for error messages.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "real";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Configuration handed to models at composition time.
///
/// Passed by value: every child receives its own copy, so no mutation is ever
/// visible to the parent or to siblings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonConfig {
    entries: BTreeMap<String, Value>,
}

impl CommonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Read `key` as `T`.
    ///
    /// # Errors
    ///
    /// * If the key is absent
    /// * If the stored value is not convertible to `T`
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.entries.get(key).ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })?;
        T::from_value(value).ok_or_else(|| ConfigError::WrongType {
            key: key.to_string(),
            expected: T::EXPECTED,
            found: value.type_name(),
        })
    }

    /// Read `key` as `T`, or `None` when it is absent.
    ///
    /// # Errors
    ///
    /// * If the key is present with a value not convertible to `T`
    pub fn get_opt<T: FromValue>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        if self.contains(key) {
            self.get(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_get() {
        let common = CommonConfig::new()
            .with(DURATION, 100i64)
            .with(NAME, "s0")
            .with(NEIGHBOUR_NUMBER, 3u64)
            .with(SIMULATION_DURATION, 10.0);
        assert_eq!(common.get::<i64>(DURATION), Ok(100));
        assert_eq!(common.get::<String>(NAME), Ok("s0".to_string()));
        assert_eq!(common.get::<u64>(NEIGHBOUR_NUMBER), Ok(3));
        assert_eq!(common.get::<f64>(SIMULATION_DURATION), Ok(10.0));
    }

    #[test]
    fn missing_key_is_named() {
        let err = CommonConfig::new().get::<i64>(DURATION).unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: DURATION.into() });
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn wrong_type_is_reported() {
        let common = CommonConfig::new().with(NAME, 4i64);
        assert_eq!(
            common.get::<String>(NAME),
            Err(ConfigError::WrongType {
                key: NAME.into(),
                expected: "text",
                found: "integer",
            })
        );
    }

    #[test]
    fn negative_int_is_not_unsigned() {
        let common = CommonConfig::new().with(NEIGHBOUR_NUMBER, -1i64);
        assert!(common.get::<u64>(NEIGHBOUR_NUMBER).is_err());
    }

    #[test]
    fn copies_are_independent() {
        let parent = CommonConfig::new().with(NAME, "root");
        let mut child = parent.clone();
        child.set(NAME, "root-0");
        assert_eq!(parent.get::<String>(NAME), Ok("root".into()));
        assert_eq!(child.get::<String>(NAME), Ok("root-0".into()));
    }

    #[test]
    fn keys_iterate_in_order() {
        let common = CommonConfig::new().with("b", 1i64).with("a", 2i64);
        let keys: Vec<&str> = common.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
