use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;

/// Keys starting with this character are configuration attributes, every other key is a payload
pub const CONFIG_MARKER: char = '_';

/// A configuration attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ConfigValue>),
}

/// The configuration attributes of a spec node, indexed by their name (without the marker)
pub type Config = BTreeMap<String, ConfigValue>;

impl ConfigValue {
    /// Convert a TOML value. Tables and datetimes have no meaning as attributes.
    pub fn from_toml(value: toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(b) => Some(ConfigValue::Bool(b)),
            toml::Value::Integer(i) => Some(ConfigValue::Int(i)),
            toml::Value::Float(f) => Some(ConfigValue::Float(f)),
            toml::Value::String(s) => Some(ConfigValue::Str(s)),
            toml::Value::Array(a) => a
                .into_iter()
                .map(ConfigValue::from_toml)
                .collect::<Option<Vec<_>>>()
                .map(ConfigValue::List),
            toml::Value::Table(_) | toml::Value::Datetime(_) => None,
        }
    }

    fn to_toml(&self) -> toml::Value {
        match self {
            ConfigValue::Bool(b) => toml::Value::Boolean(*b),
            ConfigValue::Int(i) => toml::Value::Integer(*i),
            ConfigValue::Float(f) => toml::Value::Float(*f),
            ConfigValue::Str(s) => toml::Value::String(s.clone()),
            ConfigValue::List(l) => toml::Value::Array(l.iter().map(|v| v.to_toml()).collect()),
        }
    }

    /// Numeric view of the value, integers included
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigValue::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::Str(s) => write!(f, "{s:?}"),
            ConfigValue::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Returns the attribute name if the key carries the configuration marker
pub fn config_key(key: &str) -> Option<&str> {
    key.strip_prefix(CONFIG_MARKER)
}

/// Deserialize a configuration into the typed configuration of a node kind
pub fn parse_config<T: DeserializeOwned>(config: &Config) -> Result<T, toml::de::Error> {
    let table: toml::Table = config
        .iter()
        .map(|(k, v)| (k.clone(), v.to_toml()))
        .collect();
    toml::Value::Table(table).try_into()
}
