//! Port model: values, type tags and dual index/name addressing.

use std::collections::HashMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::DataflowError;

/// Value carried by a port.
///
/// Numbers use `OrderedFloat` so equality is total — `set_input` compares the
/// incoming value against the stored one to decide whether a node gets dirty.
/// Fan-in aggregation packs multiple producer outputs into `Array`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
#[serde(untagged)]
pub enum PortValue {
    #[default]
    Null,
    Number(OrderedFloat<f64>),
    Integer(i64),
    String(String),
    Boolean(bool),
    Array(Vec<PortValue>),
    Map(HashMap<String, PortValue>),
}

impl PortValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PortValue::Null)
    }

    /// Numeric view: `Number` as-is, `Integer` widened.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PortValue::Number(n) => Some(n.into_inner()),
            PortValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PortValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PortValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for PortValue {
    fn from(value: f64) -> Self {
        PortValue::Number(OrderedFloat(value))
    }
}

impl From<i64> for PortValue {
    fn from(value: i64) -> Self {
        PortValue::Integer(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        PortValue::String(value.to_string())
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        PortValue::String(value)
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        PortValue::Boolean(value)
    }
}

impl From<Vec<PortValue>> for PortValue {
    fn from(value: Vec<PortValue>) -> Self {
        PortValue::Array(value)
    }
}

/// Declared data type of a port. Structural only — the engine never validates
/// values against it.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    #[default]
    Any,
    Number,
    Integer,
    String,
    Boolean,
    Array,
    Map,
}

/// Optional state tag on an input port.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Connected,
    Hidden,
}

/// Addresses a port either by its stable ordinal index or by name.
#[derive(Clone, Copy, Debug)]
pub enum PortKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for PortKey<'static> {
    fn from(index: usize) -> Self {
        PortKey::Index(index)
    }
}

impl<'a> From<&'a str> for PortKey<'a> {
    fn from(name: &'a str) -> Self {
        PortKey::Name(name)
    }
}

impl fmt::Display for PortKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKey::Index(i) => write!(f, "#{}", i),
            PortKey::Name(n) => write!(f, "'{}'", n),
        }
    }
}

/// A named, indexed slot on a node.
#[derive(Clone, Debug)]
pub struct Port {
    pub name: String,
    pub index: usize,
    pub port_type: PortType,
    pub value: PortValue,
    pub state: Option<PortState>,
}

/// Declared port on a factory (the persisted form).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PortDescriptor {
    pub name: String,
    #[serde(default)]
    pub port_type: PortType,
    #[serde(default)]
    pub default_value: Option<PortValue>,
}

impl PortDescriptor {
    pub fn new(name: &str, port_type: PortType) -> Self {
        Self {
            name: name.to_string(),
            port_type,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: PortValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Ordered ports plus the name resolution table, built once at registration.
///
/// Indices are 0-based, insertion-ordered and permanent; duplicate names are
/// rejected when the port is added. Integer keys resolve by range check, name
/// keys through the table — both land on the same slot.
#[derive(Clone, Debug, Default)]
pub struct PortSet {
    ports: Vec<Port>,
    by_name: HashMap<String, usize>,
}

impl PortSet {
    pub fn add(&mut self, name: &str, port_type: PortType) -> Result<usize, DataflowError> {
        if self.by_name.contains_key(name) {
            return Err(DataflowError::DuplicatePort(name.to_string()));
        }
        let index = self.ports.len();
        self.ports.push(Port {
            name: name.to_string(),
            index,
            port_type,
            value: PortValue::Null,
            state: None,
        });
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn resolve(&self, key: PortKey<'_>) -> Result<usize, DataflowError> {
        match key {
            PortKey::Index(i) if i < self.ports.len() => Ok(i),
            PortKey::Index(i) => Err(DataflowError::PortAddress(format!(
                "port index {} out of range ({} ports)",
                i,
                self.ports.len()
            ))),
            PortKey::Name(n) => self
                .by_name
                .get(n)
                .copied()
                .ok_or_else(|| DataflowError::PortAddress(format!("no port named '{}'", n))),
        }
    }

    pub fn value(&self, key: PortKey<'_>) -> Result<&PortValue, DataflowError> {
        let index = self.resolve(key)?;
        Ok(&self.ports[index].value)
    }

    /// Store `value` at the slot `key` resolves to. Returns `Some(index)` when
    /// the stored value actually changed, `None` when it was equal already.
    pub fn set_value(
        &mut self,
        key: PortKey<'_>,
        value: PortValue,
    ) -> Result<Option<usize>, DataflowError> {
        let index = self.resolve(key)?;
        if self.ports[index].value == value {
            return Ok(None);
        }
        self.ports[index].value = value;
        Ok(Some(index))
    }

    /// Positional write used when copying compute results out; silently ignores
    /// indices past the end (the `min(result, outputs)` copy rule).
    pub fn write(&mut self, index: usize, value: PortValue) {
        if let Some(port) = self.ports.get_mut(index) {
            port.value = value;
        }
    }

    pub fn state(&self, key: PortKey<'_>) -> Result<Option<PortState>, DataflowError> {
        let index = self.resolve(key)?;
        Ok(self.ports[index].state)
    }

    /// Store a state tag; returns the slot index.
    pub fn set_state(
        &mut self,
        key: PortKey<'_>,
        state: Option<PortState>,
    ) -> Result<usize, DataflowError> {
        let index = self.resolve(key)?;
        self.ports[index].state = state;
        Ok(index)
    }

    /// Ordered snapshot of all current values.
    pub fn values(&self) -> Vec<PortValue> {
        self.ports.iter().map(|p| p.value.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<&Port> {
        self.ports.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Port> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
