//! Persisted object model.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of an object within its class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Creates an id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ObjectId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// An `(class, id)` pair pointing at a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Class name of the target.
    pub class: String,
    /// Id of the target.
    pub id: ObjectId,
}

impl ObjectRef {
    /// Creates a reference.
    pub fn new(class: impl Into<String>, id: impl Into<ObjectId>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.id)
    }
}

/// A persisted object: its class, its id and its named properties.
///
/// # Example
///
/// ```rust
/// use shelfdb_codec::{Object, Value};
///
/// let earth = Object::new("Planet", "3")
///     .with("name", "Earth")
///     .with("moons", 1i64);
/// assert_eq!(earth.get("name"), Some(&Value::from("Earth")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Class name.
    pub class: String,
    /// Identity within the class.
    pub id: ObjectId,
    /// Named property values.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Object {
    /// Creates an object without properties.
    pub fn new(class: impl Into<String>, id: impl Into<ObjectId>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Sets a property and returns the object.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a property, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    /// Returns a property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Returns a reference to this object.
    #[must_use]
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef::new(self.class.clone(), self.id.clone())
    }
}
