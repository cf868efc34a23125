//! Class registration and typed conversion.

use crate::error::{CoreError, CoreResult};
use crate::policy::StoragePolicy;
use parking_lot::RwLock;
use shelfdb_codec::{Object, ObjectId, Value};
use std::collections::{BTreeMap, HashMap};

/// Types with a stable object id.
pub trait Identifiable {
    /// The object id.
    fn id(&self) -> ObjectId;

    /// Replaces the object id.
    fn set_id(&mut self, id: ObjectId);
}

/// Types that can be stored by the store.
///
/// Implementors declare their class name, storage policy and persisted
/// properties, and convert to and from a property map.
///
/// # Example
///
/// ```rust,ignore
/// use shelfdb_core::{Identifiable, Persistent, PropertyList, CoreResult};
/// use shelfdb_codec::{ObjectId, Value};
/// use std::collections::BTreeMap;
///
/// struct Planet {
///     id: ObjectId,
///     name: String,
/// }
///
/// impl Identifiable for Planet {
///     fn id(&self) -> ObjectId { self.id.clone() }
///     fn set_id(&mut self, id: ObjectId) { self.id = id; }
/// }
///
/// impl Persistent for Planet {
///     const CLASS: &'static str = "Planet";
///
///     fn properties() -> PropertyList {
///         PropertyList::new(["name"])
///     }
///
///     fn to_properties(&self) -> BTreeMap<String, Value> {
///         BTreeMap::from([("name".into(), Value::from(self.name.as_str()))])
///     }
///
///     fn from_properties(id: ObjectId, props: &BTreeMap<String, Value>) -> CoreResult<Self> {
///         Ok(Planet { id, name: shelfdb_core::schema::text(Self::CLASS, props, "name")? })
///     }
/// }
/// ```
pub trait Persistent: Identifiable + Sized {
    /// Class name; also the base name of the class's resources.
    const CLASS: &'static str;

    /// Policy used when registered with `Store::register`.
    const POLICY: StoragePolicy = StoragePolicy::ClassFile;

    /// Declared persisted properties.
    fn properties() -> PropertyList;

    /// Current property values.
    fn to_properties(&self) -> BTreeMap<String, Value>;

    /// Rebuilds a value from stored properties.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if a property is missing or mistyped.
    fn from_properties(id: ObjectId, properties: &BTreeMap<String, Value>) -> CoreResult<Self>;

    /// Converts to a dynamic object.
    fn to_object(&self) -> Object {
        Object {
            class: Self::CLASS.to_string(),
            id: self.id(),
            properties: self.to_properties(),
        }
    }

    /// Converts from a dynamic object of this class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] on a class mismatch or a bad property.
    fn from_object(object: &Object) -> CoreResult<Self> {
        if object.class != Self::CLASS {
            return Err(CoreError::schema(
                Self::CLASS,
                format!("object {} has class {}", object.id, object.class),
            ));
        }
        Self::from_properties(object.id.clone(), &object.properties)
    }
}

/// Reads a required text property.
///
/// # Errors
///
/// Returns [`CoreError::Schema`] if the property is missing or not text.
pub fn text(class: &str, properties: &BTreeMap<String, Value>, name: &str) -> CoreResult<String> {
    match properties.get(name) {
        Some(Value::Text(s)) => Ok(s.clone()),
        Some(other) => Err(mistyped(class, name, "text", other)),
        None => Err(missing(class, name)),
    }
}

/// Reads a required integer property.
///
/// # Errors
///
/// Returns [`CoreError::Schema`] if the property is missing or not an integer.
pub fn integer(class: &str, properties: &BTreeMap<String, Value>, name: &str) -> CoreResult<i64> {
    match properties.get(name) {
        Some(Value::Integer(n)) => Ok(*n),
        Some(other) => Err(mistyped(class, name, "integer", other)),
        None => Err(missing(class, name)),
    }
}

/// Reads an optional property; `Null` counts as absent.
#[must_use]
pub fn optional<'a>(properties: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a Value> {
    properties.get(name).filter(|v| !v.is_null())
}

fn missing(class: &str, name: &str) -> CoreError {
    CoreError::schema(class, format!("missing property {name}"))
}

fn mistyped(class: &str, name: &str, expected: &str, found: &Value) -> CoreError {
    CoreError::schema(
        class,
        format!("property {name}: expected {expected}, found {}", found.type_name()),
    )
}

/// The declared persisted properties of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyList {
    names: Option<Vec<String>>,
}

impl PropertyList {
    /// Declares the given property names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names: Some(names) }
    }

    /// Accepts any property; projection keeps objects as they are.
    #[must_use]
    pub const fn any() -> Self {
        Self { names: None }
    }

    /// Declared names, or `None` for an open list.
    #[must_use]
    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    /// Returns true if `name` is persisted.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names
            .as_ref()
            .map_or(true, |names| names.binary_search_by(|n| n.as_str().cmp(name)).is_ok())
    }

    /// Keeps declared properties only and fills missing ones with `Null`.
    #[must_use]
    pub fn project(&self, object: Object) -> Object {
        let Some(names) = &self.names else {
            return object;
        };
        let Object {
            class,
            id,
            mut properties,
        } = object;
        let properties = names
            .iter()
            .map(|name| {
                let value = properties.remove(name).unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect();
        Object {
            class,
            id,
            properties,
        }
    }
}

impl Default for PropertyList {
    fn default() -> Self {
        Self::any()
    }
}

/// Registration of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSchema {
    /// How the class maps onto files.
    pub policy: StoragePolicy,
    /// Persisted properties.
    pub properties: PropertyList,
}

/// Class name to schema map.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: RwLock<HashMap<String, ClassSchema>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a class.
    pub fn register(&self, class: impl Into<String>, policy: StoragePolicy, properties: PropertyList) {
        self.classes
            .write()
            .insert(class.into(), ClassSchema { policy, properties });
    }

    /// Changes the policy of a registered class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not registered.
    pub fn set_policy(&self, class: &str, policy: StoragePolicy) -> CoreResult<()> {
        let mut classes = self.classes.write();
        let schema = classes
            .get_mut(class)
            .ok_or_else(|| CoreError::unknown_class(class))?;
        schema.policy = policy;
        Ok(())
    }

    /// The schema of a class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not registered.
    pub fn schema(&self, class: &str) -> CoreResult<ClassSchema> {
        self.classes
            .read()
            .get(class)
            .cloned()
            .ok_or_else(|| CoreError::unknown_class(class))
    }

    /// The policy of a class.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if the class is not registered.
    pub fn policy(&self, class: &str) -> CoreResult<StoragePolicy> {
        self.schema(class).map(|s| s.policy)
    }

    /// Registered class names, sorted.
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.classes.read().keys().cloned().collect();
        classes.sort();
        classes
    }

    /// Projects `object` and every embedded object inside it onto their
    /// declared properties.
    ///
    /// Embedded values must be of unregistered or `Embedded` classes; a
    /// persistent class has to be stored on its own and referenced.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownClass`] if `object`'s class is not
    /// registered, or [`CoreError::InvalidPolicy`] for an embedded object of a
    /// persistent class.
    pub fn project(&self, object: Object) -> CoreResult<Object> {
        let schema = self.schema(&object.class)?;
        self.project_with(object, &schema)
    }

    fn project_with(&self, object: Object, schema: &ClassSchema) -> CoreResult<Object> {
        let mut object = schema.properties.project(object);
        for value in object.properties.values_mut() {
            self.project_value(value)?;
        }
        Ok(object)
    }

    fn project_value(&self, value: &mut Value) -> CoreResult<()> {
        match value {
            Value::Embedded(inner) => {
                let class = inner.class.clone();
                let Ok(schema) = self.schema(&class) else {
                    return Ok(());
                };
                if schema.policy.is_persistent() {
                    return Err(CoreError::InvalidPolicy {
                        class,
                        policy: schema.policy,
                        operation: "embed",
                    });
                }
                let owned = std::mem::replace(inner.as_mut(), Object::new(class, ""));
                **inner = self.project_with(owned, &schema)?;
            }
            Value::Array(items) => {
                for item in items {
                    self.project_value(item)?;
                }
            }
            Value::Map(entries) => {
                for item in entries.values_mut() {
                    self.project_value(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_drops_undeclared_and_fills_missing() {
        let list = PropertyList::new(["name", "mass"]);
        let object = Object::new("Planet", "1")
            .with("name", "Earth")
            .with("colour", "blue");

        let projected = list.project(object);
        assert_eq!(projected.get("name"), Some(&Value::from("Earth")));
        assert_eq!(projected.get("mass"), Some(&Value::Null));
        assert_eq!(projected.get("colour"), None);
    }

    #[test]
    fn open_list_keeps_everything() {
        let object = Object::new("Planet", "1").with("anything", 1i64);
        assert_eq!(PropertyList::any().project(object.clone()), object);
        assert!(PropertyList::any().contains("whatever"));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.policy("Planet"),
            Err(CoreError::UnknownClass { .. })
        ));
        assert!(matches!(
            registry.set_policy("Planet", StoragePolicy::ClassFile),
            Err(CoreError::UnknownClass { .. })
        ));
    }

    #[test]
    fn set_policy_changes_registration() {
        let registry = SchemaRegistry::new();
        registry.register("Planet", StoragePolicy::ClassFile, PropertyList::any());
        registry
            .set_policy("Planet", StoragePolicy::FragmentedClassFile)
            .unwrap();
        assert_eq!(
            registry.policy("Planet").unwrap(),
            StoragePolicy::FragmentedClassFile
        );
        assert_eq!(registry.classes(), vec!["Planet".to_string()]);
    }

    #[test]
    fn embedded_objects_are_projected() {
        let registry = SchemaRegistry::new();
        registry.register("Planet", StoragePolicy::ClassFile, PropertyList::new(["orbit"]));
        registry.register("Orbit", StoragePolicy::Embedded, PropertyList::new(["period"]));

        let orbit = Object::new("Orbit", "o").with("period", 365i64).with("junk", true);
        let planet = Object::new("Planet", "1").with("orbit", orbit);
        let projected = registry.project(planet).unwrap();

        let inner = projected.get("orbit").and_then(Value::as_embedded).unwrap();
        assert_eq!(inner.get("period"), Some(&Value::Integer(365)));
        assert_eq!(inner.get("junk"), None);
    }

    #[test]
    fn embedding_a_persistent_class_is_rejected() {
        let registry = SchemaRegistry::new();
        registry.register("Planet", StoragePolicy::ClassFile, PropertyList::any());
        let moon = Object::new("Planet", "m");
        let planet = Object::new("Planet", "1").with("moon", moon);
        assert!(matches!(
            registry.project(planet),
            Err(CoreError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn typed_property_helpers() {
        let props = BTreeMap::from([
            ("name".to_string(), Value::from("Earth")),
            ("mass".to_string(), Value::Integer(5972)),
            ("ring".to_string(), Value::Null),
        ]);
        assert_eq!(text("Planet", &props, "name").unwrap(), "Earth");
        assert_eq!(integer("Planet", &props, "mass").unwrap(), 5972);
        assert!(integer("Planet", &props, "name").is_err());
        assert!(text("Planet", &props, "missing").is_err());
        assert!(optional(&props, "ring").is_none());
    }
}
