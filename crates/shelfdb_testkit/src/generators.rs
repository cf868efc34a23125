//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random objects and operation
//! sequences that keep the store's naming rules.

use proptest::prelude::*;
use shelfdb_codec::{Object, ObjectId, ObjectRef, Value};
use std::collections::BTreeMap;

/// Strategy for generating object ids, including ones that need escaping in
/// file names.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9 _./-]{0,15}")
        .expect("Invalid regex")
        .prop_map(ObjectId::new)
}

/// Strategy for generating class names.
pub fn class_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating property names.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating property values, nested up to a small depth.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        ".{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        (class_name_strategy(), object_id_strategy())
            .prop_map(|(class, id)| Value::Ref(ObjectRef::new(class, id))),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(property_name_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating property maps.
pub fn properties_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(property_name_strategy(), value_strategy(), 0..6)
}

/// Strategy for generating objects of `class`.
pub fn object_strategy(class: &str) -> impl Strategy<Value = Object> {
    let class = class.to_string();
    (object_id_strategy(), properties_strategy()).prop_map(move |(id, properties)| Object {
        class: class.clone(),
        id,
        properties,
    })
}

/// Strategy for generating objects of `class` with distinct ids.
pub fn distinct_objects_strategy(
    class: &str,
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<Object>> {
    prop::collection::btree_map(object_id_strategy(), properties_strategy(), min..max).prop_map({
        let class = class.to_string();
        move |objects| {
            objects
                .into_iter()
                .map(|(id, properties)| Object {
                    class: class.clone(),
                    id,
                    properties,
                })
                .collect()
        }
    })
}

/// One step of a generated workload over a small id space.
#[derive(Debug, Clone)]
pub enum ObjectOperation {
    /// Insert an object.
    Save {
        /// Object id.
        id: ObjectId,
        /// `name` property.
        name: String,
    },
    /// Replace an object.
    Update {
        /// Object id.
        id: ObjectId,
        /// `name` property.
        name: String,
    },
    /// Delete an object.
    Delete {
        /// Object id.
        id: ObjectId,
    },
    /// Read an object.
    Load {
        /// Object id.
        id: ObjectId,
    },
}

/// Strategy for generating ids out of a small space so operations collide.
pub fn small_id_strategy(space: u64) -> impl Strategy<Value = ObjectId> {
    (0..space).prop_map(ObjectId::from)
}

/// Strategy for generating object operations.
pub fn object_operation_strategy(space: u64) -> impl Strategy<Value = ObjectOperation> {
    let name = || prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex");
    prop_oneof![
        3 => (small_id_strategy(space), name())
            .prop_map(|(id, name)| ObjectOperation::Save { id, name }),
        2 => (small_id_strategy(space), name())
            .prop_map(|(id, name)| ObjectOperation::Update { id, name }),
        1 => small_id_strategy(space).prop_map(|id| ObjectOperation::Delete { id }),
        2 => small_id_strategy(space).prop_map(|id| ObjectOperation::Load { id }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    space: u64,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<ObjectOperation>> {
    prop::collection::vec(object_operation_strategy(space), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
