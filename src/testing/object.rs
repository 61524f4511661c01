//! Objects of the scripted host
//!
//! YAML sequences become arrays (items keyed from 1). Mappings become
//! objects; a few reserved keys shape them:
//!
//! ```yaml
//! point:
//!   __class: Point      # class name (default "Object")
//!   __base: { ... }     # base object
//!   __items: [...]      # enumerated items; a mapping gives string keys
//!   __enum: true        # list items under <enum> instead of inline
//!   x: 1                # everything else is a member
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde_yaml::Value as Yaml;

use crate::engine::{DebugObject, Key, ObjectRef, Value};

const CLASS_KEY: &str = "__class";
const BASE_KEY: &str = "__base";
const ITEMS_KEY: &str = "__items";
const ENUM_KEY: &str = "__enum";

/// A mutable object with members, items and an optional base
pub struct ScriptObject {
    class: String,
    members: RefCell<Vec<(String, Value)>>,
    items: RefCell<Vec<(Key, Value)>>,
    base: Option<ObjectRef>,
    inline: bool,
}

impl ScriptObject {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            members: RefCell::new(Vec::new()),
            items: RefCell::new(Vec::new()),
            base: None,
            inline: true,
        }
    }

    /// An array of `values`, keyed from 1
    pub fn array(values: Vec<Value>) -> Self {
        let object = Self::new("Array");
        object.items.replace(
            values
                .into_iter()
                .zip(1..)
                .map(|(value, i)| (Key::Index(i), value))
                .collect(),
        );
        object
    }

    pub fn with_base(mut self, base: ObjectRef) -> Self {
        self.base = Some(base);
        self
    }

    /// Group items under `<enum>` instead of listing them inline
    pub fn enumerated(mut self) -> Self {
        self.inline = false;
        self
    }

    pub fn set_member(&self, name: &str, value: Value) {
        let mut members = self.members.borrow_mut();
        match members.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, slot)) => *slot = value,
            None => members.push((name.to_string(), value)),
        }
    }

    pub fn set_item(&self, key: Key, value: Value) {
        let mut items = self.items.borrow_mut();
        match items.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => items.push((key, value)),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(Rc::new(self))
    }
}

impl DebugObject for ScriptObject {
    fn class_name(&self) -> String {
        self.class.clone()
    }

    fn properties(&self) -> Vec<(String, Value)> {
        self.members.borrow().clone()
    }

    fn items(&self) -> Vec<(Key, Value)> {
        self.items.borrow().clone()
    }

    fn items_inline(&self) -> bool {
        self.inline
    }

    fn base(&self) -> Option<ObjectRef> {
        self.base.clone()
    }

    fn set(&self, key: &Key, value: Value) -> Result<(), String> {
        match key {
            Key::Name(name) => self.set_member(name, value),
            other => self.set_item(other.clone(), value),
        }
        Ok(())
    }
}

fn yaml_key(key: &Yaml) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a YAML value into a script value
pub fn value_from_yaml(yaml: &Yaml) -> Value {
    match yaml {
        Yaml::Null => Value::Undefined,
        Yaml::Bool(b) => Value::Integer(*b as i64),
        Yaml::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        Yaml::String(s) => Value::String(s.clone()),
        Yaml::Sequence(seq) => ScriptObject::array(seq.iter().map(value_from_yaml).collect()).into_value(),
        Yaml::Mapping(map) => object_from_mapping(map).into_value(),
        Yaml::Tagged(tagged) => value_from_yaml(&tagged.value),
    }
}

fn object_from_mapping(map: &serde_yaml::Mapping) -> ScriptObject {
    let class = map
        .get(CLASS_KEY)
        .and_then(Yaml::as_str)
        .unwrap_or("Object");
    let mut object = ScriptObject::new(class);

    if let Some(base) = map.get(BASE_KEY) {
        if let Value::Object(base) = value_from_yaml(base) {
            object = object.with_base(base);
        }
    }
    if map.get(ENUM_KEY).and_then(Yaml::as_bool).unwrap_or(false) {
        object = object.enumerated();
    }
    match map.get(ITEMS_KEY) {
        Some(Yaml::Sequence(seq)) => {
            for (value, i) in seq.iter().zip(1..) {
                object.set_item(Key::Index(i), value_from_yaml(value));
            }
        }
        Some(Yaml::Mapping(items)) => {
            for (key, value) in items {
                object.set_item(Key::Str(yaml_key(key)), value_from_yaml(value));
            }
        }
        _ => {}
    }

    for (key, value) in map {
        let name = yaml_key(key);
        if [CLASS_KEY, BASE_KEY, ITEMS_KEY, ENUM_KEY].contains(&name.as_str()) {
            continue;
        }
        object.set_member(&name, value_from_yaml(value));
    }
    object
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        value_from_yaml(&serde_yaml::from_str(text).unwrap())
    }

    #[test]
    fn test_scalars() {
        assert_eq!(yaml("42"), Value::Integer(42));
        assert_eq!(yaml("1.5"), Value::Float(1.5));
        assert_eq!(yaml("hello"), Value::from("hello"));
        assert_eq!(yaml("~"), Value::Undefined);
        assert_eq!(yaml("true"), Value::Integer(1));
    }

    #[test]
    fn test_sequence_is_array() {
        let value = yaml("[a, b]");
        let obj = value.as_object().unwrap();
        assert_eq!(obj.class_name(), "Array");
        assert!(obj.properties().is_empty());
        assert_eq!(
            obj.items(),
            vec![(Key::Index(1), Value::from("a")), (Key::Index(2), Value::from("b"))]
        );
    }

    #[test]
    fn test_mapping_with_reserved_keys() {
        let value = yaml(
            r#"
__class: Map
__enum: true
__base: { __class: Prototype, kind: base }
__items: { one: 1, two: 2 }
size: 2
"#,
        );
        let obj = value.as_object().unwrap();
        assert_eq!(obj.class_name(), "Map");
        assert!(!obj.items_inline());
        assert_eq!(obj.properties(), vec![("size".to_string(), Value::Integer(2))]);
        assert_eq!(obj.get(&Key::Str("two".into())), Some(Value::Integer(2)));
        assert_eq!(obj.base().unwrap().class_name(), "Prototype");
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let obj = ScriptObject::new("Object");
        obj.set(&Key::Name("a".into()), Value::Integer(1)).unwrap();
        obj.set(&Key::Name("A".into()), Value::Integer(2)).unwrap();
        obj.set(&Key::Index(5), Value::from("x")).unwrap();
        assert_eq!(obj.properties(), vec![("a".to_string(), Value::Integer(2))]);
        assert_eq!(obj.items(), vec![(Key::Index(5), Value::from("x"))]);
    }
}
