//! Class instances

use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// A class instance with named fields
///
/// Fields are created on first write; reads of unwritten fields yield `None`
/// and the interpreter substitutes the descriptor's default.
pub struct Object {
    class: String,
    fields: RefCell<FxHashMap<String, Value>>,
}

impl Object {
    /// Create an instance of `class` with no fields set
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: RefCell::new(FxHashMap::default()),
        }
    }

    /// Runtime class name
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Read a field
    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    /// Write a field
    pub fn set_field(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    /// Written fields, sorted by name
    pub fn fields(&self) -> Vec<(String, Value)> {
        let mut fields: Vec<(String, Value)> = self
            .fields
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("fields", &self.fields.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_fields() {
        let obj = Object::new("app/Point");
        assert_eq!(obj.class(), "app/Point");
        assert!(obj.get_field("x").is_none());
        obj.set_field("x", Value::Int(3));
        assert_eq!(obj.get_field("x"), Some(Value::Int(3)));
    }
}
