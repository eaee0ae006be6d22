//! Runtime value representation
//!
//! Primitive categories are stored inline; strings, objects and arrays are
//! reference-counted so that copies share identity.

use crate::object::Object;
use ravel_bytecode::names;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A runtime value
#[derive(Clone, Default)]
pub enum Value {
    /// The null reference
    #[default]
    Null,
    /// int-category primitive
    Int(i32),
    /// long primitive
    Long(i64),
    /// float primitive
    Float(f32),
    /// double primitive
    Double(f64),
    /// Immutable string
    Str(Rc<str>),
    /// Class instance
    Object(Rc<Object>),
    /// Array of values
    Array(Rc<RefCell<Vec<Value>>>),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Create an object value
    pub fn object(obj: Object) -> Self {
        Value::Object(Rc::new(obj))
    }

    /// Create an array value
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Default value for a field or array element descriptor
    pub fn default_for(desc: &str) -> Self {
        match desc.as_bytes().first() {
            Some(b'I' | b'Z' | b'B' | b'C' | b'S') => Value::Int(0),
            Some(b'J') => Value::Long(0),
            Some(b'F') => Value::Float(0.0),
            Some(b'D') => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    /// Check if this value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a reference (null included)
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Str(_) | Value::Object(_) | Value::Array(_)
        )
    }

    /// Get as i32
    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as i64
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as f32
    #[inline]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as f64
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Runtime type name used for dispatch
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Value::Str(_) => Some(names::STRING),
            Value::Object(o) => Some(o.class()),
            Value::Array(_) => Some(names::OBJECT),
            _ => None,
        }
    }

    /// Short type description for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Reference identity (`if_acmpeq`); strings compare by content
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => self.ref_eq(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Value::Null"),
            Value::Int(v) => write!(f, "Value::Int({})", v),
            Value::Long(v) => write!(f, "Value::Long({})", v),
            Value::Float(v) => write!(f, "Value::Float({})", v),
            Value::Double(v) => write!(f, "Value::Double({})", v),
            Value::Str(s) => write!(f, "Value::Str({:?})", s),
            Value::Object(o) => write!(f, "Value::Object({})", o.class()),
            Value::Array(a) => write!(f, "Value::Array(len={})", a.borrow().len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(o) => match o.get_field("message") {
                Some(Value::Str(msg)) => write!(f, "{}: {}", o.class(), msg),
                _ => write!(f, "{}", o.class()),
            },
            Value::Array(a) => write!(f, "[array; {}]", a.borrow().len()),
        }
    }
}
