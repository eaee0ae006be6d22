//! Abstract values tracked by the flow analyzer

use crate::database::MethodDatabase;
use ravel_bytecode::{names, FieldType, SlotKind};
use std::fmt;

/// Statically known content of a local or operand stack slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowValue {
    /// Unknown or conflicting content; never read before written
    Uninitialized,
    /// int-category primitive
    Int,
    /// long primitive
    Long,
    /// float primitive
    Float,
    /// double primitive
    Double,
    /// The null constant, type not yet known
    Null,
    /// Reference of the named type (arrays use their descriptor, `[I`)
    Reference(String),
    /// Object allocated by `new` whose constructor has not run yet
    New {
        /// Allocated type
        ty: String,
        /// Index of the `new` instruction
        alloc: usize,
        /// Index of the instruction that produced this copy
        insn: usize,
        /// Whether this copy was produced by `dup`
        dupped: bool,
    },
}

impl FlowValue {
    /// Value of a declared field, parameter or return type
    pub fn from_field_type(ty: &FieldType) -> Self {
        match ty {
            FieldType::Int => FlowValue::Int,
            FieldType::Long => FlowValue::Long,
            FieldType::Float => FlowValue::Float,
            FieldType::Double => FlowValue::Double,
            other => FlowValue::Reference(other.internal_name()),
        }
    }

    /// Parse a field descriptor into a value
    pub fn from_descriptor(desc: &str) -> Option<Self> {
        FieldType::parse(desc).ok().map(|t| Self::from_field_type(&t))
    }

    /// Slot category used to persist this value, if it can be persisted
    pub fn slot_kind(&self) -> Option<SlotKind> {
        match self {
            FlowValue::Int => Some(SlotKind::Int),
            FlowValue::Long => Some(SlotKind::Long),
            FlowValue::Float => Some(SlotKind::Float),
            FlowValue::Double => Some(SlotKind::Double),
            FlowValue::Reference(_) => Some(SlotKind::Ref),
            FlowValue::Uninitialized | FlowValue::Null | FlowValue::New { .. } => None,
        }
    }

    /// Whether this is an object under construction
    pub fn is_new(&self) -> bool {
        matches!(self, FlowValue::New { .. })
    }

    /// Whether this value is a reference (including null and new objects)
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FlowValue::Null | FlowValue::Reference(_) | FlowValue::New { .. }
        )
    }

    /// Least upper bound of two values meeting at a join point
    pub fn merge(&self, other: &FlowValue, db: &MethodDatabase) -> FlowValue {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (FlowValue::Null, FlowValue::Reference(t)) | (FlowValue::Reference(t), FlowValue::Null) => {
                FlowValue::Reference(t.clone())
            }
            (FlowValue::Reference(a), FlowValue::Reference(b)) => {
                if a.starts_with('[') || b.starts_with('[') {
                    return FlowValue::Reference(names::OBJECT.to_string());
                }
                let common = db
                    .common_super_class(a, b)
                    .unwrap_or_else(|| names::OBJECT.to_string());
                FlowValue::Reference(common)
            }
            _ => FlowValue::Uninitialized,
        }
    }

    /// Element value loaded from an array of this type
    pub fn array_element(&self) -> FlowValue {
        match self {
            FlowValue::Reference(ty) => match ty.strip_prefix('[') {
                Some(elem) => FlowValue::from_descriptor(elem)
                    .unwrap_or_else(|| FlowValue::Reference(names::OBJECT.to_string())),
                None => FlowValue::Reference(names::OBJECT.to_string()),
            },
            _ => FlowValue::Reference(names::OBJECT.to_string()),
        }
    }
}

impl fmt::Display for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowValue::Uninitialized => f.write_str("."),
            FlowValue::Int => f.write_str("I"),
            FlowValue::Long => f.write_str("J"),
            FlowValue::Float => f.write_str("F"),
            FlowValue::Double => f.write_str("D"),
            FlowValue::Null => f.write_str("null"),
            FlowValue::Reference(ty) => write!(f, "L{};", ty),
            FlowValue::New { ty, dupped, .. } => {
                write!(f, "new {}", ty)?;
                if *dupped {
                    f.write_str(" (dup)")?;
                }
                Ok(())
            }
        }
    }
}
