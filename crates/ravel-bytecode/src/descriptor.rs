//! Type and method descriptors
//!
//! Grammar:
//! - field type: `I` `Z` `B` `C` `S` (int category), `J` long, `F` float,
//!   `D` double, `L<name>;` object, `[<type>` array
//! - method: `(<field type>*)<field type or V>`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Descriptor parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Descriptor ended in the middle of a type
    #[error("Unexpected end of descriptor '{0}'")]
    UnexpectedEnd(String),

    /// Unknown type character
    #[error("Invalid type character '{ch}' at offset {offset} in '{desc}'")]
    InvalidChar {
        /// The whole descriptor
        desc: String,
        /// Offending character
        ch: char,
        /// Byte offset
        offset: usize,
    },

    /// Method descriptor missing its parentheses
    #[error("Malformed method descriptor '{0}'")]
    Malformed(String),

    /// Extra characters after a complete descriptor
    #[error("Trailing characters in descriptor '{0}'")]
    Trailing(String),
}

/// A parsed field (value) type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// `I`, `Z`, `B`, `C`, `S`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L<name>;`
    Object(String),
    /// `[<type>`
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let (ty, rest) = parse_field(desc, 0)?;
        if rest != desc.len() {
            return Err(DescriptorError::Trailing(desc.to_string()));
        }
        Ok(ty)
    }

    /// Whether values of this type are references
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Internal name used for flow analysis (`sys/String`, `[I`, ...)
    pub fn internal_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Float => f.write_str("F"),
            FieldType::Double => f.write_str("D"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(elem) => write!(f, "[{}", elem),
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub params: Vec<FieldType>,
    /// Return type, `None` for `V`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(ILsys/String;)J`
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        if !desc.starts_with('(') {
            return Err(DescriptorError::Malformed(desc.to_string()));
        }
        let bytes = desc.as_bytes();
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            match bytes.get(pos) {
                None => return Err(DescriptorError::UnexpectedEnd(desc.to_string())),
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (ty, next) = parse_field(desc, pos)?;
                    params.push(ty);
                    pos = next;
                }
            }
        }

        let ret = match bytes.get(pos) {
            None => return Err(DescriptorError::UnexpectedEnd(desc.to_string())),
            Some(b'V') => {
                pos += 1;
                None
            }
            Some(_) => {
                let (ty, next) = parse_field(desc, pos)?;
                pos = next;
                Some(ty)
            }
        };

        if pos != desc.len() {
            return Err(DescriptorError::Trailing(desc.to_string()));
        }
        Ok(Self { params, ret })
    }

    /// Number of arguments (excluding any receiver)
    pub fn argument_count(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{}", p)?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ty) => write!(f, "{}", ty),
            None => f.write_str("V"),
        }
    }
}

/// Parse one field type starting at `pos`; returns the type and the next offset
fn parse_field(desc: &str, pos: usize) -> Result<(FieldType, usize), DescriptorError> {
    let bytes = desc.as_bytes();
    let Some(&b) = bytes.get(pos) else {
        return Err(DescriptorError::UnexpectedEnd(desc.to_string()));
    };
    match b {
        b'I' | b'Z' | b'B' | b'C' | b'S' => Ok((FieldType::Int, pos + 1)),
        b'J' => Ok((FieldType::Long, pos + 1)),
        b'F' => Ok((FieldType::Float, pos + 1)),
        b'D' => Ok((FieldType::Double, pos + 1)),
        b'L' => {
            let end = desc[pos..]
                .find(';')
                .map(|i| pos + i)
                .ok_or_else(|| DescriptorError::UnexpectedEnd(desc.to_string()))?;
            if end == pos + 1 {
                return Err(DescriptorError::Malformed(desc.to_string()));
            }
            Ok((FieldType::Object(desc[pos + 1..end].to_string()), end + 1))
        }
        b'[' => {
            let (elem, next) = parse_field(desc, pos + 1)?;
            Ok((FieldType::Array(Box::new(elem)), next))
        }
        _ => Err(DescriptorError::InvalidChar {
            desc: desc.to_string(),
            ch: desc[pos..].chars().next().unwrap_or('?'),
            offset: pos,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_method() {
        let md = MethodDescriptor::parse("()V").unwrap();
        assert!(md.params.is_empty());
        assert_eq!(md.ret, None);
    }

    #[test]
    fn test_parse_mixed_params() {
        let md = MethodDescriptor::parse("(IJLsys/String;[D)Z").unwrap();
        assert_eq!(
            md.params,
            vec![
                FieldType::Int,
                FieldType::Long,
                FieldType::Object("sys/String".to_string()),
                FieldType::Array(Box::new(FieldType::Double)),
            ]
        );
        assert_eq!(md.ret, Some(FieldType::Int));
        assert_eq!(md.argument_count(), 4);
        assert_eq!(md.to_string(), "(IJLsys/String;[D)I");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            MethodDescriptor::parse("V"),
            Err(DescriptorError::Malformed(_))
        ));
        assert!(matches!(
            MethodDescriptor::parse("(I"),
            Err(DescriptorError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            MethodDescriptor::parse("(Q)V"),
            Err(DescriptorError::InvalidChar { ch: 'Q', offset: 1, .. })
        ));
        assert!(matches!(
            MethodDescriptor::parse("()VV"),
            Err(DescriptorError::Trailing(_))
        ));
        assert!(MethodDescriptor::parse("(Lsys/String)V").is_err());
    }

    #[test]
    fn test_field_type_names() {
        let ty = FieldType::parse("[Lapp/Node;").unwrap();
        assert!(ty.is_reference());
        assert_eq!(ty.internal_name(), "[Lapp/Node;");
        assert_eq!(FieldType::parse("Lapp/Node;").unwrap().internal_name(), "app/Node");
        assert!(!FieldType::parse("J").unwrap().is_reference());
    }
}
