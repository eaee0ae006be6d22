//! Abstract frames: locals plus operand stack at one program point

use super::value::FlowValue;
use crate::database::MethodDatabase;
use std::fmt;

/// State of locals and operand stack before an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Local variable slots, `max_locals` long
    pub locals: Vec<FlowValue>,
    /// Operand stack, bottom first
    pub stack: Vec<FlowValue>,
}

impl Frame {
    /// Frame with `max_locals` uninitialized locals and an empty stack
    pub fn new(max_locals: usize) -> Self {
        Self {
            locals: vec![FlowValue::Uninitialized; max_locals],
            stack: Vec::new(),
        }
    }

    /// Push onto the operand stack
    pub fn push(&mut self, value: FlowValue) {
        self.stack.push(value);
    }

    /// Pop from the operand stack
    pub fn pop(&mut self) -> Result<FlowValue, String> {
        self.stack
            .pop()
            .ok_or_else(|| "operand stack underflow".to_string())
    }

    /// Pop `count` values, discarding them
    pub fn pop_n(&mut self, count: usize) -> Result<(), String> {
        if self.stack.len() < count {
            return Err("operand stack underflow".to_string());
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    /// Top of the operand stack
    pub fn peek(&self) -> Result<&FlowValue, String> {
        self.stack
            .last()
            .ok_or_else(|| "operand stack underflow".to_string())
    }

    /// Read a local
    pub fn local(&self, index: u16) -> Result<&FlowValue, String> {
        self.locals
            .get(index as usize)
            .ok_or_else(|| format!("local {} out of range", index))
    }

    /// Write a local
    pub fn set_local(&mut self, index: u16, value: FlowValue) -> Result<(), String> {
        let slot = self
            .locals
            .get_mut(index as usize)
            .ok_or_else(|| format!("local {} out of range", index))?;
        *slot = value;
        Ok(())
    }

    /// Replace every copy of the allocation made at `alloc` with a plain reference
    pub fn initialize(&mut self, alloc: usize, ty: &str) {
        for value in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if matches!(value, FlowValue::New { alloc: a, .. } if *a == alloc) {
                *value = FlowValue::Reference(ty.to_string());
            }
        }
    }

    /// Merge `other` into this frame, returning whether anything changed
    pub fn merge(&mut self, other: &Frame, db: &MethodDatabase) -> Result<bool, String> {
        if self.stack.len() != other.stack.len() {
            return Err(format!(
                "incompatible stack heights {} and {}",
                self.stack.len(),
                other.stack.len()
            ));
        }
        let mut changed = false;
        let pairs = self
            .locals
            .iter_mut()
            .zip(other.locals.iter())
            .chain(self.stack.iter_mut().zip(other.stack.iter()));
        for (mine, theirs) in pairs {
            let merged = mine.merge(theirs, db);
            if merged != *mine {
                *mine = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.locals.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str("] {")?;
        for (i, v) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str("}")
    }
}
