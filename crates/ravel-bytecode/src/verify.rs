//! Structural verification of compiled units

use crate::descriptor::{DescriptorError, MethodDescriptor};
use crate::instr::{Instr, Label};
use crate::module::{ClassUnit, MethodDef};
use rustc_hash::FxHashMap;

/// Verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Malformed method descriptor
    #[error("Method {method}: {source}")]
    Descriptor {
        /// Method name
        method: String,
        /// Underlying error
        #[source]
        source: DescriptorError,
    },

    /// Label placed more than once
    #[error("Method {method}: label {label} defined more than once")]
    DuplicateLabel {
        /// Method name
        method: String,
        /// Offending label
        label: Label,
    },

    /// Reference to a label that is never placed
    #[error("Method {method}: undefined label {label}")]
    UndefinedLabel {
        /// Method name
        method: String,
        /// Offending label
        label: Label,
    },

    /// Handler range that ends before it starts
    #[error("Method {method}: handler range {start}..{end} is inverted")]
    InvalidHandlerRange {
        /// Method name
        method: String,
        /// Range start
        start: Label,
        /// Range end
        end: Label,
    },

    /// Local index out of range
    #[error("Method {method}: local {index} out of range (max_locals {max}) at instruction {offset}")]
    InvalidLocalRef {
        /// Method name
        method: String,
        /// Local index
        index: u16,
        /// Declared max_locals
        max: u16,
        /// Instruction index
        offset: usize,
    },

    /// Not enough locals for the receiver and parameters
    #[error("Method {method}: max_locals {max} too small for {needed} parameter slots")]
    InsufficientLocals {
        /// Method name
        method: String,
        /// Declared max_locals
        max: u16,
        /// Required slots
        needed: usize,
    },

    /// Body on an abstract or native method
    #[error("Method {0}: abstract or native method has a body")]
    UnexpectedBody(String),

    /// Execution falls off end
    #[error("Method {method}: execution falls off end at instruction {offset}")]
    FallOffEnd {
        /// Method name
        method: String,
        /// Index of the last instruction
        offset: usize,
    },

    /// Two methods with the same name and descriptor
    #[error("Duplicate method {0}{1}")]
    DuplicateMethod(String, String),
}

/// Verify a unit's methods
pub fn verify_unit(unit: &ClassUnit) -> Result<(), VerifyError> {
    let mut seen = FxHashMap::default();
    for method in &unit.methods {
        if seen
            .insert((method.name.as_str(), method.desc.as_str()), ())
            .is_some()
        {
            return Err(VerifyError::DuplicateMethod(
                method.name.clone(),
                method.desc.clone(),
            ));
        }
        verify_method(method)?;
    }
    Ok(())
}

/// Verify a single method body
pub fn verify_method(method: &MethodDef) -> Result<(), VerifyError> {
    let name = || format!("{}{}", method.name, method.desc);

    let desc = MethodDescriptor::parse(&method.desc).map_err(|source| VerifyError::Descriptor {
        method: name(),
        source,
    })?;

    if method.is_abstract_or_native() {
        if method.code.is_empty() {
            return Ok(());
        }
        return Err(VerifyError::UnexpectedBody(name()));
    }

    // Empty bodies are allowed (declarations only)
    if method.code.is_empty() {
        return Ok(());
    }

    let needed = desc.argument_count() + usize::from(!method.is_static());
    if usize::from(method.max_locals) < needed {
        return Err(VerifyError::InsufficientLocals {
            method: name(),
            max: method.max_locals,
            needed,
        });
    }

    let positions = label_positions(method).map_err(|label| VerifyError::DuplicateLabel {
        method: name(),
        label,
    })?;
    let resolve = |label: Label| {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| VerifyError::UndefinedLabel {
                method: name(),
                label,
            })
    };

    for (offset, instr) in method.code.iter().enumerate() {
        for target in instr.branch_targets() {
            resolve(target)?;
        }
        let index = match instr {
            Instr::Var { index, .. } | Instr::Inc { index, .. } => Some(*index),
            _ => None,
        };
        if let Some(index) = index {
            if index >= method.max_locals {
                return Err(VerifyError::InvalidLocalRef {
                    method: name(),
                    index,
                    max: method.max_locals,
                    offset,
                });
            }
        }
    }

    for h in &method.handlers {
        let start = resolve(h.start)?;
        let end = resolve(h.end)?;
        resolve(h.handler)?;
        if start > end {
            return Err(VerifyError::InvalidHandlerRange {
                method: name(),
                start: h.start,
                end: h.end,
            });
        }
    }

    let last = method
        .code
        .iter()
        .enumerate()
        .rev()
        .find(|(_, i)| !i.is_label());
    match last {
        Some((_, instr)) if instr.opcode().is_terminator() => Ok(()),
        Some((offset, _)) => Err(VerifyError::FallOffEnd {
            method: name(),
            offset,
        }),
        None => Err(VerifyError::FallOffEnd {
            method: name(),
            offset: 0,
        }),
    }
}

/// Map each placed label to its instruction index
fn label_positions(method: &MethodDef) -> Result<FxHashMap<Label, usize>, Label> {
    let mut positions = FxHashMap::default();
    for (i, instr) in method.code.iter().enumerate() {
        if let Instr::Label(l) = instr {
            if positions.insert(*l, i).is_some() {
                return Err(*l);
            }
        }
    }
    Ok(positions)
}
