//! Ravel compiled-unit definitions
//!
//! This crate provides the instruction set, the class/method unit format
//! with its binary codec, method descriptors, structural verification and
//! builders used by the instrumenter and the runtime.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod descriptor;
pub mod encoder;
pub mod instr;
pub mod module;
pub mod names;
pub mod opcode;
pub mod verify;

pub use builder::{ClassBuilder, MethodBuilder};
pub use descriptor::{DescriptorError, FieldType, MethodDescriptor};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use instr::{Constant, FrameOp, Instr, Label, SlotKind};
pub use module::{access, ClassUnit, FieldDef, MethodDef, TryCatchBlock, UnitError};
pub use opcode::Opcode;
pub use verify::{verify_method, verify_unit, VerifyError};

use std::fmt::Write as _;

/// Render a unit as human-readable assembly
pub fn disassemble(unit: &ClassUnit) -> String {
    let mut out = String::new();
    let _ = write!(out, "class {}", unit.name);
    if let Some(parent) = &unit.super_name {
        let _ = write!(out, " extends {}", parent);
    }
    out.push('\n');
    for marker in &unit.markers {
        let _ = writeln!(out, "  @{}", marker);
    }
    for field in &unit.fields {
        let _ = writeln!(out, "  field {}:{} [{:#06x}]", field.name, field.desc, field.access);
    }
    for method in &unit.methods {
        out.push('\n');
        out.push_str(&disassemble_method(method));
    }
    out
}

/// Render one method as human-readable assembly
pub fn disassemble_method(method: &MethodDef) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "  method {}{} [{:#06x}] locals={}",
        method.name, method.desc, method.access, method.max_locals
    );
    if !method.throws.is_empty() {
        let _ = write!(out, " throws {}", method.throws.join(", "));
    }
    out.push('\n');
    for instr in &method.code {
        if instr.is_label() {
            let _ = writeln!(out, "   {}", instr);
        } else {
            let _ = writeln!(out, "      {}", instr);
        }
    }
    for h in &method.handlers {
        let _ = writeln!(
            out,
            "    try {} .. {} -> {} catch {}",
            h.start,
            h.end,
            h.handler,
            h.catch_type.as_deref().unwrap_or("*")
        );
    }
    out
}
