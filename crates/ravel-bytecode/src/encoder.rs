//! Binary encoding and decoding utilities
//!
//! This module provides the low-level writer/reader used by the unit codec,
//! plus instruction-level encoding. All multi-byte operands are little-endian
//! and strings are length-prefixed UTF-8.

use crate::instr::{Constant, FrameOp, Instr, Label, SlotKind};
use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of the byte stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Invalid frame slot kind
    #[error("Invalid slot kind {0} at offset {1}")]
    InvalidSlotKind(u8, usize),
}

/// Writer for encoding units and instructions
pub struct BytecodeWriter {
    /// Internal buffer
    pub(crate) buffer: Vec<u8>,
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of the output)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit float
    pub fn emit_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit an optional string (presence byte, then the string)
    pub fn emit_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => {
                self.emit_u8(1);
                self.emit_string(s);
            }
            None => self.emit_u8(0),
        }
    }

    /// Overwrite a previously emitted u32
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Emit an opcode byte
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    fn emit_label(&mut self, label: Label) {
        self.emit_u32(label.0);
    }

    // ===== Instruction Emission =====

    /// Emit one instruction with its operands
    pub fn emit_instr(&mut self, instr: &Instr) {
        self.emit_opcode(instr.opcode());
        match instr {
            Instr::Label(l) => self.emit_label(*l),
            Instr::Simple(_) => {}
            Instr::Const(c) => match c {
                Constant::Int(v) => self.emit_i32(*v),
                Constant::Long(v) => self.emit_i64(*v),
                Constant::Float(v) => self.emit_f32(*v),
                Constant::Double(v) => self.emit_f64(*v),
                Constant::Str(s) => self.emit_string(s),
            },
            Instr::Var { index, .. } => self.emit_u16(*index),
            Instr::Inc { index, delta } => {
                self.emit_u16(*index);
                self.emit_i32(*delta);
            }
            Instr::Jump { target, .. } => self.emit_label(*target),
            Instr::Switch {
                low,
                default,
                targets,
            } => {
                self.emit_i32(*low);
                self.emit_label(*default);
                self.emit_u32(targets.len() as u32);
                for t in targets {
                    self.emit_label(*t);
                }
            }
            Instr::Field {
                owner, name, desc, ..
            }
            | Instr::Invoke {
                owner, name, desc, ..
            } => {
                self.emit_string(owner);
                self.emit_string(name);
                self.emit_string(desc);
            }
            Instr::Type { desc, .. } => self.emit_string(desc),
            Instr::Frame(op) => match op {
                FrameOp::Reserve { entry, slots } => {
                    self.emit_u32(*entry);
                    self.emit_u32(*slots);
                }
                FrameOp::Save { kind, slot } | FrameOp::Restore { kind, slot } => {
                    self.emit_u8(kind.to_u8());
                    self.emit_u32(*slot);
                }
                FrameOp::Entry | FrameOp::Release | FrameOp::Suspend => {}
            },
        }
    }
}

/// Reader for decoding units and instructions
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether all input has been consumed
    pub fn is_at_end(&self) -> bool {
        self.position >= self.buffer.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a 32-bit float
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read an optional string
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_u8()? != 0 {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read an opcode
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, self.position - 1))
    }

    fn read_label(&mut self) -> Result<Label, DecodeError> {
        Ok(Label(self.read_u32()?))
    }

    fn read_slot_kind(&mut self) -> Result<SlotKind, DecodeError> {
        let byte = self.read_u8()?;
        SlotKind::from_u8(byte).ok_or(DecodeError::InvalidSlotKind(byte, self.position - 1))
    }

    // ===== Instruction Decoding =====

    /// Read one instruction with its operands
    pub fn read_instr(&mut self) -> Result<Instr, DecodeError> {
        let op = self.read_opcode()?;
        let instr = match op {
            Opcode::Label => Instr::Label(self.read_label()?),
            Opcode::IConst => Instr::Const(Constant::Int(self.read_i32()?)),
            Opcode::LConst => Instr::Const(Constant::Long(self.read_i64()?)),
            Opcode::FConst => Instr::Const(Constant::Float(self.read_f32()?)),
            Opcode::DConst => Instr::Const(Constant::Double(self.read_f64()?)),
            Opcode::SConst => Instr::Const(Constant::Str(self.read_string()?)),
            Opcode::ILoad
            | Opcode::LLoad
            | Opcode::FLoad
            | Opcode::DLoad
            | Opcode::ALoad
            | Opcode::IStore
            | Opcode::LStore
            | Opcode::FStore
            | Opcode::DStore
            | Opcode::AStore => Instr::Var {
                op,
                index: self.read_u16()?,
            },
            Opcode::IInc => Instr::Inc {
                index: self.read_u16()?,
                delta: self.read_i32()?,
            },
            _ if op.is_jump() => Instr::Jump {
                op,
                target: self.read_label()?,
            },
            Opcode::TableSwitch => {
                let low = self.read_i32()?;
                let default = self.read_label()?;
                let count = self.read_u32()? as usize;
                let mut targets = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    targets.push(self.read_label()?);
                }
                Instr::Switch {
                    low,
                    default,
                    targets,
                }
            }
            Opcode::GetField | Opcode::PutField | Opcode::GetStatic | Opcode::PutStatic => {
                Instr::Field {
                    op,
                    owner: self.read_string()?,
                    name: self.read_string()?,
                    desc: self.read_string()?,
                }
            }
            _ if op.is_invoke() => Instr::Invoke {
                op,
                owner: self.read_string()?,
                name: self.read_string()?,
                desc: self.read_string()?,
            },
            Opcode::New | Opcode::CheckCast | Opcode::InstanceOf | Opcode::NewArray => {
                Instr::Type {
                    op,
                    desc: self.read_string()?,
                }
            }
            Opcode::FrameEntry => Instr::Frame(FrameOp::Entry),
            Opcode::FrameRelease => Instr::Frame(FrameOp::Release),
            Opcode::FrameSuspend => Instr::Frame(FrameOp::Suspend),
            Opcode::FrameReserve => Instr::Frame(FrameOp::Reserve {
                entry: self.read_u32()?,
                slots: self.read_u32()?,
            }),
            Opcode::FrameSave => Instr::Frame(FrameOp::Save {
                kind: self.read_slot_kind()?,
                slot: self.read_u32()?,
            }),
            Opcode::FrameRestore => Instr::Frame(FrameOp::Restore {
                kind: self.read_slot_kind()?,
                slot: self.read_u32()?,
            }),
            _ => Instr::Simple(op),
        };
        Ok(instr)
    }
}

/// Encode an instruction sequence
pub fn encode_code(code: &[Instr]) -> Vec<u8> {
    let mut writer = BytecodeWriter::with_capacity(code.len() * 4);
    for instr in code {
        writer.emit_instr(instr);
    }
    writer.into_bytes()
}

/// Decode an instruction sequence occupying all of `bytes`
pub fn decode_code(bytes: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    let mut reader = BytecodeReader::new(bytes);
    let mut code = Vec::new();
    while !reader.is_at_end() {
        code.push(reader.read_instr()?);
    }
    Ok(code)
}
