//! Compiled unit format
//!
//! A [`ClassUnit`] is one compiled type: its ancestry, fields, methods and
//! marker attributes. Units encode to a compact binary form (`.rvc`) guarded
//! by a CRC32 checksum, and also (de)serialize with serde for JSON fixtures.

use crate::encoder::{decode_code, encode_code, BytecodeReader, BytecodeWriter, DecodeError};
use crate::instr::{Instr, Label};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic number for Ravel unit files: "RAVL"
pub const MAGIC: [u8; 4] = *b"RAVL";

/// Current unit format version
pub const VERSION: u32 = 1;

/// Size of the fixed header (magic, version, flags, checksum)
pub const HEADER_SIZE: usize = 16;

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected RAVL, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum of the payload
        actual: u32,
    },

    /// Bytes left over after the unit
    #[error("Trailing data after unit at offset {0}")]
    TrailingData(usize),
}

/// Unit flags
pub mod flags {
    /// Unit carries source file information
    pub const HAS_SOURCE_FILE: u32 = 1 << 0;
}

/// Access flags for types, fields and methods
pub mod access {
    /// Visible everywhere
    pub const PUBLIC: u16 = 0x0001;
    /// Visible to the declaring type only
    pub const PRIVATE: u16 = 0x0002;
    /// Cannot be overridden or reassigned
    pub const FINAL: u16 = 0x0010;
    /// Belongs to the type rather than an instance
    pub const STATIC: u16 = 0x0008;
    /// Runs holding the receiver's monitor
    pub const SYNCHRONIZED: u16 = 0x0020;
    /// Implemented by the host
    pub const NATIVE: u16 = 0x0100;
    /// Type is an interface
    pub const INTERFACE: u16 = 0x0200;
    /// No body
    pub const ABSTRACT: u16 = 0x0400;
}

/// An exception handler range
///
/// Covers instructions from `start` (inclusive) to `end` (exclusive).
/// Handlers are searched in table order and the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryCatchBlock {
    /// First covered position
    pub start: Label,
    /// End of the covered range (exclusive)
    pub end: Label,
    /// Handler entry point
    pub handler: Label,
    /// Caught type, `None` catches everything
    #[serde(default)]
    pub catch_type: Option<String>,
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub desc: String,
    /// Access flags
    #[serde(default)]
    pub access: u16,
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub desc: String,
    /// Access flags
    #[serde(default)]
    pub access: u16,
    /// Declared exception types
    #[serde(default)]
    pub throws: Vec<String>,
    /// Number of local variable slots
    #[serde(default)]
    pub max_locals: u16,
    /// Instructions
    #[serde(default)]
    pub code: Vec<Instr>,
    /// Exception handler table
    #[serde(default)]
    pub handlers: Vec<TryCatchBlock>,
}

impl MethodDef {
    /// Whether the method is static
    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Whether the method is synchronized
    pub fn is_synchronized(&self) -> bool {
        self.access & access::SYNCHRONIZED != 0
    }

    /// Whether the method has no bytecode body
    pub fn is_abstract_or_native(&self) -> bool {
        self.access & (access::ABSTRACT | access::NATIVE) != 0
    }

    /// Whether `ty` appears in the declared exceptions
    pub fn declares(&self, ty: &str) -> bool {
        self.throws.iter().any(|t| t == ty)
    }

    /// Largest label id used in the body, if any
    pub fn max_label(&self) -> Option<u32> {
        let in_code = self.code.iter().flat_map(|i| match i {
            Instr::Label(l) => vec![l.0],
            other => other.branch_targets().into_iter().map(|l| l.0).collect(),
        });
        let in_handlers = self
            .handlers
            .iter()
            .flat_map(|h| [h.start.0, h.end.0, h.handler.0]);
        in_code.chain(in_handlers).max()
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.desc);
        writer.emit_u16(self.access);
        writer.emit_u32(self.throws.len() as u32);
        for t in &self.throws {
            writer.emit_string(t);
        }
        writer.emit_u16(self.max_locals);

        let code = encode_code(&self.code);
        writer.emit_u32(code.len() as u32);
        writer.buffer.extend_from_slice(&code);

        writer.emit_u32(self.handlers.len() as u32);
        for h in &self.handlers {
            writer.emit_u32(h.start.0);
            writer.emit_u32(h.end.0);
            writer.emit_u32(h.handler.0);
            writer.emit_opt_string(h.catch_type.as_deref());
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let desc = reader.read_string()?;
        let access = reader.read_u16()?;
        let throws_count = reader.read_u32()? as usize;
        let mut throws = Vec::with_capacity(throws_count.min(64));
        for _ in 0..throws_count {
            throws.push(reader.read_string()?);
        }
        let max_locals = reader.read_u16()?;

        let code_len = reader.read_u32()? as usize;
        let code = decode_code(&reader.read_bytes(code_len)?)?;

        let handler_count = reader.read_u32()? as usize;
        let mut handlers = Vec::with_capacity(handler_count.min(256));
        for _ in 0..handler_count {
            handlers.push(TryCatchBlock {
                start: Label(reader.read_u32()?),
                end: Label(reader.read_u32()?),
                handler: Label(reader.read_u32()?),
                catch_type: reader.read_opt_string()?,
            });
        }

        Ok(Self {
            name,
            desc,
            access,
            throws,
            max_locals,
            code,
            handlers,
        })
    }
}

/// A compiled type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassUnit {
    /// Type name
    pub name: String,
    /// Direct ancestor, `None` only for the hierarchy root
    #[serde(default)]
    pub super_name: Option<String>,
    /// Access flags
    #[serde(default)]
    pub access: u16,
    /// Implemented interfaces
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Marker attributes
    #[serde(default)]
    pub markers: Vec<String>,
    /// Fields
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Methods
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    /// Source file name
    #[serde(default)]
    pub source_file: Option<String>,
}

impl ClassUnit {
    /// Create an empty unit extending `super_name`
    pub fn new(name: impl Into<String>, super_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            super_name,
            access: access::PUBLIC,
            interfaces: Vec::new(),
            markers: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Whether the unit carries the given marker attribute
    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    /// Whether the unit is an interface
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Find a method by name and descriptor
    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name && m.desc == desc)
    }

    /// Encode the unit to binary format (.rvc)
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Type info: name, super, access, interfaces, markers, source file
    /// - Field table
    /// - Method table (each with code and handler table)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.buffer.extend_from_slice(&MAGIC);
        writer.emit_u32(VERSION);
        let mut unit_flags = 0;
        if self.source_file.is_some() {
            unit_flags |= flags::HAS_SOURCE_FILE;
        }
        writer.emit_u32(unit_flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0); // checksum placeholder

        writer.emit_string(&self.name);
        writer.emit_opt_string(self.super_name.as_deref());
        writer.emit_u16(self.access);
        writer.emit_u32(self.interfaces.len() as u32);
        for i in &self.interfaces {
            writer.emit_string(i);
        }
        writer.emit_u32(self.markers.len() as u32);
        for m in &self.markers {
            writer.emit_string(m);
        }
        if let Some(src) = &self.source_file {
            writer.emit_string(src);
        }

        writer.emit_u32(self.fields.len() as u32);
        for f in &self.fields {
            writer.emit_string(&f.name);
            writer.emit_string(&f.desc);
            writer.emit_u16(f.access);
        }

        writer.emit_u32(self.methods.len() as u32);
        for m in &self.methods {
            m.encode(&mut writer);
        }

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer[HEADER_SIZE..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a unit from binary format
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        let mut reader = BytecodeReader::new(data);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }

        let unit_flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let actual = crc32fast::hash(&data[HEADER_SIZE..]);
        if stored_checksum != actual {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_checksum,
                actual,
            });
        }

        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let access = reader.read_u16()?;
        let iface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(iface_count.min(64));
        for _ in 0..iface_count {
            interfaces.push(reader.read_string()?);
        }
        let marker_count = reader.read_u32()? as usize;
        let mut markers = Vec::with_capacity(marker_count.min(64));
        for _ in 0..marker_count {
            markers.push(reader.read_string()?);
        }
        let source_file = if unit_flags & flags::HAS_SOURCE_FILE != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(1024));
        for _ in 0..field_count {
            fields.push(FieldDef {
                name: reader.read_string()?,
                desc: reader.read_string()?,
                access: reader.read_u16()?,
            });
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(1024));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        if !reader.is_at_end() {
            return Err(UnitError::TrailingData(reader.position()));
        }

        Ok(Self {
            name,
            super_name,
            access,
            interfaces,
            markers,
            fields,
            methods,
            source_file,
        })
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
