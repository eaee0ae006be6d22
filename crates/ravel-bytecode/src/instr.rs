//! Structured instructions
//!
//! Method bodies are sequences of [`Instr`]. Branch targets and handler
//! bounds refer to symbolic [`Label`]s placed in the sequence with
//! [`Instr::Label`], so code can be spliced without offset fixups.

use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A symbolic code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// An inline constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// String literal
    Str(String),
}

impl Constant {
    /// The opcode that pushes this constant
    pub fn opcode(&self) -> Opcode {
        match self {
            Constant::Int(_) => Opcode::IConst,
            Constant::Long(_) => Opcode::LConst,
            Constant::Float(_) => Opcode::FConst,
            Constant::Double(_) => Opcode::DConst,
            Constant::Str(_) => Opcode::SConst,
        }
    }
}

/// Value category of a coroutine frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// int-category primitive
    Int,
    /// long primitive
    Long,
    /// float primitive
    Float,
    /// double primitive
    Double,
    /// reference
    Ref,
}

impl SlotKind {
    /// Whether the slot lives in the reference buffer
    pub fn is_reference(self) -> bool {
        self == SlotKind::Ref
    }

    /// Encoding byte
    pub fn to_u8(self) -> u8 {
        match self {
            SlotKind::Int => 0,
            SlotKind::Long => 1,
            SlotKind::Float => 2,
            SlotKind::Double => 3,
            SlotKind::Ref => 4,
        }
    }

    /// Decode from an encoding byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SlotKind::Int),
            1 => Some(SlotKind::Long),
            2 => Some(SlotKind::Float),
            3 => Some(SlotKind::Double),
            4 => Some(SlotKind::Ref),
            _ => None,
        }
    }

    /// Local load opcode for this kind
    pub fn load_opcode(self) -> Opcode {
        match self {
            SlotKind::Int => Opcode::ILoad,
            SlotKind::Long => Opcode::LLoad,
            SlotKind::Float => Opcode::FLoad,
            SlotKind::Double => Opcode::DLoad,
            SlotKind::Ref => Opcode::ALoad,
        }
    }

    /// Local store opcode for this kind
    pub fn store_opcode(self) -> Opcode {
        match self {
            SlotKind::Int => Opcode::IStore,
            SlotKind::Long => Opcode::LStore,
            SlotKind::Float => Opcode::FStore,
            SlotKind::Double => Opcode::DStore,
            SlotKind::Ref => Opcode::AStore,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SlotKind::Int => "int",
            SlotKind::Long => "long",
            SlotKind::Float => "float",
            SlotKind::Double => "double",
            SlotKind::Ref => "ref",
        }
    }
}

/// Coroutine frame operations, emitted only by the instrumenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOp {
    /// Push the resume index of the entered frame (0 on first entry)
    Entry,
    /// Record `entry` as the frame's resume index and reserve `slots` slots
    Reserve {
        /// Resume index to record
        entry: u32,
        /// Slots needed by the frame
        slots: u32,
    },
    /// Release the current frame
    Release,
    /// Pop a value into a slot
    Save {
        /// Slot category
        kind: SlotKind,
        /// Slot index within the frame
        slot: u32,
    },
    /// Push a value from a slot
    Restore {
        /// Slot category
        kind: SlotKind,
        /// Slot index within the frame
        slot: u32,
    },
    /// Raise the suspension signal
    Suspend,
}

impl FrameOp {
    /// Opcode of this frame operation
    pub fn opcode(&self) -> Opcode {
        match self {
            FrameOp::Entry => Opcode::FrameEntry,
            FrameOp::Reserve { .. } => Opcode::FrameReserve,
            FrameOp::Release => Opcode::FrameRelease,
            FrameOp::Save { .. } => Opcode::FrameSave,
            FrameOp::Restore { .. } => Opcode::FrameRestore,
            FrameOp::Suspend => Opcode::FrameSuspend,
        }
    }
}

/// A single instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    /// Position marker
    Label(Label),
    /// Instruction without operands
    Simple(Opcode),
    /// Push a constant
    Const(Constant),
    /// Local load or store
    Var {
        /// Load/store opcode
        op: Opcode,
        /// Local index
        index: u16,
    },
    /// Increment an int local
    Inc {
        /// Local index
        index: u16,
        /// Signed increment
        delta: i32,
    },
    /// Conditional or unconditional jump
    Jump {
        /// Jump opcode
        op: Opcode,
        /// Target label
        target: Label,
    },
    /// Dense switch on the int on top of the stack
    Switch {
        /// Key of the first target
        low: i32,
        /// Target for keys outside `low..low + targets.len()`
        default: Label,
        /// Targets for consecutive keys starting at `low`
        targets: Vec<Label>,
    },
    /// Field access
    Field {
        /// Field opcode
        op: Opcode,
        /// Declaring type
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        desc: String,
    },
    /// Method invocation
    Invoke {
        /// Invoke opcode
        op: Opcode,
        /// Declaring type
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        desc: String,
    },
    /// Type operation (`new`, `checkcast`, `instanceof`, `newarray`)
    Type {
        /// Type opcode
        op: Opcode,
        /// Type name or element descriptor
        desc: String,
    },
    /// Coroutine frame operation
    Frame(FrameOp),
}

impl Instr {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Label(_) => Opcode::Label,
            Instr::Simple(op) => *op,
            Instr::Const(c) => c.opcode(),
            Instr::Var { op, .. } => *op,
            Instr::Inc { .. } => Opcode::IInc,
            Instr::Jump { op, .. } => *op,
            Instr::Switch { .. } => Opcode::TableSwitch,
            Instr::Field { op, .. } => *op,
            Instr::Invoke { op, .. } => *op,
            Instr::Type { op, .. } => *op,
            Instr::Frame(f) => f.opcode(),
        }
    }

    /// Build an invoke instruction
    pub fn invoke(op: Opcode, owner: &str, name: &str, desc: &str) -> Self {
        Instr::Invoke {
            op,
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }

    /// Build a local load/store
    pub fn var(op: Opcode, index: u16) -> Self {
        Instr::Var { op, index }
    }

    /// Whether this is a label pseudo-instruction
    pub fn is_label(&self) -> bool {
        matches!(self, Instr::Label(_))
    }

    /// Labels this instruction may transfer control to
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Instr::Jump { target, .. } => vec![*target],
            Instr::Switch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Label(l) => write!(f, "{}:", l),
            Instr::Simple(op) => write!(f, "{}", op),
            Instr::Const(Constant::Int(v)) => write!(f, "iconst {}", v),
            Instr::Const(Constant::Long(v)) => write!(f, "lconst {}", v),
            Instr::Const(Constant::Float(v)) => write!(f, "fconst {}", v),
            Instr::Const(Constant::Double(v)) => write!(f, "dconst {}", v),
            Instr::Const(Constant::Str(s)) => write!(f, "sconst {:?}", s),
            Instr::Var { op, index } => write!(f, "{} {}", op, index),
            Instr::Inc { index, delta } => write!(f, "iinc {} {}", index, delta),
            Instr::Jump { op, target } => write!(f, "{} {}", op, target),
            Instr::Switch {
                low,
                default,
                targets,
            } => {
                write!(f, "tableswitch {} default {} [", low, default)?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                f.write_str("]")
            }
            Instr::Field {
                op,
                owner,
                name,
                desc,
            } => write!(f, "{} {}.{}:{}", op, owner, name, desc),
            Instr::Invoke {
                op,
                owner,
                name,
                desc,
            } => write!(f, "{} {}.{}{}", op, owner, name, desc),
            Instr::Type { op, desc } => write!(f, "{} {}", op, desc),
            Instr::Frame(FrameOp::Reserve { entry, slots }) => {
                write!(f, "frame.reserve {} {}", entry, slots)
            }
            Instr::Frame(FrameOp::Save { kind, slot }) => {
                write!(f, "frame.save {} {}", kind.name(), slot)
            }
            Instr::Frame(FrameOp::Restore { kind, slot }) => {
                write!(f, "frame.restore {} {}", kind.name(), slot)
            }
            Instr::Frame(op) => write!(f, "{}", op.opcode()),
        }
    }
}
