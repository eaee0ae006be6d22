//! Bytecode opcodes for Ravel compiled units
//!
//! All opcodes are single-byte. Operands live in the structured
//! [`Instr`](crate::instr::Instr) that carries the opcode, and are written after
//! the opcode byte when a unit is encoded.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Constants
//! - 0x10-0x1F: Local variables
//! - 0x20-0x2F: Stack manipulation
//! - 0x30-0x3F: Integer and long arithmetic
//! - 0x40-0x4F: Float and double arithmetic
//! - 0x50-0x5F: Conversions
//! - 0x60-0x77: Control flow
//! - 0x78-0x7F: Returns
//! - 0x80-0x87: Field access
//! - 0x88-0x8F: Method invocation
//! - 0x90-0x9F: Objects, exceptions and monitors
//! - 0xA0-0xAF: Arrays
//! - 0xE0-0xEF: Coroutine frame operations (emitted by the instrumenter)
//! - 0xFE: Label pseudo-instruction

macro_rules! opcodes {
    ($($(#[$doc:meta])* $variant:ident = $value:literal => $name:literal,)*) => {
        /// Bytecode opcode enumeration
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum Opcode {
            $($(#[$doc])* $variant = $value,)*
        }

        impl Opcode {
            /// Convert a byte to an opcode
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            /// Get the mnemonic of this opcode
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// All defined opcodes, in encoding order
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];
        }
    };
}

opcodes! {
    // ===== Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00 => "nop",
    /// Push null
    AConstNull = 0x01 => "aconst_null",
    /// Push i32 constant (operand: i32)
    IConst = 0x02 => "iconst",
    /// Push i64 constant (operand: i64)
    LConst = 0x03 => "lconst",
    /// Push f32 constant (operand: f32)
    FConst = 0x04 => "fconst",
    /// Push f64 constant (operand: f64)
    DConst = 0x05 => "dconst",
    /// Push string constant (operand: string)
    SConst = 0x06 => "sconst",

    // ===== Local Variables (0x10-0x1F) =====
    /// Load int local (operand: u16 index)
    ILoad = 0x10 => "iload",
    /// Load long local
    LLoad = 0x11 => "lload",
    /// Load float local
    FLoad = 0x12 => "fload",
    /// Load double local
    DLoad = 0x13 => "dload",
    /// Load reference local
    ALoad = 0x14 => "aload",
    /// Store int local (operand: u16 index)
    IStore = 0x15 => "istore",
    /// Store long local
    LStore = 0x16 => "lstore",
    /// Store float local
    FStore = 0x17 => "fstore",
    /// Store double local
    DStore = 0x18 => "dstore",
    /// Store reference local
    AStore = 0x19 => "astore",
    /// Increment int local (operands: u16 index, i32 delta)
    IInc = 0x1A => "iinc",

    // ===== Stack Manipulation (0x20-0x2F) =====
    /// Pop top value
    Pop = 0x20 => "pop",
    /// Duplicate top value
    Dup = 0x21 => "dup",
    /// Duplicate top value and insert it below the second value
    DupX1 = 0x22 => "dup_x1",
    /// Swap top two values
    Swap = 0x23 => "swap",

    // ===== Integer & Long Arithmetic (0x30-0x3F) =====
    /// Int addition: pop b, pop a, push a + b
    IAdd = 0x30 => "iadd",
    /// Int subtraction
    ISub = 0x31 => "isub",
    /// Int multiplication
    IMul = 0x32 => "imul",
    /// Int division
    IDiv = 0x33 => "idiv",
    /// Int remainder
    IRem = 0x34 => "irem",
    /// Int negation
    INeg = 0x35 => "ineg",
    /// Long addition
    LAdd = 0x38 => "ladd",
    /// Long subtraction
    LSub = 0x39 => "lsub",
    /// Long multiplication
    LMul = 0x3A => "lmul",
    /// Long division
    LDiv = 0x3B => "ldiv",
    /// Long remainder
    LRem = 0x3C => "lrem",
    /// Long negation
    LNeg = 0x3D => "lneg",
    /// Long compare: push -1, 0 or 1
    LCmp = 0x3E => "lcmp",

    // ===== Float & Double Arithmetic (0x40-0x4F) =====
    /// Float addition
    FAdd = 0x40 => "fadd",
    /// Float subtraction
    FSub = 0x41 => "fsub",
    /// Float multiplication
    FMul = 0x42 => "fmul",
    /// Float division
    FDiv = 0x43 => "fdiv",
    /// Float negation
    FNeg = 0x44 => "fneg",
    /// Float compare: push -1, 0 or 1 (NaN compares as -1)
    FCmp = 0x45 => "fcmp",
    /// Double addition
    DAdd = 0x48 => "dadd",
    /// Double subtraction
    DSub = 0x49 => "dsub",
    /// Double multiplication
    DMul = 0x4A => "dmul",
    /// Double division
    DDiv = 0x4B => "ddiv",
    /// Double negation
    DNeg = 0x4C => "dneg",
    /// Double compare: push -1, 0 or 1 (NaN compares as -1)
    DCmp = 0x4D => "dcmp",

    // ===== Conversions (0x50-0x5F) =====
    /// int -> long
    I2L = 0x50 => "i2l",
    /// int -> float
    I2F = 0x51 => "i2f",
    /// int -> double
    I2D = 0x52 => "i2d",
    /// long -> int
    L2I = 0x53 => "l2i",
    /// long -> float
    L2F = 0x54 => "l2f",
    /// long -> double
    L2D = 0x55 => "l2d",
    /// float -> int
    F2I = 0x56 => "f2i",
    /// float -> double
    F2D = 0x57 => "f2d",
    /// double -> int
    D2I = 0x58 => "d2i",
    /// double -> long
    D2L = 0x59 => "d2l",

    // ===== Control Flow (0x60-0x77) =====
    /// Jump if int == 0 (operand: label)
    IfEq = 0x60 => "ifeq",
    /// Jump if int != 0
    IfNe = 0x61 => "ifne",
    /// Jump if int < 0
    IfLt = 0x62 => "iflt",
    /// Jump if int >= 0
    IfGe = 0x63 => "ifge",
    /// Jump if int > 0
    IfGt = 0x64 => "ifgt",
    /// Jump if int <= 0
    IfLe = 0x65 => "ifle",
    /// Jump if a == b (ints)
    IfICmpEq = 0x66 => "if_icmpeq",
    /// Jump if a != b (ints)
    IfICmpNe = 0x67 => "if_icmpne",
    /// Jump if a < b (ints)
    IfICmpLt = 0x68 => "if_icmplt",
    /// Jump if a >= b (ints)
    IfICmpGe = 0x69 => "if_icmpge",
    /// Jump if a > b (ints)
    IfICmpGt = 0x6A => "if_icmpgt",
    /// Jump if a <= b (ints)
    IfICmpLe = 0x6B => "if_icmple",
    /// Jump if references are identical
    IfACmpEq = 0x6C => "if_acmpeq",
    /// Jump if references differ
    IfACmpNe = 0x6D => "if_acmpne",
    /// Jump if reference is null
    IfNull = 0x6E => "ifnull",
    /// Jump if reference is not null
    IfNonNull = 0x6F => "ifnonnull",
    /// Unconditional jump
    Goto = 0x70 => "goto",
    /// Dense switch (operands: i32 low, default label, target labels)
    TableSwitch = 0x71 => "tableswitch",

    // ===== Returns (0x78-0x7F) =====
    /// Return int
    IReturn = 0x78 => "ireturn",
    /// Return long
    LReturn = 0x79 => "lreturn",
    /// Return float
    FReturn = 0x7A => "freturn",
    /// Return double
    DReturn = 0x7B => "dreturn",
    /// Return reference
    AReturn = 0x7C => "areturn",
    /// Return void
    Return = 0x7D => "return",

    // ===== Field Access (0x80-0x87) =====
    /// Read instance field (operands: owner, name, descriptor)
    GetField = 0x80 => "getfield",
    /// Write instance field
    PutField = 0x81 => "putfield",
    /// Read static field
    GetStatic = 0x82 => "getstatic",
    /// Write static field
    PutStatic = 0x83 => "putstatic",

    // ===== Method Invocation (0x88-0x8F) =====
    /// Virtual call (operands: owner, name, descriptor)
    InvokeVirtual = 0x88 => "invokevirtual",
    /// Non-virtual call (constructors, private and super calls)
    InvokeSpecial = 0x89 => "invokespecial",
    /// Static call
    InvokeStatic = 0x8A => "invokestatic",
    /// Interface call
    InvokeInterface = 0x8B => "invokeinterface",

    // ===== Objects, Exceptions & Monitors (0x90-0x9F) =====
    /// Allocate an instance (operand: type name); must be initialized by `<init>`
    New = 0x90 => "new",
    /// Checked reference cast (operand: type name)
    CheckCast = 0x91 => "checkcast",
    /// Type test (operand: type name)
    InstanceOf = 0x92 => "instanceof",
    /// Throw the exception on top of the stack
    AThrow = 0x93 => "athrow",
    /// Enter the monitor of the object on top of the stack
    MonitorEnter = 0x94 => "monitorenter",
    /// Exit the monitor of the object on top of the stack
    MonitorExit = 0x95 => "monitorexit",

    // ===== Arrays (0xA0-0xAF) =====
    /// Allocate an array (operand: element type descriptor)
    NewArray = 0xA0 => "newarray",
    /// Push array length
    ArrayLength = 0xA1 => "arraylength",
    /// Load reference element
    AALoad = 0xA2 => "aaload",
    /// Store reference element
    AAStore = 0xA3 => "aastore",
    /// Load int element
    IALoad = 0xA4 => "iaload",
    /// Store int element
    IAStore = 0xA5 => "iastore",

    // ===== Coroutine Frame Operations (0xE0-0xEF) =====
    /// Enter a frame of the active coroutine stack, push its resume index
    FrameEntry = 0xE0 => "frame.entry",
    /// Record the resume index and reserve slots (operands: u32 entry, u32 slots)
    FrameReserve = 0xE1 => "frame.reserve",
    /// Release the current frame
    FrameRelease = 0xE2 => "frame.release",
    /// Pop a value into a frame slot (operands: u8 kind, u32 slot)
    FrameSave = 0xE3 => "frame.save",
    /// Push a value from a frame slot (operands: u8 kind, u32 slot)
    FrameRestore = 0xE4 => "frame.restore",
    /// Raise the suspension signal
    FrameSuspend = 0xE5 => "frame.suspend",

    // ===== Pseudo Instructions =====
    /// Label marker (operand: u32 label id)
    Label = 0xFE => "label",
}

impl Opcode {
    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this opcode is a conditional or unconditional jump to a label
    pub fn is_jump(self) -> bool {
        (Opcode::IfEq.to_u8()..=Opcode::Goto.to_u8()).contains(&self.to_u8())
    }

    /// Check if this opcode is a conditional branch (falls through when not taken)
    pub fn is_conditional_jump(self) -> bool {
        self.is_jump() && self != Opcode::Goto
    }

    /// Check if this opcode is a method invocation
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Opcode::InvokeVirtual
                | Opcode::InvokeSpecial
                | Opcode::InvokeStatic
                | Opcode::InvokeInterface
        )
    }

    /// Check if this opcode returns from the current method
    pub fn is_return(self) -> bool {
        matches!(
            self,
            Opcode::IReturn
                | Opcode::LReturn
                | Opcode::FReturn
                | Opcode::DReturn
                | Opcode::AReturn
                | Opcode::Return
        )
    }

    /// Check if execution never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return()
            || matches!(
                self,
                Opcode::Goto | Opcode::TableSwitch | Opcode::AThrow | Opcode::FrameSuspend
            )
    }

    /// Check if this opcode is one of the coroutine frame operations
    pub fn is_frame_op(self) -> bool {
        (0xE0..=0xEF).contains(&self.to_u8())
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x0F), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::InvokeStatic.name(), "invokestatic");
        assert_eq!(Opcode::FrameReserve.name(), "frame.reserve");
        assert_eq!(Opcode::IfICmpGe.to_string(), "if_icmpge");
    }

    #[test]
    fn test_jump_detection() {
        assert!(Opcode::Goto.is_jump());
        assert!(Opcode::IfNull.is_jump());
        assert!(Opcode::IfEq.is_conditional_jump());
        assert!(!Opcode::Goto.is_conditional_jump());
        assert!(!Opcode::TableSwitch.is_jump());
        assert!(!Opcode::IAdd.is_jump());
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::Return.is_terminator());
        assert!(Opcode::AThrow.is_terminator());
        assert!(Opcode::TableSwitch.is_terminator());
        assert!(Opcode::FrameSuspend.is_terminator());
        assert!(!Opcode::IfNe.is_terminator());
        assert!(!Opcode::InvokeStatic.is_terminator());
    }

    #[test]
    fn test_frame_ops() {
        assert!(Opcode::FrameEntry.is_frame_op());
        assert!(Opcode::FrameSuspend.is_frame_op());
        assert!(!Opcode::Label.is_frame_op());
    }
}
