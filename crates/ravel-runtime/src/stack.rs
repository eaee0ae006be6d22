//! Per-coroutine frame stack
//!
//! Instrumented methods persist their live values here before the suspension
//! signal unwinds them, and read them back when the coroutine is resumed.
//!
//! # Memory Layout
//!
//! ```text
//! entries:   [ (resume₀, base₀) | (resume₁, base₁) | (resume₂, base₂) ]
//!                   │                  │                  │
//!                   ▼                  ▼                  ▼
//! prim/ref:  [ slots of frame 0 | slots of frame 1 | slots of frame 2 ]
//! ```
//!
//! Frame `k` owns slots `base_k .. base_{k+1}`. Reserving slots in frame `k`
//! also fixes the base of the frame its next callee will use. Primitive
//! values are stored as raw 64-bit patterns; references live in a parallel
//! buffer that is cleared when the owning frame is released.

use crate::snapshot::{HeapReader, HeapWriter, StackSnapshot};
use crate::{value::Value, VmError, VmResult};
use ravel_bytecode::SlotKind;
use serde::{Deserialize, Serialize};

/// Default number of slots when no size hint is given
pub const DEFAULT_STACK_SIZE: usize = 16;

/// Descriptor of one active instrumented call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// Segment to resume at (0 = method start)
    pub resume_index: u32,
    /// First slot of the frame in both buffers
    pub base: usize,
}

/// Explicit value stack of a coroutine
pub struct Stack {
    entries: Vec<FrameDescriptor>,
    /// Number of frames entered since the last resume
    depth: usize,
    current_base: usize,
    /// End of the slots reserved by the innermost live frame
    top: usize,
    data_prim: Vec<u64>,
    data_ref: Vec<Value>,
}

impl Stack {
    /// Create a stack with room for `initial_size` slots
    ///
    /// # Errors
    ///
    /// Returns `VmError::IllegalArgument` if `initial_size` is zero.
    pub fn new(initial_size: usize) -> VmResult<Self> {
        if initial_size == 0 {
            return Err(VmError::IllegalArgument(
                "stack size must be greater than zero".to_string(),
            ));
        }
        Ok(Self::allocate(initial_size))
    }

    fn allocate(size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(16),
            depth: 0,
            current_base: 0,
            top: 0,
            data_prim: vec![0; size],
            data_ref: vec![Value::Null; size],
        }
    }

    // ========================================================================
    // Frame Operations
    // ========================================================================

    /// Enter the next frame and return its resume index
    ///
    /// Called once at the start of every instrumented method. Returns 0 when
    /// the method is entered fresh and the saved index when it is re-entered
    /// after a suspension.
    pub fn next_entry_index(&mut self) -> u32 {
        let idx = self.depth;
        self.depth += 1;
        match self.entries.get(idx) {
            Some(entry) => {
                self.current_base = entry.base;
                entry.resume_index
            }
            None => {
                // Entered without a reserving caller: start above the live frames
                let base = if idx == 0 { 0 } else { self.top };
                self.entries.push(FrameDescriptor {
                    resume_index: 0,
                    base,
                });
                self.current_base = base;
                0
            }
        }
    }

    /// Record the resume index of the current frame and reserve its slots
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` if no frame has been entered.
    pub fn reserve_frame(&mut self, entry: u32, slots: usize) -> VmResult<()> {
        let idx = self.current_index()?;
        let base = self.entries[idx].base;
        self.entries[idx].resume_index = entry;
        self.current_base = base;
        self.top = base + slots;
        if self.top > self.data_prim.len() {
            self.grow(self.top);
        }

        // The callee about to be invoked starts where this frame ends
        let callee = FrameDescriptor {
            resume_index: 0,
            base: self.top,
        };
        self.entries.truncate(idx + 1);
        self.entries.push(callee);
        Ok(())
    }

    /// Release the current frame
    ///
    /// Clears the frame's reference slots, drops its descriptor and restores
    /// the caller's base.
    ///
    /// # Errors
    ///
    /// Returns `VmError::InvalidState` if no frame has been entered.
    pub fn release_frame(&mut self) -> VmResult<()> {
        let idx = self.current_index()?;
        let base = self.entries[idx].base;
        let end = self.top.max(base).min(self.data_ref.len());
        for slot in &mut self.data_ref[base..end] {
            *slot = Value::Null;
        }
        self.entries.truncate(idx);
        self.depth = idx;
        self.top = base;
        self.current_base = match idx {
            0 => 0,
            _ => self.entries[idx - 1].base,
        };
        Ok(())
    }

    /// Rewind the entry cursor so the next run re-enters from the outermost frame
    pub fn resume_stack(&mut self) {
        self.depth = 0;
        self.current_base = 0;
    }

    fn current_index(&self) -> VmResult<usize> {
        match self.depth {
            0 => Err(VmError::InvalidState("no frame entered".to_string())),
            d if d > self.entries.len() => {
                Err(VmError::InvalidState("frame cursor out of range".to_string()))
            }
            d => Ok(d - 1),
        }
    }

    fn grow(&mut self, required: usize) {
        let mut size = self.data_prim.len().max(1);
        while size < required {
            size *= 2;
        }
        self.data_prim.resize(size, 0);
        self.data_ref.resize(size, Value::Null);
    }

    fn slot_index(&self, slot: u32) -> VmResult<usize> {
        let index = self.current_base + slot as usize;
        if index >= self.data_prim.len() {
            return Err(VmError::InvalidState(format!(
                "slot {} outside reserved frame",
                slot
            )));
        }
        Ok(index)
    }

    // ========================================================================
    // Typed Slot Access
    // ========================================================================

    /// Store an int
    pub fn push_int(&mut self, slot: u32, value: i32) -> VmResult<()> {
        let i = self.slot_index(slot)?;
        self.data_prim[i] = value as i64 as u64;
        Ok(())
    }

    /// Store a long
    pub fn push_long(&mut self, slot: u32, value: i64) -> VmResult<()> {
        let i = self.slot_index(slot)?;
        self.data_prim[i] = value as u64;
        Ok(())
    }

    /// Store a float
    pub fn push_float(&mut self, slot: u32, value: f32) -> VmResult<()> {
        let i = self.slot_index(slot)?;
        self.data_prim[i] = u64::from(value.to_bits());
        Ok(())
    }

    /// Store a double
    pub fn push_double(&mut self, slot: u32, value: f64) -> VmResult<()> {
        let i = self.slot_index(slot)?;
        self.data_prim[i] = value.to_bits();
        Ok(())
    }

    /// Store a reference
    pub fn push_ref(&mut self, slot: u32, value: Value) -> VmResult<()> {
        let i = self.slot_index(slot)?;
        self.data_ref[i] = value;
        Ok(())
    }

    /// Load an int
    pub fn get_int(&self, slot: u32) -> VmResult<i32> {
        Ok(self.data_prim[self.slot_index(slot)?] as i64 as i32)
    }

    /// Load a long
    pub fn get_long(&self, slot: u32) -> VmResult<i64> {
        Ok(self.data_prim[self.slot_index(slot)?] as i64)
    }

    /// Load a float
    pub fn get_float(&self, slot: u32) -> VmResult<f32> {
        Ok(f32::from_bits(self.data_prim[self.slot_index(slot)?] as u32))
    }

    /// Load a double
    pub fn get_double(&self, slot: u32) -> VmResult<f64> {
        Ok(f64::from_bits(self.data_prim[self.slot_index(slot)?]))
    }

    /// Load a reference
    pub fn get_ref(&self, slot: u32) -> VmResult<Value> {
        Ok(self.data_ref[self.slot_index(slot)?].clone())
    }

    /// Store a value by slot kind
    ///
    /// # Errors
    ///
    /// Returns `VmError::TypeError` if the value does not match `kind`.
    pub fn save(&mut self, kind: SlotKind, slot: u32, value: Value) -> VmResult<()> {
        match (kind, value) {
            (SlotKind::Int, Value::Int(v)) => self.push_int(slot, v),
            (SlotKind::Long, Value::Long(v)) => self.push_long(slot, v),
            (SlotKind::Float, Value::Float(v)) => self.push_float(slot, v),
            (SlotKind::Double, Value::Double(v)) => self.push_double(slot, v),
            (SlotKind::Ref, v) if v.is_reference() => self.push_ref(slot, v),
            (kind, v) => Err(VmError::TypeError(format!(
                "cannot save {} into {:?} slot",
                v.type_name(),
                kind
            ))),
        }
    }

    /// Load a value by slot kind
    pub fn restore(&self, kind: SlotKind, slot: u32) -> VmResult<Value> {
        Ok(match kind {
            SlotKind::Int => Value::Int(self.get_int(slot)?),
            SlotKind::Long => Value::Long(self.get_long(slot)?),
            SlotKind::Float => Value::Float(self.get_float(slot)?),
            SlotKind::Double => Value::Double(self.get_double(slot)?),
            SlotKind::Ref => self.get_ref(slot)?,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of frame descriptors currently recorded
    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of frames entered since the last resume
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Current slot capacity of the buffers
    pub fn capacity(&self) -> usize {
        self.data_prim.len()
    }

    /// Frame descriptor at `index`
    pub fn frame(&self, index: usize) -> Option<FrameDescriptor> {
        self.entries.get(index).copied()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Capture the frame descriptors and both slot buffers
    ///
    /// Taken between runs, when the entry cursor is rewound.
    pub fn snapshot(&self) -> StackSnapshot {
        let mut heap = HeapWriter::default();
        let refs = self.data_ref.iter().map(|v| heap.value(v)).collect();
        StackSnapshot {
            frames: self.entries.clone(),
            top: self.top,
            prim: self.data_prim.clone(),
            refs,
            heap: heap.finish(),
        }
    }

    /// Rebuild a stack from a snapshot
    ///
    /// # Errors
    ///
    /// Returns `VmError::Snapshot` if the buffers disagree in size, a frame
    /// lies outside them, or a reference does not resolve.
    pub fn from_snapshot(snapshot: &StackSnapshot) -> VmResult<Self> {
        let size = snapshot.prim.len();
        if size == 0 || snapshot.refs.len() != size {
            return Err(VmError::Snapshot(format!(
                "slot buffers hold {} and {} entries",
                size,
                snapshot.refs.len()
            )));
        }
        if snapshot.top > size {
            return Err(VmError::Snapshot(format!(
                "top {} beyond {} slots",
                snapshot.top, size
            )));
        }
        if let Some(frame) = snapshot.frames.iter().find(|f| f.base > size) {
            return Err(VmError::Snapshot(format!(
                "frame base {} beyond {} slots",
                frame.base, size
            )));
        }

        let heap = HeapReader::new(&snapshot.heap)?;
        let data_ref = snapshot
            .refs
            .iter()
            .map(|v| heap.value(v))
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Self {
            entries: snapshot.frames.clone(),
            depth: 0,
            current_base: 0,
            top: snapshot.top,
            data_prim: snapshot.prim.clone(),
            data_ref,
        })
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::allocate(DEFAULT_STACK_SIZE)
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("entries", &self.entries)
            .field("depth", &self.depth)
            .field("current_base", &self.current_base)
            .field("capacity", &self.capacity())
            .finish()
    }
}
