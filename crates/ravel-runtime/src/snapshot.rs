//! Portable snapshots of suspended coroutines
//!
//! Between runs a coroutine is fully described by its [`Stack`]: the frame
//! descriptors and both slot buffers. A [`StackSnapshot`] holds them as plain
//! serde data. References are flattened into a heap table, so a value shared
//! by several slots (or an object that refers back to itself) is restored
//! with the same shape.
//!
//! Coroutine-local variables and the body are not captured; the body is
//! supplied again when a snapshot is restored.
//!
//! [`Stack`]: crate::Stack

use crate::object::Object;
use crate::stack::FrameDescriptor;
use crate::value::Value;
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// A slot or field value inside a snapshot
///
/// Floating-point values are kept as raw bits so every pattern survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SnapshotValue {
    /// The null reference
    Null,
    /// int-category primitive
    Int(i32),
    /// long primitive
    Long(i64),
    /// float bits
    Float(u32),
    /// double bits
    Double(u64),
    /// String contents
    Str(String),
    /// Index into the heap table
    Ref(usize),
}

/// An object or array reachable from the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeapEntry {
    /// Class instance with its written fields
    Object {
        /// Runtime class name
        class: String,
        /// Fields sorted by name
        fields: Vec<(String, SnapshotValue)>,
    },
    /// Array elements
    Array {
        /// Elements in order
        items: Vec<SnapshotValue>,
    },
}

/// Captured state of a [`Stack`](crate::Stack)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSnapshot {
    pub(crate) frames: Vec<FrameDescriptor>,
    pub(crate) top: usize,
    pub(crate) prim: Vec<u64>,
    pub(crate) refs: Vec<SnapshotValue>,
    pub(crate) heap: Vec<HeapEntry>,
}

impl StackSnapshot {
    /// Number of captured frame descriptors
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Number of distinct objects and arrays reachable from the slots
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }
}

/// Lifecycle point a coroutine snapshot was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Never run
    New,
    /// Paused at a suspension point
    Suspended,
}

/// Captured state of a [`Coroutine`](crate::Coroutine) between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoroutineSnapshot {
    pub(crate) state: SnapshotState,
    pub(crate) stack: StackSnapshot,
}

impl CoroutineSnapshot {
    /// State the coroutine was in
    pub fn state(&self) -> SnapshotState {
        self.state
    }

    /// The captured stack
    pub fn stack(&self) -> &StackSnapshot {
        &self.stack
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse from JSON
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ===== Heap Flattening =====

/// Flattens reference values into a heap table, keeping identity
#[derive(Default)]
pub(crate) struct HeapWriter {
    heap: Vec<HeapEntry>,
    seen: FxHashMap<usize, usize>,
}

impl HeapWriter {
    pub fn value(&mut self, value: &Value) -> SnapshotValue {
        match value {
            Value::Null => SnapshotValue::Null,
            Value::Int(v) => SnapshotValue::Int(*v),
            Value::Long(v) => SnapshotValue::Long(*v),
            Value::Float(v) => SnapshotValue::Float(v.to_bits()),
            Value::Double(v) => SnapshotValue::Double(v.to_bits()),
            Value::Str(s) => SnapshotValue::Str(s.to_string()),
            Value::Object(obj) => {
                let key = Rc::as_ptr(obj) as usize;
                if let Some(&index) = self.seen.get(&key) {
                    return SnapshotValue::Ref(index);
                }
                let index = self.reserve(key);
                let fields = obj
                    .fields()
                    .into_iter()
                    .map(|(name, v)| (name, self.value(&v)))
                    .collect();
                self.heap[index] = HeapEntry::Object {
                    class: obj.class().to_string(),
                    fields,
                };
                SnapshotValue::Ref(index)
            }
            Value::Array(items) => {
                let key = Rc::as_ptr(items) as usize;
                if let Some(&index) = self.seen.get(&key) {
                    return SnapshotValue::Ref(index);
                }
                let index = self.reserve(key);
                let elements: Vec<Value> = items.borrow().clone();
                let items = elements.iter().map(|v| self.value(v)).collect();
                self.heap[index] = HeapEntry::Array { items };
                SnapshotValue::Ref(index)
            }
        }
    }

    // placeholder until the entry's contents are flattened
    fn reserve(&mut self, key: usize) -> usize {
        let index = self.heap.len();
        self.heap.push(HeapEntry::Array { items: Vec::new() });
        self.seen.insert(key, index);
        index
    }

    pub fn finish(self) -> Vec<HeapEntry> {
        self.heap
    }
}

/// Rebuilds the objects and arrays of a heap table
pub(crate) struct HeapReader {
    values: Vec<Value>,
}

impl HeapReader {
    /// Allocate every entry first, then fill them, so cycles resolve
    pub fn new(heap: &[HeapEntry]) -> VmResult<Self> {
        let values: Vec<Value> = heap
            .iter()
            .map(|entry| match entry {
                HeapEntry::Object { class, .. } => Value::object(Object::new(class.as_str())),
                HeapEntry::Array { items } => Value::array(Vec::with_capacity(items.len())),
            })
            .collect();
        let reader = Self { values };

        for (entry, value) in heap.iter().zip(&reader.values) {
            match (entry, value) {
                (HeapEntry::Object { fields, .. }, Value::Object(obj)) => {
                    for (name, field) in fields {
                        obj.set_field(name, reader.value(field)?);
                    }
                }
                (HeapEntry::Array { items }, Value::Array(array)) => {
                    let items = items
                        .iter()
                        .map(|item| reader.value(item))
                        .collect::<VmResult<Vec<_>>>()?;
                    *array.borrow_mut() = items;
                }
                _ => return Err(VmError::Snapshot("heap entry kind mismatch".to_string())),
            }
        }
        Ok(reader)
    }

    pub fn value(&self, value: &SnapshotValue) -> VmResult<Value> {
        Ok(match value {
            SnapshotValue::Null => Value::Null,
            SnapshotValue::Int(v) => Value::Int(*v),
            SnapshotValue::Long(v) => Value::Long(*v),
            SnapshotValue::Float(bits) => Value::Float(f32::from_bits(*bits)),
            SnapshotValue::Double(bits) => Value::Double(f64::from_bits(*bits)),
            SnapshotValue::Str(s) => Value::string(s),
            SnapshotValue::Ref(index) => self.values.get(*index).cloned().ok_or_else(|| {
                VmError::Snapshot(format!("heap reference {} out of range", index))
            })?,
        })
    }
}
