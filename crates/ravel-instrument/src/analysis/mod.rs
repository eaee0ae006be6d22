//! Type and flow analysis
//!
//! Computes, for every instruction of a method, what is statically known
//! about each local and operand stack slot: its value category, whether it
//! holds `null`, and whether it is an object whose constructor has not run.
//! The transformation engine reads these frames at suspension boundaries to
//! decide what must be persisted.

mod analyzer;
mod frame;
mod value;

pub use analyzer::analyze;
pub use frame::Frame;
pub use value::FlowValue;
