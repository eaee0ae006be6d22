//! Ravel coroutine instrumentation
//!
//! Classifies methods as suspendable and rewrites their bodies so a running
//! coroutine can be suspended in the middle of a call chain and later
//! re-entered at the same point.
//!
//! # Architecture
//!
//! ```text
//! ClassUnit ──► MethodDatabase::check_class ──► work list
//!                        │
//!                        ▼
//!              ClassInstrumenter::instrument
//!                        │ per suspendable method
//!                        ▼
//!   analysis::analyze ──► MethodInstrumenter ──► re-entrant MethodDef
//! ```
//!
//! A method is suspendable when its declared exceptions include
//! `ravel/SuspendExecution`. Calls to suspendable methods are the points at
//! which a transformed body may be left and re-entered.
//!
//! # Example
//!
//! ```
//! use ravel_bytecode::{access, ClassBuilder};
//! use ravel_instrument::{ClassInstrumenter, InstrumentOptions, MethodDatabase};
//!
//! let unit = ClassBuilder::new("app/Ticker")
//!     .method("tick", "()V", access::PUBLIC | access::STATIC, |m| {
//!         m.suspendable().yield_now().ret();
//!     })
//!     .build();
//!
//! let db = MethodDatabase::new(InstrumentOptions::default());
//! assert!(db.check_class(&unit).unwrap());
//! let out = ClassInstrumenter::new(&db).instrument(&unit).unwrap();
//! assert!(out.has_marker("ravel/Instrumented"));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod class;
pub mod database;
pub mod error;
pub mod log;
pub mod method;
pub mod options;

pub use class::{check_unit, CheckResult, ClassInstrumenter};
pub use database::{ClassEntry, ClassResolver, MethodDatabase, NoResolver};
pub use error::{InstrumentError, InstrumentResult};
pub use log::{CapturingLog, Log, LogLevel, TracingLog};
pub use method::{instrument_method, MethodInstrumenter, SlotAction, SuspensionPoint};
pub use options::InstrumentOptions;
