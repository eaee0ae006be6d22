//! Class-level orchestration
//!
//! [`check_unit`] is the cheap pass: it looks only at method headers and
//! markers. [`ClassInstrumenter`] is the transforming pass applied to the
//! classes the check pass queued.

use crate::database::{ClassEntry, MethodDatabase};
use crate::error::{InstrumentError, InstrumentResult};
use crate::log::LogLevel;
use crate::method::MethodInstrumenter;
use ravel_bytecode::{names, ClassUnit, MethodDef};

/// Outcome of the check pass for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Suspendability of every declared method
    pub entry: ClassEntry,
    /// Whether any method declares the suspension signal
    pub needs_instrumentation: bool,
    /// Whether the unit carries the instrumented marker
    pub already_instrumented: bool,
}

/// Scan a unit's method headers
///
/// # Errors
///
/// Fails for a suspendable `synchronized` method.
pub fn check_unit(unit: &ClassUnit) -> InstrumentResult<CheckResult> {
    let mut needs_instrumentation = false;
    for method in &unit.methods {
        if !is_suspendable(method) {
            continue;
        }
        if method.is_synchronized() {
            return Err(InstrumentError::unable("synchronized method", &unit.name, method));
        }
        needs_instrumentation = true;
    }
    Ok(CheckResult {
        entry: ClassEntry::from_unit(unit),
        needs_instrumentation,
        already_instrumented: unit.has_marker(names::INSTRUMENTED_MARKER),
    })
}

fn is_suspendable(method: &MethodDef) -> bool {
    method.declares(names::SUSPEND_EXECUTION)
}

/// Whether `method` of `class` has a body to transform
fn is_candidate(class: &str, method: &MethodDef) -> bool {
    is_suspendable(method)
        && !method.is_abstract_or_native()
        && !(class == names::COROUTINE && method.name == names::YIELD_NAME)
}

/// Transforming pass over one unit
pub struct ClassInstrumenter<'a> {
    db: &'a MethodDatabase,
}

impl<'a> ClassInstrumenter<'a> {
    /// Create an instrumenter backed by `db`
    pub fn new(db: &'a MethodDatabase) -> Self {
        Self { db }
    }

    /// Transform every suspendable method of `unit`
    ///
    /// Already marked units are copied through unless `force` is set. The
    /// marker is added when at least one method was a candidate.
    ///
    /// # Errors
    ///
    /// The first method that cannot be transformed aborts the unit.
    pub fn instrument(&self, unit: &ClassUnit) -> InstrumentResult<ClassUnit> {
        let check = check_unit(unit)?;
        self.db.record_suspendable_methods(&unit.name, check.entry);

        let candidates = unit
            .methods
            .iter()
            .filter(|m| is_candidate(&unit.name, m))
            .count();
        if candidates == 0 {
            return Ok(unit.clone());
        }
        if check.already_instrumented && !self.db.options().force {
            self.db.log(
                LogLevel::Info,
                format_args!("Skipping already instrumented class: {}", unit.name),
            );
            return Ok(unit.clone());
        }

        let mut out = unit.clone();
        if !check.already_instrumented {
            out.markers.push(names::INSTRUMENTED_MARKER.to_string());
        }
        for (slot, method) in out.methods.iter_mut().zip(&unit.methods) {
            if !is_candidate(&unit.name, method) {
                continue;
            }
            if self.db.is_debug() {
                self.db.log(
                    LogLevel::Info,
                    format_args!("Instrumenting method {}#{}", unit.name, method.name),
                );
            }
            *slot = self.instrument_method(&unit.name, method)?;
        }
        Ok(out)
    }

    fn instrument_method(&self, class: &str, method: &MethodDef) -> InstrumentResult<MethodDef> {
        let mut mi = MethodInstrumenter::new(self.db, class, method)?;
        if !mi.collect_code_blocks()? {
            return Ok(method.clone());
        }
        if names::is_special_method(&method.name) {
            return Err(InstrumentError::unable("special method", class, method));
        }
        mi.emit()
    }
}
