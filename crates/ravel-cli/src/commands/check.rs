//! `ravel check`: report which units need transformation.

use crate::files::{collect_units, read_unit};
use ravel_instrument::check_unit;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;

/// Check outcome of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Declares suspendable methods and is not marked
    NeedsInstrumentation,
    /// Carries the instrumented marker
    AlreadyInstrumented,
    /// Declares no suspendable method
    Clean,
    /// Rejected by the check pass
    Invalid(String),
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::NeedsInstrumentation => f.write_str("needs instrumentation"),
            UnitStatus::AlreadyInstrumented => f.write_str("already instrumented"),
            UnitStatus::Clean => f.write_str("clean"),
            UnitStatus::Invalid(reason) => write!(f, "invalid: {}", reason),
        }
    }
}

/// Status of every input unit, in path order
pub fn execute(inputs: &[PathBuf]) -> anyhow::Result<Vec<(String, UnitStatus)>> {
    let mut statuses = Vec::new();
    for path in collect_units(inputs)? {
        let (unit, _) = read_unit(&path)?;
        let status = match check_unit(&unit) {
            Ok(check) if check.already_instrumented => UnitStatus::AlreadyInstrumented,
            Ok(check) if check.needs_instrumentation => UnitStatus::NeedsInstrumentation,
            Ok(_) => UnitStatus::Clean,
            Err(e) => UnitStatus::Invalid(e.to_string()),
        };
        statuses.push((unit.name, status));
    }
    Ok(statuses)
}

/// Render the statuses as text lines or a JSON document
pub fn render(statuses: &[(String, UnitStatus)], as_json: bool) -> String {
    if !as_json {
        return statuses
            .iter()
            .map(|(name, status)| format!("{}: {}\n", name, status))
            .collect();
    }
    let units: Vec<_> = statuses
        .iter()
        .map(|(name, status)| {
            let (kind, reason) = match status {
                UnitStatus::NeedsInstrumentation => ("needs-instrumentation", None),
                UnitStatus::AlreadyInstrumented => ("already-instrumented", None),
                UnitStatus::Clean => ("clean", None),
                UnitStatus::Invalid(reason) => ("invalid", Some(reason.as_str())),
            };
            json!({ "class": name, "status": kind, "reason": reason })
        })
        .collect();
    json!({ "units": units }).to_string()
}
