//! `ravel instrument`: transform a batch of units.
//!
//! Every input is checked first so the database knows the whole batch
//! before any body is analysed. Queued units are then transformed and the
//! rest are copied through unchanged.

use crate::classpath::ClasspathResolver;
use crate::files::{collect_units, read_unit, write_unit, UnitFormat};
use anyhow::bail;
use ravel_bytecode::ClassUnit;
use ravel_instrument::{ClassInstrumenter, InstrumentOptions, MethodDatabase, TracingLog};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Arguments of `ravel instrument`
#[derive(Debug, Clone)]
pub struct InstrumentArgs {
    pub inputs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub classpath: Vec<PathBuf>,
    pub options: InstrumentOptions,
}

/// Outcome of one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstrumentReport {
    /// Units written in transformed form
    pub transformed: Vec<String>,
    /// Units written unchanged
    pub copied: Vec<String>,
    /// Units that could not be transformed, with the reason
    pub failed: Vec<(String, String)>,
}

struct Input {
    path: PathBuf,
    unit: ClassUnit,
    format: UnitFormat,
}

pub fn execute(args: &InstrumentArgs) -> anyhow::Result<InstrumentReport> {
    let files = collect_units(&args.inputs)?;
    if files.is_empty() {
        bail!("No input units found");
    }
    let inputs = files
        .into_iter()
        .map(|path| {
            let (unit, format) = read_unit(&path)?;
            Ok(Input { path, unit, format })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let db = MethodDatabase::new(args.options)
        .with_resolver(ClasspathResolver::new(args.classpath.clone()))
        .with_log(TracingLog);
    let mut report = InstrumentReport::default();
    let mut rejected = FxHashSet::default();

    for input in &inputs {
        if let Err(e) = db.check_class(&input.unit) {
            db.error(&format!("Failed to check {}", input.path.display()), &e);
            report.failed.push((input.unit.name.clone(), e.to_string()));
            rejected.insert(input.unit.name.clone());
        }
    }
    let queued: FxHashSet<String> = db.work_list().into_iter().collect();
    info!(units = inputs.len(), queued = queued.len(), "check pass complete");

    let instrumenter = ClassInstrumenter::new(&db);
    for input in &inputs {
        let name = &input.unit.name;
        if rejected.contains(name) {
            continue;
        }
        if !queued.contains(name) {
            emit(&args.out_dir, &input.unit, input.format)?;
            report.copied.push(name.clone());
            continue;
        }
        match instrumenter.instrument(&input.unit) {
            Ok(out) => {
                emit(&args.out_dir, &out, input.format)?;
                report.transformed.push(name.clone());
            }
            Err(e) => {
                db.error(&format!("Failed to instrument {}", input.path.display()), &e);
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }

    info!(
        transformed = report.transformed.len(),
        copied = report.copied.len(),
        failed = report.failed.len(),
        "instrumentation complete"
    );
    Ok(report)
}

fn emit(out_dir: &Path, unit: &ClassUnit, format: UnitFormat) -> anyhow::Result<()> {
    let path = write_unit(out_dir, unit, format)?;
    debug!(class = %unit.name, path = %path.display(), "wrote unit");
    Ok(())
}

/// Print the report and turn failures into an error exit
pub fn finish(report: &InstrumentReport) -> anyhow::Result<()> {
    println!(
        "Instrumented {} unit(s), copied {} unit(s)",
        report.transformed.len(),
        report.copied.len()
    );
    for (_, reason) in &report.failed {
        eprintln!("error: {}", reason);
    }
    if !report.failed.is_empty() {
        bail!("{} unit(s) could not be instrumented", report.failed.len());
    }
    Ok(())
}
