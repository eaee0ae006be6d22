//! Integration tests for the `ravel` commands over files on disk.

use ravel_bytecode::{access, names, ClassBuilder, ClassUnit, FrameOp, Instr};
use ravel_cli::commands::check::{self, UnitStatus};
use ravel_cli::commands::{dump, instrument};
use ravel_cli::files::{read_unit, unit_path, write_unit, UnitFormat};
use ravel_instrument::InstrumentOptions;
use std::path::Path;

fn worker() -> ClassUnit {
    ClassBuilder::new("app/Worker")
        .default_constructor()
        .method("run", "()V", access::PUBLIC, |m| {
            m.suspendable().yield_now().ret();
        })
        .build()
}

fn plain() -> ClassUnit {
    ClassBuilder::new("app/Plain")
        .method("answer", "()I", access::PUBLIC | access::STATIC, |m| {
            m.iconst(42).ireturn();
        })
        .build()
}

fn sleeper() -> ClassUnit {
    ClassBuilder::new("app/Sleeper")
        .method("nap", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable()
                .lconst(5)
                .invoke_static(names::THREAD, "sleep", "(J)V")
                .yield_now()
                .ret();
        })
        .build()
}

fn args(inputs: &Path, out_dir: &Path) -> instrument::InstrumentArgs {
    instrument::InstrumentArgs {
        inputs: vec![inputs.to_path_buf()],
        out_dir: out_dir.to_path_buf(),
        classpath: Vec::new(),
        options: InstrumentOptions::default(),
    }
}

fn has_frame_code(unit: &ClassUnit, name: &str, desc: &str) -> bool {
    unit.find_method(name, desc)
        .map(|m| m.code.first() == Some(&Instr::Frame(FrameOp::Entry)))
        .unwrap_or(false)
}

// ────────────────────────────────────────────────────────────────────────────
// instrument
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_instrument_transforms_and_copies() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_unit(input.path(), &worker(), UnitFormat::Binary).unwrap();
    write_unit(input.path(), &plain(), UnitFormat::Json).unwrap();

    let report = instrument::execute(&args(input.path(), output.path())).unwrap();
    assert_eq!(report.transformed, vec!["app/Worker".to_string()]);
    assert_eq!(report.copied, vec!["app/Plain".to_string()]);
    assert!(report.failed.is_empty());
    instrument::finish(&report).unwrap();

    let (out, format) =
        read_unit(&unit_path(output.path(), "app/Worker", UnitFormat::Binary)).unwrap();
    assert_eq!(format, UnitFormat::Binary);
    assert!(out.has_marker(names::INSTRUMENTED_MARKER));
    assert!(has_frame_code(&out, "run", "()V"));

    let (copied, format) =
        read_unit(&unit_path(output.path(), "app/Plain", UnitFormat::Json)).unwrap();
    assert_eq!(format, UnitFormat::Json);
    assert_eq!(copied, plain());
}

#[test]
fn test_failing_unit_does_not_stop_the_batch() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_unit(input.path(), &worker(), UnitFormat::Binary).unwrap();
    write_unit(input.path(), &sleeper(), UnitFormat::Binary).unwrap();

    let report = instrument::execute(&args(input.path(), output.path())).unwrap();
    assert_eq!(report.transformed, vec!["app/Worker".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "app/Sleeper");
    assert_eq!(
        report.failed[0].1,
        "Unable to instrument class app/Sleeper#nap()V because of blocking call to sys/Thread#sleep(J)V"
    );
    assert!(unit_path(output.path(), "app/Worker", UnitFormat::Binary).is_file());
    assert!(!unit_path(output.path(), "app/Sleeper", UnitFormat::Binary).exists());
    assert!(instrument::finish(&report).is_err());

    let mut lenient = args(input.path(), output.path());
    lenient.options = InstrumentOptions::default().allow_blocking(true);
    let report = instrument::execute(&lenient).unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.transformed.len(), 2);
}

#[test]
fn test_classpath_supplies_ancestors() {
    let lib = tempfile::tempdir().unwrap();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let base = ClassBuilder::new("lib/Base")
        .default_constructor()
        .method("step", "()V", access::PUBLIC, |m| {
            m.suspendable().yield_now().ret();
        })
        .build();
    write_unit(lib.path(), &base, UnitFormat::Json).unwrap();

    let derived = ClassBuilder::new("app/Derived")
        .extends("lib/Base")
        .default_constructor()
        .method("go", "()V", access::PUBLIC, |m| {
            m.suspendable()
                .aload(0)
                .invoke_virtual("app/Derived", "step", "()V")
                .ret();
        })
        .build();
    write_unit(input.path(), &derived, UnitFormat::Binary).unwrap();

    let mut with_lib = args(input.path(), output.path());
    with_lib.classpath = vec![lib.path().to_path_buf()];
    let report = instrument::execute(&with_lib).unwrap();
    assert_eq!(report.transformed, vec!["app/Derived".to_string()]);

    let (out, _) =
        read_unit(&unit_path(output.path(), "app/Derived", UnitFormat::Binary)).unwrap();
    assert!(has_frame_code(&out, "go", "()V"));
    assert!(!has_frame_code(&out, "<init>", "()V"));
}

#[test]
fn test_missing_input_is_an_error() {
    let output = tempfile::tempdir().unwrap();
    let missing = output.path().join("nope.rvc");
    assert!(instrument::execute(&args(&missing, output.path())).is_err());

    let empty = tempfile::tempdir().unwrap();
    assert!(instrument::execute(&args(empty.path(), output.path())).is_err());
}

// ────────────────────────────────────────────────────────────────────────────
// check / dump
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_check_reports_status() {
    let input = tempfile::tempdir().unwrap();
    let mut marked = worker();
    marked.name = "app/Marked".to_string();
    marked.markers.push(names::INSTRUMENTED_MARKER.to_string());
    let locked = ClassBuilder::new("app/Locked")
        .method("run", "()V", access::PUBLIC | access::SYNCHRONIZED, |m| {
            m.suspendable().ret();
        })
        .build();
    for unit in [worker(), plain(), marked, locked] {
        write_unit(input.path(), &unit, UnitFormat::Json).unwrap();
    }

    let statuses = check::execute(&[input.path().to_path_buf()]).unwrap();
    let lookup = |name: &str| {
        statuses
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
            .unwrap()
    };
    assert_eq!(statuses.len(), 4);
    assert_eq!(lookup("app/Worker"), UnitStatus::NeedsInstrumentation);
    assert_eq!(lookup("app/Plain"), UnitStatus::Clean);
    assert_eq!(lookup("app/Marked"), UnitStatus::AlreadyInstrumented);
    assert!(matches!(lookup("app/Locked"), UnitStatus::Invalid(reason) if reason.ends_with("synchronized method")));
}

#[test]
fn test_dump_formats() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_unit(dir.path(), &worker(), UnitFormat::Binary).unwrap();

    let text = dump::execute(&path, false).unwrap();
    assert!(text.starts_with("class app/Worker extends sys/Object"));
    assert!(text.contains("method run()V"));

    let json = dump::execute(&path, true).unwrap();
    assert_eq!(ClassUnit::from_json(&json).unwrap(), worker());
}
