//! Integration tests for the check and transform passes

use ravel_bytecode::{
    access, names, verify_unit, ClassBuilder, ClassUnit, FrameOp, Instr, Opcode,
};
use ravel_instrument::{
    CapturingLog, ClassInstrumenter, InstrumentError, InstrumentOptions, LogLevel,
    MethodDatabase, MethodInstrumenter,
};
use std::sync::Arc;

fn library_base() -> ClassUnit {
    ClassBuilder::new("lib/Base")
        .default_constructor()
        .method("step", "()V", access::PUBLIC, |m| {
            m.suspendable().yield_now().ret();
        })
        .method("plain", "()V", access::PUBLIC, |m| {
            m.ret();
        })
        .build()
}

fn library_mid() -> ClassUnit {
    ClassBuilder::new("lib/Mid")
        .extends("lib/Base")
        .default_constructor()
        .build()
}

fn database(options: InstrumentOptions) -> (MethodDatabase, Arc<CapturingLog>) {
    let log = Arc::new(CapturingLog::new());
    let db = MethodDatabase::new(options)
        .with_resolver(|name: &str| match name {
            "lib/Base" => Some(library_base()),
            "lib/Mid" => Some(library_mid()),
            _ => None,
        })
        .with_log(Arc::clone(&log));
    (db, log)
}

fn caller(body: impl FnOnce(&mut ravel_bytecode::MethodBuilder)) -> ClassUnit {
    ClassBuilder::new("app/Caller")
        .method("run", "(Llib/Mid;)V", access::PUBLIC | access::STATIC, body)
        .build()
}

// ===== Batch =====

#[test]
fn test_batch_check_then_transform() {
    let (db, _) = database(InstrumentOptions::default());
    let plain = ClassBuilder::new("app/Plain")
        .method("get", "()I", access::PUBLIC | access::STATIC, |m| {
            m.iconst(7).ireturn();
        })
        .build();
    let worker = ClassBuilder::new("app/Worker")
        .method("run", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable()
                .invoke_static("app/Plain", "get", "()I")
                .istore(0)
                .yield_now()
                .iload(0)
                .op(Opcode::Pop)
                .ret();
        })
        .build();
    let marked = ClassBuilder::new("app/Marked")
        .marker(names::INSTRUMENTED_MARKER)
        .method("run", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable().ret();
        })
        .build();

    assert!(!db.check_class(&plain).unwrap());
    assert!(db.check_class(&worker).unwrap());
    assert!(!db.check_class(&marked).unwrap());
    assert_eq!(db.work_list(), vec!["app/Worker".to_string()]);

    let out = ClassInstrumenter::new(&db).instrument(&worker).unwrap();
    verify_unit(&out).unwrap();
    assert!(out.has_marker(names::INSTRUMENTED_MARKER));

    let decoded = ClassUnit::decode(&out.encode()).unwrap();
    assert_eq!(decoded, out);
}

#[test]
fn test_identity_for_methods_without_boundaries() {
    let (db, _) = database(InstrumentOptions::default());
    let unit = ClassBuilder::new("app/Idle")
        .default_constructor()
        .method("wait", "(I)I", access::PUBLIC, |m| {
            let skip = m.new_label();
            m.suspendable()
                .iload(1)
                .jump(Opcode::IfEq, skip)
                .invoke_static("app/Idle", "helper", "()V");
            m.place(skip).iload(1).ireturn();
        })
        .method("helper", "()V", access::PUBLIC | access::STATIC, |m| {
            m.ret();
        })
        .build();

    db.check_class(&unit).unwrap();
    let out = ClassInstrumenter::new(&db).instrument(&unit).unwrap();
    assert_eq!(out.methods, unit.methods);
}

// ===== Classification =====

#[test]
fn test_inherited_method_is_suspension_point() {
    let (db, log) = database(InstrumentOptions::default());
    let unit = caller(|m| {
        m.suspendable()
            .aload(0)
            .invoke_virtual("lib/Mid", "step", "()V")
            .aload(0)
            .invoke_virtual("lib/Mid", "plain", "()V")
            .ret();
    });
    db.check_class(&unit).unwrap();

    let method = unit.find_method("run", "(Llib/Mid;)V").unwrap();
    let mut mi = MethodInstrumenter::new(&db, "app/Caller", method).unwrap();
    assert!(mi.collect_code_blocks().unwrap());
    let points = mi.suspension_points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].index, 1);
    assert!(!points[0].is_yield);
    assert!(log.messages(LogLevel::Warning).is_empty());
    assert_eq!(db.direct_super_class("lib/Mid").as_deref(), Some("lib/Base"));
}

#[test]
fn test_special_call_does_not_search_ancestors() {
    let (db, log) = database(InstrumentOptions::default());
    let unit = caller(|m| {
        m.suspendable()
            .aload(0)
            .invoke_special("lib/Mid", "step", "()V")
            .ret();
    });
    let method = unit.find_method("run", "(Llib/Mid;)V").unwrap();
    let mut mi = MethodInstrumenter::new(&db, "app/Caller", method).unwrap();
    assert!(mi.collect_code_blocks().unwrap());
    let warnings = log.messages(LogLevel::Warning);
    assert_eq!(
        warnings,
        vec!["Method not found in class - assuming suspendable: lib/Mid#step()V".to_string()]
    );
}

#[test]
fn test_unresolvable_class_fails_open_once() {
    let (db, log) = database(InstrumentOptions::default());
    let unit = ClassBuilder::new("app/Caller")
        .method("run", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable()
                .invoke_static("app/Missing", "work", "()V")
                .invoke_static("app/Missing", "work", "()V")
                .ret();
        })
        .build();
    let method = unit.find_method("run", "()V").unwrap();
    let mut mi = MethodInstrumenter::new(&db, "app/Caller", method).unwrap();
    mi.collect_code_blocks().unwrap();

    assert_eq!(mi.suspension_points().len(), 2);
    assert_eq!(
        log.messages(LogLevel::Warning),
        vec!["Class not found assuming suspendable: app/Missing".to_string()]
    );
}

#[test]
fn test_inherited_platform_method_is_not_a_suspension_point() {
    let (db, log) = database(InstrumentOptions::default());
    let failure = ClassBuilder::new("app/Failure")
        .extends(names::RUNTIME_EXCEPTION)
        .default_constructor()
        .build();
    let unit = ClassBuilder::new("app/Reporter")
        .method("run", "(Lapp/Failure;)V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable()
                .yield_now()
                .aload(0)
                .invoke_virtual("app/Failure", "getMessage", "()Lsys/String;")
                .op(Opcode::Pop)
                .ret();
        })
        .build();
    db.check_class(&failure).unwrap();
    db.check_class(&unit).unwrap();

    let method = unit.find_method("run", "(Lapp/Failure;)V").unwrap();
    let mut mi = MethodInstrumenter::new(&db, "app/Reporter", method).unwrap();
    assert!(mi.collect_code_blocks().unwrap());
    let points = mi.suspension_points();
    assert_eq!(points.len(), 1);
    assert!(points[0].is_yield);
    assert!(log.messages(LogLevel::Warning).is_empty());
}

// ===== Emitted Code =====

#[test]
fn test_dispatch_covers_every_point() {
    let (db, _) = database(InstrumentOptions::default());
    let unit = caller(|m| {
        m.suspendable()
            .aload(0)
            .invoke_virtual("lib/Base", "step", "()V")
            .yield_now()
            .aload(0)
            .invoke_virtual("lib/Base", "step", "()V")
            .ret();
    });
    db.check_class(&unit).unwrap();
    let out = ClassInstrumenter::new(&db).instrument(&unit).unwrap();
    let run = out.find_method("run", "(Llib/Mid;)V").unwrap();

    assert_eq!(run.code[0], Instr::Frame(FrameOp::Entry));
    match &run.code[1] {
        Instr::Switch { low, targets, .. } => {
            assert_eq!(*low, 1);
            assert_eq!(targets.len(), 3);
        }
        other => panic!("expected dispatch switch, got {:?}", other),
    }
    let suspends = run
        .code
        .iter()
        .filter(|i| **i == Instr::Frame(FrameOp::Suspend))
        .count();
    assert_eq!(suspends, 1);
    let reserves: Vec<u32> = run
        .code
        .iter()
        .filter_map(|i| match i {
            Instr::Frame(FrameOp::Reserve { entry, .. }) => Some(*entry),
            _ => None,
        })
        .collect();
    assert_eq!(reserves, vec![1, 2, 3]);

    assert_eq!(
        run.handlers.first().and_then(|h| h.catch_type.as_deref()),
        Some(names::SUSPEND_EXECUTION)
    );
    assert_eq!(run.handlers.last().map(|h| h.catch_type.clone()), Some(None));
    verify_unit(&out).unwrap();
}

#[test]
fn test_every_return_releases_frame() {
    let (db, _) = database(InstrumentOptions::default());
    let unit = ClassBuilder::new("app/Branches")
        .method("pick", "(I)I", access::PUBLIC | access::STATIC, |m| {
            let other = m.new_label();
            m.suspendable()
                .yield_now()
                .iload(0)
                .jump(Opcode::IfEq, other)
                .iconst(1)
                .ireturn();
            m.place(other).iconst(2).ireturn();
        })
        .build();
    db.check_class(&unit).unwrap();
    let out = ClassInstrumenter::new(&db).instrument(&unit).unwrap();
    let pick = out.find_method("pick", "(I)I").unwrap();

    let returns: Vec<usize> = pick
        .code
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i, Instr::Simple(op) if op.is_return()))
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(returns.len(), 2);
    for idx in returns {
        assert_eq!(pick.code[idx - 1], Instr::Frame(FrameOp::Release));
    }
}

// ===== Diagnostics =====

#[test]
fn test_rejection_names_class_method_and_reason() {
    let (db, _) = database(InstrumentOptions::default());
    let unit = ClassBuilder::new("app/Napper")
        .method("nap", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable()
                .lconst(10)
                .invoke_static(names::THREAD, "sleep", "(J)V")
                .yield_now()
                .ret();
        })
        .build();
    let err = ClassInstrumenter::new(&db).instrument(&unit).unwrap_err();
    match &err {
        InstrumentError::Unable {
            class,
            method,
            desc,
            reason,
        } => {
            assert_eq!(class, "app/Napper");
            assert_eq!(method, "nap");
            assert_eq!(desc, "()V");
            assert_eq!(reason, "blocking call to sys/Thread#sleep(J)V");
        }
        other => panic!("unexpected error {:?}", other),
    }

    let (lenient, log) = database(InstrumentOptions::default().allow_blocking(true));
    ClassInstrumenter::new(&lenient).instrument(&unit).unwrap();
    assert_eq!(
        log.messages(LogLevel::Warning),
        vec!["Method app/Napper#nap()V contains potentially blocking call to sys/Thread#sleep(J)V"
            .to_string()]
    );
}

#[test]
fn test_log_levels_follow_options() {
    let unit = ClassBuilder::new("app/Chatty")
        .method("run", "()V", access::PUBLIC | access::STATIC, |m| {
            m.suspendable().yield_now().ret();
        })
        .build();

    let (quiet, quiet_log) = database(InstrumentOptions::default());
    quiet.check_class(&unit).unwrap();
    ClassInstrumenter::new(&quiet).instrument(&unit).unwrap();
    assert!(quiet_log.messages(LogLevel::Info).is_empty());
    assert!(quiet_log.messages(LogLevel::Debug).is_empty());

    let options = InstrumentOptions {
        debug: true,
        ..InstrumentOptions::default()
    };
    let (loud, loud_log) = database(options);
    loud.check_class(&unit).unwrap();
    ClassInstrumenter::new(&loud).instrument(&unit).unwrap();
    assert!(loud_log
        .messages(LogLevel::Info)
        .contains(&"Found class: app/Chatty".to_string()));
    assert!(loud_log
        .messages(LogLevel::Debug)
        .iter()
        .any(|m| m.starts_with("Method call at instruction 0 to ravel/Coroutine#yield")));
}
