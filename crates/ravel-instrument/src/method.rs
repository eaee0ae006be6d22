//! Method transformation engine
//!
//! Rewrites one suspendable method into a re-entrant one:
//!
//! ```text
//! frame.entry
//! tableswitch 1 default L_start [L_resume_1 .. L_resume_n]
//! L_start:
//!     segment 0
//! L_split_before_1:
//!     frame.reserve 1 slots, save operand stack and locals
//!     [frame.suspend]                      ; only for the suspend primitive
//! L_resume_1:
//!     restore locals and operand stack
//! L_split_after_1:
//!     segment 1 (starting at the call, or after it for the primitive)
//! ...
//! L_end:
//! L_catch_all:   frame.release            ; ordinary errors release the frame
//! L_catch_see:   athrow                   ; the signal passes through untouched
//! ```
//!
//! Every return is preceded by `frame.release`. User handler ranges that
//! cross a suspension point are split around its save/restore code.

use crate::analysis::{analyze, FlowValue, Frame};
use crate::database::MethodDatabase;
use crate::error::{InstrumentError, InstrumentResult};
use crate::log::LogLevel;
use ravel_bytecode::{
    names, FrameOp, Instr, Label, MethodDef, MethodDescriptor, Opcode, SlotKind, TryCatchBlock,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Calls that block the carrier thread, `(owner, name, descriptor)`
const BLOCKING_METHODS: &[(&str, &str, &str)] = &[
    (names::THREAD, "sleep", "(J)V"),
    (names::THREAD, "sleep", "(JI)V"),
    (names::THREAD, "join", "()V"),
    (names::THREAD, "join", "(J)V"),
    (names::THREAD, "join", "(JI)V"),
    (names::OBJECT, "wait", "()V"),
    (names::OBJECT, "wait", "(J)V"),
    (names::OBJECT, "wait", "(JI)V"),
    (names::LOCK, "lock", "()V"),
    (names::LOCK, "lockInterruptibly", "()V"),
];

/// Index of a call in the blocking catalog
pub fn blocking_call(owner: &str, name: &str, desc: &str) -> Option<usize> {
    BLOCKING_METHODS
        .iter()
        .position(|(o, n, d)| *o == owner && *n == name && *d == desc)
}

/// Where a value live at a suspension point goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// Persisted in the given frame slot
    Saved(SlotKind, u32),
    /// Statically null: dropped on save, recreated on restore
    Null,
    /// Object under construction: its allocation is deferred
    Omitted,
}

/// Save/restore plan of one suspension point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspensionPoint {
    /// Instruction index of the call
    pub index: usize,
    /// Whether the call is the suspend primitive itself
    pub is_yield: bool,
    /// One action per operand stack entry, bottom first
    pub stack: Vec<SlotAction>,
    /// Live locals with their action
    pub locals: Vec<(u16, SlotAction)>,
    /// Slots reserved in the coroutine frame
    pub slots: u32,
}

impl SuspensionPoint {
    fn plan(
        index: usize,
        is_yield: bool,
        frame: &Frame,
        first_local: usize,
        omitted: &mut FxHashSet<usize>,
    ) -> Result<Self, String> {
        let mut refs = 0u32;
        let mut prims = 0u32;
        let mut assign = |kind: SlotKind| {
            let counter = if kind.is_reference() { &mut refs } else { &mut prims };
            let slot = *counter;
            *counter += 1;
            SlotAction::Saved(kind, slot)
        };

        let mut stack = Vec::with_capacity(frame.stack.len());
        for (pos, value) in frame.stack.iter().enumerate() {
            let action = match value {
                FlowValue::New { insn, .. } => {
                    omitted.insert(*insn);
                    SlotAction::Omitted
                }
                FlowValue::Null => SlotAction::Null,
                FlowValue::Uninitialized => {
                    return Err(format!("unknown value at operand stack position {}", pos))
                }
                other => match other.slot_kind() {
                    Some(kind) => assign(kind),
                    None => return Err(format!("cannot persist {} on the operand stack", other)),
                },
            };
            stack.push(action);
        }

        let mut locals = Vec::new();
        for (local, value) in frame.locals.iter().enumerate().skip(first_local) {
            let action = match value {
                FlowValue::Uninitialized | FlowValue::New { .. } => continue,
                FlowValue::Null => SlotAction::Null,
                other => match other.slot_kind() {
                    Some(kind) => assign(kind),
                    None => continue,
                },
            };
            let local = u16::try_from(local).map_err(|_| "local index overflow".to_string())?;
            locals.push((local, action));
        }

        Ok(Self {
            index,
            is_yield,
            stack,
            locals,
            slots: refs.max(prims),
        })
    }
}

/// Transforms one method
pub struct MethodInstrumenter<'a> {
    db: &'a MethodDatabase,
    class: &'a str,
    method: &'a MethodDef,
    frames: Vec<Option<Frame>>,
    first_local: usize,
    points: Vec<SuspensionPoint>,
    omitted: FxHashSet<usize>,
    additional_locals: u16,
    warned_blocking: u32,
    warned_monitors: bool,
}

impl<'a> MethodInstrumenter<'a> {
    /// Analyse `method` of `class`
    ///
    /// # Errors
    ///
    /// Fails if the body cannot be analysed.
    pub fn new(db: &'a MethodDatabase, class: &'a str, method: &'a MethodDef) -> InstrumentResult<Self> {
        let frames = analyze(db, class, method)?;
        Ok(Self {
            db,
            class,
            method,
            frames,
            first_local: usize::from(!method.is_static()),
            points: Vec::new(),
            omitted: FxHashSet::default(),
            additional_locals: 0,
            warned_blocking: 0,
            warned_monitors: false,
        })
    }

    fn unable(&self, reason: impl Into<String>) -> InstrumentError {
        InstrumentError::unable(reason, self.class, self.method)
    }

    /// Suspension points found by [`MethodInstrumenter::collect_code_blocks`]
    pub fn suspension_points(&self) -> &[SuspensionPoint] {
        &self.points
    }

    /// Find the suspension points and plan their save/restore code
    ///
    /// Returns whether the method needs to be rewritten.
    ///
    /// # Errors
    ///
    /// Fails on a disallowed blocking call, a non-static call to the suspend
    /// primitive or an unpersistable value at a suspension point.
    pub fn collect_code_blocks(&mut self) -> InstrumentResult<bool> {
        let Self {
            db,
            class,
            method,
            frames,
            first_local,
            points,
            omitted,
            warned_blocking,
            ..
        } = self;
        points.clear();

        for (index, instr) in method.code.iter().enumerate() {
            let frame = match &frames[index] {
                Some(frame) => frame,
                None => continue,
            };
            let (op, owner, name, desc) = match instr {
                Instr::Invoke {
                    op,
                    owner,
                    name,
                    desc,
                } => (*op, owner, name, desc),
                _ => continue,
            };

            let search_super = matches!(op, Opcode::InvokeVirtual | Opcode::InvokeStatic);
            if db.is_method_suspendable(owner, name, desc, search_super) {
                db.log(
                    LogLevel::Debug,
                    format_args!(
                        "Method call at instruction {} to {}#{}{} is suspendable",
                        index, owner, name, desc
                    ),
                );
                let is_yield = names::is_yield(owner, name, desc);
                if is_yield && op != Opcode::InvokeStatic {
                    return Err(InstrumentError::unable("invalid call to yield()", class, method));
                }
                let point = SuspensionPoint::plan(index, is_yield, frame, *first_local, omitted)
                    .map_err(|msg| InstrumentError::analysis(class, method, index, msg))?;
                points.push(point);
            } else if let Some(id) = blocking_call(owner, name, desc) {
                let mask = 1u32 << id;
                if !db.is_allow_blocking() {
                    return Err(InstrumentError::unable(
                        format!("blocking call to {}#{}{}", owner, name, desc),
                        class,
                        method,
                    ));
                }
                if *warned_blocking & mask == 0 {
                    *warned_blocking |= mask;
                    db.log(
                        LogLevel::Warning,
                        format_args!(
                            "Method {}#{}{} contains potentially blocking call to {}#{}{}",
                            class, method.name, method.desc, owner, name, desc
                        ),
                    );
                }
            }
        }
        Ok(!self.points.is_empty())
    }

    /// Emit the re-entrant body
    ///
    /// Returns the method unchanged when no suspension point was found.
    ///
    /// # Errors
    ///
    /// Fails on a handler for the suspension signal or on monitors when they
    /// are not allowed.
    pub fn emit(&mut self) -> InstrumentResult<MethodDef> {
        if self.points.is_empty() {
            return Ok(self.method.clone());
        }
        self.db.log(
            LogLevel::Info,
            format_args!(
                "Instrumenting method {}#{}{}",
                self.class, self.method.name, self.method.desc
            ),
        );
        if self
            .method
            .handlers
            .iter()
            .any(|h| h.catch_type.as_deref() == Some(names::SUSPEND_EXECUTION))
        {
            return Err(self.unable("catch for SuspendExecution"));
        }

        let mut next_label = self.method.max_label().map_or(0, |l| l + 1);
        let mut fresh = || {
            let label = Label(next_label);
            next_label += 1;
            label
        };
        let l_start = fresh();
        let l_end = fresh();
        let l_catch_see = fresh();
        let l_catch_all = fresh();
        let count = self.points.len();
        let resume: Vec<Label> = (0..count).map(|_| fresh()).collect();
        let split_before: Vec<Label> = (0..count).map(|_| fresh()).collect();
        let split_after: Vec<Label> = (0..count).map(|_| fresh()).collect();

        let mut code = Vec::with_capacity(self.method.code.len() * 2 + 8);
        code.push(Instr::Frame(FrameOp::Entry));
        code.push(Instr::Switch {
            low: 1,
            default: l_start,
            targets: resume.clone(),
        });
        code.push(Instr::Label(l_start));
        self.dump_segment(&mut code, 0, self.points[0].index)?;

        for i in 0..count {
            let point = self.points[i].clone();
            let end = self
                .points
                .get(i + 1)
                .map_or(self.method.code.len(), |p| p.index);
            let entry = u32::try_from(i + 1).map_err(|_| self.unable("too many suspension points"))?;

            code.push(Instr::Label(split_before[i]));
            Self::store_state(&mut code, entry, &point);
            if point.is_yield {
                code.push(Instr::Frame(FrameOp::Suspend));
            }
            code.push(Instr::Label(resume[i]));
            Self::restore_state(&mut code, &point);
            code.push(Instr::Label(split_after[i]));
            let skip = usize::from(point.is_yield);
            self.dump_segment(&mut code, point.index + skip, end)?;
        }

        code.push(Instr::Label(l_end));
        code.push(Instr::Label(l_catch_all));
        code.push(Instr::Frame(FrameOp::Release));
        code.push(Instr::Label(l_catch_see));
        code.push(Instr::Simple(Opcode::AThrow));

        let mut handlers = Vec::with_capacity(self.method.handlers.len() + count + 2);
        handlers.push(TryCatchBlock {
            start: l_start,
            end: l_end,
            handler: l_catch_see,
            catch_type: Some(names::SUSPEND_EXECUTION.to_string()),
        });
        handlers.extend(self.split_handlers(&code, &split_before, &split_after)?);
        handlers.push(TryCatchBlock {
            start: l_start,
            end: l_end,
            handler: l_catch_all,
            catch_type: None,
        });

        let max_locals = self
            .method
            .max_locals
            .checked_add(self.additional_locals)
            .ok_or_else(|| self.unable("too many locals"))?;

        Ok(MethodDef {
            name: self.method.name.clone(),
            desc: self.method.desc.clone(),
            access: self.method.access,
            throws: self.method.throws.clone(),
            max_locals,
            code,
            handlers,
        })
    }

    // ===== Save & Restore =====

    fn store_state(code: &mut Vec<Instr>, entry: u32, point: &SuspensionPoint) {
        code.push(Instr::Frame(FrameOp::Reserve {
            entry,
            slots: point.slots,
        }));
        for action in point.stack.iter().rev() {
            match action {
                SlotAction::Saved(kind, slot) => code.push(Instr::Frame(FrameOp::Save {
                    kind: *kind,
                    slot: *slot,
                })),
                SlotAction::Null => code.push(Instr::Simple(Opcode::Pop)),
                SlotAction::Omitted => {}
            }
        }
        for (local, action) in &point.locals {
            if let SlotAction::Saved(kind, slot) = action {
                code.push(Instr::var(kind.load_opcode(), *local));
                code.push(Instr::Frame(FrameOp::Save {
                    kind: *kind,
                    slot: *slot,
                }));
            }
        }
    }

    fn restore_state(code: &mut Vec<Instr>, point: &SuspensionPoint) {
        for (local, action) in &point.locals {
            match action {
                SlotAction::Saved(kind, slot) => {
                    code.push(Instr::Frame(FrameOp::Restore {
                        kind: *kind,
                        slot: *slot,
                    }));
                    code.push(Instr::var(kind.store_opcode(), *local));
                }
                SlotAction::Null => {
                    code.push(Instr::Simple(Opcode::AConstNull));
                    code.push(Instr::var(Opcode::AStore, *local));
                }
                SlotAction::Omitted => {}
            }
        }
        for action in &point.stack {
            match action {
                SlotAction::Saved(kind, slot) => code.push(Instr::Frame(FrameOp::Restore {
                    kind: *kind,
                    slot: *slot,
                })),
                SlotAction::Null => code.push(Instr::Simple(Opcode::AConstNull)),
                SlotAction::Omitted => {}
            }
        }
    }

    // ===== Segments =====

    fn dump_segment(&mut self, code: &mut Vec<Instr>, start: usize, end: usize) -> InstrumentResult<()> {
        let method = self.method;
        for index in start..end {
            if self.omitted.contains(&index) {
                continue;
            }
            let instr = &method.code[index];
            match instr {
                Instr::Simple(op) if op.is_return() => {
                    code.push(Instr::Frame(FrameOp::Release));
                }
                Instr::Simple(Opcode::MonitorEnter | Opcode::MonitorExit) => {
                    if !self.db.is_allow_monitors() {
                        return Err(self.unable("synchronisation"));
                    }
                    if !self.warned_monitors {
                        self.warned_monitors = true;
                        self.db.log(
                            LogLevel::Warning,
                            format_args!(
                                "Method {}#{}{} contains synchronisation",
                                self.class, method.name, method.desc
                            ),
                        );
                    }
                }
                Instr::Invoke {
                    op: Opcode::InvokeSpecial,
                    name,
                    desc,
                    ..
                } if name == names::CONSTRUCTOR => {
                    self.emit_deferred_allocation(code, index, desc)?;
                }
                _ => {}
            }
            code.push(instr.clone());
        }
        Ok(())
    }

    /// Re-create an omitted `new`/`dup` pair right before its constructor call
    fn emit_deferred_allocation(
        &mut self,
        code: &mut Vec<Instr>,
        index: usize,
        desc: &str,
    ) -> InstrumentResult<()> {
        let frame = match &self.frames[index] {
            Some(frame) => frame,
            None => return Ok(()),
        };
        let argc = MethodDescriptor::parse(desc)?.argument_count();
        let size = frame.stack.len();
        let receiver = match size.checked_sub(argc + 1) {
            Some(si) if si >= 1 => si,
            _ => {
                self.db.log(
                    LogLevel::Warning,
                    format_args!("Expected to find a new object below {} arguments: {}", argc, frame),
                );
                return Ok(());
            }
        };

        let (ty, deferred) = match (&frame.stack[receiver - 1], &frame.stack[receiver]) {
            (
                FlowValue::New {
                    ty,
                    insn: alloc_insn,
                    dupped: false,
                    ..
                },
                FlowValue::New {
                    insn: dup_insn,
                    dupped: true,
                    ..
                },
            ) => (
                ty.clone(),
                self.omitted.contains(alloc_insn) || self.omitted.contains(dup_insn),
            ),
            _ => {
                self.db.log(
                    LogLevel::Warning,
                    format_args!("Expected to find a new object on stack index {}: {}", receiver, frame),
                );
                return Ok(());
            }
        };
        if !deferred {
            return Ok(());
        }

        let base = self.method.max_locals;
        let mut temps = Vec::with_capacity(argc);
        for j in 0..argc {
            let kind = frame.stack[receiver + 1 + j]
                .slot_kind()
                .unwrap_or(SlotKind::Ref);
            let local = u16::try_from(j)
                .ok()
                .and_then(|j| base.checked_add(j))
                .ok_or_else(|| self.unable("too many locals"))?;
            temps.push((local, kind));
        }
        for (local, kind) in temps.iter().rev() {
            code.push(Instr::var(kind.store_opcode(), *local));
        }
        code.push(Instr::Type {
            op: Opcode::New,
            desc: ty,
        });
        code.push(Instr::Simple(Opcode::Dup));
        for (local, kind) in &temps {
            code.push(Instr::var(kind.load_opcode(), *local));
        }

        let needed = u16::try_from(argc).map_err(|_| self.unable("too many locals"))?;
        self.additional_locals = self.additional_locals.max(needed);
        Ok(())
    }

    // ===== Handlers =====

    /// User handlers with every range crossing a suspension point cut in two
    fn split_handlers(
        &self,
        code: &[Instr],
        split_before: &[Label],
        split_after: &[Label],
    ) -> InstrumentResult<Vec<TryCatchBlock>> {
        let positions: FxHashMap<Label, usize> = code
            .iter()
            .enumerate()
            .filter_map(|(i, instr)| match instr {
                Instr::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();
        let pos = |label: Label| {
            positions.get(&label).copied().ok_or_else(|| {
                InstrumentError::analysis(self.class, self.method, 0, format!("undefined label {}", label))
            })
        };

        let mut out = Vec::with_capacity(self.method.handlers.len());
        for handler in &self.method.handlers {
            let mut ranges = vec![(handler.start, handler.end)];
            for (before, after) in split_before.iter().zip(split_after) {
                let (before_pos, after_pos) = (pos(*before)?, pos(*after)?);
                let mut next = Vec::with_capacity(ranges.len() + 1);
                for (start, end) in ranges {
                    if pos(start)? < before_pos && after_pos < pos(end)? {
                        self.db.log(
                            LogLevel::Debug,
                            format_args!(
                                "Splitting handler {} .. {} around {} .. {}",
                                start, end, before, after
                            ),
                        );
                        next.push((start, *before));
                        next.push((*after, end));
                    } else {
                        next.push((start, end));
                    }
                }
                ranges = next;
            }
            out.extend(ranges.into_iter().map(|(start, end)| TryCatchBlock {
                start,
                end,
                handler: handler.handler,
                catch_type: handler.catch_type.clone(),
            }));
        }
        Ok(out)
    }
}

/// Transform `method` of `class`, returning it unchanged if it never suspends
///
/// # Errors
///
/// Propagates analysis and transformation failures.
pub fn instrument_method(
    db: &MethodDatabase,
    class: &str,
    method: &MethodDef,
) -> InstrumentResult<MethodDef> {
    let mut instrumenter = MethodInstrumenter::new(db, class, method)?;
    instrumenter.collect_code_blocks()?;
    instrumenter.emit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CapturingLog;
    use crate::options::InstrumentOptions;
    use ravel_bytecode::{access, verify_method, MethodBuilder};
    use std::sync::Arc;

    fn db() -> MethodDatabase {
        MethodDatabase::new(InstrumentOptions::default())
    }

    fn build(desc: &str, flags: u16, body: impl FnOnce(&mut MethodBuilder)) -> MethodDef {
        let mut mb = MethodBuilder::new("run", desc, flags);
        mb.suspendable();
        body(&mut mb);
        mb.build()
    }

    fn count(code: &[Instr], wanted: &Instr) -> usize {
        code.iter().filter(|i| *i == wanted).count()
    }

    #[test]
    fn test_blocking_catalog() {
        assert_eq!(blocking_call(names::THREAD, "sleep", "(J)V"), Some(0));
        assert_eq!(blocking_call(names::LOCK, "lockInterruptibly", "()V"), Some(9));
        assert_eq!(blocking_call(names::THREAD, "sleep", "(I)V"), None);
        assert_eq!(blocking_call("app/Thread", "join", "()V"), None);
    }

    #[test]
    fn test_no_suspension_point_is_identity() {
        let method = build("(I)I", access::STATIC, |m| {
            m.iload(0).iconst(1).op(Opcode::IAdd).ireturn();
        });
        let db = db();
        let mut mi = MethodInstrumenter::new(&db, "app/A", &method).unwrap();
        assert!(!mi.collect_code_blocks().unwrap());
        assert_eq!(mi.emit().unwrap(), method);
    }

    #[test]
    fn test_yield_layout() {
        let method = build("()V", access::STATIC, |m| {
            m.iconst(7).istore(0).yield_now().iload(0).op(Opcode::Pop).ret();
        });
        let db = db();
        let out = instrument_method(&db, "app/A", &method).unwrap();
        verify_method(&out).unwrap();

        assert_eq!(out.code[0], Instr::Frame(FrameOp::Entry));
        assert!(matches!(&out.code[1], Instr::Switch { low: 1, targets, .. } if targets.len() == 1));
        assert_eq!(count(&out.code, &Instr::Frame(FrameOp::Suspend)), 1);
        assert_eq!(
            count(
                &out.code,
                &Instr::invoke(Opcode::InvokeStatic, names::COROUTINE, "yield", "()V")
            ),
            0
        );
        assert!(out.code.contains(&Instr::Frame(FrameOp::Reserve { entry: 1, slots: 1 })));
        assert!(out.code.contains(&Instr::Frame(FrameOp::Save {
            kind: SlotKind::Int,
            slot: 0
        })));
        // one release before the return, one on the error path
        assert_eq!(count(&out.code, &Instr::Frame(FrameOp::Release)), 2);

        assert_eq!(out.handlers.len(), 2);
        assert_eq!(
            out.handlers[0].catch_type.as_deref(),
            Some(names::SUSPEND_EXECUTION)
        );
        assert_eq!(out.handlers[1].catch_type, None);
    }

    #[test]
    fn test_suspendable_call_is_reissued() {
        let callee = "app/Worker";
        let db = db();
        db.check_class(
            &ravel_bytecode::ClassBuilder::new(callee)
                .method("step", "(I)I", access::STATIC, |m| {
                    m.suspendable().iload(0).ireturn();
                })
                .build(),
        )
        .unwrap();
        let method = build("()I", access::STATIC, |m| {
            m.iconst(1)
                .invoke_static(callee, "step", "(I)I")
                .ireturn();
        });
        let mut mi = MethodInstrumenter::new(&db, "app/A", &method).unwrap();
        assert!(mi.collect_code_blocks().unwrap());
        let point = &mi.suspension_points()[0];
        assert!(!point.is_yield);
        assert_eq!(point.stack, vec![SlotAction::Saved(SlotKind::Int, 0)]);

        let out = mi.emit().unwrap();
        verify_method(&out).unwrap();
        assert_eq!(
            count(&out.code, &Instr::invoke(Opcode::InvokeStatic, callee, "step", "(I)I")),
            1
        );
        assert_eq!(count(&out.code, &Instr::Frame(FrameOp::Suspend)), 0);
    }

    #[test]
    fn test_null_and_receiver_not_persisted() {
        let method = build("(Lsys/String;)V", access::PUBLIC, |m| {
            m.aconst_null().astore(2).aload(1).yield_now().op(Opcode::Pop).ret();
        });
        let db = db();
        let mut mi = MethodInstrumenter::new(&db, "app/A", &method).unwrap();
        mi.collect_code_blocks().unwrap();
        let point = &mi.suspension_points()[0];
        assert_eq!(point.stack, vec![SlotAction::Saved(SlotKind::Ref, 0)]);
        assert_eq!(
            point.locals,
            vec![
                (1, SlotAction::Saved(SlotKind::Ref, 1)),
                (2, SlotAction::Null)
            ]
        );
        assert_eq!(point.slots, 2);
    }

    #[test]
    fn test_blocking_call_rejected() {
        let method = build("()V", access::STATIC, |m| {
            m.lconst(10).invoke_static(names::THREAD, "sleep", "(J)V").ret();
        });
        let db = db();
        let err = instrument_method(&db, "app/A", &method).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to instrument class app/A#run()V because of blocking call to sys/Thread#sleep(J)V"
        );
    }

    #[test]
    fn test_blocking_call_warns_once() {
        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default().allow_blocking(true))
            .with_log(Arc::clone(&log));
        let method = build("()V", access::STATIC, |m| {
            m.lconst(1)
                .invoke_static(names::THREAD, "sleep", "(J)V")
                .lconst(2)
                .invoke_static(names::THREAD, "sleep", "(J)V")
                .ret();
        });
        let out = instrument_method(&db, "app/A", &method).unwrap();
        assert_eq!(out, method);
        assert_eq!(log.messages(LogLevel::Warning).len(), 1);
    }

    #[test]
    fn test_monitors() {
        let method = build("(Lsys/Object;)V", access::STATIC, |m| {
            m.aload(0)
                .op(Opcode::MonitorEnter)
                .yield_now()
                .aload(0)
                .op(Opcode::MonitorExit)
                .ret();
        });
        let err = instrument_method(&db(), "app/A", &method).unwrap_err();
        assert!(err.to_string().ends_with("because of synchronisation"));

        let log = Arc::new(CapturingLog::new());
        let db = MethodDatabase::new(InstrumentOptions::default().allow_monitors(true))
            .with_log(Arc::clone(&log));
        instrument_method(&db, "app/A", &method).unwrap();
        assert_eq!(log.messages(LogLevel::Warning).len(), 1);
    }

    #[test]
    fn test_virtual_yield_rejected() {
        let method = build("(Lravel/Coroutine;)V", access::STATIC, |m| {
            m.aload(0).invoke_virtual(names::COROUTINE, "yield", "()V").ret();
        });
        let err = instrument_method(&db(), "app/A", &method).unwrap_err();
        assert!(err.to_string().ends_with("because of invalid call to yield()"));
    }

    #[test]
    fn test_catch_for_signal_rejected() {
        let method = build("()V", access::STATIC, |m| {
            let start = m.new_label();
            let end = m.new_label();
            let handler = m.new_label();
            m.try_catch(start, end, handler, Some(names::SUSPEND_EXECUTION))
                .place(start)
                .yield_now()
                .place(end)
                .ret()
                .place(handler)
                .op(Opcode::Pop)
                .ret();
        });
        let err = instrument_method(&db(), "app/A", &method).unwrap_err();
        assert!(err.to_string().ends_with("because of catch for SuspendExecution"));
    }

    #[test]
    fn test_handler_split_around_each_point() {
        let method = build("()V", access::STATIC, |m| {
            let start = m.new_label();
            let end = m.new_label();
            let handler = m.new_label();
            m.try_catch(start, end, handler, None)
                .place(start)
                .yield_now()
                .yield_now()
                .place(end)
                .ret()
                .place(handler)
                .athrow();
        });
        let out = instrument_method(&db(), "app/A", &method).unwrap();
        verify_method(&out).unwrap();
        // signal handler, three user pieces, catch-all
        assert_eq!(out.handlers.len(), 5);
        assert!(out.handlers[1..4]
            .iter()
            .all(|h| h.handler == method.handlers[0].handler));
        assert_eq!(out.handlers[1].start, method.handlers[0].start);
        assert_eq!(out.handlers[3].end, method.handlers[0].end);
    }

    #[test]
    fn test_deferred_allocation() {
        let db = db();
        db.check_class(
            &ravel_bytecode::ClassBuilder::new("app/Source")
                .method("next", "()I", access::STATIC, |m| {
                    m.suspendable().iconst(1).ireturn();
                })
                .build(),
        )
        .unwrap();
        let method = build("()Lapp/Point;", access::STATIC, |m| {
            m.new_object("app/Point")
                .op(Opcode::Dup)
                .iconst(3)
                .invoke_static("app/Source", "next", "()I")
                .invoke_special("app/Point", "<init>", "(II)V")
                .areturn();
        });
        let mut mi = MethodInstrumenter::new(&db, "app/A", &method).unwrap();
        assert!(mi.collect_code_blocks().unwrap());
        assert_eq!(
            mi.suspension_points()[0].stack,
            vec![
                SlotAction::Omitted,
                SlotAction::Omitted,
                SlotAction::Saved(SlotKind::Int, 0)
            ]
        );
        let out = mi.emit().unwrap();
        verify_method(&out).unwrap();
        assert_eq!(out.max_locals, method.max_locals + 2);

        let init = out
            .code
            .iter()
            .position(|i| matches!(i, Instr::Invoke { name, .. } if name == "<init>"))
            .unwrap();
        assert_eq!(
            &out.code[init - 6..init],
            &[
                Instr::var(Opcode::IStore, 1),
                Instr::var(Opcode::IStore, 0),
                Instr::Type {
                    op: Opcode::New,
                    desc: "app/Point".to_string()
                },
                Instr::Simple(Opcode::Dup),
                Instr::var(Opcode::ILoad, 0),
                Instr::var(Opcode::ILoad, 1),
            ]
        );
        assert_eq!(
            count(
                &out.code,
                &Instr::Type {
                    op: Opcode::New,
                    desc: "app/Point".to_string()
                }
            ),
            1
        );
    }

    #[test]
    fn test_uninitialized_stack_value_rejected() {
        // the two paths leave an int and a long in the same stack slot
        let method = build("(I)V", access::STATIC, |m| {
            let other = m.new_label();
            let join = m.new_label();
            m.iload(0)
                .jump(Opcode::IfEq, other)
                .iconst(1)
                .goto(join)
                .place(other)
                .lconst(1)
                .place(join)
                .yield_now()
                .op(Opcode::Pop)
                .ret();
        });
        let err = instrument_method(&db(), "app/A", &method).unwrap_err();
        assert!(matches!(err, InstrumentError::Analysis { .. }));
    }
}
