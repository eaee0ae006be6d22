//! Worklist data-flow analysis over one method body

use super::frame::Frame;
use super::value::FlowValue;
use crate::database::MethodDatabase;
use crate::error::{InstrumentError, InstrumentResult};
use ravel_bytecode::{
    names, Constant, FrameOp, Instr, Label, MethodDef, MethodDescriptor, Opcode, SlotKind,
};
use rustc_hash::FxHashMap;

/// Compute the frame before every instruction of `method`
///
/// Unreachable instructions get `None`. The analysis fails if stack heights
/// disagree at a join point, a label is undefined, execution falls off the
/// end or an instruction underflows the operand stack.
pub fn analyze(
    db: &MethodDatabase,
    owner: &str,
    method: &MethodDef,
) -> InstrumentResult<Vec<Option<Frame>>> {
    Analyzer::new(db, owner, method)?.run()
}

struct Analyzer<'a> {
    db: &'a MethodDatabase,
    owner: &'a str,
    method: &'a MethodDef,
    labels: FxHashMap<Label, usize>,
    /// `(start, end, handler, catch type)` resolved to instruction indices
    handlers: Vec<(usize, usize, usize, String)>,
    frames: Vec<Option<Frame>>,
    queued: Vec<bool>,
    worklist: Vec<usize>,
}

impl<'a> Analyzer<'a> {
    fn new(db: &'a MethodDatabase, owner: &'a str, method: &'a MethodDef) -> InstrumentResult<Self> {
        let mut labels = FxHashMap::default();
        for (i, instr) in method.code.iter().enumerate() {
            if let Instr::Label(l) = instr {
                labels.insert(*l, i);
            }
        }

        let mut analyzer = Self {
            db,
            owner,
            method,
            labels,
            handlers: Vec::new(),
            frames: vec![None; method.code.len()],
            queued: vec![false; method.code.len()],
            worklist: Vec::new(),
        };

        let mut handlers = Vec::with_capacity(method.handlers.len());
        for h in &method.handlers {
            let catch_type = h
                .catch_type
                .clone()
                .unwrap_or_else(|| names::THROWABLE.to_string());
            handlers.push((
                analyzer.position(h.start, 0)?,
                analyzer.position(h.end, 0)?,
                analyzer.position(h.handler, 0)?,
                catch_type,
            ));
        }
        analyzer.handlers = handlers;
        Ok(analyzer)
    }

    fn error(&self, index: usize, message: impl Into<String>) -> InstrumentError {
        InstrumentError::analysis(self.owner, self.method, index, message)
    }

    fn position(&self, label: Label, at: usize) -> InstrumentResult<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| self.error(at, format!("undefined label {}", label)))
    }

    fn initial_frame(&self) -> InstrumentResult<Frame> {
        let desc = MethodDescriptor::parse(&self.method.desc)?;
        let mut frame = Frame::new(self.method.max_locals as usize);
        let mut index = 0usize;
        if !self.method.is_static() {
            if frame.locals.is_empty() {
                return Err(self.error(0, "no local slot for the receiver"));
            }
            frame.locals[0] = FlowValue::Reference(self.owner.to_string());
            index = 1;
        }
        for param in &desc.params {
            let slot = frame
                .locals
                .get_mut(index)
                .ok_or_else(|| self.error(0, "max_locals too small for the parameters"))?;
            *slot = FlowValue::from_field_type(param);
            index += 1;
        }
        Ok(frame)
    }

    fn run(mut self) -> InstrumentResult<Vec<Option<Frame>>> {
        if self.method.code.is_empty() {
            return Ok(self.frames);
        }
        let initial = self.initial_frame()?;
        self.frames[0] = Some(initial);
        self.queued[0] = true;
        self.worklist.push(0);

        while let Some(index) = self.worklist.pop() {
            self.queued[index] = false;
            let before = match &self.frames[index] {
                Some(frame) => frame.clone(),
                None => continue,
            };
            let method = self.method;
            let instr = &method.code[index];
            let mut after = before.clone();
            self.execute(index, instr, &mut after)
                .map_err(|msg| self.error(index, msg))?;

            let (targets, falls_through) = self.successors(index, instr)?;
            for target in targets {
                self.flow_into(index, target, &after)?;
            }
            if falls_through {
                if index + 1 >= self.method.code.len() {
                    return Err(self.error(index, "execution falls off the end"));
                }
                self.flow_into(index, index + 1, &after)?;
            }

            let mut caught = Vec::new();
            for (start, end, handler, ty) in &self.handlers {
                if *start <= index && index < *end {
                    caught.push((*handler, ty.clone()));
                }
            }
            for (handler, ty) in caught {
                for locals in [&before.locals, &after.locals] {
                    let entry = Frame {
                        locals: locals.clone(),
                        stack: vec![FlowValue::Reference(ty.clone())],
                    };
                    self.flow_into(index, handler, &entry)?;
                }
            }
        }
        Ok(self.frames)
    }

    fn flow_into(&mut self, from: usize, target: usize, frame: &Frame) -> InstrumentResult<()> {
        let (db, owner, method) = (self.db, self.owner, self.method);
        let slot = &mut self.frames[target];
        let changed = match slot {
            Some(existing) => existing
                .merge(frame, db)
                .map_err(|msg| InstrumentError::analysis(owner, method, from, msg))?,
            None => {
                *slot = Some(frame.clone());
                true
            }
        };
        if changed && !self.queued[target] {
            self.queued[target] = true;
            self.worklist.push(target);
        }
        Ok(())
    }

    /// Explicit jump targets and whether control falls through
    fn successors(&self, index: usize, instr: &Instr) -> InstrumentResult<(Vec<usize>, bool)> {
        let mut targets = Vec::new();
        for label in instr.branch_targets() {
            targets.push(self.position(label, index)?);
        }
        let falls_through = match instr {
            Instr::Switch { .. } => false,
            Instr::Jump { op, .. } => *op != Opcode::Goto,
            other => !other.opcode().is_terminator(),
        };
        Ok((targets, falls_through))
    }

    // ===== Transfer Function =====

    fn execute(&self, index: usize, instr: &Instr, frame: &mut Frame) -> Result<(), String> {
        match instr {
            Instr::Label(_) => {}
            Instr::Simple(op) => self.execute_simple(*op, frame)?,
            Instr::Const(c) => frame.push(match c {
                Constant::Int(_) => FlowValue::Int,
                Constant::Long(_) => FlowValue::Long,
                Constant::Float(_) => FlowValue::Float,
                Constant::Double(_) => FlowValue::Double,
                Constant::Str(_) => FlowValue::Reference(names::STRING.to_string()),
            }),
            Instr::Var { op, index: local } => match op {
                Opcode::ILoad | Opcode::LLoad | Opcode::FLoad | Opcode::DLoad | Opcode::ALoad => {
                    let value = frame.local(*local)?.clone();
                    frame.push(value);
                }
                _ => {
                    let value = frame.pop()?;
                    frame.set_local(*local, value)?;
                }
            },
            Instr::Inc { index: local, .. } => frame.set_local(*local, FlowValue::Int)?,
            Instr::Jump { op, .. } => match op {
                Opcode::Goto => {}
                Opcode::IfICmpEq
                | Opcode::IfICmpNe
                | Opcode::IfICmpLt
                | Opcode::IfICmpGe
                | Opcode::IfICmpGt
                | Opcode::IfICmpLe
                | Opcode::IfACmpEq
                | Opcode::IfACmpNe => frame.pop_n(2)?,
                _ => frame.pop_n(1)?,
            },
            Instr::Switch { .. } => frame.pop_n(1)?,
            Instr::Field { op, desc, .. } => {
                let value = FlowValue::from_descriptor(desc)
                    .ok_or_else(|| format!("invalid field descriptor {}", desc))?;
                match op {
                    Opcode::GetField => {
                        frame.pop()?;
                        frame.push(value);
                    }
                    Opcode::PutField => frame.pop_n(2)?,
                    Opcode::GetStatic => frame.push(value),
                    _ => frame.pop_n(1)?,
                }
            }
            Instr::Invoke { op, name, desc, .. } => {
                let md = MethodDescriptor::parse(desc).map_err(|e| e.to_string())?;
                frame.pop_n(md.argument_count())?;
                if *op != Opcode::InvokeStatic {
                    let receiver = frame.pop()?;
                    if *op == Opcode::InvokeSpecial && name == names::CONSTRUCTOR {
                        if let FlowValue::New { alloc, ty, .. } = receiver {
                            frame.initialize(alloc, &ty);
                        }
                    }
                }
                if let Some(ret) = &md.ret {
                    frame.push(FlowValue::from_field_type(ret));
                }
            }
            Instr::Type { op, desc } => match op {
                Opcode::New => frame.push(FlowValue::New {
                    ty: desc.clone(),
                    alloc: index,
                    insn: index,
                    dupped: false,
                }),
                Opcode::CheckCast => {
                    if frame.pop()? == FlowValue::Null {
                        frame.push(FlowValue::Null);
                    } else {
                        frame.push(FlowValue::Reference(desc.clone()));
                    }
                }
                Opcode::InstanceOf => {
                    frame.pop()?;
                    frame.push(FlowValue::Int);
                }
                _ => {
                    frame.pop()?;
                    frame.push(FlowValue::Reference(format!("[{}", desc)));
                }
            },
            Instr::Frame(op) => match op {
                FrameOp::Entry => frame.push(FlowValue::Int),
                FrameOp::Reserve { .. } | FrameOp::Release | FrameOp::Suspend => {}
                FrameOp::Save { .. } => frame.pop_n(1)?,
                FrameOp::Restore { kind, .. } => frame.push(match kind {
                    SlotKind::Int => FlowValue::Int,
                    SlotKind::Long => FlowValue::Long,
                    SlotKind::Float => FlowValue::Float,
                    SlotKind::Double => FlowValue::Double,
                    SlotKind::Ref => FlowValue::Reference(names::OBJECT.to_string()),
                }),
            },
        }

        // `dup` needs the instruction index, handled here
        if let Instr::Simple(Opcode::Dup) = instr {
            if let Some(FlowValue::New { ty, alloc, dupped: false, .. }) = frame.stack.last().cloned() {
                if let Some(top) = frame.stack.last_mut() {
                    *top = FlowValue::New {
                        ty,
                        alloc,
                        insn: index,
                        dupped: true,
                    };
                }
            }
        }
        Ok(())
    }

    fn execute_simple(&self, op: Opcode, frame: &mut Frame) -> Result<(), String> {
        match op {
            Opcode::Nop => {}
            Opcode::AConstNull => frame.push(FlowValue::Null),
            Opcode::Pop => frame.pop_n(1)?,
            Opcode::Dup => {
                let top = frame.peek()?.clone();
                frame.push(top);
            }
            Opcode::DupX1 => {
                let v1 = frame.pop()?;
                let v2 = frame.pop()?;
                frame.push(v1.clone());
                frame.push(v2);
                frame.push(v1);
            }
            Opcode::Swap => {
                let v1 = frame.pop()?;
                let v2 = frame.pop()?;
                frame.push(v1);
                frame.push(v2);
            }

            Opcode::IAdd | Opcode::ISub | Opcode::IMul | Opcode::IDiv | Opcode::IRem => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Int);
            }
            Opcode::LAdd | Opcode::LSub | Opcode::LMul | Opcode::LDiv | Opcode::LRem => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Long);
            }
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Float);
            }
            Opcode::DAdd | Opcode::DSub | Opcode::DMul | Opcode::DDiv => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Double);
            }
            Opcode::LCmp | Opcode::FCmp | Opcode::DCmp => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Int);
            }
            Opcode::INeg | Opcode::LNeg | Opcode::FNeg | Opcode::DNeg => {
                let v = frame.pop()?;
                frame.push(v);
            }

            Opcode::I2L | Opcode::F2D | Opcode::D2L => Self::convert(frame, FlowValue::Long, op)?,
            Opcode::I2F | Opcode::L2F => Self::convert(frame, FlowValue::Float, op)?,
            Opcode::I2D | Opcode::L2D => Self::convert(frame, FlowValue::Double, op)?,
            Opcode::L2I | Opcode::F2I | Opcode::D2I => Self::convert(frame, FlowValue::Int, op)?,

            Opcode::IReturn
            | Opcode::LReturn
            | Opcode::FReturn
            | Opcode::DReturn
            | Opcode::AReturn
            | Opcode::AThrow
            | Opcode::MonitorEnter
            | Opcode::MonitorExit => frame.pop_n(1)?,
            Opcode::Return => {}

            Opcode::ArrayLength => {
                frame.pop()?;
                frame.push(FlowValue::Int);
            }
            Opcode::AALoad => {
                frame.pop()?;
                let array = frame.pop()?;
                frame.push(array.array_element());
            }
            Opcode::IALoad => {
                frame.pop_n(2)?;
                frame.push(FlowValue::Int);
            }
            Opcode::AAStore | Opcode::IAStore => frame.pop_n(3)?,

            other => return Err(format!("unexpected operand-free opcode {}", other)),
        }
        Ok(())
    }

    fn convert(frame: &mut Frame, to: FlowValue, op: Opcode) -> Result<(), String> {
        let from = frame.pop()?;
        if from.is_reference() {
            return Err(format!("{} applied to a reference", op));
        }
        frame.push(to);
        Ok(())
    }
}
