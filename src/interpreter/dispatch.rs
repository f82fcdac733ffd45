//! The main interpreter loop and the control-flow unwinder.
//!
//! One loop iteration reads an opcode byte, decodes its operands by fixed
//! width and dispatches. A handler outcome either advances the
//! instruction pointer, has already redirected it, or enters the unwinder
//! with a return, throw, deep jump or yield. The unwinder walks the
//! structured-block stack downward, running finally blocks and auto-close
//! sweeps on the way.

use crate::error::{Raised, RtError, VmError};
use crate::heap::{Gc, HeapObj};
use crate::interpreter::fiber::{Fiber, FiberState};
use crate::interpreter::frame::Frame;
use crate::interpreter::stack::{BlockKind, Pending, RunStatusRec, TryState};
use crate::interpreter::{Interpreter, StackStash};
use crate::script::BcScript;
use crate::value::Value;

use ox_asm::Opcode;
use std::cmp::Ordering;
use std::sync::Arc;

/// Execution status of the active function.
#[derive(Debug)]
pub(crate) struct RunStatus {
    /// The function value being executed.
    pub func: Value,
    /// Its owning script.
    pub script: Arc<BcScript>,
    /// Its descriptor index.
    pub sf: usize,
    /// The active frame.
    pub frame: Gc,
    /// Value-stack base of the register window (`reg_num + 1` slots, the
    /// last caching the argument vector).
    pub regs: usize,
    /// Value-stack index of the argument region.
    pub args: usize,
    /// Argument count.
    pub argc: usize,
    /// Value-stack index of the return-value slot.
    pub rv: usize,
    /// Block-stack length at activation entry.
    pub sp: usize,
    /// Pending deep-jump target.
    pub jmp_ip: usize,
    /// Pending deep-jump block-stack length.
    pub jmp_sp: usize,
    /// The fiber being driven, if any.
    pub fiber: Option<Gc>,
    /// Value carried by a pending yield.
    pub yield_val: Value,
    /// Register slot the next resume value lands in.
    pub yield_reg: usize,
}

/// Handler outcome inside the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Proceed to the next instruction.
    Next,
    /// The handler has already set the instruction pointer.
    Jump,
    /// Return from the current function.
    Return,
    /// Unwind towards a deep-jump target.
    DeepJump,
    /// Suspend the current fiber.
    Yield,
}

/// Why the unwinder is running.
#[derive(Debug, Clone)]
enum UnwindCause {
    Error(Raised),
    Return,
    DeepJump,
}

enum Unwound {
    Resume,
    Done(Result<(), Raised>),
}

/// Final outcome of one `execute` drive.
pub(crate) enum ExecOutcome {
    Done(Result<(), Raised>),
    Yield(Box<RunStatus>),
}

/// How one fiber slice ended.
enum SliceEnd {
    /// The fiber ran to completion or failed.
    Done(Result<Value, Raised>),
    /// The fiber yielded; resumption state captured.
    Yield {
        rsr: RunStatusRec,
        yr: usize,
        val: Value,
    },
}

impl Interpreter {
    /// Create a function value, capturing the enclosing frame chain.
    pub(crate) fn function_value(
        &mut self,
        script: &Arc<BcScript>,
        sfunc: usize,
        rs: Option<&RunStatus>,
    ) -> Value {
        let fnum = script.sfuncs[sfunc].frame_num as usize;
        let mut frames = Vec::with_capacity(fnum);

        if fnum > 0 {
            let cur = match rs {
                Some(rs) => Some((rs.frame, rs.func.clone())),
                None => self
                    .cur_frame
                    .map(|f| (f, self.frame(f).func.clone())),
            };
            if let Some((frame, func)) = cur {
                frames.push(frame);
                if let Some(f) = self.function(&func) {
                    frames.extend(f.frames.iter().take(fnum.saturating_sub(1)).copied());
                }
            }
        }

        Value::Ref(self.heap.alloc(HeapObj::Function(crate::object::Function {
            script: script.clone(),
            sfunc,
            frames,
            name: None,
            scope: None,
        })))
    }

    /// Run a compiled script: function 0 executes in the script's root
    /// frame, so top-level declarations persist there.
    pub fn run_script(&mut self, script: &Arc<BcScript>) -> Result<Value, VmError> {
        let fv = self.function_value(script, 0, None);

        let frame = script.frame;
        let saved_frame = self.cur_frame;
        {
            let f = self.frame_mut(frame);
            f.func = fv.clone();
            f.ip = 0;
        }
        self.frame_mut(frame).parent = saved_frame;

        let args_base = self.v_stack.len();
        let rv = self.v_stack.len();
        self.v_stack.push(Value::Null);

        self.cur_frame = Some(frame);
        let regs = self.v_stack.len();
        let reg_num = script.sfuncs[0].reg_num as usize;
        self.v_stack
            .extend(std::iter::repeat(Value::Null).take(reg_num + 1));

        let rs = RunStatus {
            func: fv,
            script: script.clone(),
            sf: 0,
            frame,
            regs,
            args: args_base,
            argc: 0,
            rv,
            sp: self.s_stack.len(),
            jmp_ip: 0,
            jmp_sp: 0,
            fiber: None,
            yield_val: Value::Null,
            yield_reg: 0,
        };

        let base_sp = self.s_stack.len();
        let outcome = self.execute(rs, base_sp);
        self.cur_frame = saved_frame;

        let result = match outcome {
            ExecOutcome::Done(Ok(())) => Ok(self.v_stack[rv].clone()),
            ExecOutcome::Done(Err(e)) => Err(self.uncaught(e)),
            ExecOutcome::Yield(_) => unreachable!("yield outside a fiber"),
        };
        self.v_stack.truncate(args_base);
        result
    }

    /// Call a script function from the host or from a protocol hook.
    pub(crate) fn call_function(
        &mut self,
        fv: Value,
        this: Value,
        args: Vec<Value>,
        fiber: Option<Gc>,
    ) -> Result<Value, Raised> {
        debug_assert!(fiber.is_none(), "fibers resume through resume_fiber");

        let (script, sfunc) = match self.function(&fv) {
            Some(f) => (f.script.clone(), f.sfunc),
            None => {
                return Err(Raised::Error(RtError::type_error(
                    "the value is not callable",
                )))
            }
        };
        let decls = script.sfuncs[sfunc].decls.len();
        let reg_num = script.sfuncs[sfunc].reg_num as usize;

        let args_base = self.v_stack.len();
        let argc = args.len();
        self.v_stack.extend(args);

        let rv = self.v_stack.len();
        self.v_stack.push(Value::Null);

        let frame = self
            .heap
            .alloc(HeapObj::Frame(Frame::new(fv.clone(), decls, self.cur_frame)));
        self.frame_mut(frame).this = this;

        let saved_frame = self.cur_frame;
        self.cur_frame = Some(frame);

        let regs = self.v_stack.len();
        self.v_stack
            .extend(std::iter::repeat(Value::Null).take(reg_num + 1));

        let rs = RunStatus {
            func: fv,
            script,
            sf: sfunc,
            frame,
            regs,
            args: args_base,
            argc,
            rv,
            sp: self.s_stack.len(),
            jmp_ip: 0,
            jmp_sp: 0,
            fiber: None,
            yield_val: Value::Null,
            yield_reg: 0,
        };

        let base_sp = self.s_stack.len();
        let outcome = self.execute(rs, base_sp);
        self.cur_frame = saved_frame;

        let result = match outcome {
            ExecOutcome::Done(Ok(())) => Ok(self.v_stack[rv].clone()),
            ExecOutcome::Done(Err(e)) => Err(e),
            ExecOutcome::Yield(_) => unreachable!("yield outside a fiber"),
        };
        self.v_stack.truncate(args_base);
        result
    }

    // ---- fibers ----

    /// Create a fiber for `f`; calling the returned value resumes it.
    pub fn fiber_new(&mut self, f: Value) -> Value {
        Value::Ref(self.heap.alloc(HeapObj::Fiber(Fiber::new(f))))
    }

    fn fiber_state(&self, gc: Gc) -> FiberState {
        match self.heap.get(gc) {
            HeapObj::Fiber(f) => f.state,
            _ => unreachable!("handle does not refer to a fiber"),
        }
    }

    /// Drive a fiber for one slice: run until it yields, ends or fails.
    pub(crate) fn resume_fiber(&mut self, fgc: Gc, args: Vec<Value>) -> Result<Value, Raised> {
        match self.fiber_state(fgc) {
            FiberState::Run => {
                return Err(Raised::Error(RtError::reference_error(
                    "the fiber is already running",
                )))
            }
            FiberState::End | FiberState::Error => {
                return Err(Raised::Error(RtError::reference_error(
                    "the fiber has finished",
                )))
            }
            FiberState::New | FiberState::Suspended => {}
        }

        // Swap the fiber's stacks in, parking the current world.
        let (fiber_v, fiber_s, func, rsr, yr, fresh) = match self.heap.get_mut(fgc) {
            HeapObj::Fiber(f) => {
                let fresh = f.state == FiberState::New;
                f.state = FiberState::Run;
                (
                    std::mem::take(&mut f.v_stack),
                    std::mem::take(&mut f.s_stack),
                    f.func.clone(),
                    f.rsr,
                    f.yr,
                    fresh,
                )
            }
            _ => unreachable!(),
        };

        self.stashed.push(StackStash {
            v_stack: std::mem::replace(&mut self.v_stack, fiber_v),
            s_stack: std::mem::replace(&mut self.s_stack, fiber_s),
            frame: self.cur_frame.take(),
        });

        // The caller's reference to the fiber may live nowhere the
        // collector can see while its stacks are detached; pin it for
        // the slice.
        let pin = Value::Ref(fgc);
        self.global_ref(&pin);

        let driven = if fresh {
            self.fiber_first_slice(fgc, func, args)
        } else {
            self.fiber_resume_slice(fgc, rsr, yr, args)
        };

        self.global_unref(&pin);

        // Swap back, whatever happened.
        let stash = self.stashed.pop().expect("stash balance");
        let fiber_v = std::mem::replace(&mut self.v_stack, stash.v_stack);
        let fiber_s = std::mem::replace(&mut self.s_stack, stash.s_stack);
        self.cur_frame = stash.frame;

        let (state, rv, result) = match driven {
            SliceEnd::Done(Ok(v)) => (FiberState::End, v.clone(), Ok(v)),
            SliceEnd::Done(Err(e)) => {
                let ev = self.materialize(e.clone());
                (FiberState::Error, ev, Err(e))
            }
            SliceEnd::Yield { rsr, yr, val } => {
                if let HeapObj::Fiber(f) = self.heap.get_mut(fgc) {
                    f.rsr = rsr;
                    f.yr = Some(yr);
                }
                (FiberState::Suspended, val.clone(), Ok(val))
            }
        };

        if let HeapObj::Fiber(f) = self.heap.get_mut(fgc) {
            f.v_stack = fiber_v;
            f.s_stack = fiber_s;
            f.state = state;
            f.rv = rv;
        }

        tracing::trace!(fiber = %fgc, state = ?state, "fiber slice finished");
        result
    }

    /// First slice: build the activation inside the fiber's stacks.
    fn fiber_first_slice(&mut self, fgc: Gc, fv: Value, args: Vec<Value>) -> SliceEnd {
        let (script, sfunc) = match self.function(&fv) {
            Some(f) => (f.script.clone(), f.sfunc),
            None => {
                let e = Raised::Error(RtError::type_error("the fiber value is not a function"));
                return SliceEnd::Done(Err(e));
            }
        };
        let decls = script.sfuncs[sfunc].decls.len();
        let reg_num = script.sfuncs[sfunc].reg_num as usize;

        let args_base = self.v_stack.len();
        let argc = args.len();
        self.v_stack.extend(args);

        let rv = self.v_stack.len();
        self.v_stack.push(Value::Null);

        let frame = self
            .heap
            .alloc(HeapObj::Frame(Frame::new(fv.clone(), decls, None)));
        self.cur_frame = Some(frame);

        let regs = self.v_stack.len();
        self.v_stack
            .extend(std::iter::repeat(Value::Null).take(reg_num + 1));

        let rs = RunStatus {
            func: fv,
            script,
            sf: sfunc,
            frame,
            regs,
            args: args_base,
            argc,
            rv,
            sp: 0,
            jmp_ip: 0,
            jmp_sp: 0,
            fiber: Some(fgc),
            yield_val: Value::Null,
            yield_reg: 0,
        };

        let outcome = self.execute(rs, 0);
        self.finish_fiber_slice(outcome, rv)
    }

    /// Later slices: restore the captured status, deliver the resume
    /// value and continue.
    fn fiber_resume_slice(
        &mut self,
        fgc: Gc,
        rsr: RunStatusRec,
        yr: Option<usize>,
        args: Vec<Value>,
    ) -> SliceEnd {
        if let Some(yr) = yr {
            self.v_stack[yr] = args.into_iter().next().unwrap_or(Value::Null);
        }

        let frame = rsr.frame.expect("suspended fiber without a frame");
        self.cur_frame = Some(frame);
        // The captured ip still points at the yield instruction; resume
        // just past it.
        self.frame_mut(frame).ip += Opcode::Yield.len();
        let func = self.frame(frame).func.clone();
        let (script, sfunc) = match self.function(&func) {
            Some(f) => (f.script.clone(), f.sfunc),
            None => {
                let e = Raised::Error(RtError::type_error("the fiber frame is not a function"));
                return SliceEnd::Done(Err(e));
            }
        };

        let rs = RunStatus {
            func,
            script,
            sf: sfunc,
            frame,
            regs: rsr.vp,
            args: rsr.args,
            argc: rsr.argc,
            rv: rsr.rv,
            sp: rsr.sp,
            jmp_ip: 0,
            jmp_sp: 0,
            fiber: Some(fgc),
            yield_val: Value::Null,
            yield_reg: 0,
        };

        let outcome = self.execute(rs, 0);
        self.finish_fiber_slice(outcome, rsr.rv)
    }

    fn finish_fiber_slice(&mut self, outcome: ExecOutcome, rv_idx: usize) -> SliceEnd {
        match outcome {
            ExecOutcome::Done(Ok(())) => {
                let v = self.v_stack.get(rv_idx).cloned().unwrap_or(Value::Null);
                SliceEnd::Done(Ok(v))
            }
            ExecOutcome::Done(Err(e)) => SliceEnd::Done(Err(e)),
            ExecOutcome::Yield(rs) => SliceEnd::Yield {
                rsr: RunStatusRec {
                    frame: Some(rs.frame),
                    args: rs.args,
                    argc: rs.argc,
                    rv: rs.rv,
                    vp: rs.regs,
                    sp: rs.sp,
                },
                yr: rs.yield_reg,
                val: rs.yield_val,
            },
        }
    }

    // ---- the loop ----

    /// Interpret until the activation completes, fails or yields.
    pub(crate) fn execute(&mut self, mut rs: RunStatus, base_sp: usize) -> ExecOutcome {
        'run: loop {
            let cause: UnwindCause = loop {
                if self.heap.should_collect() {
                    // Values reachable only through `rs` are pinned by the
                    // frame list; the frame is always `cur_frame`-reachable.
                    self.collect_garbage();
                }

                let sf = &rs.script.sfuncs[rs.sf];
                let (bc_start, bc_len) = (sf.bc_start, sf.bc_len);
                let ip = self.frame(rs.frame).ip;

                if ip >= bc_len {
                    self.v_stack[rs.rv] = Value::Null;
                    break UnwindCause::Return;
                }

                // Fetch: copy the instruction bytes out so handlers can
                // borrow freely (`get_n` patches this very region).
                let mut code = [0u8; 5];
                {
                    let bc = rs.script.bc.lock().expect("bytecode lock");
                    let end = (bc_start + ip + 5).min(bc.len());
                    code[..end - bc_start - ip].copy_from_slice(&bc[bc_start + ip..end]);
                }

                let op = match Opcode::try_from(code[0]) {
                    Ok(op) => op,
                    // Dispatch on an unknown opcode is an internal
                    // invariant violation.
                    Err(_) => unreachable!("unknown opcode byte {:#04x}", code[0]),
                };

                let u16_at = |i: usize| u16::from_be_bytes([code[i], code[i + 1]]);

                let r: Result<Flow, Raised> = self.step(&mut rs, op, ip, &code, &u16_at);

                match r {
                    Ok(Flow::Next) => self.frame_mut(rs.frame).ip += op.len(),
                    Ok(Flow::Jump) => {}
                    Ok(Flow::Return) => break UnwindCause::Return,
                    Ok(Flow::DeepJump) => break UnwindCause::DeepJump,
                    Ok(Flow::Yield) => return ExecOutcome::Yield(Box::new(rs)),
                    Err(e) => {
                        self.capture_trace(ip);
                        break UnwindCause::Error(e);
                    }
                }
            };

            match self.unwind(&mut rs, base_sp, cause) {
                Unwound::Resume => continue 'run,
                Unwound::Done(mut result) => {
                    // The activation's own frame auto-closes on every exit
                    // path; a close failure supersedes the outcome.
                    if let Err(e) = self.auto_close_frame(&rs.script.clone(), rs.sf, rs.frame) {
                        result = Err(e);
                    }
                    self.v_stack.truncate(rs.regs);
                    return ExecOutcome::Done(result);
                }
            }
        }
    }

    /// Decode and run one instruction.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        rs: &mut RunStatus,
        op: Opcode,
        ip: usize,
        code: &[u8; 5],
        u16_at: &dyn Fn(usize) -> u16,
    ) -> Result<Flow, Raised> {
        use Opcode::*;

        let next = |r: Result<(), Raised>| r.map(|_| Flow::Next);

        match op {
            Dup => {
                let v = self.reg_c(rs, code[1]);
                self.set_reg(rs, code[2], v);
                Ok(Flow::Next)
            }
            Not => next(self.op_not(rs, code[1], code[2])),
            ToNum => next(self.op_to_num(rs, code[1], code[2])),
            Rev => next(self.op_rev(rs, code[1], code[2])),
            Neg => next(self.op_neg(rs, code[1], code[2])),
            TypeOf => next(self.op_typeof(rs, code[1], code[2])),
            NotNull => {
                let b = !self.reg(rs, code[1]).is_null();
                self.set_reg(rs, code[2], Value::Bool(b));
                Ok(Flow::Next)
            }
            Global => next(self.op_global(rs, code[1])),
            Owned => next(self.op_owned(rs, u16_at(1), code[3])),
            Curr => next(self.op_curr(rs, code[1])),
            GetPtr => {
                let v = self.reg_c(rs, code[1]);
                let p = self.cptr_take_ptr(&v)?;
                self.set_reg(rs, code[2], p);
                Ok(Flow::Next)
            }
            GetValue => {
                let v = self.reg_c(rs, code[1]);
                let out = self.cptr_get_value(&v)?;
                self.set_reg(rs, code[2], out);
                Ok(Flow::Next)
            }
            SetValue => {
                let v = self.reg_c(rs, code[1]);
                let nv = self.reg_c(rs, code[2]);
                self.cptr_set_value(&v, &nv)?;
                Ok(Flow::Next)
            }

            Add => next(self.op_add(rs, code[1], code[2], code[3])),
            Sub => next(self.op_sub(rs, code[1], code[2], code[3])),
            Match => next(self.op_match(rs, code[1], code[2], code[3])),
            Exp => next(self.op_exp(rs, code[1], code[2], code[3])),
            Mul => next(self.op_mul(rs, code[1], code[2], code[3])),
            Div => next(self.op_div(rs, code[1], code[2], code[3])),
            Mod => next(self.op_mod(rs, code[1], code[2], code[3])),
            Shl => next(self.op_shl(rs, code[1], code[2], code[3])),
            Shr => next(self.op_shr(rs, code[1], code[2], code[3])),
            Ushr => next(self.op_ushr(rs, code[1], code[2], code[3])),

            Lt => next(self.op_cmp(rs, code[1], code[2], code[3], |o| o == Ordering::Less)),
            Gt => next(self.op_cmp(rs, code[1], code[2], code[3], |o| o == Ordering::Greater)),
            Le => next(self.op_cmp(rs, code[1], code[2], code[3], |o| o != Ordering::Greater)),
            Ge => next(self.op_cmp(rs, code[1], code[2], code[3], |o| o != Ordering::Less)),
            InstOf => next(self.op_instof(rs, code[1], code[2], code[3])),
            Eq => {
                let b = self.reg(rs, code[1]).equal(self.reg(rs, code[2]));
                self.set_reg(rs, code[3], Value::Bool(b));
                Ok(Flow::Next)
            }
            Ne => {
                let b = !self.reg(rs, code[1]).equal(self.reg(rs, code[2]));
                self.set_reg(rs, code[3], Value::Bool(b));
                Ok(Flow::Next)
            }
            And => next(self.op_bit(rs, code[1], code[2], code[3], |a, b| a & b, |a, b| a & b, |a, b| a & b)),
            Xor => next(self.op_bit(rs, code[1], code[2], code[3], |a, b| a ^ b, |a, b| a ^ b, |a, b| a ^ b)),
            Or => next(self.op_bit(rs, code[1], code[2], code[3], |a, b| a | b, |a, b| a | b, |a, b| a | b)),

            LoadNull => {
                self.set_reg(rs, code[1], Value::Null);
                Ok(Flow::Next)
            }
            LoadTrue => {
                self.set_reg(rs, code[1], Value::Bool(true));
                Ok(Flow::Next)
            }
            LoadFalse => {
                self.set_reg(rs, code[1], Value::Bool(false));
                Ok(Flow::Next)
            }
            This => next(self.op_this(rs, code[1])),
            ThisB => next(self.op_this_b(rs, code[1], code[2])),
            Argv => next(self.op_argv(rs, code[1])),

            GetCv => {
                let v = rs.script.cvs[u16_at(1) as usize].clone();
                self.set_reg(rs, code[3], v);
                Ok(Flow::Next)
            }
            GetPp => {
                let v = rs.script.pps[u16_at(1) as usize].clone();
                self.set_reg(rs, code[3], v);
                Ok(Flow::Next)
            }
            GetLt => next(self.op_get_lt(rs, u16_at(1), code[3])),
            GetLtt => next(self.op_get_ltt(rs, u16_at(1), code[3])),

            GetT => next(self.op_get_t(rs, u16_at(1), code[3])),
            SetT => next(self.op_set_t(rs, u16_at(1), code[3])),
            SetTAc => next(self.op_set_t_ac(rs, u16_at(1), code[3])),
            GetTB => next(self.op_get_t_b(rs, code[1], u16_at(2), code[4])),
            SetTB => next(self.op_set_t_b(rs, code[1], u16_at(2), code[4])),
            SetTBAc => next(self.op_set_t_b_ac(rs, code[1], u16_at(2), code[4])),

            GetN => next(self.op_get_n(rs, ip, u16_at(1), code[3])),
            GetG => next(self.op_get_g(rs, u16_at(1), code[3])),
            GetR => next(self.op_get_r(rs, u16_at(1), code[3])),

            GetP => {
                let base = self.reg_c(rs, code[1]);
                let key = self.reg_c(rs, code[2]);
                let v = self.get_prop(&base, &key)?;
                self.set_reg(rs, code[3], v);
                Ok(Flow::Next)
            }
            LookupP => {
                let base = self.reg_c(rs, code[1]);
                let key = self.reg_c(rs, code[2]);
                let v = self.lookup_prop(&base, &key)?;
                self.set_reg(rs, code[3], v);
                Ok(Flow::Next)
            }
            SetP => {
                let base = self.reg_c(rs, code[1]);
                let key = self.reg_c(rs, code[2]);
                let v = self.reg_c(rs, code[3]);
                self.set_prop(&base, &key, &v)?;
                Ok(Flow::Next)
            }
            GetA => next(self.op_get_a(rs, u16_at(1), code[3])),

            Throw => {
                let v = self.reg_c(rs, code[1]);
                Err(Raised::Value(v))
            }
            Ret => {
                let v = self.reg_c(rs, code[1]);
                self.v_stack[rs.rv] = v;
                Ok(Flow::Return)
            }
            Jmp => {
                self.frame_mut(rs.frame).ip = u16_at(1) as usize;
                Ok(Flow::Jump)
            }
            DeepJmp => {
                rs.jmp_ip = u16_at(2) as usize;
                rs.jmp_sp = self.s_stack.len() - code[1] as usize;
                Ok(Flow::DeepJump)
            }
            Jt => {
                if self.reg(rs, code[1]).to_bool() {
                    self.frame_mut(rs.frame).ip = u16_at(2) as usize;
                    Ok(Flow::Jump)
                } else {
                    Ok(Flow::Next)
                }
            }
            Jf => {
                if !self.reg(rs, code[1]).to_bool() {
                    self.frame_mut(rs.frame).ip = u16_at(2) as usize;
                    Ok(Flow::Jump)
                } else {
                    Ok(Flow::Next)
                }
            }
            Jnn => {
                if !self.reg(rs, code[1]).is_null() {
                    self.frame_mut(rs.frame).ip = u16_at(2) as usize;
                    Ok(Flow::Jump)
                } else {
                    Ok(Flow::Next)
                }
            }

            StrStart => next(self.op_str_start(rs, code[1])),
            StrStartT => next(self.op_str_start_t(rs, code[1], code[2])),
            StrItem => next(self.op_str_item(rs, code[1])),
            StrItemF => next(self.op_str_item_f(rs, u16_at(1), code[3])),
            StrEnd => next(self.op_str_end(rs, code[1])),

            CallStart => next(self.op_call_start(rs, code[1], code[2])),
            Arg => next(self.op_arg(rs, code[1])),
            ArgSpread => next(self.op_arg_spread(rs, code[1])),
            CallEnd => self.op_call_end(rs, code[1]),
            CallEndTail => self.op_call_end_tail(rs, code[1]),

            TryStart => next(self.op_try_start(u16_at(1), u16_at(3))),
            TryEnd => self.op_try_end(rs),
            Catch => next(self.op_catch(rs, code[1])),
            CatchEnd => next(self.op_catch_end()),
            Finally => self.op_finally(rs),

            Sched => next(self.op_sched()),
            SchedStart => next(self.op_sched_start()),
            Yield => self.op_yield(rs, code[1], code[2]),
            SPop => next(self.pop_rec()),

            IterStart => next(self.op_iter_start(rs, code[1])),
            IterStep => self.op_iter_step(rs, code[1], u16_at(2)),

            ApatStart => next(self.op_apat_start(rs, code[1])),
            ApatNext => next(self.op_apat_next()),
            ApatGet => next(self.op_apat_get(rs, code[1])),
            ApatRest => next(self.op_apat_rest(rs, code[1])),
            OpatStart => next(self.op_opat_start(rs, code[1])),
            OpatGet => next(self.op_opat_get(rs, code[1], code[2])),
            OpatRest => next(self.op_opat_rest(rs, code[1])),

            ANew => next(self.op_a_new(rs, code[1])),
            AStart => next(self.op_a_start(rs, code[1])),
            ANext => next(self.op_a_next()),
            AItem => next(self.op_a_item(rs, code[1])),
            ASpread => next(self.op_a_spread(rs, code[1])),
            AEnd => next(self.op_a_end()),

            ONew => next(self.op_o_new(rs, code[1])),
            OStart => next(self.op_o_start(rs, code[1])),
            OProp => next(self.op_o_prop(rs, code[1], code[2])),
            OSpread => next(self.op_o_spread(rs, code[1])),

            PStart => next(self.op_p_start()),
            PGet => next(self.op_p_get(rs, code[1])),
            PRest => next(self.op_p_rest(rs, code[1])),

            FNew => next(self.op_f_new(rs, u16_at(1), code[3])),
            CNew => next(self.op_c_new(rs, code[1], code[2])),
            CParent => next(self.op_c_parent(rs, code[1], code[2])),
            CConst => next(self.op_c_const(rs, code[1], code[2], code[3])),
            CVar => next(self.op_c_var(rs, code[1], code[2], code[3])),
            CAcce => next(self.op_c_acce(rs, code[1], code[2], code[3], code[4])),
            CRoAcce => next(self.op_c_ro_acce(rs, code[1], code[2], code[3])),

            EStart => next(self.op_e_start(rs, code[1])),
            EStartN => next(self.op_e_start_n(rs, u16_at(1), code[3])),
            EItem => next(self.op_e_item(rs, u16_at(1))),
            BStart => next(self.op_b_start(rs, code[1])),
            BStartN => next(self.op_b_start_n(rs, u16_at(1), code[3])),
            BItem => next(self.op_b_item(rs, u16_at(1))),

            SetName => next(self.op_set_name(rs, code[1], code[2], None)),
            SetNameG => next(self.op_set_name(rs, code[1], code[2], Some(":get"))),
            SetNameS => next(self.op_set_name(rs, code[1], code[2], Some(":set"))),
            SetScope => next(self.op_set_scope(rs, code[1], code[2])),

            NameNn => next(self.op_name_nn(rs, u16_at(1), code[3])),
            PropNn => next(self.op_prop_nn(rs, u16_at(1), code[3])),
            PpropNn => next(self.op_pprop_nn(rs, u16_at(1), code[3])),

            Nop => Ok(Flow::Next),
            Stub => unreachable!("label stubs are never emitted"),
        }
    }

    /// Walk the structured-block stack downward for a return, throw or
    /// deep jump.
    fn unwind(&mut self, rs: &mut RunStatus, base_sp: usize, mut cause: UnwindCause) -> Unwound {
        loop {
            if matches!(cause, UnwindCause::DeepJump) && rs.jmp_sp == self.s_stack.len() {
                self.frame_mut(rs.frame).ip = rs.jmp_ip;
                return Unwound::Resume;
            }

            if self.s_stack.len() == base_sp {
                break;
            }

            enum Top {
                OpenTry,
                Return(RunStatusRec),
                Other,
            }

            let top = match &self.s_stack.last().expect("record").kind {
                BlockKind::Try(t) if t.state != TryState::Finally => Top::OpenTry,
                BlockKind::Return(rsr) => Top::Return(*rsr),
                _ => Top::Other,
            };

            match top {
                Top::OpenTry => {
                    let pending = match &cause {
                        UnwindCause::Error(e) => Pending::Raised(e.clone()),
                        UnwindCause::Return => Pending::Return,
                        UnwindCause::DeepJump => Pending::DeepJump,
                    };

                    let ip = match &mut self.s_stack.last_mut().expect("record").kind {
                        BlockKind::Try(t) => {
                            let catching = t.state == TryState::Try
                                && matches!(cause, UnwindCause::Error(_));
                            let ip = if catching {
                                t.state = TryState::Catch;
                                t.catch_label
                            } else {
                                t.state = TryState::Finally;
                                t.finally_label
                            };
                            if matches!(cause, UnwindCause::DeepJump) {
                                t.jmp_ip = rs.jmp_ip;
                                t.jmp_sp = rs.jmp_sp;
                            }
                            t.pending = pending;
                            ip
                        }
                        _ => unreachable!(),
                    };

                    let bc_len = rs.script.sfuncs[rs.sf].bc_len;
                    if ip + 1 < bc_len {
                        self.frame_mut(rs.frame).ip = ip;
                        return Unwound::Resume;
                    }
                    // The label points past the function: nothing to run,
                    // drop the record and keep unwinding.
                    if let Err(e) = self.pop_rec() {
                        cause = UnwindCause::Error(e);
                    }
                }

                Top::Return(rsr) => {
                    // Leave the callee: auto-close its frame, deliver the
                    // return value, restore the caller.
                    if let Err(e) = self.auto_close_frame(&rs.script.clone(), rs.sf, rs.frame) {
                        cause = UnwindCause::Error(e);
                    }

                    if matches!(cause, UnwindCause::Return) {
                        let v = self.v_stack[rs.rv].clone();
                        self.v_stack[rsr.rv] = v;
                    }

                    let caller = rsr.frame.expect("return record without a frame");
                    let func = self.frame(caller).func.clone();
                    let (script, sfunc) = match self.function(&func) {
                        Some(f) => (f.script.clone(), f.sfunc),
                        None => unreachable!("caller frame lost its function"),
                    };
                    rs.func = func;
                    rs.script = script;
                    rs.sf = sfunc;
                    rs.frame = caller;
                    rs.args = rsr.args;
                    rs.argc = rsr.argc;
                    rs.rv = rsr.rv;
                    rs.regs = rsr.vp;
                    rs.sp = rsr.sp;
                    self.cur_frame = Some(caller);

                    if !matches!(cause, UnwindCause::Error(_)) {
                        // Resume the caller past its `call_end`.
                        self.frame_mut(caller).ip += Opcode::CallEnd.len();
                    }

                    // The return record, then the call record beneath it.
                    if let Err(e) = self.pop_rec() {
                        cause = UnwindCause::Error(e);
                    }
                    if let Err(e) = self.pop_rec() {
                        cause = UnwindCause::Error(e);
                    }

                    if matches!(cause, UnwindCause::Return) {
                        return Unwound::Resume;
                    }
                }

                Top::Other => {
                    if let Err(e) = self.pop_rec() {
                        cause = UnwindCause::Error(e);
                    }
                }
            }
        }

        match cause {
            UnwindCause::Return => Unwound::Done(Ok(())),
            UnwindCause::Error(e) => Unwound::Done(Err(e)),
            UnwindCause::DeepJump => {
                unreachable!("deep jump escaped its function")
            }
        }
    }
}
