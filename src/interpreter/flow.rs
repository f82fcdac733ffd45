//! Control-flow, call, literal-construction and declaration handlers.
//!
//! Everything here manipulates the structured-block stack or the frame
//! list; the plain value operations live in `ops`.

use crate::compiler::split_tmpl;
use crate::error::{Raised, RtError};
use crate::heap::HeapObj;
use crate::interpreter::dispatch::{Flow, RunStatus};
use crate::interpreter::frame::Frame;
use crate::interpreter::stack::{BlockKind, Pending, TryRec, TryState};
use crate::interpreter::Interpreter;
use crate::object::{Class, EnumData, Object, Prop, PropKey};
use crate::value::{OxStr, Value};

use ox_asm::Opcode;

impl Interpreter {
    // ---- literal helpers ----

    /// The innermost array/object literal under construction.
    fn innermost_literal(&self) -> Option<usize> {
        self.s_stack.iter().rposition(|r| {
            matches!(r.kind, BlockKind::Array { .. } | BlockKind::Object { .. })
        })
    }

    pub(crate) fn op_curr(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let slot = match self.innermost_literal() {
            Some(i) => match &self.s_stack[i].kind {
                BlockKind::Array { arr, .. } => *arr,
                BlockKind::Object { obj } => *obj,
                _ => unreachable!(),
            },
            None => {
                return Err(Raised::Error(RtError::type_error(
                    "no literal under construction",
                )))
            }
        };
        let v = self.v_stack[slot].clone();
        self.set_reg(rs, d0, v);
        Ok(())
    }

    /// `owned`: ensure the literal's `_owned` table exists and attach the
    /// child under a synthesized key.
    pub(crate) fn op_owned(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        let slot = match self.innermost_literal() {
            Some(i) => match &self.s_stack[i].kind {
                BlockKind::Array { arr, .. } => *arr,
                BlockKind::Object { obj } => *obj,
                _ => unreachable!(),
            },
            None => {
                return Err(Raised::Error(RtError::type_error(
                    "no literal under construction",
                )))
            }
        };
        let target = self.v_stack[slot].clone();
        let owned_key = Value::Str(OxStr::from("_owned"));

        let owned = self.get_prop(&target, &owned_key)?;
        if owned.is_null() {
            let o = Value::Ref(self.heap.alloc(HeapObj::Object(Object::new())));
            self.set_prop(&target, &owned_key, &o)?;
        }

        let key = rs.script.cvs[c0 as usize].clone();
        let child = self.reg_c(rs, s1);
        self.set_prop(&target, &key, &child)
    }

    pub(crate) fn op_global(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        if matches!(v, Value::Ref(_)) {
            self.global_refs.push(v);
        }
        Ok(())
    }

    // ---- this / arguments ----

    pub(crate) fn op_this(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let v = self.frame(rs.frame).this.clone();
        self.set_reg(rs, d0, v);
        Ok(())
    }

    pub(crate) fn op_this_b(&mut self, rs: &RunStatus, o0: u8, d1: u8) -> Result<(), Raised> {
        let frames = match self.function(&rs.func) {
            Some(f) => f.frames.clone(),
            None => Vec::new(),
        };
        let v = match frames.get(o0 as usize) {
            Some(gc) => self.frame(*gc).this.clone(),
            None => Value::Null,
        };
        self.set_reg(rs, d1, v);
        Ok(())
    }

    /// The argument vector, materialized lazily and cached in the
    /// register window's extra slot.
    pub(crate) fn op_argv(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let argv_slot = rs.regs + rs.script.sfuncs[rs.sf].reg_num as usize;
        if self.v_stack[argv_slot].is_null() {
            let items = self.v_stack[rs.args..rs.args + rs.argc].to_vec();
            let arr = Value::Ref(self.heap.alloc(HeapObj::Array(items)));
            self.v_stack[argv_slot] = arr;
        }
        let v = self.v_stack[argv_slot].clone();
        self.set_reg(rs, d0, v);
        Ok(())
    }

    pub(crate) fn op_get_a(&mut self, rs: &RunStatus, i0: u16, d1: u8) -> Result<(), Raised> {
        let v = if (i0 as usize) < rs.argc {
            self.v_stack[rs.args + i0 as usize].clone()
        } else {
            Value::Null
        };
        self.set_reg(rs, d1, v);
        Ok(())
    }

    // ---- localized text ----

    fn resolve_text(&self, domain: &str, text: &str) -> String {
        match &self.text_resolver {
            Some(r) => r(domain, text).unwrap_or_else(|| text.to_string()),
            None => text.to_string(),
        }
    }

    pub(crate) fn op_get_lt(&mut self, rs: &RunStatus, t0: u16, d1: u8) -> Result<(), Raised> {
        let raw = rs.script.ts[t0 as usize].clone();
        let out = match &rs.script.text_domain {
            None => raw,
            Some(domain) => {
                let mut lts = rs.script.lts.lock().expect("text lock");
                if lts[t0 as usize].is_null() {
                    let text = match &raw {
                        Value::Str(s) => s.as_str(),
                        _ => "",
                    };
                    let localized = self.resolve_text(domain, text);
                    lts[t0 as usize] = Value::Str(OxStr::from(localized));
                }
                lts[t0 as usize].clone()
            }
        };
        self.set_reg(rs, d1, out);
        Ok(())
    }

    pub(crate) fn op_get_ltt(&mut self, rs: &RunStatus, t0: u16, d1: u8) -> Result<(), Raised> {
        let cached = rs.script.ltts.lock().expect("template lock")[t0 as usize].clone();
        if !cached.is_null() {
            self.set_reg(rs, d1, cached);
            return Ok(());
        }

        let joined = match &rs.script.tts[t0 as usize] {
            Value::Str(s) => s.clone(),
            _ => OxStr::from(""),
        };
        let resolved = match &rs.script.text_domain {
            None => joined.to_string(),
            Some(domain) => self.resolve_text(domain, &joined),
        };
        let parts: Vec<Value> = split_tmpl(&resolved).into_iter().map(Value::Str).collect();
        let tmpl = Value::Ref(self.heap.alloc(HeapObj::Array(parts)));

        rs.script.ltts.lock().expect("template lock")[t0 as usize] = tmpl.clone();
        self.set_reg(rs, d1, tmpl);
        Ok(())
    }

    // ---- declaration slots ----

    pub(crate) fn op_get_t(&mut self, rs: &RunStatus, i0: u16, d1: u8) -> Result<(), Raised> {
        let v = self.frame(rs.frame).v[i0 as usize].clone();
        self.set_reg(rs, d1, v);
        Ok(())
    }

    pub(crate) fn op_set_t(&mut self, rs: &RunStatus, i0: u16, s1: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s1);
        self.frame_mut(rs.frame).v[i0 as usize] = v;
        Ok(())
    }

    /// Writing an auto-close slot closes the previous value first, unless
    /// it is the same value.
    pub(crate) fn op_set_t_ac(&mut self, rs: &RunStatus, i0: u16, s1: u8) -> Result<(), Raised> {
        let new = self.reg_c(rs, s1);
        let old = self.frame(rs.frame).v[i0 as usize].clone();
        if !old.equal(&new) {
            self.close_value(&old)?;
            self.frame_mut(rs.frame).v[i0 as usize] = new;
        }
        Ok(())
    }

    fn outer_frame(&self, rs: &RunStatus, off: u8) -> Result<crate::heap::Gc, Raised> {
        self.function(&rs.func)
            .and_then(|f| f.frames.get(off as usize).copied())
            .ok_or_else(|| Raised::Error(RtError::reference_error("no such enclosing frame")))
    }

    pub(crate) fn op_get_t_b(
        &mut self,
        rs: &RunStatus,
        o0: u8,
        i1: u16,
        d2: u8,
    ) -> Result<(), Raised> {
        let frame = self.outer_frame(rs, o0)?;
        let v = self.frame(frame).v[i1 as usize].clone();
        self.set_reg(rs, d2, v);
        Ok(())
    }

    pub(crate) fn op_set_t_b(
        &mut self,
        rs: &RunStatus,
        o0: u8,
        i1: u16,
        s2: u8,
    ) -> Result<(), Raised> {
        let frame = self.outer_frame(rs, o0)?;
        let v = self.reg_c(rs, s2);
        self.frame_mut(frame).v[i1 as usize] = v;
        Ok(())
    }

    pub(crate) fn op_set_t_b_ac(
        &mut self,
        rs: &RunStatus,
        o0: u8,
        i1: u16,
        s2: u8,
    ) -> Result<(), Raised> {
        let frame = self.outer_frame(rs, o0)?;
        let new = self.reg_c(rs, s2);
        let old = self.frame(frame).v[i1 as usize].clone();
        if !old.equal(&new) {
            self.close_value(&old)?;
            self.frame_mut(frame).v[i1 as usize] = new;
        }
        Ok(())
    }

    // ---- global reads ----

    /// `get_n`: first execution resolves the name and rewrites itself in
    /// place, to `get_r slot` for a root declaration or to `get_g` for a
    /// Global property. Both forms keep the 4-byte width.
    pub(crate) fn op_get_n(
        &mut self,
        rs: &RunStatus,
        ip: usize,
        c0: u16,
        d1: u8,
    ) -> Result<(), Raised> {
        let name = rs.script.cvs[c0 as usize].clone();
        let key = match &name {
            Value::Str(s) => s.clone(),
            _ => OxStr::from(""),
        };

        let decl = rs.script.sfuncs[0].decl(&key);
        let at = rs.script.sfuncs[rs.sf].bc_start + ip;

        match decl {
            Some(id) => {
                {
                    let mut bc = rs.script.bc.lock().expect("bytecode lock");
                    bc[at] = Opcode::GetR as u8;
                    bc[at + 1] = (id >> 8) as u8;
                    bc[at + 2] = (id & 0xff) as u8;
                }
                let v = self.frame(rs.script.frame).v[id as usize].clone();
                self.set_reg(rs, d1, v);
                Ok(())
            }
            None => {
                {
                    let mut bc = rs.script.bc.lock().expect("bytecode lock");
                    bc[at] = Opcode::GetG as u8;
                }
                let v = self.global_get_throw(&name)?;
                self.set_reg(rs, d1, v);
                Ok(())
            }
        }
    }

    pub(crate) fn op_get_g(&mut self, rs: &RunStatus, c0: u16, d1: u8) -> Result<(), Raised> {
        let name = rs.script.cvs[c0 as usize].clone();
        let v = self.global_get_throw(&name)?;
        self.set_reg(rs, d1, v);
        Ok(())
    }

    pub(crate) fn op_get_r(&mut self, rs: &RunStatus, i0: u16, d1: u8) -> Result<(), Raised> {
        let v = self.frame(rs.script.frame).v[i0 as usize].clone();
        self.set_reg(rs, d1, v);
        Ok(())
    }

    // ---- multipart strings ----

    pub(crate) fn op_str_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let tmpl = self.reg_c(rs, s0);
        let vbase = self.push_rec(BlockKind::Str {
            func: None,
            tmpl: 0,
            argc: 1,
        });
        self.v_stack.push(tmpl);
        if let BlockKind::Str { tmpl, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *tmpl = vbase;
        }
        Ok(())
    }

    pub(crate) fn op_str_start_t(&mut self, rs: &RunStatus, s0: u8, s1: u8) -> Result<(), Raised> {
        let tmpl = self.reg_c(rs, s0);
        let f = self.reg_c(rs, s1);
        let vbase = self.push_rec(BlockKind::Str {
            func: None,
            tmpl: 0,
            argc: 1,
        });
        self.v_stack.push(f);
        self.v_stack.push(tmpl);
        if let BlockKind::Str { func, tmpl, .. } =
            &mut self.s_stack.last_mut().expect("record").kind
        {
            *func = Some(vbase);
            *tmpl = vbase + 1;
        }
        Ok(())
    }

    pub(crate) fn op_str_item(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let s = v.to_ox_string(&self.heap)?;
        self.v_stack.push(Value::Str(s));
        if let BlockKind::Str { argc, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *argc += 1;
        }
        Ok(())
    }

    pub(crate) fn op_str_item_f(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        let spec = rs.script.cvs[c0 as usize].to_number()? as i64;
        let v = self.reg_c(rs, s1);
        let s = v.to_ox_string_format(&self.heap, spec)?;
        self.v_stack.push(Value::Str(s));
        if let BlockKind::Str { argc, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *argc += 1;
        }
        Ok(())
    }

    pub(crate) fn op_str_end(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let (func, tmpl, argc) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Str { func, tmpl, argc } => (*func, *tmpl, *argc),
            _ => unreachable!("str_end without a string record"),
        };

        let out = match func {
            Some(fslot) => {
                let f = self.v_stack[fslot].clone();
                let args = self.v_stack[tmpl..tmpl + argc].to_vec();
                self.call_value(f, Value::Null, args)?
            }
            None => {
                let tmpl_v = self.v_stack[tmpl].clone();
                let parts: Vec<Value> = match &tmpl_v {
                    Value::Ref(gc) => match self.heap.get(*gc) {
                        HeapObj::Array(items) => items.clone(),
                        _ => vec![tmpl_v.clone()],
                    },
                    other => vec![other.clone()],
                };

                let mut out = String::new();
                for (i, part) in parts.iter().enumerate() {
                    if !part.is_null() {
                        out.push_str(&part.to_ox_string(&self.heap)?);
                    }
                    if i != parts.len() - 1 {
                        if let Some(sub) = self.v_stack.get(tmpl + 1 + i) {
                            out.push_str(&sub.to_ox_string(&self.heap)?);
                        }
                    }
                }
                Value::Str(OxStr::from(out))
            }
        };

        self.pop_rec()?;
        self.set_reg(rs, d0, out);
        Ok(())
    }

    // ---- calls ----

    pub(crate) fn op_call_start(&mut self, rs: &RunStatus, s0: u8, s1: u8) -> Result<(), Raised> {
        let f = self.reg_c(rs, s0);
        let this = self.reg_c(rs, s1);
        let vbase = self.push_rec(BlockKind::Call {
            f: 0,
            this: 0,
            iter: 0,
            args: 0,
            argc: 0,
        });
        self.v_stack.push(f);
        self.v_stack.push(this);
        self.v_stack.push(Value::Null);
        if let BlockKind::Call {
            f, this, iter, args, ..
        } = &mut self.s_stack.last_mut().expect("record").kind
        {
            *f = vbase;
            *this = vbase + 1;
            *iter = vbase + 2;
            *args = vbase + 3;
        }
        Ok(())
    }

    pub(crate) fn op_arg(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        self.v_stack.push(v);
        if let BlockKind::Call { argc, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *argc += 1;
        }
        Ok(())
    }

    pub(crate) fn op_arg_spread(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let iter_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Call { iter, .. } => *iter,
            _ => unreachable!("arg_spread without a call record"),
        };

        let it = self.iterator_new(&v)?;
        self.v_stack[iter_slot] = it.clone();

        let spread = (|| -> Result<usize, Raised> {
            let mut n = 0usize;
            while !self.iterator_end(&it)? {
                let item = self.iterator_value(&it)?;
                self.v_stack.push(item);
                n += 1;
                self.iterator_next(&it)?;
            }
            Ok(n)
        })();

        let close = self.close_value(&it);
        let n = spread?;
        close?;

        if let BlockKind::Call { argc, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *argc += n;
        }
        Ok(())
    }

    /// `call_end`: enter the callee without native recursion by pushing a
    /// return record, or complete a host-level call directly.
    pub(crate) fn op_call_end(&mut self, rs: &mut RunStatus, d0: u8) -> Result<Flow, Raised> {
        let (fslot, this_slot, args, argc) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Call {
                f, this, args, argc, ..
            } => (*f, *this, *args, *argc),
            _ => unreachable!("call_end without a call record"),
        };
        let fv = self.v_stack[fslot].clone();
        let this = self.v_stack[this_slot].clone();

        let callee = match self.function(&fv) {
            Some(f) => Some((f.script.clone(), f.sfunc)),
            None => None,
        };

        match callee {
            Some((script, sfunc)) => {
                let rv_idx = rs.regs + d0 as usize;

                // Save the caller.
                let rsr = crate::interpreter::stack::RunStatusRec {
                    frame: Some(rs.frame),
                    args: rs.args,
                    argc: rs.argc,
                    rv: rs.rv,
                    vp: rs.regs,
                    sp: rs.sp,
                };
                self.push_rec(BlockKind::Return(rsr));

                // Enter the callee.
                let decls = script.sfuncs[sfunc].decls.len();
                let reg_num = script.sfuncs[sfunc].reg_num as usize;
                let frame = self.heap.alloc(HeapObj::Frame(Frame::new(
                    fv.clone(),
                    decls,
                    Some(rs.frame),
                )));
                self.frame_mut(frame).this = this;
                self.cur_frame = Some(frame);

                rs.func = fv;
                rs.script = script;
                rs.sf = sfunc;
                rs.frame = frame;
                rs.args = args;
                rs.argc = argc;
                rs.rv = rv_idx;
                rs.regs = self.v_stack.len();
                self.v_stack
                    .extend(std::iter::repeat(Value::Null).take(reg_num + 1));
                rs.sp = self.s_stack.len();

                Ok(Flow::Jump)
            }
            None => {
                let args_v = self.v_stack[args..args + argc].to_vec();
                let out = self.call_value(fv, this, args_v)?;
                self.pop_rec()?;
                self.set_reg(rs, d0, out);
                Ok(Flow::Next)
            }
        }
    }

    /// `call_end_tail`: when the callee is the running function, reuse
    /// the frame: move the receiver and arguments over the current ones,
    /// pop every record this activation opened, and restart at offset 0.
    pub(crate) fn op_call_end_tail(&mut self, rs: &mut RunStatus, d0: u8) -> Result<Flow, Raised> {
        let (fslot, this_slot, args, argc) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Call {
                f, this, args, argc, ..
            } => (*f, *this, *args, *argc),
            _ => unreachable!("call_end_tail without a call record"),
        };
        let fv = self.v_stack[fslot].clone();

        if !fv.equal(&rs.func) {
            return self.op_call_end(rs, d0);
        }

        let this = self.v_stack[this_slot].clone();
        let args_v = self.v_stack[args..args + argc].to_vec();

        while self.s_stack.len() > rs.sp {
            self.pop_rec()?;
        }

        // The extra window slot caches argv; the moved arguments live
        // just above it.
        let base = rs.regs + rs.script.sfuncs[rs.sf].reg_num as usize;
        self.v_stack.truncate(base + 1);
        for slot in &mut self.v_stack[rs.regs..=base] {
            *slot = Value::Null;
        }

        self.v_stack.push(this.clone());
        let args_at = self.v_stack.len();
        self.v_stack.extend(args_v);

        rs.args = args_at;
        rs.argc = argc;

        let f = self.frame_mut(rs.frame);
        f.ip = 0;
        f.this = this;

        Ok(Flow::Jump)
    }

    // ---- try / catch / finally ----

    pub(crate) fn op_try_start(&mut self, l0: u16, l1: u16) -> Result<(), Raised> {
        self.push_rec(BlockKind::Try(TryRec {
            state: TryState::Try,
            catch_label: l0 as usize,
            finally_label: l1 as usize,
            pending: Pending::None,
            jmp_ip: 0,
            jmp_sp: 0,
        }));
        Ok(())
    }

    pub(crate) fn op_try_end(&mut self, rs: &RunStatus) -> Result<Flow, Raised> {
        match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Try(t) => {
                t.state = TryState::Finally;
                let l = t.finally_label;
                self.frame_mut(rs.frame).ip = l;
                Ok(Flow::Jump)
            }
            _ => unreachable!("try_end without a try record"),
        }
    }

    pub(crate) fn op_catch(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let pending = match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Try(t) => std::mem::take(&mut t.pending),
            _ => unreachable!("catch without a try record"),
        };
        let v = match pending {
            Pending::Raised(r) => self.materialize(r),
            _ => Value::Null,
        };
        self.error_trace.clear();
        self.set_reg(rs, d0, v);
        Ok(())
    }

    pub(crate) fn op_catch_end(&mut self) -> Result<(), Raised> {
        match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Try(t) => {
                t.state = TryState::Finally;
                Ok(())
            }
            _ => unreachable!("catch_end without a try record"),
        }
    }

    /// `finally`: pop the record and resume whatever outcome the finally
    /// body interrupted.
    pub(crate) fn op_finally(&mut self, rs: &mut RunStatus) -> Result<Flow, Raised> {
        let (pending, jmp_ip, jmp_sp) = match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Try(t) => (
                std::mem::take(&mut t.pending),
                t.jmp_ip,
                t.jmp_sp,
            ),
            _ => unreachable!("finally without a try record"),
        };

        rs.jmp_ip = jmp_ip;
        rs.jmp_sp = jmp_sp;
        self.pop_rec()?;

        match pending {
            Pending::None => Ok(Flow::Next),
            Pending::Raised(r) => Err(r),
            Pending::Return => Ok(Flow::Return),
            Pending::DeepJump => Ok(Flow::DeepJump),
        }
    }

    // ---- scheduling, fibers ----

    pub(crate) fn op_sched(&mut self) -> Result<(), Raised> {
        // Suspension point: other threads may take the VM between
        // dispatch turns.
        std::thread::yield_now();
        Ok(())
    }

    pub(crate) fn op_sched_start(&mut self) -> Result<(), Raised> {
        self.push_rec(BlockKind::Sched);
        Ok(())
    }

    pub(crate) fn op_yield(&mut self, rs: &mut RunStatus, s0: u8, d1: u8) -> Result<Flow, Raised> {
        if rs.fiber.is_none() {
            return Err(Raised::Error(RtError::reference_error(
                "\"yield\" must be used in fiber",
            )));
        }
        rs.yield_val = self.reg_c(rs, s0);
        rs.yield_reg = rs.regs + d1 as usize;
        Ok(Flow::Yield)
    }

    // ---- iteration ----

    pub(crate) fn op_iter_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let vbase = self.push_rec(BlockKind::Iter { iter: 0 });
        self.v_stack.push(Value::Null);
        if let BlockKind::Iter { iter } = &mut self.s_stack.last_mut().expect("record").kind {
            *iter = vbase;
        }

        match self.iterator_new(&v) {
            Ok(it) => {
                self.v_stack[vbase] = it;
                Ok(())
            }
            Err(e) => {
                // The record is abandoned without closing: the iterator
                // was never created.
                self.s_stack.pop();
                self.v_stack.truncate(vbase);
                Err(e)
            }
        }
    }

    pub(crate) fn op_iter_step(
        &mut self,
        rs: &RunStatus,
        d0: u8,
        l1: u16,
    ) -> Result<Flow, Raised> {
        let iter_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Iter { iter } => *iter,
            _ => unreachable!("iter_step without an iterator record"),
        };
        let it = self.v_stack[iter_slot].clone();

        if self.iterator_end(&it)? {
            self.pop_rec()?;
            self.frame_mut(rs.frame).ip = l1 as usize;
            return Ok(Flow::Jump);
        }

        let v = self.iterator_value(&it)?;
        self.iterator_next(&it)?;
        self.set_reg(rs, d0, v);
        Ok(Flow::Next)
    }

    // ---- destructuring ----

    pub(crate) fn op_apat_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let vbase = self.push_rec(BlockKind::Apat { val: 0, id: 0 });
        self.v_stack.push(v);
        if let BlockKind::Apat { val, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *val = vbase;
        }
        Ok(())
    }

    pub(crate) fn op_apat_next(&mut self) -> Result<(), Raised> {
        if let BlockKind::Apat { id, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *id += 1;
        }
        Ok(())
    }

    pub(crate) fn op_apat_get(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let (val, id) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Apat { val, id } => (*val, *id),
            _ => unreachable!("apat_get without a pattern record"),
        };
        let base = self.v_stack[val].clone();
        let item = self.get_prop(&base, &Value::Number(id as f64))?;
        if let BlockKind::Apat { id, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *id += 1;
        }
        self.set_reg(rs, d0, item);
        Ok(())
    }

    pub(crate) fn op_apat_rest(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let (val, id) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Apat { val, id } => (*val, *id),
            _ => unreachable!("apat_rest without a pattern record"),
        };
        let base = self.v_stack[val].clone();
        let len = self
            .get_prop(&base, &Value::Str(OxStr::from("length")))?
            .to_number()? as usize;

        let mut items = Vec::new();
        let mut i = id;
        while i < len {
            items.push(self.get_prop(&base, &Value::Number(i as f64))?);
            i += 1;
        }
        if let BlockKind::Apat { id, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *id = i;
        }

        let arr = Value::Ref(self.heap.alloc(HeapObj::Array(items)));
        self.set_reg(rs, d0, arr);
        Ok(())
    }

    pub(crate) fn op_opat_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let vbase = self.push_rec(BlockKind::Opat {
            obj: 0,
            seen: Default::default(),
        });
        self.v_stack.push(v);
        if let BlockKind::Opat { obj, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *obj = vbase;
        }
        Ok(())
    }

    pub(crate) fn op_opat_get(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let obj_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Opat { obj, .. } => *obj,
            _ => unreachable!("opat_get without a pattern record"),
        };
        let base = self.v_stack[obj_slot].clone();
        let key = self.reg_c(rs, s0);
        let v = self.get_prop(&base, &key)?;

        let k = PropKey::from_value(&key, &self.heap).map_err(Raised::Error)?;
        if let BlockKind::Opat { seen, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            seen.insert(k);
        }

        self.set_reg(rs, d1, v);
        Ok(())
    }

    pub(crate) fn op_opat_rest(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let (obj_slot, seen) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Opat { obj, seen } => (*obj, seen.clone()),
            _ => unreachable!("opat_rest without a pattern record"),
        };
        let base = self.v_stack[obj_slot].clone();
        if !matches!(&base, Value::Ref(gc) if matches!(self.heap.get(*gc), HeapObj::Object(_))) {
            return Err(Raised::Error(RtError::type_error(
                "the value is not an object",
            )));
        }

        let rest = Value::Ref(self.heap.alloc(HeapObj::Object(Object::new())));
        let it = self.entries_iter(&base)?;
        while !self.iterator_end(&it)? {
            let entry = self.iterator_value(&it)?;
            let k = self.get_prop(&entry, &Value::Number(0.0))?;
            let kk = PropKey::from_value(&k, &self.heap).map_err(Raised::Error)?;
            if !seen.contains(&kk) {
                let v = self.get_prop(&entry, &Value::Number(1.0))?;
                self.set_prop(&rest, &k, &v)?;
            }
            self.iterator_next(&it)?;
        }

        self.set_reg(rs, d0, rest);
        Ok(())
    }

    // ---- array literals ----

    pub(crate) fn op_a_new(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let arr = Value::Ref(self.heap.alloc(HeapObj::Array(Vec::new())));
        self.set_reg(rs, d0, arr);
        Ok(())
    }

    pub(crate) fn op_a_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let len = self
            .get_prop(&v, &Value::Str(OxStr::from("length")))?
            .to_index()
            .unwrap_or(0);
        let vbase = self.push_rec(BlockKind::Array { arr: 0, id: len });
        self.v_stack.push(v);
        if let BlockKind::Array { arr, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *arr = vbase;
        }
        Ok(())
    }

    pub(crate) fn op_a_next(&mut self) -> Result<(), Raised> {
        if let BlockKind::Array { id, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *id += 1;
        }
        Ok(())
    }

    pub(crate) fn op_a_item(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let (arr, id) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Array { arr, id } => (*arr, *id),
            _ => unreachable!("a_item without an array record"),
        };
        let base = self.v_stack[arr].clone();
        let v = self.reg_c(rs, s0);
        self.set_prop(&base, &Value::Number(id as f64), &v)?;
        if let BlockKind::Array { id, .. } = &mut self.s_stack.last_mut().expect("record").kind {
            *id += 1;
        }
        Ok(())
    }

    pub(crate) fn op_a_spread(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let arr_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Array { arr, .. } => *arr,
            _ => unreachable!("a_spread without an array record"),
        };
        let base = self.v_stack[arr_slot].clone();
        let v = self.reg_c(rs, s0);

        let it = self.iterator_new(&v)?;
        let spread = (|| -> Result<usize, Raised> {
            let mut n = 0;
            while !self.iterator_end(&it)? {
                let item = self.iterator_value(&it)?;
                let id = match &self.s_stack.last().expect("record").kind {
                    BlockKind::Array { id, .. } => *id,
                    _ => unreachable!(),
                };
                self.set_prop(&base, &Value::Number(id as f64), &item)?;
                if let BlockKind::Array { id, .. } =
                    &mut self.s_stack.last_mut().expect("record").kind
                {
                    *id += 1;
                }
                n += 1;
                self.iterator_next(&it)?;
            }
            Ok(n)
        })();

        let close = self.close_value(&it);
        spread?;
        close
    }

    pub(crate) fn op_a_end(&mut self) -> Result<(), Raised> {
        let (arr, id) = match &self.s_stack.last().expect("record").kind {
            BlockKind::Array { arr, id } => (*arr, *id),
            _ => unreachable!("a_end without an array record"),
        };
        if let Value::Ref(gc) = self.v_stack[arr].clone() {
            if let HeapObj::Array(items) = self.heap.get_mut(gc) {
                items.resize(id, Value::Null);
            }
        }
        self.pop_rec()
    }

    // ---- object literals ----

    pub(crate) fn op_o_new(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let o = Value::Ref(self.heap.alloc(HeapObj::Object(Object::new())));
        self.set_reg(rs, d0, o);
        Ok(())
    }

    pub(crate) fn op_o_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let vbase = self.push_rec(BlockKind::Object { obj: 0 });
        self.v_stack.push(v);
        if let BlockKind::Object { obj } = &mut self.s_stack.last_mut().expect("record").kind {
            *obj = vbase;
        }
        Ok(())
    }

    pub(crate) fn op_o_prop(&mut self, rs: &RunStatus, s0: u8, s1: u8) -> Result<(), Raised> {
        let obj_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Object { obj } => *obj,
            _ => unreachable!("o_prop without an object record"),
        };
        let base = self.v_stack[obj_slot].clone();
        let key = self.reg_c(rs, s0);
        let v = self.reg_c(rs, s1);
        self.set_prop(&base, &key, &v)
    }

    pub(crate) fn op_o_spread(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        let obj_slot = match &self.s_stack.last().expect("record").kind {
            BlockKind::Object { obj } => *obj,
            _ => unreachable!("o_spread without an object record"),
        };
        let base = self.v_stack[obj_slot].clone();
        let v = self.reg_c(rs, s0);

        let it = self.entries_iter(&v)?;
        let spread = (|| -> Result<(), Raised> {
            while !self.iterator_end(&it)? {
                let entry = self.iterator_value(&it)?;
                let k = self.get_prop(&entry, &Value::Number(0.0))?;
                let pv = self.get_prop(&entry, &Value::Number(1.0))?;
                self.set_prop(&base, &k, &pv)?;
                self.iterator_next(&it)?;
            }
            Ok(())
        })();

        let close = self.close_value(&it);
        spread?;
        close
    }

    // ---- parameters ----

    pub(crate) fn op_p_start(&mut self) -> Result<(), Raised> {
        self.push_rec(BlockKind::Param { id: 0 });
        Ok(())
    }

    pub(crate) fn op_p_get(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let id = match &self.s_stack.last().expect("record").kind {
            BlockKind::Param { id } => *id,
            _ => unreachable!("p_get without a parameter record"),
        };
        let v = if id < rs.argc {
            if let BlockKind::Param { id } = &mut self.s_stack.last_mut().expect("record").kind {
                *id += 1;
            }
            self.v_stack[rs.args + id].clone()
        } else {
            Value::Null
        };
        self.set_reg(rs, d0, v);
        Ok(())
    }

    pub(crate) fn op_p_rest(&mut self, rs: &RunStatus, d0: u8) -> Result<(), Raised> {
        let id = match &self.s_stack.last().expect("record").kind {
            BlockKind::Param { id } => *id,
            _ => unreachable!("p_rest without a parameter record"),
        };
        let items: Vec<Value> = if id < rs.argc {
            self.v_stack[rs.args + id..rs.args + rs.argc].to_vec()
        } else {
            Vec::new()
        };
        if let BlockKind::Param { id } = &mut self.s_stack.last_mut().expect("record").kind {
            *id = rs.argc;
        }
        let arr = Value::Ref(self.heap.alloc(HeapObj::Array(items)));
        self.set_reg(rs, d0, arr);
        Ok(())
    }

    // ---- functions, classes, enums ----

    pub(crate) fn op_f_new(&mut self, rs: &RunStatus, i0: u16, d1: u8) -> Result<(), Raised> {
        let script = rs.script.clone();
        let v = self.function_value(&script, i0 as usize, Some(rs));
        self.set_reg(rs, d1, v);
        Ok(())
    }

    pub(crate) fn op_c_new(&mut self, rs: &RunStatus, d0: u8, d1: u8) -> Result<(), Raised> {
        let template = self.heap.alloc(HeapObj::Object(Object::new()));
        let class = self.heap.alloc(HeapObj::Class(Class {
            object: Object::new(),
            template,
            parents: Vec::new(),
        }));
        self.set_reg(rs, d0, Value::Ref(class));
        self.set_reg(rs, d1, Value::Ref(template));
        Ok(())
    }

    pub(crate) fn op_c_parent(&mut self, rs: &RunStatus, s0: u8, s1: u8) -> Result<(), Raised> {
        let cls = self.reg_c(rs, s0);
        let parent = self.reg_c(rs, s1);
        let pgc = match &parent {
            Value::Ref(gc) if matches!(self.heap.get(*gc), HeapObj::Class(_)) => *gc,
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "the parent is not a class",
                )))
            }
        };
        match &cls {
            Value::Ref(gc) => match self.heap.get_mut(*gc) {
                HeapObj::Class(c) => {
                    c.parents.push(pgc);
                    Ok(())
                }
                _ => Err(Raised::Error(RtError::type_error("the value is not a class"))),
            },
            _ => Err(Raised::Error(RtError::type_error("the value is not a class"))),
        }
    }

    fn class_member(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        prop: Prop,
    ) -> Result<(), Raised> {
        let target = self.reg_c(rs, s0);
        let name = self.reg_c(rs, s1);
        let key_s = name.to_ox_string(&self.heap)?;
        let k = PropKey::Str(self.interner.singleton(&key_s));

        match &target {
            Value::Ref(gc) => match self.heap.get_mut(*gc) {
                HeapObj::Object(o) => {
                    o.define(k, prop);
                    Ok(())
                }
                HeapObj::Class(c) => {
                    c.object.define(k, prop);
                    Ok(())
                }
                _ => Err(Raised::Error(RtError::type_error(
                    "members need a class or object",
                ))),
            },
            _ => Err(Raised::Error(RtError::type_error(
                "members need a class or object",
            ))),
        }
    }

    pub(crate) fn op_c_const(&mut self, rs: &RunStatus, s0: u8, s1: u8, s2: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s2);
        self.class_member(rs, s0, s1, Prop::Const(v))
    }

    pub(crate) fn op_c_var(&mut self, rs: &RunStatus, s0: u8, s1: u8, s2: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s2);
        self.class_member(rs, s0, s1, Prop::Var(v))
    }

    pub(crate) fn op_c_acce(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        s2: u8,
        s3: u8,
    ) -> Result<(), Raised> {
        let get = self.reg_c(rs, s2);
        let set = self.reg_c(rs, s3);
        self.class_member(rs, s0, s1, Prop::Accessor { get, set: Some(set) })
    }

    pub(crate) fn op_c_ro_acce(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        s2: u8,
    ) -> Result<(), Raised> {
        let get = self.reg_c(rs, s2);
        self.class_member(rs, s0, s1, Prop::Accessor { get, set: None })
    }

    fn enum_start(
        &mut self,
        rs: &RunStatus,
        target_reg: u8,
        name_cv: Option<u16>,
        bitfield: bool,
    ) -> Result<(), Raised> {
        let target = self.reg_c(rs, target_reg);
        let en = Value::Ref(self.heap.alloc(HeapObj::Enum(EnumData {
            bitfield,
            ..Default::default()
        })));

        let vbase = if bitfield {
            self.push_rec(BlockKind::Bitfield {
                target: 0,
                en: 0,
                next: 0,
            })
        } else {
            self.push_rec(BlockKind::Enum {
                target: 0,
                en: 0,
                next: 0,
            })
        };
        self.v_stack.push(target.clone());
        self.v_stack.push(en.clone());
        match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Enum { target, en, .. } | BlockKind::Bitfield { target, en, .. } => {
                *target = vbase;
                *en = vbase + 1;
            }
            _ => unreachable!(),
        }

        if let Some(cv) = name_cv {
            let name = rs.script.cvs[cv as usize].clone();
            let key_s = name.to_ox_string(&self.heap)?;
            let k = PropKey::Str(self.interner.singleton(&key_s));
            if let Value::Ref(gc) = &target {
                match self.heap.get_mut(*gc) {
                    HeapObj::Object(o) => o.define(k, Prop::Const(en.clone())),
                    HeapObj::Class(c) => c.object.define(k, Prop::Const(en.clone())),
                    _ => {}
                }
            }
            if let Value::Str(s) = &name {
                self.set_display_name(&en, s.clone());
            }
        }

        Ok(())
    }

    pub(crate) fn op_e_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        self.enum_start(rs, s0, None, false)
    }

    pub(crate) fn op_e_start_n(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        self.enum_start(rs, s1, Some(c0), false)
    }

    pub(crate) fn op_b_start(&mut self, rs: &RunStatus, s0: u8) -> Result<(), Raised> {
        self.enum_start(rs, s0, None, true)
    }

    pub(crate) fn op_b_start_n(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        self.enum_start(rs, s1, Some(c0), true)
    }

    /// Add an item to the enum/bitfield under construction and mirror it
    /// as a constant on the owning value.
    fn enum_item(&mut self, rs: &RunStatus, c0: u16) -> Result<(), Raised> {
        let (target_slot, en_slot, v) = match &mut self.s_stack.last_mut().expect("record").kind {
            BlockKind::Enum { target, en, next } => {
                let v = *next;
                *next += 1;
                (*target, *en, v)
            }
            BlockKind::Bitfield { target, en, next } => {
                let v = 1i64 << *next;
                *next += 1;
                (*target, *en, v)
            }
            _ => unreachable!("enum item without an enum record"),
        };

        let name = rs.script.cvs[c0 as usize].clone();
        let name_s = name.to_ox_string(&self.heap)?;
        let name_s = self.interner.singleton(&name_s);

        let en = self.v_stack[en_slot].clone();
        if let Value::Ref(gc) = &en {
            if let HeapObj::Enum(e) = self.heap.get_mut(*gc) {
                e.items.push((name_s.clone(), v));
            }
        }

        let target = self.v_stack[target_slot].clone();
        if let Value::Ref(gc) = &target {
            let k = PropKey::Str(name_s);
            match self.heap.get_mut(*gc) {
                HeapObj::Object(o) => o.define(k, Prop::Const(Value::Number(v as f64))),
                HeapObj::Class(c) => c.object.define(k, Prop::Const(Value::Number(v as f64))),
                _ => {}
            }
        }

        Ok(())
    }

    pub(crate) fn op_e_item(&mut self, rs: &RunStatus, c0: u16) -> Result<(), Raised> {
        self.enum_item(rs, c0)
    }

    pub(crate) fn op_b_item(&mut self, rs: &RunStatus, c0: u16) -> Result<(), Raised> {
        self.enum_item(rs, c0)
    }

    // ---- display names ----

    pub(crate) fn op_set_name(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        suffix: Option<&str>,
    ) -> Result<(), Raised> {
        let target = self.reg_c(rs, s0);
        let name = self.reg_c(rs, s1);
        let mut name_s = name.to_ox_string(&self.heap)?.to_string();
        if let Some(sfx) = suffix {
            name_s.push_str(sfx);
        }
        self.set_display_name(&target, OxStr::from(name_s));
        Ok(())
    }

    pub(crate) fn op_set_scope(&mut self, rs: &RunStatus, s0: u8, s1: u8) -> Result<(), Raised> {
        let target = self.reg_c(rs, s0);
        let scope = self.reg_c(rs, s1);
        self.set_scope_value(&target, scope);
        Ok(())
    }

    // ---- null checks ----

    pub(crate) fn op_name_nn(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        if self.reg(rs, s1).is_null() {
            let name = rs.script.cvs[c0 as usize]
                .to_ox_string(&self.heap)
                .unwrap_or_else(|_| OxStr::from("?"));
            return Err(Raised::Error(RtError::null_error(format!(
                "value of \"{name}\" is null"
            ))));
        }
        Ok(())
    }

    pub(crate) fn op_prop_nn(&mut self, rs: &RunStatus, c0: u16, s1: u8) -> Result<(), Raised> {
        if self.reg(rs, s1).is_null() {
            let name = rs.script.cvs[c0 as usize]
                .to_ox_string(&self.heap)
                .unwrap_or_else(|_| OxStr::from("?"));
            return Err(Raised::Error(RtError::null_error(format!(
                "value of property \"{name}\" is null"
            ))));
        }
        Ok(())
    }

    pub(crate) fn op_pprop_nn(&mut self, rs: &RunStatus, p0: u16, s1: u8) -> Result<(), Raised> {
        if self.reg(rs, s1).is_null() {
            let name = rs.script.pps[p0 as usize]
                .to_ox_string(&self.heap)
                .unwrap_or_else(|_| OxStr::from("?"));
            return Err(Raised::Error(RtError::null_error(format!(
                "value of property \"{name}\" is null"
            ))));
        }
        Ok(())
    }
}
