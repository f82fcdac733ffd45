//! AST to bytecode compiler.
//!
//! Compilation runs function by function over a flattened function array:
//! descriptors are shaped first (captured-frame depth, `this` flag), then
//! declarations are collected, then each function is lowered to IR
//! commands, peepholed, register-allocated and assembled into the shared
//! bytecode blob. Constant pools are interned script-wide and
//! materialized last.

use crate::ast::Program;
use crate::error::{CompileError, ErrorKind};
use crate::heap::HeapObj;
use crate::interpreter::frame::Frame;
use crate::interpreter::Interpreter;
use crate::script::{BcScript, DeclFlags, ScriptFunc, ScriptFuncFlags, ScriptLoc, ScriptRef};
use crate::value::{OxStr, Value};

use bitflags::bitflags;
use ox_asm::{Args, Instruction, Opcode, Shape};

use std::sync::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub(crate) mod command;
mod lower;

use command::{CmdArgs, Command, CompLabel, CompReg, LabelId, RegId};

bitflags! {
    /// Compilation mode flags.
    pub struct CompileFlags: u8 {
        /// Compile as if embedded in the current call's frame chain.
        const CURR = 0x01;
        /// The top-level function returns its last expression's value.
        const EXPR = 0x02;
        /// Register the produced script in the VM's script registry.
        const REGISTER = 0x04;
    }
}

/// An interned pool with stable `u16`-sized ids.
#[derive(Debug)]
pub(crate) struct Pool<K: Eq + Hash + Clone> {
    map: HashMap<K, u16>,
    pub items: Vec<K>,
}

impl<K: Eq + Hash + Clone> Default for Pool<K> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            items: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Pool<K> {
    pub fn add(&mut self, k: K) -> u16 {
        match self.map.get(&k) {
            Some(&id) => id,
            None => {
                let id = self.items.len() as u16;
                self.map.insert(k.clone(), id);
                self.items.push(k);
                id
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Interning key of the user constant pool.
///
/// Null and booleans have dedicated load opcodes, so only numbers,
/// strings and template parts reach the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CvKey {
    Num(u64),
    Str(OxStr),
    Tmpl(OxStr),
}

/// The compiler: script-wide pools plus the per-function working state.
pub(crate) struct Compiler<'a> {
    pub interp: &'a mut Interpreter,
    pub program: &'a Program,
    pub flags: CompileFlags,

    // Script-wide accumulation.
    pub cvs: Pool<CvKey>,
    pub cv_values: Vec<Value>,
    pub pps: Pool<OxStr>,
    pub lts: Pool<OxStr>,
    pub ltts: Pool<OxStr>,
    pub bc: Vec<u8>,
    pub ltab: Vec<ScriptLoc>,
    pub sfuncs: Vec<ScriptFunc>,
    pub publics: Vec<(OxStr, u16)>,
    pub bot_frame_num: u8,

    // Per-function working state.
    pub fid: usize,
    pub cmds: Vec<Command>,
    pub labels: Vec<CompLabel>,
    pub regs: Vec<CompReg>,
    pub stack_level: u32,
    pub break_label: Option<LabelId>,
    pub continue_label: Option<LabelId>,
    pub ques_label: Option<LabelId>,
    pub ques_r: Option<RegId>,
    pub this_r: Option<RegId>,
    pub owned_num: usize,
    pub line: u32,

    pub errors: Vec<CompileError>,
}

/// Compile a parsed program into a script.
///
/// `CURR` resolves free names through the currently running frame chain,
/// `EXPR` makes the top-level function return its last expression, and
/// `REGISTER` records the script in the registry.
pub fn compile(
    interp: &mut Interpreter,
    name: &str,
    program: &Program,
    flags: CompileFlags,
) -> Result<Arc<BcScript>, CompileError> {
    if program.funcs.is_empty() {
        return Err(CompileError::new(
            ErrorKind::Syntax,
            "program has no top-level function",
            0,
        ));
    }
    if program.funcs.len() > 0xffff {
        return Err(CompileError::new(
            ErrorKind::Range,
            "too many functions defined",
            0,
        ));
    }

    let mut bot_frame_num = 0u8;
    if flags.contains(CompileFlags::CURR) {
        if let Some(cur) = interp.current_function() {
            let fnum = cur.script.sfuncs[cur.sfunc].frame_num;
            bot_frame_num = fnum.saturating_add(1);
        }
    }

    let mut c = Compiler {
        interp,
        program,
        flags,
        cvs: Pool::default(),
        cv_values: Vec::new(),
        pps: Pool::default(),
        lts: Pool::default(),
        ltts: Pool::default(),
        bc: Vec::new(),
        ltab: Vec::new(),
        sfuncs: Vec::new(),
        publics: Vec::new(),
        bot_frame_num,
        fid: 0,
        cmds: Vec::new(),
        labels: Vec::new(),
        regs: Vec::new(),
        stack_level: 0,
        break_label: None,
        continue_label: None,
        ques_label: None,
        ques_r: None,
        this_r: None,
        owned_num: 0,
        line: 0,
        errors: Vec::new(),
    };

    c.init_funcs()?;
    c.add_decls()?;

    for fid in 0..program.funcs.len() {
        let expr_result = flags.contains(CompileFlags::EXPR) && fid == 0;
        c.compile_func(fid, expr_result)?;
    }

    if let Some(e) = c.errors.into_iter().next() {
        return Err(e);
    }

    let serial = c.interp.next_script_serial();

    // Pool materialization. Private names are decorated so each is unique
    // per script.
    if c.cvs.len() > 0xffff || c.pps.len() > 0xffff || c.lts.len() > 0xffff || c.ltts.len() > 0xffff
    {
        return Err(CompileError::new(
            ErrorKind::Range,
            "too many pool entries used",
            0,
        ));
    }

    let cvs = c.cv_values;
    let pps: Vec<Value> = c
        .pps
        .items
        .iter()
        .map(|n| Value::Str(c.interp.interner.intern(&format!("#{n}@s{serial}"))))
        .collect();
    let ts: Vec<Value> = c.lts.items.iter().map(|s| Value::Str(s.clone())).collect();
    // Templates are stored in joined form; `get_ltt` splits the resolved
    // text back into parts on first use.
    let tts: Vec<Value> = c.ltts.items.iter().map(|s| Value::Str(s.clone())).collect();

    let refs: Vec<ScriptRef> = program
        .refs
        .iter()
        .map(|r| ScriptRef {
            filename: r.file.clone(),
            items: r
                .items
                .iter()
                .map(|i| crate::script::ScriptRefItem {
                    orig: i.orig.clone(),
                    name: i.name.clone(),
                    public: i.public,
                })
                .collect(),
        })
        .collect();

    let root_decls = c.sfuncs[0].decls.len();
    let frame = c
        .interp
        .heap
        .alloc(HeapObj::Frame(Frame::new(Value::Null, root_decls, None)));

    let lts = vec![Value::Null; ts.len()];
    let ltts = vec![Value::Null; tts.len()];

    let script = Arc::new(BcScript {
        serial,
        name: OxStr::from(name),
        bc: Mutex::new(c.bc),
        cvs,
        pps,
        ts,
        lts: Mutex::new(lts),
        tts,
        ltts: Mutex::new(ltts),
        sfuncs: c.sfuncs,
        refs,
        text_domain: program.text_domain.clone(),
        frame,
        loc_tab: c.ltab,
        publics: Mutex::new(HashMap::new()),
    });

    for (name, id) in c.publics {
        script.add_public(name, id);
    }

    tracing::debug!(
        script = %script.name,
        functions = script.sfuncs.len(),
        bytecode = script.bc_len(),
        "compiled script"
    );

    if flags.contains(CompileFlags::REGISTER) {
        c.interp.registry.push(script.clone());
    }

    Ok(script)
}

impl<'a> Compiler<'a> {
    /// Pass 1: shape every function descriptor.
    fn init_funcs(&mut self) -> Result<(), CompileError> {
        for f in &self.program.funcs {
            let mut sf = ScriptFunc {
                frame_num: self.bot_frame_num,
                ..Default::default()
            };
            if f.this {
                sf.flags |= ScriptFuncFlags::THIS;
            }

            let mut outer = f.outer;
            let mut depth = sf.frame_num as u32;
            while let Some(o) = outer {
                depth += 1;
                outer = self.program.funcs[o].outer;
            }
            if depth > 0xff {
                return Err(CompileError::new(
                    ErrorKind::Range,
                    "function stack is too deep",
                    f.line,
                ));
            }
            sf.frame_num = depth as u8;

            self.sfuncs.push(sf);
        }
        Ok(())
    }

    /// Pass 2: collect declarations, assigning sequential slot ids.
    fn add_decls(&mut self) -> Result<(), CompileError> {
        for (fid, f) in self.program.funcs.iter().enumerate() {
            if f.decls.len() > 0xffff {
                return Err(CompileError::new(
                    ErrorKind::Range,
                    "too many declarations in the function",
                    f.line,
                ));
            }
            let sf = &mut self.sfuncs[fid];
            for d in &f.decls {
                let flags = match d.kind {
                    crate::ast::DeclKind::Var => DeclFlags::empty(),
                    crate::ast::DeclKind::Const => DeclFlags::CONST,
                    crate::ast::DeclKind::Ref => DeclFlags::REF,
                    crate::ast::DeclKind::AutoClose => DeclFlags::AUTO_CLOSE,
                };
                let id = sf.decls.len() as u16;
                sf.decls.push(crate::script::ScriptDecl {
                    name: d.name.clone(),
                    flags,
                    id,
                });
                sf.decl_map.insert(d.name.clone(), id);

                if d.public && fid == 0 {
                    self.publics.push((d.name.clone(), id));
                }
            }
        }
        Ok(())
    }

    /// Pass 3+: lower one function and assemble it.
    fn compile_func(&mut self, fid: usize, expr_result: bool) -> Result<(), CompileError> {
        self.fid = fid;
        self.cmds.clear();
        self.labels.clear();
        self.regs.clear();
        self.stack_level = 0;
        self.break_label = None;
        self.continue_label = None;
        self.ques_label = None;
        self.ques_r = None;
        self.this_r = None;

        let program = self.program;
        let f = &program.funcs[fid];
        self.line = f.line;

        let rr = expr_result.then(|| self.add_reg());

        self.lower_params(&f.params);
        self.lower_stmts(&f.body, rr);
        if let Some(rr) = rr {
            self.line = f.line;
            self.cmd(Opcode::Ret, CmdArgs::Reg(rr));
        }

        debug_assert_eq!(self.stack_level, 0, "unbalanced block-stack lowering");

        let bc_len = self.peephole();
        if bc_len > 0xffff {
            return Err(CompileError::new(
                ErrorKind::Range,
                "byte code buffer is too big",
                f.line,
            ));
        }

        self.alloc_registers(f.line)?;
        self.assemble(fid, bc_len);
        Ok(())
    }

    /// Resolve labels and drop jumps to the immediately following
    /// instruction, iterating to a fixed point. Returns the emitted
    /// length.
    fn peephole(&mut self) -> usize {
        let mut bc_len;
        loop {
            let mut changed = false;
            bc_len = 0usize;

            for i in 0..self.cmds.len() {
                let cmd = self.cmds[i];
                match (cmd.op, cmd.args) {
                    (Opcode::Stub, CmdArgs::Label(l)) => {
                        if self.labels[l].off != bc_len {
                            self.labels[l].off = bc_len;
                            changed = true;
                        }
                    }
                    (Opcode::Jmp, CmdArgs::Label(l)) => {
                        if self.labels[l].off == bc_len + cmd.emitted_len() {
                            self.cmds[i].op = Opcode::Nop;
                            changed = true;
                        }
                    }
                    (Opcode::Jt | Opcode::Jf | Opcode::Jnn, CmdArgs::RegLabel(_, l)) => {
                        if self.labels[l].off == bc_len + cmd.emitted_len() {
                            self.cmds[i].op = Opcode::Nop;
                            changed = true;
                        }
                    }
                    _ => {}
                }
                bc_len += self.cmds[i].emitted_len();
            }

            if !changed {
                break;
            }
        }
        bc_len
    }

    /// Lifetime-based register allocation: each abstract register takes
    /// the lowest physical slot whose previous tenant's last use precedes
    /// this register's first use.
    fn alloc_registers(&mut self, line: u32) -> Result<(), CompileError> {
        for (i, cmd) in self.cmds.iter().enumerate() {
            for r in cmd.args.regs() {
                self.regs[r].last_use = i;
            }
        }

        let mut lifetimes = [i64::MIN; 256];
        for i in 0..self.cmds.len() {
            for r in self.cmds[i].args.regs() {
                if self.regs[r].phys.is_some() {
                    continue;
                }
                let slot = lifetimes
                    .iter()
                    .position(|&end| end < i as i64)
                    .ok_or_else(|| {
                        CompileError::new(ErrorKind::Range, "too many registers used", line)
                    })?;
                lifetimes[slot] = self.regs[r].last_use as i64;
                self.regs[r].phys = Some(slot as u8);
                let sf = &mut self.sfuncs[self.fid];
                sf.reg_num = sf.reg_num.max(slot as u16 + 1);
            }
        }
        Ok(())
    }

    /// Emit the planned commands into the script blob, building the
    /// location table and rewriting tail calls on the way.
    fn assemble(&mut self, fid: usize, bc_len: usize) {
        let bc_start = self.bc.len();
        let loc_start = self.ltab.len();

        let mut ip = 0usize;
        // Offset of the innermost open try/iter region; a call inside one
        // must not be compiled as a tail call.
        let mut top_ip = 0usize;

        for i in 0..self.cmds.len() {
            let cmd = self.cmds[i];
            let len = cmd.emitted_len();

            if len == 0 {
                if top_ip == ip {
                    top_ip = 0;
                }
                continue;
            }

            let store_loc = match self.ltab.len() {
                l if l > loc_start => self.ltab[l - 1].line != cmd.line,
                _ => true,
            };
            if store_loc {
                self.ltab.push(ScriptLoc {
                    line: cmd.line,
                    ip: ip as u16,
                });
            }

            match (cmd.op, cmd.args) {
                (Opcode::IterStep, CmdArgs::RegLabel(_, l)) if top_ip == 0 => {
                    top_ip = self.labels[l].off;
                }
                (Opcode::TryStart, CmdArgs::LabelLabel(_, l1)) if top_ip == 0 => {
                    top_ip = self.labels[l1].off;
                }
                (Opcode::CallEnd, CmdArgs::Reg(dst)) if top_ip == 0 => {
                    if self.is_tail_call(i, dst) {
                        self.cmds[i].op = Opcode::CallEndTail;
                    }
                }
                _ => {}
            }

            let insn = Instruction::new(self.cmds[i].op, self.encode_args(self.cmds[i].args));
            insn.encode(&mut self.bc);
            ip += len;
        }

        debug_assert_eq!(ip, bc_len);

        let sf = &mut self.sfuncs[fid];
        sf.bc_start = bc_start;
        sf.bc_len = bc_len;
        sf.loc_start = loc_start;
        sf.loc_len = self.ltab.len() - loc_start;
    }

    /// A `call_end` is in tail position when the next effective command
    /// is a `ret` of the same register, possibly through a `load_null`
    /// rewrite of the result, with nothing but empty commands between.
    fn is_tail_call(&self, i: usize, dst: RegId) -> bool {
        let mut j = i + 1;
        let next = loop {
            match self.cmds.get(j) {
                None => return true,
                Some(n) if n.emitted_len() == 0 || n.op.shape() == Shape::NoArg => j += 1,
                Some(n) => break n,
            }
        };

        match (next.op, next.args) {
            (Opcode::Ret, CmdArgs::Reg(s)) => s == dst,
            (Opcode::LoadNull, CmdArgs::Reg(d)) => matches!(
                self.cmds.get(j + 1),
                Some(Command {
                    op: Opcode::Ret,
                    args: CmdArgs::Reg(s),
                    ..
                }) if *s == d
            ),
            _ => false,
        }
    }

    fn encode_args(&self, args: CmdArgs) -> Args {
        let reg = |r: RegId| self.regs[r].phys.expect("register not allocated");
        let lab = |l: LabelId| {
            let off = self.labels[l].off;
            debug_assert!(off <= 0xffff, "unresolved label");
            off as u16
        };
        match args {
            CmdArgs::None => Args::None,
            CmdArgs::Reg(a) => Args::Reg(reg(a)),
            CmdArgs::RegReg(a, b) => Args::RegReg(reg(a), reg(b)),
            CmdArgs::RegRegReg(a, b, c) => Args::RegRegReg(reg(a), reg(b), reg(c)),
            CmdArgs::RegRegRegReg(a, b, c, d) => {
                Args::RegRegRegReg(reg(a), reg(b), reg(c), reg(d))
            }
            CmdArgs::Pool(i) => Args::Pool(i),
            CmdArgs::PoolReg(i, a) => Args::PoolReg(i, reg(a)),
            CmdArgs::Label(l) => Args::Label(lab(l)),
            CmdArgs::LabelLabel(l0, l1) => Args::LabelLabel(lab(l0), lab(l1)),
            CmdArgs::RegLabel(a, l) => Args::RegLabel(reg(a), lab(l)),
            CmdArgs::DepthReg(o, a) => Args::DepthReg(o, reg(a)),
            CmdArgs::DepthLabel(o, l) => Args::DepthLabel(o, lab(l)),
            CmdArgs::DepthPoolReg(o, i, a) => Args::DepthPoolReg(o, i, reg(a)),
        }
    }

    // ---- helpers shared with the lowering pass ----

    pub(crate) fn error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let e = CompileError::new(kind, message, self.line);
        self.errors.push(e);
    }

    /// Append a command at the current source location.
    pub(crate) fn cmd(&mut self, op: Opcode, args: CmdArgs) {
        self.cmds.push(Command {
            op,
            args,
            line: self.line,
        });
    }

    /// Append a block-opening command, raising the static depth.
    pub(crate) fn cmd_open(&mut self, op: Opcode, args: CmdArgs) {
        self.cmd(op, args);
        self.stack_level += 1;
    }

    /// Append a block-closing command, lowering the static depth.
    pub(crate) fn cmd_close(&mut self, op: Opcode, args: CmdArgs) {
        self.cmd(op, args);
        self.stack_level -= 1;
    }

    /// Bind a label at the current position.
    pub(crate) fn stub(&mut self, l: LabelId) {
        debug_assert_eq!(
            self.labels[l].stack_level, self.stack_level,
            "label bound at a different block-stack depth than registered"
        );
        self.cmd(Opcode::Stub, CmdArgs::Label(l));
    }

    /// Allocate a label recording the current depth plus `sl`.
    pub(crate) fn add_label_l(&mut self, sl: u32) -> LabelId {
        self.labels.push(CompLabel {
            off: usize::MAX,
            stack_level: self.stack_level + sl,
        });
        self.labels.len() - 1
    }

    /// Allocate a label at the current depth.
    pub(crate) fn add_label(&mut self) -> LabelId {
        self.add_label_l(0)
    }

    /// Mint a fresh abstract register.
    pub(crate) fn add_reg(&mut self) -> RegId {
        self.regs.push(CompReg {
            phys: None,
            last_use: 0,
        });
        self.regs.len() - 1
    }

    // ---- pool interning ----

    pub(crate) fn add_cv_value(&mut self, key: CvKey, v: Value) -> u16 {
        let before = self.cvs.len();
        let id = self.cvs.add(key);
        if self.cvs.len() > before {
            self.cv_values.push(v);
        }
        id
    }

    pub(crate) fn add_cv_str(&mut self, s: &OxStr) -> u16 {
        let s = self.interp.interner.singleton(s);
        self.add_cv_value(CvKey::Str(s.clone()), Value::Str(s))
    }

    pub(crate) fn add_cv_num(&mut self, n: f64) -> u16 {
        self.add_cv_value(CvKey::Num(n.to_bits()), Value::Number(n))
    }

    pub(crate) fn add_pp(&mut self, name: &OxStr) -> u16 {
        self.pps.add(name.clone())
    }

    pub(crate) fn add_lt(&mut self, s: &OxStr) -> u16 {
        self.lts.add(s.clone())
    }

    /// Intern a template: the parts array becomes a heap value, keyed by
    /// the joined form.
    pub(crate) fn tmpl_value(&mut self, parts: &[OxStr]) -> Value {
        let items: Vec<Value> = parts.iter().map(|p| Value::Str(p.clone())).collect();
        Value::Ref(self.interp.heap.alloc(HeapObj::Array(items)))
    }

    pub(crate) fn add_cv_tmpl(&mut self, parts: &[OxStr]) -> u16 {
        let key = CvKey::Tmpl(join_tmpl(parts));
        if let Some(&id) = self.cvs.map.get(&key) {
            return id;
        }
        let v = self.tmpl_value(parts);
        self.add_cv_value(key, v)
    }

    pub(crate) fn add_ltt(&mut self, parts: &[OxStr]) -> u16 {
        self.ltts.add(join_tmpl(parts))
    }
}

/// Join template parts with the substitution marker; this is the form
/// stored in the template text pool and handed to the text resolver.
pub(crate) fn join_tmpl(parts: &[OxStr]) -> OxStr {
    OxStr::from(
        parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join("${}"),
    )
}

/// Split a localized template string back into parts.
pub(crate) fn split_tmpl(s: &str) -> Vec<OxStr> {
    s.split("${}").map(OxStr::from).collect()
}
