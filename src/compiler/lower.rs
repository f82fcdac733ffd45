//! AST lowering: recursive conversion of expressions and statements into
//! IR commands.
//!
//! The lowering keeps three cursors: the current `break` label, the
//! current `continue` label, and the null-propagation fall-through label
//! (`ques`). Registers are minted on demand as abstract slots; the
//! lifetime allocator maps them to physical slots later.

use crate::ast::*;
use crate::compiler::command::{CmdArgs, LabelId, RegId};
use crate::compiler::{CompileFlags, Compiler};
use crate::error::ErrorKind;
use crate::script::DeclFlags;
use crate::value::OxStr;

use ox_asm::Opcode;

/// Resolved assignment target.
enum AssiTarget {
    Array,
    Object,
    Decl {
        id: u16,
        flags: DeclFlags,
        depth: u32,
    },
    Global {
        cv: u16,
        name: OxStr,
    },
    Prop {
        br: RegId,
        pr: RegId,
    },
    Deref {
        br: RegId,
    },
    Invalid,
}

struct AssiLeft<'e> {
    target: AssiTarget,
    ast: &'e Expr,
    line: u32,
}

/// Saved null-propagation cursors around a `ques_dst` expression.
struct QuesData {
    is_src: bool,
    is_dst: bool,
    old_r: Option<RegId>,
    old_l: Option<LabelId>,
}

impl QuesData {
    fn none() -> Self {
        Self {
            is_src: false,
            is_dst: false,
            old_r: None,
            old_l: None,
        }
    }
}

impl<'a> Compiler<'a> {
    // ---- null-propagation helpers ----

    fn ques_check(&mut self, is_src: bool, is_dst: bool, er: RegId) -> QuesData {
        let mut qd = QuesData {
            is_src,
            is_dst,
            old_r: None,
            old_l: None,
        };
        if is_dst {
            qd.old_r = self.ques_r;
            qd.old_l = self.ques_label;
            self.ques_r = Some(er);
            self.ques_label = Some(self.add_label());
        }
        qd
    }

    /// When the carrier register is null, null the chain result and jump
    /// to the fall-through label.
    fn ques_src_cmds(&mut self, qd: &QuesData, line: u32, r: RegId) {
        if qd.is_src {
            let l = self.add_label();
            let (qr, ql) = (
                self.ques_r.expect("ques chain without destination"),
                self.ques_label.expect("ques chain without destination"),
            );
            self.line = line;
            self.cmd(Opcode::Jnn, CmdArgs::RegLabel(r, l));
            self.cmd(Opcode::LoadNull, CmdArgs::Reg(qr));
            self.cmd(Opcode::Jmp, CmdArgs::Label(ql));
            self.stub(l);
        }
    }

    fn ques_dest_end(&mut self, qd: QuesData) {
        if qd.is_dst {
            let ql = self.ques_label.expect("ques destination without label");
            self.stub(ql);
            self.ques_r = qd.old_r;
            self.ques_label = qd.old_l;
        }
    }

    /// Emit a null check naming the dereferenced value, for the non-`?.`
    /// paths.
    fn check_not_null(&mut self, e: &Expr, er: RegId) {
        match &e.kind {
            ExprKind::Id(name) => {
                self.line = e.line;
                let cid = self.add_cv_str(name);
                self.cmd(Opcode::NameNn, CmdArgs::PoolReg(cid, er));
            }
            ExprKind::Binary {
                op: BinaryOp::Get | BinaryOp::Lookup,
                rhs,
                ..
            } => match &rhs.kind {
                ExprKind::Literal(Literal::Str(s)) => {
                    let cid = self.add_cv_str(s);
                    self.cmd(Opcode::PropNn, CmdArgs::PoolReg(cid, er));
                }
                ExprKind::Private(p) => {
                    let pid = self.add_pp(p);
                    self.cmd(Opcode::PpropNn, CmdArgs::PoolReg(pid, er));
                }
                _ => {}
            },
            _ => {}
        }
    }

    // ---- declaration resolution ----

    /// Resolve a name through the enclosing compiled functions, and under
    /// `CURR` through the running frame chain as well.
    fn decl_lookup(&mut self, name: &str) -> Option<(u16, DeclFlags, u32)> {
        let mut depth = 0u32;
        let mut fid = Some(self.fid);
        while let Some(f) = fid {
            if let Some(&id) = self.sfuncs[f].decl_map.get(name) {
                let flags = self.sfuncs[f].decls[id as usize].flags;
                return Some((id, flags, depth));
            }
            depth += 1;
            fid = self.program.funcs[f].outer;
        }

        if self.flags.contains(CompileFlags::CURR) {
            if let Some(cur) = self.interp.current_function() {
                let sf = &cur.script.sfuncs[cur.sfunc];
                if let Some(&id) = sf.decl_map.get(name) {
                    return Some((id, sf.decls[id as usize].flags, depth));
                }
                for frame in &cur.frames {
                    depth += 1;
                    if let Some((script, sfunc)) = self.interp.function_of_frame(*frame) {
                        let sf = &script.sfuncs[sfunc];
                        if let Some(&id) = sf.decl_map.get(name) {
                            return Some((id, sf.decls[id as usize].flags, depth));
                        }
                    }
                }
            }
        }

        None
    }

    // ---- assignment targets ----

    fn expr_to_assi_left<'e>(&mut self, e: &'e Expr) -> AssiLeft<'e> {
        let mut ce = e;
        while let ExprKind::Paren(inner) = &ce.kind {
            ce = inner;
        }

        let target = match &ce.kind {
            ExprKind::ArrayPattern(_) => AssiTarget::Array,
            ExprKind::ObjectPattern(_) => AssiTarget::Object,
            ExprKind::Id(name) => match self.decl_lookup(name) {
                Some((id, flags, depth)) => AssiTarget::Decl { id, flags, depth },
                None => AssiTarget::Global {
                    cv: self.add_cv_str(name),
                    name: name.clone(),
                },
            },
            ExprKind::Unary {
                op: UnaryOp::GetValue,
                operand,
            } => {
                let br = self.add_reg();
                self.lower_expr(operand, br);
                AssiTarget::Deref { br }
            }
            ExprKind::Binary {
                op: BinaryOp::Get | BinaryOp::Lookup,
                lhs,
                rhs,
                ..
            } => {
                let br = self.add_reg();
                let pr = self.add_reg();
                self.lower_expr(lhs, br);
                self.check_not_null(lhs, br);
                self.lower_expr(rhs, pr);
                AssiTarget::Prop { br, pr }
            }
            _ => {
                self.line = ce.line;
                self.error(ErrorKind::Syntax, "invalid assignment target");
                AssiTarget::Invalid
            }
        };

        AssiLeft {
            target,
            ast: ce,
            line: e.line,
        }
    }

    /// Read the current value of an assignment target (compound forms).
    fn assi_left_value(&mut self, al: &AssiLeft<'_>, rr: RegId) {
        self.line = al.line;
        match &al.target {
            AssiTarget::Decl { id, depth, .. } => {
                if *depth > 0 {
                    self.cmd(
                        Opcode::GetTB,
                        CmdArgs::DepthPoolReg((*depth - 1) as u8, *id, rr),
                    );
                } else {
                    self.cmd(Opcode::GetT, CmdArgs::PoolReg(*id, rr));
                }
            }
            AssiTarget::Global { cv, .. } => self.cmd(Opcode::GetN, CmdArgs::PoolReg(*cv, rr)),
            AssiTarget::Prop { br, pr } => {
                self.cmd(Opcode::GetP, CmdArgs::RegRegReg(*br, *pr, rr))
            }
            AssiTarget::Deref { br } => self.cmd(Opcode::GetValue, CmdArgs::RegReg(*br, rr)),
            _ => self.error(ErrorKind::Syntax, "target cannot be read"),
        }
    }

    /// Store a register into an assignment target.
    fn assi_left_assi(&mut self, al: &AssiLeft<'_>, rr: RegId, line: u32) {
        match &al.target {
            AssiTarget::Array => {
                if let ExprKind::ArrayPattern(items) = &al.ast.kind {
                    self.lower_array_pattern(al.ast.line, items, rr);
                }
            }
            AssiTarget::Object => {
                if let ExprKind::ObjectPattern(props) = &al.ast.kind {
                    self.lower_object_pattern(al.ast.line, props, rr);
                }
            }
            AssiTarget::Decl { id, flags, depth } => {
                if *depth > 0 && flags.intersects(DeclFlags::CONST | DeclFlags::REF) {
                    self.line = al.line;
                    self.error(ErrorKind::Access, "constant cannot be reset");
                } else {
                    self.line = line;
                    let ac = flags.contains(DeclFlags::AUTO_CLOSE);
                    match (*depth, ac) {
                        (0, false) => self.cmd(Opcode::SetT, CmdArgs::PoolReg(*id, rr)),
                        (0, true) => self.cmd(Opcode::SetTAc, CmdArgs::PoolReg(*id, rr)),
                        (d, false) => self.cmd(
                            Opcode::SetTB,
                            CmdArgs::DepthPoolReg((d - 1) as u8, *id, rr),
                        ),
                        (d, true) => self.cmd(
                            Opcode::SetTBAc,
                            CmdArgs::DepthPoolReg((d - 1) as u8, *id, rr),
                        ),
                    }
                }
            }
            AssiTarget::Global { name, .. } => {
                self.line = al.line;
                self.error(ErrorKind::Reference, format!("\"{name}\" is not defined"));
            }
            AssiTarget::Prop { br, pr } => {
                self.line = line;
                self.cmd(Opcode::SetP, CmdArgs::RegRegReg(*br, *pr, rr));
            }
            AssiTarget::Deref { br } => {
                self.line = line;
                self.cmd(Opcode::SetValue, CmdArgs::RegReg(*br, rr));
            }
            AssiTarget::Invalid => {}
        }
    }

    fn left_ast_assi(&mut self, left: &Expr, rr: RegId, line: u32) {
        let al = self.expr_to_assi_left(left);
        self.assi_left_assi(&al, rr, line);
    }

    fn lower_array_pattern(&mut self, line: u32, items: &[PatItem], rr: RegId) {
        self.line = line;
        self.cmd_open(Opcode::ApatStart, CmdArgs::Reg(rr));

        for item in items {
            match item {
                PatItem::Skip => self.cmd(Opcode::ApatNext, CmdArgs::None),
                PatItem::Rest(pat) => {
                    let tr = self.add_reg();
                    self.line = pat.line;
                    self.cmd(Opcode::ApatRest, CmdArgs::Reg(tr));
                    self.left_ast_assi(pat, tr, pat.line);
                }
                PatItem::Item { pattern, default } => {
                    let tr = self.add_reg();
                    self.line = pattern.line;
                    self.cmd(Opcode::ApatGet, CmdArgs::Reg(tr));

                    if let Some(defv) = default {
                        let l = self.add_label();
                        self.line = defv.line;
                        self.cmd(Opcode::Jnn, CmdArgs::RegLabel(tr, l));
                        self.lower_expr(defv, tr);
                        self.stub(l);
                    }

                    self.left_ast_assi(pattern, tr, pattern.line);
                }
            }
        }

        self.line = line;
        self.cmd_close(Opcode::SPop, CmdArgs::None);
    }

    fn lower_object_pattern(&mut self, line: u32, props: &[PatProp], rr: RegId) {
        self.line = line;
        self.cmd_open(Opcode::OpatStart, CmdArgs::Reg(rr));

        for prop in props {
            match prop {
                PatProp::Rest(pat) => {
                    let tr = self.add_reg();
                    self.line = pat.line;
                    self.cmd(Opcode::OpatRest, CmdArgs::Reg(tr));
                    self.left_ast_assi(pat, tr, pat.line);
                }
                PatProp::Prop {
                    name,
                    pattern,
                    default,
                } => {
                    let tr = self.add_reg();
                    let kr = self.add_reg();

                    self.lower_prop_name(name, pattern.line, kr);
                    self.line = pattern.line;
                    self.cmd(Opcode::OpatGet, CmdArgs::RegReg(kr, tr));

                    if let Some(defv) = default {
                        let l = self.add_label();
                        self.line = defv.line;
                        self.cmd(Opcode::Jnn, CmdArgs::RegLabel(tr, l));
                        self.lower_expr(defv, tr);
                        self.stub(l);
                    }

                    self.left_ast_assi(pattern, tr, pattern.line);
                }
            }
        }

        self.line = line;
        self.cmd_close(Opcode::SPop, CmdArgs::None);
    }

    // ---- expressions ----

    pub(crate) fn lower_expr(&mut self, e: &Expr, er: RegId) {
        match &e.kind {
            ExprKind::Literal(lit) => self.lower_literal(lit, e.line, er),
            ExprKind::Private(name) => {
                self.line = e.line;
                let id = self.add_pp(name);
                self.cmd(Opcode::GetPp, CmdArgs::PoolReg(id, er));
            }
            ExprKind::LocalText(s) => {
                self.line = e.line;
                let id = self.add_lt(s);
                self.cmd(Opcode::GetLt, CmdArgs::PoolReg(id, er));
            }
            ExprKind::Id(name) => self.lower_id(name, e.line, er),
            ExprKind::This => self.lower_this(e.line, er),
            ExprKind::CurrObject => {
                self.line = e.line;
                self.cmd(Opcode::Curr, CmdArgs::Reg(er));
            }
            ExprKind::Argv => {
                self.line = e.line;
                self.cmd(Opcode::Argv, CmdArgs::Reg(er));
            }
            ExprKind::Arg(id) => {
                self.line = e.line;
                self.cmd(Opcode::GetA, CmdArgs::PoolReg(*id, er));
            }
            ExprKind::Func(fid) => {
                self.line = e.line;
                self.cmd(Opcode::FNew, CmdArgs::PoolReg(*fid as u16, er));
            }
            ExprKind::Class(node) => self.lower_class(node, e.line, er),
            ExprKind::Enum(node) => self.lower_enum(node, er, false),
            ExprKind::Bitfield(node) => self.lower_enum(node, er, true),
            ExprKind::Paren(inner) => self.lower_expr(inner, er),
            ExprKind::TemplateStr(t) => self.lower_template(t, e.line, er),
            ExprKind::Array(items) => {
                self.line = e.line;
                self.cmd(Opcode::ANew, CmdArgs::Reg(er));
                self.cmd_open(Opcode::AStart, CmdArgs::Reg(er));
                self.lower_array_items(items);
                self.line = e.line;
                self.cmd_close(Opcode::AEnd, CmdArgs::None);
            }
            ExprKind::ArrayAppend { base, items } => {
                self.lower_expr(base, er);
                self.line = e.line;
                self.cmd_open(Opcode::AStart, CmdArgs::Reg(er));
                self.lower_array_items(items);
                self.line = e.line;
                self.cmd_close(Opcode::AEnd, CmdArgs::None);
            }
            ExprKind::Object(props) => {
                self.line = e.line;
                self.cmd(Opcode::ONew, CmdArgs::Reg(er));
                self.cmd_open(Opcode::OStart, CmdArgs::Reg(er));
                self.lower_object_props(props, er);
                self.line = e.line;
                self.cmd_close(Opcode::SPop, CmdArgs::None);
            }
            ExprKind::ObjectSet { base, props } => {
                self.lower_expr(base, er);
                self.line = e.line;
                self.cmd_open(Opcode::OStart, CmdArgs::Reg(er));
                self.lower_object_props(props, er);
                self.line = e.line;
                self.cmd_close(Opcode::SPop, CmdArgs::None);
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, e.line, er),
            ExprKind::Binary { .. } => self.lower_binary(e, er),
            ExprKind::Assign { .. } | ExprKind::RevAssign { .. } => self.lower_assign(e, er),
            ExprKind::Call { .. } => self.lower_call(e, er),
            ExprKind::Comma(items) => {
                for (i, item) in items.iter().enumerate() {
                    let tr = if i == items.len() - 1 {
                        er
                    } else {
                        self.add_reg()
                    };
                    self.lower_expr(item, tr);
                }
            }
            ExprKind::If(node) => self.lower_if(node, e.line, Some(er), None),
            ExprKind::Case(node) => self.lower_case(node, e.line, Some(er), None),
            ExprKind::ArrayPattern(_) | ExprKind::ObjectPattern(_) => {
                self.line = e.line;
                self.error(ErrorKind::Syntax, "pattern outside assignment target");
            }
        }
    }

    fn lower_literal(&mut self, lit: &Literal, line: u32, er: RegId) {
        self.line = line;
        match lit {
            Literal::Null => self.cmd(Opcode::LoadNull, CmdArgs::Reg(er)),
            Literal::Bool(true) => self.cmd(Opcode::LoadTrue, CmdArgs::Reg(er)),
            Literal::Bool(false) => self.cmd(Opcode::LoadFalse, CmdArgs::Reg(er)),
            Literal::Number(n) => {
                let id = self.add_cv_num(*n);
                self.cmd(Opcode::GetCv, CmdArgs::PoolReg(id, er));
            }
            Literal::Str(s) => {
                let id = self.add_cv_str(s);
                self.cmd(Opcode::GetCv, CmdArgs::PoolReg(id, er));
            }
        }
    }

    fn lower_id(&mut self, name: &OxStr, line: u32, er: RegId) {
        self.line = line;
        match self.decl_lookup(name) {
            Some((id, _, 0)) => self.cmd(Opcode::GetT, CmdArgs::PoolReg(id, er)),
            Some((id, _, depth)) => self.cmd(
                Opcode::GetTB,
                CmdArgs::DepthPoolReg((depth - 1) as u8, id, er),
            ),
            None => {
                let cid = self.add_cv_str(name);
                self.cmd(Opcode::GetN, CmdArgs::PoolReg(cid, er));
            }
        }
    }

    fn lower_this(&mut self, line: u32, er: RegId) {
        self.line = line;
        if let Some(tr) = self.this_r {
            self.cmd(Opcode::Dup, CmdArgs::RegReg(tr, er));
            return;
        }

        let mut depth = 0u32;
        let mut found = false;
        let mut fid = Some(self.fid);
        while let Some(f) = fid {
            if self.program.funcs[f].this {
                found = true;
                break;
            }
            depth += 1;
            fid = self.program.funcs[f].outer;
        }

        if !found && self.flags.contains(CompileFlags::CURR) {
            if let Some(cur) = self.interp.current_function() {
                use crate::script::ScriptFuncFlags;
                if cur.script.sfuncs[cur.sfunc]
                    .flags
                    .contains(ScriptFuncFlags::THIS)
                {
                    found = true;
                } else {
                    for frame in &cur.frames {
                        depth += 1;
                        if let Some((script, sfunc)) = self.interp.function_of_frame(*frame) {
                            if script.sfuncs[sfunc].flags.contains(ScriptFuncFlags::THIS) {
                                found = true;
                                break;
                            }
                        }
                    }
                    if found {
                        // The running frame itself sits between the
                        // compiled chain and the found frame.
                        depth += 1;
                    }
                }
            }
        }

        if !found {
            self.error(ErrorKind::Reference, "the function has no this argument");
        } else if depth > 0 {
            self.cmd(Opcode::ThisB, CmdArgs::DepthReg((depth - 1) as u8, er));
        } else {
            self.cmd(Opcode::This, CmdArgs::Reg(er));
        }
    }

    fn lower_template(&mut self, t: &TemplateNode, line: u32, er: RegId) {
        self.line = line;
        let tr = self.add_reg();

        if t.local {
            let tid = self.add_ltt(&t.parts);
            self.cmd(Opcode::GetLtt, CmdArgs::PoolReg(tid, tr));
        } else {
            let tid = self.add_cv_tmpl(&t.parts);
            self.cmd(Opcode::GetCv, CmdArgs::PoolReg(tid, tr));
        }

        if let Some(func) = &t.func {
            let fr = self.add_reg();
            self.lower_expr(func, fr);
            self.check_not_null(func, fr);
            self.cmd_open(Opcode::StrStartT, CmdArgs::RegReg(tr, fr));
        } else {
            self.cmd_open(Opcode::StrStart, CmdArgs::Reg(tr));
        }

        for sub in &t.subs {
            let ir = self.add_reg();
            self.lower_expr(&sub.expr, ir);
            self.line = sub.expr.line;
            match sub.format {
                Some(f) => {
                    let cid = self.add_cv_num(f);
                    self.cmd(Opcode::StrItemF, CmdArgs::PoolReg(cid, ir));
                }
                None => self.cmd(Opcode::StrItem, CmdArgs::Reg(ir)),
            }
        }

        self.line = line;
        self.cmd_close(Opcode::StrEnd, CmdArgs::Reg(er));
    }

    fn lower_array_items(&mut self, items: &[ArrayItem]) {
        for item in items {
            match item {
                ArrayItem::Skip => self.cmd(Opcode::ANext, CmdArgs::None),
                ArrayItem::Spread(e) => {
                    let tr = self.add_reg();
                    self.lower_expr(e, tr);
                    self.line = e.line;
                    self.cmd(Opcode::ASpread, CmdArgs::Reg(tr));
                }
                ArrayItem::If(node) => self.lower_if_items(node),
                ArrayItem::Case(node) => self.lower_case_items(node),
                ArrayItem::Item(e) => {
                    let tr = self.add_reg();
                    self.lower_expr(e, tr);
                    self.line = e.line;
                    self.cmd(Opcode::AItem, CmdArgs::Reg(tr));
                }
            }
        }
    }

    fn lower_object_props(&mut self, props: &[ObjectItem], or: RegId) {
        for item in props {
            match item {
                ObjectItem::Prop { name, value } => {
                    let tr = self.add_reg();
                    let pr = self.add_reg();
                    self.lower_prop_name(name, value.line, pr);
                    self.lower_expr(value, tr);
                    self.line = value.line;
                    self.cmd(Opcode::OProp, CmdArgs::RegReg(pr, tr));
                }
                ObjectItem::Spread(e) => {
                    let tr = self.add_reg();
                    self.lower_expr(e, tr);
                    self.line = e.line;
                    self.cmd(Opcode::OSpread, CmdArgs::Reg(tr));
                }
                ObjectItem::If(node) => self.lower_if_props(node, or),
                ObjectItem::Case(node) => self.lower_case_props(node, or),
                ObjectItem::Enum(node) => self.lower_enum(node, or, false),
                ObjectItem::Bitfield(node) => self.lower_enum(node, or, true),
            }
        }
    }

    fn lower_prop_name(&mut self, name: &PropName, line: u32, rr: RegId) {
        self.line = line;
        match name {
            PropName::Ident(s) => {
                let cid = self.add_cv_str(s);
                self.cmd(Opcode::GetCv, CmdArgs::PoolReg(cid, rr));
            }
            PropName::Private(s) => {
                let pid = self.add_pp(s);
                self.cmd(Opcode::GetPp, CmdArgs::PoolReg(pid, rr));
            }
            PropName::Expr(e) => self.lower_expr(e, rr),
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr, line: u32, er: RegId) {
        let bc = match op {
            UnaryOp::Plus => Opcode::ToNum,
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::BitRev => Opcode::Rev,
            UnaryOp::Not => Opcode::Not,
            UnaryOp::TypeOf => Opcode::TypeOf,
            UnaryOp::Global => Opcode::Global,
            UnaryOp::GetPtr => Opcode::GetPtr,
            UnaryOp::GetValue => Opcode::GetValue,
            UnaryOp::Owned => Opcode::Owned,
            UnaryOp::Yield => Opcode::Yield,
        };

        let tr = match op {
            UnaryOp::Global | UnaryOp::Owned => er,
            _ => self.add_reg(),
        };

        self.lower_expr(operand, tr);
        self.line = line;

        match op {
            UnaryOp::Global => self.cmd(Opcode::Global, CmdArgs::Reg(tr)),
            UnaryOp::Owned => {
                let name = OxStr::from(format!("owned{}", self.owned_num));
                self.owned_num += 1;
                let cid = self.add_cv_str(&name);
                self.cmd(Opcode::Owned, CmdArgs::PoolReg(cid, tr));
            }
            _ => self.cmd(bc, CmdArgs::RegReg(tr, er)),
        }
    }

    /// Lower a relational expression, folding `a < b < c` chains into
    /// short-circuit form while materializing the shared middle operand
    /// once. Returns the register holding the right operand, which a
    /// chained parent reuses.
    fn lower_rel(&mut self, bc: Opcode, e: &Expr, er: RegId) -> RegId {
        let (lhs, rhs, line) = match &e.kind {
            ExprKind::Binary { lhs, rhs, .. } => (lhs, rhs, e.line),
            _ => unreachable!("relational lowering of a non-binary node"),
        };

        let pbc = match &lhs.kind {
            ExprKind::Binary { op, .. } => match op {
                BinaryOp::Lt => Some(Opcode::Lt),
                BinaryOp::Gt => Some(Opcode::Gt),
                BinaryOp::Le => Some(Opcode::Le),
                BinaryOp::Ge => Some(Opcode::Ge),
                _ => None,
            },
            _ => None,
        };

        let r2 = self.add_reg();
        match pbc {
            None => {
                let r1 = self.add_reg();
                self.lower_expr(lhs, r1);
                self.lower_expr(rhs, r2);
                self.line = line;
                self.cmd(bc, CmdArgs::RegRegReg(r1, r2, er));
            }
            Some(pbc) => {
                let l = self.add_label();
                let r1 = self.lower_rel(pbc, lhs, er);

                self.line = line;
                self.cmd(Opcode::Jf, CmdArgs::RegLabel(er, l));

                self.lower_expr(rhs, r2);
                self.line = line;
                self.cmd(bc, CmdArgs::RegRegReg(r1, r2, er));
                self.stub(l);
            }
        }
        r2
    }

    fn lower_binary(&mut self, e: &Expr, er: RegId) {
        let (op, lhs, rhs, ques_src, ques_dst, line) = match &e.kind {
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                ques_src,
                ques_dst,
            } => (*op, lhs, rhs, *ques_src, *ques_dst, e.line),
            _ => unreachable!("binary lowering of a non-binary node"),
        };

        let bc = match op {
            BinaryOp::Exp => Opcode::Exp,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Match => Opcode::Match,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::Ushr => Opcode::Ushr,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Ge => Opcode::Ge,
            BinaryOp::InstOf => Opcode::InstOf,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Ne => Opcode::Ne,
            BinaryOp::BitAnd => Opcode::And,
            BinaryOp::BitXor => Opcode::Xor,
            BinaryOp::BitOr => Opcode::Or,
            BinaryOp::Get => Opcode::GetP,
            BinaryOp::Lookup => Opcode::LookupP,
            BinaryOp::LogicAnd => Opcode::Jf,
            BinaryOp::LogicOr => Opcode::Jt,
        };

        match op {
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                self.lower_rel(bc, e, er);
            }
            BinaryOp::LogicAnd | BinaryOp::LogicOr => {
                // Short-circuit: evaluate the left into the result, jump
                // on its truthiness, evaluate the right into the same
                // register.
                self.lower_expr(lhs, er);
                let le = self.add_label();
                self.line = line;
                self.cmd(bc, CmdArgs::RegLabel(er, le));
                self.lower_expr(rhs, er);
                self.stub(le);
            }
            _ => {
                let r1 = self.add_reg();
                let r2 = self.add_reg();
                let is_get = matches!(op, BinaryOp::Get | BinaryOp::Lookup);

                let qd = if is_get {
                    self.ques_check(ques_src, ques_dst, er)
                } else {
                    QuesData::none()
                };

                self.lower_expr(lhs, r1);
                if is_get {
                    if qd.is_src {
                        self.ques_src_cmds(&qd, line, r1);
                    } else {
                        self.check_not_null(lhs, r1);
                    }
                }

                self.lower_expr(rhs, r2);

                self.line = line;
                self.cmd(bc, CmdArgs::RegRegReg(r1, r2, er));

                if is_get {
                    self.ques_dest_end(qd);
                }
            }
        }
    }

    fn lower_assign(&mut self, e: &Expr, er: RegId) {
        let line = e.line;

        // `value => target` form evaluates the value first.
        if let ExprKind::RevAssign { target, value } = &e.kind {
            self.lower_expr(value, er);
            let al = self.expr_to_assi_left(target);
            self.assi_left_assi(&al, er, line);
            self.maybe_set_name(&al, value, er, line);
            return;
        }

        let (target, op, value, get_old) = match &e.kind {
            ExprKind::Assign {
                target,
                op,
                value,
                get_old,
            } => (target, *op, value, *get_old),
            _ => unreachable!("assignment lowering of a non-assignment node"),
        };

        match op {
            None => {
                let al = self.expr_to_assi_left(target);
                self.lower_expr(value, er);
                self.assi_left_assi(&al, er, line);
                self.maybe_set_name(&al, value, er, line);
            }
            Some(BinaryOp::LogicAnd | BinaryOp::LogicOr) => {
                let bc = if op == Some(BinaryOp::LogicAnd) {
                    Opcode::Jf
                } else {
                    Opcode::Jt
                };
                let al = self.expr_to_assi_left(target);
                let le = self.add_label();
                let (lr, rr) = if get_old {
                    (er, self.add_reg())
                } else {
                    (self.add_reg(), er)
                };

                self.assi_left_value(&al, lr);
                self.line = line;
                self.cmd(bc, CmdArgs::RegLabel(lr, le));
                self.lower_expr(value, rr);
                self.assi_left_assi(&al, rr, line);
                self.stub(le);
            }
            Some(binop) => {
                let bc = match binop {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Match => Opcode::Match,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                    BinaryOp::Mod => Opcode::Mod,
                    BinaryOp::Exp => Opcode::Exp,
                    BinaryOp::Shl => Opcode::Shl,
                    BinaryOp::Shr => Opcode::Shr,
                    BinaryOp::Ushr => Opcode::Ushr,
                    BinaryOp::BitAnd => Opcode::And,
                    BinaryOp::BitXor => Opcode::Xor,
                    BinaryOp::BitOr => Opcode::Or,
                    other => {
                        self.line = line;
                        self.error(
                            ErrorKind::Syntax,
                            format!("operator {other:?} cannot compound-assign"),
                        );
                        return;
                    }
                };

                let al = self.expr_to_assi_left(target);
                let rr = self.add_reg();
                let (lr, ar) = if get_old {
                    (er, self.add_reg())
                } else {
                    (self.add_reg(), er)
                };

                self.assi_left_value(&al, lr);
                self.lower_expr(value, rr);
                self.line = line;
                self.cmd(bc, CmdArgs::RegRegReg(lr, rr, ar));
                self.assi_left_assi(&al, ar, line);
            }
        }
    }

    /// Record a qualified display name when a function or class literal
    /// is bound to a named target.
    fn maybe_set_name(&mut self, al: &AssiLeft<'_>, value: &Expr, er: RegId, line: u32) {
        let is_decl_value = matches!(value.kind, ExprKind::Func(_) | ExprKind::Class(_));
        let name = match (&al.target, &al.ast.kind) {
            (AssiTarget::Decl { .. } | AssiTarget::Global { .. }, ExprKind::Id(n)) => n.clone(),
            _ => return,
        };
        if !is_decl_value {
            return;
        }

        let nr = self.add_reg();
        let cid = self.add_cv_str(&name);
        self.line = line;
        self.cmd(Opcode::GetCv, CmdArgs::PoolReg(cid, nr));
        self.cmd(Opcode::SetName, CmdArgs::RegReg(er, nr));
    }

    fn lower_call(&mut self, e: &Expr, er: RegId) {
        let (callee, args, ques_src, ques_dst, line) = match &e.kind {
            ExprKind::Call {
                callee,
                args,
                ques_src,
                ques_dst,
            } => (callee, args, *ques_src, *ques_dst, e.line),
            _ => unreachable!("call lowering of a non-call node"),
        };

        let qd = self.ques_check(ques_src, ques_dst, er);

        let fr = self.add_reg();
        let mut this_r = None;

        // A property callee becomes a method call: the base is the
        // receiver.
        if let ExprKind::Binary {
            op: op @ (BinaryOp::Get | BinaryOp::Lookup),
            lhs,
            rhs,
            ques_src: fsrc,
            ques_dst: fdst,
        } = &callee.kind
        {
            let pr = self.add_reg();
            let fqd = self.ques_check(*fsrc, *fdst, fr);
            let tr = self.add_reg();
            this_r = Some(tr);

            self.lower_expr(lhs, tr);
            if fqd.is_src {
                self.ques_src_cmds(&fqd, callee.line, tr);
            } else {
                self.check_not_null(lhs, tr);
            }

            self.lower_expr(rhs, pr);

            self.line = callee.line;
            match op {
                BinaryOp::Lookup => self.cmd(Opcode::LookupP, CmdArgs::RegRegReg(tr, pr, fr)),
                _ => self.cmd(Opcode::GetP, CmdArgs::RegRegReg(tr, pr, fr)),
            }

            self.ques_dest_end(fqd);
        }

        let tr = match this_r {
            Some(tr) => tr,
            None => {
                let tr = self.add_reg();
                self.lower_expr(callee, fr);
                self.line = line;
                self.cmd(Opcode::LoadNull, CmdArgs::Reg(tr));
                tr
            }
        };

        self.line = line;
        if qd.is_src {
            self.ques_src_cmds(&qd, line, fr);
        } else {
            self.check_not_null(callee, fr);
        }

        self.cmd_open(Opcode::CallStart, CmdArgs::RegReg(fr, tr));

        for arg in args {
            match arg {
                CallArg::Spread(ae) => {
                    let ar = self.add_reg();
                    self.lower_expr(ae, ar);
                    self.line = ae.line;
                    self.cmd(Opcode::ArgSpread, CmdArgs::Reg(ar));
                }
                CallArg::Expr(ae) => {
                    let ar = self.add_reg();
                    self.lower_expr(ae, ar);
                    self.line = ae.line;
                    self.cmd(Opcode::Arg, CmdArgs::Reg(ar));
                }
            }
        }

        self.line = line;
        self.cmd_close(Opcode::CallEnd, CmdArgs::Reg(er));
        self.ques_dest_end(qd);
    }

    // ---- class, enum, bitfield ----

    fn lower_class(&mut self, node: &ClassNode, line: u32, cr: RegId) {
        let ir = self.add_reg();

        self.line = line;
        self.cmd(Opcode::CNew, CmdArgs::RegReg(cr, ir));

        for parent in &node.parents {
            let pr = self.add_reg();
            self.lower_expr(parent, pr);
            self.line = parent.line;
            self.cmd(Opcode::CParent, CmdArgs::RegReg(cr, pr));
        }

        let old_this_r = self.this_r;
        self.this_r = Some(cr);
        self.lower_class_members(&node.members, cr, ir);
        self.this_r = old_this_r;
    }

    fn lower_class_members(&mut self, members: &[ClassMember], cr: RegId, ir: RegId) {
        for m in members {
            match m {
                ClassMember::Enum(node) => self.lower_enum(node, cr, false),
                ClassMember::Bitfield(node) => self.lower_enum(node, cr, true),
                ClassMember::Var {
                    stat,
                    name,
                    value,
                    line,
                } => {
                    let sr = if *stat { cr } else { ir };
                    let pr = self.add_reg();
                    self.lower_prop_name(name, *line, pr);

                    let vr = self.add_reg();
                    let named = match value {
                        None => {
                            self.line = *line;
                            self.cmd(Opcode::LoadNull, CmdArgs::Reg(vr));
                            false
                        }
                        Some(pe) => {
                            self.lower_expr(pe, vr);
                            self.line = *line;
                            matches!(pe.kind, ExprKind::Func(_) | ExprKind::Class(_))
                        }
                    };

                    self.cmd(Opcode::CVar, CmdArgs::RegRegReg(sr, pr, vr));
                    if named {
                        self.cmd(Opcode::SetName, CmdArgs::RegReg(vr, pr));
                        self.cmd(Opcode::SetScope, CmdArgs::RegReg(vr, sr));
                    }
                }
                ClassMember::Const {
                    stat,
                    name,
                    value,
                    line,
                } => {
                    let sr = if *stat { cr } else { ir };
                    let pr = self.add_reg();
                    self.lower_prop_name(name, *line, pr);

                    let vr = self.add_reg();
                    self.lower_expr(value, vr);
                    self.line = *line;
                    self.cmd(Opcode::CConst, CmdArgs::RegRegReg(sr, pr, vr));

                    if matches!(value.kind, ExprKind::Func(_) | ExprKind::Class(_)) {
                        self.cmd(Opcode::SetName, CmdArgs::RegReg(vr, pr));
                        self.cmd(Opcode::SetScope, CmdArgs::RegReg(vr, sr));
                    }
                }
                ClassMember::Method {
                    stat,
                    name,
                    func,
                    line,
                } => {
                    let sr = if *stat { cr } else { ir };
                    let pr = self.add_reg();
                    self.lower_prop_name(name, *line, pr);

                    let fr = self.add_reg();
                    self.line = *line;
                    self.cmd(Opcode::FNew, CmdArgs::PoolReg(*func as u16, fr));
                    self.cmd(Opcode::CConst, CmdArgs::RegRegReg(sr, pr, fr));
                    self.cmd(Opcode::SetName, CmdArgs::RegReg(fr, pr));
                    self.cmd(Opcode::SetScope, CmdArgs::RegReg(fr, sr));
                }
                ClassMember::Accessor {
                    stat,
                    name,
                    get,
                    set,
                    line,
                } => {
                    let sr = if *stat { cr } else { ir };
                    let pr = self.add_reg();
                    self.lower_prop_name(name, *line, pr);

                    let getr = self.add_reg();
                    self.line = *line;
                    self.cmd(Opcode::FNew, CmdArgs::PoolReg(*get as u16, getr));

                    match set {
                        None => {
                            self.cmd(Opcode::CRoAcce, CmdArgs::RegRegReg(sr, pr, getr));
                            self.cmd(Opcode::SetNameG, CmdArgs::RegReg(getr, pr));
                            self.cmd(Opcode::SetScope, CmdArgs::RegReg(getr, sr));
                        }
                        Some(set) => {
                            let setr = self.add_reg();
                            self.cmd(Opcode::FNew, CmdArgs::PoolReg(*set as u16, setr));
                            self.cmd(Opcode::CAcce, CmdArgs::RegRegRegReg(sr, pr, getr, setr));
                            self.cmd(Opcode::SetNameG, CmdArgs::RegReg(getr, pr));
                            self.cmd(Opcode::SetScope, CmdArgs::RegReg(getr, sr));
                            self.cmd(Opcode::SetNameS, CmdArgs::RegReg(setr, pr));
                            self.cmd(Opcode::SetScope, CmdArgs::RegReg(setr, sr));
                        }
                    }
                }
            }
        }
    }

    fn lower_enum(&mut self, node: &EnumNode, cr: RegId, bitfield: bool) {
        self.line = node.line;
        let (start, start_n, item) = if bitfield {
            (Opcode::BStart, Opcode::BStartN, Opcode::BItem)
        } else {
            (Opcode::EStart, Opcode::EStartN, Opcode::EItem)
        };

        match &node.name {
            Some(name) => {
                let cid = self.add_cv_str(name);
                self.cmd_open(start_n, CmdArgs::PoolReg(cid, cr));
            }
            None => self.cmd_open(start, CmdArgs::Reg(cr)),
        }

        for it in &node.items {
            let cid = self.add_cv_str(it);
            self.cmd(item, CmdArgs::Pool(cid));
        }

        self.cmd_close(Opcode::SPop, CmdArgs::None);
    }

    // ---- if / case in the three block contexts ----

    fn lower_if(&mut self, node: &IfNode, line: u32, rr: Option<RegId>, or: Option<RegId>) {
        let endl = self.add_label();

        for (cond, blk) in &node.branches {
            let er = self.add_reg();
            self.lower_expr(cond, er);

            let l = self.add_label();
            self.line = cond.line;
            self.cmd(Opcode::Jf, CmdArgs::RegLabel(er, l));
            self.lower_block_body(blk, rr, or);
            self.line = cond.line;
            self.cmd(Opcode::Jmp, CmdArgs::Label(endl));
            self.stub(l);
        }

        match &node.else_blk {
            Some(blk) => self.lower_block_body(blk, rr, or),
            None => {
                if let Some(rr) = rr {
                    self.line = line;
                    self.cmd(Opcode::LoadNull, CmdArgs::Reg(rr));
                }
            }
        }
        self.stub(endl);
    }

    fn lower_if_props(&mut self, node: &IfNode, or: RegId) {
        self.lower_if(node, self.line, None, Some(or));
    }

    fn lower_if_items(&mut self, node: &IfNode) {
        self.lower_if(node, self.line, None, None);
    }

    fn lower_case(&mut self, node: &CaseNode, line: u32, rr: Option<RegId>, or: Option<RegId>) {
        let er = self.add_reg();
        self.lower_expr(&node.expr, er);

        let mut arm_labels = Vec::with_capacity(node.items.len());
        let mut lall = None;

        for item in &node.items {
            let lab = self.add_label();
            arm_labels.push(lab);

            for cond in &item.conds {
                match cond {
                    CaseCond::All => lall = Some(lab),
                    CaseCond::Func(f) => {
                        let fr = self.add_reg();
                        self.lower_expr(f, fr);
                        self.line = f.line;

                        let tr = self.add_reg();
                        self.cmd(Opcode::LoadNull, CmdArgs::Reg(tr));
                        self.cmd_open(Opcode::CallStart, CmdArgs::RegReg(fr, tr));
                        self.cmd(Opcode::Arg, CmdArgs::Reg(er));

                        let cr = self.add_reg();
                        self.cmd_close(Opcode::CallEnd, CmdArgs::Reg(cr));
                        self.cmd(Opcode::Jt, CmdArgs::RegLabel(cr, lab));
                    }
                    CaseCond::Expr(cond) => {
                        let cr = self.add_reg();
                        self.lower_expr(cond, cr);
                        let tr = self.add_reg();

                        self.line = cond.line;
                        self.cmd(Opcode::Eq, CmdArgs::RegRegReg(er, cr, tr));
                        self.cmd(Opcode::Jt, CmdArgs::RegLabel(tr, lab));
                    }
                }
            }
        }

        let lend = self.add_label();
        let mut lnull = None;

        self.line = line;
        match (lall, rr) {
            (Some(lall), _) => self.cmd(Opcode::Jmp, CmdArgs::Label(lall)),
            (None, Some(_)) => {
                let l = self.add_label();
                lnull = Some(l);
                self.cmd(Opcode::Jmp, CmdArgs::Label(l));
            }
            (None, None) => self.cmd(Opcode::Jmp, CmdArgs::Label(lend)),
        }

        for (item, lab) in node.items.iter().zip(arm_labels) {
            self.stub(lab);
            self.lower_block_body(&item.block, rr, or);
            self.line = line;
            self.cmd(Opcode::Jmp, CmdArgs::Label(lend));
        }

        if let (Some(l), Some(rr)) = (lnull, rr) {
            self.stub(l);
            self.cmd(Opcode::LoadNull, CmdArgs::Reg(rr));
        }

        self.stub(lend);
    }

    fn lower_case_props(&mut self, node: &CaseNode, or: RegId) {
        self.lower_case(node, self.line, None, Some(or));
    }

    fn lower_case_items(&mut self, node: &CaseNode) {
        self.lower_case(node, self.line, None, None);
    }

    fn lower_block_body(&mut self, b: &BlockBody, rr: Option<RegId>, or: Option<RegId>) {
        match b {
            BlockBody::Stmts(stmts) => self.lower_stmts(stmts, rr),
            BlockBody::Props(props) => {
                let or = or.expect("property block outside an object literal");
                self.lower_object_props(props, or);
            }
            BlockBody::Items(items) => self.lower_array_items(items),
        }
    }

    // ---- statements ----

    pub(crate) fn lower_stmts(&mut self, stmts: &[Stmt], rr: Option<RegId>) {
        if stmts.is_empty() {
            if let Some(rr) = rr {
                self.cmd(Opcode::LoadNull, CmdArgs::Reg(rr));
            }
            return;
        }
        for (i, s) in stmts.iter().enumerate() {
            let sr = if i == stmts.len() - 1 { rr } else { None };
            self.lower_stmt(s, sr);
        }
    }

    fn lower_stmt(&mut self, s: &Stmt, rr: Option<RegId>) {
        let mut is_expr = false;
        match &s.kind {
            StmtKind::If(node) => {
                self.lower_if(node, s.line, rr, None);
                is_expr = true;
            }
            StmtKind::Case(node) => {
                self.lower_case(node, s.line, rr, None);
                is_expr = true;
            }
            StmtKind::DoWhile { body, cond } => self.lower_do_while(body, cond),
            StmtKind::While { cond, body } => self.lower_while(cond, body),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.lower_for(init.as_ref(), cond.as_ref(), step.as_ref(), body),
            StmtKind::ForAs {
                target,
                iterable,
                body,
            } => self.lower_for_as(s.line, target, iterable, body),
            StmtKind::Sched { body } => self.lower_sched(s.line, body.as_deref()),
            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.lower_try(s.line, body, catch.as_ref(), finally.as_deref()),
            StmtKind::Return(expr) => {
                let er = self.add_reg();
                self.line = s.line;
                match expr {
                    None => self.cmd(Opcode::LoadNull, CmdArgs::Reg(er)),
                    Some(e) => {
                        self.lower_expr(e, er);
                        self.line = s.line;
                    }
                }
                self.cmd(Opcode::Ret, CmdArgs::Reg(er));
            }
            StmtKind::Throw(e) => {
                let er = self.add_reg();
                self.lower_expr(e, er);
                self.line = s.line;
                self.cmd(Opcode::Throw, CmdArgs::Reg(er));
            }
            StmtKind::Break => {
                self.line = s.line;
                match self.break_label {
                    None => self.error(ErrorKind::Syntax, "break outside a loop"),
                    Some(l) => self.jump_or_deep_jump(l),
                }
            }
            StmtKind::Continue => {
                self.line = s.line;
                match self.continue_label {
                    None => self.error(ErrorKind::Syntax, "continue outside a loop"),
                    Some(l) => self.jump_or_deep_jump(l),
                }
            }
            StmtKind::Expr(e) => {
                let er = match rr {
                    Some(r) => r,
                    None => self.add_reg(),
                };
                self.lower_expr(e, er);
                is_expr = true;
            }
        }

        if let (Some(rr), false) = (rr, is_expr) {
            self.cmd(Opcode::LoadNull, CmdArgs::Reg(rr));
        }
    }

    /// `break`/`continue`: a plain jump when the target label was
    /// registered at the current block-stack level, a deep jump through
    /// the unwinder otherwise.
    fn jump_or_deep_jump(&mut self, l: LabelId) {
        let target_level = self.labels[l].stack_level;
        if target_level == self.stack_level {
            self.cmd(Opcode::Jmp, CmdArgs::Label(l));
        } else {
            let depth = (self.stack_level - target_level) as u8;
            self.cmd(Opcode::DeepJmp, CmdArgs::DepthLabel(depth, l));
        }
    }

    fn lower_do_while(&mut self, body: &[Stmt], cond: &Expr) {
        let old_bl = self.break_label;
        let old_cl = self.continue_label;

        let bl = self.add_label();
        let cl = self.add_label();
        self.break_label = Some(bl);
        self.continue_label = Some(cl);

        self.stub(cl);
        self.lower_stmts(body, None);

        let er = self.add_reg();
        self.lower_expr(cond, er);
        self.line = cond.line;
        self.cmd(Opcode::Jt, CmdArgs::RegLabel(er, cl));

        self.stub(bl);
        self.break_label = old_bl;
        self.continue_label = old_cl;
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) {
        let old_bl = self.break_label;
        let old_cl = self.continue_label;

        let bl = self.add_label();
        let cl = self.add_label();
        self.break_label = Some(bl);
        self.continue_label = Some(cl);

        self.stub(cl);

        let er = self.add_reg();
        self.lower_expr(cond, er);
        self.line = cond.line;
        self.cmd(Opcode::Jf, CmdArgs::RegLabel(er, bl));

        self.lower_stmts(body, None);
        self.cmd(Opcode::Jmp, CmdArgs::Label(cl));

        self.stub(bl);
        self.break_label = old_bl;
        self.continue_label = old_cl;
    }

    fn lower_for(
        &mut self,
        init: Option<&Expr>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
    ) {
        let old_bl = self.break_label;
        let old_cl = self.continue_label;

        if let Some(init) = init {
            let er = self.add_reg();
            self.lower_expr(init, er);
        }

        let bl = self.add_label();
        let cl = self.add_label();
        self.break_label = Some(bl);
        self.continue_label = Some(cl);

        let sl = self.add_label();
        self.stub(sl);

        if let Some(cond) = cond {
            let er = self.add_reg();
            self.lower_expr(cond, er);
            self.line = cond.line;
            self.cmd(Opcode::Jf, CmdArgs::RegLabel(er, bl));
        }

        self.lower_stmts(body, None);
        self.stub(cl);

        if let Some(step) = step {
            let er = self.add_reg();
            self.lower_expr(step, er);
        }

        self.cmd(Opcode::Jmp, CmdArgs::Label(sl));
        self.stub(bl);

        self.break_label = old_bl;
        self.continue_label = old_cl;
    }

    fn lower_for_as(&mut self, line: u32, target: &Expr, iterable: &Expr, body: &[Stmt]) {
        let old_bl = self.break_label;
        let old_cl = self.continue_label;

        let er = self.add_reg();
        self.lower_expr(iterable, er);

        // The break label lives outside the iterator record; `iter_step`
        // pops the record before jumping there.
        let bl = self.add_label();
        self.break_label = Some(bl);

        self.line = line;
        self.cmd_open(Opcode::IterStart, CmdArgs::Reg(er));

        let cl = self.add_label();
        self.continue_label = Some(cl);
        self.stub(cl);

        let vr = self.add_reg();
        self.line = iterable.line;
        self.cmd(Opcode::IterStep, CmdArgs::RegLabel(vr, bl));

        self.left_ast_assi(target, vr, target.line);

        self.lower_stmts(body, None);
        self.cmd(Opcode::Jmp, CmdArgs::Label(cl));

        self.stack_level -= 1;
        self.stub(bl);

        self.break_label = old_bl;
        self.continue_label = old_cl;
    }

    fn lower_sched(&mut self, line: u32, body: Option<&[Stmt]>) {
        self.line = line;
        match body {
            None => self.cmd(Opcode::Sched, CmdArgs::None),
            Some(body) => {
                self.cmd_open(Opcode::SchedStart, CmdArgs::None);
                self.lower_stmts(body, None);
                self.line = line;
                self.cmd_close(Opcode::SPop, CmdArgs::None);
            }
        }
    }

    fn lower_try(
        &mut self,
        line: u32,
        body: &[Stmt],
        catch: Option<&CatchClause>,
        finally: Option<&[Stmt]>,
    ) {
        // Catch and finally labels are reached with the try record still
        // on the stack, one level above the surrounding code.
        let cl = self.add_label_l(1);
        let fl = self.add_label_l(1);

        self.line = line;
        self.cmd_open(Opcode::TryStart, CmdArgs::LabelLabel(cl, fl));

        self.lower_stmts(body, None);
        self.line = line;
        self.cmd(Opcode::TryEnd, CmdArgs::None);

        self.stub(cl);
        if let Some(catch) = catch {
            let er = self.add_reg();
            self.line = catch.target.line;
            self.cmd(Opcode::Catch, CmdArgs::Reg(er));
            self.left_ast_assi(&catch.target, er, catch.target.line);
            self.lower_stmts(&catch.body, None);
            self.cmd(Opcode::CatchEnd, CmdArgs::None);
        }

        self.stub(fl);
        if let Some(finally) = finally {
            self.lower_stmts(finally, None);
        }
        self.cmd_close(Opcode::Finally, CmdArgs::None);
    }

    pub(crate) fn lower_params(&mut self, params: &[Param]) {
        if params.is_empty() {
            return;
        }

        self.line = params[0].line;
        self.cmd_open(Opcode::PStart, CmdArgs::None);

        for p in params {
            let pr = self.add_reg();
            self.line = p.line;

            if p.rest {
                self.cmd(Opcode::PRest, CmdArgs::Reg(pr));
                self.left_ast_assi(&p.pattern, pr, p.line);
                continue;
            }

            self.cmd(Opcode::PGet, CmdArgs::Reg(pr));

            if let Some(defv) = &p.default {
                let l = self.add_label();
                self.line = defv.line;
                self.cmd(Opcode::Jnn, CmdArgs::RegLabel(pr, l));
                self.lower_expr(defv, pr);
                self.stub(l);
            }

            self.left_ast_assi(&p.pattern, pr, p.line);
        }

        self.cmd_close(Opcode::SPop, CmdArgs::None);
    }
}
