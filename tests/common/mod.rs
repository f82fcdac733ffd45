//! Shared helpers: hand-built AST nodes standing in for the parser, and
//! drivers that compile and run a program in one step.
#![allow(dead_code)]

use ox_vm::ast::*;
use ox_vm::compiler::{compile, CompileFlags};
use ox_vm::error::VmError;
use ox_vm::interpreter::Interpreter;
use ox_vm::value::{OxStr, Value};

pub fn num(n: f64) -> Expr {
    Expr::new(ExprKind::Literal(Literal::Number(n)), 1)
}

pub fn str_(s: &str) -> Expr {
    Expr::new(ExprKind::Literal(Literal::Str(OxStr::from(s))), 1)
}

pub fn bool_(b: bool) -> Expr {
    Expr::new(ExprKind::Literal(Literal::Bool(b)), 1)
}

pub fn null() -> Expr {
    Expr::new(ExprKind::Literal(Literal::Null), 1)
}

pub fn id(name: &str) -> Expr {
    Expr::new(ExprKind::Id(OxStr::from(name)), 1)
}

pub fn this() -> Expr {
    Expr::new(ExprKind::This, 1)
}

pub fn func_ref(fid: usize) -> Expr {
    Expr::new(ExprKind::Func(fid), 1)
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        1,
    )
}

pub fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ques_src: false,
            ques_dst: false,
        },
        1,
    )
}

/// `base.name`
pub fn get(base: Expr, name: &str) -> Expr {
    bin(BinaryOp::Get, base, str_(name))
}

/// `base?.name`, chain-terminal when `dst` is set.
pub fn get_q(base: Expr, name: &str, dst: bool) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op: BinaryOp::Get,
            lhs: Box::new(base),
            rhs: Box::new(str_(name)),
            ques_src: true,
            ques_dst: dst,
        },
        1,
    )
}

pub fn index(base: Expr, i: f64) -> Expr {
    bin(BinaryOp::Get, base, num(i))
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    Expr::new(
        ExprKind::Assign {
            target: Box::new(target),
            op: None,
            value: Box::new(value),
            get_old: false,
        },
        1,
    )
}

pub fn assign_op(target: Expr, op: BinaryOp, value: Expr) -> Expr {
    Expr::new(
        ExprKind::Assign {
            target: Box::new(target),
            op: Some(op),
            value: Box::new(value),
            get_old: false,
        },
        1,
    )
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Call {
            callee: Box::new(callee),
            args: args.into_iter().map(CallArg::Expr).collect(),
            ques_src: false,
            ques_dst: false,
        },
        1,
    )
}

pub fn array(items: Vec<Expr>) -> Expr {
    Expr::new(
        ExprKind::Array(items.into_iter().map(ArrayItem::Item).collect()),
        1,
    )
}

pub fn array_of(items: Vec<ArrayItem>) -> Expr {
    Expr::new(ExprKind::Array(items), 1)
}

pub fn object(props: Vec<(&str, Expr)>) -> Expr {
    Expr::new(
        ExprKind::Object(
            props
                .into_iter()
                .map(|(n, v)| ObjectItem::Prop {
                    name: PropName::Ident(OxStr::from(n)),
                    value: v,
                })
                .collect(),
        ),
        1,
    )
}

pub fn array_pattern(items: Vec<PatItem>) -> Expr {
    Expr::new(ExprKind::ArrayPattern(items), 1)
}

pub fn object_pattern(props: Vec<PatProp>) -> Expr {
    Expr::new(ExprKind::ObjectPattern(props), 1)
}

pub fn pat_item(name: &str) -> PatItem {
    PatItem::Item {
        pattern: Box::new(id(name)),
        default: None,
    }
}

pub fn pat_item_def(name: &str, default: Expr) -> PatItem {
    PatItem::Item {
        pattern: Box::new(id(name)),
        default: Some(default),
    }
}

pub fn pat_prop(name: &str) -> PatProp {
    PatProp::Prop {
        name: PropName::Ident(OxStr::from(name)),
        pattern: Box::new(id(name)),
        default: None,
    }
}

pub fn pat_prop_def(name: &str, default: Expr) -> PatProp {
    PatProp::Prop {
        name: PropName::Ident(OxStr::from(name)),
        pattern: Box::new(id(name)),
        default: Some(default),
    }
}

pub fn estmt(e: Expr) -> Stmt {
    Stmt {
        kind: StmtKind::Expr(e),
        line: 1,
    }
}

pub fn ret(e: Expr) -> Stmt {
    Stmt {
        kind: StmtKind::Return(Some(e)),
        line: 1,
    }
}

pub fn ret_none() -> Stmt {
    Stmt {
        kind: StmtKind::Return(None),
        line: 1,
    }
}

pub fn throw(e: Expr) -> Stmt {
    Stmt {
        kind: StmtKind::Throw(e),
        line: 1,
    }
}

pub fn brk() -> Stmt {
    Stmt {
        kind: StmtKind::Break,
        line: 1,
    }
}

pub fn cont() -> Stmt {
    Stmt {
        kind: StmtKind::Continue,
        line: 1,
    }
}

pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt {
        kind: StmtKind::While { cond, body },
        line: 1,
    }
}

pub fn for_as(target: Expr, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt {
        kind: StmtKind::ForAs {
            target,
            iterable,
            body,
        },
        line: 1,
    }
}

pub fn if_(cond: Expr, then: Vec<Stmt>, els: Option<Vec<Stmt>>) -> Stmt {
    Stmt {
        kind: StmtKind::If(IfNode {
            branches: vec![(cond, BlockBody::Stmts(then))],
            else_blk: els.map(BlockBody::Stmts),
        }),
        line: 1,
    }
}

pub fn try_(body: Vec<Stmt>, catch: Option<(&str, Vec<Stmt>)>, finally: Option<Vec<Stmt>>) -> Stmt {
    Stmt {
        kind: StmtKind::Try {
            body,
            catch: catch.map(|(name, body)| CatchClause {
                target: id(name),
                body,
            }),
            finally,
        },
        line: 1,
    }
}

pub fn decl(name: &str) -> Decl {
    Decl {
        name: OxStr::from(name),
        kind: DeclKind::Var,
        public: false,
    }
}

pub fn decl_kind(name: &str, kind: DeclKind) -> Decl {
    Decl {
        name: OxStr::from(name),
        kind,
        public: false,
    }
}

pub fn param(name: &str) -> Param {
    Param {
        pattern: id(name),
        default: None,
        rest: false,
        line: 1,
    }
}

pub fn func_def(outer: Option<usize>, params: Vec<Param>, decls: Vec<Decl>, body: Vec<Stmt>) -> FuncDef {
    FuncDef {
        outer,
        this: false,
        params,
        body,
        decls,
        line: 1,
    }
}

/// A single-function program.
pub fn main_program(decls: Vec<Decl>, body: Vec<Stmt>) -> Program {
    Program {
        funcs: vec![func_def(None, vec![], decls, body)],
        refs: vec![],
        text_domain: None,
    }
}

/// Compile in expression mode and run; the last statement's value comes
/// back.
pub fn eval_in(vm: &mut Interpreter, program: &Program) -> Result<Value, VmError> {
    let script = compile(vm, "test", program, CompileFlags::EXPR)?;
    vm.run_script(&script)
}

pub fn eval(program: &Program) -> Result<Value, VmError> {
    eval_in(&mut Interpreter::new(), program)
}

/// Evaluate a program and expect a number back.
pub fn eval_num(program: &Program) -> f64 {
    match eval(program).expect("program failed") {
        Value::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

pub fn eval_bool(program: &Program) -> bool {
    match eval(program).expect("program failed") {
        Value::Bool(b) => b,
        other => panic!("expected a boolean, got {other:?}"),
    }
}

pub fn as_num(v: &Value) -> f64 {
    match v {
        Value::Number(n) => *n,
        other => panic!("expected a number, got {other:?}"),
    }
}
