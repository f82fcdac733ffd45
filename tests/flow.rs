//! Control flow through compiled programs: short-circuit evaluation,
//! try/catch/finally ordering, deep jumps, tail calls and null
//! propagation.

mod common;

use common::*;
use ox_vm::ast::{BinaryOp, Expr, ExprKind};
use ox_vm::error::{ErrorKind, VmError};
use ox_vm::value::Value;

fn logic(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    bin(op, lhs, rhs)
}

#[test]
fn short_circuit_skips_the_right_operand() {
    // var n = 0; (false && (n = 1)); n
    let p = main_program(
        vec![decl("n")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            estmt(logic(BinaryOp::LogicAnd, bool_(false), assign(id("n"), num(1.0)))),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 0.0);

    // (true || (n = 2)); n
    let p = main_program(
        vec![decl("n")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            estmt(logic(BinaryOp::LogicOr, bool_(true), assign(id("n"), num(2.0)))),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 0.0);

    // (true && (n = 3)); n
    let p = main_program(
        vec![decl("n")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            estmt(logic(BinaryOp::LogicAnd, bool_(true), assign(id("n"), num(3.0)))),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 3.0);
}

#[test]
fn while_loop_with_break_and_continue() {
    // n = 0; i = 0; while (i < 10) { i = i + 1; if (i == 3) continue;
    // if (i > 5) break; n = n + i; } n == 1+2+4+5
    let p = main_program(
        vec![decl("n"), decl("i")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            estmt(assign(id("i"), num(0.0))),
            while_(
                bin(BinaryOp::Lt, id("i"), num(10.0)),
                vec![
                    estmt(assign(id("i"), bin(BinaryOp::Add, id("i"), num(1.0)))),
                    if_(bin(BinaryOp::Eq, id("i"), num(3.0)), vec![cont()], None),
                    if_(bin(BinaryOp::Gt, id("i"), num(5.0)), vec![brk()], None),
                    estmt(assign(id("n"), bin(BinaryOp::Add, id("n"), id("i")))),
                ],
            ),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 12.0);
}

#[test]
fn try_finally_runs_on_the_return_path() {
    // Function: try { return 1 } finally { seen = true }
    // The call returns 1 and the finally has run.
    let f = func_def(
        Some(0),
        vec![],
        vec![],
        vec![try_(
            vec![ret(num(1.0))],
            None,
            Some(vec![estmt(assign(id("seen"), bool_(true)))]),
        )],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("seen"), decl("f")],
                vec![
                    estmt(assign(id("seen"), bool_(false))),
                    estmt(assign(id("f"), func_ref(1))),
                    estmt(assign(id("r"), call(id("f"), vec![]))),
                    // r + (seen ? 10 : 0)
                    estmt(bin(
                        BinaryOp::Add,
                        id("r"),
                        Expr::new(
                            ExprKind::If(ox_vm::ast::IfNode {
                                branches: vec![(
                                    id("seen"),
                                    ox_vm::ast::BlockBody::Stmts(vec![estmt(num(10.0))]),
                                )],
                                else_blk: Some(ox_vm::ast::BlockBody::Stmts(vec![estmt(num(0.0))])),
                            }),
                            1,
                        ),
                    )),
                ],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };
    // Patch in the missing declaration for `r`.
    let mut p = p;
    p.funcs[0].decls.push(decl("r"));

    assert_eq!(eval_num(&p), 11.0);
}

#[test]
fn throwing_finally_supersedes_the_return() {
    // try { return 1 } finally { throw "boom" } -> the throw wins.
    let f = func_def(
        Some(0),
        vec![],
        vec![],
        vec![try_(
            vec![ret(num(1.0))],
            None,
            Some(vec![throw(str_("boom"))]),
        )],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f")],
                vec![
                    estmt(assign(id("f"), func_ref(1))),
                    estmt(call(id("f"), vec![])),
                ],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };

    match eval(&p) {
        Err(VmError::Uncaught { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("expected the finally throw to surface, got {other:?}"),
    }
}

#[test]
fn catch_binds_the_thrown_value_and_finally_still_runs() {
    // order = 0;
    // try { throw 7 } catch (e) { order = order + e } finally { order = order * 10 }
    // order == 70
    let p = main_program(
        vec![decl("order"), decl("e")],
        vec![
            estmt(assign(id("order"), num(0.0))),
            try_(
                vec![throw(num(7.0))],
                Some(("e", vec![estmt(assign(
                    id("order"),
                    bin(BinaryOp::Add, id("order"), id("e")),
                ))])),
                Some(vec![estmt(assign(
                    id("order"),
                    bin(BinaryOp::Mul, id("order"), num(10.0)),
                ))]),
            ),
            estmt(id("order")),
        ],
    );
    assert_eq!(eval_num(&p), 70.0);
}

#[test]
fn error_in_catch_body_reraises_after_finally() {
    // try { throw 1 } catch (e) { throw "second" } finally { mark = 1 }
    let p = main_program(
        vec![decl("e"), decl("mark")],
        vec![
            estmt(assign(id("mark"), num(0.0))),
            try_(
                vec![throw(num(1.0))],
                Some(("e", vec![throw(str_("second"))])),
                Some(vec![estmt(assign(id("mark"), num(1.0)))]),
            ),
        ],
    );
    match eval(&p) {
        Err(VmError::Uncaught { message, .. }) => assert_eq!(message, "second"),
        other => panic!("expected the catch-body throw, got {other:?}"),
    }
}

#[test]
fn break_through_a_try_runs_the_finally() {
    // n = 0; while (true) { try { break } finally { n = n + 1 } } n == 1
    let p = main_program(
        vec![decl("n")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            while_(
                bool_(true),
                vec![try_(
                    vec![brk()],
                    None,
                    Some(vec![estmt(assign(
                        id("n"),
                        bin(BinaryOp::Add, id("n"), num(1.0)),
                    ))]),
                )],
            ),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 1.0);
}

#[test]
fn uncaught_errors_carry_kind_and_trace() {
    let p = main_program(vec![], vec![estmt(get(null(), "a"))]);
    match eval(&p) {
        Err(e @ VmError::Uncaught { .. }) => assert_eq!(e.kind(), ErrorKind::Null),
        other => panic!("expected an uncaught NullError, got {other:?}"),
    }
}

#[test]
fn tail_recursion_keeps_the_value_stack_flat() {
    // loop(n) { if (n < 1) return 42; return loop(n - 1) }
    let looper = func_def(
        Some(0),
        vec![param("n")],
        vec![decl("n")],
        vec![
            if_(
                bin(BinaryOp::Lt, id("n"), num(1.0)),
                vec![ret(num(42.0))],
                None,
            ),
            ret(call(id("looper"), vec![bin(BinaryOp::Sub, id("n"), num(1.0))])),
        ],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("looper")],
                vec![
                    estmt(assign(id("looper"), func_ref(1))),
                    estmt(call(id("looper"), vec![num(100_000.0)])),
                ],
            ),
            looper,
        ],
        refs: vec![],
        text_domain: None,
    };

    // Without frame reuse this would push 100k return records and
    // overflow the value stack long before finishing.
    assert_eq!(eval_num(&p), 42.0);
}

#[test]
fn null_propagation_short_circuits_without_throwing() {
    // obj = {a: null}; obj?.a?.b == null
    let chain = {
        let inner = get_q(id("obj"), "a", false);
        get_q(inner, "b", true)
    };
    let p = main_program(
        vec![decl("obj")],
        vec![
            estmt(assign(id("obj"), object(vec![("a", null())]))),
            estmt(chain),
        ],
    );
    assert!(matches!(eval(&p).unwrap(), Value::Null));
}

#[test]
fn plain_chain_on_null_names_the_property() {
    // obj = {a: null}; obj.a.b throws NullError naming "a".
    let p = main_program(
        vec![decl("obj")],
        vec![
            estmt(assign(id("obj"), object(vec![("a", null())]))),
            estmt(get(get(id("obj"), "a"), "b")),
        ],
    );
    match eval(&p) {
        Err(VmError::Uncaught { kind, message, .. }) => {
            assert_eq!(kind, ErrorKind::Null);
            assert!(message.contains("\"a\""), "message was {message:?}");
        }
        other => panic!("expected NullError, got {other:?}"),
    }
}

#[test]
fn compile_rejects_const_reset_from_nested_frames() {
    use ox_vm::ast::DeclKind;
    // const c at top level; a nested function assigns it.
    let inner = func_def(
        Some(0),
        vec![],
        vec![],
        vec![estmt(assign(id("c"), num(2.0)))],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl_kind("c", DeclKind::Const)],
                vec![estmt(func_ref(1))],
            ),
            inner,
        ],
        refs: vec![],
        text_domain: None,
    };
    match eval(&p) {
        Err(VmError::Compile(e)) => assert_eq!(e.kind, ErrorKind::Access),
        other => panic!("expected a compile error, got {other:?}"),
    }
}
