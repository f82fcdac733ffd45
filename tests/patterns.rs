//! Destructuring: array and object patterns, defaults and rest
//! collection.

mod common;

use common::*;
use ox_vm::ast::{BinaryOp, PatItem, PatProp};
use ox_vm::value::Value;

#[test]
fn array_pattern_with_rest() {
    // var [a, b, ...r] = [1, 2, 3, 4];
    // a == 1, b == 2, r == [3, 4]
    let p = main_program(
        vec![decl("a"), decl("b"), decl("r")],
        vec![
            estmt(assign(
                array_pattern(vec![
                    pat_item("a"),
                    pat_item("b"),
                    PatItem::Rest(Box::new(id("r"))),
                ]),
                array(vec![num(1.0), num(2.0), num(3.0), num(4.0)]),
            )),
            // a * 100 + b * 10 + r.length
            estmt(bin(
                BinaryOp::Add,
                bin(
                    BinaryOp::Add,
                    bin(BinaryOp::Mul, id("a"), num(100.0)),
                    bin(BinaryOp::Mul, id("b"), num(10.0)),
                ),
                get(id("r"), "length"),
            )),
        ],
    );
    assert_eq!(eval_num(&p), 122.0);
}

#[test]
fn array_pattern_rest_contents() {
    let p = main_program(
        vec![decl("a"), decl("r")],
        vec![
            estmt(assign(
                array_pattern(vec![pat_item("a"), PatItem::Rest(Box::new(id("r")))]),
                array(vec![num(1.0), num(2.0), num(3.0)]),
            )),
            estmt(bin(
                BinaryOp::Add,
                index(id("r"), 0.0),
                index(id("r"), 1.0),
            )),
        ],
    );
    assert_eq!(eval_num(&p), 5.0);
}

#[test]
fn array_pattern_skip_and_default() {
    // var [, b = 9, c = 5] = [1, 2]; b == 2, c == 5
    let p = main_program(
        vec![decl("b"), decl("c")],
        vec![
            estmt(assign(
                array_pattern(vec![
                    PatItem::Skip,
                    pat_item_def("b", num(9.0)),
                    pat_item_def("c", num(5.0)),
                ]),
                array(vec![num(1.0), num(2.0)]),
            )),
            estmt(bin(BinaryOp::Add, id("b"), id("c"))),
        ],
    );
    assert_eq!(eval_num(&p), 7.0);
}

#[test]
fn object_pattern_with_default_and_rest() {
    // var {x, y = 5, ...rest} = {x: 1, z: 9};
    // x == 1, y == 5, rest == {z: 9}
    let p = main_program(
        vec![decl("x"), decl("y"), decl("rest")],
        vec![
            estmt(assign(
                object_pattern(vec![
                    pat_prop("x"),
                    pat_prop_def("y", num(5.0)),
                    PatProp::Rest(Box::new(id("rest"))),
                ]),
                object(vec![("x", num(1.0)), ("z", num(9.0))]),
            )),
            estmt(bin(
                BinaryOp::Add,
                bin(BinaryOp::Add, id("x"), id("y")),
                get(id("rest"), "z"),
            )),
        ],
    );
    assert_eq!(eval_num(&p), 15.0);
}

#[test]
fn object_pattern_rest_excludes_read_properties() {
    let p = main_program(
        vec![decl("x"), decl("rest")],
        vec![
            estmt(assign(
                object_pattern(vec![pat_prop("x"), PatProp::Rest(Box::new(id("rest")))]),
                object(vec![("x", num(1.0)), ("z", num(9.0))]),
            )),
            estmt(get(id("rest"), "x")),
        ],
    );
    assert!(matches!(eval(&p).unwrap(), Value::Null));
}

#[test]
fn parameters_bind_positionally_with_defaults_and_rest() {
    use ox_vm::ast::Param;
    // f(a, b = 10, ...rest) called as f(1) and f(1, 2, 3, 4)
    let f = func_def(
        Some(0),
        vec![
            param("a"),
            Param {
                pattern: id("b"),
                default: Some(num(10.0)),
                rest: false,
                line: 1,
            },
            Param {
                pattern: id("rest"),
                default: None,
                rest: true,
                line: 1,
            },
        ],
        vec![decl("a"), decl("b"), decl("rest")],
        vec![ret(bin(
            BinaryOp::Add,
            bin(BinaryOp::Add, id("a"), id("b")),
            get(id("rest"), "length"),
        ))],
    );

    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f")],
                vec![
                    estmt(assign(id("f"), func_ref(1))),
                    estmt(bin(
                        BinaryOp::Add,
                        call(id("f"), vec![num(1.0)]),
                        call(id("f"), vec![num(1.0), num(2.0), num(3.0), num(4.0)]),
                    )),
                ],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };

    // f(1) == 1 + 10 + 0 == 11; f(1,2,3,4) == 1 + 2 + 2 == 5
    assert_eq!(eval_num(&p), 16.0);
}

#[test]
fn spread_in_array_literals() {
    use ox_vm::ast::ArrayItem;
    // [0, ...[1, 2], 3].length == 4 and [..][2] == 2
    let arr = array_of(vec![
        ArrayItem::Item(num(0.0)),
        ArrayItem::Spread(array(vec![num(1.0), num(2.0)])),
        ArrayItem::Item(num(3.0)),
    ]);
    let p = main_program(
        vec![decl("a")],
        vec![
            estmt(assign(id("a"), arr)),
            estmt(bin(
                BinaryOp::Add,
                bin(BinaryOp::Mul, get(id("a"), "length"), num(10.0)),
                index(id("a"), 2.0),
            )),
        ],
    );
    assert_eq!(eval_num(&p), 42.0);
}

#[test]
fn spread_in_calls() {
    use ox_vm::ast::{CallArg, Expr, ExprKind};
    // f(a, b, c) = a*100 + b*10 + c, called as f(1, ...[2, 3])
    let f = func_def(
        Some(0),
        vec![param("a"), param("b"), param("c")],
        vec![decl("a"), decl("b"), decl("c")],
        vec![ret(bin(
            BinaryOp::Add,
            bin(
                BinaryOp::Add,
                bin(BinaryOp::Mul, id("a"), num(100.0)),
                bin(BinaryOp::Mul, id("b"), num(10.0)),
            ),
            id("c"),
        ))],
    );

    let call_spread = Expr::new(
        ExprKind::Call {
            callee: Box::new(id("f")),
            args: vec![
                CallArg::Expr(num(1.0)),
                CallArg::Spread(array(vec![num(2.0), num(3.0)])),
            ],
            ques_src: false,
            ques_dst: false,
        },
        1,
    );

    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f")],
                vec![estmt(assign(id("f"), func_ref(1))), estmt(call_spread)],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };
    assert_eq!(eval_num(&p), 123.0);
}
