//! Value-model behavior through compiled programs: arithmetic,
//! truthiness, string concatenation and the integer fast paths.

mod common;

use common::*;
use ox_vm::ast::{BinaryOp, UnaryOp};
use ox_vm::value::Value;

#[test]
fn arithmetic_groups_and_precedence() {
    // (2 + 3) * 4 == 20
    let p = main_program(
        vec![],
        vec![estmt(bin(
            BinaryOp::Mul,
            bin(BinaryOp::Add, num(2.0), num(3.0)),
            num(4.0),
        ))],
    );
    assert_eq!(eval_num(&p), 20.0);
}

#[test]
fn truthiness_of_not() {
    for (operand, expected) in [
        (num(0.0), true),
        (num(1.0), false),
        (str_(""), true),
        (str_("x"), false),
    ] {
        let p = main_program(vec![], vec![estmt(unary(UnaryOp::Not, operand))]);
        assert_eq!(eval_bool(&p), expected);
    }
}

#[test]
fn string_concatenation_promotes_either_side() {
    let p = main_program(
        vec![],
        vec![estmt(bin(BinaryOp::Add, str_("n = "), num(3.0)))],
    );
    match eval(&p).unwrap() {
        Value::Str(s) => assert_eq!(s.as_str(), "n = 3"),
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn division_uses_ieee_semantics() {
    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Div, num(1.0), num(0.0)))]);
    match eval(&p).unwrap() {
        Value::Number(n) => assert!(n.is_infinite()),
        other => panic!("expected a number, got {other:?}"),
    }

    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Mod, num(7.5), num(2.0)))]);
    assert_eq!(eval_num(&p), 1.5);
}

#[test]
fn comparison_chain_evaluates_middle_once() {
    // 1 < 2 < 3 is (1 < 2) && (2 < 3), not (1 < 2) < 3.
    let p = main_program(
        vec![],
        vec![estmt(bin(
            BinaryOp::Lt,
            bin(BinaryOp::Lt, num(1.0), num(2.0)),
            num(3.0),
        ))],
    );
    assert!(eval_bool(&p));

    // 3 < 2 < 1 short-circuits to false.
    let p = main_program(
        vec![],
        vec![estmt(bin(
            BinaryOp::Lt,
            bin(BinaryOp::Lt, num(3.0), num(2.0)),
            num(1.0),
        ))],
    );
    assert!(!eval_bool(&p));
}

#[test]
fn string_ordering_is_by_code_point() {
    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Lt, str_("abc"), str_("abd")))]);
    assert!(eval_bool(&p));

    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Ge, str_("b"), str_("aaaa")))]);
    assert!(eval_bool(&p));
}

#[test]
fn equality_crosses_numeric_tags() {
    let p = main_program(
        vec![],
        vec![estmt(bin(BinaryOp::Eq, num(3.0), num(3.0)))],
    );
    assert!(eval_bool(&p));

    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Ne, num(3.0), str_("3")))]);
    assert!(eval_bool(&p));
}

#[test]
fn bitwise_narrows_to_32_bits() {
    let p = main_program(
        vec![],
        vec![estmt(bin(BinaryOp::BitAnd, num(255.0), num(15.0)))],
    );
    assert_eq!(eval_num(&p), 15.0);

    let p = main_program(
        vec![],
        vec![estmt(bin(BinaryOp::Shl, num(1.0), num(8.0)))],
    );
    assert_eq!(eval_num(&p), 256.0);

    // -1 >>> 0 reinterprets as an unsigned word.
    let p = main_program(
        vec![],
        vec![estmt(bin(BinaryOp::Ushr, num(-1.0), num(0.0)))],
    );
    assert_eq!(eval_num(&p), u32::MAX as f64);
}

#[test]
fn typeof_names() {
    for (e, expected) in [
        (num(1.0), "number"),
        (str_("x"), "string"),
        (bool_(true), "boolean"),
        (null(), "null"),
        (array(vec![num(1.0)]), "array"),
        (object(vec![("a", num(1.0))]), "object"),
    ] {
        let p = main_program(vec![], vec![estmt(unary(UnaryOp::TypeOf, e))]);
        match eval(&p).unwrap() {
            Value::Str(s) => assert_eq!(s.as_str(), expected),
            other => panic!("expected a string, got {other:?}"),
        }
    }
}

#[test]
fn unary_negation_and_plus() {
    let p = main_program(vec![], vec![estmt(unary(UnaryOp::Neg, num(4.0)))]);
    assert_eq!(eval_num(&p), -4.0);

    let p = main_program(vec![], vec![estmt(unary(UnaryOp::Plus, str_(" 12 ")))]);
    assert_eq!(eval_num(&p), 12.0);
}

#[test]
fn array_and_object_literals_build_and_read_back() {
    // [10, 20, 30][1] == 20
    let p = main_program(
        vec![],
        vec![estmt(index(array(vec![num(10.0), num(20.0), num(30.0)]), 1.0))],
    );
    assert_eq!(eval_num(&p), 20.0);

    // {a: 1, b: 2}.b == 2
    let p = main_program(
        vec![],
        vec![estmt(get(object(vec![("a", num(1.0)), ("b", num(2.0))]), "b"))],
    );
    assert_eq!(eval_num(&p), 2.0);

    // length of a literal
    let p = main_program(
        vec![],
        vec![estmt(get(array(vec![num(1.0), num(2.0)]), "length"))],
    );
    assert_eq!(eval_num(&p), 2.0);
}

#[test]
fn comma_yields_the_last_expression() {
    use ox_vm::ast::{Expr, ExprKind};
    let p = main_program(
        vec![],
        vec![estmt(Expr::new(
            ExprKind::Comma(vec![num(1.0), num(2.0), num(3.0)]),
            1,
        ))],
    );
    assert_eq!(eval_num(&p), 3.0);
}
