//! Fibers: yield/resume slices, terminal states and resume values.

mod common;

use common::*;
use ox_vm::ast::{BinaryOp, UnaryOp};
use ox_vm::error::{ErrorKind, Raised};
use ox_vm::interpreter::fiber::FiberState;
use ox_vm::heap::HeapObj;
use ox_vm::interpreter::Interpreter;
use ox_vm::value::Value;

fn fiber_state(vm: &Interpreter, fiber: &Value) -> FiberState {
    match fiber {
        Value::Ref(gc) => match vm.heap.get(*gc) {
            HeapObj::Fiber(f) => f.state,
            _ => panic!("not a fiber"),
        },
        _ => panic!("not a fiber"),
    }
}

/// Build `function() { yield 1; yield 2; yield 3; return 4 }` and hand
/// the function value back.
fn make_counter_fn(vm: &mut Interpreter) -> Value {
    let body = vec![
        estmt(unary(UnaryOp::Yield, num(1.0))),
        estmt(unary(UnaryOp::Yield, num(2.0))),
        estmt(unary(UnaryOp::Yield, num(3.0))),
        ret(num(4.0)),
    ];
    let f = func_def(Some(0), vec![], vec![], body);
    let p = ox_vm::ast::Program {
        funcs: vec![func_def(None, vec![], vec![], vec![estmt(func_ref(1))]), f],
        refs: vec![],
        text_domain: None,
    };
    eval_in(vm, &p).expect("function literal failed")
}

#[test]
fn fiber_yields_then_returns_then_refuses() {
    let mut vm = Interpreter::new();
    let f = make_counter_fn(&mut vm);
    let fiber = vm.fiber_new(f);
    vm.global_ref(&fiber);

    for expected in [1.0, 2.0, 3.0] {
        let v = vm
            .call_value(fiber.clone(), Value::Null, vec![])
            .expect("resume failed");
        assert_eq!(as_num(&v), expected);
        assert_eq!(fiber_state(&vm, &fiber), FiberState::Suspended);
    }

    let v = vm
        .call_value(fiber.clone(), Value::Null, vec![])
        .expect("final resume failed");
    assert_eq!(as_num(&v), 4.0);
    assert_eq!(fiber_state(&vm, &fiber), FiberState::End);

    match vm.call_value(fiber.clone(), Value::Null, vec![]) {
        Err(Raised::Error(e)) => assert_eq!(e.kind, ErrorKind::Reference),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

#[test]
fn yield_outside_a_fiber_is_a_reference_error() {
    let p = main_program(vec![], vec![estmt(unary(UnaryOp::Yield, num(1.0)))]);
    match eval(&p) {
        Err(e) => assert_eq!(e.kind(), ErrorKind::Reference),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

#[test]
fn resume_values_flow_back_into_the_fiber() {
    // function() { return (yield 1) + (yield 2) }
    let body = vec![ret(bin(
        BinaryOp::Add,
        unary(UnaryOp::Yield, num(1.0)),
        unary(UnaryOp::Yield, num(2.0)),
    ))];
    let f = func_def(Some(0), vec![], vec![], body);
    let p = ox_vm::ast::Program {
        funcs: vec![func_def(None, vec![], vec![], vec![estmt(func_ref(1))]), f],
        refs: vec![],
        text_domain: None,
    };

    let mut vm = Interpreter::new();
    let fv = eval_in(&mut vm, &p).expect("function literal failed");
    let fiber = vm.fiber_new(fv);

    let v = vm.call_value(fiber.clone(), Value::Null, vec![]).unwrap();
    assert_eq!(as_num(&v), 1.0);

    let v = vm
        .call_value(fiber.clone(), Value::Null, vec![Value::Number(10.0)])
        .unwrap();
    assert_eq!(as_num(&v), 2.0);

    let v = vm
        .call_value(fiber.clone(), Value::Null, vec![Value::Number(20.0)])
        .unwrap();
    assert_eq!(as_num(&v), 30.0);
    assert_eq!(fiber_state(&vm, &fiber), FiberState::End);
}

#[test]
fn a_failing_fiber_lands_in_the_error_state() {
    let body = vec![
        estmt(unary(UnaryOp::Yield, num(1.0))),
        throw(str_("fiber boom")),
    ];
    let f = func_def(Some(0), vec![], vec![], body);
    let p = ox_vm::ast::Program {
        funcs: vec![func_def(None, vec![], vec![], vec![estmt(func_ref(1))]), f],
        refs: vec![],
        text_domain: None,
    };

    let mut vm = Interpreter::new();
    let fv = eval_in(&mut vm, &p).expect("function literal failed");
    let fiber = vm.fiber_new(fv);

    assert_eq!(
        as_num(&vm.call_value(fiber.clone(), Value::Null, vec![]).unwrap()),
        1.0
    );
    assert!(vm.call_value(fiber.clone(), Value::Null, vec![]).is_err());
    assert_eq!(fiber_state(&vm, &fiber), FiberState::Error);

    // Dead fibers refuse further resumes.
    match vm.call_value(fiber.clone(), Value::Null, vec![]) {
        Err(Raised::Error(e)) => assert_eq!(e.kind, ErrorKind::Reference),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

#[test]
fn fibers_keep_their_own_stacks() {
    // Two interleaved counter fibers do not disturb each other.
    let mut vm = Interpreter::new();
    let f1 = make_counter_fn(&mut vm);
    let fiber_a = vm.fiber_new(f1);
    let f2 = make_counter_fn(&mut vm);
    let fiber_b = vm.fiber_new(f2);

    let mut next = |fiber: &Value, vm: &mut Interpreter| {
        as_num(&vm.call_value(fiber.clone(), Value::Null, vec![]).unwrap())
    };

    assert_eq!(next(&fiber_a, &mut vm), 1.0);
    assert_eq!(next(&fiber_b, &mut vm), 1.0);
    assert_eq!(next(&fiber_a, &mut vm), 2.0);
    assert_eq!(next(&fiber_b, &mut vm), 2.0);
    assert_eq!(next(&fiber_a, &mut vm), 3.0);
    assert_eq!(next(&fiber_a, &mut vm), 4.0);
    assert_eq!(next(&fiber_b, &mut vm), 3.0);
    assert_eq!(next(&fiber_b, &mut vm), 4.0);
}
