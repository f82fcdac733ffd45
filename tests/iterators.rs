//! Iterator protocol: `for ... as` loops over arrays and user iterators,
//! and the auto-close guarantees around them.

mod common;

use common::*;
use ox_vm::ast::BinaryOp;
use ox_vm::heap::HeapObj;
use ox_vm::interpreter::Interpreter;
use ox_vm::object::{Object, Prop, PropKey};
use ox_vm::value::{OxStr, Value};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn for_as_sums_an_array() {
    // n = 0; for (v as [1, 2, 3]) n = n + v; n == 6
    let p = main_program(
        vec![decl("n"), decl("v")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            for_as(
                id("v"),
                array(vec![num(1.0), num(2.0), num(3.0)]),
                vec![estmt(assign(id("n"), bin(BinaryOp::Add, id("n"), id("v"))))],
            ),
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 6.0);
}

/// A producer that yields `1..=total` through the `end`/`value`/`next`
/// protocol and counts `$close` invocations.
struct Producer {
    total: usize,
    pos: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

fn install_producer(vm: &mut Interpreter, producer: &Producer) -> Value {
    let pos = producer.pos.clone();
    let total = producer.total;
    let end = vm.native("end", move |_, _, _| {
        Ok(Value::Bool(pos.load(Ordering::SeqCst) >= total))
    });

    let pos = producer.pos.clone();
    let value = vm.native("value", move |_, _, _| {
        Ok(Value::Number(pos.load(Ordering::SeqCst) as f64 + 1.0))
    });

    let pos = producer.pos.clone();
    let next = vm.native("next", move |_, _, _| {
        pos.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });

    let closed = producer.closed.clone();
    let close = vm.native("$close", move |_, _, _| {
        closed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });

    let mut o = Object::new();
    o.define(PropKey::Str(OxStr::from("end")), Prop::Accessor { get: end, set: None });
    o.define(
        PropKey::Str(OxStr::from("value")),
        Prop::Accessor { get: value, set: None },
    );
    o.define(PropKey::Str(OxStr::from("next")), Prop::Var(next));
    o.define(PropKey::Str(OxStr::from("$close")), Prop::Var(close));

    Value::Ref(vm.heap.alloc(HeapObj::Object(o)))
}

#[test]
fn user_iterator_runs_to_exhaustion_and_closes_once() {
    let mut vm = Interpreter::new();
    let producer = Producer {
        total: 3,
        pos: Arc::new(AtomicUsize::new(0)),
        closed: Arc::new(AtomicUsize::new(0)),
    };
    let it = install_producer(&mut vm, &producer);
    vm.global_define("it", it);

    // n = 0; for (line as it) n = n + line; n
    let p = main_program(
        vec![decl("n"), decl("line")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            for_as(
                id("line"),
                id("it"),
                vec![estmt(assign(id("n"), bin(BinaryOp::Add, id("n"), id("line"))))],
            ),
            estmt(id("n")),
        ],
    );

    let out = eval_in(&mut vm, &p).expect("loop failed");
    assert_eq!(as_num(&out), 6.0);
    assert_eq!(producer.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn early_break_still_closes_exactly_once() {
    let mut vm = Interpreter::new();
    let producer = Producer {
        total: 100,
        pos: Arc::new(AtomicUsize::new(0)),
        closed: Arc::new(AtomicUsize::new(0)),
    };
    let it = install_producer(&mut vm, &producer);
    vm.global_define("it", it);

    // n = 0; for (line as it) { n = n + 1; if (n == 2) break } n
    let p = main_program(
        vec![decl("n"), decl("line")],
        vec![
            estmt(assign(id("n"), num(0.0))),
            for_as(
                id("line"),
                id("it"),
                vec![
                    estmt(assign(id("n"), bin(BinaryOp::Add, id("n"), num(1.0)))),
                    if_(bin(BinaryOp::Eq, id("n"), num(2.0)), vec![brk()], None),
                ],
            ),
            estmt(id("n")),
        ],
    );

    let out = eval_in(&mut vm, &p).expect("loop failed");
    assert_eq!(as_num(&out), 2.0);
    assert_eq!(producer.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn throw_inside_the_loop_closes_the_iterator() {
    let mut vm = Interpreter::new();
    let producer = Producer {
        total: 100,
        pos: Arc::new(AtomicUsize::new(0)),
        closed: Arc::new(AtomicUsize::new(0)),
    };
    let it = install_producer(&mut vm, &producer);
    vm.global_define("it", it);

    let p = main_program(
        vec![decl("line")],
        vec![for_as(id("line"), id("it"), vec![throw(str_("stop"))])],
    );

    assert!(eval_in(&mut vm, &p).is_err());
    assert_eq!(producer.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn auto_close_declarations_close_on_scope_exit() {
    use ox_vm::ast::DeclKind;

    let mut vm = Interpreter::new();
    let closed = Arc::new(AtomicUsize::new(0));

    let c = closed.clone();
    let close = vm.native("$close", move |_, _, _| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    });
    let mut o = Object::new();
    o.define(PropKey::Str(OxStr::from("$close")), Prop::Var(close));
    let resource = Value::Ref(vm.heap.alloc(HeapObj::Object(o)));
    vm.global_define("res", resource);

    // f() { using r = res; return 1 } — r auto-closes on return.
    let f = func_def(
        Some(0),
        vec![],
        vec![decl_kind("r", DeclKind::AutoClose)],
        vec![estmt(assign(id("r"), id("res"))), ret(num(1.0))],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f")],
                vec![estmt(assign(id("f"), func_ref(1))), estmt(call(id("f"), vec![]))],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };

    let out = eval_in(&mut vm, &p).expect("program failed");
    assert_eq!(as_num(&out), 1.0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn reassigning_an_auto_close_slot_closes_the_prior_value() {
    use ox_vm::ast::DeclKind;

    let mut vm = Interpreter::new();
    let closed = Arc::new(AtomicUsize::new(0));

    for name in ["res1", "res2"] {
        let c = closed.clone();
        let close = vm.native("$close", move |_, _, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        let mut o = Object::new();
        o.define(PropKey::Str(OxStr::from("$close")), Prop::Var(close));
        let v = Value::Ref(vm.heap.alloc(HeapObj::Object(o)));
        vm.global_define(name, v);
    }

    let f = func_def(
        Some(0),
        vec![],
        vec![decl_kind("r", DeclKind::AutoClose)],
        vec![
            estmt(assign(id("r"), id("res1"))),
            // Closes res1, then res2 closes on scope exit.
            estmt(assign(id("r"), id("res2"))),
            ret(num(0.0)),
        ],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f")],
                vec![estmt(assign(id("f"), func_ref(1))), estmt(call(id("f"), vec![]))],
            ),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };

    eval_in(&mut vm, &p).expect("program failed");
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}
