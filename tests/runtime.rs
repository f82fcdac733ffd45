//! The runtime façade: the VM lock, cross-thread sharing and the
//! unlock-run-relock wrapper.

mod common;

use common::*;
use ox_vm::ast::BinaryOp;
use ox_vm::runtime::Runtime;
use ox_vm::value::Value;

use std::thread;

#[test]
fn eval_compiles_and_runs_in_one_step() {
    let rt = Runtime::new();
    let p = main_program(vec![], vec![estmt(bin(BinaryOp::Add, num(40.0), num(2.0)))]);
    let v = rt.eval("sum", &p).expect("eval failed");
    assert_eq!(as_num(&v), 42.0);
}

#[test]
fn call_drives_a_function_value_from_the_host() {
    let rt = Runtime::new();
    let f = func_def(
        Some(0),
        vec![param("x")],
        vec![decl("x")],
        vec![ret(bin(BinaryOp::Mul, id("x"), num(2.0)))],
    );
    let p = ox_vm::ast::Program {
        funcs: vec![
            func_def(None, vec![], vec![], vec![estmt(func_ref(1))]),
            f,
        ],
        refs: vec![],
        text_domain: None,
    };

    let fv = rt.eval("mkfn", &p).expect("function literal failed");
    rt.lock().global_ref(&fv);

    let out = rt
        .call(&fv, &Value::Null, &[Value::Number(21.0)])
        .expect("call failed");
    assert_eq!(as_num(&out), 42.0);
}

#[test]
fn threads_take_turns_under_the_vm_lock() {
    let rt = Runtime::new();
    {
        let mut vm = rt.lock();
        let counter = object(vec![("total", num(0.0))]);
        let p = main_program(vec![], vec![estmt(counter)]);
        let obj = eval_in(&mut vm, &p).expect("counter literal failed");
        vm.global_ref(&obj);
        vm.global_define("g", obj);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let rt = rt.clone();
        handles.push(thread::spawn(move || {
            // g.total = g.total + 1, a hundred times, each run under the
            // lock; the lock makes the read-modify-write atomic.
            let p = main_program(
                vec![],
                vec![estmt(assign(
                    get(id("g"), "total"),
                    bin(BinaryOp::Add, get(id("g"), "total"), num(1.0)),
                ))],
            );
            let script = rt
                .compile("incr", &p, ox_vm::compiler::CompileFlags::empty())
                .expect("compile failed");
            for _ in 0..100 {
                rt.run(&script).expect("run failed");
            }
        }));
    }
    for h in handles {
        h.join().expect("worker panicked");
    }

    let mut vm = rt.lock();
    let g = vm.global_get("g");
    let total = vm
        .get_prop(&g, &Value::Str(ox_vm::value::OxStr::from("total")))
        .expect("read failed");
    assert_eq!(as_num(&total), 400.0);
}

#[test]
fn unlocked_releases_and_reacquires_the_lock() {
    let rt = Runtime::new();
    let guard = rt.lock();

    let rt2 = rt.clone();
    let (guard, observed) = rt.unlocked(guard, move || {
        // With the lock free, another handle can take it.
        let mut vm = rt2.lock();
        vm.global_define("probe", Value::Number(1.0));
        true
    });
    assert!(observed);

    drop(guard);
    assert_eq!(as_num(&rt.lock().global_get("probe")), 1.0);
}

#[test]
fn sched_statement_is_a_no_op_for_program_state() {
    use ox_vm::ast::{Stmt, StmtKind};
    let p = main_program(
        vec![decl("n")],
        vec![
            estmt(assign(id("n"), num(7.0))),
            Stmt {
                kind: StmtKind::Sched { body: None },
                line: 1,
            },
            Stmt {
                kind: StmtKind::Sched {
                    body: Some(vec![estmt(assign(
                        id("n"),
                        bin(BinaryOp::Add, id("n"), num(1.0)),
                    ))]),
                },
                line: 1,
            },
            estmt(id("n")),
        ],
    );
    assert_eq!(eval_num(&p), 8.0);
}

#[test]
fn garbage_collection_preserves_reachable_values() {
    let rt = Runtime::new();
    let p = main_program(
        vec![decl("keep")],
        vec![
            estmt(assign(id("keep"), array(vec![num(1.0), num(2.0)]))),
            estmt(get(id("keep"), "length")),
        ],
    );
    let script = rt
        .compile("gc", &p, ox_vm::compiler::CompileFlags::REGISTER)
        .expect("compile failed");

    {
        let mut vm = rt.lock();
        let v = vm.run_script(&script).expect("run failed");
        assert_eq!(as_num(&v), 2.0);

        // Collect explicitly: the root-frame array must survive, dead
        // temporaries must not hold slots forever.
        vm.collect_garbage();
        let v = vm.run_script(&script).expect("rerun after gc failed");
        assert_eq!(as_num(&v), 2.0);
    }
}
