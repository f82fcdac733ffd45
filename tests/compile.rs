//! Compiler invariants over arbitrary programs: decodability, recorded
//! lengths, register bounds, jump targets, plus the self-modifying
//! `get_n` rewrite and private-name namespacing.

mod common;

use common::*;
use ox_asm::{Args, Instruction, Opcode};
use ox_vm::ast::*;
use ox_vm::compiler::{compile, CompileFlags};
use ox_vm::interpreter::Interpreter;
use ox_vm::script::BcScript;
use ox_vm::value::{OxStr, Value};

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;
use std::sync::Arc;

/// Check the universal bytecode invariants of a compiled script.
fn check_script(script: &Arc<BcScript>) {
    let bc = script.bc.lock().unwrap();

    for sf in &script.sfuncs {
        assert!(sf.reg_num <= 256, "register high-water mark exceeded");

        let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
        let mut starts = HashSet::new();
        let mut targets = Vec::new();
        let mut off = 0usize;

        while off < code.len() {
            starts.insert(off);
            let (insn, len) = Instruction::decode(&code[off..]).expect("undecodable instruction");

            // Every register operand fits in the recorded window.
            for r in insn.args().registers() {
                assert!(
                    (r as u16) < sf.reg_num,
                    "register r{r} out of window {} in {}",
                    sf.reg_num,
                    insn.op()
                );
            }

            match insn.args() {
                Args::Label(l) | Args::RegLabel(_, l) | Args::DepthLabel(_, l) => {
                    targets.push(l as usize)
                }
                Args::LabelLabel(l0, l1) => {
                    targets.push(l0 as usize);
                    targets.push(l1 as usize);
                }
                _ => {}
            }

            off += len;
        }

        // The encoded stream covers exactly the recorded length.
        assert_eq!(off, sf.bc_len, "instruction widths do not sum to bc_len");

        // Every jump target is an instruction start (or the function
        // end, which terminates execution).
        for t in targets {
            assert!(
                starts.contains(&t) || t == sf.bc_len,
                "jump target {t} is not an instruction start"
            );
        }
    }
}

/// A deterministic program recipe; the bytes drive a tiny grammar so
/// shrinking stays meaningful.
#[derive(Clone, Debug)]
struct Recipe(Vec<u8>);

impl Arbitrary for Recipe {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = usize::arbitrary(g) % 64;
        Recipe((0..len).map(|_| u8::arbitrary(g)).collect())
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.0.shrink().map(Recipe))
    }
}

struct Builder<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Builder<'b> {
    fn next(&mut self) -> u8 {
        let b = self.bytes.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    fn expr(&mut self, depth: usize) -> Expr {
        let names = ["a", "b", "c"];
        if depth == 0 {
            return match self.next() % 3 {
                0 => num((self.next() % 16) as f64),
                1 => str_("s"),
                _ => id(names[self.next() as usize % names.len()]),
            };
        }
        match self.next() % 8 {
            0 => num((self.next() % 16) as f64),
            1 => id(names[self.next() as usize % names.len()]),
            2 => {
                let ops = [
                    BinaryOp::Add,
                    BinaryOp::Sub,
                    BinaryOp::Mul,
                    BinaryOp::Lt,
                    BinaryOp::Le,
                    BinaryOp::Eq,
                    BinaryOp::LogicAnd,
                    BinaryOp::LogicOr,
                ];
                let op = ops[self.next() as usize % ops.len()];
                bin(op, self.expr(depth - 1), self.expr(depth - 1))
            }
            3 => unary(UnaryOp::Not, self.expr(depth - 1)),
            4 => assign(
                id(names[self.next() as usize % names.len()]),
                self.expr(depth - 1),
            ),
            5 => array(vec![self.expr(depth - 1), self.expr(depth - 1)]),
            6 => object(vec![("k", self.expr(depth - 1))]),
            _ => get(object(vec![("k", self.expr(depth - 1))]), "k"),
        }
    }

    fn stmt(&mut self, depth: usize, in_loop: bool) -> Stmt {
        match self.next() % 8 {
            0 | 1 => estmt(self.expr(2)),
            2 => if_(
                self.expr(1),
                self.block(depth, in_loop),
                Some(self.block(depth, in_loop)),
            ),
            3 => while_(bool_(false), self.block(depth, true)),
            4 if in_loop => brk(),
            4 => estmt(self.expr(1)),
            5 if in_loop => cont(),
            5 => estmt(self.expr(1)),
            6 => try_(
                self.block(depth, in_loop),
                Some(("c", self.block(depth, in_loop))),
                Some(self.block(depth, in_loop)),
            ),
            _ => ret(self.expr(1)),
        }
    }

    fn block(&mut self, depth: usize, in_loop: bool) -> Vec<Stmt> {
        if depth == 0 {
            return vec![estmt(self.expr(1))];
        }
        let n = 1 + (self.next() % 3) as usize;
        (0..n).map(|_| self.stmt(depth - 1, in_loop)).collect()
    }
}

fn build_program(bytes: &[u8]) -> Program {
    let mut b = Builder { bytes, pos: 0 };
    let body = b.block(3, false);
    main_program(vec![decl("a"), decl("b"), decl("c")], body)
}

#[quickcheck]
fn arbitrary_programs_compile_to_consistent_bytecode(r: Recipe) {
    let program = build_program(&r.0);
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "arb", &program, CompileFlags::empty())
        .expect("generated program failed to compile");
    check_script(&script);
}

#[quickcheck]
fn decompile_accepts_every_compiled_program(r: Recipe) {
    let program = build_program(&r.0);
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "arb", &program, CompileFlags::empty()).expect("compile failed");

    let mut out = Vec::new();
    ox_vm::decompile::decompile(&script, &mut out).expect("decompile failed");
    let text = String::from_utf8(out).expect("decompiler output is UTF-8");
    assert!(text.contains("function 0:"));
    assert!(text.contains("registers:"));
}

#[test]
fn peephole_removes_jumps_to_the_next_instruction() {
    // `if (a) {} else {}` leaves no jmp that lands on its own successor.
    let p = main_program(
        vec![decl("a")],
        vec![if_(id("a"), vec![estmt(num(1.0))], None)],
    );
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "peephole", &p, CompileFlags::empty()).unwrap();

    let bc = script.bc.lock().unwrap();
    let sf = &script.sfuncs[0];
    let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
    let mut off = 0;
    while off < code.len() {
        let (insn, len) = Instruction::decode(&code[off..]).unwrap();
        if let (Opcode::Jmp, Args::Label(l)) = (insn.op(), insn.args()) {
            assert_ne!(l as usize, off + len, "uneliminated fall-through jump");
        }
        assert_ne!(insn.op(), Opcode::Nop, "nops must not be emitted");
        off += len;
    }
}

#[test]
fn registers_are_reused_after_their_last_use() {
    // A long straight-line chain of independent additions needs only a
    // handful of physical registers.
    let mut body = Vec::new();
    for _ in 0..100 {
        body.push(estmt(bin(BinaryOp::Add, num(1.0), num(2.0))));
    }
    let p = main_program(vec![], body);
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "reuse", &p, CompileFlags::empty()).unwrap();
    assert!(
        script.sfuncs[0].reg_num < 8,
        "lifetime allocation failed to reuse registers: {}",
        script.sfuncs[0].reg_num
    );
}

#[test]
fn register_exhaustion_is_a_range_error() {
    // `1 + (1 + (1 + ...))`: every level's left operand stays live while
    // the deeper right side evaluates, so 300 levels need 300 slots.
    let mut e = num(1.0);
    for _ in 0..300 {
        e = bin(BinaryOp::Add, num(1.0), e);
    }
    let p = main_program(vec![], vec![estmt(e)]);
    let mut vm = Interpreter::new();
    match compile(&mut vm, "overflow", &p, CompileFlags::empty()) {
        Err(e) => assert_eq!(e.kind, ox_vm::error::ErrorKind::Range),
        Ok(_) => panic!("expected register exhaustion"),
    }
}

#[test]
fn location_table_tracks_line_changes() {
    let mut body = vec![];
    for line in 1..=5u32 {
        let mut e = num(line as f64);
        e.line = line;
        body.push(Stmt {
            kind: StmtKind::Expr(e),
            line,
        });
    }
    let p = main_program(vec![], body);
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "lines", &p, CompileFlags::empty()).unwrap();

    let sf = &script.sfuncs[0];
    assert!(sf.loc_len >= 5, "one entry per line change");
    let first = script.loc_tab[sf.loc_start];
    assert_eq!(first.ip, 0);
    // Offsets are sorted.
    let tab = &script.loc_tab[sf.loc_start..sf.loc_start + sf.loc_len];
    assert!(tab.windows(2).all(|w| w[0].ip < w[1].ip));
}

#[test]
fn private_names_do_not_collide_across_scripts() {
    let make = || {
        Program {
            funcs: vec![func_def(
                None,
                vec![],
                vec![],
                vec![estmt(Expr::new(
                    ExprKind::Private(OxStr::from("p")),
                    1,
                ))],
            )],
            refs: vec![],
            text_domain: None,
        }
    };

    let mut vm = Interpreter::new();
    let a = compile(&mut vm, "a", &make(), CompileFlags::EXPR).unwrap();
    let b = compile(&mut vm, "b", &make(), CompileFlags::EXPR).unwrap();

    let pa = vm.run_script(&a).unwrap();
    let pb = vm.run_script(&b).unwrap();

    match (&pa, &pb) {
        (Value::Str(sa), Value::Str(sb)) => {
            assert!(sa.as_str().starts_with("#p@s"));
            assert_ne!(sa, sb, "private names from different scripts collided");
        }
        other => panic!("expected decorated private names, got {other:?}"),
    }

    // A property keyed by script A's #p is invisible under script B's.
    let mut o = ox_vm::object::Object::new();
    o.define(
        ox_vm::object::PropKey::Str(match pa {
            Value::Str(s) => s,
            _ => unreachable!(),
        }),
        ox_vm::object::Prop::Var(Value::Number(1.0)),
    );
    let obj = Value::Ref(vm.heap.alloc(ox_vm::heap::HeapObj::Object(o)));
    let read = vm.get_prop(&obj, &pb).unwrap();
    assert!(matches!(read, Value::Null));
}

#[test]
fn get_n_rewrites_itself_to_get_g() {
    let p = main_program(vec![], vec![estmt(id("G"))]);
    let mut vm = Interpreter::new();
    vm.global_define("G", Value::Number(11.0));
    let script = compile(&mut vm, "rw", &p, CompileFlags::EXPR).unwrap();

    let has_op = |script: &Arc<BcScript>, op: Opcode| {
        let bc = script.bc.lock().unwrap();
        let sf = &script.sfuncs[0];
        let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
        let mut off = 0;
        let mut found = false;
        while off < code.len() {
            let (insn, len) = Instruction::decode(&code[off..]).unwrap();
            found |= insn.op() == op;
            off += len;
        }
        found
    };

    assert!(has_op(&script, Opcode::GetN), "fresh script reads by name");

    let out = vm.run_script(&script).unwrap();
    assert_eq!(as_num(&out), 11.0);

    assert!(!has_op(&script, Opcode::GetN), "rewrite did not happen");
    assert!(has_op(&script, Opcode::GetG), "expected the get_g fast path");

    // The rewritten form still runs.
    let out = vm.run_script(&script).unwrap();
    assert_eq!(as_num(&out), 11.0);
}

#[test]
fn tail_calls_are_recognized_in_the_bytecode() {
    let looper = func_def(
        Some(0),
        vec![param("n")],
        vec![decl("n")],
        vec![ret(call(id("looper"), vec![bin(BinaryOp::Sub, id("n"), num(1.0))]))],
    );
    let p = Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("looper")],
                vec![estmt(assign(id("looper"), func_ref(1)))],
            ),
            looper,
        ],
        refs: vec![],
        text_domain: None,
    };
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "tail", &p, CompileFlags::empty()).unwrap();

    let bc = script.bc.lock().unwrap();
    let sf = &script.sfuncs[1];
    let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
    let mut off = 0;
    let mut tail = false;
    while off < code.len() {
        let (insn, len) = Instruction::decode(&code[off..]).unwrap();
        tail |= insn.op() == Opcode::CallEndTail;
        assert_ne!(insn.op(), Opcode::CallEnd, "tail call left unrewritten");
        off += len;
    }
    assert!(tail, "expected a call_end_tail");
}

#[test]
fn calls_inside_try_blocks_are_never_tail_calls() {
    // try { return f() } finally {} — the finally must still run, so the
    // call cannot reuse the frame.
    let f = func_def(Some(0), vec![], vec![], vec![ret(num(1.0))]);
    let caller = func_def(
        Some(0),
        vec![],
        vec![],
        vec![try_(
            vec![ret(call(id("f"), vec![]))],
            None,
            Some(vec![estmt(num(0.0))]),
        )],
    );
    let p = Program {
        funcs: vec![
            func_def(
                None,
                vec![],
                vec![decl("f"), decl("g")],
                vec![
                    estmt(assign(id("f"), func_ref(1))),
                    estmt(assign(id("g"), func_ref(2))),
                ],
            ),
            f,
            caller,
        ],
        refs: vec![],
        text_domain: None,
    };
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "no-tail", &p, CompileFlags::empty()).unwrap();

    let bc = script.bc.lock().unwrap();
    let sf = &script.sfuncs[2];
    let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
    let mut off = 0;
    while off < code.len() {
        let (insn, len) = Instruction::decode(&code[off..]).unwrap();
        assert_ne!(
            insn.op(),
            Opcode::CallEndTail,
            "tail call through an open try record"
        );
        off += len;
    }
}

#[test]
fn scripts_register_on_request() {
    let p = main_program(vec![], vec![estmt(num(1.0))]);
    let mut vm = Interpreter::new();
    assert!(vm.registry.is_empty());
    let _ = compile(&mut vm, "reg", &p, CompileFlags::REGISTER).unwrap();
    assert_eq!(vm.registry.len(), 1);
}

#[test]
fn exported_declarations_map_to_root_slots() {
    let p = Program {
        funcs: vec![func_def(
            None,
            vec![],
            vec![Decl {
                name: OxStr::from("api"),
                kind: DeclKind::Var,
                public: true,
            }],
            vec![estmt(assign(id("api"), num(5.0)))],
        )],
        refs: vec![],
        text_domain: None,
    };
    let mut vm = Interpreter::new();
    let script = compile(&mut vm, "pub", &p, CompileFlags::empty()).unwrap();
    vm.run_script(&script).unwrap();

    let slot = script.public("api").expect("missing export");
    let v = match vm.heap.get(script.frame) {
        ox_vm::heap::HeapObj::Frame(f) => f.v[slot as usize].clone(),
        _ => unreachable!(),
    };
    assert_eq!(as_num(&v), 5.0);
}
