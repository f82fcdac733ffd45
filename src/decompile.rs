//! Bytecode pretty-printer.
//!
//! Writes per function: captured-frame depth, register count and the
//! declaration map, then one line per instruction in
//! `<byte-offset>|<source-line>: <mnemonic> <operands>` form. Pool
//! operands are annotated with the pooled value where it prints without
//! the heap.

use crate::script::BcScript;
use crate::value::{fmt_number, Value};

use itertools::Itertools;
use ox_asm::{Args, Instruction, PoolKind};

use std::io::{self, Write};

fn dump_value(v: &Value) -> String {
    match v {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => fmt_number(*n),
        Value::Int64(i) => i.to_string(),
        Value::UInt64(u) => u.to_string(),
        Value::Str(s) => format!("\"{s}\""),
        Value::Ref(gc) => format!("{gc}"),
    }
}

fn dump_pool(s: &BcScript, kind: PoolKind, id: u16) -> String {
    let id = id as usize;
    match kind {
        PoolKind::Const => format!("c{id}({})", s.cvs.get(id).map(dump_value).unwrap_or_default()),
        PoolKind::Private => {
            format!("p{id}({})", s.pps.get(id).map(dump_value).unwrap_or_default())
        }
        PoolKind::Text => format!("t{id}({})", s.ts.get(id).map(dump_value).unwrap_or_default()),
        PoolKind::Tmpl => format!("t{id}({})", s.tts.get(id).map(dump_value).unwrap_or_default()),
        PoolKind::Decl | PoolKind::Func | PoolKind::Arg => id.to_string(),
    }
}

/// Decompile a script into `out`.
pub fn decompile(script: &BcScript, out: &mut dyn Write) -> io::Result<()> {
    if !script.refs.is_empty() {
        writeln!(out, "reference:")?;
        for r in &script.refs {
            writeln!(out, "  \"{}\":", r.filename)?;
            for item in &r.items {
                match &item.name {
                    Some(n) => writeln!(out, "    {} as {}", item.orig, n)?,
                    None => writeln!(out, "    {}", item.orig)?,
                }
            }
        }
    }

    let bc = script.bc.lock().expect("bytecode lock");

    for (i, sf) in script.sfuncs.iter().enumerate() {
        writeln!(out, "function {i}:")?;
        writeln!(out, "  bottom frames: {}", sf.frame_num)?;
        writeln!(out, "  registers: {}", sf.reg_num)?;

        if !sf.decls.is_empty() {
            let decls = sf
                .decls
                .iter()
                .map(|d| format!("{}: {}", d.id, d.name))
                .join(", ");
            writeln!(out, "  declaration: {decls}")?;
        }

        let code = &bc[sf.bc_start..sf.bc_start + sf.bc_len];
        let mut off = 0usize;
        while off < code.len() {
            let (insn, len) = Instruction::decode(&code[off..])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let line = sf.lookup_line(&script.loc_tab, off);

            write!(out, "  {off:05}|{line:05}: {:<10} ", insn.op().name())?;
            write_args(out, script, &insn)?;
            writeln!(out)?;

            off += len;
        }
    }

    Ok(())
}

fn write_args(out: &mut dyn Write, s: &BcScript, insn: &Instruction) -> io::Result<()> {
    let pool = |id: u16| {
        let kind = insn.op().pool_kind().unwrap_or(PoolKind::Const);
        dump_pool(s, kind, id)
    };

    match insn.args() {
        Args::None => Ok(()),
        Args::Reg(a) => write!(out, "r{a}"),
        Args::RegReg(a, b) => write!(out, "r{a} r{b}"),
        Args::RegRegReg(a, b, c) => write!(out, "r{a} r{b} r{c}"),
        Args::RegRegRegReg(a, b, c, d) => write!(out, "r{a} r{b} r{c} r{d}"),
        Args::Pool(i) => write!(out, "{}", pool(i)),
        Args::PoolReg(i, a) => write!(out, "{} r{a}", pool(i)),
        Args::Label(l) => write!(out, "{l}"),
        Args::LabelLabel(l0, l1) => write!(out, "{l0} {l1}"),
        Args::RegLabel(a, l) => write!(out, "r{a} {l}"),
        Args::DepthReg(o, a) => write!(out, "{o} r{a}"),
        Args::DepthLabel(o, l) => write!(out, "{o} {l}"),
        Args::DepthPoolReg(o, i, a) => write!(out, "{o} {} r{a}", pool(i)),
    }
}
