//! Call frames.

use crate::heap::Gc;
use crate::value::Value;

/// One active call: the function being executed, its receiver, the
/// instruction pointer and the named declaration slots.
///
/// Frames live in the collected heap because closures capture them; the
/// call list is threaded through `parent` links, bottom-of-fiber-pinned.
#[derive(Debug, Default)]
pub struct Frame {
    /// The function value being executed.
    pub func: Value,
    /// The `this` binding.
    pub this: Value,
    /// Instruction pointer, relative to the function's bytecode start.
    pub ip: usize,
    /// Named declaration slots, indexed by declaration id.
    pub v: Vec<Value>,
    /// Caller frame.
    pub parent: Option<Gc>,
}

impl Frame {
    /// A fresh frame with `decl_count` null slots.
    pub fn new(func: Value, decl_count: usize, parent: Option<Gc>) -> Self {
        Self {
            func,
            this: Value::Null,
            ip: 0,
            v: vec![Value::Null; decl_count],
            parent,
        }
    }

    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        self.func.trace(out);
        self.this.trace(out);
        for v in &self.v {
            v.trace(out);
        }
        if let Some(p) = self.parent {
            out.push(p);
        }
    }
}
