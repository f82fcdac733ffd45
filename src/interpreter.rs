//! The register-based virtual machine.
//!
//! The interpreter owns the collected heap, the flat value stack, the
//! structured-block stack, the global object, the intern table and the
//! script registry. Execution state for the active function lives in a
//! `RunStatus`; call frames are heap objects threaded through `parent`
//! links so closures can capture them.

use crate::error::{ErrorKind, Raised, TraceFrame, VmError};
use crate::heap::{Gc, Heap, HeapObj};
use crate::object::{Function, NativeFn, Object};
use crate::script::BcScript;
use crate::value::{Interner, OxStr, Value};

use std::sync::Arc;

pub mod fiber;
pub mod frame;
pub(crate) mod stack;

mod dispatch;
mod flow;
mod internal;
mod ops;

use frame::Frame;
use stack::{BlockKind, BlockRec};

/// Hook resolving localized text: `(domain, text) -> localized text`.
///
/// The gettext backend is a collaborator; the default resolver is the
/// identity.
pub type TextResolver = Box<dyn Fn(&str, &str) -> Option<String> + Send>;

/// Stacks of the outer world parked while a fiber runs.
#[derive(Debug, Default)]
pub(crate) struct StackStash {
    pub v_stack: Vec<Value>,
    pub s_stack: Vec<BlockRec>,
    pub frame: Option<Gc>,
}

/// VM interpreter.
///
/// One interpreter is one "VM world": scripts compiled here share its
/// globals, heap and intern table. Concurrency follows the
/// parallel-threads-with-single-lock model; see [`crate::runtime::Runtime`].
pub struct Interpreter {
    /// The collected arena.
    pub heap: Heap,
    /// The string singleton table.
    pub interner: Interner,
    /// The script registry.
    pub registry: Vec<Arc<BcScript>>,

    pub(crate) v_stack: Vec<Value>,
    pub(crate) s_stack: Vec<BlockRec>,
    pub(crate) cur_frame: Option<Gc>,
    pub(crate) globals: Gc,
    pub(crate) global_refs: Vec<Value>,
    pub(crate) stashed: Vec<StackStash>,
    pub(crate) text_resolver: Option<TextResolver>,
    pub(crate) error_trace: Vec<TraceFrame>,

    script_serial: u64,
    pub(crate) native_depth: usize,
}

/// The function a `CURR` compilation embeds into.
pub(crate) struct CurrentFn {
    pub script: Arc<BcScript>,
    pub sfunc: usize,
    pub frames: Vec<Gc>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// A fresh VM world with an empty Global object.
    pub fn new() -> Self {
        let mut heap = Heap::default();
        let globals = heap.alloc(HeapObj::Object(Object::new()));
        Self {
            heap,
            interner: Interner::default(),
            registry: Vec::new(),
            v_stack: Vec::new(),
            s_stack: Vec::new(),
            cur_frame: None,
            globals,
            global_refs: Vec::new(),
            stashed: Vec::new(),
            text_resolver: None,
            error_trace: Vec::new(),
            script_serial: 0,
            native_depth: 0,
        }
    }

    /// Install the localization resolver.
    pub fn set_text_resolver(&mut self, r: TextResolver) {
        self.text_resolver = Some(r);
    }

    /// Pin a value against collection while the host holds it outside the
    /// VM's reach.
    pub fn global_ref(&mut self, v: &Value) {
        if matches!(v, Value::Ref(_)) {
            self.global_refs.push(v.clone());
        }
    }

    /// Release one pin taken by [`Interpreter::global_ref`].
    pub fn global_unref(&mut self, v: &Value) {
        if let Some(i) = self.global_refs.iter().position(|r| r.equal(v)) {
            self.global_refs.swap_remove(i);
        }
    }

    /// The Global object.
    pub const fn globals(&self) -> Gc {
        self.globals
    }

    pub(crate) fn next_script_serial(&mut self) -> u64 {
        self.script_serial += 1;
        self.script_serial
    }

    /// Wrap a host function into a callable value.
    pub fn native(
        &mut self,
        name: &str,
        f: impl Fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, crate::error::RtError>
            + Send
            + Sync
            + 'static,
    ) -> Value {
        let gc = self.heap.alloc(HeapObj::Native(NativeFn {
            name: Some(OxStr::from(name)),
            f: Arc::new(f),
        }));
        Value::Ref(gc)
    }

    // ---- frame access ----

    pub(crate) fn frame(&self, gc: Gc) -> &Frame {
        match self.heap.get(gc) {
            HeapObj::Frame(f) => f,
            _ => unreachable!("handle does not refer to a frame"),
        }
    }

    pub(crate) fn frame_mut(&mut self, gc: Gc) -> &mut Frame {
        match self.heap.get_mut(gc) {
            HeapObj::Frame(f) => f,
            _ => unreachable!("handle does not refer to a frame"),
        }
    }

    /// The function executing in `frame`, as `(script, sfunc)`.
    pub(crate) fn function_of_frame(&self, frame: Gc) -> Option<(Arc<BcScript>, usize)> {
        match &self.frame(frame).func {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Function(f) => Some((f.script.clone(), f.sfunc)),
                _ => None,
            },
            _ => None,
        }
    }

    /// The currently running function with its captured frame chain, for
    /// `CURR` compilation.
    pub(crate) fn current_function(&self) -> Option<CurrentFn> {
        let frame = self.cur_frame?;
        match &self.frame(frame).func {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Function(f) => {
                    let mut frames = vec![frame];
                    frames.extend_from_slice(&f.frames);
                    Some(CurrentFn {
                        script: f.script.clone(),
                        sfunc: f.sfunc,
                        frames,
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn function(&self, v: &Value) -> Option<&Function> {
        match v {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Function(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    // ---- structured-block stack ----

    /// Push a record, capturing the current value-stack length as its
    /// base.
    pub(crate) fn push_rec(&mut self, kind: BlockKind) -> usize {
        let vbase = self.v_stack.len();
        self.s_stack.push(BlockRec { vbase, kind });
        vbase
    }

    /// Pop the top record, releasing its value-stack region. Iterator
    /// records close their iterator on the way out.
    pub(crate) fn pop_rec(&mut self) -> Result<(), Raised> {
        let rec = self.s_stack.pop().expect("block stack underflow");
        let r = match &rec.kind {
            BlockKind::Iter { iter } => {
                let v = self.v_stack[*iter].clone();
                self.close_value(&v)
            }
            _ => Ok(()),
        };
        self.v_stack.truncate(rec.vbase);
        r
    }

    // ---- garbage collection ----

    /// Run a collection cycle over the full root set: globals, pinned
    /// references, registered scripts, both stacks, the frame list and
    /// any stacks parked behind running fibers.
    pub fn collect_garbage(&mut self) -> (usize, usize) {
        let mut roots = vec![self.globals];
        for v in &self.global_refs {
            v.trace(&mut roots);
        }
        for s in &self.registry {
            s.trace(&mut roots);
        }
        for v in &self.v_stack {
            v.trace(&mut roots);
        }
        for r in &self.s_stack {
            r.trace(&mut roots);
        }
        if let Some(f) = self.cur_frame {
            roots.push(f);
        }
        for stash in &self.stashed {
            for v in &stash.v_stack {
                v.trace(&mut roots);
            }
            for r in &stash.s_stack {
                r.trace(&mut roots);
            }
            if let Some(f) = stash.frame {
                roots.push(f);
            }
        }
        self.heap.collect(roots)
    }

    // ---- error surfacing ----

    /// Capture the frame chain for a stack trace, innermost first.
    pub(crate) fn capture_trace(&mut self, ip: usize) {
        if !self.error_trace.is_empty() {
            return;
        }
        let mut frame = self.cur_frame;
        let mut at_ip = Some(ip);
        while let Some(gc) = frame {
            let f = self.frame(gc);
            let name = self
                .function(&f.func)
                .and_then(|func| func.name.as_ref().map(|n| n.to_string()));
            let line = match (self.function_of_frame(gc), at_ip.take().or(Some(f.ip))) {
                (Some((script, sfunc)), Some(ip)) => {
                    script.sfuncs[sfunc].lookup_line(&script.loc_tab, ip)
                }
                _ => 0,
            };
            self.error_trace.push(TraceFrame { name, line });
            frame = self.frame(gc).parent;
        }
    }

    /// Convert an in-flight raise into the host-facing error, formatting
    /// `<kind>: <message>` with the captured trace.
    pub(crate) fn uncaught(&mut self, raised: Raised) -> VmError {
        let trace = std::mem::take(&mut self.error_trace);
        let (kind, message) = match raised {
            Raised::Error(e) => (e.kind, e.message),
            Raised::Value(v) => self.describe_thrown(&v),
        };
        tracing::debug!(%kind, message, "uncaught script error");
        VmError::Uncaught {
            kind,
            message,
            trace,
        }
    }

    fn describe_thrown(&self, v: &Value) -> (ErrorKind, String) {
        use crate::object::{Prop, PropKey};

        if let Value::Ref(gc) = v {
            if let HeapObj::Object(o) = self.heap.get(*gc) {
                let read = |key: &str| match o.prop(&PropKey::Str(OxStr::from(key))) {
                    Some(Prop::Var(v) | Prop::Const(v)) => {
                        v.to_ox_string(&self.heap).ok().map(|s| s.to_string())
                    }
                    _ => None,
                };
                let kind = read("name").and_then(|n| kind_by_name(&n));
                let message = read("message");
                if let (Some(kind), Some(message)) = (kind, message) {
                    return (kind, message);
                }
            }
        }

        let message = v
            .to_ox_string(&self.heap)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "uncaught value".into());
        (ErrorKind::Type, message)
    }
}

fn kind_by_name(name: &str) -> Option<ErrorKind> {
    Some(match name {
        "SyntaxError" => ErrorKind::Syntax,
        "TypeError" => ErrorKind::Type,
        "ReferenceError" => ErrorKind::Reference,
        "RangeError" => ErrorKind::Range,
        "AccessError" => ErrorKind::Access,
        "NullError" => ErrorKind::Null,
        "SystemError" => ErrorKind::System,
        "NoMemError" => ErrorKind::NoMem,
        _ => return None,
    })
}
