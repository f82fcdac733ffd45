//! Heap object payloads: property maps, classes, functions, enums,
//! iterators and foreign references.

use crate::error::RtError;
use crate::heap::{Gc, Heap};
use crate::interpreter::Interpreter;
use crate::script::BcScript;
use crate::value::{OxStr, Value};

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

/// A normalized property key.
///
/// Integral numeric keys keep their numeric identity (arrays and objects
/// agree on them); everything else is stringified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// String key.
    Str(OxStr),
    /// Integral numeric key.
    Int(i64),
}

impl PropKey {
    /// Normalize a script value into a key.
    pub fn from_value(v: &Value, heap: &Heap) -> Result<PropKey, RtError> {
        Ok(match v {
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => PropKey::Int(*n as i64),
            Value::Int64(i) => PropKey::Int(*i),
            Value::UInt64(u) => PropKey::Int(*u as i64),
            Value::Str(s) => PropKey::Str(s.clone()),
            other => PropKey::Str(other.to_ox_string(heap)?),
        })
    }

    /// The key as a display string.
    pub fn display(&self) -> String {
        match self {
            PropKey::Str(s) => s.to_string(),
            PropKey::Int(i) => i.to_string(),
        }
    }

    /// The key as a script value.
    pub fn to_value(&self) -> Value {
        match self {
            PropKey::Str(s) => Value::Str(s.clone()),
            PropKey::Int(i) => Value::Number(*i as f64),
        }
    }
}

/// One property of an object or class.
#[derive(Debug, Clone)]
pub enum Prop {
    /// An assignable data property.
    Var(Value),
    /// A constant data property.
    Const(Value),
    /// An accessor; `set` is absent for read-only accessors.
    Accessor {
        /// Getter function value.
        get: Value,
        /// Setter function value, if any.
        set: Option<Value>,
    },
}

/// An insertion-ordered property map.
#[derive(Debug, Default)]
pub struct Object {
    /// Class link of an instance.
    pub class: Option<Gc>,
    /// Display name recorded by `set_name`.
    pub name: Option<OxStr>,
    /// Enclosing scope recorded by `set_scope`.
    pub scope: Option<Value>,
    pub(crate) entries: Vec<(PropKey, Prop)>,
    pub(crate) index: HashMap<PropKey, usize>,
}

impl Object {
    /// An empty object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a property up by key.
    pub fn prop(&self, k: &PropKey) -> Option<&Prop> {
        self.index.get(k).map(|&i| &self.entries[i].1)
    }

    /// Mutable property lookup.
    pub fn prop_mut(&mut self, k: &PropKey) -> Option<&mut Prop> {
        match self.index.get(k) {
            Some(&i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    /// Insert or replace a property.
    pub fn define(&mut self, k: PropKey, p: Prop) {
        match self.index.get(&k) {
            Some(&i) => self.entries[i].1 = p,
            None => {
                self.index.insert(k.clone(), self.entries.len());
                self.entries.push((k, p));
            }
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &PropKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Number of own properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the object has no own properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        if let Some(c) = self.class {
            out.push(c);
        }
        if let Some(s) = &self.scope {
            s.trace(out);
        }
        for (_, p) in &self.entries {
            match p {
                Prop::Var(v) | Prop::Const(v) => v.trace(out),
                Prop::Accessor { get, set } => {
                    get.trace(out);
                    if let Some(s) = set {
                        s.trace(out);
                    }
                }
            }
        }
    }
}

/// A class: static members plus an instance template and parent chain.
#[derive(Debug)]
pub struct Class {
    /// Static members, display name and scope.
    pub object: Object,
    /// Instance template; instances resolve missing properties through it.
    pub template: Gc,
    /// Parent classes in declaration order.
    pub parents: Vec<Gc>,
}

impl Class {
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        self.object.trace(out);
        out.push(self.template);
        out.extend_from_slice(&self.parents);
    }
}

/// A script function value: descriptor reference plus the frame chain
/// captured at creation.
#[derive(Debug)]
pub struct Function {
    /// The owning script.
    pub script: Arc<BcScript>,
    /// Index into the script's function descriptors.
    pub sfunc: usize,
    /// Captured enclosing frames, innermost first.
    pub frames: Vec<Gc>,
    /// Display name recorded by `set_name`.
    pub name: Option<OxStr>,
    /// Enclosing scope recorded by `set_scope`.
    pub scope: Option<Value>,
}

impl Function {
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        out.extend_from_slice(&self.frames);
        self.script.trace(out);
        if let Some(s) = &self.scope {
            s.trace(out);
        }
    }
}

/// Signature of a host function.
pub type NativeFnPtr =
    Arc<dyn Fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, RtError> + Send + Sync>;

/// A host function value.
#[derive(Clone)]
pub struct NativeFn {
    /// Display name used in traces.
    pub name: Option<OxStr>,
    /// The callable.
    pub f: NativeFnPtr,
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").field("name", &self.name).finish()
    }
}

/// An enumeration or bitfield under or after construction.
#[derive(Debug, Default)]
pub struct EnumData {
    /// `true` for a bitfield (`1 << n` item values).
    pub bitfield: bool,
    /// Display name recorded by `set_name`.
    pub name: Option<OxStr>,
    /// Items in declaration order.
    pub items: Vec<(OxStr, i64)>,
}

impl EnumData {
    /// Value of a named item.
    pub fn item(&self, name: &str) -> Option<i64> {
        self.items
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| *v)
    }
}

/// A live iterator.
#[derive(Debug)]
pub enum Iter {
    /// Over an array's items.
    Array {
        /// The array.
        arr: Gc,
        /// Next index.
        idx: usize,
    },
    /// Over an object's `[key, value]` entries, keys snapshotted at open.
    Entries {
        /// The object.
        obj: Gc,
        /// Snapshot of the keys.
        keys: Vec<PropKey>,
        /// Next index.
        idx: usize,
    },
    /// Over an enum's `[name, value]` items.
    Enum {
        /// The enumeration.
        en: Gc,
        /// Next index.
        idx: usize,
    },
    /// A script-defined iterator driven through its `end`/`value`/`next`
    /// protocol.
    User {
        /// The protocol object.
        obj: Value,
    },
}

impl Iter {
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        match self {
            Iter::Array { arr, .. } => out.push(*arr),
            Iter::Entries { obj, .. } => out.push(*obj),
            Iter::Enum { en, .. } => out.push(*en),
            Iter::User { obj } => obj.trace(out),
        }
    }
}

/// A typed foreign reference.
#[derive(Debug)]
pub struct CPtr {
    /// Foreign type tag.
    pub ctype: OxStr,
    /// The referent.
    pub data: CPtrData,
}

/// What a foreign reference holds.
#[derive(Debug)]
pub enum CPtrData {
    /// An owned foreign datum.
    Value(Value),
    /// A pointer to another foreign reference.
    Ptr(Gc),
}

impl CPtr {
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        match &self.data {
            CPtrData::Value(v) => v.trace(out),
            CPtrData::Ptr(gc) => out.push(*gc),
        }
    }
}
