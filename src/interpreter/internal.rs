//! Value protocol shared by the opcode handlers: property access, the
//! iterator protocol, calls into arbitrary callables, auto-close and
//! error materialization.
//!
//! Accessor getters/setters, `$iter`, `$init` and `$close` re-enter the
//! interpreter through [`Interpreter::call_value`]; bytecode-to-bytecode
//! calls never recurse natively, only these protocol points do.

use crate::error::{Raised, RtError};
use crate::heap::{Gc, HeapObj};
use crate::interpreter::Interpreter;
use crate::object::{CPtr, CPtrData, Class, Iter, Object, Prop, PropKey};
use crate::script::{BcScript, DeclFlags};
use crate::value::{OxStr, Value};

use std::sync::Arc;

/// Native re-entrancy bound; exceeding it means runaway recursion through
/// accessors or `$iter`/`$close` hooks.
const MAX_NATIVE_DEPTH: usize = 192;

impl Interpreter {
    // ---- error materialization ----

    /// Build the script-visible error object for a runtime error.
    pub(crate) fn error_value(&mut self, e: &RtError) -> Value {
        let mut o = Object::new();
        o.define(
            PropKey::Str(OxStr::from("name")),
            Prop::Const(Value::Str(self.interner.intern(e.kind.name()))),
        );
        o.define(
            PropKey::Str(OxStr::from("message")),
            Prop::Const(Value::Str(OxStr::from(e.message.as_str()))),
        );
        Value::Ref(self.heap.alloc(HeapObj::Object(o)))
    }

    /// The thrown value of an in-flight raise.
    pub(crate) fn materialize(&mut self, r: Raised) -> Value {
        match r {
            Raised::Value(v) => v,
            Raised::Error(e) => self.error_value(&e),
        }
    }

    // ---- property protocol ----

    /// `ox_get`: read a property, invoking accessors.
    pub fn get_prop(&mut self, base: &Value, key: &Value) -> Result<Value, Raised> {
        let k = PropKey::from_value(key, &self.heap).map_err(Raised::Error)?;
        self.get_prop_k(base, &k)
    }

    pub(crate) fn get_prop_k(&mut self, base: &Value, k: &PropKey) -> Result<Value, Raised> {
        match base {
            Value::Null => Err(Raised::Error(RtError::null_error("the value is null"))),
            Value::Str(s) => Ok(match k {
                PropKey::Str(n) if n.as_str() == "length" => {
                    Value::Number(s.chars().count() as f64)
                }
                PropKey::Int(i) => s
                    .chars()
                    .nth(*i as usize)
                    .map(|c| Value::Str(OxStr::from(c.to_string())))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }),
            Value::Ref(gc) => self.heap_get_prop(*gc, k, base),
            _ => Ok(Value::Null),
        }
    }

    fn heap_get_prop(&mut self, gc: Gc, k: &PropKey, this: &Value) -> Result<Value, Raised> {
        match self.heap.get(gc) {
            HeapObj::Array(items) => Ok(match k {
                PropKey::Str(n) if n.as_str() == "length" => Value::Number(items.len() as f64),
                PropKey::Int(i) if *i >= 0 => {
                    items.get(*i as usize).cloned().unwrap_or(Value::Null)
                }
                _ => Value::Null,
            }),
            HeapObj::Object(o) => {
                if let Some(p) = o.prop(k) {
                    let p = p.clone();
                    return self.prop_value(p, this);
                }
                match o.class {
                    Some(cls) => match self.template_prop(cls, k) {
                        Some(p) => self.prop_value(p, this),
                        None => Ok(Value::Null),
                    },
                    None => Ok(Value::Null),
                }
            }
            HeapObj::Class(_) => match self.static_prop(gc, k) {
                Some(p) => self.prop_value(p, this),
                None => Ok(Value::Null),
            },
            HeapObj::Enum(e) => Ok(match k {
                PropKey::Str(n) => e.item(n).map(|v| Value::Number(v as f64)).unwrap_or(Value::Null),
                _ => Value::Null,
            }),
            _ => Ok(Value::Null),
        }
    }

    fn prop_value(&mut self, p: Prop, this: &Value) -> Result<Value, Raised> {
        match p {
            Prop::Var(v) | Prop::Const(v) => Ok(v),
            Prop::Accessor { get, .. } => self.call_value(get, this.clone(), vec![]),
        }
    }

    /// Own or inherited-template property of an instance's class chain.
    fn template_prop(&self, cls: Gc, k: &PropKey) -> Option<Prop> {
        let c = self.class(cls)?;
        if let HeapObj::Object(t) = self.heap.get(c.template) {
            if let Some(p) = t.prop(k) {
                return Some(p.clone());
            }
        }
        let parents = c.parents.clone();
        parents.iter().find_map(|p| self.template_prop(*p, k))
    }

    /// Static property of a class chain.
    fn static_prop(&self, cls: Gc, k: &PropKey) -> Option<Prop> {
        let c = self.class(cls)?;
        if let Some(p) = c.object.prop(k) {
            return Some(p.clone());
        }
        let parents = c.parents.clone();
        parents.iter().find_map(|p| self.static_prop(*p, k))
    }

    fn class(&self, gc: Gc) -> Option<&Class> {
        match self.heap.get(gc) {
            HeapObj::Class(c) => Some(c),
            _ => None,
        }
    }

    /// `ox_lookup`: like a property read, but a miss continues through
    /// the value's recorded scope chain.
    pub fn lookup_prop(&mut self, base: &Value, key: &Value) -> Result<Value, Raised> {
        let v = self.get_prop(base, key)?;
        if !v.is_null() {
            return Ok(v);
        }
        let scope = match base {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Object(o) => o.scope.clone(),
                HeapObj::Class(c) => c.object.scope.clone(),
                _ => None,
            },
            _ => None,
        };
        match scope {
            Some(s) => self.lookup_prop(&s, key),
            None => Ok(Value::Null),
        }
    }

    /// `ox_set`: write a property, invoking setters and refusing consts.
    pub fn set_prop(&mut self, base: &Value, key: &Value, v: &Value) -> Result<(), Raised> {
        let k = PropKey::from_value(key, &self.heap).map_err(Raised::Error)?;
        match base {
            Value::Null => Err(Raised::Error(RtError::null_error("the value is null"))),
            Value::Ref(gc) => self.heap_set_prop(*gc, k, v, base),
            _ => Err(Raised::Error(RtError::type_error(
                "cannot set a property of this value",
            ))),
        }
    }

    fn heap_set_prop(&mut self, gc: Gc, k: PropKey, v: &Value, this: &Value) -> Result<(), Raised> {
        enum Plan {
            Store,
            CallSetter(Value),
            Refuse,
        }

        let plan = match self.heap.get(gc) {
            HeapObj::Array(_) => {
                match &k {
                    PropKey::Str(n) if n.as_str() == "length" => {
                        let len = v.to_index().map_err(Raised::Error)?;
                        if let HeapObj::Array(items) = self.heap.get_mut(gc) {
                            items.resize(len, Value::Null);
                        }
                        return Ok(());
                    }
                    PropKey::Int(i) if *i >= 0 => {
                        let i = *i as usize;
                        if let HeapObj::Array(items) = self.heap.get_mut(gc) {
                            if items.len() <= i {
                                items.resize(i + 1, Value::Null);
                            }
                            items[i] = v.clone();
                        }
                        return Ok(());
                    }
                    _ => {
                        return Err(Raised::Error(RtError::type_error(
                            "invalid array property",
                        )))
                    }
                }
            }
            HeapObj::Object(o) => match o.prop(&k) {
                Some(Prop::Const(_)) => Plan::Refuse,
                Some(Prop::Accessor { set: Some(s), .. }) => Plan::CallSetter(s.clone()),
                Some(Prop::Accessor { set: None, .. }) => Plan::Refuse,
                Some(Prop::Var(_)) => Plan::Store,
                None => match o.class.and_then(|cls| self.template_prop(cls, &k)) {
                    Some(Prop::Accessor { set: Some(s), .. }) => Plan::CallSetter(s),
                    Some(Prop::Accessor { set: None, .. }) | Some(Prop::Const(_)) => Plan::Refuse,
                    _ => Plan::Store,
                },
            },
            HeapObj::Class(c) => match c.object.prop(&k) {
                Some(Prop::Const(_)) => Plan::Refuse,
                Some(Prop::Accessor { set: Some(s), .. }) => Plan::CallSetter(s.clone()),
                Some(Prop::Accessor { set: None, .. }) => Plan::Refuse,
                _ => Plan::Store,
            },
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "cannot set a property of this value",
                )))
            }
        };

        match plan {
            Plan::Refuse => Err(Raised::Error(RtError::access_error(format!(
                "property \"{}\" cannot be reset",
                k.display()
            )))),
            Plan::CallSetter(s) => {
                self.call_value(s, this.clone(), vec![v.clone()])?;
                Ok(())
            }
            Plan::Store => {
                match self.heap.get_mut(gc) {
                    HeapObj::Object(o) => o.define(k, Prop::Var(v.clone())),
                    HeapObj::Class(c) => c.object.define(k, Prop::Var(v.clone())),
                    _ => unreachable!(),
                }
                Ok(())
            }
        }
    }

    // ---- Global object ----

    /// Read a Global property, raising `ReferenceError` when the name was
    /// never defined.
    pub(crate) fn global_get_throw(&mut self, name: &Value) -> Result<Value, Raised> {
        let k = PropKey::from_value(name, &self.heap).map_err(Raised::Error)?;
        let exists = match self.heap.get(self.globals) {
            HeapObj::Object(o) => o.prop(&k).is_some(),
            _ => false,
        };
        if !exists {
            return Err(Raised::Error(RtError::reference_error(format!(
                "\"{}\" is not defined",
                k.display()
            ))));
        }
        let base = Value::Ref(self.globals);
        self.get_prop_k(&base, &k)
    }

    /// Define a Global property from the host.
    pub fn global_define(&mut self, name: &str, v: Value) {
        let k = PropKey::Str(self.interner.intern(name));
        if let HeapObj::Object(o) = self.heap.get_mut(self.globals) {
            o.define(k, Prop::Var(v));
        }
    }

    /// Read a Global property from the host; null when missing.
    pub fn global_get(&mut self, name: &str) -> Value {
        let base = Value::Ref(self.globals);
        let k = PropKey::Str(OxStr::from(name));
        self.get_prop_k(&base, &k).unwrap_or(Value::Null)
    }

    // ---- calls ----

    /// Call any callable value: a script function, a host function, a
    /// class (constructing an instance), or a fiber (resuming it).
    pub fn call_value(&mut self, f: Value, this: Value, args: Vec<Value>) -> Result<Value, Raised> {
        if self.native_depth >= MAX_NATIVE_DEPTH {
            return Err(Raised::Error(RtError::range_error("call stack too deep")));
        }
        self.native_depth += 1;
        let r = self.call_value_inner(f, this, args);
        self.native_depth -= 1;
        r
    }

    fn call_value_inner(
        &mut self,
        f: Value,
        this: Value,
        args: Vec<Value>,
    ) -> Result<Value, Raised> {
        let gc = match &f {
            Value::Ref(gc) => *gc,
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "the value is not callable",
                )))
            }
        };
        match self.heap.get(gc) {
            HeapObj::Function(_) => self.call_function(f, this, args, None),
            HeapObj::Native(n) => {
                let nf = n.f.clone();
                nf(self, &this, &args).map_err(Raised::Error)
            }
            HeapObj::Class(_) => self.construct(gc, args),
            HeapObj::Fiber(_) => self.resume_fiber(gc, args),
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not callable",
            ))),
        }
    }

    /// Construct a class instance, running its `$init` member when one is
    /// declared.
    fn construct(&mut self, cls: Gc, args: Vec<Value>) -> Result<Value, Raised> {
        let instance = Value::Ref(self.heap.alloc(HeapObj::Object(Object {
            class: Some(cls),
            ..Object::new()
        })));

        let init = self.template_prop(cls, &PropKey::Str(OxStr::from("$init")));
        if let Some(p) = init {
            let init = self.prop_value(p, &instance)?;
            if !init.is_null() {
                self.call_value(init, instance.clone(), args)?;
            }
        }
        Ok(instance)
    }

    /// Call a named method of a value.
    pub fn call_method(
        &mut self,
        base: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, Raised> {
        let m = self.get_prop(base, &Value::Str(OxStr::from(name)))?;
        if m.is_null() {
            return Err(Raised::Error(RtError::type_error(format!(
                "the value has no \"{name}\" method"
            ))));
        }
        self.call_value(m, base.clone(), args)
    }

    /// Call a named method if the value has one; `Ok(None)` otherwise.
    pub(crate) fn try_call_method(
        &mut self,
        base: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Raised> {
        if !matches!(base, Value::Ref(_)) {
            return Ok(None);
        }
        let m = self.get_prop(base, &Value::Str(OxStr::from(name)))?;
        if m.is_null() {
            return Ok(None);
        }
        self.call_value(m, base.clone(), args).map(Some)
    }

    // ---- auto-close ----

    /// Invoke `$close` on a value if it has one. A user iterator closes
    /// its underlying protocol object.
    pub(crate) fn close_value(&mut self, v: &Value) -> Result<(), Raised> {
        if v.is_null() {
            return Ok(());
        }
        if let Value::Ref(gc) = v {
            if let HeapObj::Iter(Iter::User { obj }) = self.heap.get(*gc) {
                let obj = obj.clone();
                self.try_call_method(&obj, "$close", vec![])?;
                return Ok(());
            }
        }
        self.try_call_method(v, "$close", vec![])?;
        Ok(())
    }

    /// Auto-close a frame's flagged slots, in reverse declaration order.
    ///
    /// A `$close` failure stops the sweep; during unwinding the caller
    /// lets that failure supersede the error already in flight.
    pub(crate) fn auto_close_frame(
        &mut self,
        script: &Arc<BcScript>,
        sfunc: usize,
        frame: Gc,
    ) -> Result<(), Raised> {
        let decls: Vec<u16> = script.sfuncs[sfunc]
            .decls
            .iter()
            .rev()
            .filter(|d| d.flags.contains(DeclFlags::AUTO_CLOSE))
            .map(|d| d.id)
            .collect();

        for id in decls {
            let v = self.frame(frame).v[id as usize].clone();
            self.close_value(&v)?;
        }
        Ok(())
    }

    // ---- iterator protocol ----

    /// `.$iter()`-aware iterator construction.
    pub(crate) fn iterator_new(&mut self, v: &Value) -> Result<Value, Raised> {
        let gc = match v {
            Value::Ref(gc) => *gc,
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "the value is not iterable",
                )))
            }
        };

        let kind = match self.heap.get(gc) {
            HeapObj::Array(_) => Some(Iter::Array { arr: gc, idx: 0 }),
            HeapObj::Enum(_) => Some(Iter::Enum { en: gc, idx: 0 }),
            HeapObj::Iter(_) => return Ok(v.clone()),
            HeapObj::Object(_) => None,
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "the value is not iterable",
                )))
            }
        };

        if let Some(kind) = kind {
            return Ok(Value::Ref(self.heap.alloc(HeapObj::Iter(kind))));
        }

        // An object either supplies `$iter`, or is itself a protocol
        // object with `end`/`value`/`next`.
        if let Some(r) = self.try_call_method(v, "$iter", vec![])? {
            if let Value::Ref(rgc) = &r {
                if matches!(self.heap.get(*rgc), HeapObj::Iter(_)) {
                    return Ok(r);
                }
            }
            return Ok(Value::Ref(self.heap.alloc(HeapObj::Iter(Iter::User { obj: r }))));
        }

        let has_protocol = match self.heap.get(gc) {
            HeapObj::Object(o) => {
                o.prop(&PropKey::Str(OxStr::from("next"))).is_some()
                    || o.prop(&PropKey::Str(OxStr::from("end"))).is_some()
            }
            _ => false,
        };
        if has_protocol {
            return Ok(Value::Ref(
                self.heap.alloc(HeapObj::Iter(Iter::User { obj: v.clone() })),
            ));
        }

        Err(Raised::Error(RtError::type_error(
            "the value is not iterable",
        )))
    }

    /// An entries iterator over an object's own properties, used by
    /// object spread and pattern rest.
    pub(crate) fn entries_iter(&mut self, v: &Value) -> Result<Value, Raised> {
        match v {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Object(o) => {
                    let keys: Vec<PropKey> = o.keys().cloned().collect();
                    Ok(Value::Ref(self.heap.alloc(HeapObj::Iter(Iter::Entries {
                        obj: *gc,
                        keys,
                        idx: 0,
                    }))))
                }
                _ => Err(Raised::Error(RtError::type_error(
                    "the value is not an object",
                ))),
            },
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not an object",
            ))),
        }
    }

    fn iter_of(&self, it: &Value) -> Gc {
        match it {
            Value::Ref(gc) => *gc,
            _ => unreachable!("iterator slot does not hold an iterator"),
        }
    }

    pub(crate) fn iterator_end(&mut self, it: &Value) -> Result<bool, Raised> {
        let gc = self.iter_of(it);
        match self.heap.get(gc) {
            HeapObj::Iter(Iter::Array { arr, idx }) => match self.heap.get(*arr) {
                HeapObj::Array(items) => Ok(*idx >= items.len()),
                _ => Ok(true),
            },
            HeapObj::Iter(Iter::Entries { keys, idx, .. }) => Ok(*idx >= keys.len()),
            HeapObj::Iter(Iter::Enum { en, idx }) => match self.heap.get(*en) {
                HeapObj::Enum(e) => Ok(*idx >= e.items.len()),
                _ => Ok(true),
            },
            HeapObj::Iter(Iter::User { obj }) => {
                let obj = obj.clone();
                let end = self.get_prop(&obj, &Value::Str(OxStr::from("end")))?;
                Ok(end.to_bool())
            }
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not an iterator",
            ))),
        }
    }

    pub(crate) fn iterator_value(&mut self, it: &Value) -> Result<Value, Raised> {
        let gc = self.iter_of(it);
        match self.heap.get(gc) {
            HeapObj::Iter(Iter::Array { arr, idx }) => match self.heap.get(*arr) {
                HeapObj::Array(items) => Ok(items.get(*idx).cloned().unwrap_or(Value::Null)),
                _ => Ok(Value::Null),
            },
            HeapObj::Iter(Iter::Entries { obj, keys, idx }) => {
                let (obj, key) = (*obj, keys.get(*idx).cloned());
                match key {
                    None => Ok(Value::Null),
                    Some(k) => {
                        let base = Value::Ref(obj);
                        let v = self.get_prop_k(&base, &k)?;
                        let pair = vec![k.to_value(), v];
                        Ok(Value::Ref(self.heap.alloc(HeapObj::Array(pair))))
                    }
                }
            }
            HeapObj::Iter(Iter::Enum { en, idx }) => {
                let (en, idx) = (*en, *idx);
                let pair = match self.heap.get(en) {
                    HeapObj::Enum(e) => e
                        .items
                        .get(idx)
                        .map(|(n, v)| vec![Value::Str(n.clone()), Value::Number(*v as f64)]),
                    _ => None,
                };
                Ok(pair
                    .map(|pair| Value::Ref(self.heap.alloc(HeapObj::Array(pair))))
                    .unwrap_or(Value::Null))
            }
            HeapObj::Iter(Iter::User { obj }) => {
                let obj = obj.clone();
                self.get_prop(&obj, &Value::Str(OxStr::from("value")))
            }
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not an iterator",
            ))),
        }
    }

    pub(crate) fn iterator_next(&mut self, it: &Value) -> Result<(), Raised> {
        let gc = self.iter_of(it);
        match self.heap.get_mut(gc) {
            HeapObj::Iter(Iter::Array { idx, .. })
            | HeapObj::Iter(Iter::Entries { idx, .. })
            | HeapObj::Iter(Iter::Enum { idx, .. }) => {
                *idx += 1;
                Ok(())
            }
            HeapObj::Iter(Iter::User { obj }) => {
                let obj = obj.clone();
                self.call_method(&obj, "next", vec![])?;
                Ok(())
            }
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not an iterator",
            ))),
        }
    }

    // ---- instance-of, display names ----

    pub(crate) fn instance_of(&mut self, v: &Value, cls: &Value) -> Result<bool, Raised> {
        let cgc = match cls {
            Value::Ref(gc) if matches!(self.heap.get(*gc), HeapObj::Class(_)) => *gc,
            _ => {
                return Err(Raised::Error(RtError::type_error(
                    "the right operand is not a class",
                )))
            }
        };
        let vc = match v {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::Object(o) => o.class,
                _ => None,
            },
            _ => None,
        };
        match vc {
            Some(c) => Ok(self.class_derives(c, cgc)),
            None => Ok(false),
        }
    }

    fn class_derives(&self, c: Gc, target: Gc) -> bool {
        if c == target {
            return true;
        }
        match self.class(c) {
            Some(cls) => cls.parents.iter().any(|p| self.class_derives(*p, target)),
            None => false,
        }
    }

    /// `set_name`: record a display name on a nameable value.
    pub(crate) fn set_display_name(&mut self, target: &Value, name: OxStr) {
        if let Value::Ref(gc) = target {
            match self.heap.get_mut(*gc) {
                HeapObj::Function(f) => f.name = Some(name),
                HeapObj::Object(o) => o.name = Some(name),
                HeapObj::Class(c) => c.object.name = Some(name),
                HeapObj::Enum(e) => e.name = Some(name),
                _ => {}
            }
        }
    }

    /// `set_scope`: record the enclosing scope on a nameable value.
    pub(crate) fn set_scope_value(&mut self, target: &Value, scope: Value) {
        if let Value::Ref(gc) = target {
            match self.heap.get_mut(*gc) {
                HeapObj::Function(f) => f.scope = Some(scope),
                HeapObj::Object(o) => o.scope = Some(scope),
                HeapObj::Class(c) => c.object.scope = Some(scope),
                _ => {}
            }
        }
    }

    // ---- foreign references ----

    pub(crate) fn cptr_take_ptr(&mut self, v: &Value) -> Result<Value, Raised> {
        match v {
            Value::Ref(gc) if matches!(self.heap.get(*gc), HeapObj::CPtr(_)) => {
                let ctype = match self.heap.get(*gc) {
                    HeapObj::CPtr(p) => OxStr::from(format!("{}*", p.ctype)),
                    _ => unreachable!(),
                };
                Ok(Value::Ref(self.heap.alloc(HeapObj::CPtr(CPtr {
                    ctype,
                    data: CPtrData::Ptr(*gc),
                }))))
            }
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not a C value",
            ))),
        }
    }

    pub(crate) fn cptr_get_value(&mut self, v: &Value) -> Result<Value, Raised> {
        match v {
            Value::Ref(gc) => match self.heap.get(*gc) {
                HeapObj::CPtr(CPtr {
                    data: CPtrData::Value(v),
                    ..
                }) => Ok(v.clone()),
                HeapObj::CPtr(CPtr {
                    data: CPtrData::Ptr(base),
                    ..
                }) => {
                    let base = *base;
                    match self.heap.get(base) {
                        HeapObj::CPtr(CPtr {
                            data: CPtrData::Value(v),
                            ..
                        }) => Ok(v.clone()),
                        _ => Ok(Value::Null),
                    }
                }
                _ => Err(Raised::Error(RtError::type_error(
                    "the value is not a C value",
                ))),
            },
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not a C value",
            ))),
        }
    }

    pub(crate) fn cptr_set_value(&mut self, v: &Value, nv: &Value) -> Result<(), Raised> {
        match v {
            Value::Ref(gc) => {
                let target = match self.heap.get(*gc) {
                    HeapObj::CPtr(CPtr {
                        data: CPtrData::Ptr(base),
                        ..
                    }) => *base,
                    HeapObj::CPtr(_) => *gc,
                    _ => {
                        return Err(Raised::Error(RtError::type_error(
                            "the value is not a C value",
                        )))
                    }
                };
                match self.heap.get_mut(target) {
                    HeapObj::CPtr(p) => {
                        p.data = CPtrData::Value(nv.clone());
                        Ok(())
                    }
                    _ => Err(Raised::Error(RtError::type_error(
                        "the value is not a C value",
                    ))),
                }
            }
            _ => Err(Raised::Error(RtError::type_error(
                "the value is not a C value",
            ))),
        }
    }
}
