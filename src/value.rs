//! Tagged value representation and the value-level protocol.
//!
//! Every variable, register and declaration slot holds an owned
//! [`Value`]. Primitive payloads are copied on assignment; heap payloads
//! ([`Value::Ref`]) are shared by reference under the collector. Strings
//! are immutable and interned on first use in key position, so they live
//! outside the collected arena.

use crate::error::RtError;
use crate::heap::{Gc, Heap, HeapObj};

use core::fmt;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::sync::Arc;

/// An immutable, cheaply clonable string value.
///
/// Equality, ordering and hashing are by content; UTF-8 byte order equals
/// code-point order, so `Ord` gives the code-point-ordered comparison the
/// value protocol requires.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OxStr(Arc<str>);

impl OxStr {
    /// The underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pointer identity, used by the intern table.
    pub(crate) fn ptr_eq(&self, other: &OxStr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<&str> for OxStr {
    fn from(s: &str) -> Self {
        OxStr(Arc::from(s))
    }
}

impl From<String> for OxStr {
    fn from(s: String) -> Self {
        OxStr(Arc::from(s.as_str()))
    }
}

impl Borrow<str> for OxStr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for OxStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OxStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for OxStr {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for OxStr {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(OxStr::from)
    }
}

/// Singleton table for strings used in hash-key position.
///
/// Interning replaces a string with its canonical `Rc`, making repeated
/// key hashing and equality cheap. It is a performance feature only;
/// equality stays content-based either way.
#[derive(Debug, Default)]
pub struct Interner {
    table: HashSet<OxStr>,
}

impl Interner {
    /// The canonical instance of `s`.
    pub fn singleton(&mut self, s: &OxStr) -> OxStr {
        if let Some(c) = self.table.get(s.as_str()) {
            return c.clone();
        }
        self.table.insert(s.clone());
        s.clone()
    }

    /// The canonical instance for a string slice.
    pub fn intern(&mut self, s: &str) -> OxStr {
        if let Some(c) = self.table.get(s) {
            return c.clone();
        }
        let c = OxStr::from(s);
        self.table.insert(c.clone());
        c
    }
}

/// Which 64-bit integer flavor a value carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    /// Signed 64-bit.
    I64,
    /// Unsigned 64-bit.
    U64,
}

/// A dynamically-typed OX value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The null value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// An IEEE-754 double.
    Number(f64),
    /// A signed 64-bit integer, used primarily for bit operations.
    Int64(i64),
    /// An unsigned 64-bit integer.
    UInt64(u64),
    /// An immutable string.
    Str(OxStr),
    /// A reference into the collected heap.
    Ref(Gc),
}

impl Value {
    /// `true` for the null value.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` for a string value.
    pub const fn is_str(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// The 64-bit integer flavor, if the value carries one.
    pub const fn int_kind(&self) -> Option<IntKind> {
        match self {
            Value::Int64(_) => Some(IntKind::I64),
            Value::UInt64(_) => Some(IntKind::U64),
            _ => None,
        }
    }

    /// Truthiness: null and zero are false, the empty string is false,
    /// every heap reference is true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Int64(i) => *i != 0,
            Value::UInt64(u) => *u != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Ref(_) => true,
        }
    }

    /// Numeric conversion. Strings parse as decimal literals; heap values
    /// do not convert.
    pub fn to_number(&self) -> Result<f64, RtError> {
        match self {
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(*n),
            Value::Int64(i) => Ok(*i as f64),
            Value::UInt64(u) => Ok(*u as f64),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| RtError::type_error(format!("cannot convert \"{s}\" to number"))),
            Value::Ref(_) => Err(RtError::type_error("cannot convert the value to number")),
        }
    }

    /// Narrow to `u32`, rejecting values outside `[i32::MIN, u32::MAX]`.
    ///
    /// This is the conversion bitwise operands go through before being
    /// reinterpreted as 32-bit words.
    pub fn to_bit_int32(&self) -> Result<u32, RtError> {
        let n = self.to_number()?;
        if n < i32::MIN as f64 || n > u32::MAX as f64 {
            return Err(RtError::range_error("number value overflow"));
        }
        Ok(n as i64 as u32)
    }

    /// Narrow to `u32`, rejecting negatives and overflow.
    pub fn to_uint32(&self) -> Result<u32, RtError> {
        let n = self.to_number()?;
        if n < 0.0 || n > u32::MAX as f64 {
            return Err(RtError::range_error("number value overflow"));
        }
        Ok(n as u32)
    }

    /// Widen to `i64`; int64-tagged values pass through exactly.
    pub fn to_int64(&self) -> Result<i64, RtError> {
        match self {
            Value::Int64(i) => Ok(*i),
            Value::UInt64(u) => Ok(*u as i64),
            v => Ok(v.to_number()? as i64),
        }
    }

    /// Widen to `u64`; int64-tagged values pass through exactly.
    pub fn to_uint64(&self) -> Result<u64, RtError> {
        match self {
            Value::Int64(i) => Ok(*i as u64),
            Value::UInt64(u) => Ok(*u),
            v => Ok(v.to_number()? as u64),
        }
    }

    /// Convert to an array/string index.
    pub fn to_index(&self) -> Result<usize, RtError> {
        let n = self.to_number()?;
        if n < 0.0 || n.fract() != 0.0 {
            return Err(RtError::range_error("the value is not a valid index"));
        }
        Ok(n as usize)
    }

    /// Value-level equality: numerics compare numerically across tags,
    /// strings by content, heap references by identity.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (a, b) => match (a.as_num(), b.as_num()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int64(i) => Some(*i as f64),
            Value::UInt64(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// The `typeof` name of the value.
    pub fn type_of(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) | Value::Int64(_) | Value::UInt64(_) => "number",
            Value::Str(_) => "string",
            Value::Ref(gc) => match heap.get(*gc) {
                HeapObj::Array(_) => "array",
                HeapObj::Object(_) => "object",
                HeapObj::Class(_) => "class",
                HeapObj::Function(_) | HeapObj::Native(_) => "function",
                HeapObj::Enum(_) => "enum",
                HeapObj::Iter(_) => "iterator",
                HeapObj::CPtr(_) => "cvalue",
                HeapObj::Fiber(_) => "fiber",
                HeapObj::Frame(_) => "frame",
            },
        }
    }

    /// Stringification with the default rendering.
    pub fn to_ox_string(&self, heap: &Heap) -> Result<OxStr, RtError> {
        Ok(match self {
            Value::Null => OxStr::from("null"),
            Value::Bool(true) => OxStr::from("true"),
            Value::Bool(false) => OxStr::from("false"),
            Value::Number(n) => OxStr::from(fmt_number(*n)),
            Value::Int64(i) => OxStr::from(i.to_string()),
            Value::UInt64(u) => OxStr::from(u.to_string()),
            Value::Str(s) => s.clone(),
            Value::Ref(gc) => match heap.get(*gc) {
                HeapObj::Array(items) => {
                    let mut out = String::new();
                    for (i, it) in items.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(&it.to_ox_string(heap)?);
                    }
                    OxStr::from(out)
                }
                HeapObj::Object(o) => match &o.name {
                    Some(n) => OxStr::from(format!("[object {n}]")),
                    None => OxStr::from("[object]"),
                },
                HeapObj::Class(c) => match &c.object.name {
                    Some(n) => OxStr::from(format!("[class {n}]")),
                    None => OxStr::from("[class]"),
                },
                HeapObj::Function(f) => match &f.name {
                    Some(n) => OxStr::from(format!("[function {n}]")),
                    None => OxStr::from("[function]"),
                },
                HeapObj::Native(_) => OxStr::from("[function native]"),
                HeapObj::Enum(_) => OxStr::from("[enum]"),
                HeapObj::Iter(_) => OxStr::from("[iterator]"),
                HeapObj::CPtr(_) => OxStr::from("[cvalue]"),
                HeapObj::Fiber(_) => OxStr::from("[fiber]"),
                HeapObj::Frame(_) => OxStr::from("[frame]"),
            },
        })
    }

    /// Stringification under a format spec.
    ///
    /// The spec packs a radix in the low byte (0 means decimal) and a
    /// zero-padded minimum width in the next byte; it only affects numeric
    /// values.
    pub fn to_ox_string_format(&self, heap: &Heap, spec: i64) -> Result<OxStr, RtError> {
        let radix = (spec & 0xff) as u32;
        let width = ((spec >> 8) & 0xff) as usize;

        let formatted = match (self, radix) {
            (Value::Number(n), r) if *n == n.trunc() && n.is_finite() && r > 1 => {
                to_radix(*n as i64, r)
            }
            (Value::Int64(i), r) if r > 1 => to_radix(*i, r),
            (Value::UInt64(u), r) if r > 1 => to_radix(*u as i64, r),
            _ => return self.to_ox_string(heap),
        };

        if formatted.len() < width {
            let mut out = "0".repeat(width - formatted.len());
            out.push_str(&formatted);
            Ok(OxStr::from(out))
        } else {
            Ok(OxStr::from(formatted))
        }
    }

    /// Heap references held by this value, for the collector's scan.
    pub(crate) fn trace(&self, out: &mut Vec<Gc>) {
        if let Value::Ref(gc) = self {
            out.push(*gc);
        }
    }
}

/// `%g`-style rendering: integral doubles print without a fraction.
pub(crate) fn fmt_number(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn to_radix(mut v: i64, radix: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let radix = radix.clamp(2, 36) as i64;
    let neg = v < 0;
    let mut out = Vec::new();
    v = v.abs();
    loop {
        out.push(DIGITS[(v % radix) as usize]);
        v /= radix;
        if v == 0 {
            break;
        }
    }
    if neg {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).expect("ascii digits")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Number(0.0).to_bool());
        assert!(Value::Number(1.0).to_bool());
        assert!(!Value::Str(OxStr::from("")).to_bool());
        assert!(Value::Str(OxStr::from("x")).to_bool());
        assert!(!Value::Number(f64::NAN).to_bool());
    }

    #[test]
    fn numeric_equality_crosses_tags() {
        assert!(Value::Number(3.0).equal(&Value::Int64(3)));
        assert!(Value::UInt64(7).equal(&Value::Number(7.0)));
        assert!(!Value::Number(3.5).equal(&Value::Int64(3)));
        assert!(!Value::Null.equal(&Value::Number(0.0)));
    }

    #[test]
    fn bit_int32_narrows_with_range_check() {
        assert_eq!(Value::Number(-1.0).to_bit_int32().unwrap(), u32::MAX);
        assert!(Value::Number(1e12).to_bit_int32().is_err());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(fmt_number(20.0), "20");
        assert_eq!(fmt_number(2.5), "2.5");
    }

    #[test]
    fn format_spec_radix_and_width() {
        let heap = Heap::default();
        let s = Value::Number(255.0)
            .to_ox_string_format(&heap, 16 | (4 << 8))
            .unwrap();
        assert_eq!(s.as_str(), "00ff");
    }

    #[test]
    fn interner_returns_canonical_instances() {
        let mut it = Interner::default();
        let a = it.intern("hello");
        let b = it.singleton(&OxStr::from("hello"));
        assert!(a.ptr_eq(&b));
    }
}
