//! Arithmetic, comparison, bitwise and unary opcode handlers.
//!
//! Numeric promotion follows the value model: the 64-bit integer path is
//! taken only when an operand is int64-tagged (unsigned winning over
//! signed), strings make `add` concatenate and the orderings compare by
//! code point, and everything else promotes through `to_number`. Bitwise
//! operands narrow to exact 32-bit words unless int64-tagged.

use crate::error::{Raised, RtError};
use crate::interpreter::dispatch::RunStatus;
use crate::interpreter::Interpreter;
use crate::value::{IntKind, OxStr, Value};

use std::cmp::Ordering;

/// Whether either operand demands the unsigned 64-bit path.
fn wants_u64(a: &Value, b: &Value) -> bool {
    matches!(a.int_kind(), Some(IntKind::U64)) || matches!(b.int_kind(), Some(IntKind::U64))
}

/// Whether the 64-bit integer path applies at all.
fn is_int64_binary(a: &Value, b: &Value) -> bool {
    a.int_kind().is_some() || b.int_kind().is_some()
}

impl Interpreter {
    pub(crate) fn reg(&self, rs: &RunStatus, i: u8) -> &Value {
        &self.v_stack[rs.regs + i as usize]
    }

    pub(crate) fn reg_c(&self, rs: &RunStatus, i: u8) -> Value {
        self.v_stack[rs.regs + i as usize].clone()
    }

    pub(crate) fn set_reg(&mut self, rs: &RunStatus, i: u8, v: Value) {
        self.v_stack[rs.regs + i as usize] = v;
    }

    /// Shared shape of the arithmetic handlers.
    fn arith(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        d2: u8,
        fi: impl Fn(i64, i64) -> Result<i64, RtError>,
        fu: impl Fn(u64, u64) -> Result<u64, RtError>,
        ff: impl Fn(f64, f64) -> f64,
    ) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);

        let out = if is_int64_binary(&a, &b) {
            if wants_u64(&a, &b) {
                Value::UInt64(fu(a.to_uint64()?, b.to_uint64()?)?)
            } else {
                Value::Int64(fi(a.to_int64()?, b.to_int64()?)?)
            }
        } else {
            Value::Number(ff(a.to_number()?, b.to_number()?))
        };

        self.set_reg(rs, d2, out);
        Ok(())
    }

    pub(crate) fn op_add(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);

        if a.is_str() || b.is_str() {
            let sa = a.to_ox_string(&self.heap)?;
            let sb = b.to_ox_string(&self.heap)?;
            let mut out = String::with_capacity(sa.len() + sb.len());
            out.push_str(&sa);
            out.push_str(&sb);
            self.set_reg(rs, d2, Value::Str(OxStr::from(out)));
            return Ok(());
        }

        self.arith(
            rs,
            s0,
            s1,
            d2,
            |a, b| Ok(a.wrapping_add(b)),
            |a, b| Ok(a.wrapping_add(b)),
            |a, b| a + b,
        )
    }

    pub(crate) fn op_sub(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        self.arith(
            rs,
            s0,
            s1,
            d2,
            |a, b| Ok(a.wrapping_sub(b)),
            |a, b| Ok(a.wrapping_sub(b)),
            |a, b| a - b,
        )
    }

    pub(crate) fn op_mul(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        self.arith(
            rs,
            s0,
            s1,
            d2,
            |a, b| Ok(a.wrapping_mul(b)),
            |a, b| Ok(a.wrapping_mul(b)),
            |a, b| a * b,
        )
    }

    pub(crate) fn op_div(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        self.arith(
            rs,
            s0,
            s1,
            d2,
            |a, b| match b {
                0 => Err(RtError::range_error("division by zero")),
                _ => Ok(a.wrapping_div(b)),
            },
            |a, b| match b {
                0 => Err(RtError::range_error("division by zero")),
                _ => Ok(a / b),
            },
            |a, b| a / b,
        )
    }

    pub(crate) fn op_mod(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        self.arith(
            rs,
            s0,
            s1,
            d2,
            |a, b| match b {
                0 => Err(RtError::range_error("division by zero")),
                _ => Ok(a.wrapping_rem(b)),
            },
            |a, b| match b {
                0 => Err(RtError::range_error("division by zero")),
                _ => Ok(a % b),
            },
            // `%` on doubles already carries `fmod` semantics.
            |a, b| a % b,
        )
    }

    pub(crate) fn op_exp(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg(rs, s0).to_number()?;
        let b = self.reg(rs, s1).to_number()?;
        self.set_reg(rs, d2, Value::Number(a.powf(b)));
        Ok(())
    }

    /// `match`: dispatch to the left operand's `match` method; a non-null
    /// result stringifies, null stays null.
    pub(crate) fn op_match(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);
        let mr = self.call_method(&a, "match", vec![b])?;
        let out = if mr.is_null() {
            Value::Null
        } else {
            Value::Str(mr.to_ox_string(&self.heap)?)
        };
        self.set_reg(rs, d2, out);
        Ok(())
    }

    pub(crate) fn op_shl(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let n = self.reg(rs, s1).to_uint32()? & 63;
        let out = match a.int_kind() {
            Some(IntKind::I64) => Value::Int64(((a.to_uint64()?) << n) as i64),
            Some(IntKind::U64) => Value::UInt64(a.to_uint64()? << n),
            None => {
                let i = a.to_bit_int32()?;
                Value::Number(i.wrapping_shl(n) as f64)
            }
        };
        self.set_reg(rs, d2, out);
        Ok(())
    }

    pub(crate) fn op_shr(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let n = self.reg(rs, s1).to_uint32()? & 63;
        let out = match a.int_kind() {
            Some(IntKind::I64) => Value::Int64(a.to_int64()? >> n),
            Some(IntKind::U64) => Value::UInt64(((a.to_int64()?) >> n) as u64),
            None => {
                let i = a.to_bit_int32()? as i32;
                Value::Number((i >> (n & 31)) as f64)
            }
        };
        self.set_reg(rs, d2, out);
        Ok(())
    }

    pub(crate) fn op_ushr(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let n = self.reg(rs, s1).to_uint32()? & 63;
        let out = match a.int_kind() {
            Some(IntKind::I64) => Value::Int64((a.to_uint64()? >> n) as i64),
            Some(IntKind::U64) => Value::UInt64(a.to_uint64()? >> n),
            None => {
                let i = a.to_bit_int32()?;
                Value::Number((i >> (n & 31)) as f64)
            }
        };
        self.set_reg(rs, d2, out);
        Ok(())
    }

    /// Shared shape of the four orderings.
    pub(crate) fn op_cmp(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        d2: u8,
        accept: impl Fn(Ordering) -> bool,
    ) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);

        let ord = if a.is_str() || b.is_str() {
            let sa = a.to_ox_string(&self.heap)?;
            let sb = b.to_ox_string(&self.heap)?;
            sa.as_str().cmp(sb.as_str())
        } else if is_int64_binary(&a, &b) {
            if wants_u64(&a, &b) {
                a.to_uint64()?.cmp(&b.to_uint64()?)
            } else {
                a.to_int64()?.cmp(&b.to_int64()?)
            }
        } else {
            let na = a.to_number()?;
            let nb = b.to_number()?;
            match na.partial_cmp(&nb) {
                Some(o) => o,
                // NaN orders false against everything.
                None => {
                    self.set_reg(rs, d2, Value::Bool(false));
                    return Ok(());
                }
            }
        };

        self.set_reg(rs, d2, Value::Bool(accept(ord)));
        Ok(())
    }

    /// Shared shape of the bitwise handlers.
    pub(crate) fn op_bit(
        &mut self,
        rs: &RunStatus,
        s0: u8,
        s1: u8,
        d2: u8,
        fi: impl Fn(i64, i64) -> i64,
        fu: impl Fn(u64, u64) -> u64,
        f32b: impl Fn(u32, u32) -> u32,
    ) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);

        let out = if is_int64_binary(&a, &b) {
            if wants_u64(&a, &b) {
                Value::UInt64(fu(a.to_uint64()?, b.to_uint64()?))
            } else {
                Value::Int64(fi(a.to_int64()?, b.to_int64()?))
            }
        } else {
            Value::Number(f32b(a.to_bit_int32()?, b.to_bit_int32()?) as f64)
        };

        self.set_reg(rs, d2, out);
        Ok(())
    }

    // ---- unary ----

    pub(crate) fn op_not(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let b = self.reg(rs, s0).to_bool();
        self.set_reg(rs, d1, Value::Bool(!b));
        Ok(())
    }

    pub(crate) fn op_to_num(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let out = match v.int_kind() {
            Some(_) => v,
            None => Value::Number(v.to_number()?),
        };
        self.set_reg(rs, d1, out);
        Ok(())
    }

    pub(crate) fn op_rev(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let out = match v.int_kind() {
            Some(_) => Value::UInt64(!v.to_uint64()?),
            None => Value::Number(!v.to_bit_int32()? as f64),
        };
        self.set_reg(rs, d1, out);
        Ok(())
    }

    pub(crate) fn op_neg(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let v = self.reg_c(rs, s0);
        let out = match v.int_kind() {
            Some(_) => Value::Int64(v.to_int64()?.wrapping_neg()),
            None => Value::Number(-v.to_number()?),
        };
        self.set_reg(rs, d1, out);
        Ok(())
    }

    pub(crate) fn op_typeof(&mut self, rs: &RunStatus, s0: u8, d1: u8) -> Result<(), Raised> {
        let name = self.reg(rs, s0).type_of(&self.heap);
        let s = self.interner.intern(name);
        self.set_reg(rs, d1, Value::Str(s));
        Ok(())
    }

    pub(crate) fn op_instof(&mut self, rs: &RunStatus, s0: u8, s1: u8, d2: u8) -> Result<(), Raised> {
        let a = self.reg_c(rs, s0);
        let b = self.reg_c(rs, s1);
        let r = self.instance_of(&a, &b)?;
        self.set_reg(rs, d2, Value::Bool(r));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_classifier() {
        assert!(is_int64_binary(&Value::Int64(1), &Value::Number(2.0)));
        assert!(!is_int64_binary(&Value::Number(1.0), &Value::Number(2.0)));
        assert!(wants_u64(&Value::UInt64(1), &Value::Int64(2)));
        assert!(!wants_u64(&Value::Int64(1), &Value::Number(2.0)));
    }
}
