use crate::args::{Args, Shape};
use crate::opcode::{InvalidOpcode, Opcode};

use alloc::vec::Vec;

/// A single decoded instruction: opcode plus operands.
///
/// The operand variant is guaranteed to match the opcode's [`Shape`]; the
/// constructor enforces it, so a round trip through `encode`/`decode` is
/// lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    op: Opcode,
    args: Args,
}

impl Instruction {
    /// Build an instruction, checking the operands against the opcode's
    /// shape.
    ///
    /// # Panics
    ///
    /// Panics if the operand variant does not match the opcode's shape.
    /// Instruction construction happens in the assembler, where a mismatch
    /// is a compiler bug, not a user error.
    pub fn new(op: Opcode, args: Args) -> Self {
        assert_eq!(
            op.shape(),
            args.shape(),
            "operand shape mismatch for {op}",
        );
        Self { op, args }
    }

    /// The opcode.
    pub const fn op(&self) -> Opcode {
        self.op
    }

    /// The decoded operands.
    pub const fn args(&self) -> Args {
        self.args
    }

    /// Encoded width in bytes, opcode byte included.
    pub const fn len(&self) -> usize {
        self.op.len()
    }

    /// `true` for no instruction; present for clippy's convention only.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Append the big-endian encoding of this instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.op as u8);
        match self.args {
            Args::None => {}
            Args::Reg(a) => out.push(a),
            Args::RegReg(a, b) => out.extend_from_slice(&[a, b]),
            Args::RegRegReg(a, b, c) => out.extend_from_slice(&[a, b, c]),
            Args::RegRegRegReg(a, b, c, d) => out.extend_from_slice(&[a, b, c, d]),
            Args::Pool(i) => out.extend_from_slice(&i.to_be_bytes()),
            Args::PoolReg(i, a) => {
                out.extend_from_slice(&i.to_be_bytes());
                out.push(a);
            }
            Args::Label(l) => out.extend_from_slice(&l.to_be_bytes()),
            Args::LabelLabel(l0, l1) => {
                out.extend_from_slice(&l0.to_be_bytes());
                out.extend_from_slice(&l1.to_be_bytes());
            }
            Args::RegLabel(a, l) => {
                out.push(a);
                out.extend_from_slice(&l.to_be_bytes());
            }
            Args::DepthReg(o, a) => out.extend_from_slice(&[o, a]),
            Args::DepthLabel(o, l) => {
                out.push(o);
                out.extend_from_slice(&l.to_be_bytes());
            }
            Args::DepthPoolReg(o, i, a) => {
                out.push(o);
                out.extend_from_slice(&i.to_be_bytes());
                out.push(a);
            }
        }
    }

    /// Decode one instruction from the head of `bc`.
    ///
    /// Returns the instruction and its encoded width. Fails on an unknown
    /// opcode byte or a truncated operand field.
    pub fn decode(bc: &[u8]) -> Result<(Self, usize), InvalidOpcode> {
        let op = Opcode::try_from(*bc.first().ok_or(InvalidOpcode)?)?;
        let len = op.len();
        if bc.len() < len {
            return Err(InvalidOpcode);
        }

        let u16_at = |i: usize| u16::from_be_bytes([bc[i], bc[i + 1]]);

        let args = match op.shape() {
            Shape::NoArg => Args::None,
            Shape::Reg => Args::Reg(bc[1]),
            Shape::RegReg => Args::RegReg(bc[1], bc[2]),
            Shape::RegRegReg => Args::RegRegReg(bc[1], bc[2], bc[3]),
            Shape::RegRegRegReg => Args::RegRegRegReg(bc[1], bc[2], bc[3], bc[4]),
            Shape::Pool => Args::Pool(u16_at(1)),
            Shape::PoolReg => Args::PoolReg(u16_at(1), bc[3]),
            Shape::Label => Args::Label(u16_at(1)),
            Shape::LabelLabel => Args::LabelLabel(u16_at(1), u16_at(3)),
            Shape::RegLabel => Args::RegLabel(bc[1], u16_at(2)),
            Shape::DepthReg => Args::DepthReg(bc[1], bc[2]),
            Shape::DepthLabel => Args::DepthLabel(bc[1], u16_at(2)),
            Shape::DepthPoolReg => Args::DepthPoolReg(bc[1], u16_at(2), bc[4]),
        };

        Ok((Self { op, args }, len))
    }
}
