/// Operand layout of an instruction.
///
/// The shape fixes the encoded width of every instruction carrying it. The
/// per-operand meaning (source register vs. destination register, which
/// constant pool an index points into) belongs to the opcode; the shape only
/// describes the bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    /// No operands.
    NoArg,
    /// One register: `reg:u8`.
    Reg,
    /// Two registers: `reg:u8 reg:u8`.
    RegReg,
    /// Three registers: `reg:u8 reg:u8 reg:u8`.
    RegRegReg,
    /// Four registers: `reg:u8 reg:u8 reg:u8 reg:u8`.
    RegRegRegReg,
    /// A pool or declaration index: `id:u16`.
    Pool,
    /// A pool or declaration index and a register: `id:u16 reg:u8`.
    PoolReg,
    /// A jump target: `label:u16`.
    Label,
    /// Two jump targets: `label:u16 label:u16`.
    LabelLabel,
    /// A register and a jump target: `reg:u8 label:u16`.
    RegLabel,
    /// An outer-frame depth and a register: `depth:u8 reg:u8`.
    DepthReg,
    /// An outer-frame depth and a jump target: `depth:u8 label:u16`.
    DepthLabel,
    /// An outer-frame depth, a declaration index and a register:
    /// `depth:u8 id:u16 reg:u8`.
    DepthPoolReg,
}

impl Shape {
    /// Encoded width of an instruction with this shape, opcode byte included.
    pub const fn len(self) -> usize {
        match self {
            Shape::NoArg => 1,
            Shape::Reg => 2,
            Shape::RegReg | Shape::Pool | Shape::Label | Shape::DepthReg => 3,
            Shape::RegRegReg | Shape::PoolReg | Shape::RegLabel | Shape::DepthLabel => 4,
            Shape::RegRegRegReg | Shape::LabelLabel | Shape::DepthPoolReg => 5,
        }
    }

    /// `true` for the width-1 shape; kept so clippy's `len-without-is-empty`
    /// convention holds.
    pub const fn is_empty(self) -> bool {
        matches!(self, Shape::NoArg)
    }
}

/// Decoded operands of a single instruction, one variant per [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Args {
    /// No operands.
    None,
    /// One register.
    Reg(u8),
    /// Two registers.
    RegReg(u8, u8),
    /// Three registers.
    RegRegReg(u8, u8, u8),
    /// Four registers.
    RegRegRegReg(u8, u8, u8, u8),
    /// A pool or declaration index.
    Pool(u16),
    /// A pool or declaration index and a register.
    PoolReg(u16, u8),
    /// A jump target.
    Label(u16),
    /// Two jump targets.
    LabelLabel(u16, u16),
    /// A register and a jump target.
    RegLabel(u8, u16),
    /// An outer-frame depth and a register.
    DepthReg(u8, u8),
    /// An outer-frame depth and a jump target.
    DepthLabel(u8, u16),
    /// An outer-frame depth, a declaration index and a register.
    DepthPoolReg(u8, u16, u8),
}

impl Args {
    /// The shape these operands decode under.
    pub const fn shape(&self) -> Shape {
        match self {
            Args::None => Shape::NoArg,
            Args::Reg(..) => Shape::Reg,
            Args::RegReg(..) => Shape::RegReg,
            Args::RegRegReg(..) => Shape::RegRegReg,
            Args::RegRegRegReg(..) => Shape::RegRegRegReg,
            Args::Pool(..) => Shape::Pool,
            Args::PoolReg(..) => Shape::PoolReg,
            Args::Label(..) => Shape::Label,
            Args::LabelLabel(..) => Shape::LabelLabel,
            Args::RegLabel(..) => Shape::RegLabel,
            Args::DepthReg(..) => Shape::DepthReg,
            Args::DepthLabel(..) => Shape::DepthLabel,
            Args::DepthPoolReg(..) => Shape::DepthPoolReg,
        }
    }

    /// Registers referenced by these operands, in operand order.
    ///
    /// Only bytes that name a register slot are reported; depths, pool
    /// indices and labels are skipped.
    pub fn registers(&self) -> impl Iterator<Item = u8> {
        let regs: [Option<u8>; 4] = match *self {
            Args::None | Args::Pool(..) | Args::Label(..) | Args::LabelLabel(..) | Args::DepthLabel(..) => {
                [None; 4]
            }
            Args::Reg(a) | Args::RegLabel(a, _) | Args::PoolReg(_, a) => [Some(a), None, None, None],
            Args::RegReg(a, b) => [Some(a), Some(b), None, None],
            Args::RegRegReg(a, b, c) => [Some(a), Some(b), Some(c), None],
            Args::RegRegRegReg(a, b, c, d) => [Some(a), Some(b), Some(c), Some(d)],
            Args::DepthReg(_, a) | Args::DepthPoolReg(_, _, a) => [Some(a), None, None, None],
        };
        regs.into_iter().flatten()
    }
}
