//! Compiler IR: planned instructions over abstract registers and labels.
//!
//! A [`Command`] records the opcode plus operands whose registers are
//! indices into the compiler's abstract register table and whose labels
//! are indices into the label table. The lifetime allocator assigns
//! physical slots and the assembler resolves labels before encoding.

use ox_asm::Opcode;

/// Abstract register id (index into the per-function register table).
pub(crate) type RegId = usize;

/// Label id (index into the per-function label table).
pub(crate) type LabelId = usize;

/// Operands of a planned instruction, in abstract form.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CmdArgs {
    None,
    Reg(RegId),
    RegReg(RegId, RegId),
    RegRegReg(RegId, RegId, RegId),
    RegRegRegReg(RegId, RegId, RegId, RegId),
    Pool(u16),
    PoolReg(u16, RegId),
    Label(LabelId),
    LabelLabel(LabelId, LabelId),
    RegLabel(RegId, LabelId),
    DepthReg(u8, RegId),
    DepthLabel(u8, LabelId),
    DepthPoolReg(u8, u16, RegId),
}

impl CmdArgs {
    /// Registers referenced by this command, in operand order.
    pub(crate) fn regs(&self) -> impl Iterator<Item = RegId> {
        let rs: [Option<RegId>; 4] = match *self {
            CmdArgs::None
            | CmdArgs::Pool(..)
            | CmdArgs::Label(..)
            | CmdArgs::LabelLabel(..)
            | CmdArgs::DepthLabel(..) => [None; 4],
            CmdArgs::Reg(a) | CmdArgs::RegLabel(a, _) | CmdArgs::PoolReg(_, a) => {
                [Some(a), None, None, None]
            }
            CmdArgs::RegReg(a, b) => [Some(a), Some(b), None, None],
            CmdArgs::RegRegReg(a, b, c) => [Some(a), Some(b), Some(c), None],
            CmdArgs::RegRegRegReg(a, b, c, d) => [Some(a), Some(b), Some(c), Some(d)],
            CmdArgs::DepthReg(_, a) | CmdArgs::DepthPoolReg(_, _, a) => [Some(a), None, None, None],
        };
        rs.into_iter().flatten()
    }
}

/// One planned instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Command {
    pub op: Opcode,
    pub args: CmdArgs,
    pub line: u32,
}

impl Command {
    /// Encoded width: label stubs and eliminated jumps occupy no bytes.
    pub(crate) fn emitted_len(&self) -> usize {
        match self.op {
            Opcode::Stub | Opcode::Nop => 0,
            op => op.len(),
        }
    }
}

/// A compiler label: resolved bytecode offset plus the block-stack depth
/// expected at arrival.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompLabel {
    /// Resolved offset; `usize::MAX` until the peephole pass runs.
    pub off: usize,
    /// Block-stack depth recorded at creation.
    pub stack_level: u32,
}

/// A compiler register: physical slot once allocated, and the index of
/// its last use.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompReg {
    /// Physical slot, or `None` until allocation.
    pub phys: Option<u8>,
    /// Command index of the last use.
    pub last_use: usize,
}
