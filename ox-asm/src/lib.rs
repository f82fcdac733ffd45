//! Atomic types of the OX virtual machine.
//!
//! This crate defines the instruction alphabet shared by the compiler, the
//! assembler/decompiler and the dispatch loop: the [`Opcode`] byte, the
//! operand [`Shape`] that fixes each instruction's encoded width, and the
//! decoded [`Instruction`] form with its big-endian `encode`/`decode` pair.
//!
//! Instructions are variable-width: one opcode byte followed by the operand
//! bytes mandated by the opcode's shape. Multi-byte operands are big-endian.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod args;
mod instruction;
mod opcode;

#[cfg(test)]
mod encoding_tests;

pub use args::{Args, Shape};
pub use instruction::Instruction;
pub use opcode::{InvalidOpcode, Opcode, PoolKind};
