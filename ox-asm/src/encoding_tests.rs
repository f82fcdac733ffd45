use crate::{Args, Instruction, Opcode, Shape};

use rstest::rstest;
use strum::IntoEnumIterator;

fn args_for(shape: Shape) -> Args {
    match shape {
        Shape::NoArg => Args::None,
        Shape::Reg => Args::Reg(0x11),
        Shape::RegReg => Args::RegReg(0x11, 0x22),
        Shape::RegRegReg => Args::RegRegReg(0x11, 0x22, 0x33),
        Shape::RegRegRegReg => Args::RegRegRegReg(0x11, 0x22, 0x33, 0x44),
        Shape::Pool => Args::Pool(0x1234),
        Shape::PoolReg => Args::PoolReg(0x1234, 0x55),
        Shape::Label => Args::Label(0x1234),
        Shape::LabelLabel => Args::LabelLabel(0x1234, 0x5678),
        Shape::RegLabel => Args::RegLabel(0x11, 0x1234),
        Shape::DepthReg => Args::DepthReg(0x01, 0x22),
        Shape::DepthLabel => Args::DepthLabel(0x01, 0x1234),
        Shape::DepthPoolReg => Args::DepthPoolReg(0x01, 0x1234, 0x55),
    }
}

#[test]
fn opcode_byte_round_trip() {
    for op in Opcode::iter() {
        let b = op as u8;
        assert_eq!(Opcode::try_from(b), Ok(op));
    }

    // Everything past the last opcode byte must be rejected.
    let last = Opcode::iter().map(|o| o as u8).max().unwrap();
    for b in (last + 1)..=0xff {
        assert!(Opcode::try_from(b).is_err());
    }
}

#[test]
fn instruction_round_trip() {
    for op in Opcode::iter() {
        let insn = Instruction::new(op, args_for(op.shape()));

        let mut bytes = Vec::new();
        insn.encode(&mut bytes);
        assert_eq!(bytes.len(), op.len());

        let (decoded, len) = Instruction::decode(&bytes).expect("decode");
        assert_eq!(len, bytes.len());
        assert_eq!(decoded, insn);
    }
}

#[test]
fn truncated_operands_are_rejected() {
    for op in Opcode::iter().filter(|op| op.len() > 1) {
        let mut bytes = Vec::new();
        Instruction::new(op, args_for(op.shape())).encode(&mut bytes);
        bytes.pop();
        assert!(Instruction::decode(&bytes).is_err(), "{op} accepted truncated input");
    }
}

#[rstest]
#[case(Opcode::Nop, 1)]
#[case(Opcode::Ret, 2)]
#[case(Opcode::Jmp, 3)]
#[case(Opcode::Add, 4)]
#[case(Opcode::GetCv, 4)]
#[case(Opcode::DeepJmp, 4)]
#[case(Opcode::TryStart, 5)]
#[case(Opcode::GetTB, 5)]
#[case(Opcode::CAcce, 5)]
fn known_widths(#[case] op: Opcode, #[case] len: usize) {
    assert_eq!(op.len(), len);
}

#[test]
fn multi_byte_fields_are_big_endian() {
    let mut bytes = Vec::new();
    Instruction::new(Opcode::Jmp, Args::Label(0x0102)).encode(&mut bytes);
    assert_eq!(bytes, vec![Opcode::Jmp as u8, 0x01, 0x02]);

    let mut bytes = Vec::new();
    Instruction::new(Opcode::GetTB, Args::DepthPoolReg(3, 0x0a0b, 7)).encode(&mut bytes);
    assert_eq!(bytes, vec![Opcode::GetTB as u8, 3, 0x0a, 0x0b, 7]);
}

#[test]
fn register_report_matches_shape() {
    let insn = Instruction::new(Opcode::CAcce, Args::RegRegRegReg(1, 2, 3, 4));
    assert_eq!(insn.args().registers().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    let insn = Instruction::new(Opcode::DeepJmp, Args::DepthLabel(2, 9));
    assert_eq!(insn.args().registers().count(), 0);

    let insn = Instruction::new(Opcode::GetTB, Args::DepthPoolReg(1, 4, 9));
    assert_eq!(insn.args().registers().collect::<Vec<_>>(), vec![9]);
}
