use crate::args::Shape;

use core::fmt;

/// The byte can't be mapped to any known [`Opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode;

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidOpcode {}

/// Which table a pool-index operand points into.
///
/// Used by the decompiler to annotate operands; the dispatch loop derives
/// the same information from the opcode itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// User constant pool (`cv`).
    Const,
    /// Private property name pool (`pp`).
    Private,
    /// Local text pool (`ts`).
    Text,
    /// Template text pool (`tts`).
    Tmpl,
    /// Declaration slot of a frame.
    Decl,
    /// Function descriptor index.
    Func,
    /// Positional argument index.
    Arg,
}

// The single source of truth for the instruction alphabet. Each row carries
// the opcode byte, the enum variant, the mnemonic and the operand shape;
// everything else in this module is generated from the table.
macro_rules! impl_opcodes {
    ($($doc:literal $val:literal $Op:ident $mnemonic:literal $shape:ident)*) => {
        /// Instruction opcode byte of the OX virtual machine.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[doc = $doc]
                $Op = $val,
            )*
        }

        impl Opcode {
            /// Mnemonic used by the decompiler.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$Op => $mnemonic,)*
                }
            }

            /// Operand shape, which fixes the encoded width.
            pub const fn shape(self) -> Shape {
                match self {
                    $(Opcode::$Op => Shape::$shape,)*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = InvalidOpcode;

            fn try_from(b: u8) -> Result<Self, Self::Error> {
                match b {
                    $($val => Ok(Opcode::$Op),)*
                    _ => Err(InvalidOpcode),
                }
            }
        }
    };
}

impl_opcodes! {
    "Copy a register." 0x00 Dup "dup" RegReg
    "Logical not." 0x01 Not "not" RegReg
    "Convert to a number." 0x02 ToNum "to_num" RegReg
    "Bitwise complement." 0x03 Rev "rev" RegReg
    "Arithmetic negation." 0x04 Neg "neg" RegReg
    "Type name of a value." 0x05 TypeOf "typeof" RegReg
    "Test a value against null." 0x06 NotNull "not_null" RegReg
    "Pin a value in the global reference table." 0x07 Global "global" Reg
    "Attach an owned child to the literal under construction." 0x08 Owned "owned" PoolReg
    "Load the innermost literal under construction." 0x09 Curr "curr" Reg
    "Take a pointer to a C value." 0x0a GetPtr "get_ptr" RegReg
    "Read the value a C pointer refers to." 0x0b GetValue "get_value" RegReg
    "Write the value a C pointer refers to." 0x0c SetValue "set_value" RegReg
    "Addition, or string concatenation." 0x0d Add "add" RegRegReg
    "Subtraction." 0x0e Sub "sub" RegRegReg
    "Pattern match via the right operand's `match` method." 0x0f Match "match" RegRegReg
    "Exponentiation." 0x10 Exp "exp" RegRegReg
    "Multiplication." 0x11 Mul "mul" RegRegReg
    "Division." 0x12 Div "div" RegRegReg
    "Remainder." 0x13 Mod "mod" RegRegReg
    "Shift left." 0x14 Shl "shl" RegRegReg
    "Arithmetic shift right." 0x15 Shr "shr" RegRegReg
    "Logical shift right." 0x16 Ushr "ushr" RegRegReg
    "Less than." 0x17 Lt "lt" RegRegReg
    "Greater than." 0x18 Gt "gt" RegRegReg
    "Less than or equal." 0x19 Le "le" RegRegReg
    "Greater than or equal." 0x1a Ge "ge" RegRegReg
    "Instance-of test." 0x1b InstOf "instof" RegRegReg
    "Equality." 0x1c Eq "eq" RegRegReg
    "Inequality." 0x1d Ne "ne" RegRegReg
    "Bitwise and." 0x1e And "and" RegRegReg
    "Bitwise xor." 0x1f Xor "xor" RegRegReg
    "Bitwise or." 0x20 Or "or" RegRegReg
    "Load null." 0x21 LoadNull "load_null" Reg
    "Load true." 0x22 LoadTrue "load_true" Reg
    "Load false." 0x23 LoadFalse "load_false" Reg
    "Load the `this` binding." 0x24 This "this" Reg
    "Load `this` of an enclosing captured frame." 0x25 ThisB "this_b" DepthReg
    "Load the argument vector." 0x26 Argv "argv" Reg
    "Load a user constant." 0x27 GetCv "get_cv" PoolReg
    "Load a private property name." 0x28 GetPp "get_pp" PoolReg
    "Load a localized text string." 0x29 GetLt "get_lt" PoolReg
    "Load a localized template." 0x2a GetLtt "get_ltt" PoolReg
    "Read a local declaration slot." 0x2b GetT "get_t" PoolReg
    "Write a local declaration slot." 0x2c SetT "set_t" PoolReg
    "Write an auto-close declaration slot, closing the prior value." 0x2d SetTAc "set_t_ac" PoolReg
    "Read a declaration slot of an enclosing captured frame." 0x2e GetTB "get_t_b" DepthPoolReg
    "Write a declaration slot of an enclosing captured frame." 0x2f SetTB "set_t_b" DepthPoolReg
    "Write an auto-close slot of an enclosing captured frame." 0x30 SetTBAc "set_t_b_ac" DepthPoolReg
    "Read a global by name; rewrites itself to `get_r` or `get_g`." 0x31 GetN "get_n" PoolReg
    "Read a property of the Global object." 0x32 GetG "get_g" PoolReg
    "Read a root-frame declaration slot." 0x33 GetR "get_r" PoolReg
    "Read a property." 0x34 GetP "get_p" RegRegReg
    "Look a property up through the scope chain." 0x35 LookupP "lookup_p" RegRegReg
    "Write a property." 0x36 SetP "set_p" RegRegReg
    "Read a positional argument." 0x37 GetA "get_a" PoolReg
    "Throw a value." 0x38 Throw "throw" Reg
    "Return a value from the current function." 0x39 Ret "ret" Reg
    "Unconditional jump." 0x3a Jmp "jmp" Label
    "Jump out through enclosing structured blocks." 0x3b DeepJmp "deep_jmp" DepthLabel
    "Jump if truthy." 0x3c Jt "jt" RegLabel
    "Jump if falsy." 0x3d Jf "jf" RegLabel
    "Jump if not null." 0x3e Jnn "jnn" RegLabel
    "Begin building a multipart string." 0x3f StrStart "str_start" Reg
    "Begin building a multipart string with a template function." 0x40 StrStartT "str_start_t" RegReg
    "Append a stringified substitution." 0x41 StrItem "str_item" Reg
    "Append a substitution with a format spec." 0x42 StrItemF "str_item_f" PoolReg
    "Finish the multipart string." 0x43 StrEnd "str_end" Reg
    "Begin a call: callee and receiver." 0x44 CallStart "call_start" RegReg
    "Push a call argument." 0x45 Arg "arg" Reg
    "Push spread arguments from an iterator." 0x46 ArgSpread "arg_spread" Reg
    "Perform the call." 0x47 CallEnd "call_end" Reg
    "Perform the call in tail position, reusing the frame when possible." 0x48 CallEndTail "call_end_tail" Reg
    "Enter a try block." 0x49 TryStart "try_start" LabelLabel
    "Leave the try body towards finally." 0x4a TryEnd "try_end" NoArg
    "Bind the caught error." 0x4b Catch "catch" Reg
    "Leave the catch body towards finally." 0x4c CatchEnd "catch_end" NoArg
    "Finish the finally body and resume the pending outcome." 0x4d Finally "finally" NoArg
    "Yield the processor to other threads." 0x4e Sched "sched" NoArg
    "Enter a sched block." 0x4f SchedStart "sched_start" NoArg
    "Suspend the current fiber with a value." 0x50 Yield "yield" RegReg
    "Pop the top structured-block record." 0x51 SPop "s_pop" NoArg
    "Open an iterator over a value." 0x52 IterStart "iter_start" Reg
    "Fetch the next iterator value or exit the loop." 0x53 IterStep "iter_step" RegLabel
    "Begin an array destructuring." 0x54 ApatStart "apat_start" Reg
    "Skip one array pattern position." 0x55 ApatNext "apat_next" NoArg
    "Read the current array pattern item." 0x56 ApatGet "apat_get" Reg
    "Collect the rest of the array pattern." 0x57 ApatRest "apat_rest" Reg
    "Begin an object destructuring." 0x58 OpatStart "opat_start" Reg
    "Read one object pattern property." 0x59 OpatGet "opat_get" RegReg
    "Collect the unread object pattern properties." 0x5a OpatRest "opat_rest" Reg
    "Create an empty array." 0x5b ANew "a_new" Reg
    "Begin filling an array." 0x5c AStart "a_start" Reg
    "Skip one array position." 0x5d ANext "a_next" NoArg
    "Append an array item." 0x5e AItem "a_item" Reg
    "Append spread items from an iterator." 0x5f ASpread "a_spread" Reg
    "Finish filling the array." 0x60 AEnd "a_end" NoArg
    "Create an empty object." 0x61 ONew "o_new" Reg
    "Begin filling an object." 0x62 OStart "o_start" Reg
    "Set an object property." 0x63 OProp "o_prop" RegReg
    "Copy properties spread from another object." 0x64 OSpread "o_spread" Reg
    "Begin reading positional parameters." 0x65 PStart "p_start" NoArg
    "Read the next positional parameter." 0x66 PGet "p_get" Reg
    "Collect the remaining parameters." 0x67 PRest "p_rest" Reg
    "Create a function value from a descriptor." 0x68 FNew "f_new" PoolReg
    "Create a class and its instance template." 0x69 CNew "c_new" RegReg
    "Add a parent class." 0x6a CParent "c_parent" RegReg
    "Add a constant class member." 0x6b CConst "c_const" RegRegReg
    "Add a variable class member." 0x6c CVar "c_var" RegRegReg
    "Add an accessor class member." 0x6d CAcce "c_acce" RegRegRegReg
    "Add a read-only accessor class member." 0x6e CRoAcce "c_ro_acce" RegRegReg
    "Begin an anonymous enumeration." 0x6f EStart "e_start" Reg
    "Begin a named enumeration." 0x70 EStartN "e_start_n" PoolReg
    "Add an enumeration item." 0x71 EItem "e_item" Pool
    "Begin an anonymous bitfield." 0x72 BStart "b_start" Reg
    "Begin a named bitfield." 0x73 BStartN "b_start_n" PoolReg
    "Add a bitfield item." 0x74 BItem "b_item" Pool
    "Record a value's display name." 0x75 SetName "set_name" RegReg
    "Record a getter's display name." 0x76 SetNameG "set_name_g" RegReg
    "Record a setter's display name." 0x77 SetNameS "set_name_s" RegReg
    "Record a value's enclosing scope." 0x78 SetScope "set_scope" RegReg
    "Raise NullError if a named value is null." 0x79 NameNn "name_nn" PoolReg
    "Raise NullError if a property value is null." 0x7a PropNn "prop_nn" PoolReg
    "Raise NullError if a private property value is null." 0x7b PpropNn "pprop_nn" PoolReg
    "Compiler label stub; never emitted." 0x7c Stub "stub" Label
    "No operation; eliminated by the assembler." 0x7d Nop "nop" NoArg
}

impl Opcode {
    /// Encoded width of an instruction with this opcode, opcode byte
    /// included.
    pub const fn len(self) -> usize {
        self.shape().len()
    }

    /// Which table this opcode's `u16` index operand points into, if it
    /// carries one.
    pub const fn pool_kind(self) -> Option<PoolKind> {
        match self {
            Opcode::Owned
            | Opcode::GetCv
            | Opcode::GetN
            | Opcode::GetG
            | Opcode::StrItemF
            | Opcode::EStartN
            | Opcode::EItem
            | Opcode::BStartN
            | Opcode::BItem
            | Opcode::NameNn
            | Opcode::PropNn => Some(PoolKind::Const),
            Opcode::GetPp | Opcode::PpropNn => Some(PoolKind::Private),
            Opcode::GetLt => Some(PoolKind::Text),
            Opcode::GetLtt => Some(PoolKind::Tmpl),
            Opcode::GetT
            | Opcode::SetT
            | Opcode::SetTAc
            | Opcode::GetTB
            | Opcode::SetTB
            | Opcode::SetTBAc
            | Opcode::GetR => Some(PoolKind::Decl),
            Opcode::FNew => Some(PoolKind::Func),
            Opcode::GetA => Some(PoolKind::Arg),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
