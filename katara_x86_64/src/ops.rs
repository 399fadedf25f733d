//! Operands: immediates, registers, and memory references. `Reg::named`
//! constructs the fixed ABI registers by name, and carries a
//! `Size`-reinterpretation method, since the register allocator hands out
//! a bare encoding number that must be widened or narrowed to whatever
//! size an instruction needs.

use std::fmt;

/// Operand width in bits. All 16 GPRs are legal at all four sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    S8,
    S16,
    S32,
    S64,
}

impl Size {
    pub fn bits(self) -> u32 {
        match self {
            Size::S8 => 8,
            Size::S16 => 16,
            Size::S32 => 32,
            Size::S64 => 64,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// A general-purpose register: `encoding` is the 0..15 number colors map to
/// (`rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8..r15`), the same numbering
/// Intel's ModRM/SIB/REX.B fields use directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub encoding: u8,
    pub size: Size,
}

impl Reg {
    pub fn new(encoding: u8, size: Size) -> Self {
        assert!(encoding < 16, "register encoding must fit in 4 bits: {encoding}");
        Self { encoding, size }
    }

    pub fn named(encoding: u8) -> Self {
        Self::new(encoding, Size::S64)
    }

    pub fn sized(self, size: Size) -> Self {
        Self { size, ..self }
    }

    /// Whether encoding this register requires a REX prefix byte (either
    /// because it is one of the extended `r8..r15` registers, or because it
    /// is accessed at 64-bit width).
    pub fn needs_rex(self) -> bool {
        self.encoding >= 8
    }

    /// The 3-bit field value ModRM/SIB/REX embed for this register.
    pub fn field(self) -> u8 {
        self.encoding & 0b111
    }

    /// The REX bit (0 or 1) this register contributes to REX.R/X/B.
    pub fn rex_bit(self) -> u8 {
        (self.encoding >> 3) & 1
    }
}

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RBX: u8 = 3;
pub const RSP: u8 = 4;
pub const RBP: u8 = 5;
pub const RSI: u8 = 6;
pub const RDI: u8 = 7;
pub const R8: u8 = 8;
pub const R9: u8 = 9;
pub const R10: u8 = 10;
pub const R11: u8 = 11;
pub const R12: u8 = 12;
pub const R13: u8 = 13;
pub const R14: u8 = 14;
pub const R15: u8 = 15;

/// System V AMD64 integer argument registers, in order.
pub const ARG_REGS: [u8; 6] = [RDI, RSI, RDX, RCX, R8, R9];
/// The result register for a single-value return; `rdx` joins it for a
/// 128-bit-wide (two-result) return.
pub const RESULT_REGS: [u8; 2] = [RAX, RDX];
/// Caller-saved (volatile) registers, the ones `translator::call` must save
/// across a call if they hold a value still live afterward.
pub const CALLER_SAVED: [u8; 9] = [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11];

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES64: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
            "r15",
        ];
        const NAMES32: [&str; 16] = [
            "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d", "r13d",
            "r14d", "r15d",
        ];
        const NAMES16: [&str; 16] = [
            "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w", "r14w",
            "r15w",
        ];
        const NAMES8: [&str; 16] = [
            "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b",
            "r15b",
        ];
        let name = match self.size {
            Size::S64 => NAMES64[self.encoding as usize],
            Size::S32 => NAMES32[self.encoding as usize],
            Size::S16 => NAMES16[self.encoding as usize],
            Size::S8 => NAMES8[self.encoding as usize],
        };
        write!(f, "{name}")
    }
}

/// A memory operand: `[base + index*scale + disp]`. `index` is absent for a
/// plain base+displacement access (how every stack slot and every pointer
/// dereference in this translator is expressed; `index` exists so a
/// dynamically computed pointer offset can still be addressed directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mem {
    pub base: Reg,
    pub index: Option<(Reg, u8)>,
    pub disp: i32,
    pub size: Size,
}

impl Mem {
    pub fn base_disp(base: Reg, disp: i32, size: Size) -> Self {
        assert!(base.size == Size::S64, "memory base register must be 64-bit");
        Self { base, index: None, disp, size }
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base)?;
        if let Some((index, scale)) = self.index {
            write!(f, " + {index}*{scale}")?;
        }
        if self.disp != 0 {
            write!(f, " {} 0x{:x}", if self.disp < 0 { "-" } else { "+" }, self.disp.unsigned_abs())?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Imm {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

impl Imm {
    pub fn size(self) -> Size {
        match self {
            Imm::I8(_) => Size::S8,
            Imm::I16(_) => Size::S16,
            Imm::I32(_) => Size::S32,
            Imm::I64(_) => Size::S64,
        }
    }

    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Imm::I8(v) => v.to_le_bytes().to_vec(),
            Imm::I16(v) => v.to_le_bytes().to_vec(),
            Imm::I32(v) => v.to_le_bytes().to_vec(),
            Imm::I64(v) => v.to_le_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Imm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Imm::I8(v) => write!(f, "0x{v:x}"),
            Imm::I16(v) => write!(f, "0x{v:x}"),
            Imm::I32(v) => write!(f, "0x{v:x}"),
            Imm::I64(v) => write!(f, "0x{v:x}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Imm(Imm),
    Reg(Reg),
    Mem(Mem),
}

impl Operand {
    pub fn is_imm(self) -> bool {
        matches!(self, Operand::Imm(_))
    }

    pub fn is_reg(self) -> bool {
        matches!(self, Operand::Reg(_))
    }

    pub fn is_mem(self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    pub fn size(self) -> Size {
        match self {
            Operand::Imm(i) => i.size(),
            Operand::Reg(r) => r.size,
            Operand::Mem(m) => m.size,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(i) => write!(f, "{i}"),
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Mem(m) => write!(f, "{m}"),
        }
    }
}

/// Condition codes for `Jcc`/`Setcc`, named after the Intel mnemonic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
    B,
    Be,
    A,
    Ae,
    Z,
    Nz,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::Le => "le",
            Cond::G => "g",
            Cond::Ge => "ge",
            Cond::B => "b",
            Cond::Be => "be",
            Cond::A => "a",
            Cond::Ae => "ae",
            Cond::Z => "z",
            Cond::Nz => "nz",
        };
        write!(f, "{s}")
    }
}

impl Cond {
    /// The 4-bit condition-code field Intel encodes into the low nibble of
    /// `Jcc`/`Setcc` opcodes (`0F 8x` / `0F 9x`).
    pub fn code(self) -> u8 {
        match self {
            Cond::E | Cond::Z => 0x4,
            Cond::Ne | Cond::Nz => 0x5,
            Cond::L => 0xC,
            Cond::Ge => 0xD,
            Cond::Le => 0xE,
            Cond::G => 0xF,
            Cond::B => 0x2,
            Cond::Ae => 0x3,
            Cond::Be => 0x6,
            Cond::A => 0x7,
        }
    }

    /// Maps a typed integer comparison to the condition that tests the same
    /// relation after a `Cmp a, b`, picking the signed or unsigned mnemonic
    /// per the operand's `IntType`.
    pub fn from_int_compare(op: katara_common::atomics::IntCompareOp, signed: bool) -> Cond {
        use katara_common::atomics::IntCompareOp as O;
        match (op, signed) {
            (O::Eq, _) => Cond::E,
            (O::Neq, _) => Cond::Ne,
            (O::Lss, true) => Cond::L,
            (O::Lss, false) => Cond::B,
            (O::Leq, true) => Cond::Le,
            (O::Leq, false) => Cond::Be,
            (O::Geq, true) => Cond::Ge,
            (O::Geq, false) => Cond::Ae,
            (O::Gtr, true) => Cond::G,
            (O::Gtr, false) => Cond::A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_display_follows_size() {
        let rax = Reg::named(RAX);
        assert_eq!(rax.to_string(), "rax");
        assert_eq!(rax.sized(Size::S32).to_string(), "eax");
        assert_eq!(Reg::named(R8).sized(Size::S8).to_string(), "r8b");
    }

    #[test]
    fn extended_registers_need_rex() {
        assert!(!Reg::named(RDI).needs_rex());
        assert!(Reg::named(R15).needs_rex());
    }

    #[test]
    fn signed_and_unsigned_less_than_pick_different_conditions() {
        use katara_common::atomics::IntCompareOp;
        assert_eq!(Cond::from_int_compare(IntCompareOp::Lss, true), Cond::L);
        assert_eq!(Cond::from_int_compare(IntCompareOp::Lss, false), Cond::B);
    }
}
