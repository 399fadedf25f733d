//! The x86-64 instruction set this backend emits: a tagged enum (see
//! DESIGN.md for the Rust-idiom rationale) where every variant exposes the
//! same two operations: `encode` writes Intel SDM-conformant bytes through
//! a `Linker`, `Display` renders an assembly line for debug dumps.

use std::fmt;

use crate::encode;
use crate::linker::{Linker, RelocationTarget};
use crate::ops::{Cond, Mem, Operand, Reg, Size};

/// Either a statically known func (resolved by the linker to its eventual
/// code offset) or a computed callee value already materialized into a
/// register/memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Func(i64),
    Operand(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Mov { dst: Operand, src: Operand },
    MovSx { dst: Reg, src: Operand },
    MovZx { dst: Reg, src: Operand },
    Xchg { a: Operand, b: Reg },
    Push { src: Operand },
    Pop { dst: Operand },
    Lea { dst: Reg, src: Mem },

    Add { dst: Operand, src: Operand },
    Sub { dst: Operand, src: Operand },
    And { dst: Operand, src: Operand },
    Or { dst: Operand, src: Operand },
    Xor { dst: Operand, src: Operand },
    Cmp { a: Operand, b: Operand },
    Test { a: Operand, b: Operand },

    /// Unsigned multiply: `rdx:rax = rax * src`.
    Mul { src: Operand },
    /// Signed multiply: `rdx:rax = rax * src`.
    IMul { src: Operand },
    /// Unsigned divide: `rax, rdx = rdx:rax / src, rdx:rax % src`.
    Div { src: Operand },
    /// Signed divide, same register contract as `Div`.
    Idiv { src: Operand },
    /// Sign-extends the dividend ahead of a signed divide: `cbw` (al into
    /// ax) at 8-bit width, `cwd`/`cdq`/`cqo` (ax/eax/rax into dx:ax/edx:eax/
    /// rdx:rax) otherwise. `Idiv` reads the extended half as part of its
    /// implicit dividend, so this must run first or a negative dividend
    /// divides wrong.
    SignExtendDividend { size: Size },
    Neg { dst: Operand },
    Not { dst: Operand },

    Shl { dst: Operand, count: Operand },
    Shr { dst: Operand, count: Operand },
    Sar { dst: Operand, count: Operand },

    Setcc { cond: Cond, dst: Reg },

    Jmp { target: i64 },
    Jcc { cond: Cond, target: i64 },
    Call { target: CallTarget },
    Ret,
    Syscall,
}

const ADD_REG_FIELD: u8 = 0;
const OR_REG_FIELD: u8 = 1;
const AND_REG_FIELD: u8 = 4;
const SUB_REG_FIELD: u8 = 5;
const XOR_REG_FIELD: u8 = 6;
const CMP_REG_FIELD: u8 = 7;

impl Instr {
    /// `func` is the number of the func currently being laid out, needed so
    /// a `Jmp`/`Jcc` to a local block number can be turned into a
    /// `RelocationTarget::Block(func, target)`.
    pub fn encode(&self, linker: &mut Linker, func: i64) {
        match self {
            Instr::Mov { dst, src } => encode_mov(linker, *dst, *src),
            Instr::MovSx { dst, src } => encode_move_extend(linker, *dst, *src, true),
            Instr::MovZx { dst, src } => encode_move_extend(linker, *dst, *src, false),
            Instr::Xchg { a, b } => encode_xchg(linker, *a, *b),
            Instr::Push { src } => encode_push(linker, *src),
            Instr::Pop { dst } => encode_pop(linker, *dst),
            Instr::Lea { dst, src } => encode_lea(linker, *dst, *src),
            Instr::Add { dst, src } => encode_alu(linker, ADD_REG_FIELD, *dst, *src),
            Instr::Or { dst, src } => encode_alu(linker, OR_REG_FIELD, *dst, *src),
            Instr::And { dst, src } => encode_alu(linker, AND_REG_FIELD, *dst, *src),
            Instr::Sub { dst, src } => encode_alu(linker, SUB_REG_FIELD, *dst, *src),
            Instr::Xor { dst, src } => encode_alu(linker, XOR_REG_FIELD, *dst, *src),
            Instr::Cmp { a, b } => encode_alu(linker, CMP_REG_FIELD, *a, *b),
            Instr::Test { a, b } => encode_test(linker, *a, *b),
            Instr::Mul { src } => encode_group3(linker, 4, *src),
            Instr::IMul { src } => encode_group3(linker, 5, *src),
            Instr::Div { src } => encode_group3(linker, 6, *src),
            Instr::Idiv { src } => encode_group3(linker, 7, *src),
            Instr::SignExtendDividend { size } => encode_sign_extend_dividend(linker, *size),
            Instr::Neg { dst } => encode_group3(linker, 3, *dst),
            Instr::Not { dst } => encode_group3(linker, 2, *dst),
            Instr::Shl { dst, count } => encode_shift(linker, 4, *dst, *count),
            Instr::Shr { dst, count } => encode_shift(linker, 5, *dst, *count),
            Instr::Sar { dst, count } => encode_shift(linker, 7, *dst, *count),
            Instr::Setcc { cond, dst } => encode_setcc(linker, *cond, *dst),
            Instr::Jmp { target } => encode_jmp(linker, func, *target),
            Instr::Jcc { cond, target } => encode_jcc(linker, *cond, func, *target),
            Instr::Call { target } => encode_call(linker, *target),
            Instr::Ret => linker.emit(&[0xC3]),
            Instr::Syscall => linker.emit(&[0x0F, 0x05]),
        }
    }
}

fn raw_imm(imm: crate::ops::Imm) -> i64 {
    match imm {
        crate::ops::Imm::I8(v) => v as i64,
        crate::ops::Imm::I16(v) => v as i64,
        crate::ops::Imm::I32(v) => v as i64,
        crate::ops::Imm::I64(v) => v,
    }
}

fn smaller(a: Size, b: Size) -> Size {
    if a.bits() < b.bits() {
        a
    } else {
        b
    }
}

fn encode_mov(linker: &mut Linker, dst: Operand, src: Operand) {
    match (dst, src) {
        (Operand::Reg(d), Operand::Reg(s)) => {
            encode::emit_operand_size_prefix(linker.buf(), d.size);
            encode::emit_rex(linker.buf(), d.size, s, Operand::Reg(d));
            linker.emit(&[0x89]);
            encode::emit_modrm_sib_disp(linker.buf(), s.field(), Operand::Reg(d));
        }
        (Operand::Mem(m), Operand::Reg(s)) => {
            encode::emit_operand_size_prefix(linker.buf(), m.size);
            encode::emit_rex(linker.buf(), m.size, s, Operand::Mem(m));
            linker.emit(&[0x89]);
            encode::emit_modrm_sib_disp(linker.buf(), s.field(), Operand::Mem(m));
        }
        (Operand::Reg(d), Operand::Mem(m)) => {
            encode::emit_operand_size_prefix(linker.buf(), d.size);
            encode::emit_rex(linker.buf(), d.size, d, Operand::Mem(m));
            linker.emit(&[0x8B]);
            encode::emit_modrm_sib_disp(linker.buf(), d.field(), Operand::Mem(m));
        }
        (Operand::Reg(d), Operand::Imm(imm)) => {
            encode::emit_operand_size_prefix(linker.buf(), d.size);
            encode::emit_rex(linker.buf(), d.size, Reg::named(0), Operand::Reg(d));
            if d.size == Size::S64 {
                linker.emit(&[0xB8 + d.field()]);
                linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), Size::S64));
            } else {
                linker.emit(&[0xC7]);
                encode::emit_modrm_sib_disp(linker.buf(), 0, Operand::Reg(d));
                linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), smaller(d.size, Size::S32)));
            }
        }
        (Operand::Mem(m), Operand::Imm(imm)) => {
            encode::emit_operand_size_prefix(linker.buf(), m.size);
            encode::emit_rex(linker.buf(), m.size, Reg::named(0), Operand::Mem(m));
            linker.emit(&[0xC7]);
            encode::emit_modrm_sib_disp(linker.buf(), 0, Operand::Mem(m));
            linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), smaller(m.size, Size::S32)));
        }
        (Operand::Mem(_), Operand::Mem(_)) => {
            panic!("memory-to-memory Mov must be staged through a scratch register by the caller")
        }
        (Operand::Imm(_), _) => panic!("an immediate is never a Mov destination"),
    }
}

fn encode_move_extend(linker: &mut Linker, dst: Reg, src: Operand, signed: bool) {
    let src_size = src.size();
    encode::emit_rex(linker.buf(), dst.size, dst, src);
    match (signed, src_size) {
        (true, Size::S32) => linker.emit(&[0x63]),
        (true, Size::S8) => linker.emit(&[0x0F, 0xBE]),
        (true, Size::S16) => linker.emit(&[0x0F, 0xBF]),
        (false, Size::S8) => linker.emit(&[0x0F, 0xB6]),
        (false, Size::S16) => linker.emit(&[0x0F, 0xB7]),
        _ => panic!("unsupported move-extend source size {src_size:?}"),
    }
    encode::emit_modrm_sib_disp(linker.buf(), dst.field(), src);
}

fn encode_xchg(linker: &mut Linker, a: Operand, b: Reg) {
    encode::emit_rex(linker.buf(), b.size, b, a);
    linker.emit(&[0x87]);
    encode::emit_modrm_sib_disp(linker.buf(), b.field(), a);
}

fn encode_push(linker: &mut Linker, src: Operand) {
    match src {
        Operand::Reg(r) => {
            if r.needs_rex() {
                linker.emit(&[encode::rex(false, false, false, true)]);
            }
            linker.emit(&[0x50 + r.field()]);
        }
        Operand::Mem(m) => {
            linker.emit(&[0xFF]);
            encode::emit_modrm_sib_disp(linker.buf(), 6, Operand::Mem(m));
        }
        Operand::Imm(imm) => {
            linker.emit(&[0x68]);
            linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), Size::S32));
        }
    }
}

fn encode_pop(linker: &mut Linker, dst: Operand) {
    match dst {
        Operand::Reg(r) => {
            if r.needs_rex() {
                linker.emit(&[encode::rex(false, false, false, true)]);
            }
            linker.emit(&[0x58 + r.field()]);
        }
        Operand::Mem(m) => {
            linker.emit(&[0x8F]);
            encode::emit_modrm_sib_disp(linker.buf(), 0, Operand::Mem(m));
        }
        Operand::Imm(_) => panic!("an immediate is never a Pop destination"),
    }
}

fn encode_lea(linker: &mut Linker, dst: Reg, src: Mem) {
    encode::emit_rex(linker.buf(), dst.size, dst, Operand::Mem(src));
    linker.emit(&[0x8D]);
    encode::emit_modrm_sib_disp(linker.buf(), dst.field(), Operand::Mem(src));
}

fn encode_alu(linker: &mut Linker, reg_field: u8, dst: Operand, src: Operand) {
    let size = dst.size();
    encode::emit_operand_size_prefix(linker.buf(), size);
    match (dst, src) {
        (Operand::Reg(d), Operand::Reg(s)) => {
            encode::emit_rex(linker.buf(), size, s, Operand::Reg(d));
            linker.emit(&[if size == Size::S8 { 0x00 } else { 0x01 } + reg_field * 8]);
            encode::emit_modrm_sib_disp(linker.buf(), s.field(), Operand::Reg(d));
        }
        (Operand::Mem(m), Operand::Reg(s)) => {
            encode::emit_rex(linker.buf(), size, s, Operand::Mem(m));
            linker.emit(&[if size == Size::S8 { 0x00 } else { 0x01 } + reg_field * 8]);
            encode::emit_modrm_sib_disp(linker.buf(), s.field(), Operand::Mem(m));
        }
        (Operand::Reg(d), Operand::Mem(m)) => {
            encode::emit_rex(linker.buf(), size, d, Operand::Mem(m));
            linker.emit(&[if size == Size::S8 { 0x02 } else { 0x03 } + reg_field * 8]);
            encode::emit_modrm_sib_disp(linker.buf(), d.field(), Operand::Mem(m));
        }
        (dst_rm, Operand::Imm(imm)) => {
            encode::emit_rex(linker.buf(), size, Reg::named(0), dst_rm);
            let value = raw_imm(imm);
            if size != Size::S8 && i8::try_from(value).is_ok() {
                linker.emit(&[0x83]);
                encode::emit_modrm_sib_disp(linker.buf(), reg_field, dst_rm);
                linker.emit(&encode::imm_bytes_for_size(value, Size::S8));
            } else {
                linker.emit(&[if size == Size::S8 { 0x80 } else { 0x81 }]);
                encode::emit_modrm_sib_disp(linker.buf(), reg_field, dst_rm);
                linker.emit(&encode::imm_bytes_for_size(value, smaller(size, Size::S32)));
            }
        }
        (Operand::Mem(_), Operand::Mem(_)) => {
            unreachable!("mem-to-mem ALU operands are staged through a register before encoding")
        }
        (Operand::Imm(_), _) => panic!("an immediate is never an ALU destination"),
    }
}

fn encode_test(linker: &mut Linker, a: Operand, b: Operand) {
    let size = a.size();
    encode::emit_operand_size_prefix(linker.buf(), size);
    match (a, b) {
        (Operand::Reg(r1), Operand::Reg(r2)) => {
            encode::emit_rex(linker.buf(), size, r2, Operand::Reg(r1));
            linker.emit(&[if size == Size::S8 { 0x84 } else { 0x85 }]);
            encode::emit_modrm_sib_disp(linker.buf(), r2.field(), Operand::Reg(r1));
        }
        (rm, Operand::Imm(imm)) => {
            encode::emit_rex(linker.buf(), size, Reg::named(0), rm);
            linker.emit(&[if size == Size::S8 { 0xF6 } else { 0xF7 }]);
            encode::emit_modrm_sib_disp(linker.buf(), 0, rm);
            linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), smaller(size, Size::S32)));
        }
        (Operand::Mem(m), Operand::Reg(r)) => {
            encode::emit_rex(linker.buf(), size, r, Operand::Mem(m));
            linker.emit(&[if size == Size::S8 { 0x84 } else { 0x85 }]);
            encode::emit_modrm_sib_disp(linker.buf(), r.field(), Operand::Mem(m));
        }
        (Operand::Reg(r), Operand::Mem(m)) => {
            encode::emit_rex(linker.buf(), size, r, Operand::Mem(m));
            linker.emit(&[if size == Size::S8 { 0x84 } else { 0x85 }]);
            encode::emit_modrm_sib_disp(linker.buf(), r.field(), Operand::Mem(m));
        }
        (Operand::Mem(_), Operand::Mem(_)) => {
            unreachable!("mem-to-mem Test operands are staged through a register before encoding")
        }
        (Operand::Imm(_), _) => panic!("an immediate is never Test's first operand"),
    }
}

/// Group-3/F7 single-operand opcodes: Not(2), Neg(3), Mul(4), IMul(5),
/// Div(6), Idiv(7).
fn encode_group3(linker: &mut Linker, reg_field: u8, operand: Operand) {
    let size = operand.size();
    encode::emit_operand_size_prefix(linker.buf(), size);
    encode::emit_rex(linker.buf(), size, Reg::named(0), operand);
    linker.emit(&[if size == Size::S8 { 0xF6 } else { 0xF7 }]);
    encode::emit_modrm_sib_disp(linker.buf(), reg_field, operand);
}

/// `cbw`/`cwd`/`cdq`/`cqo`, selected by operand size. `cbw` sign-extends al
/// into ax; the other three sign-extend ax/eax/rax into dx:ax/edx:eax/
/// rdx:rax, which is the 0x99 opcode under the 16-bit operand-size prefix,
/// REX.W, or neither, respectively.
fn encode_sign_extend_dividend(linker: &mut Linker, size: Size) {
    match size {
        Size::S8 => linker.emit(&[0x98]),
        Size::S16 => linker.emit(&[0x66, 0x99]),
        Size::S32 => linker.emit(&[0x99]),
        Size::S64 => linker.emit(&[encode::rex(true, false, false, false), 0x99]),
    }
}

/// Group-2 shift opcodes: `dst <<= count`-shaped instructions, reg_field
/// selects Shl(4)/Shr(5)/Sar(7). `count` must already be `cl` or an
/// immediate by the time this runs — the translator's job, not the
/// encoder's.
fn encode_shift(linker: &mut Linker, reg_field: u8, dst: Operand, count: Operand) {
    let size = dst.size();
    encode::emit_operand_size_prefix(linker.buf(), size);
    encode::emit_rex(linker.buf(), size, Reg::named(0), dst);
    match count {
        Operand::Imm(crate::ops::Imm::I8(1)) => {
            linker.emit(&[if size == Size::S8 { 0xD0 } else { 0xD1 }]);
            encode::emit_modrm_sib_disp(linker.buf(), reg_field, dst);
        }
        Operand::Imm(imm) => {
            linker.emit(&[if size == Size::S8 { 0xC0 } else { 0xC1 }]);
            encode::emit_modrm_sib_disp(linker.buf(), reg_field, dst);
            linker.emit(&encode::imm_bytes_for_size(raw_imm(imm), Size::S8));
        }
        Operand::Reg(_) => {
            linker.emit(&[if size == Size::S8 { 0xD2 } else { 0xD3 }]);
            encode::emit_modrm_sib_disp(linker.buf(), reg_field, dst);
        }
        Operand::Mem(_) => panic!("shift count must be an immediate or cl, never memory"),
    }
}

fn encode_setcc(linker: &mut Linker, cond: Cond, dst: Reg) {
    let dst8 = dst.sized(Size::S8);
    encode::emit_rex(linker.buf(), Size::S8, Reg::named(0), Operand::Reg(dst8));
    linker.emit(&[0x0F, 0x90 + cond.code()]);
    encode::emit_modrm_sib_disp(linker.buf(), 0, Operand::Reg(dst8));
}

fn encode_jmp(linker: &mut Linker, func: i64, target: i64) {
    linker.emit(&[0xE9]);
    linker.emit_rel32_placeholder(RelocationTarget::Block(func, target));
}

fn encode_jcc(linker: &mut Linker, cond: Cond, func: i64, target: i64) {
    linker.emit(&[0x0F, 0x80 + cond.code()]);
    linker.emit_rel32_placeholder(RelocationTarget::Block(func, target));
}

fn encode_call(linker: &mut Linker, target: CallTarget) {
    match target {
        CallTarget::Func(func_num) => {
            linker.emit(&[0xE8]);
            linker.emit_rel32_placeholder(RelocationTarget::Func(func_num));
        }
        CallTarget::Operand(operand) => {
            encode::emit_rex(linker.buf(), Size::S64, Reg::named(0), operand);
            linker.emit(&[0xFF]);
            encode::emit_modrm_sib_disp(linker.buf(), 2, operand);
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Mov { dst, src } => write!(f, "mov {dst}, {src}"),
            Instr::MovSx { dst, src } => write!(f, "movsx {dst}, {src}"),
            Instr::MovZx { dst, src } => write!(f, "movzx {dst}, {src}"),
            Instr::Xchg { a, b } => write!(f, "xchg {a}, {b}"),
            Instr::Push { src } => write!(f, "push {src}"),
            Instr::Pop { dst } => write!(f, "pop {dst}"),
            Instr::Lea { dst, src } => write!(f, "lea {dst}, {src}"),
            Instr::Add { dst, src } => write!(f, "add {dst}, {src}"),
            Instr::Sub { dst, src } => write!(f, "sub {dst}, {src}"),
            Instr::And { dst, src } => write!(f, "and {dst}, {src}"),
            Instr::Or { dst, src } => write!(f, "or {dst}, {src}"),
            Instr::Xor { dst, src } => write!(f, "xor {dst}, {src}"),
            Instr::Cmp { a, b } => write!(f, "cmp {a}, {b}"),
            Instr::Test { a, b } => write!(f, "test {a}, {b}"),
            Instr::Mul { src } => write!(f, "mul {src}"),
            Instr::IMul { src } => write!(f, "imul {src}"),
            Instr::Div { src } => write!(f, "div {src}"),
            Instr::Idiv { src } => write!(f, "idiv {src}"),
            Instr::SignExtendDividend { size: Size::S8 } => write!(f, "cbw"),
            Instr::SignExtendDividend { size: Size::S16 } => write!(f, "cwd"),
            Instr::SignExtendDividend { size: Size::S32 } => write!(f, "cdq"),
            Instr::SignExtendDividend { size: Size::S64 } => write!(f, "cqo"),
            Instr::Neg { dst } => write!(f, "neg {dst}"),
            Instr::Not { dst } => write!(f, "not {dst}"),
            Instr::Shl { dst, count } => write!(f, "shl {dst}, {count}"),
            Instr::Shr { dst, count } => write!(f, "shr {dst}, {count}"),
            Instr::Sar { dst, count } => write!(f, "sar {dst}, {count}"),
            Instr::Setcc { cond, dst } => write!(f, "set{cond} {dst}"),
            Instr::Jmp { target } => write!(f, "jmp {{{target}}}"),
            Instr::Jcc { cond, target } => write!(f, "j{cond} {{{target}}}"),
            Instr::Call { target: CallTarget::Func(n) } => write!(f, "call @{n}"),
            Instr::Call { target: CallTarget::Operand(o) } => write!(f, "call {o}"),
            Instr::Ret => write!(f, "ret"),
            Instr::Syscall => write!(f, "syscall"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Imm, Reg, Size, RAX, RCX};

    #[test]
    fn ret_encodes_to_single_byte() {
        let mut linker = Linker::new();
        Instr::Ret.encode(&mut linker, 0);
        assert_eq!(linker.into_code().unwrap(), vec![0xC3]);
    }

    #[test]
    fn mov_reg_imm64_uses_b8_plus_reg_form() {
        let mut linker = Linker::new();
        let instr = Instr::Mov { dst: Operand::Reg(Reg::named(RAX)), src: Operand::Imm(Imm::I64(42)) };
        instr.encode(&mut linker, 0);
        let code = linker.into_code().unwrap();
        assert_eq!(code[0], 0x48); // REX.W
        assert_eq!(code[1], 0xB8); // mov rax, imm64
        assert_eq!(i64::from_le_bytes(code[2..10].try_into().unwrap()), 42);
    }

    #[test]
    fn add_reg_reg_display_matches_mnemonic() {
        let instr = Instr::Add {
            dst: Operand::Reg(Reg::named(RAX).sized(Size::S32)),
            src: Operand::Reg(Reg::named(RCX).sized(Size::S32)),
        };
        assert_eq!(instr.to_string(), "add eax, ecx");
    }

    #[test]
    fn jmp_emits_relocation_resolved_by_linker() {
        let mut linker = Linker::new();
        linker.mark_func_start(0);
        Instr::Jmp { target: 1 }.encode(&mut linker, 0);
        linker.mark_block_start(0, 1);
        Instr::Ret.encode(&mut linker, 0);
        let code = linker.into_code().unwrap();
        assert_eq!(code[0], 0xE9);
        let disp = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(disp, 0);
    }
}
