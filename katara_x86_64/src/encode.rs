//! Shared Intel SDM encoding helpers: REX prefix selection, ModR/M, SIB, and
//! displacement/immediate emission. `instr.rs`'s `Instr::encode` calls into
//! these rather than hand-rolling byte layout per instruction, since this
//! IR's `Instr` is one enum sharing a handful of addressing-mode shapes,
//! not a family of unrelated instruction types.

use crate::ops::{Mem, Operand, Reg, Size};

/// `0100WRXB`: REX.W forces 64-bit width, REX.R/X/B extend ModRM.reg /
/// SIB.index / ModRM.rm (or SIB.base) past bit 3.
pub fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
}

/// Whether a REX prefix is required at all: 64-bit width, any extended
/// register, or one of the byte registers (`spl`/`bpl`/`sil`/`dil`) that
/// only exist when a REX prefix is present.
pub fn needs_rex_prefix(size: Size, regs: &[Reg]) -> bool {
    size == Size::S64
        || regs.iter().any(|r| r.needs_rex())
        || (size == Size::S8 && regs.iter().any(|r| matches!(r.encoding, 4..=7)))
}

/// Emits a REX prefix (if required) for an instruction whose ModRM.reg field
/// is `reg_field` and whose rm operand is `rm`.
pub fn emit_rex(out: &mut Vec<u8>, size: Size, reg_field: Reg, rm: Operand) {
    let rm_reg = match rm {
        Operand::Reg(r) => Some(r),
        Operand::Mem(m) => Some(m.base),
        Operand::Imm(_) => None,
    };
    let index_reg = match rm {
        Operand::Mem(m) => m.index.map(|(r, _)| r),
        _ => None,
    };
    let mut regs = vec![reg_field];
    if let Some(r) = rm_reg {
        regs.push(r);
    }
    if let Some(r) = index_reg {
        regs.push(r);
    }
    if needs_rex_prefix(size, &regs) {
        let w = size == Size::S64;
        let r = reg_field.rex_bit() == 1;
        let x = index_reg.is_some_and(|r| r.rex_bit() == 1);
        let b = rm_reg.is_some_and(|r| r.rex_bit() == 1);
        out.push(rex(w, r, x, b));
    }
}

/// A 0x66 operand-size-override prefix is needed for 16-bit operations.
pub fn emit_operand_size_prefix(out: &mut Vec<u8>, size: Size) {
    if size == Size::S16 {
        out.push(0x66);
    }
}

/// ModRM + SIB + displacement for `rm` against ModRM.reg field `reg_field`.
pub fn emit_modrm_sib_disp(out: &mut Vec<u8>, reg_field: u8, rm: Operand) {
    match rm {
        Operand::Reg(r) => {
            out.push(modrm(0b11, reg_field, r.field()));
        }
        Operand::Mem(m) => emit_mem(out, reg_field, m),
        Operand::Imm(_) => unreachable!("an immediate is never a ModRM rm operand"),
    }
}

pub fn modrm(md: u8, reg: u8, rm: u8) -> u8 {
    (md << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

fn emit_mem(out: &mut Vec<u8>, reg_field: u8, mem: Mem) {
    let base_field = mem.base.field();
    let needs_sib = base_field == 0b100 || mem.index.is_some();
    // mod=00 with rm=101 is the RIP-relative escape, not [rbp]/[r13], so a
    // zero displacement on one of those bases still needs an explicit disp8.
    let rbp_like_base_needs_explicit_disp = base_field == 0b101 && mem.disp == 0;

    let md = if mem.disp == 0 && !rbp_like_base_needs_explicit_disp {
        0b00
    } else if i8::try_from(mem.disp).is_ok() {
        0b01
    } else {
        0b10
    };

    let rm_field = if needs_sib { 0b100 } else { base_field };
    out.push(modrm(md, reg_field, rm_field));

    if needs_sib {
        let (index_field, scale_bits) = match mem.index {
            Some((idx, scale)) => (idx.field(), scale_bits(scale)),
            None => (0b100, 0), // no index
        };
        out.push((scale_bits << 6) | (index_field << 3) | base_field);
    }

    if md == 0b01 {
        out.push(mem.disp as i8 as u8);
    } else if md == 0b10 {
        out.extend_from_slice(&mem.disp.to_le_bytes());
    }
}

fn scale_bits(scale: u8) -> u8 {
    match scale {
        1 => 0b00,
        2 => 0b01,
        4 => 0b10,
        8 => 0b11,
        other => panic!("invalid SIB scale: {other}"),
    }
}

/// Truncates/sign-extends `value` to the bytes `size` needs, matching how a
/// sized immediate operand is actually encoded (`Imm::I32`'s 4 bytes for a
/// 64-bit `Mov`'s sign-extended-immediate form, for instance).
pub fn imm_bytes_for_size(value: i64, size: Size) -> Vec<u8> {
    match size {
        Size::S8 => (value as i8).to_le_bytes().to_vec(),
        Size::S16 => (value as i16).to_le_bytes().to_vec(),
        Size::S32 => (value as i32).to_le_bytes().to_vec(),
        Size::S64 => value.to_le_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Reg, RAX, RBP, RSP, R12};

    #[test]
    fn rex_w_bit_set_for_64_bit_register_to_register() {
        let mut out = Vec::new();
        emit_rex(&mut out, Size::S64, Reg::named(RAX), Operand::Reg(Reg::named(RAX)));
        assert_eq!(out, vec![rex(true, false, false, false)]);
    }

    #[test]
    fn no_rex_for_32_bit_low_registers() {
        let mut out = Vec::new();
        emit_rex(&mut out, Size::S32, Reg::named(RAX), Operand::Reg(Reg::named(RAX)));
        assert!(out.is_empty());
    }

    #[test]
    fn rsp_base_requires_sib_byte() {
        let mut out = Vec::new();
        let mem = Mem::base_disp(Reg::named(RSP), 0, Size::S64);
        emit_modrm_sib_disp(&mut out, 0, Operand::Mem(mem));
        // ModRM(mod=00, reg=0, rm=100) then a SIB byte.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0] & 0b111, 0b100);
    }

    #[test]
    fn rbp_base_with_zero_disp_avoids_mod00_rip_relative_escape() {
        let mut out = Vec::new();
        let mem = Mem::base_disp(Reg::named(RBP), 0, Size::S64);
        emit_modrm_sib_disp(&mut out, 0, Operand::Mem(mem));
        // mod=00 with rm=101 means RIP-relative, not [rbp], so a zero
        // displacement on rbp still needs an explicit disp8 byte: mod=01,
        // one byte of displacement.
        assert_eq!(out.len(), 1 + 1);
        assert_eq!(out[0] >> 6, 0b01);
        assert_eq!(out[1], 0);
    }

    #[test]
    fn extended_base_register_sets_rex_b() {
        let mut out = Vec::new();
        emit_rex(&mut out, Size::S64, Reg::named(RAX), Operand::Reg(Reg::named(R12)));
        assert_eq!(out, vec![rex(true, false, false, true)]);
    }
}
