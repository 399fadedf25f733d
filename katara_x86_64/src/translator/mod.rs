//! Lowers register-allocated IR into the x86-64 machine model: one machine
//! func per IR func, a prologue that reserves spill slots below `rbp`, an
//! epilogue every `Return` jumps to, and a straight per-instruction
//! lowering table.

mod movgen;

use std::collections::HashMap;

use thiserror::Error;

use katara_common::atomics::{BoolBinaryOp, IntBinaryOp, IntShiftOp, IntUnaryOp};
use katara_ir::func::Func as IrFunc;
use katara_ir::instr::Instr as IrInstr;
use katara_ir::program::Program as IrProgram;
use katara_ir::types::Type as IrType;
use katara_ir::value::{Const, Value};
use katara_regalloc::{Coloring, NUM_GPR_COLORS};

use crate::block::Block;
use crate::func::Func;
use crate::instr::{CallTarget, Instr};
use crate::ops::{Cond, Imm, Mem, Operand, Reg, Size, ARG_REGS, CALLER_SAVED, RAX, RBP, RCX, RDX, RESULT_REGS, RSP};
use crate::program::Program;

/// Fixed func numbers the translator calls into for heap operations. The
/// driver is responsible for linking real `malloc`/`free` implementations
/// at these numbers before `Program::encode` runs.
pub const RUNTIME_MALLOC_FUNC: i64 = i64::MIN + 1;
pub const RUNTIME_FREE_FUNC: i64 = i64::MIN + 2;

const PROLOGUE_BLOCK: i64 = i64::MIN + 10;
const EPILOGUE_BLOCK: i64 = i64::MIN + 11;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("func @{0} has no entry block")]
    NoEntryBlock(i64),
    #[error("func @{0} block {1} still contains a phi after phi resolution")]
    UnresolvedPhi(i64, i64),
    #[error("a func constant was used outside of a call callee position in func @{0}")]
    FuncConstantOutsideCall(i64),
}

pub fn translate_program(ir: &IrProgram) -> Result<Program, TranslateError> {
    let mut program = Program::new();
    for number in ir.func_numbers() {
        let ir_func = ir.func(number).expect("func_numbers yields only present funcs");
        program.add_func(translate_func(ir_func)?);
    }
    if let Some(entry) = ir.entry_func() {
        program.set_entry_func(entry);
    }
    Ok(program)
}

/// Per-value placement: a register or a fixed stack slot, plus the type
/// that determines its width at every use.
struct Placement<'a> {
    coloring: Coloring,
    types: HashMap<i64, IrType>,
    func_number: i64,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl Placement<'_> {
    fn type_of(&self, value: i64) -> IrType {
        *self.types.get(&value).unwrap_or(&IrType::Int(katara_common::atomics::IntType::I64))
    }

    fn size_of(&self, value: i64) -> Size {
        size_for(self.type_of(value))
    }

    fn operand(&self, value: i64, size: Size) -> Operand {
        match self.coloring.color_of(value) {
            Some(color) if color < NUM_GPR_COLORS => Operand::Reg(Reg::new(color as u8, size)),
            Some(color) => {
                let slot = (color - NUM_GPR_COLORS) as i32 + 1;
                Operand::Mem(Mem::base_disp(Reg::named(RBP), -8 * slot, size))
            }
            None => panic!("value %{value} in func @{} was never colored", self.func_number),
        }
    }
}

fn size_for(ty: IrType) -> Size {
    match ty.size_bytes() {
        1 => Size::S8,
        2 => Size::S16,
        4 => Size::S32,
        _ => Size::S64,
    }
}

fn collect_types(func: &IrFunc) -> HashMap<i64, IrType> {
    let mut types = HashMap::new();
    for (number, ty) in func.args() {
        types.insert(*number, *ty);
    }
    for number in func.block_numbers() {
        let Some(block) = func.block(number) else { continue };
        for instr in block.instrs() {
            for (value, ty) in instr.defs() {
                types.insert(value, ty);
            }
        }
    }
    types
}

fn translate_func(func: &IrFunc) -> Result<Func, TranslateError> {
    let entry = func.entry_block().ok_or(TranslateError::NoEntryBlock(func.number()))?;
    let (_live, graph) = katara_analysis::analyze(func);
    let coloring = katara_regalloc::color::allocate(&graph);
    let placement =
        Placement { coloring, types: collect_types(func), func_number: func.number(), _marker: std::marker::PhantomData };

    let mut out = Func::new(func.number(), func.name());
    out.set_entry_block(PROLOGUE_BLOCK);

    let frame_size = placement.coloring.spill_slot_count() as i64 * 8;
    out.set_frame_size(frame_size);

    let mut prologue = Block::new(PROLOGUE_BLOCK);
    prologue.push(Instr::Push { src: Operand::Reg(Reg::named(RBP)) });
    prologue.push(Instr::Mov { dst: Operand::Reg(Reg::named(RBP)), src: Operand::Reg(Reg::named(RSP)) });
    if frame_size > 0 {
        let aligned = (frame_size + 15) / 16 * 16;
        prologue.push(Instr::Sub {
            dst: Operand::Reg(Reg::named(RSP)),
            src: Operand::Imm(Imm::I32(aligned as i32)),
        });
    }
    for (i, &(arg_num, ty)) in func.args().iter().enumerate() {
        let dst = placement.operand(arg_num, size_for(ty));
        let src = Operand::Reg(Reg::new(ARG_REGS[i], size_for(ty)));
        prologue.push(Instr::Mov { dst, src });
    }
    prologue.push(Instr::Jmp { target: entry });
    out.add_block(prologue);

    let mut epilogue = Block::new(EPILOGUE_BLOCK);
    epilogue.push(Instr::Mov { dst: Operand::Reg(Reg::named(RSP)), src: Operand::Reg(Reg::named(RBP)) });
    epilogue.push(Instr::Pop { dst: Operand::Reg(Reg::named(RBP)) });
    epilogue.push(Instr::Ret);
    out.add_block(epilogue);

    for number in func.block_numbers() {
        let ir_block = func.block(number).expect("block_numbers yields only present blocks");
        if ir_block.phis().next().is_some() {
            return Err(TranslateError::UnresolvedPhi(func.number(), number));
        }
        let mut block = Block::new(number);
        for instr in ir_block.instrs() {
            translate_instr(instr, &placement, &mut block)?;
        }
        out.add_block(block);
    }

    Ok(out)
}

fn translate_value(value: &Value, placement: &Placement, size: Size) -> Result<Operand, TranslateError> {
    match value {
        Value::Constant(Const::Bool(b)) => Ok(Operand::Imm(Imm::I8(*b as i8))),
        Value::Constant(Const::Int(i)) => Ok(Operand::Imm(imm_for(i.as_i64(), size))),
        Value::Constant(Const::NilPointer) => Ok(Operand::Imm(Imm::I64(0))),
        Value::Constant(Const::Func(_)) => Err(TranslateError::FuncConstantOutsideCall(placement.func_number)),
        Value::Computed { number, .. } => Ok(placement.operand(*number, size)),
        Value::InheritedValue { value, .. } => translate_value(value, placement, size),
    }
}

fn imm_for(value: i64, size: Size) -> Imm {
    match size {
        Size::S8 => Imm::I8(value as i8),
        Size::S16 => Imm::I16(value as i16),
        Size::S32 => Imm::I32(value as i32),
        Size::S64 => Imm::I64(value),
    }
}

/// Reduces a source operand that Intel encoding cannot directly reference
/// (memory-to-memory, or an immediate wider than the destination accepts)
/// through `r11`, the translator's one reserved scratch register —
/// `katara_regalloc::color` excludes this color from allocation entirely,
/// so no live value ever ends up colored to it.
const SCRATCH: u8 = 11;

fn stage_if_needed(block: &mut Block, dst: Operand, src: Operand) -> (Operand, Operand) {
    if dst.is_mem() && src.is_mem() {
        let scratch = Reg::new(SCRATCH, src.size());
        block.push(Instr::Mov { dst: Operand::Reg(scratch), src });
        (dst, Operand::Reg(scratch))
    } else {
        (dst, src)
    }
}

fn emit_mov(block: &mut Block, dst: Operand, src: Operand) {
    let (dst, src) = stage_if_needed(block, dst, src);
    block.push(Instr::Mov { dst, src });
}

fn translate_instr(instr: &IrInstr, placement: &Placement, block: &mut Block) -> Result<(), TranslateError> {
    match instr {
        IrInstr::Mov { result, result_ty, arg } => {
            let size = size_for(*result_ty);
            let dst = placement.operand(*result, size);
            let src = translate_value(arg, placement, size)?;
            emit_mov(block, dst, src);
        }
        IrInstr::Phi { .. } => unreachable!("resolved away before translation"),
        IrInstr::Conversion { result, result_ty, arg } => {
            translate_conversion(*result, *result_ty, arg, placement, block)?;
        }
        IrInstr::BoolNot { result, arg } => {
            let dst = placement.operand(*result, Size::S8);
            let src = translate_value(arg, placement, Size::S8)?;
            emit_mov(block, dst, src);
            block.push(Instr::Xor { dst, src: Operand::Imm(Imm::I8(1)) });
        }
        IrInstr::BoolBinary { op, result, args } => {
            translate_bool_binary(*op, *result, args, placement, block)?;
        }
        IrInstr::IntUnary { op, result, arg } => {
            let size = size_for(arg.get_type());
            let dst = placement.operand(*result, size);
            let src = translate_value(arg, placement, size)?;
            emit_mov(block, dst, src);
            match op {
                IntUnaryOp::Neg => block.push(Instr::Neg { dst }),
                IntUnaryOp::Not => block.push(Instr::Not { dst }),
            }
        }
        IrInstr::IntCompare { op, result, args } => {
            let cmp_size = size_for(args[0].get_type());
            let a = translate_value(&args[0], placement, cmp_size)?;
            let b = translate_value(&args[1], placement, cmp_size)?;
            let (a, b) = stage_if_needed(block, a, b);
            block.push(Instr::Cmp { a, b });
            let signed = int_type_of(&args[0]).is_signed();
            let dst = placement.operand(*result, Size::S8);
            let dst_reg = match dst {
                Operand::Reg(r) => r,
                _ => Reg::new(SCRATCH, Size::S8),
            };
            block.push(Instr::Setcc { cond: Cond::from_int_compare(*op, signed), dst: dst_reg });
            if dst != Operand::Reg(dst_reg) {
                emit_mov(block, dst, Operand::Reg(dst_reg));
            }
        }
        IrInstr::IntBinary { op, result, args } => {
            translate_int_binary(*op, *result, args, placement, block)?;
        }
        IrInstr::IntShift { op, result, result_ty, value, count } => {
            translate_shift(*op, *result, *result_ty, value, count, placement, block)?;
        }
        IrInstr::PointerOffset { result, pointer, offset } => {
            let ptr = translate_value(pointer, placement, Size::S64)?;
            let ptr_reg = to_reg(block, ptr, Size::S64);
            let dst = placement.operand(*result, Size::S64);
            match offset {
                Value::Constant(Const::Int(i)) => {
                    let mem = Mem::base_disp(ptr_reg, i.as_i64() as i32, Size::S64);
                    block.push(Instr::Lea { dst: to_reg_dst(dst), src: mem });
                }
                other => {
                    let off = translate_value(other, placement, Size::S64)?;
                    let off_reg = to_reg(block, off, Size::S64);
                    let mem = Mem { base: ptr_reg, index: Some((off_reg, 1)), disp: 0, size: Size::S64 };
                    block.push(Instr::Lea { dst: to_reg_dst(dst), src: mem });
                }
            }
            if let Operand::Mem(_) = dst {
                emit_mov(block, dst, Operand::Reg(to_reg_dst(dst)));
            }
        }
        IrInstr::NilTest { result, pointer } => {
            let ptr = translate_value(pointer, placement, Size::S64)?;
            let ptr_reg = to_reg(block, ptr, Size::S64);
            block.push(Instr::Test { a: Operand::Reg(ptr_reg), b: Operand::Reg(ptr_reg) });
            let dst = placement.operand(*result, Size::S8);
            let dst_reg = match dst {
                Operand::Reg(r) => r,
                _ => Reg::new(SCRATCH, Size::S8),
            };
            block.push(Instr::Setcc { cond: Cond::E, dst: dst_reg });
            if dst != Operand::Reg(dst_reg) {
                emit_mov(block, dst, Operand::Reg(dst_reg));
            }
        }
        IrInstr::Malloc { result, size } => {
            let size_operand = translate_value(size, placement, Size::S64)?;
            emit_mov(block, Operand::Reg(Reg::named(ARG_REGS[0])), size_operand);
            block.push(Instr::Call { target: CallTarget::Func(RUNTIME_MALLOC_FUNC) });
            let dst = placement.operand(*result, Size::S64);
            emit_mov(block, dst, Operand::Reg(Reg::named(RAX)));
        }
        IrInstr::Load { result, result_ty, address } => {
            let size = size_for(*result_ty);
            let addr = translate_value(address, placement, Size::S64)?;
            let addr_reg = to_reg(block, addr, Size::S64);
            let dst = placement.operand(*result, size);
            emit_mov(block, dst, Operand::Mem(Mem::base_disp(addr_reg, 0, size)));
        }
        IrInstr::Store { address, value } => {
            let size = size_for(value.get_type());
            let addr = translate_value(address, placement, Size::S64)?;
            let addr_reg = to_reg(block, addr, Size::S64);
            let src = translate_value(value, placement, size)?;
            emit_mov(block, Operand::Mem(Mem::base_disp(addr_reg, 0, size)), src);
        }
        IrInstr::Free { pointer } => {
            let ptr = translate_value(pointer, placement, Size::S64)?;
            emit_mov(block, Operand::Reg(Reg::named(ARG_REGS[0])), ptr);
            block.push(Instr::Call { target: CallTarget::Func(RUNTIME_FREE_FUNC) });
        }
        IrInstr::Jump { target } => block.push(Instr::Jmp { target: *target }),
        IrInstr::JumpCond { cond, true_target, false_target } => {
            let c = translate_value(cond, placement, Size::S8)?;
            let c_reg = to_reg(block, c, Size::S8);
            block.push(Instr::Test { a: Operand::Reg(c_reg), b: Operand::Reg(c_reg) });
            block.push(Instr::Jcc { cond: Cond::Nz, target: *true_target });
            block.push(Instr::Jmp { target: *false_target });
        }
        IrInstr::Syscall { result, number, args } => {
            let num = translate_value(number, placement, Size::S64)?;
            emit_mov(block, Operand::Reg(Reg::named(RAX)), num);
            const SYSCALL_REGS: [u8; 6] = [crate::ops::RDI, crate::ops::RSI, crate::ops::RDX, 10, crate::ops::R8, crate::ops::R9];
            for (i, arg) in args.iter().enumerate() {
                let v = translate_value(arg, placement, Size::S64)?;
                emit_mov(block, Operand::Reg(Reg::new(SYSCALL_REGS[i], Size::S64)), v);
            }
            block.push(Instr::Syscall);
            if let Some(result) = result {
                let dst = placement.operand(*result, Size::S64);
                emit_mov(block, dst, Operand::Reg(Reg::named(RAX)));
            }
        }
        IrInstr::Call { callee, results, args } => {
            translate_call(callee, results, args, placement, block)?;
        }
        IrInstr::Return { args } => {
            let moves: Result<Vec<(Reg, Operand)>, TranslateError> = args
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    let size = size_for(a.get_type());
                    translate_value(a, placement, size).map(|op| (Reg::new(RESULT_REGS[i], size), op))
                })
                .collect();
            block.extend(movgen::generate_movs(moves?));
            block.push(Instr::Jmp { target: EPILOGUE_BLOCK });
        }
        IrInstr::MakeShared { .. } | IrInstr::CopyShared { .. } | IrInstr::DeleteShared { .. } | IrInstr::UpgradeWeak { .. } => {
            unreachable!("eliminated by shared-pointer lowering before translation")
        }
    }
    Ok(())
}

fn int_type_of(value: &Value) -> katara_common::atomics::IntType {
    match value.get_type() {
        IrType::Int(t) => t,
        _ => katara_common::atomics::IntType::I64,
    }
}

fn to_reg(block: &mut Block, operand: Operand, size: Size) -> Reg {
    match operand {
        Operand::Reg(r) => r,
        other => {
            let scratch = Reg::new(SCRATCH, size);
            block.push(Instr::Mov { dst: Operand::Reg(scratch), src: other });
            scratch
        }
    }
}

/// Like `to_reg`, but forces a move through the scratch register even when
/// `operand` is already a register, if that register is one `excluded`
/// names — used before clobbering a fixed ABI register that the operand
/// might itself already be colored to.
fn to_reg_excluding(block: &mut Block, operand: Operand, size: Size, excluded: &[u8]) -> Reg {
    match operand {
        Operand::Reg(r) if !excluded.contains(&r.encoding) => r,
        other => {
            let scratch = Reg::new(SCRATCH, size);
            block.push(Instr::Mov { dst: Operand::Reg(scratch), src: other });
            scratch
        }
    }
}

fn to_reg_dst(operand: Operand) -> Reg {
    match operand {
        Operand::Reg(r) => r,
        _ => Reg::new(SCRATCH, Size::S64),
    }
}

fn translate_conversion(
    result: i64,
    result_ty: IrType,
    arg: &Value,
    placement: &Placement,
    block: &mut Block,
) -> Result<(), TranslateError> {
    let dst_size = size_for(result_ty);
    let src_size = size_for(arg.get_type());
    let dst = placement.operand(result, dst_size);
    let src = translate_value(arg, placement, src_size)?;

    if dst_size.bits() <= src_size.bits() {
        let narrowed = match src {
            Operand::Reg(r) => Operand::Reg(r.sized(dst_size)),
            Operand::Mem(m) => Operand::Mem(Mem { size: dst_size, ..m }),
            Operand::Imm(imm) => Operand::Imm(imm_for(imm_value(imm), dst_size)),
        };
        emit_mov(block, dst, narrowed);
        return Ok(());
    }

    let dst_reg = to_reg_dst(dst);
    let signed = int_type_of(arg).is_signed();
    match src {
        Operand::Reg(r) => {
            if signed {
                block.push(Instr::MovSx { dst: dst_reg, src: Operand::Reg(r) });
            } else {
                block.push(Instr::MovZx { dst: dst_reg, src: Operand::Reg(r) });
            }
        }
        Operand::Imm(imm) => {
            block.push(Instr::Mov { dst: Operand::Reg(dst_reg), src: Operand::Imm(Imm::I64(imm_value(imm))) });
        }
        Operand::Mem(m) => {
            if signed {
                block.push(Instr::MovSx { dst: dst_reg, src: Operand::Mem(m) });
            } else {
                block.push(Instr::MovZx { dst: dst_reg, src: Operand::Mem(m) });
            }
        }
    }
    if dst != Operand::Reg(dst_reg) {
        emit_mov(block, dst, Operand::Reg(dst_reg));
    }
    Ok(())
}

fn imm_value(imm: Imm) -> i64 {
    match imm {
        Imm::I8(v) => v as i64,
        Imm::I16(v) => v as i64,
        Imm::I32(v) => v as i64,
        Imm::I64(v) => v,
    }
}

fn translate_bool_binary(
    op: BoolBinaryOp,
    result: i64,
    args: &[Value; 2],
    placement: &Placement,
    block: &mut Block,
) -> Result<(), TranslateError> {
    let a = translate_value(&args[0], placement, Size::S8)?;
    let b = translate_value(&args[1], placement, Size::S8)?;
    let dst = placement.operand(result, Size::S8);
    match op {
        BoolBinaryOp::And => {
            emit_mov(block, dst, a);
            let (dst, b) = stage_if_needed(block, dst, b);
            block.push(Instr::And { dst, src: b });
        }
        BoolBinaryOp::Or => {
            emit_mov(block, dst, a);
            let (dst, b) = stage_if_needed(block, dst, b);
            block.push(Instr::Or { dst, src: b });
        }
        BoolBinaryOp::Neq => {
            emit_mov(block, dst, a);
            let (dst, b) = stage_if_needed(block, dst, b);
            block.push(Instr::Xor { dst, src: b });
        }
        BoolBinaryOp::Eq => {
            let (a, b) = stage_if_needed(block, a, b);
            block.push(Instr::Cmp { a, b });
            let dst_reg = to_reg_dst(dst);
            block.push(Instr::Setcc { cond: Cond::E, dst: dst_reg });
            if dst != Operand::Reg(dst_reg) {
                emit_mov(block, dst, Operand::Reg(dst_reg));
            }
        }
    }
    Ok(())
}

fn translate_int_binary(
    op: IntBinaryOp,
    result: i64,
    args: &[Value; 2],
    placement: &Placement,
    block: &mut Block,
) -> Result<(), TranslateError> {
    let size = size_for(args[0].get_type());
    let signed = int_type_of(&args[0]).is_signed();
    let a = translate_value(&args[0], placement, size)?;
    let b = translate_value(&args[1], placement, size)?;
    let dst = placement.operand(result, size);

    match op {
        IntBinaryOp::Mul | IntBinaryOp::Div | IntBinaryOp::Rem => {
            // Stage the divisor before rax/rdx are touched at all, in case
            // the allocator placed it in one of those registers itself.
            let divisor_reg = to_reg_excluding(block, b, size, &[RAX, RDX]);

            let dst_is_rax = matches!(dst, Operand::Reg(r) if r.encoding == RAX);
            let dst_is_rdx = matches!(dst, Operand::Reg(r) if r.encoding == RDX);

            // rax/rdx are clobbered by the op itself; save whatever the
            // allocator placed there, unless the result is headed there
            // anyway (in which case restoring it would just overwrite the
            // result we're about to write).
            if !dst_is_rax {
                block.push(Instr::Push { src: Operand::Reg(Reg::named(RAX)) });
            }
            if !dst_is_rdx {
                block.push(Instr::Push { src: Operand::Reg(Reg::named(RDX)) });
            }

            emit_mov(block, Operand::Reg(Reg::new(RAX, size)), a);
            if signed {
                // Idiv reads rdx:rax as its dividend; a negative value in
                // rax needs rdx filled with the sign bit, not zeroed.
                block.push(Instr::SignExtendDividend { size });
            } else {
                block.push(Instr::Xor {
                    dst: Operand::Reg(Reg::new(RDX, size)),
                    src: Operand::Reg(Reg::new(RDX, size)),
                });
            }
            match op {
                IntBinaryOp::Mul if signed => block.push(Instr::IMul { src: Operand::Reg(divisor_reg) }),
                IntBinaryOp::Mul => block.push(Instr::Mul { src: Operand::Reg(divisor_reg) }),
                IntBinaryOp::Div if signed => block.push(Instr::Idiv { src: Operand::Reg(divisor_reg) }),
                IntBinaryOp::Div => block.push(Instr::Div { src: Operand::Reg(divisor_reg) }),
                IntBinaryOp::Rem if signed => block.push(Instr::Idiv { src: Operand::Reg(divisor_reg) }),
                IntBinaryOp::Rem => block.push(Instr::Div { src: Operand::Reg(divisor_reg) }),
                _ => unreachable!(),
            }
            let result_reg = if matches!(op, IntBinaryOp::Rem) { RDX } else { RAX };
            // Read the result out before the pops below, which only restore
            // the registers we excluded the result from above.
            emit_mov(block, dst, Operand::Reg(Reg::new(result_reg, size)));

            if !dst_is_rdx {
                block.push(Instr::Pop { dst: Operand::Reg(Reg::named(RDX)) });
            }
            if !dst_is_rax {
                block.push(Instr::Pop { dst: Operand::Reg(Reg::named(RAX)) });
            }
        }
        IntBinaryOp::AndNot => {
            let b_reg = to_reg(block, b, size);
            block.push(Instr::Not { dst: Operand::Reg(b_reg) });
            emit_mov(block, dst, a);
            let (dst, b) = stage_if_needed(block, dst, Operand::Reg(b_reg));
            block.push(Instr::And { dst, src: b });
        }
        _ => {
            emit_mov(block, dst, a);
            let (dst, b) = stage_if_needed(block, dst, b);
            match op {
                IntBinaryOp::Add => block.push(Instr::Add { dst, src: b }),
                IntBinaryOp::Sub => block.push(Instr::Sub { dst, src: b }),
                IntBinaryOp::And => block.push(Instr::And { dst, src: b }),
                IntBinaryOp::Or => block.push(Instr::Or { dst, src: b }),
                IntBinaryOp::Xor => block.push(Instr::Xor { dst, src: b }),
                _ => unreachable!(),
            }
        }
    }
    Ok(())
}

fn translate_shift(
    op: IntShiftOp,
    result: i64,
    result_ty: IrType,
    value: &Value,
    count: &Value,
    placement: &Placement,
    block: &mut Block,
) -> Result<(), TranslateError> {
    let size = size_for(result_ty);
    let v = translate_value(value, placement, size)?;
    let c = translate_value(count, placement, Size::S8)?;
    let dst = placement.operand(result, size);
    let dst_is_rcx = matches!(dst, Operand::Reg(r) if r.encoding == RCX);

    // rcx is about to be clobbered to stage a dynamic shift count; preserve
    // whatever the allocator placed there unless the shift's own result is
    // headed there (in which case it's the same register, not a collision).
    if !dst_is_rcx {
        block.push(Instr::Push { src: Operand::Reg(Reg::named(RCX)) });
    }

    emit_mov(block, dst, v);

    let count_operand = match c {
        Operand::Imm(_) => c,
        other => {
            let cl = Reg::new(RCX, Size::S8);
            emit_mov(block, Operand::Reg(cl), other);
            Operand::Reg(cl)
        }
    };

    let signed = int_type_of(value).is_signed();
    match op {
        IntShiftOp::Left => block.push(Instr::Shl { dst, count: count_operand }),
        IntShiftOp::Right if signed => block.push(Instr::Sar { dst, count: count_operand }),
        IntShiftOp::Right => block.push(Instr::Shr { dst, count: count_operand }),
    }

    if !dst_is_rcx {
        block.push(Instr::Pop { dst: Operand::Reg(Reg::named(RCX)) });
    }
    Ok(())
}

fn translate_call(
    callee: &Value,
    results: &[(i64, IrType)],
    args: &[Value],
    placement: &Placement,
    block: &mut Block,
) -> Result<(), TranslateError> {
    // Conservatively save every caller-saved register rather than consulting
    // liveness, except the ones this call's own results are about to land in
    // — saving those would only restore a stale value over the result once
    // it's written out. A result can land in any caller-saved register, not
    // just the fixed rax/rdx ABI slots it arrives in, so both the ABI
    // register and the allocator's actual placement for each result are
    // excluded.
    let excluded_regs: Vec<u8> = results
        .iter()
        .enumerate()
        .flat_map(|(i, &(result, ty))| {
            let size = size_for(ty);
            let placed = match placement.operand(result, size) {
                Operand::Reg(r) => Some(r.encoding),
                _ => None,
            };
            [Some(RESULT_REGS[i]), placed].into_iter().flatten()
        })
        .collect();
    let saved: Vec<Reg> =
        CALLER_SAVED.iter().filter(|&&e| !excluded_regs.contains(&e)).map(|&e| Reg::new(e, Size::S64)).collect();
    for r in &saved {
        block.push(Instr::Push { src: Operand::Reg(*r) });
    }

    let moves: Result<Vec<(Reg, Operand)>, TranslateError> = args
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let size = size_for(a.get_type());
            translate_value(a, placement, size).map(|op| (Reg::new(ARG_REGS[i], size), op))
        })
        .collect();
    block.extend(movgen::generate_movs(moves?));

    let target = match callee {
        Value::Constant(Const::Func(n)) => CallTarget::Func(*n),
        other => {
            let op = translate_value(other, placement, Size::S64)?;
            CallTarget::Operand(op)
        }
    };
    block.push(Instr::Call { target });

    // Results live in rax/rdx; read them out of the fixed ABI registers
    // before the pops below, since the pops only restore the registers we
    // excluded the result registers from above.
    for (i, &(result, ty)) in results.iter().enumerate() {
        let size = size_for(ty);
        let dst = placement.operand(result, size);
        emit_mov(block, dst, Operand::Reg(Reg::new(RESULT_REGS[i], size)));
    }

    for r in saved.iter().rev() {
        block.push(Instr::Pop { dst: Operand::Reg(*r) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_common::atomics::{Int, IntBinaryOp, IntType};
    use katara_ir::block::Block as IrBlock;
    use katara_ir::func::Func as IrFunc;
    use katara_ir::program::Program as IrProgram;
    use katara_ir::value::{Const, Value};

    fn i64_const(v: i64) -> Value {
        Value::constant(Const::Int(Int::from_i64(IntType::I64, v)))
    }

    #[test]
    fn add_two_constants_and_return_translates_and_encodes() {
        let i64_ty = IrType::Int(IntType::I64);
        let mut func = IrFunc::new(0, "add_two", vec![], vec![i64_ty]);
        let mut b = IrBlock::new(0);
        b.push(IrInstr::IntBinary { op: IntBinaryOp::Add, result: 0, args: [i64_const(2), i64_const(3)] });
        b.push(IrInstr::Return { args: vec![Value::computed(i64_ty, 0)] });
        func.add_block(b);
        func.set_entry_block(0);

        let mut program = IrProgram::new();
        program.add_func(func);
        program.set_entry_func(0);

        let machine = translate_program(&program).unwrap();
        let code = machine.encode().unwrap();
        assert!(!code.is_empty());
        // Prologue opens with push rbp; mov rbp, rsp.
        assert_eq!(code[0], 0x55);
    }

    #[test]
    fn branch_on_comparison_result_round_trips_through_encoding() {
        let i64_ty = IrType::Int(IntType::I64);
        let bool_ty = IrType::Bool;
        let mut func = IrFunc::new(0, "max", vec![], vec![i64_ty]);

        let mut entry = IrBlock::new(0);
        entry.push(IrInstr::IntCompare {
            op: katara_common::atomics::IntCompareOp::Gtr,
            result: 0,
            args: [i64_const(10), i64_const(20)],
        });
        entry.push(IrInstr::JumpCond { cond: Value::computed(bool_ty, 0), true_target: 1, false_target: 2 });
        func.add_block(entry);

        let mut then_block = IrBlock::new(1);
        then_block.push(IrInstr::Return { args: vec![i64_const(10)] });
        func.add_block(then_block);

        let mut else_block = IrBlock::new(2);
        else_block.push(IrInstr::Return { args: vec![i64_const(20)] });
        func.add_block(else_block);

        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        func.add_control_flow(0, 2);

        let mut program = IrProgram::new();
        program.add_func(func);
        program.set_entry_func(0);

        let machine = translate_program(&program).unwrap();
        let code = machine.encode().unwrap();
        assert!(code.len() > 10);
    }
}
