//! Lowers the high-level shared-pointer operations (`MakeShared`,
//! `CopyShared`, `DeleteShared`, `UpgradeWeak`) into the low-level
//! malloc/load/store/free instructions that `katara_analysis` and
//! `katara_x86_64` operate on. Runs once per func, before liveness analysis.
//!
//! A control block sits at the pointer handed out minus 16 bytes: an `i64`
//! strong count at offset 0, an `i64` weak count at offset 8, and the
//! payload starting at offset 16. The payload is freed once the strong count
//! reaches zero; the control block itself is freed once both counts reach
//! zero, so a live weak pointer keeps the header (but not the payload)
//! allocated after the last strong reference drops.

use std::collections::VecDeque;

use katara_common::atomics::{IntBinaryOp, IntCompareOp, IntType, Int};
use katara_ir::block::Block;
use katara_ir::func::Func;
use katara_ir::instr::{Instr, SharedPtrKind};
use katara_ir::program::Program;
use katara_ir::types::Type;
use katara_ir::value::{Const, Value};

const HEADER_SIZE: i64 = 16;
const STRONG_OFFSET: i64 = 0;
const WEAK_OFFSET: i64 = 8;

pub fn lower_program(program: &mut Program) {
    for number in program.func_numbers() {
        if let Some(func) = program.func_mut(number) {
            lower_func(func);
        }
    }
}

pub fn lower_func(func: &mut Func) {
    retype_shared_pointers(func);

    let mut worklist: VecDeque<i64> = func.block_numbers().into();
    while let Some(block_number) = worklist.pop_front() {
        if let Some(next) = lower_block_once(func, block_number) {
            worklist.push_back(next);
        }
    }
}

fn shared_to_plain(ty: &mut Type) {
    if let Type::SharedPointer { weak } = *ty {
        *ty = Type::Pointer { weak };
    }
}

fn retype_value(value: &mut Value) {
    match value {
        Value::Computed { ty, .. } => shared_to_plain(ty),
        Value::InheritedValue { value, .. } => retype_value(value),
        Value::Constant(_) => {}
    }
}

fn retype_shared_pointers(func: &mut Func) {
    for (_, ty) in func.args_mut() {
        shared_to_plain(ty);
    }
    for ty in func.result_types_mut() {
        shared_to_plain(ty);
    }
    for block_number in func.block_numbers() {
        let Some(block) = func.block_mut(block_number) else { continue };
        for instr in block.instrs_mut() {
            instr.for_each_value_mut(&mut retype_value);
            instr.for_each_type_mut(&mut shared_to_plain);
        }
    }
}

fn is_high_level(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::MakeShared { .. } | Instr::CopyShared { .. } | Instr::DeleteShared { .. } | Instr::UpgradeWeak { .. }
    )
}

fn find_first_high_level(block: &Block) -> Option<usize> {
    block.instrs().iter().position(is_high_level)
}

/// Finds and lowers the first high-level op left in `block_number`. Returns
/// the block that should be rescanned next (itself, if the lowering was a
/// straight-line splice; the freshly split continuation otherwise), or
/// `None` once the block is clean.
fn lower_block_once(func: &mut Func, block_number: i64) -> Option<i64> {
    let block = func.block(block_number)?;
    let idx = find_first_high_level(block)?;
    let instr = block.instrs()[idx].clone();

    match instr {
        Instr::MakeShared { result, size } => {
            let seq = expand_make_shared(func, result, size);
            splice(func, block_number, idx, seq);
            Some(block_number)
        }
        Instr::CopyShared { result, ptr, kind } => {
            remove(func, block_number, idx);
            let cont = split_block_at(func, block_number, idx);
            lower_copy_shared(func, block_number, cont, result, ptr, kind);
            Some(cont)
        }
        Instr::DeleteShared { ptr, kind } => {
            remove(func, block_number, idx);
            let cont = split_block_at(func, block_number, idx);
            lower_delete_shared(func, block_number, cont, ptr, kind);
            Some(cont)
        }
        Instr::UpgradeWeak { ptr_result, ok_result, ptr } => {
            remove(func, block_number, idx);
            let cont = split_block_at(func, block_number, idx);
            lower_upgrade_weak(func, block_number, cont, ptr_result, ok_result, ptr);
            Some(cont)
        }
        other => unreachable!("find_first_high_level returned a non-high-level instruction: {other:?}"),
    }
}

fn remove(func: &mut Func, block_number: i64, idx: usize) {
    func.block_mut(block_number).unwrap().instrs_mut().remove(idx);
}

fn splice(func: &mut Func, block_number: i64, idx: usize, seq: Vec<Instr>) {
    let block = func.block_mut(block_number).unwrap();
    let v = block.instrs_mut();
    v.splice(idx..idx, seq);
}

/// Splits `block_number` after index `idx`: everything from `idx` onward
/// (including the terminator) moves to a freshly numbered continuation
/// block, which inherits the original block's outgoing control-flow edges.
/// Any phi in a former child that named `block_number` as its origin is
/// repointed at the continuation, since that edge now genuinely originates
/// there.
fn split_block_at(func: &mut Func, block_number: i64, idx: usize) -> i64 {
    let tail = {
        let block = func.block_mut(block_number).unwrap();
        block.instrs_mut().split_off(idx)
    };

    let cont = func.fresh_block_number();
    let mut cont_block = Block::new(cont);
    for instr in tail {
        cont_block.push(instr);
    }
    func.add_block(cont_block);

    let old_children: Vec<i64> = func.children(block_number).to_vec();
    for child in old_children {
        func.remove_control_flow(block_number, child);
        func.add_control_flow(cont, child);
        retarget_phi_origin(func, child, block_number, cont);
    }

    cont
}

fn retarget_phi_origin(func: &mut Func, block_number: i64, old_origin: i64, new_origin: i64) {
    let Some(block) = func.block_mut(block_number) else { return };
    for instr in block.instrs_mut() {
        let Instr::Phi { args, .. } = instr else { break };
        for arg in args {
            if let Value::InheritedValue { origin_block, .. } = arg {
                if *origin_block == old_origin {
                    *origin_block = new_origin;
                }
            }
        }
    }
}

fn int_const(value: i64) -> Value {
    Value::constant(Const::Int(Int::from_i64(IntType::I64, value)))
}

fn ptr_value(number: i64, weak: bool) -> Value {
    Value::computed(Type::Pointer { weak }, number)
}

fn int_value(number: i64) -> Value {
    Value::computed(Type::Int(IntType::I64), number)
}

/// `result = malloc(16 + size); strong=1; weak=0; result = payload`.
fn expand_make_shared(func: &mut Func, result: i64, size: Value) -> Vec<Instr> {
    let mut seq = Vec::new();

    let total = func.fresh_value_number();
    seq.push(Instr::IntBinary {
        op: IntBinaryOp::Add,
        result: total,
        args: [size, int_const(HEADER_SIZE)],
    });

    let header = func.fresh_value_number();
    seq.push(Instr::Malloc { result: header, size: int_value(total) });
    let header_ptr = ptr_value(header, false);

    seq.push(Instr::Store { address: header_ptr.clone(), value: int_const(1) });

    let weak_addr = func.fresh_value_number();
    seq.push(Instr::PointerOffset { result: weak_addr, pointer: header_ptr.clone(), offset: int_const(WEAK_OFFSET) });
    seq.push(Instr::Store { address: ptr_value(weak_addr, false), value: int_const(0) });

    let payload_addr = func.fresh_value_number();
    seq.push(Instr::PointerOffset { result: payload_addr, pointer: header_ptr, offset: int_const(HEADER_SIZE) });
    seq.push(Instr::Mov { result, result_ty: Type::Pointer { weak: false }, arg: ptr_value(payload_addr, false) });

    seq
}

/// `result = ptr` unconditionally (the identity of a shared pointer never
/// changes on copy); if `ptr` is non-nil, additionally increments the
/// appropriate refcount. No merge is needed since `result` does not differ
/// across the branch.
fn lower_copy_shared(func: &mut Func, entry: i64, cont: i64, result: i64, ptr: Value, kind: SharedPtrKind) {
    let ptr_ty = ptr.get_type();
    func.block_mut(entry).unwrap().push(Instr::Mov { result, result_ty: ptr_ty, arg: ptr.clone() });

    let is_nil = func.fresh_value_number();
    func.block_mut(entry).unwrap().push(Instr::NilTest { result: is_nil, pointer: ptr.clone() });

    let incr = func.fresh_block_number();
    func.block_mut(entry).unwrap().push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, is_nil),
        true_target: cont,
        false_target: incr,
    });
    func.add_control_flow(entry, cont);
    func.add_control_flow(entry, incr);

    let mut incr_block = Block::new(incr);
    let header = func.fresh_value_number();
    incr_block.push(Instr::PointerOffset { result: header, pointer: ptr, offset: int_const(-HEADER_SIZE) });

    let own_offset = if kind == SharedPtrKind::Strong { STRONG_OFFSET } else { WEAK_OFFSET };
    let count_addr = func.fresh_value_number();
    incr_block.push(Instr::PointerOffset { result: count_addr, pointer: ptr_value(header, false), offset: int_const(own_offset) });

    let count = func.fresh_value_number();
    incr_block.push(Instr::Load { result: count, result_ty: Type::Int(IntType::I64), address: ptr_value(count_addr, false) });

    let incremented = func.fresh_value_number();
    incr_block.push(Instr::IntBinary { op: IntBinaryOp::Add, result: incremented, args: [int_value(count), int_const(1)] });
    incr_block.push(Instr::Store { address: ptr_value(count_addr, false), value: int_value(incremented) });
    incr_block.push(Instr::Jump { target: cont });
    func.add_block(incr_block);
    func.add_control_flow(incr, cont);
}

/// Decrements the named refcount if `ptr` is non-nil; frees the payload once
/// the strong count reaches zero and the control block once both reach
/// zero.
fn lower_delete_shared(func: &mut Func, entry: i64, cont: i64, ptr: Value, kind: SharedPtrKind) {
    let is_nil = func.fresh_value_number();
    func.block_mut(entry).unwrap().push(Instr::NilTest { result: is_nil, pointer: ptr.clone() });

    let work = func.fresh_block_number();
    func.block_mut(entry).unwrap().push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, is_nil),
        true_target: cont,
        false_target: work,
    });
    func.add_control_flow(entry, cont);
    func.add_control_flow(entry, work);

    let mut work_block = Block::new(work);
    let header = func.fresh_value_number();
    work_block.push(Instr::PointerOffset { result: header, pointer: ptr.clone(), offset: int_const(-HEADER_SIZE) });

    let own_offset = if kind == SharedPtrKind::Strong { STRONG_OFFSET } else { WEAK_OFFSET };
    let other_offset = if kind == SharedPtrKind::Strong { WEAK_OFFSET } else { STRONG_OFFSET };

    let own_addr = func.fresh_value_number();
    work_block.push(Instr::PointerOffset { result: own_addr, pointer: ptr_value(header, false), offset: int_const(own_offset) });
    let count = func.fresh_value_number();
    work_block.push(Instr::Load { result: count, result_ty: Type::Int(IntType::I64), address: ptr_value(own_addr, false) });
    let decremented = func.fresh_value_number();
    work_block.push(Instr::IntBinary { op: IntBinaryOp::Sub, result: decremented, args: [int_value(count), int_const(1)] });
    work_block.push(Instr::Store { address: ptr_value(own_addr, false), value: int_value(decremented) });

    let drained = func.fresh_value_number();
    work_block.push(Instr::IntCompare { op: IntCompareOp::Eq, result: drained, args: [int_value(decremented), int_const(0)] });

    let zero = func.fresh_block_number();
    work_block.push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, drained),
        true_target: zero,
        false_target: cont,
    });
    func.add_block(work_block);
    func.add_control_flow(work, zero);
    func.add_control_flow(work, cont);

    let mut zero_block = Block::new(zero);
    if kind == SharedPtrKind::Strong {
        zero_block.push(Instr::Free { pointer: ptr });
    }
    let other_addr = func.fresh_value_number();
    zero_block.push(Instr::PointerOffset { result: other_addr, pointer: ptr_value(header, false), offset: int_const(other_offset) });
    let other_count = func.fresh_value_number();
    zero_block.push(Instr::Load { result: other_count, result_ty: Type::Int(IntType::I64), address: ptr_value(other_addr, false) });
    let other_zero = func.fresh_value_number();
    zero_block.push(Instr::IntCompare { op: IntCompareOp::Eq, result: other_zero, args: [int_value(other_count), int_const(0)] });

    let free_header = func.fresh_block_number();
    zero_block.push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, other_zero),
        true_target: free_header,
        false_target: cont,
    });
    func.add_block(zero_block);
    func.add_control_flow(zero, free_header);
    func.add_control_flow(zero, cont);

    let mut free_header_block = Block::new(free_header);
    free_header_block.push(Instr::Free { pointer: ptr_value(header, false) });
    free_header_block.push(Instr::Jump { target: cont });
    func.add_block(free_header_block);
    func.add_control_flow(free_header, cont);
}

/// Promotes a weak pointer: nil, or a strong count of zero, both yield
/// `(nil, false)`; otherwise increments the strong count and yields
/// `(ptr, true)`. The three outcomes converge on a phi at the top of `cont`.
fn lower_upgrade_weak(func: &mut Func, entry: i64, cont: i64, ptr_result: i64, ok_result: i64, ptr: Value) {
    let is_nil = func.fresh_value_number();
    func.block_mut(entry).unwrap().push(Instr::NilTest { result: is_nil, pointer: ptr.clone() });

    let nil_block = func.fresh_block_number();
    let nonnil_block = func.fresh_block_number();
    func.block_mut(entry).unwrap().push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, is_nil),
        true_target: nil_block,
        false_target: nonnil_block,
    });
    func.add_control_flow(entry, nil_block);
    func.add_control_flow(entry, nonnil_block);

    let mut nil_b = Block::new(nil_block);
    nil_b.push(Instr::Jump { target: cont });
    func.add_block(nil_b);
    func.add_control_flow(nil_block, cont);

    let mut nonnil_b = Block::new(nonnil_block);
    let header = func.fresh_value_number();
    nonnil_b.push(Instr::PointerOffset { result: header, pointer: ptr.clone(), offset: int_const(-HEADER_SIZE) });
    let strong = func.fresh_value_number();
    nonnil_b.push(Instr::Load { result: strong, result_ty: Type::Int(IntType::I64), address: ptr_value(header, false) });
    let is_dead = func.fresh_value_number();
    nonnil_b.push(Instr::IntCompare { op: IntCompareOp::Eq, result: is_dead, args: [int_value(strong), int_const(0)] });

    let fail_block = func.fresh_block_number();
    let succeed_block = func.fresh_block_number();
    nonnil_b.push(Instr::JumpCond {
        cond: Value::computed(Type::Bool, is_dead),
        true_target: fail_block,
        false_target: succeed_block,
    });
    func.add_block(nonnil_b);
    func.add_control_flow(nonnil_block, fail_block);
    func.add_control_flow(nonnil_block, succeed_block);

    let mut fail_b = Block::new(fail_block);
    fail_b.push(Instr::Jump { target: cont });
    func.add_block(fail_b);
    func.add_control_flow(fail_block, cont);

    let mut succeed_b = Block::new(succeed_block);
    let incremented = func.fresh_value_number();
    succeed_b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: incremented, args: [int_value(strong), int_const(1)] });
    succeed_b.push(Instr::Store { address: ptr_value(header, false), value: int_value(incremented) });
    succeed_b.push(Instr::Jump { target: cont });
    func.add_block(succeed_b);
    func.add_control_flow(succeed_block, cont);

    let phis = vec![
        Instr::Phi {
            result: ptr_result,
            result_ty: Type::Pointer { weak: false },
            args: vec![
                Value::inherited(Value::constant(Const::NilPointer), nil_block),
                Value::inherited(Value::constant(Const::NilPointer), fail_block),
                Value::inherited(ptr, succeed_block),
            ],
        },
        Instr::Phi {
            result: ok_result,
            result_ty: Type::Bool,
            args: vec![
                Value::inherited(Value::constant(Const::Bool(false)), nil_block),
                Value::inherited(Value::constant(Const::Bool(false)), fail_block),
                Value::inherited(Value::constant(Const::Bool(true)), succeed_block),
            ],
        },
    ];
    func.block_mut(cont).unwrap().instrs_mut().splice(0..0, phis);
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_ir::check;
    use katara_ir::program::Program;

    fn single_block_func(result_types: Vec<Type>, body: Vec<Instr>) -> (Program, i64) {
        let mut program = Program::new();
        let mut func = Func::new(0, "f", vec![(100, Type::SharedPointer { weak: false })], result_types);
        let mut entry = Block::new(0);
        for instr in body {
            entry.push(instr);
        }
        func.add_block(entry);
        func.set_entry_block(0);
        func.bump_counters(1, 200);
        program.add_func(func);
        program.set_entry_func(0);
        (program, 0)
    }

    #[test]
    fn make_shared_lowers_to_straight_line_code_with_no_new_blocks() {
        let (mut program, fnum) = single_block_func(
            vec![Type::Int(IntType::I64)],
            vec![
                Instr::MakeShared { result: 1, size: int_const(8) },
                Instr::Return { args: vec![Value::constant(Const::Int(Int::from_i64(IntType::I64, 0)))] },
            ],
        );
        lower_program(&mut program);
        let func = program.func(fnum).unwrap();
        assert_eq!(func.block_numbers().len(), 1);
        assert!(func.block(0).unwrap().instrs().iter().all(|i| !is_high_level(i)));
    }

    #[test]
    fn copy_shared_splits_into_nil_check_and_passes_the_checker() {
        let (mut program, fnum) = single_block_func(
            vec![Type::SharedPointer { weak: false }],
            vec![
                Instr::CopyShared { result: 1, ptr: Value::computed(Type::SharedPointer { weak: false }, 100), kind: SharedPtrKind::Strong },
                Instr::Return { args: vec![Value::computed(Type::SharedPointer { weak: false }, 1)] },
            ],
        );
        lower_program(&mut program);
        let func = program.func(fnum).unwrap();
        assert!(func.block_numbers().len() > 1);
        for block in func.blocks() {
            for instr in block.instrs() {
                assert!(!is_high_level(instr));
            }
        }
        let tracker = check::check_program(&program);
        assert!(tracker.is_empty(), "{:?}", tracker.issues());
    }

    #[test]
    fn upgrade_weak_merges_three_outcomes_through_a_phi() {
        let (mut program, fnum) = single_block_func(
            vec![Type::SharedPointer { weak: false }, Type::Bool],
            vec![
                Instr::UpgradeWeak { ptr_result: 1, ok_result: 2, ptr: Value::computed(Type::SharedPointer { weak: true }, 100) },
                Instr::Return {
                    args: vec![
                        Value::computed(Type::SharedPointer { weak: false }, 1),
                        Value::computed(Type::Bool, 2),
                    ],
                },
            ],
        );
        lower_program(&mut program);
        let tracker = check::check_program(&program);
        assert!(tracker.is_empty(), "{:?}", tracker.issues());
        let func = program.func(fnum).unwrap();
        let has_phi_merging_three = func.blocks().any(|b| {
            b.phis().any(|i| matches!(i, Instr::Phi { args, .. } if args.len() == 3))
        });
        assert!(has_phi_merging_three);
    }

    #[test]
    fn delete_shared_frees_payload_and_header_when_both_counts_drain() {
        let (mut program, fnum) = single_block_func(
            vec![Type::Int(IntType::I64)],
            vec![
                Instr::DeleteShared { ptr: Value::computed(Type::SharedPointer { weak: false }, 100), kind: SharedPtrKind::Strong },
                Instr::Return { args: vec![Value::constant(Const::Int(Int::from_i64(IntType::I64, 0)))] },
            ],
        );
        lower_program(&mut program);
        let tracker = check::check_program(&program);
        assert!(tracker.is_empty(), "{:?}", tracker.issues());
        let func = program.func(fnum).unwrap();
        let frees: usize = func.blocks().flat_map(|b| b.instrs()).filter(|i| matches!(i, Instr::Free { .. })).count();
        assert_eq!(frees, 2);
    }
}
