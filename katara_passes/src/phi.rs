//! SSA destruction: replaces every `Phi` with parallel-copy movs inserted at
//! the end of each predecessor block, right before its terminator.
//!
//! A block with phis can have several of them sharing a predecessor, and the
//! copies they imply can form dependency chains or even cycles (two phis
//! that read each other's predecessor value, as a loop's swap does). Per
//! predecessor we build one parallel-copy batch out of all of that block's
//! phis and hand it to `katara_common::parallel_copy::sequence`, which
//! breaks ties in dependency order and isolates whatever cycles remain;
//! cycles are broken with a single fresh IR value as scratch.

use katara_common::parallel_copy::{self, MoveOp, Step};
use katara_ir::block::Block;
use katara_ir::func::Func;
use katara_ir::instr::Instr;
use katara_ir::program::Program;
use katara_ir::types::Type;
use katara_ir::value::Value;

pub fn resolve_program(program: &mut Program) {
    for number in program.func_numbers() {
        if let Some(func) = program.func_mut(number) {
            resolve_func(func);
        }
    }
}

pub fn resolve_func(func: &mut Func) {
    for block_number in func.block_numbers() {
        resolve_block_phis(func, block_number);
    }
}

struct PhiCopy {
    result: i64,
    result_ty: Type,
    origin: Value,
}

fn resolve_block_phis(func: &mut Func, block_number: i64) {
    let mut by_predecessor: std::collections::HashMap<i64, Vec<PhiCopy>> = std::collections::HashMap::new();
    {
        let Some(block) = func.block(block_number) else { return };
        for instr in block.phis() {
            let Instr::Phi { result, result_ty, args } = instr else { continue };
            for arg in args {
                let origin_block = arg.origin_block().expect("phi argument must be inherited");
                let origin = match arg {
                    Value::InheritedValue { value, .. } => (**value).clone(),
                    other => other.clone(),
                };
                by_predecessor.entry(origin_block).or_default().push(PhiCopy {
                    result: *result,
                    result_ty: *result_ty,
                    origin,
                });
            }
        }
    }

    if by_predecessor.is_empty() {
        return;
    }

    for (pred, copies) in by_predecessor {
        emit_predecessor_copies(func, pred, copies);
    }

    if let Some(block) = func.block_mut(block_number) {
        block.instrs_mut().retain(|instr| !instr.is_phi());
    }
}

fn emit_predecessor_copies(func: &mut Func, pred: i64, copies: Vec<PhiCopy>) {
    let mut types = std::collections::HashMap::<i64, Type>::new();
    let mut const_copies = Vec::new();
    let mut moves = Vec::new();

    for copy in copies {
        types.insert(copy.result, copy.result_ty);
        match &copy.origin {
            Value::Constant(_) => const_copies.push(copy),
            Value::Computed { ty, number } => {
                types.insert(*number, *ty);
                moves.push(MoveOp::new(*number, copy.result));
            }
            Value::InheritedValue { .. } => unreachable!("phi argument already unwrapped"),
        }
    }

    // Constant-sourced copies can never participate in a cycle (a constant
    // is never itself a copy destination), so they're always safe to emit
    // first.
    for copy in const_copies {
        insert_mov(func, pred, copy.result, copy.result_ty, copy.origin);
    }

    let steps = parallel_copy::sequence(moves);
    for step in steps {
        match step {
            Step::Copy(op) => {
                let ty = types[&op.destination];
                insert_mov(func, pred, op.destination, ty, Value::computed(types[&op.origin], op.origin));
            }
            Step::Cycle(cycle) => {
                let ty = types[&cycle[0].destination];
                let scratch = func.fresh_value_number();
                types.insert(scratch, ty);
                let flat = parallel_copy::resolve_cycle_with_scratch(&cycle, scratch);
                for op in flat {
                    let origin_ty = types[&op.origin];
                    insert_mov(func, pred, op.destination, types[&op.destination], Value::computed(origin_ty, op.origin));
                }
            }
        }
    }
}

fn insert_mov(func: &mut Func, block_number: i64, result: i64, result_ty: Type, arg: Value) {
    let Some(block) = func.block_mut(block_number) else { return };
    block.insert_before_terminator(Instr::Mov { result, result_ty, arg });
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_common::atomics::IntType;
    use katara_ir::check;
    use katara_ir::value::Const;

    fn diamond_with_phi() -> (Program, i64) {
        let mut program = Program::new();
        let mut func = Func::new(0, "f", vec![(100, Type::Bool)], vec![Type::Int(IntType::I64)]);

        let mut entry = Block::new(0);
        entry.push(Instr::JumpCond {
            cond: Value::computed(Type::Bool, 100),
            true_target: 1,
            false_target: 2,
        });
        func.add_block(entry);

        let mut left = Block::new(1);
        left.push(Instr::Jump { target: 3 });
        func.add_block(left);

        let mut right = Block::new(2);
        right.push(Instr::Jump { target: 3 });
        func.add_block(right);

        let mut merge = Block::new(3);
        merge.push(Instr::Phi {
            result: 10,
            result_ty: Type::Int(IntType::I64),
            args: vec![
                Value::inherited(Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 1))), 1),
                Value::inherited(Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 2))), 2),
            ],
        });
        merge.push(Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 10)] });
        func.add_block(merge);

        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        func.add_control_flow(0, 2);
        func.add_control_flow(1, 3);
        func.add_control_flow(2, 3);
        func.bump_counters(4, 20);

        program.add_func(func);
        program.set_entry_func(0);
        (program, 0)
    }

    #[test]
    fn phi_resolves_to_movs_in_each_predecessor() {
        let (mut program, fnum) = diamond_with_phi();
        resolve_program(&mut program);
        let func = program.func(fnum).unwrap();
        assert!(func.block(3).unwrap().phis().next().is_none());
        assert!(func.block(1).unwrap().instrs().iter().any(|i| matches!(i, Instr::Mov { result: 10, .. })));
        assert!(func.block(2).unwrap().instrs().iter().any(|i| matches!(i, Instr::Mov { result: 10, .. })));
        let tracker = check::check_program(&program);
        assert!(tracker.is_empty(), "{:?}", tracker.issues());
    }

    #[test]
    fn two_cycle_swap_uses_scratch_and_passes_the_checker() {
        let mut program = Program::new();
        let mut func = Func::new(0, "f", vec![(100, Type::Int(IntType::I64)), (101, Type::Int(IntType::I64))], vec![Type::Int(IntType::I64)]);

        let mut entry = Block::new(0);
        entry.push(Instr::Jump { target: 1 });
        func.add_block(entry);

        let mut loop_block = Block::new(1);
        loop_block.push(Instr::Phi {
            result: 10,
            result_ty: Type::Int(IntType::I64),
            args: vec![
                Value::inherited(Value::computed(Type::Int(IntType::I64), 100), 0),
                Value::inherited(Value::computed(Type::Int(IntType::I64), 11), 1),
            ],
        });
        loop_block.push(Instr::Phi {
            result: 11,
            result_ty: Type::Int(IntType::I64),
            args: vec![
                Value::inherited(Value::computed(Type::Int(IntType::I64), 101), 0),
                Value::inherited(Value::computed(Type::Int(IntType::I64), 10), 1),
            ],
        });
        loop_block.push(Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 10)] });
        func.add_block(loop_block);

        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        func.add_control_flow(1, 1);
        func.bump_counters(2, 20);

        program.add_func(func);
        program.set_entry_func(0);

        resolve_program(&mut program);
        let func = program.func(0).unwrap();
        assert!(func.block(1).unwrap().phis().next().is_none());
        let tracker = check::check_program(&program);
        assert!(tracker.is_empty(), "{:?}", tracker.issues());
    }
}
