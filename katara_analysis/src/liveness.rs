//! Backward dataflow liveness over a func's control-flow graph. Produces a
//! plain by-value result keyed by block/instruction-index/value-number, not
//! a mutation of the IR.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use katara_ir::func::Func;
use katara_ir::instr::{Instr, UsePosition};

/// Live-range information for one func: per-block entry/exit sets, and
/// per-instruction before/after sets. Recomputed wholesale after any IR
/// mutation — never kept alive across a mutating pass (Design Notes §9).
#[derive(Debug, Clone, Default)]
pub struct LiveRanges {
    live_at_entry: IndexMap<i64, IndexSet<i64>>,
    live_at_exit: IndexMap<i64, IndexSet<i64>>,
    live_before: IndexMap<(i64, usize), IndexSet<i64>>,
    live_after: IndexMap<(i64, usize), IndexSet<i64>>,
}

impl LiveRanges {
    pub fn live_at_entry(&self, block: i64) -> IndexSet<i64> {
        self.live_at_entry.get(&block).cloned().unwrap_or_default()
    }

    pub fn live_at_exit(&self, block: i64) -> IndexSet<i64> {
        self.live_at_exit.get(&block).cloned().unwrap_or_default()
    }

    pub fn live_before(&self, block: i64, instr_index: usize) -> IndexSet<i64> {
        self.live_before.get(&(block, instr_index)).cloned().unwrap_or_default()
    }

    pub fn live_after(&self, block: i64, instr_index: usize) -> IndexSet<i64> {
        self.live_after.get(&(block, instr_index)).cloned().unwrap_or_default()
    }

    pub fn is_live_after(&self, block: i64, instr_index: usize, value: i64) -> bool {
        self.live_after(block, instr_index).contains(&value)
    }
}

/// `uses(i)` restricted to `UsePosition::Normal`. A phi contributes zero
/// local uses to its own block: a phi argument's use is attributed to the
/// predecessor block named as its origin, not to the block holding the phi,
/// so it never inflates that block's own live-before set. The
/// per-predecessor contribution is folded in separately by
/// `live_out_contribution_from`.
fn local_uses(instr: &Instr) -> IndexSet<i64> {
    instr
        .uses()
        .into_iter()
        .filter(|(_, pos)| matches!(pos, UsePosition::Normal))
        .filter_map(|(v, _)| v.number())
        .collect()
}

fn local_defs(instr: &Instr) -> IndexSet<i64> {
    instr.defs().into_iter().map(|(n, _)| n).collect()
}

/// What a predecessor `pred` of `succ` sees as flowing into `succ`: `succ`'s
/// live-in set (which already excludes its own phi results and contributes
/// no phi-argument uses — see `local_uses`) plus, for every phi in `succ`,
/// the one argument whose origin is exactly `pred`.
fn live_out_contribution_from(func: &Func, pred: i64, succ: i64, live_in: &IndexMap<i64, IndexSet<i64>>) -> IndexSet<i64> {
    let mut out = live_in.get(&succ).cloned().unwrap_or_default();
    if let Some(block) = func.block(succ) {
        for phi in block.phis() {
            let Instr::Phi { args, .. } = phi else { unreachable!() };
            for arg in args {
                if arg.origin_block() == Some(pred) {
                    if let Some(number) = arg.number() {
                        out.insert(number);
                    }
                }
            }
        }
    }
    out
}

fn block_live_out(func: &Func, block: i64, live_in: &IndexMap<i64, IndexSet<i64>>) -> IndexSet<i64> {
    let mut out = IndexSet::new();
    for &succ in func.children(block) {
        out.extend(live_out_contribution_from(func, block, succ, live_in));
    }
    out
}

/// Runs the backward fixpoint to convergence, then materializes the
/// complete per-instruction live-before/live-after maps in one more pass.
pub fn analyze(func: &Func) -> LiveRanges {
    let mut live_in: IndexMap<i64, IndexSet<i64>> = IndexMap::new();
    let mut worklist: VecDeque<i64> = func.block_numbers().into();
    let mut queued: IndexSet<i64> = worklist.iter().copied().collect();

    while let Some(block_number) = worklist.pop_front() {
        queued.remove(&block_number);
        let Some(block) = func.block(block_number) else { continue };

        let out = block_live_out(func, block_number, &live_in);
        let mut cur = out;
        for instr in block.instrs().iter().rev() {
            let defs = local_defs(instr);
            let uses = local_uses(instr);
            cur = cur.difference(&defs).copied().chain(uses).collect();
        }

        let changed = live_in.get(&block_number) != Some(&cur);
        if changed {
            live_in.insert(block_number, cur);
            for &pred in func.parents(block_number) {
                if queued.insert(pred) {
                    worklist.push_back(pred);
                }
            }
        }
    }

    let mut ranges = LiveRanges::default();
    for block_number in func.block_numbers() {
        let Some(block) = func.block(block_number) else { continue };
        let exit = block_live_out(func, block_number, &live_in);
        ranges.live_at_exit.insert(block_number, exit.clone());

        let mut cur = exit;
        let instrs = block.instrs();
        for (idx, instr) in instrs.iter().enumerate().rev() {
            ranges.live_after.insert((block_number, idx), cur.clone());
            let defs = local_defs(instr);
            let uses = local_uses(instr);
            let before: IndexSet<i64> = cur.difference(&defs).copied().chain(uses).collect();
            ranges.live_before.insert((block_number, idx), before.clone());
            cur = before;
        }
        ranges.live_at_entry.insert(block_number, cur);
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_common::atomics::{IntBinaryOp, IntCompareOp, IntType};
    use katara_ir::block::Block;
    use katara_ir::types::Type;
    use katara_ir::value::{Const, Value};

    #[test]
    fn straight_line_value_dies_after_last_use() {
        let mut func = Func::new(0, "f", vec![], vec![Type::Int(IntType::I64)]);
        let mut b = Block::new(0);
        b.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 0,
            args: [
                Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 1))),
                Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 2))),
            ],
        });
        b.push(Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 0)] });
        func.add_block(b);
        func.set_entry_block(0);

        let ranges = analyze(&func);
        assert!(ranges.live_after(0, 0).contains(&0));
        assert!(ranges.live_after(0, 1).is_empty());
    }

    /// A loop header's phi result stays live across the back edge until its
    /// last use in the body.
    #[test]
    fn phi_argument_is_live_out_of_its_origin_block_only() {
        let mut func = Func::new(0, "f", vec![], vec![Type::Int(IntType::I64)]);
        let i64 = Type::Int(IntType::I64);

        let mut entry = Block::new(0);
        entry.push(Instr::Jump { target: 1 });
        func.add_block(entry);
        func.set_entry_block(0);

        let mut header = Block::new(1);
        header.push(Instr::Phi {
            result: 0,
            result_ty: i64,
            args: vec![
                Value::inherited(Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 0))), 0),
                Value::inherited(Value::computed(i64, 1), 2),
            ],
        });
        header.push(Instr::IntCompare {
            op: IntCompareOp::Lss,
            result: 2,
            args: [Value::computed(i64, 0), Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 3)))],
        });
        header.push(Instr::JumpCond { cond: Value::computed(Type::Bool, 2), true_target: 2, false_target: 3 });
        func.add_block(header);

        let mut body = Block::new(2);
        body.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 1,
            args: [Value::computed(i64, 0), Value::constant(Const::Int(katara_common::atomics::Int::from_i64(IntType::I64, 1)))],
        });
        body.push(Instr::Jump { target: 1 });
        func.add_block(body);

        let mut exit = Block::new(3);
        exit.push(Instr::Return { args: vec![Value::computed(i64, 0)] });
        func.add_block(exit);

        for (from, to) in [(0, 1), (1, 2), (1, 3), (2, 1)] {
            func.add_control_flow(from, to);
        }

        let ranges = analyze(&func);
        // %0 (the phi result) is used by the compare and the add; it must be
        // live at the entry of block 2 (its only non-phi use is there).
        assert!(ranges.live_at_entry(2).contains(&0));
        // %1 is only defined in block 2 and consumed by the phi in block 1
        // via the back edge — it must be live at block 2's exit.
        assert!(ranges.live_at_exit(2).contains(&1));
        // It must not be live at block 0's exit: block 0 is not %1's origin.
        assert!(!ranges.live_at_exit(0).contains(&1));
    }
}
