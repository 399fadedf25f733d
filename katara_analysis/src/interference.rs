//! Interference graph construction over the results of `liveness::analyze`.

use indexmap::{IndexMap, IndexSet};

use katara_ir::func::Func;
use katara_ir::instr::Instr;
use katara_ir::types::Type;

use crate::liveness::LiveRanges;

/// An undirected graph over value numbers, plus the type each node carries
/// (needed by `katara_regalloc` to size spill slots and pick GPR vs. other
/// color classes).
#[derive(Debug, Clone, Default)]
pub struct InterferenceGraph {
    edges: IndexMap<i64, IndexSet<i64>>,
    node_types: IndexMap<i64, Type>,
}

impl InterferenceGraph {
    fn ensure_node(&mut self, value: i64, ty: Type) {
        self.edges.entry(value).or_default();
        self.node_types.entry(value).or_insert(ty);
    }

    fn add_edge(&mut self, a: i64, b: i64) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    fn add_clique(&mut self, values: &IndexSet<i64>) {
        let members: Vec<i64> = values.iter().copied().collect();
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                self.add_edge(a, b);
            }
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = i64> + '_ {
        self.edges.keys().copied()
    }

    pub fn neighbors(&self, value: i64) -> IndexSet<i64> {
        self.edges.get(&value).cloned().unwrap_or_default()
    }

    pub fn interferes(&self, a: i64, b: i64) -> bool {
        self.neighbors(a).contains(&b)
    }

    pub fn degree(&self, value: i64) -> usize {
        self.neighbors(value).len()
    }

    pub fn type_of(&self, value: i64) -> Option<Type> {
        self.node_types.get(&value).copied()
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }
}

/// Builds the interference graph for one func from its liveness results.
///
/// Three rules, applied at every instruction in program order:
/// 1. every pair of values simultaneously live after an instruction forms a
///    clique;
/// 2. a non-phi instruction's defined value interferes with everything live
///    after it, even if the defined value itself dies immediately — the
///    instruction's side effect still clobbers that register at that point;
/// 3. a block's phi results mutually interfere, and each interferes with
///    everything live at the block's entry except its own argument from
///    each predecessor (the one value it may be allocated to coalesce with).
pub fn build(func: &Func, live: &LiveRanges) -> InterferenceGraph {
    let mut graph = InterferenceGraph::default();

    for block_number in func.block_numbers() {
        let Some(block) = func.block(block_number) else { continue };

        for (idx, instr) in block.instrs().iter().enumerate() {
            let after = live.live_after(block_number, idx);
            for &v in &after {
                if let Some(ty) = value_type_in(func, v) {
                    graph.ensure_node(v, ty);
                }
            }
            graph.add_clique(&after);

            if !instr.is_phi() {
                for (def, ty) in instr.defs() {
                    graph.ensure_node(def, ty);
                    for &v in &after {
                        graph.add_edge(def, v);
                    }
                }
            }
        }

        let phi_results: Vec<(i64, Type)> = block
            .phis()
            .map(|p| {
                let Instr::Phi { result, result_ty, .. } = p else { unreachable!() };
                (*result, *result_ty)
            })
            .collect();
        for (result, ty) in &phi_results {
            graph.ensure_node(*result, *ty);
        }
        for (i, &(a, _)) in phi_results.iter().enumerate() {
            for &(b, _) in &phi_results[i + 1..] {
                graph.add_edge(a, b);
            }
        }

        let entry = live.live_at_entry(block_number);
        for phi in block.phis() {
            let Instr::Phi { result, args, .. } = phi else { unreachable!() };
            let own_args: IndexSet<i64> = args.iter().filter_map(|a| a.number()).collect();
            for &v in &entry {
                if v != *result && !own_args.contains(&v) {
                    graph.add_edge(*result, v);
                }
            }
        }
    }

    graph
}

fn value_type_in(func: &Func, value: i64) -> Option<Type> {
    for &(arg_number, ty) in func.args() {
        if arg_number == value {
            return Some(ty);
        }
    }
    for block in func.blocks() {
        for instr in block.instrs() {
            for (def, ty) in instr.defs() {
                if def == value {
                    return Some(ty);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness;
    use katara_common::atomics::{Int, IntBinaryOp, IntType};
    use katara_ir::block::Block;
    use katara_ir::value::{Const, Value};

    #[test]
    fn overlapping_live_ranges_interfere() {
        let i64_ty = Type::Int(IntType::I64);
        let mut func = Func::new(0, "f", vec![], vec![i64_ty]);
        let mut b = Block::new(0);
        // %0 = add 1, 2
        b.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 0,
            args: [
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 1))),
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 2))),
            ],
        });
        // %1 = add 3, 4        (overlaps %0, both live into the ret)
        b.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 1,
            args: [
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 3))),
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 4))),
            ],
        });
        // %2 = add %0, %1
        b.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 2,
            args: [Value::computed(i64_ty, 0), Value::computed(i64_ty, 1)],
        });
        b.push(Instr::Return { args: vec![Value::computed(i64_ty, 2)] });
        func.add_block(b);
        func.set_entry_block(0);

        let live = liveness::analyze(&func);
        let graph = build(&func, &live);

        assert!(graph.interferes(0, 1));
        assert!(!graph.interferes(0, 2));
        assert_eq!(graph.type_of(0), Some(i64_ty));
    }

    #[test]
    fn phi_does_not_interfere_with_its_own_argument_but_does_with_other_live_ins() {
        let i64_ty = Type::Int(IntType::I64);
        let mut func = Func::new(0, "f", vec![(2, i64_ty)], vec![i64_ty, i64_ty]);

        let mut entry = Block::new(0);
        entry.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 0,
            args: [
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 1))),
                Value::constant(Const::Int(Int::from_i64(IntType::I64, 1))),
            ],
        });
        entry.push(Instr::Jump { target: 1 });
        func.add_block(entry);
        func.set_entry_block(0);

        let mut exit = Block::new(1);
        exit.push(Instr::Phi {
            result: 1,
            result_ty: i64_ty,
            args: vec![Value::inherited(Value::computed(i64_ty, 0), 0)],
        });
        exit.push(Instr::Return {
            args: vec![Value::computed(i64_ty, 1), Value::computed(i64_ty, 2)],
        });
        func.add_block(exit);

        func.add_control_flow(0, 1);

        let live = liveness::analyze(&func);
        let graph = build(&func, &live);

        // %1 is a copy of %0 across the edge; they must not be forced into
        // different registers.
        assert!(!graph.interferes(0, 1));
        // %2 (the func argument) is a genuinely different value live at the
        // phi block's entry, so it must interfere with the phi result.
        assert!(graph.interferes(1, 2));
    }
}
