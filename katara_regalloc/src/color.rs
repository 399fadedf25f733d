//! Simplify/spill/select over an interference graph, per the procedure in
//! the register-allocator component design:
//!
//! 1. Build a working copy of the interference graph.
//! 2. Repeatedly remove a node whose degree is below the register count and
//!    push it on the stack. If none remains, pick a node to potentially
//!    spill (highest degree) and push it too.
//! 3. Pop the stack; give each node the lowest color in `0..16` free among
//!    its neighbors already colored. If none is free, it spills to a fresh
//!    stack slot.
//!
//! All 16 general-purpose registers are legal for every value width, so
//! there is a single color class — no width-based partitioning needed.

use indexmap::{IndexMap, IndexSet};

use katara_analysis::InterferenceGraph;

/// Colors `0..NUM_GPR_COLORS` name the 16 x86-64 general-purpose registers
/// in `rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8..r15` order; colors at or
/// above it name stack-slot memory locations, one fresh slot per spilled
/// value.
pub const NUM_GPR_COLORS: u32 = 16;

/// Color for r11, reserved as the x86-64 translator's scratch register for
/// staging memory-to-memory moves and other operands the encoder can't
/// address directly. Never handed out, so the translator can use r11
/// without spilling whatever the allocator would otherwise have placed
/// there.
const RESERVED_SCRATCH_COLOR: u32 = 11;

/// Colors for rsp and rbp. The translator's prologue/epilogue and every
/// spill-slot access assume these two are the stack and frame pointers for
/// the whole function, so they can never be handed to an SSA value.
const RESERVED_STACK_POINTER_COLOR: u32 = 4;
const RESERVED_FRAME_POINTER_COLOR: u32 = 5;

const RESERVED_COLORS: [u32; 3] =
    [RESERVED_SCRATCH_COLOR, RESERVED_STACK_POINTER_COLOR, RESERVED_FRAME_POINTER_COLOR];

/// How many colors `allocate` actually has to hand out once the reserved
/// ones are set aside.
const NUM_ALLOCATABLE_COLORS: u32 = NUM_GPR_COLORS - RESERVED_COLORS.len() as u32;

/// A stable value-number → color assignment.
#[derive(Debug, Clone, Default)]
pub struct Coloring {
    colors: IndexMap<i64, u32>,
}

impl Coloring {
    pub fn color_of(&self, value: i64) -> Option<u32> {
        self.colors.get(&value).copied()
    }

    pub fn is_spilled(&self, value: i64) -> bool {
        self.color_of(value).is_some_and(|c| c >= NUM_GPR_COLORS)
    }

    pub fn assignments(&self) -> impl Iterator<Item = (i64, u32)> + '_ {
        self.colors.iter().map(|(&v, &c)| (v, c))
    }

    /// How many distinct 8-byte stack slots this coloring uses. Each
    /// spilled value gets its own slot, so this is just a count, not a
    /// conflict-aware packing.
    pub fn spill_slot_count(&self) -> u32 {
        self.colors
            .values()
            .filter(|&&c| c >= NUM_GPR_COLORS)
            .count() as u32
    }

    fn set(&mut self, value: i64, color: u32) {
        self.colors.insert(value, color);
    }
}

fn remove_node(adj: &mut IndexMap<i64, IndexSet<i64>>, node: i64) {
    let neighbors = adj.shift_remove(&node).unwrap_or_default();
    for neighbor in neighbors {
        if let Some(set) = adj.get_mut(&neighbor) {
            set.shift_remove(&node);
        }
    }
}

pub fn allocate(graph: &InterferenceGraph) -> Coloring {
    let mut adj: IndexMap<i64, IndexSet<i64>> = graph.nodes().map(|n| (n, graph.neighbors(n))).collect();

    let mut stack = Vec::with_capacity(adj.len());
    while !adj.is_empty() {
        let simplifiable = adj
            .iter()
            .find(|(_, neighbors)| (neighbors.len() as u32) < NUM_ALLOCATABLE_COLORS)
            .map(|(&n, _)| n);

        let chosen = match simplifiable {
            Some(n) => n,
            None => {
                // No node is trivially colorable; optimistically push the
                // highest-degree node and let `select` decide whether it
                // truly needs to spill.
                *adj.iter().max_by_key(|(_, neighbors)| neighbors.len()).map(|(n, _)| n).unwrap()
            }
        };
        remove_node(&mut adj, chosen);
        stack.push(chosen);
    }

    let mut coloring = Coloring::default();
    let mut next_spill_color = NUM_GPR_COLORS;

    while let Some(node) = stack.pop() {
        let used: IndexSet<u32> = graph.neighbors(node).into_iter().filter_map(|n| coloring.color_of(n)).collect();

        let assigned = (0..NUM_GPR_COLORS).filter(|c| !RESERVED_COLORS.contains(c)).find(|c| !used.contains(c));
        match assigned {
            Some(color) => coloring.set(node, color),
            None => {
                coloring.set(node, next_spill_color);
                next_spill_color += 1;
            }
        }
    }

    coloring
}

#[cfg(test)]
mod tests {
    use super::*;
    use katara_analysis::liveness;
    use katara_common::atomics::{Int, IntBinaryOp, IntType};
    use katara_ir::block::Block;
    use katara_ir::func::Func;
    use katara_ir::instr::Instr;
    use katara_ir::types::Type;
    use katara_ir::value::{Const, Value};

    fn i64_const(v: i64) -> Value {
        Value::constant(Const::Int(Int::from_i64(IntType::I64, v)))
    }

    #[test]
    fn two_interfering_values_get_distinct_registers() {
        let i64_ty = Type::Int(IntType::I64);
        let mut func = Func::new(0, "f", vec![], vec![i64_ty]);
        let mut b = Block::new(0);
        b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: 0, args: [i64_const(1), i64_const(2)] });
        b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: 1, args: [i64_const(3), i64_const(4)] });
        b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: 2, args: [Value::computed(i64_ty, 0), Value::computed(i64_ty, 1)] });
        b.push(Instr::Return { args: vec![Value::computed(i64_ty, 2)] });
        func.add_block(b);
        func.set_entry_block(0);

        let live = liveness::analyze(&func);
        let graph = katara_analysis::interference::build(&func, &live);
        let coloring = allocate(&graph);

        assert_ne!(coloring.color_of(0), coloring.color_of(1));
        assert!(coloring.color_of(0).unwrap() < NUM_GPR_COLORS);
        assert!(coloring.color_of(1).unwrap() < NUM_GPR_COLORS);
        assert_eq!(coloring.spill_slot_count(), 0);
    }

    #[test]
    fn a_clique_larger_than_register_count_forces_a_spill() {
        let i64_ty = Type::Int(IntType::I64);
        const N: i64 = 20;
        let mut func = Func::new(0, "f", vec![], vec![i64_ty]);
        let mut b = Block::new(0);
        for i in 0..N {
            b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: i, args: [i64_const(i), i64_const(1)] });
        }
        // Every earlier value stays live until the final combining chain,
        // so all N values form one clique.
        let mut acc = Value::computed(i64_ty, 0);
        let mut next_result = N;
        for i in 1..N {
            b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: next_result, args: [acc.clone(), Value::computed(i64_ty, i)] });
            acc = Value::computed(i64_ty, next_result);
            next_result += 1;
        }
        b.push(Instr::Return { args: vec![acc] });
        func.add_block(b);
        func.set_entry_block(0);

        let live = liveness::analyze(&func);
        let graph = katara_analysis::interference::build(&func, &live);
        let coloring = allocate(&graph);

        assert!(coloring.spill_slot_count() > 0);
        for i in 0..N {
            assert!(coloring.color_of(i).is_some());
        }
    }

    #[test]
    fn reserved_colors_are_never_assigned() {
        let i64_ty = Type::Int(IntType::I64);
        const N: i64 = 20;
        let mut func = Func::new(0, "f", vec![], vec![i64_ty]);
        let mut b = Block::new(0);
        for i in 0..N {
            b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: i, args: [i64_const(i), i64_const(1)] });
        }
        let mut acc = Value::computed(i64_ty, 0);
        let mut next_result = N;
        for i in 1..N {
            b.push(Instr::IntBinary { op: IntBinaryOp::Add, result: next_result, args: [acc.clone(), Value::computed(i64_ty, i)] });
            acc = Value::computed(i64_ty, next_result);
            next_result += 1;
        }
        b.push(Instr::Return { args: vec![acc] });
        func.add_block(b);
        func.set_entry_block(0);

        let live = liveness::analyze(&func);
        let graph = katara_analysis::interference::build(&func, &live);
        let coloring = allocate(&graph);

        for (_, color) in coloring.assignments() {
            assert!(!RESERVED_COLORS.contains(&color));
        }
    }
}
