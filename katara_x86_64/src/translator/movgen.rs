//! Generates a machine-correct sequence of moves for a set of register
//! destinations that must all take on new values "simultaneously" — the
//! shape call-argument staging and multi-value return staging both need.
//! Verified with an abstract interpreter that tracks what value ends up in
//! each register/slot after a generated sequence runs, exercised by the
//! proptest below.
//!
//! This is deliberately not `katara_common::parallel_copy`: that module
//! breaks cycles by routing through one fresh *value* the IR allocates a
//! register to, which only makes sense before register allocation has run.
//! Here the destinations are fixed physical registers (argument/result
//! registers), so cycles break with `Xchg` (when every participant is a
//! register) or a `Push`/`Pop` bridge (when one participant is memory).

use crate::instr::Instr;
use crate::ops::{Operand, Reg};

/// Produces the instructions that perform every `(dst, src)` assignment as
/// if they all happened at once: no move may observe another move's
/// already-updated destination register.
pub fn generate_movs(moves: Vec<(Reg, Operand)>) -> Vec<Instr> {
    let mut pending: Vec<(Reg, Operand)> = moves
        .into_iter()
        .filter(|(dst, src)| !matches!(src, Operand::Reg(r) if r.encoding == dst.encoding))
        .collect();
    let mut out = Vec::new();

    while !pending.is_empty() {
        if let Some(idx) = find_ready_move(&pending) {
            let (dst, src) = pending.remove(idx);
            out.push(Instr::Mov { dst: Operand::Reg(dst), src });
            continue;
        }
        break_one_cycle(&mut pending, &mut out);
    }

    out
}

/// A move is ready once no other pending move still needs to read its
/// destination register as a source.
fn find_ready_move(pending: &[(Reg, Operand)]) -> Option<usize> {
    pending.iter().position(|(dst, _)| {
        !pending
            .iter()
            .any(|(other_dst, other_src)| {
                other_dst.encoding != dst.encoding
                    && matches!(other_src, Operand::Reg(r) if r.encoding == dst.encoding)
            })
    })
}

/// Every remaining move is blocked on some cycle. Walks the dependency
/// chain starting from `pending[0]` until it loops back on itself, then
/// resolves that one cycle and removes its moves from `pending`.
fn break_one_cycle(pending: &mut Vec<(Reg, Operand)>, out: &mut Vec<Instr>) {
    let (start_dst, start_src) = pending[0];

    match start_src {
        Operand::Reg(first_hop) => {
            let mut cycle = vec![0usize];
            let mut cursor = first_hop;
            while cursor.encoding != start_dst.encoding {
                let next = pending
                    .iter()
                    .position(|(dst, _)| dst.encoding == cursor.encoding)
                    .expect("a blocked move chain must close into a cycle");
                cursor = match pending[next].1 {
                    Operand::Reg(r) => r,
                    _ => unreachable!("a register cycle never passes through memory"),
                };
                cycle.push(next);
            }
            // `regs[i]` must end up holding the old value of `regs[i + 1]`
            // (cyclically). A chain of adjacent swaps walks that rotation
            // through the list one step at a time; pivoting every swap on
            // `regs[0]` instead produces a different permutation.
            let regs: Vec<Reg> = cycle.iter().map(|&i| pending[i].0).collect();
            for pair in regs.windows(2) {
                out.push(Instr::Xchg { a: Operand::Reg(pair[0]), b: pair[1] });
            }
            let mut indices = cycle;
            indices.sort_unstable_by(|a, b| b.cmp(a));
            for i in indices {
                pending.remove(i);
            }
        }
        memory_or_imm => {
            // The chain starting here reads from memory (or an immediate),
            // so it cannot be part of a register-only cycle: stage it
            // through the stack rather than clobbering a register that
            // some other pending move still needs.
            out.push(Instr::Push { src: memory_or_imm });
            out.push(Instr::Pop { dst: Operand::Reg(start_dst) });
            pending.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Imm, Mem, Size, RAX, RBP, RCX, RDI, RSI};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn reg(n: u8) -> Reg {
        Reg::new(n, Size::S64)
    }

    /// Interprets the generated instructions against a simulated register
    /// file, the same abstract-interpreter technique the grounding test
    /// file uses to validate `GenerateMovs`.
    fn run(instrs: &[Instr], initial: &HashMap<u8, i64>) -> HashMap<u8, i64> {
        let mut regs = initial.clone();
        let mut stack: Vec<i64> = Vec::new();
        for instr in instrs {
            match instr {
                Instr::Mov { dst: Operand::Reg(d), src } => {
                    let v = match src {
                        Operand::Reg(r) => *regs.get(&r.encoding).unwrap_or(&0),
                        Operand::Imm(Imm::I64(v)) => *v,
                        Operand::Imm(i) => i.to_le_bytes().iter().fold(0i64, |_, &b| b as i64),
                        Operand::Mem(_) => panic!("test doubles don't model memory reads"),
                    };
                    regs.insert(d.encoding, v);
                }
                Instr::Xchg { a: Operand::Reg(a), b } => {
                    let av = *regs.get(&a.encoding).unwrap_or(&0);
                    let bv = *regs.get(&b.encoding).unwrap_or(&0);
                    regs.insert(a.encoding, bv);
                    regs.insert(b.encoding, av);
                }
                Instr::Push { src: Operand::Reg(r) } => stack.push(*regs.get(&r.encoding).unwrap_or(&0)),
                Instr::Pop { dst: Operand::Reg(d) } => {
                    regs.insert(d.encoding, stack.pop().expect("balanced push/pop"));
                }
                other => panic!("unexpected instruction in generated move sequence: {other:?}"),
            }
        }
        regs
    }

    #[test]
    fn acyclic_moves_just_become_movs() {
        let moves = vec![(reg(RDI), Operand::Reg(reg(RAX))), (reg(RSI), Operand::Imm(Imm::I64(7)))];
        let mut initial = HashMap::new();
        initial.insert(RAX, 10);
        let out = run(&generate_movs(moves), &initial);
        assert_eq!(out[&RDI], 10);
        assert_eq!(out[&RSI], 7);
    }

    #[test]
    fn two_cycle_swap_resolves_via_xchg() {
        let moves = vec![(reg(RAX), Operand::Reg(reg(RCX))), (reg(RCX), Operand::Reg(reg(RAX)))];
        let mut initial = HashMap::new();
        initial.insert(RAX, 1);
        initial.insert(RCX, 2);
        let out = run(&generate_movs(moves), &initial);
        assert_eq!(out[&RAX], 2);
        assert_eq!(out[&RCX], 1);
    }

    #[test]
    fn three_cycle_rotates_through_xchg_chain() {
        let moves =
            vec![(reg(RAX), Operand::Reg(reg(RCX))), (reg(RCX), Operand::Reg(reg(RDI))), (reg(RDI), Operand::Reg(reg(RAX)))];
        let mut initial = HashMap::new();
        initial.insert(RAX, 1);
        initial.insert(RCX, 2);
        initial.insert(RDI, 3);
        let out = run(&generate_movs(moves), &initial);
        assert_eq!(out[&RAX], 2);
        assert_eq!(out[&RCX], 3);
        assert_eq!(out[&RDI], 1);
    }

    #[test]
    fn memory_source_feeding_a_cycle_is_staged_through_the_stack() {
        let mem = Operand::Mem(Mem::base_disp(reg(RBP), -8, Size::S64));
        let moves = vec![(reg(RAX), mem), (reg(RCX), Operand::Reg(reg(RAX)))];
        let out = generate_movs(moves);
        assert!(matches!(out[0], Instr::Push { .. }));
        assert!(matches!(out[1], Instr::Pop { .. }));
    }

    proptest! {
        #[test]
        fn random_permutations_of_four_registers_all_resolve_correctly(perm in prop::collection::vec(0u8..4, 4)) {
            let names = [RAX, RCX, RDI, RSI];
            let mut seen = [false; 4];
            let mut valid = true;
            for &p in &perm {
                if seen[p as usize] { valid = false; break; }
                seen[p as usize] = true;
            }
            prop_assume!(valid);

            let moves: Vec<(Reg, Operand)> =
                (0..4).map(|i| (reg(names[i]), Operand::Reg(reg(names[perm[i] as usize])))).collect();
            let mut initial = HashMap::new();
            for (i, &n) in names.iter().enumerate() {
                initial.insert(n, 100 + i as i64);
            }
            let expected: HashMap<u8, i64> =
                (0..4).map(|i| (names[i], 100 + perm[i] as i64)).collect();

            let out = run(&generate_movs(moves), &initial);
            for &n in &names {
                prop_assert_eq!(out[&n], expected[&n]);
            }
        }
    }
}
