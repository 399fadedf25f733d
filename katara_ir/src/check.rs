//! Structural IR validation. Reports every violation found as a
//! `katara_common::diag::Diagnostic` attached to an `IssueTracker`; never
//! mutates the program and never panics on malformed input — structural
//! violations are surfaced here, never by crashes. Issue kinds are string
//! tags rather than a closed Rust enum, since the set is non-exhaustive and
//! user-facing tooling matches on the name, not a compiled variant.

use std::collections::{HashMap, HashSet};

use katara_common::diag::{Diagnostic, IssueTracker, Severity};

use crate::func::Func;
use crate::instr::{Instr, UsePosition};
use crate::program::Program;
use crate::types::Type;
use crate::value::Value;

pub fn check_program(program: &Program) -> IssueTracker {
    let mut tracker = IssueTracker::new();
    if let Some(entry) = program.entry_func() {
        if !program.has_func(entry) {
            tracker.add(Diagnostic::new(Severity::Fatal, "EntryFuncDoesNotExist", "program entry func does not exist"));
        }
    }
    for func in program.funcs() {
        check_func(program, func, &mut tracker);
    }
    tracker
}

fn issue(kind: &str, message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(Severity::Error, kind, message)
}

fn check_func(program: &Program, func: &Func, tracker: &mut IssueTracker) {
    let Some(entry) = func.entry_block() else {
        tracker.add(issue("FuncHasNoEntryBlock", format!("func @{} has no entry block", func.number())));
        return;
    };

    if !func.parents(entry).is_empty() {
        tracker.add(issue("EntryBlockHasParents", format!("entry block {{{entry}}} of @{} has parents", func.number())));
    }

    for block_number in func.block_numbers() {
        if block_number != entry && func.parents(block_number).is_empty() {
            tracker.add(issue(
                "NonEntryBlockHasNoParents",
                format!("block {{{block_number}}} in @{} is unreachable", func.number()),
            ));
        }
        check_block(func, block_number, tracker);
    }

    check_dominance(func, tracker);

    // Computed-value definition count.
    let mut def_counts: HashMap<i64, u32> = HashMap::new();
    for block in func.blocks() {
        for instr in block.instrs() {
            for (number, _) in instr.defs() {
                *def_counts.entry(number).or_insert(0) += 1;
            }
        }
    }
    for (&number, &count) in &def_counts {
        if count > 1 {
            tracker.add(issue(
                "ComputedValueNumberUsedMultipleTimes",
                format!("value %{number} in @{} is defined {count} times", func.number()),
            ));
        }
    }

    for block in func.blocks() {
        for instr in block.instrs() {
            if let Instr::Call { callee, .. } = instr {
                check_call(program, func, callee, instr, tracker);
            }
            if let Instr::Return { args } = instr {
                if args.len() != func.result_types().len() {
                    tracker.add(issue(
                        "ReturnInstrDoesNotMatchFuncSignature",
                        format!("@{} returns {} values, signature declares {}", func.number(), args.len(), func.result_types().len()),
                    ));
                } else {
                    for (arg, expected) in args.iter().zip(func.result_types()) {
                        if arg.get_type() != *expected {
                            tracker.add(issue(
                                "ReturnInstrDoesNotMatchFuncSignature",
                                format!("@{} return value has type {}, expected {}", func.number(), arg.get_type(), expected),
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn check_call(program: &Program, func: &Func, callee: &Value, _instr: &Instr, tracker: &mut IssueTracker) {
    if !callee.get_type().is_func() {
        tracker.add(issue(
            "CallInstrCalleeDoesNotHaveFuncType",
            format!("call in @{} has non-func callee", func.number()),
        ));
        return;
    }
    if let Value::Constant(crate::value::Const::Func(target)) = callee {
        if !program.has_func(*target) {
            tracker.add(issue(
                "CallInstrStaticCalleeDoesNotExist",
                format!("call in @{} targets nonexistent @{target}", func.number()),
            ));
        }
    }
}

fn check_block(func: &Func, block_number: i64, tracker: &mut IssueTracker) {
    let Some(block) = func.block(block_number) else { return };

    if block.instrs().is_empty() {
        tracker.add(issue("BlockContainsNoInstrs", format!("block {{{block_number}}} in @{} is empty", func.number())));
        return;
    }

    let n = block.instrs().len();
    for (i, instr) in block.instrs().iter().enumerate() {
        let is_last = i == n - 1;
        if instr.is_terminator() && !is_last {
            tracker.add(issue(
                "ControlFlowInstrBeforeEndOfBlock",
                format!("block {{{block_number}}} in @{} has a terminator before its end", func.number()),
            ));
        }
    }
    if !block.instrs()[n - 1].is_terminator() {
        tracker.add(issue(
            "ControlFlowInstrMissingAtEndOfBlock",
            format!("block {{{block_number}}} in @{} does not end with a terminator", func.number()),
        ));
    }

    let mut seen_non_phi = false;
    for instr in block.instrs() {
        if instr.is_phi() {
            if seen_non_phi {
                tracker.add(issue(
                    "PhiAfterRegularInstrInBlock",
                    format!("block {{{block_number}}} in @{} has a phi after a non-phi instruction", func.number()),
                ));
            }
        } else {
            seen_non_phi = true;
        }
    }

    let predecessors: HashSet<i64> = func.parents(block_number).iter().copied().collect();
    for instr in block.phis() {
        if predecessors.len() < 2 {
            tracker.add(issue(
                "PhiInBlockWithoutMultipleParents",
                format!("block {{{block_number}}} in @{} has a phi but fewer than 2 predecessors", func.number()),
            ));
        }
        let mut origins = HashSet::new();
        for (_, pos) in instr.uses() {
            if let UsePosition::Phi { origin_block } = pos {
                origins.insert(origin_block);
                if !predecessors.contains(&origin_block) {
                    tracker.add(issue(
                        "PhiInstrHasArgumentForNonParentBlock",
                        format!("phi in block {{{block_number}}} of @{} names non-parent {{{origin_block}}}", func.number()),
                    ));
                }
            }
        }
        for &pred in &predecessors {
            if !origins.contains(&pred) {
                tracker.add(issue(
                    "PhiInstrHasNoArgumentForParentBlock",
                    format!("phi in block {{{block_number}}} of @{} is missing an argument for {{{pred}}}", func.number()),
                ));
            }
        }
    }

    if let Some(terminator) = block.terminator() {
        let targets = terminator.targets();
        if let Instr::JumpCond { true_target, false_target, .. } = terminator {
            if true_target == false_target {
                tracker.add(issue(
                    "JumpCondInstrHasDuplicateDestinations",
                    format!("jcc in block {{{block_number}}} of @{} has identical targets", func.number()),
                ));
            }
        }
        let children: HashSet<i64> = func.children(block_number).iter().copied().collect();
        for target in &targets {
            if !children.contains(target) {
                tracker.add(issue(
                    "JumpInstrDestinationIsNotChildBlock",
                    format!("terminator in block {{{block_number}}} of @{} targets non-child {{{target}}}", func.number()),
                ));
            }
        }
        for &child in &children {
            if !targets.contains(&child) && !matches!(terminator, Instr::Return { .. }) {
                tracker.add(issue(
                    "ControlFlowInstrMismatchedWithBlockGraph",
                    format!("block {{{block_number}}} of @{} has child {{{child}}} not named by its terminator", func.number()),
                ));
            }
        }
    }

    for instr in block.instrs() {
        for (value, _) in instr.uses() {
            if !instr.is_phi() && matches!(value, Value::InheritedValue { .. }) {
                tracker.add(issue(
                    "NonPhiInstrUsesInheritedValue",
                    format!("non-phi instruction in block {{{block_number}}} of @{} uses an inherited value", func.number()),
                ));
            }
        }
    }

    check_operand_types(func, block_number, block, tracker);
}

fn check_operand_types(func: &Func, block_number: i64, block: &crate::block::Block, tracker: &mut IssueTracker) {
    for instr in block.instrs() {
        match instr {
            Instr::BoolNot { arg, .. } if arg.get_type() != Type::Bool => {
                tracker.add(issue(
                    "BoolNotInstrOperandDoesNotHaveBoolType",
                    format!("in block {{{block_number}}} of @{}", func.number()),
                ));
            }
            Instr::IntCompare { args, .. } if args[0].get_type() != args[1].get_type() => {
                tracker.add(issue(
                    "IntCompareInstrOperandsHaveDifferentTypes",
                    format!("in block {{{block_number}}} of @{}", func.number()),
                ));
            }
            Instr::IntBinary { result, args, .. } => {
                let defs = instr.defs();
                let result_ty = defs.first().map(|(_, t)| *t);
                if args[0].get_type() != args[1].get_type() || Some(args[0].get_type()) != result_ty {
                    tracker.add(issue(
                        "IntBinaryInstrOperandsAndResultHaveDifferentTypes",
                        format!("value %{result} in block {{{block_number}}} of @{}", func.number()),
                    ));
                }
            }
            _ => {}
        }
    }
}

fn check_dominance(func: &Func, tracker: &mut IssueTracker) {
    let Some(tree) = func.dominator_tree() else { return };
    let mut def_block: HashMap<i64, i64> = HashMap::new();
    for block in func.blocks() {
        for instr in block.instrs() {
            for (number, _) in instr.defs() {
                def_block.insert(number, block.number());
            }
        }
    }
    for block in func.blocks() {
        for instr in block.instrs() {
            for (value, pos) in instr.uses() {
                let Some(number) = value.number() else { continue };
                let Some(&def) = def_block.get(&number) else {
                    tracker.add(issue(
                        "ComputedValueHasNoDefinition",
                        format!("value %{number} used in @{} has no definition", func.number()),
                    ));
                    continue;
                };
                let use_block = match pos {
                    UsePosition::Normal => block.number(),
                    UsePosition::Phi { origin_block } => origin_block,
                };
                if !tree.dominates(def, use_block) {
                    tracker.add(issue(
                        "ComputedValueDefinitionDoesNotDominateUse",
                        format!("value %{number} defined in {{{def}}} does not dominate use in {{{use_block}}} (@{})", func.number()),
                    ));
                }
            }
        }
    }
}
