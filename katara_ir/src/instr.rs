//! Instructions: a tagged enum over a small low-level opcode set plus the
//! high-level shared-pointer operations (`MakeShared`/`CopyShared`/
//! `DeleteShared`/`UpgradeWeak`) that arrive as pre-lowering input and are
//! eliminated by `katara_passes::shared_ptr` before liveness analysis ever
//! runs.

use std::fmt;

use katara_common::atomics::{BoolBinaryOp, IntBinaryOp, IntCompareOp, IntShiftOp, IntUnaryOp};

use crate::types::Type;
use crate::value::Value;

/// Where a use occurs: ordinary operand position, or a phi argument
/// inherited from a specific predecessor. Liveness (`katara_analysis`)
/// treats these differently: a phi argument's use counts only against the
/// predecessor named as its origin, never against the block holding the
/// phi itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsePosition {
    Normal,
    Phi { origin_block: i64 },
}

/// Strong vs. weak refcount side of a shared-pointer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SharedPtrKind {
    Strong,
    Weak,
}

impl fmt::Display for SharedPtrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedPtrKind::Strong => write!(f, "strong"),
            SharedPtrKind::Weak => write!(f, "weak"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Instr {
    Mov { result: i64, result_ty: Type, arg: Value },
    Phi { result: i64, result_ty: Type, args: Vec<Value> },
    Conversion { result: i64, result_ty: Type, arg: Value },
    BoolNot { result: i64, arg: Value },
    BoolBinary { op: BoolBinaryOp, result: i64, args: [Value; 2] },
    IntUnary { op: IntUnaryOp, result: i64, arg: Value },
    IntCompare { op: IntCompareOp, result: i64, args: [Value; 2] },
    IntBinary { op: IntBinaryOp, result: i64, args: [Value; 2] },
    IntShift { op: IntShiftOp, result: i64, result_ty: Type, value: Value, count: Value },
    PointerOffset { result: i64, pointer: Value, offset: Value },
    NilTest { result: i64, pointer: Value },
    Malloc { result: i64, size: Value },
    Load { result: i64, result_ty: Type, address: Value },
    Store { address: Value, value: Value },
    Free { pointer: Value },
    Jump { target: i64 },
    JumpCond { cond: Value, true_target: i64, false_target: i64 },
    Syscall { result: Option<i64>, number: Value, args: Vec<Value> },
    Call { callee: Value, results: Vec<(i64, Type)>, args: Vec<Value> },
    Return { args: Vec<Value> },

    // High-level, pre-lowering shared-pointer ops; eliminated by
    // `katara_passes::shared_ptr` before liveness analysis.
    MakeShared { result: i64, size: Value },
    CopyShared { result: i64, ptr: Value, kind: SharedPtrKind },
    DeleteShared { ptr: Value, kind: SharedPtrKind },
    /// Attempts to promote a weak pointer to a strong one: `ptr_result` is
    /// the promoted pointer (nil on failure), `ok_result` reports whether
    /// the promotion happened. Increments the strong count only on success.
    UpgradeWeak { ptr_result: i64, ok_result: i64, ptr: Value },
}

impl Instr {
    /// The control-flow destinations named directly on this instruction, if
    /// it is a terminator. Checked against the func's control-flow relation
    /// by `check::Checker` (`JumpInstr/JumpCondInstr DestinationIsNotChildBlock`).
    pub fn targets(&self) -> Vec<i64> {
        match self {
            Instr::Jump { target } => vec![*target],
            Instr::JumpCond { true_target, false_target, .. } => {
                vec![*true_target, *false_target]
            }
            _ => Vec::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Jump { .. } | Instr::JumpCond { .. } | Instr::Return { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instr::Phi { .. })
    }

    /// The computed values this instruction defines, with their types.
    pub fn defs(&self) -> Vec<(i64, Type)> {
        match self {
            Instr::Mov { result, result_ty, .. }
            | Instr::Phi { result, result_ty, .. }
            | Instr::Conversion { result, result_ty, .. }
            | Instr::Load { result, result_ty, .. } => vec![(*result, *result_ty)],
            Instr::BoolNot { result, .. } => vec![(*result, Type::Bool)],
            Instr::BoolBinary { result, .. } => vec![(*result, Type::Bool)],
            Instr::IntUnary { result, arg, .. } => vec![(*result, arg.get_type())],
            Instr::IntCompare { result, .. } => vec![(*result, Type::Bool)],
            Instr::IntBinary { result, args, .. } => vec![(*result, args[0].get_type())],
            Instr::IntShift { result, result_ty, .. } => vec![(*result, *result_ty)],
            Instr::PointerOffset { result, pointer, .. } => vec![(*result, pointer.get_type())],
            Instr::NilTest { result, .. } => vec![(*result, Type::Bool)],
            Instr::Malloc { result, .. } => vec![(*result, Type::Pointer { weak: false })],
            Instr::Syscall { result: Some(r), .. } => vec![(*r, Type::Int(katara_common::atomics::IntType::I64))],
            Instr::Call { results, .. } => results.clone(),
            Instr::MakeShared { result, .. } => vec![(*result, Type::SharedPointer { weak: false })],
            Instr::CopyShared { result, ptr, kind } => {
                vec![(*result, Type::SharedPointer { weak: *kind == SharedPtrKind::Weak || matches!(ptr.get_type(), Type::SharedPointer { weak: true }) })]
            }
            Instr::UpgradeWeak { ptr_result, ok_result, .. } => {
                vec![(*ptr_result, Type::SharedPointer { weak: false }), (*ok_result, Type::Bool)]
            }
            Instr::Store { .. }
            | Instr::Free { .. }
            | Instr::Jump { .. }
            | Instr::JumpCond { .. }
            | Instr::Return { .. }
            | Instr::Syscall { result: None, .. }
            | Instr::DeleteShared { .. } => Vec::new(),
        }
    }

    /// Every value this instruction reads, tagged with where it reads it
    /// from. Phi arguments are always `UsePosition::Phi`; everything else is
    /// `UsePosition::Normal`.
    pub fn uses(&self) -> Vec<(&Value, UsePosition)> {
        match self {
            Instr::Mov { arg, .. }
            | Instr::Conversion { arg, .. }
            | Instr::BoolNot { arg, .. }
            | Instr::IntUnary { arg, .. } => vec![(arg, UsePosition::Normal)],
            Instr::Phi { args, .. } => args
                .iter()
                .map(|a| {
                    let origin_block = a.origin_block().expect("phi argument must be inherited");
                    (a, UsePosition::Phi { origin_block })
                })
                .collect(),
            Instr::BoolBinary { args, .. }
            | Instr::IntCompare { args, .. }
            | Instr::IntBinary { args, .. } => {
                vec![(&args[0], UsePosition::Normal), (&args[1], UsePosition::Normal)]
            }
            Instr::IntShift { value, count, .. } => {
                vec![(value, UsePosition::Normal), (count, UsePosition::Normal)]
            }
            Instr::PointerOffset { pointer, offset, .. } => {
                vec![(pointer, UsePosition::Normal), (offset, UsePosition::Normal)]
            }
            Instr::NilTest { pointer, .. } => vec![(pointer, UsePosition::Normal)],
            Instr::Malloc { size, .. } => vec![(size, UsePosition::Normal)],
            Instr::Load { address, .. } => vec![(address, UsePosition::Normal)],
            Instr::Store { address, value } => {
                vec![(address, UsePosition::Normal), (value, UsePosition::Normal)]
            }
            Instr::Free { pointer } => vec![(pointer, UsePosition::Normal)],
            Instr::Jump { .. } => Vec::new(),
            Instr::JumpCond { cond, .. } => vec![(cond, UsePosition::Normal)],
            Instr::Syscall { number, args, .. } => {
                let mut uses = vec![(number, UsePosition::Normal)];
                uses.extend(args.iter().map(|a| (a, UsePosition::Normal)));
                uses
            }
            Instr::Call { callee, args, .. } => {
                let mut uses = vec![(callee, UsePosition::Normal)];
                uses.extend(args.iter().map(|a| (a, UsePosition::Normal)));
                uses
            }
            Instr::Return { args } => args.iter().map(|a| (a, UsePosition::Normal)).collect(),
            Instr::MakeShared { size, .. } => vec![(size, UsePosition::Normal)],
            Instr::CopyShared { ptr, .. } | Instr::DeleteShared { ptr, .. } | Instr::UpgradeWeak { ptr, .. } => {
                vec![(ptr, UsePosition::Normal)]
            }
        }
    }

    /// Mutable access to every `Value` embedded in this instruction (operands
    /// and phi arguments alike). Used by `katara_passes::shared_ptr` to
    /// retype values in place once a shared-pointer type lowers to a plain
    /// pointer, without having to rebuild the instruction.
    pub fn for_each_value_mut(&mut self, f: &mut impl FnMut(&mut Value)) {
        match self {
            Instr::Mov { arg, .. }
            | Instr::Conversion { arg, .. }
            | Instr::BoolNot { arg, .. }
            | Instr::IntUnary { arg, .. } => f(arg),
            Instr::Phi { args, .. } => args.iter_mut().for_each(|a| f(a)),
            Instr::BoolBinary { args, .. } | Instr::IntCompare { args, .. } | Instr::IntBinary { args, .. } => {
                args.iter_mut().for_each(|a| f(a));
            }
            Instr::IntShift { value, count, .. } => {
                f(value);
                f(count);
            }
            Instr::PointerOffset { pointer, offset, .. } => {
                f(pointer);
                f(offset);
            }
            Instr::NilTest { pointer, .. } => f(pointer),
            Instr::Malloc { size, .. } => f(size),
            Instr::Load { address, .. } => f(address),
            Instr::Store { address, value } => {
                f(address);
                f(value);
            }
            Instr::Free { pointer } => f(pointer),
            Instr::Jump { .. } => {}
            Instr::JumpCond { cond, .. } => f(cond),
            Instr::Syscall { number, args, .. } => {
                f(number);
                args.iter_mut().for_each(|a| f(a));
            }
            Instr::Call { callee, args, .. } => {
                f(callee);
                args.iter_mut().for_each(|a| f(a));
            }
            Instr::Return { args } => args.iter_mut().for_each(|a| f(a)),
            Instr::MakeShared { size, .. } => f(size),
            Instr::CopyShared { ptr, .. } | Instr::DeleteShared { ptr, .. } | Instr::UpgradeWeak { ptr, .. } => f(ptr),
        }
    }

    /// Mutable access to every `Type` embedded directly in this instruction
    /// (result types and typed-result lists), for the same retyping use as
    /// `for_each_value_mut`.
    pub fn for_each_type_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        match self {
            Instr::Mov { result_ty, .. }
            | Instr::Phi { result_ty, .. }
            | Instr::Conversion { result_ty, .. }
            | Instr::Load { result_ty, .. }
            | Instr::IntShift { result_ty, .. } => f(result_ty),
            Instr::Call { results, .. } => results.iter_mut().for_each(|(_, t)| f(t)),
            _ => {}
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Mov { result, result_ty, arg } => write!(f, "%{result}:{result_ty} = mov {arg}"),
            Instr::Phi { result, result_ty, args } => {
                write!(f, "%{result}:{result_ty} = phi ")?;
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}", rendered.join(", "))
            }
            Instr::Conversion { result, result_ty, arg } => {
                write!(f, "%{result}:{result_ty} = conv {arg}")
            }
            Instr::BoolNot { result, arg } => write!(f, "%{result}:bool = bnot {arg}"),
            Instr::BoolBinary { op, result, args } => {
                write!(f, "%{result}:bool = b{op} {}, {}", args[0], args[1])
            }
            Instr::IntUnary { op, result, arg } => write!(f, "%{result} = i{op} {arg}"),
            Instr::IntCompare { op, result, args } => {
                write!(f, "%{result}:bool = icmp.{op} {}, {}", args[0], args[1])
            }
            Instr::IntBinary { op, result, args } => {
                write!(f, "%{result} = {op} {}, {}", args[0], args[1])
            }
            Instr::IntShift { op, result, value, count, .. } => {
                write!(f, "%{result} = shift.{op} {value}, {count}")
            }
            Instr::PointerOffset { result, pointer, offset } => {
                write!(f, "%{result}:ptr = poff {pointer}, {offset}")
            }
            Instr::NilTest { result, pointer } => write!(f, "%{result}:bool = niltest {pointer}"),
            Instr::Malloc { result, size } => write!(f, "%{result}:ptr = malloc {size}"),
            Instr::Load { result, result_ty, address } => {
                write!(f, "%{result}:{result_ty} = load {address}")
            }
            Instr::Store { address, value } => write!(f, "store {address}, {value}"),
            Instr::Free { pointer } => write!(f, "free {pointer}"),
            Instr::Jump { target } => write!(f, "jmp {{{target}}}"),
            Instr::JumpCond { cond, true_target, false_target } => {
                write!(f, "jcc {cond}, {{{true_target}}}, {{{false_target}}}")
            }
            Instr::Syscall { result, number, args } => {
                if let Some(r) = result {
                    write!(f, "%{r} = ")?;
                }
                write!(f, "syscall {number}")?;
                for a in args {
                    write!(f, ", {a}")?;
                }
                Ok(())
            }
            Instr::Call { callee, results, args } => {
                if !results.is_empty() {
                    let rendered: Vec<String> = results.iter().map(|(n, t)| format!("%{n}:{t}")).collect();
                    write!(f, "{} = ", rendered.join(", "))?;
                }
                write!(f, "call {callee} (")?;
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{})", rendered.join(", "))
            }
            Instr::Return { args } => {
                write!(f, "ret")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
            Instr::MakeShared { result, size } => write!(f, "%{result}:shared_ptr = make_shared {size}"),
            Instr::CopyShared { result, ptr, kind } => {
                write!(f, "%{result}:shared_ptr = copy_shared {ptr}, {kind}")
            }
            Instr::DeleteShared { ptr, kind } => write!(f, "delete_shared {ptr}, {kind}"),
            Instr::UpgradeWeak { ptr_result, ok_result, ptr } => {
                write!(f, "%{ptr_result}:shared_ptr, %{ok_result}:bool = upgrade_weak {ptr}")
            }
        }
    }
}
