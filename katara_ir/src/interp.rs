//! A tree-walking interpreter over `ir::Program`, used by tests and by the
//! `run` driver command, so end-to-end scenarios ("running this program
//! reports exit code N") are executable without a real x86-64 host. This is
//! not the x86-64 path; it never touches `katara_x86_64`.

use std::collections::HashMap;

use katara_common::atomics::{Bool, Int, IntType};

use crate::func::Func;
use crate::instr::{Instr, SharedPtrKind};
use crate::program::Program;
use crate::types::Type;
use crate::value::{Const, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("func @{0} not found")]
    UnknownFunc(i64),
    #[error("block {0} not found in func @{1}")]
    UnknownBlock(i64, i64),
    #[error("value %{0} used before it was defined")]
    UnboundValue(i64),
    #[error("func @{0} has no entry block")]
    NoEntryBlock(i64),
    #[error("block {0} has no terminator")]
    MissingTerminator(i64),
    #[error("phi in block {0} has no argument matching predecessor {1}")]
    NoMatchingPhiArg(i64, i64),
    #[error("expected a value of a different kind at runtime")]
    TypeMismatch,
    #[error("address {0} is out of bounds of the interpreter heap")]
    OutOfBounds(i64),
    #[error("callee does not resolve to a func")]
    NotCallable,
    #[error("atomics error: {0}")]
    Atomics(#[from] katara_common::atomics::AtomicsError),
}

pub type Result<T> = std::result::Result<T, InterpError>;

/// A runtime value: the concrete result of evaluating an `ir::Value` during
/// execution, as opposed to the static `ir::Value`/`ir::Const` it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtValue {
    Bool(bool),
    Int(Int),
    /// A heap address, with `0` reserved as nil.
    Ptr(i64),
    Func(i64),
}

impl RtValue {
    fn as_bool(self) -> Result<bool> {
        match self {
            RtValue::Bool(b) => Ok(b),
            _ => Err(InterpError::TypeMismatch),
        }
    }

    fn as_int(self) -> Result<Int> {
        match self {
            RtValue::Int(i) => Ok(i),
            _ => Err(InterpError::TypeMismatch),
        }
    }

    fn as_ptr(self) -> Result<i64> {
        match self {
            RtValue::Ptr(p) => Ok(p),
            _ => Err(InterpError::TypeMismatch),
        }
    }

    fn write_bytes(self, ty: Type, out: &mut [u8]) {
        match self {
            RtValue::Bool(b) => out[0] = b as u8,
            RtValue::Int(i) => {
                let bytes = i.as_u64().to_le_bytes();
                out.copy_from_slice(&bytes[..ty.size_bytes() as usize]);
            }
            RtValue::Ptr(p) => out.copy_from_slice(&(p as u64).to_le_bytes()),
            RtValue::Func(n) => out.copy_from_slice(&(n as u64).to_le_bytes()),
        }
    }

    fn read_bytes(ty: Type, bytes: &[u8]) -> RtValue {
        match ty {
            Type::Bool => RtValue::Bool(bytes[0] != 0),
            Type::Int(int_ty) => {
                let mut buf = [0u8; 8];
                buf[..bytes.len()].copy_from_slice(bytes);
                RtValue::Int(Int::from_u64(int_ty, u64::from_le_bytes(buf)))
            }
            Type::Pointer { .. } | Type::SharedPointer { .. } => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                RtValue::Ptr(u64::from_le_bytes(buf) as i64)
            }
            Type::Func => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                RtValue::Func(u64::from_le_bytes(buf) as i64)
            }
        }
    }
}

/// A bump-allocated byte heap. Addresses below `RESERVED` are never handed
/// out, so `0` unambiguously means nil. `free` does not reclaim space (this
/// is a test interpreter, not an allocator under test) but is tracked so a
/// use-after-free at least has somewhere to be taught, if a future pass
/// wants to check for it.
const RESERVED: usize = 8;

struct Heap {
    memory: Vec<u8>,
    freed: std::collections::HashSet<i64>,
}

impl Heap {
    fn new() -> Self {
        Self { memory: vec![0u8; RESERVED], freed: std::collections::HashSet::new() }
    }

    fn alloc(&mut self, size: i64) -> i64 {
        let addr = self.memory.len() as i64;
        self.memory.resize(self.memory.len() + size.max(0) as usize, 0);
        addr
    }

    fn free(&mut self, addr: i64) {
        self.freed.insert(addr);
    }

    fn slice(&self, addr: i64, len: usize) -> Result<&[u8]> {
        let start = addr as usize;
        let end = start + len;
        self.memory.get(start..end).ok_or(InterpError::OutOfBounds(addr))
    }

    fn slice_mut(&mut self, addr: i64, len: usize) -> Result<&mut [u8]> {
        let start = addr as usize;
        let end = start + len;
        let bound = self.memory.len();
        if end > bound {
            return Err(InterpError::OutOfBounds(addr));
        }
        Ok(&mut self.memory[start..end])
    }

    fn read_i64(&self, addr: i64) -> Result<i64> {
        let bytes = self.slice(addr, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    fn write_i64(&mut self, addr: i64, value: i64) -> Result<()> {
        let bytes = self.slice_mut(addr, 8)?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_typed(&self, addr: i64, ty: Type) -> Result<RtValue> {
        let bytes = self.slice(addr, ty.size_bytes() as usize)?;
        Ok(RtValue::read_bytes(ty, bytes))
    }

    fn write_typed(&mut self, addr: i64, ty: Type, value: RtValue) -> Result<()> {
        let bytes = self.slice_mut(addr, ty.size_bytes() as usize)?;
        value.write_bytes(ty, bytes);
        Ok(())
    }
}

type Frame = HashMap<i64, RtValue>;

enum ControlFlow {
    Jump(i64),
    Return(Vec<RtValue>),
}

pub struct Interpreter<'a> {
    program: &'a Program,
    heap: Heap,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self { program, heap: Heap::new() }
    }

    /// Runs the program's entry func with no arguments and returns its
    /// first result, truncated to an `i64` exit code the way `katara run`
    /// reports it.
    pub fn run_to_exit_code(&mut self) -> Result<i64> {
        let entry = self.program.entry_func().ok_or(InterpError::UnknownFunc(-1))?;
        let results = self.call(entry, Vec::new())?;
        let Some(RtValue::Int(i)) = results.first() else {
            return Err(InterpError::TypeMismatch);
        };
        Ok(i.as_i64())
    }

    pub fn call(&mut self, func_number: i64, args: Vec<RtValue>) -> Result<Vec<RtValue>> {
        let func = self.program.func(func_number).ok_or(InterpError::UnknownFunc(func_number))?;
        let entry = func.entry_block().ok_or(InterpError::NoEntryBlock(func_number))?;

        let mut frame: Frame = HashMap::new();
        for ((number, _), value) in func.args().iter().zip(args) {
            frame.insert(*number, value);
        }

        let mut current = entry;
        let mut prev: Option<i64> = None;
        loop {
            let block = func.block(current).ok_or(InterpError::UnknownBlock(current, func_number))?;

            for phi in block.phis() {
                let Instr::Phi { result, args, .. } = phi else { unreachable!() };
                let chosen = args
                    .iter()
                    .find(|a| a.origin_block() == prev)
                    .ok_or_else(|| InterpError::NoMatchingPhiArg(current, prev.unwrap_or(-1)))?;
                let inner = peel_inherited(chosen);
                let value = self.eval(func, &frame, inner)?;
                frame.insert(*result, value);
            }

            let mut flow = None;
            for instr in block.non_phis() {
                if let Some(cf) = self.exec(func, &mut frame, instr)? {
                    flow = Some(cf);
                    break;
                }
            }
            match flow.ok_or_else(|| InterpError::MissingTerminator(current))? {
                ControlFlow::Jump(target) => {
                    prev = Some(current);
                    current = target;
                }
                ControlFlow::Return(values) => return Ok(values),
            }
        }
    }

    fn eval(&self, func: &Func, frame: &Frame, value: &Value) -> Result<RtValue> {
        match value {
            Value::Constant(c) => Ok(match c {
                Const::Bool(b) => RtValue::Bool(*b),
                Const::Int(i) => RtValue::Int(*i),
                Const::NilPointer => RtValue::Ptr(0),
                Const::Func(n) => RtValue::Func(*n),
            }),
            Value::Computed { number, .. } => {
                frame.get(number).copied().ok_or(InterpError::UnboundValue(*number))
            }
            Value::InheritedValue { value, .. } => self.eval(func, frame, value),
        }
    }

    /// Executes one non-phi instruction. Returns `Some` when it was a
    /// terminator (ending the current block).
    fn exec(&mut self, func: &Func, frame: &mut Frame, instr: &Instr) -> Result<Option<ControlFlow>> {
        match instr {
            Instr::Mov { result, arg, .. } => {
                let v = self.eval(func, frame, arg)?;
                frame.insert(*result, v);
            }
            Instr::Phi { .. } => unreachable!("phis are handled before non_phis"),
            Instr::Conversion { result, result_ty, arg } => {
                let v = self.eval(func, frame, arg)?;
                let converted = match (v, result_ty) {
                    (RtValue::Int(i), Type::Int(target)) => RtValue::Int(i.convert_to(*target)?),
                    (RtValue::Bool(b), Type::Int(target)) => RtValue::Int(Int::from_bool(*target, b)),
                    (RtValue::Int(i), Type::Bool) => RtValue::Bool(i.to_bool()),
                    _ => return Err(InterpError::TypeMismatch),
                };
                frame.insert(*result, converted);
            }
            Instr::BoolNot { result, arg } => {
                let v = self.eval(func, frame, arg)?.as_bool()?;
                frame.insert(*result, RtValue::Bool(!v));
            }
            Instr::BoolBinary { op, result, args } => {
                let a = self.eval(func, frame, &args[0])?.as_bool()?;
                let b = self.eval(func, frame, &args[1])?.as_bool()?;
                frame.insert(*result, RtValue::Bool(Bool::compute(a, *op, b)));
            }
            Instr::IntUnary { op, result, arg } => {
                let a = self.eval(func, frame, arg)?.as_int()?;
                frame.insert(*result, RtValue::Int(Int::checked_unary(*op, a)?));
            }
            Instr::IntCompare { op, result, args } => {
                let a = self.eval(func, frame, &args[0])?.as_int()?;
                let b = self.eval(func, frame, &args[1])?.as_int()?;
                frame.insert(*result, RtValue::Bool(Int::compare(a, *op, b)?));
            }
            Instr::IntBinary { op, result, args } => {
                let a = self.eval(func, frame, &args[0])?.as_int()?;
                let b = self.eval(func, frame, &args[1])?.as_int()?;
                frame.insert(*result, RtValue::Int(Int::checked_binary(a, *op, b)?));
            }
            Instr::IntShift { op, result, value, count, .. } => {
                let v = self.eval(func, frame, value)?.as_int()?;
                let c = self.eval(func, frame, count)?.as_int()?;
                frame.insert(*result, RtValue::Int(Int::shift(v, *op, c)));
            }
            Instr::PointerOffset { result, pointer, offset } => {
                let p = self.eval(func, frame, pointer)?.as_ptr()?;
                let o = self.eval(func, frame, offset)?.as_int()?;
                frame.insert(*result, RtValue::Ptr(p + o.as_i64()));
            }
            Instr::NilTest { result, pointer } => {
                let p = self.eval(func, frame, pointer)?.as_ptr()?;
                frame.insert(*result, RtValue::Bool(p == 0));
            }
            Instr::Malloc { result, size } => {
                let size = self.eval(func, frame, size)?.as_int()?;
                let addr = self.heap.alloc(size.as_i64());
                frame.insert(*result, RtValue::Ptr(addr));
            }
            Instr::Load { result, result_ty, address } => {
                let addr = self.eval(func, frame, address)?.as_ptr()?;
                let v = self.heap.read_typed(addr, *result_ty)?;
                frame.insert(*result, v);
            }
            Instr::Store { address, value } => {
                let addr = self.eval(func, frame, address)?.as_ptr()?;
                let v = self.eval(func, frame, value)?;
                self.heap.write_typed(addr, value.get_type(), v)?;
            }
            Instr::Free { pointer } => {
                let addr = self.eval(func, frame, pointer)?.as_ptr()?;
                if addr != 0 {
                    self.heap.free(addr);
                }
            }
            Instr::Jump { target } => return Ok(Some(ControlFlow::Jump(*target))),
            Instr::JumpCond { cond, true_target, false_target } => {
                let c = self.eval(func, frame, cond)?.as_bool()?;
                return Ok(Some(ControlFlow::Jump(if c { *true_target } else { *false_target })));
            }
            Instr::Syscall { result, args, .. } => {
                // The test interpreter never talks to a real kernel; every
                // syscall is a no-op that yields 0, which is enough for the
                // programs exercised in katara_driver's end-to-end tests;
                // none of them depend on actual syscall behavior.
                let _ = args;
                if let Some(r) = result {
                    frame.insert(*r, RtValue::Int(Int::from_i64(IntType::I64, 0)));
                }
            }
            Instr::Call { callee, results, args } => {
                let callee_fn = match self.eval(func, frame, callee)? {
                    RtValue::Func(n) => n,
                    _ => return Err(InterpError::NotCallable),
                };
                let arg_values: Vec<RtValue> = args
                    .iter()
                    .map(|a| self.eval(func, frame, a))
                    .collect::<Result<_>>()?;
                let returned = self.call(callee_fn, arg_values)?;
                for ((number, _), value) in results.iter().zip(returned) {
                    frame.insert(*number, value);
                }
            }
            Instr::Return { args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(func, frame, a))
                    .collect::<Result<_>>()?;
                return Ok(Some(ControlFlow::Return(values)));
            }
            Instr::MakeShared { result, size } => {
                let size = self.eval(func, frame, size)?.as_int()?;
                let header = self.heap.alloc(16 + size.as_i64());
                self.heap.write_i64(header, 1)?; // strong = 1
                self.heap.write_i64(header + 8, 0)?; // weak = 0
                frame.insert(*result, RtValue::Ptr(header + 16));
            }
            Instr::CopyShared { result, ptr, kind } => {
                let payload = self.eval(func, frame, ptr)?.as_ptr()?;
                if payload == 0 {
                    frame.insert(*result, RtValue::Ptr(0));
                } else {
                    let header = payload - 16;
                    let offset = if *kind == SharedPtrKind::Strong { 0 } else { 8 };
                    let count = self.heap.read_i64(header + offset)?;
                    self.heap.write_i64(header + offset, count + 1)?;
                    frame.insert(*result, RtValue::Ptr(payload));
                }
            }
            Instr::UpgradeWeak { ptr_result, ok_result, ptr } => {
                let payload = self.eval(func, frame, ptr)?.as_ptr()?;
                if payload == 0 {
                    frame.insert(*ptr_result, RtValue::Ptr(0));
                    frame.insert(*ok_result, RtValue::Bool(false));
                } else {
                    let header = payload - 16;
                    let strong = self.heap.read_i64(header)?;
                    if strong == 0 {
                        frame.insert(*ptr_result, RtValue::Ptr(0));
                        frame.insert(*ok_result, RtValue::Bool(false));
                    } else {
                        self.heap.write_i64(header, strong + 1)?;
                        frame.insert(*ptr_result, RtValue::Ptr(payload));
                        frame.insert(*ok_result, RtValue::Bool(true));
                    }
                }
            }
            Instr::DeleteShared { ptr, kind } => {
                let payload = self.eval(func, frame, ptr)?.as_ptr()?;
                if payload != 0 {
                    let header = payload - 16;
                    let offset = if *kind == SharedPtrKind::Strong { 0 } else { 8 };
                    let other_offset = if *kind == SharedPtrKind::Strong { 8 } else { 0 };
                    let count = self.heap.read_i64(header + offset)?;
                    self.heap.write_i64(header + offset, count - 1)?;
                    if count - 1 == 0 {
                        if *kind == SharedPtrKind::Strong {
                            self.heap.free(payload);
                        }
                        let other = self.heap.read_i64(header + other_offset)?;
                        if other == 0 {
                            self.heap.free(header);
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

fn peel_inherited(value: &Value) -> &Value {
    match value {
        Value::InheritedValue { value, .. } => peel_inherited(value),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use katara_common::atomics::{IntBinaryOp, IntCompareOp};

    fn main_with_single_block(body: Vec<Instr>) -> Program {
        let mut program = Program::new();
        let mut func = Func::new(0, "main", vec![], vec![Type::Int(IntType::I64)]);
        let mut b0 = Block::new(0);
        for instr in body {
            b0.push(instr);
        }
        func.add_block(b0);
        func.set_entry_block(0);
        program.add_func(func);
        program.set_entry_func(0);
        program
    }

    /// Scenario 1: `func main() int { return 0 }`.
    #[test]
    fn empty_main_returns_zero() {
        let program = main_with_single_block(vec![Instr::Return {
            args: vec![Value::constant(Const::Int(Int::from_i64(IntType::I64, 0)))],
        }]);
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.run_to_exit_code().unwrap(), 0);
    }

    /// Scenario 2: a variable stored through a shared pointer and read back.
    #[test]
    fn shared_pointer_round_trip_returns_stored_value() {
        let program = main_with_single_block(vec![
            Instr::MakeShared { result: 0, size: Value::constant(Const::Int(Int::from_i64(IntType::I64, 8))) },
            Instr::Store {
                address: Value::computed(Type::SharedPointer { weak: false }, 0),
                value: Value::constant(Const::Int(Int::from_i64(IntType::I64, 42))),
            },
            Instr::Load {
                result: 1,
                result_ty: Type::Int(IntType::I64),
                address: Value::computed(Type::SharedPointer { weak: false }, 0),
            },
            Instr::DeleteShared {
                ptr: Value::computed(Type::SharedPointer { weak: false }, 0),
                kind: SharedPtrKind::Strong,
            },
            Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 1)] },
        ]);
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.run_to_exit_code().unwrap(), 42);
    }

    /// Scenario 4: `42 % 24` as a constant expression.
    #[test]
    fn constant_modulo_returns_eighteen() {
        let program = main_with_single_block(vec![
            Instr::IntBinary {
                op: IntBinaryOp::Rem,
                result: 0,
                args: [
                    Value::constant(Const::Int(Int::from_i64(IntType::I64, 42))),
                    Value::constant(Const::Int(Int::from_i64(IntType::I64, 24))),
                ],
            },
            Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 0)] },
        ]);
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.run_to_exit_code().unwrap(), 18);
    }

    /// Scenario 3: a loop summing 0..9 (inclusive) returns 45, driven by a
    /// phi-carried accumulator and induction variable at the loop header.
    #[test]
    fn loop_summing_zero_to_nine_returns_forty_five() {
        let mut program = Program::new();
        let mut func = Func::new(0, "main", vec![], vec![Type::Int(IntType::I64)]);

        let i64 = Type::Int(IntType::I64);
        let zero = Value::constant(Const::Int(Int::from_i64(IntType::I64, 0)));
        let one = Value::constant(Const::Int(Int::from_i64(IntType::I64, 1)));
        let ten = Value::constant(Const::Int(Int::from_i64(IntType::I64, 10)));

        let mut entry = Block::new(0);
        entry.push(Instr::Jump { target: 1 });
        func.add_block(entry);
        func.set_entry_block(0);

        // block 1 (loop header): %0 = phi [i from 0, i_next from 2]; %1 = phi [sum from 0, sum_next from 2]
        let mut header = Block::new(1);
        header.push(Instr::Phi {
            result: 0,
            result_ty: i64,
            args: vec![Value::inherited(zero.clone(), 0), Value::inherited(Value::computed(i64, 4), 2)],
        });
        header.push(Instr::Phi {
            result: 1,
            result_ty: i64,
            args: vec![Value::inherited(zero, 0), Value::inherited(Value::computed(i64, 5), 2)],
        });
        header.push(Instr::IntCompare {
            op: IntCompareOp::Lss,
            result: 2,
            args: [Value::computed(i64, 0), ten],
        });
        header.push(Instr::JumpCond {
            cond: Value::computed(Type::Bool, 2),
            true_target: 2,
            false_target: 3,
        });
        func.add_block(header);

        // block 2 (loop body): sum_next = sum + i; i_next = i + 1; jump header
        let mut body = Block::new(2);
        body.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 5,
            args: [Value::computed(i64, 1), Value::computed(i64, 0)],
        });
        body.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 4,
            args: [Value::computed(i64, 0), one],
        });
        body.push(Instr::Jump { target: 1 });
        func.add_block(body);

        // block 3 (exit): return sum
        let mut exit = Block::new(3);
        exit.push(Instr::Return { args: vec![Value::computed(i64, 1)] });
        func.add_block(exit);

        for (from, to) in [(0, 1), (1, 2), (1, 3), (2, 1)] {
            func.add_control_flow(from, to);
        }

        program.add_func(func);
        program.set_entry_func(0);

        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.run_to_exit_code().unwrap(), 45);
    }
}
