//! Textual IR format: printing follows the existing `Display` impls on
//! `Program`/`Func`/`Block`/`Instr`; this module adds the inverse — a small
//! hand-written recursive-descent reader over the IR's own grammar.
//!
//! Grammar:
//! `@<num> <name> (<args>) => (<result-types>) { <blocks> }`,
//! blocks as `{<num>} <instrs>`, one instruction per line.

use std::collections::HashMap;

use katara_common::atomics::{BoolBinaryOp, Int, IntBinaryOp, IntCompareOp, IntShiftOp, IntType, IntUnaryOp};

use crate::block::Block;
use crate::func::Func;
use crate::instr::{Instr, SharedPtrKind};
use crate::program::Program;
use crate::types::Type;
use crate::value::{Const, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error("expected {expected}, found `{found}`")]
    Expected { expected: String, found: String },
    #[error("malformed token `{0}`")]
    Malformed(String),
}

pub fn print_program(program: &Program) -> String {
    program.to_string()
}

pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    let mut program = Program::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.peek() {
        if line.trim().is_empty() {
            lines.next();
            continue;
        }
        let func = parse_func(&mut lines)?;
        let number = func.number();
        program.add_func(func);
        if program.entry_func().is_none() {
            // The first func in textual order is conventionally the entry;
            // callers that need a different entry call `set_entry_func`
            // explicitly after parsing.
            program.set_entry_func(number);
        }
    }
    Ok(program)
}

type Lines<'a> = std::iter::Peekable<std::str::Lines<'a>>;

fn parse_func(lines: &mut Lines) -> Result<Func, ParseError> {
    let header = lines.next().ok_or_else(|| ParseError::UnexpectedEof("func header".into()))?;
    let header = header.trim();
    let mut tok = Tokenizer::new(header);
    tok.expect_char('@')?;
    let number = tok.number()?;
    let name = tok.ident()?;
    tok.expect_char('(')?;
    let args = parse_typed_value_list(&mut tok)?;
    tok.expect_char(')')?;
    tok.expect_str("=>")?;
    tok.expect_char('(')?;
    let result_types = parse_type_list(&mut tok)?;
    tok.expect_char(')')?;
    tok.expect_char('{')?;

    let mut max_value = args.iter().map(|(n, _)| *n).max().unwrap_or(-1);
    let mut func = Func::new(number, name, args, result_types);
    let mut max_block = -1i64;

    loop {
        let line = lines.next().ok_or_else(|| ParseError::UnexpectedEof("block or `}`".into()))?;
        let trimmed = line.trim();
        if trimmed == "}" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        let block = parse_block(trimmed, lines, &mut max_value)?;
        max_block = max_block.max(block.number());
        if func.entry_block().is_none() {
            func.set_entry_block(block.number());
        }
        for &target in &block.successors() {
            func.add_control_flow(block.number(), target);
        }
        func.add_block(block);
    }
    func.bump_counters(max_block + 1, max_value + 1);
    resolve_value_types(&mut func);
    Ok(func)
}

/// Most instructions print an argument's value number bare (`%3`), with no
/// type suffix — `Value::Display` never writes one, only the instructions
/// that introduce a value (`mov`/`phi`/`conv`/`load`/`call`) print its
/// type. `parse_value` has nothing to resolve a bare `%n` to but
/// `Type::Bool`, so every instruction's uses need patching up afterward
/// against the types their defining instructions actually assigned.
fn resolve_value_types(func: &mut Func) {
    let mut types: HashMap<i64, Type> = func.args().iter().cloned().collect();
    for block in func.blocks() {
        for instr in block.instrs() {
            for (n, ty) in instr.defs() {
                types.insert(n, ty);
            }
        }
    }
    for number in func.block_numbers() {
        let block = func.block_mut(number).expect("block_numbers only returns blocks that exist");
        for instr in block.instrs_mut() {
            instr.for_each_value_mut(&mut |v| fixup_value_type(v, &types));
        }
    }
}

fn fixup_value_type(value: &mut Value, types: &HashMap<i64, Type>) {
    match value {
        Value::Computed { ty, number } => {
            if let Some(&resolved) = types.get(number) {
                *ty = resolved;
            }
        }
        Value::InheritedValue { value, .. } => fixup_value_type(value, types),
        Value::Constant(_) => {}
    }
}

fn parse_block(header_line: &str, lines: &mut Lines, max_value: &mut i64) -> Result<Block, ParseError> {
    let mut tok = Tokenizer::new(header_line);
    tok.expect_char('{')?;
    let number = tok.number()?;
    tok.expect_char('}')?;
    let mut block = Block::new(number);

    let rest = tok.remainder();
    let rest = rest.trim();
    if !rest.is_empty() {
        let instr = parse_instr(rest)?;
        for (n, _) in instr.defs() {
            *max_value = (*max_value).max(n);
        }
        block.push(instr);
    }

    loop {
        let Some(next) = lines.peek() else {
            return Err(ParseError::UnexpectedEof("instruction or `}`".into()));
        };
        let trimmed = next.trim();
        if trimmed.starts_with('{') || trimmed == "}" {
            break;
        }
        let line = lines.next().unwrap();
        let instr = parse_instr(line.trim())?;
        for (n, _) in instr.defs() {
            *max_value = (*max_value).max(n);
        }
        block.push(instr);
    }
    Ok(block)
}

fn parse_typed_value_list(tok: &mut Tokenizer) -> Result<Vec<(i64, Type)>, ParseError> {
    let mut out = Vec::new();
    if tok.peek_char() == Some(')') {
        return Ok(out);
    }
    loop {
        tok.expect_char('%')?;
        let number = tok.number()?;
        tok.expect_char(':')?;
        let ty = parse_type(tok)?;
        out.push((number, ty));
        if tok.peek_char() == Some(',') {
            tok.next_char();
            tok.skip_ws();
        } else {
            break;
        }
    }
    Ok(out)
}

fn parse_type_list(tok: &mut Tokenizer) -> Result<Vec<Type>, ParseError> {
    let mut out = Vec::new();
    if tok.peek_char() == Some(')') {
        return Ok(out);
    }
    loop {
        out.push(parse_type(tok)?);
        if tok.peek_char() == Some(',') {
            tok.next_char();
            tok.skip_ws();
        } else {
            break;
        }
    }
    Ok(out)
}

fn parse_type(tok: &mut Tokenizer) -> Result<Type, ParseError> {
    let word = tok.ident()?;
    word.parse::<Type>().map_err(ParseError::Malformed)
}

/// Parses one instruction line. The instruction-set dispatch mirrors
/// `Instr`'s `Display` impl exactly, so printing then parsing is the
/// identity on any program this module produced.
fn parse_instr(line: &str) -> Result<Instr, ParseError> {
    let mut tok = Tokenizer::new(line);

    // Instructions with results: `%n[:ty][, %n2:ty2...] = mnemonic ...`
    if tok.peek_char() == Some('%') {
        let mut results = Vec::new();
        loop {
            tok.expect_char('%')?;
            let n = tok.number()?;
            let ty = if tok.peek_char() == Some(':') {
                tok.next_char();
                Some(parse_type(&mut tok)?)
            } else {
                None
            };
            results.push((n, ty));
            if tok.peek_char() == Some(',') {
                tok.next_char();
                tok.skip_ws();
            } else {
                break;
            }
        }
        tok.expect_char('=')?;
        let mnemonic = tok.ident()?;
        return parse_result_instr(results, &mnemonic, &mut tok);
    }

    let mnemonic = tok.ident()?;
    match mnemonic.as_str() {
        "ret" => {
            let mut args = Vec::new();
            while !tok.is_empty() {
                args.push(parse_value(&mut tok)?);
                tok.skip_ws();
            }
            Ok(Instr::Return { args })
        }
        "jmp" => {
            let target = parse_block_ref(&mut tok)?;
            Ok(Instr::Jump { target })
        }
        "jcc" => {
            let cond = parse_value(&mut tok)?;
            tok.expect_char(',')?;
            let true_target = parse_block_ref(&mut tok)?;
            tok.expect_char(',')?;
            let false_target = parse_block_ref(&mut tok)?;
            Ok(Instr::JumpCond { cond, true_target, false_target })
        }
        "store" => {
            let address = parse_value(&mut tok)?;
            tok.expect_char(',')?;
            let value = parse_value(&mut tok)?;
            Ok(Instr::Store { address, value })
        }
        "free" => Ok(Instr::Free { pointer: parse_value(&mut tok)? }),
        "delete_shared" => {
            let ptr = parse_value(&mut tok)?;
            tok.expect_char(',')?;
            let kind = parse_shared_kind(&mut tok)?;
            Ok(Instr::DeleteShared { ptr, kind })
        }
        "syscall" => {
            let number = parse_value(&mut tok)?;
            let mut args = Vec::new();
            while tok.peek_char() == Some(',') {
                tok.next_char();
                tok.skip_ws();
                args.push(parse_value(&mut tok)?);
            }
            Ok(Instr::Syscall { result: None, number, args })
        }
        other => Err(ParseError::Malformed(format!("unknown no-result mnemonic `{other}`"))),
    }
}

fn parse_result_instr(results: Vec<(i64, Option<Type>)>, mnemonic: &str, tok: &mut Tokenizer) -> Result<Instr, ParseError> {
    let one = |r: &[(i64, Option<Type>)]| -> i64 { r[0].0 };
    let one_ty = |r: &[(i64, Option<Type>)]| -> Type { r[0].1.unwrap_or(Type::Bool) };
    match mnemonic {
        "mov" => Ok(Instr::Mov { result: one(&results), result_ty: one_ty(&results), arg: parse_value(tok)? }),
        "phi" => {
            let mut args = Vec::new();
            loop {
                args.push(parse_value(tok)?);
                if tok.peek_char() == Some(',') {
                    tok.next_char();
                    tok.skip_ws();
                } else {
                    break;
                }
            }
            Ok(Instr::Phi { result: one(&results), result_ty: one_ty(&results), args })
        }
        "conv" => Ok(Instr::Conversion { result: one(&results), result_ty: one_ty(&results), arg: parse_value(tok)? }),
        "bnot" => Ok(Instr::BoolNot { result: one(&results), arg: parse_value(tok)? }),
        "poff" => {
            let pointer = parse_value(tok)?;
            tok.expect_char(',')?;
            let offset = parse_value(tok)?;
            Ok(Instr::PointerOffset { result: one(&results), pointer, offset })
        }
        "niltest" => Ok(Instr::NilTest { result: one(&results), pointer: parse_value(tok)? }),
        "malloc" => Ok(Instr::Malloc { result: one(&results), size: parse_value(tok)? }),
        "load" => Ok(Instr::Load { result: one(&results), result_ty: one_ty(&results), address: parse_value(tok)? }),
        "make_shared" => Ok(Instr::MakeShared { result: one(&results), size: parse_value(tok)? }),
        "copy_shared" => {
            let ptr = parse_value(tok)?;
            tok.expect_char(',')?;
            let kind = parse_shared_kind(tok)?;
            Ok(Instr::CopyShared { result: one(&results), ptr, kind })
        }
        "upgrade_weak" => {
            let ptr_result = results[0].0;
            let ok_result = results
                .get(1)
                .map(|(n, _)| *n)
                .ok_or_else(|| ParseError::Malformed("upgrade_weak needs two results".into()))?;
            Ok(Instr::UpgradeWeak { ptr_result, ok_result, ptr: parse_value(tok)? })
        }
        "call" => {
            let callee = parse_value(tok)?;
            tok.expect_char('(')?;
            let mut args = Vec::new();
            if tok.peek_char() != Some(')') {
                loop {
                    args.push(parse_value(tok)?);
                    if tok.peek_char() == Some(',') {
                        tok.next_char();
                        tok.skip_ws();
                    } else {
                        break;
                    }
                }
            }
            tok.expect_char(')')?;
            let results = results.into_iter().map(|(n, t)| (n, t.unwrap_or(Type::Bool))).collect();
            Ok(Instr::Call { callee, results, args })
        }
        "syscall" => {
            let number = parse_value(tok)?;
            let mut args = Vec::new();
            while tok.peek_char() == Some(',') {
                tok.next_char();
                tok.skip_ws();
                args.push(parse_value(tok)?);
            }
            Ok(Instr::Syscall { result: Some(one(&results)), number, args })
        }
        m if m.starts_with('b') && m.len() > 1 => {
            let op = parse_bool_binary_op(&m[1..])?;
            let a = parse_value(tok)?;
            tok.expect_char(',')?;
            let b = parse_value(tok)?;
            Ok(Instr::BoolBinary { op, result: one(&results), args: [a, b] })
        }
        m if m.starts_with('i') && m.len() > 1 && !m.starts_with("icmp") => {
            let op = parse_int_unary_op(&m[1..])?;
            Ok(Instr::IntUnary { op, result: one(&results), arg: parse_value(tok)? })
        }
        m if m.starts_with("icmp.") => {
            let op = parse_int_compare_op(&m[5..])?;
            let a = parse_value(tok)?;
            tok.expect_char(',')?;
            let b = parse_value(tok)?;
            Ok(Instr::IntCompare { op, result: one(&results), args: [a, b] })
        }
        m if m.starts_with("shift.") => {
            let op = parse_int_shift_op(&m[6..])?;
            let value = parse_value(tok)?;
            tok.expect_char(',')?;
            let count = parse_value(tok)?;
            Ok(Instr::IntShift { op, result: one(&results), result_ty: value.get_type(), value, count })
        }
        m => {
            if let Ok(op) = parse_int_binary_op(m) {
                let a = parse_value(tok)?;
                tok.expect_char(',')?;
                let b = parse_value(tok)?;
                return Ok(Instr::IntBinary { op, result: one(&results), args: [a, b] });
            }
            Err(ParseError::Malformed(format!("unknown mnemonic `{m}`")))
        }
    }
}

fn parse_shared_kind(tok: &mut Tokenizer) -> Result<SharedPtrKind, ParseError> {
    match tok.ident()?.as_str() {
        "strong" => Ok(SharedPtrKind::Strong),
        "weak" => Ok(SharedPtrKind::Weak),
        other => Err(ParseError::Malformed(format!("unknown shared-pointer kind `{other}`"))),
    }
}

fn parse_bool_binary_op(s: &str) -> Result<BoolBinaryOp, ParseError> {
    match s {
        "eq" => Ok(BoolBinaryOp::Eq),
        "neq" => Ok(BoolBinaryOp::Neq),
        "and" => Ok(BoolBinaryOp::And),
        "or" => Ok(BoolBinaryOp::Or),
        other => Err(ParseError::Malformed(format!("unknown bool op `{other}`"))),
    }
}

fn parse_int_unary_op(s: &str) -> Result<IntUnaryOp, ParseError> {
    match s {
        "neg" => Ok(IntUnaryOp::Neg),
        "not" => Ok(IntUnaryOp::Not),
        other => Err(ParseError::Malformed(format!("unknown int unary op `{other}`"))),
    }
}

fn parse_int_compare_op(s: &str) -> Result<IntCompareOp, ParseError> {
    match s {
        "eq" => Ok(IntCompareOp::Eq),
        "neq" => Ok(IntCompareOp::Neq),
        "lss" => Ok(IntCompareOp::Lss),
        "leq" => Ok(IntCompareOp::Leq),
        "geq" => Ok(IntCompareOp::Geq),
        "gtr" => Ok(IntCompareOp::Gtr),
        other => Err(ParseError::Malformed(format!("unknown int compare op `{other}`"))),
    }
}

fn parse_int_binary_op(s: &str) -> Result<IntBinaryOp, ParseError> {
    match s {
        "add" => Ok(IntBinaryOp::Add),
        "sub" => Ok(IntBinaryOp::Sub),
        "mul" => Ok(IntBinaryOp::Mul),
        "div" => Ok(IntBinaryOp::Div),
        "rem" => Ok(IntBinaryOp::Rem),
        "and" => Ok(IntBinaryOp::And),
        "or" => Ok(IntBinaryOp::Or),
        "xor" => Ok(IntBinaryOp::Xor),
        "andnot" => Ok(IntBinaryOp::AndNot),
        other => Err(ParseError::Malformed(format!("unknown int binary op `{other}`"))),
    }
}

fn parse_int_shift_op(s: &str) -> Result<IntShiftOp, ParseError> {
    match s {
        "shl" => Ok(IntShiftOp::Left),
        "shr" => Ok(IntShiftOp::Right),
        other => Err(ParseError::Malformed(format!("unknown shift op `{other}`"))),
    }
}

fn parse_block_ref(tok: &mut Tokenizer) -> Result<i64, ParseError> {
    tok.expect_char('{')?;
    let n = tok.number()?;
    tok.expect_char('}')?;
    Ok(n)
}

fn parse_value(tok: &mut Tokenizer) -> Result<Value, ParseError> {
    let base = match tok.peek_char() {
        Some('%') => {
            tok.next_char();
            let number = tok.number()?;
            let ty = if tok.peek_char() == Some(':') {
                tok.next_char();
                parse_type(tok)?
            } else {
                Type::Bool
            };
            Value::computed(ty, number)
        }
        Some('#') => {
            tok.next_char();
            parse_const_literal(tok)?
        }
        Some('@') => {
            tok.next_char();
            let n = tok.number()?;
            Value::constant(Const::Func(n))
        }
        Some('0') => {
            tok.expect_str("0x0")?;
            Value::constant(Const::NilPointer)
        }
        _ => return Err(ParseError::Expected { expected: "value".into(), found: tok.remainder() }),
    };

    if tok.peek_char() == Some('@') {
        tok.next_char();
        tok.expect_char('{')?;
        let origin = tok.number()?;
        tok.expect_char('}')?;
        return Ok(Value::inherited(base, origin));
    }
    Ok(base)
}

fn parse_const_literal(tok: &mut Tokenizer) -> Result<Value, ParseError> {
    // `#true`/`#false` or `#<int>:<type>`
    let word = tok.ident_allow_digits()?;
    if word == "true" || word == "false" {
        return Ok(Value::constant(Const::Bool(word == "true")));
    }
    tok.expect_char(':')?;
    let ty = parse_type(tok)?;
    let int_ty = match ty {
        Type::Int(it) => it,
        _ => return Err(ParseError::Malformed(format!("constant `{word}` has non-integer type"))),
    };
    let value = Int::parse_decimal(int_ty, &word).map_err(|e| ParseError::Malformed(e.to_string()))?;
    Ok(Value::constant(Const::Int(value)))
}

/// A minimal hand-rolled tokenizer operating directly on a single line's
/// `&str`, tracking a byte offset cursor.
struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        let mut t = Self { src, pos: 0 };
        t.skip_ws();
        t
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn remainder(&self) -> String {
        self.src[self.pos..].to_string()
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src.as_bytes()[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        self.skip_ws();
        Some(c)
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        match self.next_char() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(ParseError::Expected { expected: expected.to_string(), found: c.to_string() }),
            None => Err(ParseError::UnexpectedEof(expected.to_string())),
        }
    }

    fn expect_str(&mut self, expected: &str) -> Result<(), ParseError> {
        if self.src[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            self.skip_ws();
            Ok(())
        } else {
            Err(ParseError::Expected { expected: expected.into(), found: self.remainder() })
        }
    }

    fn number(&mut self) -> Result<i64, ParseError> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Expected { expected: "number".into(), found: self.remainder() });
        }
        let text = &self.src[start..self.pos];
        let n = text.parse().map_err(|_| ParseError::Malformed(text.to_string()))?;
        self.skip_ws();
        Ok(n)
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Expected { expected: "identifier".into(), found: self.remainder() });
        }
        let text = self.src[start..self.pos].to_string();
        self.skip_ws();
        Ok(text)
    }

    fn ident_allow_digits(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Expected { expected: "literal".into(), found: self.remainder() });
        }
        let text = self.src[start..self.pos].to_string();
        self.skip_ws();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Const;

    #[test]
    fn minimal_main_round_trips() {
        let mut program = Program::new();
        let mut func = Func::new(0, "main", vec![], vec![Type::Int(IntType::I64)]);
        let mut b0 = Block::new(0);
        b0.push(Instr::Return { args: vec![Value::constant(Const::Int(Int::from_i64(IntType::I64, 0)))] });
        func.add_block(b0);
        func.set_entry_block(0);
        program.add_func(func);
        program.set_entry_func(0);

        let printed = print_program(&program);
        let parsed = parse_program(&printed).expect("round trip parse");
        let reprinted = print_program(&parsed);
        assert_eq!(printed, reprinted);
    }

    #[test]
    fn binary_op_and_jump_round_trip() {
        let mut program = Program::new();
        let mut func = Func::new(1, "add_loop", vec![(0, Type::Int(IntType::I64))], vec![Type::Int(IntType::I64)]);
        let mut b0 = Block::new(0);
        b0.push(Instr::IntBinary {
            op: IntBinaryOp::Add,
            result: 1,
            args: [Value::computed(Type::Int(IntType::I64), 0), Value::constant(Const::Int(Int::from_i64(IntType::I64, 1)))],
        });
        b0.push(Instr::Return { args: vec![Value::computed(Type::Int(IntType::I64), 1)] });
        func.add_block(b0);
        func.set_entry_block(0);
        program.add_func(func);
        program.set_entry_func(1);

        let printed = print_program(&program);
        let parsed = parse_program(&printed).unwrap();
        assert_eq!(print_program(&parsed), printed);
    }

    #[test]
    fn first_parsed_func_becomes_entry() {
        let text = "@0 main () => (i64) {\n{0} ret #1:i64\n}\n@1 helper () => (i64) {\n{0} ret #2:i64\n}\n";
        let program = parse_program(text).unwrap();
        assert_eq!(program.entry_func(), Some(0));
    }

    #[test]
    fn bare_value_reference_resolves_to_its_defining_instruction_type() {
        // `ret %0` never carries a type suffix in the printed grammar, so the
        // parser has to recover %0's type from the `rem` that defines it
        // rather than defaulting it to bool.
        let text = "@0 main () => (i64) {\n{0} %0 = rem #42:i64, #8:i64\nret %0\n}\n";
        let program = parse_program(text).unwrap();
        let func = program.func(0).unwrap();
        let block = func.block(0).unwrap();
        let Instr::Return { args } = &block.instrs()[1] else { panic!("expected ret") };
        assert_eq!(args[0].get_type(), Type::Int(IntType::I64));
    }
}
