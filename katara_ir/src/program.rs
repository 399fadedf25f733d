//! The top-level IR owner: a collection of funcs keyed by number plus a
//! designated entry func. The ownership idiom (arena of funcs, numeric
//! cross-references) is the same one `Func` uses for its blocks, applied
//! one level up.

use std::fmt;

use indexmap::IndexMap;

use crate::func::Func;

#[derive(Debug, Clone, Default)]
pub struct Program {
    funcs: IndexMap<i64, Func>,
    entry_func: Option<i64>,
    next_func_number: i64,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_func(&self) -> Option<i64> {
        self.entry_func
    }

    pub fn set_entry_func(&mut self, number: i64) {
        self.entry_func = Some(number);
    }

    pub fn fresh_func_number(&mut self) -> i64 {
        let n = self.next_func_number;
        self.next_func_number += 1;
        n
    }

    pub fn add_func(&mut self, func: Func) {
        self.next_func_number = self.next_func_number.max(func.number() + 1);
        self.funcs.insert(func.number(), func);
    }

    pub fn func(&self, number: i64) -> Option<&Func> {
        self.funcs.get(&number)
    }

    pub fn func_mut(&mut self, number: i64) -> Option<&mut Func> {
        self.funcs.get_mut(&number)
    }

    pub fn funcs(&self) -> impl Iterator<Item = &Func> {
        self.funcs.values()
    }

    pub fn func_numbers(&self) -> Vec<i64> {
        self.funcs.keys().copied().collect()
    }

    pub fn has_func(&self, number: i64) -> bool {
        self.funcs.contains_key(&number)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut numbers = self.func_numbers();
        numbers.sort_unstable();
        for number in numbers {
            if let Some(func) = self.func(number) {
                write!(f, "{func}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::instr::Instr;
    use crate::types::Type;
    use crate::value::{Const, Value};

    #[test]
    fn every_referenced_func_number_resolves() {
        let mut program = Program::new();
        let n = program.fresh_func_number();
        let mut func = Func::new(n, "main", vec![], vec![Type::Bool]);
        let mut b = Block::new(0);
        b.push(Instr::Return { args: vec![Value::constant(Const::Bool(true))] });
        func.add_block(b);
        func.set_entry_block(0);
        program.add_func(func);
        program.set_entry_func(n);

        assert!(program.has_func(program.entry_func().unwrap()));
    }
}
