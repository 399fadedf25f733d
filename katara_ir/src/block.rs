//! Basic blocks: an ordered instruction sequence terminated by exactly one
//! control-flow instruction, identified by a numeric block id rather than a
//! string label.

use std::fmt;

use crate::instr::Instr;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Block {
    number: i64,
    instrs: Vec<Instr>,
}

impl Block {
    pub fn new(number: i64) -> Self {
        Self { number, instrs: Vec::new() }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    /// Mutable access to the raw instruction list, for passes that splice or
    /// split a block (`katara_passes::shared_ptr`, `katara_passes::phi`).
    pub fn instrs_mut(&mut self) -> &mut Vec<Instr> {
        &mut self.instrs
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// All `Phi` instructions, which `check::Checker` requires precede every
    /// non-phi instruction.
    pub fn phis(&self) -> impl Iterator<Item = &Instr> {
        self.instrs.iter().take_while(|i| i.is_phi())
    }

    pub fn non_phis(&self) -> impl Iterator<Item = &Instr> {
        self.instrs.iter().skip_while(|i| i.is_phi())
    }

    /// The block's terminator, if the last instruction is one. `None` for a
    /// malformed (still-being-built, or invalid) block — the checker, not
    /// this accessor, is responsible for flagging that.
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    /// Destination block numbers named by the terminator, empty if there is
    /// none (or it is a `Return`).
    pub fn successors(&self) -> Vec<i64> {
        self.terminator().map(Instr::targets).unwrap_or_default()
    }

    /// Inserts `instr` immediately before the terminator — where phi
    /// resolution and call lowering insert parallel-copy movs.
    pub fn insert_before_terminator(&mut self, instr: Instr) {
        let idx = if self.is_terminated() {
            self.instrs.len() - 1
        } else {
            self.instrs.len()
        };
        self.instrs.insert(idx, instr);
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{{}}}", self.number)?;
        for instr in &self.instrs {
            writeln!(f, "  {instr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Const, Value};

    #[test]
    fn phis_precede_non_phis() {
        let mut b = Block::new(0);
        b.push(Instr::Phi { result: 0, result_ty: crate::types::Type::Bool, args: vec![] });
        b.push(Instr::Return { args: vec![Value::constant(Const::Bool(true))] });
        assert_eq!(b.phis().count(), 1);
        assert_eq!(b.non_phis().count(), 1);
    }

    #[test]
    fn insert_before_terminator_keeps_terminator_last() {
        let mut b = Block::new(0);
        b.push(Instr::Return { args: vec![] });
        b.insert_before_terminator(Instr::Mov {
            result: 1,
            result_ty: crate::types::Type::Bool,
            arg: Value::constant(Const::Bool(true)),
        });
        assert_eq!(b.instrs().len(), 2);
        assert!(b.instrs()[1].is_terminator());
    }
}
