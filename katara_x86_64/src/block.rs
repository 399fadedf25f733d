//! A straight-line sequence of machine instructions. Unlike `katara_ir`'s
//! `Block`, there is no phi slot and no dominator bookkeeping — by the time
//! the translator builds one of these, `katara_passes::phi` has already
//! turned every phi into predecessor-side `Mov`s.

use crate::instr::Instr;

#[derive(Debug, Clone, Default)]
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

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn extend(&mut self, instrs: impl IntoIterator<Item = Instr>) {
        self.instrs.extend(instrs);
    }
}
