//! The translated program: one `Func` per source func, plus an `emit`
//! entry point that walks everything through a `Linker` to produce final
//! machine code.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::func::Func;
use crate::instr::CallTarget;
use crate::linker::{LinkError, Linker};

#[derive(Debug, Clone, Default)]
pub struct Program {
    funcs: IndexMap<i64, Func>,
    entry_func: Option<i64>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_func(&mut self, func: Func) {
        self.funcs.insert(func.number(), func);
    }

    pub fn func(&self, number: i64) -> Option<&Func> {
        self.funcs.get(&number)
    }

    pub fn funcs(&self) -> impl Iterator<Item = &Func> {
        self.funcs.values()
    }

    pub fn entry_func(&self) -> Option<i64> {
        self.entry_func
    }

    pub fn set_entry_func(&mut self, func: i64) {
        self.entry_func = Some(func);
    }

    /// Lays every func's blocks out back to back in program order and
    /// resolves every `Jmp`/`Jcc`/`Call` relocation against those offsets.
    /// Fails if any call targets a func number this program never defines.
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        let (code, unresolved) = self.encode_with_externals(&HashSet::new())?;
        debug_assert!(unresolved.is_empty());
        Ok(code)
    }

    /// Same as `encode`, but calls to any func number in `externals` are
    /// left as zeroed placeholders and reported back as
    /// `(byte offset, func number)` instead of failing — the caller (the
    /// driver, or whatever ultimately loads this code) is responsible for
    /// patching those sites once it knows where the external func lives.
    pub fn encode_with_externals(
        &self,
        externals: &HashSet<i64>,
    ) -> Result<(Vec<u8>, Vec<(usize, i64)>), LinkError> {
        let mut linker = Linker::new();
        for func in self.funcs.values() {
            linker.mark_func_start(func.number());
            for block in func.blocks() {
                linker.mark_block_start(func.number(), block.number());
                for instr in block.instrs() {
                    instr.encode(&mut linker, func.number());
                }
            }
        }
        linker.into_code_with_externals(externals)
    }
}

/// Grounds a runtime-call instruction on a fixed func number, used by the
/// translator for `malloc`/`free` thunks that are not part of the source
/// program's own func table.
pub fn call_runtime(func_number: i64) -> CallTarget {
    CallTarget::Func(func_number)
}
