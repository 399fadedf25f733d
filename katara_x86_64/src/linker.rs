//! Resolves `FuncRef`/`BlockRef` relocations after a program's instructions
//! have all been laid out: each instruction that names a func or block
//! emits a 4-byte placeholder and registers a patch; `Linker` rewrites
//! every placeholder once every block's final offset is known.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// What a relocation's placeholder should ultimately point at. Block
/// numbers are only unique within their owning func, so a block target
/// carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationTarget {
    Func(i64),
    Block(i64, i64),
}

#[derive(Debug, Clone, Copy)]
struct Relocation {
    patch_offset: usize,
    target: RelocationTarget,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("relocation refers to unknown func @{0}")]
    UnknownFunc(i64),
    #[error("relocation refers to unknown block {1} in func @{0}")]
    UnknownBlock(i64, i64),
    #[error("displacement from offset {0} to {1} does not fit in 32 bits")]
    DisplacementOverflow(usize, usize),
}

#[derive(Debug, Default)]
pub struct Linker {
    code: Vec<u8>,
    relocations: Vec<Relocation>,
    func_offsets: HashMap<i64, usize>,
    block_offsets: HashMap<(i64, i64), usize>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Direct access to the in-progress code buffer, for encoding helpers
    /// (`encode::emit_rex` and friends) that build up bytes incrementally
    /// rather than through whole-slice `emit` calls.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        &mut self.code
    }

    pub fn mark_func_start(&mut self, func: i64) {
        self.func_offsets.insert(func, self.position());
    }

    pub fn mark_block_start(&mut self, func: i64, block: i64) {
        self.block_offsets.insert((func, block), self.position());
    }

    /// Emits a zeroed rel32 placeholder, to be patched once `resolve` runs.
    /// x86-64 `rel32` fields are always the last 4 bytes of their
    /// instruction, so the patched displacement is always relative to
    /// `patch_offset + 4`.
    pub fn emit_rel32_placeholder(&mut self, target: RelocationTarget) {
        let patch_offset = self.position();
        self.emit(&[0, 0, 0, 0]);
        self.relocations.push(Relocation { patch_offset, target });
    }

    pub fn into_code(self) -> Result<Vec<u8>, LinkError> {
        let (code, unresolved) = self.into_code_with_externals(&HashSet::new())?;
        debug_assert!(unresolved.is_empty());
        Ok(code)
    }

    /// Resolves every relocation except calls to a func number in
    /// `externals`, which are left as zeroed placeholders and reported back
    /// instead of erroring — the func numbers a translator reserves for
    /// `malloc`/`free` thunks are never defined inside the compiled program,
    /// only provided by whatever loads the output at link time.
    pub fn into_code_with_externals(
        self,
        externals: &HashSet<i64>,
    ) -> Result<(Vec<u8>, Vec<(usize, i64)>), LinkError> {
        let mut code = self.code;
        let mut unresolved = Vec::new();
        for reloc in &self.relocations {
            if let RelocationTarget::Func(n) = reloc.target {
                if externals.contains(&n) {
                    unresolved.push((reloc.patch_offset, n));
                    continue;
                }
            }
            let target_offset = match reloc.target {
                RelocationTarget::Func(n) => {
                    *self.func_offsets.get(&n).ok_or(LinkError::UnknownFunc(n))?
                }
                RelocationTarget::Block(func, block) => *self
                    .block_offsets
                    .get(&(func, block))
                    .ok_or(LinkError::UnknownBlock(func, block))?,
            };
            let next_instr = reloc.patch_offset + 4;
            let disp = target_offset as i64 - next_instr as i64;
            let disp32 = i32::try_from(disp)
                .map_err(|_| LinkError::DisplacementOverflow(next_instr, target_offset))?;
            code[reloc.patch_offset..next_instr].copy_from_slice(&disp32.to_le_bytes());
        }
        Ok((code, unresolved))
    }
}
