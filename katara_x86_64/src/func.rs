//! A translated func: its blocks in layout order, plus the stack frame
//! shape the translator derived from the register allocator's spill count.

use indexmap::IndexMap;

use crate::block::Block;

#[derive(Debug, Clone)]
pub struct Func {
    number: i64,
    name: String,
    blocks: IndexMap<i64, Block>,
    entry_block: Option<i64>,
    /// Bytes the prologue reserves below `rbp` for spill slots, always a
    /// multiple of 8 and padded to keep `rsp` 16-byte aligned at `call`.
    frame_size: i64,
}

impl Func {
    pub fn new(number: i64, name: impl Into<String>) -> Self {
        Self { number, name: name.into(), blocks: IndexMap::new(), entry_block: None, frame_size: 0 }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_size(&self) -> i64 {
        self.frame_size
    }

    pub fn set_frame_size(&mut self, size: i64) {
        self.frame_size = size;
    }

    pub fn entry_block(&self) -> Option<i64> {
        self.entry_block
    }

    pub fn set_entry_block(&mut self, block: i64) {
        self.entry_block = Some(block);
    }

    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.number(), block);
    }

    pub fn block(&self, number: i64) -> Option<&Block> {
        self.blocks.get(&number)
    }

    pub fn block_mut(&mut self, number: i64) -> Option<&mut Block> {
        self.blocks.get_mut(&number)
    }

    /// Blocks in the order they were added, which the translator always
    /// keeps equal to the source func's layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }
}
