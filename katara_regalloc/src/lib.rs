//! Chaitin-style graph-coloring register allocation: simplify, spill,
//! select over an `katara_analysis::InterferenceGraph`. Runs after phi
//! resolution, once the interference graph reflects the program's final
//! shape; its output colors are handed to `katara_x86_64::translator` to
//! pick concrete operands.

pub mod color;

pub use color::{allocate, Coloring, NUM_GPR_COLORS};

use katara_ir::func::Func;

/// Runs liveness, interference, and coloring for one func in one call.
pub fn allocate_func(func: &Func) -> Coloring {
    let (_live, graph) = katara_analysis::analyze(func);
    color::allocate(&graph)
}
