//! Liveness and interference-graph analysis over a `katara_ir::func::Func`.
//! Consumed by `katara_regalloc`'s graph-coloring allocator; produces no
//! mutation of the IR itself.

pub mod interference;
pub mod liveness;

pub use interference::InterferenceGraph;
pub use liveness::LiveRanges;

use katara_ir::func::Func;

/// Runs liveness then builds the interference graph in one call — the
/// entry point `katara_regalloc` uses per func.
pub fn analyze(func: &Func) -> (LiveRanges, InterferenceGraph) {
    let live = liveness::analyze(func);
    let graph = interference::build(func, &live);
    (live, graph)
}
