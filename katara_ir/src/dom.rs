//! Dominator trees via Lengauer-Tarjan with path compression. Field names
//! (`tree_order`, `tree_parent`, `sdom`, `idom`, `bucket`, `ancestor`,
//! `label`) and the `link`/`compress`/`eval` decomposition follow the
//! algorithm's standard presentation.

use std::collections::HashMap;

use crate::func::Func;

/// The immediate-dominator relation for one func, cached on `Func` and
/// invalidated by any structural mutation.
#[derive(Debug, Clone, Default)]
pub struct DomTree {
    entry: Option<i64>,
    /// Immediate dominator of each non-entry, reachable block.
    idom: HashMap<i64, i64>,
}

impl DomTree {
    pub fn compute(func: &Func) -> DomTree {
        let Some(entry) = func.entry_block() else {
            return DomTree::default();
        };

        let mut ctx = Ctx::new(entry);
        ctx.find_dfs_tree(func);
        let n = ctx.tree_order.len();
        if n == 0 {
            return DomTree { entry: Some(entry), idom: HashMap::new() };
        }

        // sdom[i] starts as i itself (dfnum-space); ancestor/label init.
        ctx.sdom = (0..n).collect();
        ctx.label = (0..n).collect();
        ctx.ancestor = vec![None; n];
        ctx.bucket = vec![Vec::new(); n];
        ctx.idom_by_dfnum = vec![None; n];

        // Process in decreasing DFS order, skipping the root (dfnum 0).
        for w_dfnum in (1..n).rev() {
            let w = ctx.vertex[w_dfnum];
            for &v in func.parents(w) {
                let Some(&v_dfnum) = ctx.dfnum.get(&v) else { continue }; // unreachable predecessor
                let u_dfnum = ctx.eval(v_dfnum);
                if ctx.sdom[u_dfnum] < ctx.sdom[w_dfnum] {
                    ctx.sdom[w_dfnum] = ctx.sdom[u_dfnum];
                }
            }
            let sdom_vertex = ctx.vertex[ctx.sdom[w_dfnum]];
            let sdom_dfnum = ctx.dfnum[&sdom_vertex];
            ctx.bucket[sdom_dfnum].push(w_dfnum);

            let parent_dfnum = ctx.tree_parent[w_dfnum].expect("non-root has a tree parent");
            ctx.link(parent_dfnum, w_dfnum);

            let bucket = std::mem::take(&mut ctx.bucket[parent_dfnum]);
            for v_dfnum in bucket {
                let u_dfnum = ctx.eval(v_dfnum);
                ctx.idom_by_dfnum[v_dfnum] = Some(if ctx.sdom[u_dfnum] < ctx.sdom[v_dfnum] {
                    u_dfnum
                } else {
                    parent_dfnum
                });
            }
        }

        for w_dfnum in 1..n {
            if let Some(idom_dfnum) = ctx.idom_by_dfnum[w_dfnum] {
                if idom_dfnum != ctx.sdom[w_dfnum] {
                    ctx.idom_by_dfnum[w_dfnum] = ctx.idom_by_dfnum[idom_dfnum];
                }
            }
        }

        let mut idom = HashMap::new();
        for w_dfnum in 1..n {
            if let Some(idom_dfnum) = ctx.idom_by_dfnum[w_dfnum] {
                idom.insert(ctx.vertex[w_dfnum], ctx.vertex[idom_dfnum]);
            }
        }

        DomTree { entry: Some(entry), idom }
    }

    pub fn entry(&self) -> Option<i64> {
        self.entry
    }

    pub fn immediate_dominator(&self, block: i64) -> Option<i64> {
        self.idom.get(&block).copied()
    }

    /// Whether `a` dominates `b` (every block dominates itself).
    pub fn dominates(&self, a: i64, b: i64) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while let Some(&parent) = self.idom.get(&cur) {
            if parent == a {
                return true;
            }
            cur = parent;
        }
        false
    }

    pub fn entries(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.idom.iter().map(|(&b, &i)| (b, i))
    }
}

struct Ctx {
    tree_order: Vec<i64>,
    /// `vertex[dfnum]` = block number.
    vertex: Vec<i64>,
    /// block number -> dfnum.
    dfnum: HashMap<i64, usize>,
    /// `tree_parent[dfnum]` = parent's dfnum in the DFS spanning tree.
    tree_parent: Vec<Option<usize>>,
    sdom: Vec<usize>,
    ancestor: Vec<Option<usize>>,
    label: Vec<usize>,
    bucket: Vec<Vec<usize>>,
    idom_by_dfnum: Vec<Option<usize>>,
    root: i64,
}

impl Ctx {
    fn new(root: i64) -> Self {
        Self {
            tree_order: Vec::new(),
            vertex: Vec::new(),
            dfnum: HashMap::new(),
            tree_parent: Vec::new(),
            sdom: Vec::new(),
            ancestor: Vec::new(),
            label: Vec::new(),
            bucket: Vec::new(),
            idom_by_dfnum: Vec::new(),
            root,
        }
    }

    fn find_dfs_tree(&mut self, func: &Func) {
        let mut stack = vec![(self.root, None::<usize>)];
        while let Some((block, parent_dfnum)) = stack.pop() {
            if self.dfnum.contains_key(&block) {
                continue;
            }
            let dfnum = self.vertex.len();
            self.dfnum.insert(block, dfnum);
            self.vertex.push(block);
            self.tree_parent.push(parent_dfnum);
            self.tree_order.push(block);
            for &child in func.children(block).iter().rev() {
                if !self.dfnum.contains_key(&child) {
                    stack.push((child, Some(dfnum)));
                }
            }
        }
    }

    /// `Compress`: path-compresses the ancestor chain above `v`, updating
    /// `label[v]` to the vertex with minimum `sdom` on the compressed path.
    fn compress(&mut self, v: usize) {
        let Some(a) = self.ancestor[v] else { return };
        if self.ancestor[a].is_some() {
            self.compress(a);
            if self.sdom[self.label[a]] < self.sdom[self.label[v]] {
                self.label[v] = self.label[a];
            }
            self.ancestor[v] = self.ancestor[a];
        }
    }

    /// `Eval`: the vertex with minimal `sdom` among those on the path from
    /// `v` to the root of its (compressed) ancestor tree.
    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v].is_none() {
            return v;
        }
        self.compress(v);
        self.label[v]
    }

    /// `Link`: attaches `child`'s ancestor tree under `parent` (unbalanced;
    /// correctness does not depend on the balancing, only the asymptotics
    /// do — acceptable at compiler-IR-sized graphs).
    fn link(&mut self, parent: usize, child: usize) {
        self.ancestor[child] = Some(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::instr::Instr;
    use crate::types::Type;
    use crate::value::{Const, Value};

    fn block(n: i64, term: Instr) -> Block {
        let mut b = Block::new(n);
        b.push(term);
        b
    }

    fn jump(target: i64) -> Instr {
        Instr::Jump { target }
    }

    fn ret() -> Instr {
        Instr::Return { args: vec![Value::constant(Const::Bool(true))] }
    }

    fn jcc(t: i64, f: i64) -> Instr {
        Instr::JumpCond { cond: Value::constant(Const::Bool(true)), true_target: t, false_target: f }
    }

    /// Diamond: 0 -> {1,2} -> 3. idom(1)=idom(2)=idom(3)=0.
    #[test]
    fn diamond_shape() {
        let mut func = Func::new(0, "f", vec![], vec![Type::Bool]);
        func.add_block(block(0, jcc(1, 2)));
        func.add_block(block(1, jump(3)));
        func.add_block(block(2, jump(3)));
        func.add_block(block(3, ret()));
        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        func.add_control_flow(0, 2);
        func.add_control_flow(1, 3);
        func.add_control_flow(2, 3);

        let tree = func.dominator_tree().unwrap();
        assert_eq!(tree.immediate_dominator(1), Some(0));
        assert_eq!(tree.immediate_dominator(2), Some(0));
        assert_eq!(tree.immediate_dominator(3), Some(0));
        assert!(tree.dominates(0, 3));
        assert!(!tree.dominates(1, 3));
    }

    /// Loop: 0 -> 1 -> 2 -> 1 (back edge), 2 -> 3. idom(2) = 1, not 0.
    #[test]
    fn loop_header_dominance() {
        let mut func = Func::new(0, "f", vec![], vec![Type::Bool]);
        func.add_block(block(0, jump(1)));
        func.add_block(block(1, jcc(2, 3)));
        func.add_block(block(2, jump(1)));
        func.add_block(block(3, ret()));
        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        func.add_control_flow(1, 2);
        func.add_control_flow(1, 3);
        func.add_control_flow(2, 1);

        let tree = func.dominator_tree().unwrap();
        assert_eq!(tree.immediate_dominator(1), Some(0));
        assert_eq!(tree.immediate_dominator(2), Some(1));
        assert_eq!(tree.immediate_dominator(3), Some(1));
    }

    #[test]
    fn mutation_invalidates_cache() {
        let mut func = Func::new(0, "f", vec![], vec![Type::Bool]);
        func.add_block(block(0, jump(1)));
        func.add_block(block(1, ret()));
        func.set_entry_block(0);
        func.add_control_flow(0, 1);
        let before = func.dominator_tree().unwrap();
        assert_eq!(before.immediate_dominator(1), Some(0));

        func.add_block(block(2, ret()));
        func.add_control_flow(0, 2);
        let after = func.dominator_tree().unwrap();
        assert_eq!(after.immediate_dominator(2), Some(0));
    }
}
