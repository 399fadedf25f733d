//! Generic parallel-copy sequencing: turns a set of moves that must all take
//! effect *simultaneously* into a sequence that can be executed one at a
//! time without clobbering a value before every reader has consumed it.
//!
//! This is the single algorithm behind both phi resolution (`katara_passes`)
//! and call-argument/result shuffling (`katara_x86_64`'s `GenerateMovs`),
//! per Design Notes §9: "treat GenerateMovs as a first-class algorithm; do
//! not inline it into the translator." It is generic over the location type
//! `T` so each caller supplies its own notion of "location" (an IR value
//! number, or an x86-64 operand) and its own strategy for breaking a cycle.

/// One parallel-copy operation: read the value currently at `origin`, write
/// it to `destination`. All operations in a batch are meant to be read
/// before any of them is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOp<T> {
    pub origin: T,
    pub destination: T,
}

impl<T> MoveOp<T> {
    pub fn new(origin: T, destination: T) -> Self {
        Self { origin, destination }
    }
}

/// One step of a serialized parallel copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Safe to emit directly: nothing else still needs to read the old
    /// value at `destination`.
    Copy(MoveOp<T>),
    /// A maximal cycle of mutually-dependent moves, in chain order:
    /// `cycle[i].destination == cycle[(i + 1) % cycle.len()].origin`.
    /// The caller must break this with a domain-specific mechanism (a
    /// scratch temporary, an `Xchg`, or a stack spill).
    Cycle(Vec<MoveOp<T>>),
}

/// Serializes a parallel-copy batch into a sequence of `Step`s.
///
/// Same-location moves (`origin == destination`) are dropped. The algorithm
/// repeatedly emits any move whose destination is not read as another
/// pending move's origin (a topological peel), then extracts whatever
/// maximal cycles remain.
pub fn sequence<T: Clone + PartialEq>(ops: Vec<MoveOp<T>>) -> Vec<Step<T>> {
    let mut remaining: Vec<MoveOp<T>> = ops
        .into_iter()
        .filter(|op| op.origin != op.destination)
        .collect();

    let mut steps = Vec::new();

    loop {
        let ready_index = remaining.iter().position(|candidate| {
            !remaining
                .iter()
                .any(|other| other.origin == candidate.destination && !std::ptr::eq(other, candidate))
        });
        match ready_index {
            Some(i) => {
                let op = remaining.remove(i);
                steps.push(Step::Copy(op));
            }
            None => break,
        }
    }

    // Whatever is left consists purely of one or more disjoint cycles.
    while let Some(start) = remaining.pop() {
        let mut cycle = vec![start];
        loop {
            let last_dest = cycle.last().unwrap().destination.clone();
            if last_dest == cycle[0].origin {
                break;
            }
            let next_index = remaining
                .iter()
                .position(|op| op.origin == last_dest)
                .expect("cycle must close: every destination has exactly one reader");
            cycle.push(remaining.remove(next_index));
        }
        steps.push(Step::Cycle(cycle));
    }

    steps
}

/// Breaks a cycle using one scratch location, producing a flat sequence of
/// `MoveOp`s that realizes the cycle's semantics: `k + 1` moves for a
/// `k`-cycle. This is always correct (registers, memory, or any mix) and is
/// the technique `katara_passes::phi` uses (a fresh IR value as scratch) and
/// the fallback `katara_x86_64` uses when a cycle touches memory: spill one
/// participant to the stack via Push, perform the remaining chain as Movs,
/// and finish with Pop.
pub fn resolve_cycle_with_scratch<T: Clone>(cycle: &[MoveOp<T>], scratch: T) -> Vec<MoveOp<T>> {
    let k = cycle.len();
    assert!(k >= 2, "a cycle must have at least two moves");
    let wrap = &cycle[k - 1];
    let mut out = Vec::with_capacity(k + 1);
    out.push(MoveOp::new(wrap.origin.clone(), scratch.clone()));
    for op in cycle[..k - 1].iter().rev() {
        out.push(op.clone());
    }
    out.push(MoveOp::new(scratch, wrap.destination.clone()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A minimal abstract interpreter: replays a sequence of `MoveOp`s over
    /// named memory cells and checks that every destination ends up holding
    /// the value its paired origin held *before* the batch started — the
    /// correctness property `GenerateMovs` must preserve.
    fn interpret(ops: &[MoveOp<&'static str>], initial: &HashMap<&'static str, i64>) -> HashMap<&'static str, i64> {
        let mut state = initial.clone();
        for op in ops {
            let v = state[op.origin];
            state.insert(op.destination, v);
        }
        state
    }

    fn flatten<T: Clone>(steps: Vec<Step<T>>, mut scratch: impl FnMut() -> T) -> Vec<MoveOp<T>> {
        let mut out = Vec::new();
        for step in steps {
            match step {
                Step::Copy(op) => out.push(op),
                Step::Cycle(cycle) => {
                    out.extend(resolve_cycle_with_scratch(&cycle, scratch()));
                }
            }
        }
        out
    }

    #[test]
    fn drops_noop_moves() {
        let ops = vec![MoveOp::new("a", "a"), MoveOp::new("b", "c")];
        let steps = sequence(ops);
        assert_eq!(steps, vec![Step::Copy(MoveOp::new("b", "c"))]);
    }

    #[test]
    fn acyclic_chain_in_dependency_order() {
        // c <- b <- a: must write c before b, b before a is unused further.
        let ops = vec![MoveOp::new("a", "b"), MoveOp::new("b", "c")];
        let steps = sequence(ops);
        // b->c must come before a->b (c reads b, so b must still hold its
        // old value when the b->c copy runs).
        let positions: Vec<_> = steps
            .iter()
            .map(|s| match s {
                Step::Copy(op) => (op.origin, op.destination),
                _ => unreachable!(),
            })
            .collect();
        let bc = positions.iter().position(|&p| p == ("b", "c")).unwrap();
        let ab = positions.iter().position(|&p| p == ("a", "b")).unwrap();
        assert!(bc < ab);
    }

    #[test]
    fn two_cycle_resolves_correctly() {
        let mut initial = HashMap::new();
        initial.insert("a", 1);
        initial.insert("b", 2);
        let ops = vec![MoveOp::new("b", "a"), MoveOp::new("a", "b")];
        let steps = sequence(ops);
        assert_eq!(steps.len(), 1);
        assert!(matches!(steps[0], Step::Cycle(_)));
        let flat = flatten(steps, || "tmp");
        let result = interpret(&flat, &initial);
        assert_eq!(result["a"], 2);
        assert_eq!(result["b"], 1);
    }

    #[test]
    fn three_cycle_resolves_correctly() {
        let mut initial = HashMap::new();
        initial.insert("x", 10);
        initial.insert("y", 20);
        initial.insert("z", 30);
        // x<-z, z<-y, y<-x (a 3-rotation)
        let ops = vec![
            MoveOp::new("y", "x"),
            MoveOp::new("x", "z"),
            MoveOp::new("z", "y"),
        ];
        let steps = sequence(ops);
        let flat = flatten(steps, || "tmp");
        let result = interpret(&flat, &initial);
        assert_eq!(result["x"], 20);
        assert_eq!(result["z"], 10);
        assert_eq!(result["y"], 30);
    }

    #[test]
    fn fan_out_from_one_origin() {
        // Two destinations read the same origin; neither depends on the
        // other, both should serialize without needing a cycle.
        let ops = vec![MoveOp::new("a", "b"), MoveOp::new("a", "c")];
        let steps = sequence(ops);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| matches!(s, Step::Copy(_))));
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_permutation_round_trips(perm in proptest::collection::vec(0usize..6, 6)) {
            // Build a permutation's worth of moves over six named locations
            // and check that after sequencing + flattening, everyone ends
            // up holding what their origin held beforehand.
            let names = ["r0", "r1", "r2", "r3", "r4", "r5"];
            // Only test if `perm` is actually a permutation of 0..6.
            let mut seen = [false; 6];
            let mut is_perm = true;
            for &p in &perm {
                if seen[p] { is_perm = false; break; }
                seen[p] = true;
            }
            if !is_perm {
                return Ok(());
            }
            let mut initial = HashMap::new();
            for (i, name) in names.iter().enumerate() {
                initial.insert(*name, i as i64);
            }
            let ops: Vec<MoveOp<&'static str>> = (0..6)
                .filter(|&i| perm[i] != i)
                .map(|i| MoveOp::new(names[perm[i]], names[i]))
                .collect();
            let expected: HashMap<&'static str, i64> = (0..6)
                .map(|i| (names[i], perm[i] as i64))
                .collect();
            let steps = sequence(ops);
            let mut scratch_counter = 0;
            let flat = flatten(steps, || { scratch_counter += 1; Box::leak(format!("tmp{scratch_counter}").into_boxed_str()) as &'static str });
            let result = interpret(&flat, &initial);
            for name in names {
                proptest::prop_assert_eq!(result[name], expected[name]);
            }
        }
    }
}
