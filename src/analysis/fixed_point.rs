//! A small worklist solver for monotone dataflow problems.
//!
//! Facts form a join semi-lattice; the solver propagates them from seed
//! locations until nothing changes. The liveness analysis behind the
//! linear-scan allocator is the in-tree client.

use std::{cmp::Ordering, collections::HashMap, hash::Hash};

/// A join semi-lattice: a partial order in which any two elements have a
/// least upper bound.
///
/// The ordering expresses information content, and `join` must satisfy the
/// usual laws: idempotency, commutativity, associativity, and
/// `a <= a.join(b)` for all `a`, `b`. The solver terminates when the
/// lattice has no infinite ascending chains and the flow function is
/// monotone.
pub trait JoinSemiLattice: PartialOrd {
    /// Computes the least upper bound of two facts, consuming both.
    #[must_use]
    fn join(self, other: Self) -> Self;
}

/// A dataflow analysis problem: seed facts plus a flow function.
pub trait DataflowProblem {
    /// A program point facts are attached to.
    type Location: Clone + Eq + Hash;
    /// The fact lattice.
    type Fact: JoinSemiLattice + Clone;

    /// The initial facts the propagation starts from.
    fn seeds(&self) -> Vec<(Self::Location, Self::Fact)>;

    /// Applies the transfer function at a location, yielding the facts to
    /// propagate to other locations.
    fn flow(
        &self,
        location: &Self::Location,
        fact: &Self::Fact,
    ) -> Vec<(Self::Location, Self::Fact)>;
}

/// Runs the worklist algorithm to its fixed point and returns the final
/// fact at every reached location.
pub fn solve<P: DataflowProblem>(problem: &P) -> HashMap<P::Location, P::Fact> {
    let mut facts: HashMap<P::Location, P::Fact> = HashMap::new();
    let mut worklist: Vec<(P::Location, P::Fact)> = problem.seeds();

    while let Some((location, incoming)) = worklist.pop() {
        let joined = match facts.get(&location) {
            Some(current) => current.clone().join(incoming),
            None => incoming,
        };
        let grew = facts
            .get(&location)
            .is_none_or(|current| joined.partial_cmp(current).is_some_and(Ordering::is_gt));
        if grew {
            worklist.extend(problem.flow(&location, &joined));
            facts.insert(location, joined);
        }
    }

    facts
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    /// A powerset lattice over small integers, ordered by inclusion.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Set(BTreeSet<u32>);

    impl PartialOrd for Set {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            if self.0 == other.0 {
                Some(Ordering::Equal)
            } else if self.0.is_subset(&other.0) {
                Some(Ordering::Less)
            } else if other.0.is_subset(&self.0) {
                Some(Ordering::Greater)
            } else {
                None
            }
        }
    }

    impl JoinSemiLattice for Set {
        fn join(mut self, other: Self) -> Self {
            self.0.extend(other.0);
            self
        }
    }

    /// Propagation along a three-node chain 0 → 1 → 2.
    struct Chain;

    impl DataflowProblem for Chain {
        type Location = u32;
        type Fact = Set;

        fn seeds(&self) -> Vec<(u32, Set)> {
            vec![(0, Set(BTreeSet::from([0])))]
        }

        fn flow(&self, location: &u32, fact: &Set) -> Vec<(u32, Set)> {
            if *location >= 2 {
                return Vec::new();
            }
            let mut next = fact.clone();
            next.0.insert(*location + 1);
            vec![(*location + 1, next)]
        }
    }

    #[test]
    fn facts_accumulate_along_the_chain() {
        let solution = solve(&Chain);
        assert_eq!(solution[&2], Set(BTreeSet::from([0, 1, 2])));
    }

    proptest! {
        #[test]
        fn join_is_an_upper_bound(
            a in proptest::collection::btree_set(0u32..16, 0..8),
            b in proptest::collection::btree_set(0u32..16, 0..8),
        ) {
            let (a, b) = (Set(a), Set(b));
            let joined = a.clone().join(b.clone());
            prop_assert!(joined >= a);
            prop_assert!(joined >= b);
        }
    }
}
