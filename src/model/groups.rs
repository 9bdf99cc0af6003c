//! # Group Enumeration
//!
//! Candidate bipartitions for one iteration. Every atom with at least two
//! tips contributes one group per edge of its induced sub-tree; singleton
//! atoms contribute nothing. Order is atoms in partition order, then edges
//! in tree order, which fixes the tie-break order of the objective.

use serde::Serialize;

use crate::error::Result;
use crate::model::partition::PartitionState;
use crate::tree::{EdgeId, EdgeSplits, PhyloTree};

/// A bipartition of one atom, tagged by the edge inducing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Group {
    pub edge: EdgeId,
    /// Index of the split atom in the partition state
    pub atom: usize,
    /// Atom tips below the edge
    pub side_a: Vec<usize>,
    /// Remaining atom tips
    pub side_b: Vec<usize>,
}

impl Group {
    pub fn n_tips(&self) -> usize {
        self.side_a.len() + self.side_b.len()
    }
}

/// Enumerates groups from the bipartition table of an unrooted bifurcating tree.
#[derive(Clone, Debug)]
pub struct GroupEnumerator {
    splits: EdgeSplits,
}

impl GroupEnumerator {
    /// Fails with a topology error unless the tree is unrooted and bifurcating.
    pub fn new(tree: &PhyloTree) -> Result<Self> {
        Ok(Self {
            splits: EdgeSplits::new(tree)?,
        })
    }

    pub fn splits(&self) -> &EdgeSplits {
        &self.splits
    }

    pub fn enumerate(&self, state: &PartitionState) -> Vec<Group> {
        let mut groups = Vec::new();
        for (atom_idx, atom) in state.atoms().iter().enumerate() {
            if atom.len() < 2 {
                continue;
            }
            for &pos in atom.edges() {
                let (below, above) = self.splits.split(pos, atom.tips());
                groups.push(Group {
                    edge: self.splits.edges()[pos],
                    atom: atom_idx,
                    side_a: below.iter_ones().collect(),
                    side_b: above.iter_ones().collect(),
                });
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhyloFactorError;

    #[test]
    fn test_full_tree_groups() {
        let tree = PhyloTree::from_newick("((a,b),c,(d,e));").unwrap();
        let enumerator = GroupEnumerator::new(&tree).unwrap();
        let state = PartitionState::new(enumerator.splits());
        let groups = enumerator.enumerate(&state);

        assert_eq!(groups.len(), 7);
        for group in &groups {
            assert!(!group.side_a.is_empty() && !group.side_b.is_empty());
            assert_eq!(group.n_tips(), 5);
            assert_eq!(group.atom, 0);
        }
        // Tip edges come first in tree order
        assert_eq!(groups[0].side_a, vec![0]);
        assert_eq!(groups[0].side_b, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rooted_tree_rejected() {
        let tree = PhyloTree::from_newick("((a,b),(c,(d,e)));").unwrap();
        let err = GroupEnumerator::new(&tree).unwrap_err();
        assert!(matches!(err, PhyloFactorError::Topology { .. }));
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let tree = PhyloTree::from_newick("(((a,b),c),d,(e,(f,g)));").unwrap();
        let enumerator = GroupEnumerator::new(&tree).unwrap();
        let state = PartitionState::new(enumerator.splits());
        assert_eq!(enumerator.enumerate(&state), enumerator.enumerate(&state));
        assert_eq!(enumerator.enumerate(&state).len(), 11);
    }
}
