//! # Partition State
//!
//! The only state carried across iterations besides the data itself:
//!
//! - `atoms`: disjoint tip sets covering every tip, each with the edges of
//!   its induced sub-tree (positions into [`EdgeSplits`])
//! - `basis`: one ILR contrast column per committed factor
//!
//! Each committed factor replaces one atom by its two sides. Side A takes
//! the parent's slot, side B is appended, so atom order is deterministic.

use std::collections::{BTreeMap, HashSet};

use bitvec::prelude::*;
use nalgebra::{DMatrix, DVector};

use crate::error::{PhyloFactorError, Result};
use crate::model::groups::Group;
use crate::tree::EdgeSplits;

/// A tip set not yet split by any committed factor.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    tips: BitVec,
    edges: Vec<usize>,
}

impl Atom {
    /// Keep the candidate edges that still split `tips`, one per distinct
    /// bipartition (the earliest edge in table order wins).
    fn restricted(tips: BitVec, candidates: &[usize], splits: &EdgeSplits) -> Self {
        let mut edges = Vec::new();
        if let Some(first) = tips.first_one() {
            let mut seen: HashSet<BitVec> = HashSet::new();
            for &pos in candidates {
                let (below, above) = splits.split(pos, &tips);
                if below.not_any() || above.not_any() {
                    continue;
                }
                let key = if below[first] { above } else { below };
                if seen.insert(key) {
                    edges.push(pos);
                }
            }
        }
        Self { tips, edges }
    }

    pub fn len(&self) -> usize {
        self.tips.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.tips.not_any()
    }

    pub fn tips(&self) -> &BitSlice {
        &self.tips
    }

    pub fn tip_indices(&self) -> Vec<usize> {
        self.tips.iter_ones().collect()
    }

    /// Edge positions of the atom's induced sub-tree.
    pub fn edges(&self) -> &[usize] {
        &self.edges
    }
}

/// Atoms, their sub-trees and the accumulated basis.
#[derive(Clone, Debug)]
pub struct PartitionState {
    n_tips: usize,
    atoms: Vec<Atom>,
    basis: Vec<DVector<f64>>,
}

impl PartitionState {
    /// One atom holding every tip.
    pub fn new(splits: &EdgeSplits) -> Self {
        let all: Vec<usize> = (0..splits.len()).collect();
        let root = Atom::restricted(bitvec![1; splits.n_tips()], &all, splits);
        Self {
            n_tips: splits.n_tips(),
            atoms: vec![root],
            basis: Vec::new(),
        }
    }

    pub fn n_tips(&self) -> usize {
        self.n_tips
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn n_factors(&self) -> usize {
        self.basis.len()
    }

    /// Basis as an n_tips x n_factors matrix.
    pub fn basis_matrix(&self) -> DMatrix<f64> {
        if self.basis.is_empty() {
            DMatrix::zeros(self.n_tips, 0)
        } else {
            DMatrix::from_columns(&self.basis)
        }
    }

    /// Split the winner's atom into its two sides and record its basis column.
    pub fn apply_winner(
        &mut self,
        group: &Group,
        basis: DVector<f64>,
        splits: &EdgeSplits,
    ) -> Result<()> {
        let parent = self.atoms.get(group.atom).ok_or_else(|| {
            PhyloFactorError::algorithm(format!("winning group refers to missing atom {}", group.atom))
        })?;
        if group.side_a.is_empty() || group.side_b.is_empty() {
            return Err(PhyloFactorError::algorithm("winning group has an empty side"));
        }

        let mut side_a = bitvec![0; self.n_tips];
        let mut side_b = bitvec![0; self.n_tips];
        for &tip in &group.side_a {
            side_a.set(tip, true);
        }
        for &tip in &group.side_b {
            side_b.set(tip, true);
        }
        let mut union = side_a.clone();
        union |= side_b.as_bitslice();
        if union != parent.tips || (side_a.clone() & side_b.as_bitslice()).any() {
            return Err(PhyloFactorError::algorithm(format!(
                "group on edge {} is not a bipartition of atom {}",
                group.edge, group.atom
            )));
        }
        if basis.len() != self.n_tips {
            return Err(PhyloFactorError::algorithm("basis column length differs from tip count"));
        }

        let cut = splits.position(group.edge);
        let candidates: Vec<usize> = parent
            .edges
            .iter()
            .copied()
            .filter(|&pos| Some(pos) != cut)
            .collect();

        let a = Atom::restricted(side_a, &candidates, splits);
        let b = Atom::restricted(side_b, &candidates, splits);
        self.atoms[group.atom] = a;
        self.atoms.push(b);
        self.basis.push(basis);
        Ok(())
    }

    /// Atoms are pairwise disjoint and cover every tip.
    pub fn is_partition(&self) -> bool {
        let mut seen = bitvec![0; self.n_tips];
        for atom in &self.atoms {
            if (seen.clone() & atom.tips.as_bitslice()).any() {
                return false;
            }
            seen |= atom.tips.as_bitslice();
        }
        seen.all()
    }

    /// Atom size -> number of atoms of that size.
    pub fn atom_size_frequencies(&self) -> BTreeMap<usize, usize> {
        let mut table = BTreeMap::new();
        for atom in &self.atoms {
            *table.entry(atom.len()).or_insert(0) += 1;
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::amalgamation::ilr_basis;
    use crate::model::groups::GroupEnumerator;
    use crate::tree::PhyloTree;

    fn setup() -> (GroupEnumerator, PartitionState) {
        let tree = PhyloTree::from_newick("((a,b),c,(d,(e,f)));").unwrap();
        let enumerator = GroupEnumerator::new(&tree).unwrap();
        let state = PartitionState::new(enumerator.splits());
        (enumerator, state)
    }

    #[test]
    fn test_initial_state() {
        let (enumerator, state) = setup();
        assert_eq!(state.n_atoms(), 1);
        assert_eq!(state.atoms()[0].len(), 6);
        assert_eq!(state.atoms()[0].edges().len(), enumerator.splits().len());
        assert!(state.is_partition());
        assert_eq!(state.basis_matrix().shape(), (6, 0));
    }

    #[test]
    fn test_apply_winner_splits_atom() {
        let (enumerator, mut state) = setup();
        let groups = enumerator.enumerate(&state);
        let ab = groups.iter().find(|g| g.side_a == vec![0, 1]).unwrap().clone();
        let basis = ilr_basis(6, &ab.side_a, &ab.side_b);
        state.apply_winner(&ab, basis, enumerator.splits()).unwrap();

        assert_eq!(state.n_atoms(), 2);
        assert!(state.is_partition());
        assert_eq!(state.atoms()[0].tip_indices(), vec![0, 1]);
        assert_eq!(state.atoms()[1].tip_indices(), vec![2, 3, 4, 5]);
        // {a,b} has one internal split left; {c,d,e,f} has 2*4-3 = 5 edges
        assert_eq!(state.atoms()[0].edges().len(), 1);
        assert_eq!(state.atoms()[1].edges().len(), 5);
        assert_eq!(state.basis_matrix().ncols(), 1);
        assert_eq!(state.atom_size_frequencies(), BTreeMap::from([(2, 1), (4, 1)]));
    }

    #[test]
    fn test_apply_winner_rejects_non_bipartition() {
        let (enumerator, mut state) = setup();
        let bogus = Group {
            edge: enumerator.splits().edges()[0],
            atom: 0,
            side_a: vec![0],
            side_b: vec![1, 2],
        };
        let basis = ilr_basis(6, &bogus.side_a, &bogus.side_b);
        assert!(state.apply_winner(&bogus, basis, enumerator.splits()).is_err());
        assert_eq!(state.n_atoms(), 1);
    }

    #[test]
    fn test_split_to_singletons() {
        let (enumerator, mut state) = setup();
        loop {
            let groups = enumerator.enumerate(&state);
            let Some(group) = groups.first().cloned() else { break };
            let basis = ilr_basis(6, &group.side_a, &group.side_b);
            state.apply_winner(&group, basis, enumerator.splits()).unwrap();
            assert!(state.is_partition());
        }
        assert_eq!(state.n_atoms(), 6);
        assert_eq!(state.n_factors(), 5);
    }
}
