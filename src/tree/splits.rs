//! # Edge Bipartition Table
//!
//! Every edge of an unrooted tree cuts the tip set in two. [`EdgeSplits`]
//! stores, per edge, the tips on the far side of the edge (below it in the
//! stored orientation) as a bit mask. Built once per run; all later group
//! enumeration and monophyly queries read from it.

use bitvec::prelude::*;

use crate::error::{PhyloFactorError, Result};
use crate::tree::{EdgeId, PhyloTree};

/// Per-edge tip bipartitions of an unrooted bifurcating tree.
#[derive(Clone, Debug)]
pub struct EdgeSplits {
    n_tips: usize,
    edges: Vec<EdgeId>,
    below: Vec<BitVec>,
}

impl EdgeSplits {
    /// Build the table. Fails unless the tree is unrooted and bifurcating
    /// with at least three tips.
    pub fn new(tree: &PhyloTree) -> Result<Self> {
        if tree.n_tips() < 3 {
            return Err(PhyloFactorError::topology(format!(
                "need at least 3 tips, tree has {}",
                tree.n_tips()
            )));
        }
        if tree.is_rooted() {
            return Err(PhyloFactorError::topology(
                "tree is rooted; unroot it before enumerating edges",
            ));
        }
        if !tree.is_unrooted_bifurcating() {
            return Err(PhyloFactorError::topology(
                "tree has internal nodes of degree other than 3",
            ));
        }

        let masks = tree.clade_masks();
        let edges: Vec<EdgeId> = tree.edges().collect();
        let below = edges.iter().map(|e| masks[e.node()].clone()).collect();

        Ok(Self {
            n_tips: tree.n_tips(),
            edges,
            below,
        })
    }

    pub fn n_tips(&self) -> usize {
        self.n_tips
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Tips below the edge at table position `idx`.
    pub fn below(&self, idx: usize) -> &BitSlice {
        &self.below[idx]
    }

    pub fn position(&self, edge: EdgeId) -> Option<usize> {
        self.edges.binary_search(&edge).ok()
    }

    /// Split `tips` along an edge: (tips below the edge, remaining tips).
    pub fn split(&self, idx: usize, tips: &BitSlice) -> (BitVec, BitVec) {
        let mut below = tips.to_bitvec();
        below &= self.below[idx].as_bitslice();
        let mut above = tips.to_bitvec();
        above &= !self.below[idx].clone();
        (below, above)
    }

    /// A tip set is monophyletic on the unrooted tree when it is one side of
    /// some edge. The full tip set counts as monophyletic.
    pub fn is_monophyletic(&self, tips: &BitSlice) -> bool {
        let n = tips.count_ones();
        if n == 0 {
            return false;
        }
        if n == self.n_tips {
            return true;
        }
        self.below.iter().any(|side| {
            side.as_bitslice() == tips || side.iter().zip(tips.iter()).all(|(s, t)| *s != *t)
        })
    }
}
