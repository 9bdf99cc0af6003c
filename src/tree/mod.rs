//! # Phylogenetic Tree Service
//!
//! A compact arena tree over taxon tips. Only what the factorization needs:
//! tip/edge queries, unrooting, pruning to the taxa present in the data, and
//! per-edge bipartition tables ([`EdgeSplits`]).
//!
//! ## Node numbering
//! Tips occupy `0..n_tips` in the order they appear in the Newick string;
//! internal nodes follow in preorder, so the root is always `n_tips`. An edge
//! is identified by the node it leads to ([`EdgeId`]).

pub mod newick;
pub mod splits;

use std::collections::HashMap;
use std::fmt;

use bitvec::prelude::*;
use serde::Serialize;

use crate::error::{PhyloFactorError, Result};

pub use splits::EdgeSplits;

/// Stable edge identifier: the index of the node the edge leads to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn new(node: usize) -> Self {
        Self(node as u32)
    }

    /// Child node this edge leads to
    pub fn node(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arena node used while building or rewriting a tree.
#[derive(Clone, Debug, Default)]
pub(crate) struct RawNode {
    pub label: Option<String>,
    pub children: Vec<usize>,
}

/// Phylogenetic tree with tips numbered before internal nodes.
#[derive(Clone, Debug)]
pub struct PhyloTree {
    labels: Vec<String>,
    label_index: HashMap<String, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl PhyloTree {
    /// Parse a Newick string.
    pub fn from_newick(text: &str) -> Result<Self> {
        let (nodes, root) = newick::parse(text)?;
        Self::from_raw(nodes, root)
    }

    /// Renumber an arbitrary arena into tips-first preorder layout.
    pub(crate) fn from_raw(nodes: Vec<RawNode>, root: usize) -> Result<Self> {
        let mut order = Vec::with_capacity(nodes.len());
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(nodes[node].children.iter().rev().copied());
        }

        let n_tips = order.iter().filter(|&&n| nodes[n].children.is_empty()).count();
        let mut new_id = vec![usize::MAX; nodes.len()];
        let (mut next_tip, mut next_internal) = (0, n_tips);
        for &old in &order {
            if nodes[old].children.is_empty() {
                new_id[old] = next_tip;
                next_tip += 1;
            } else {
                new_id[old] = next_internal;
                next_internal += 1;
            }
        }

        let n_nodes = order.len();
        let mut labels = vec![String::new(); n_tips];
        let mut parent = vec![None; n_nodes];
        let mut children = vec![Vec::new(); n_nodes];
        for &old in &order {
            let id = new_id[old];
            if id < n_tips {
                labels[id] = nodes[old]
                    .label
                    .clone()
                    .filter(|l| !l.is_empty())
                    .ok_or_else(|| PhyloFactorError::validation("tree contains an unlabeled tip"))?;
            }
            for &child in &nodes[old].children {
                children[id].push(new_id[child]);
                parent[new_id[child]] = Some(id);
            }
        }

        let mut label_index = HashMap::with_capacity(n_tips);
        for (i, label) in labels.iter().enumerate() {
            if label_index.insert(label.clone(), i).is_some() {
                return Err(PhyloFactorError::validation(format!(
                    "duplicate tip label '{}' in tree",
                    label
                )));
            }
        }

        Ok(Self {
            labels,
            label_index,
            parent,
            children,
        })
    }

    fn to_raw(&self) -> Vec<RawNode> {
        (0..self.n_nodes())
            .map(|node| RawNode {
                label: self.labels.get(node).cloned(),
                children: self.children[node].clone(),
            })
            .collect()
    }

    pub fn n_tips(&self) -> usize {
        self.labels.len()
    }

    pub fn n_nodes(&self) -> usize {
        self.children.len()
    }

    pub fn root(&self) -> usize {
        self.n_tips()
    }

    pub fn tip_labels(&self) -> &[String] {
        &self.labels
    }

    pub fn tip_index(&self, label: &str) -> Option<usize> {
        self.label_index.get(label).copied()
    }

    pub fn is_tip(&self, node: usize) -> bool {
        node < self.n_tips()
    }

    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    /// A tree is rooted when its root is bifurcating.
    pub fn is_rooted(&self) -> bool {
        self.children[self.root()].len() == 2
    }

    /// Unrooted bifurcating: trifurcating root, every other internal node of degree 3.
    pub fn is_unrooted_bifurcating(&self) -> bool {
        self.children[self.root()].len() == 3
            && (self.n_tips() + 1..self.n_nodes()).all(|n| self.children[n].len() == 2)
    }

    /// Edges in node order (tip edges first). The root has no edge.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        let root = self.root();
        (0..self.n_nodes())
            .filter(move |&n| n != root)
            .map(EdgeId::new)
    }

    /// Tips below every node, indexed by node.
    pub fn clade_masks(&self) -> Vec<BitVec> {
        let n_tips = self.n_tips();
        let mut masks = vec![bitvec![0; n_tips]; self.n_nodes()];
        for (tip, mask) in masks.iter_mut().enumerate().take(n_tips) {
            mask.set(tip, true);
        }
        // Internal nodes are numbered in preorder, so reverse order visits children first.
        for node in (n_tips..self.n_nodes()).rev() {
            let mut mask = bitvec![0; n_tips];
            for &child in &self.children[node] {
                mask |= masks[child].as_bitslice();
            }
            masks[node] = mask;
        }
        masks
    }

    /// Remove the bifurcating root by attaching one root child to the other.
    ///
    /// Returns the tree unchanged if it is already unrooted.
    pub fn unroot(&self) -> Result<Self> {
        if !self.is_rooted() {
            return Ok(self.clone());
        }
        let root = self.root();
        let (a, b) = (self.children[root][0], self.children[root][1]);
        let (new_root, other) = if !self.is_tip(a) {
            (a, b)
        } else if !self.is_tip(b) {
            (b, a)
        } else {
            return Err(PhyloFactorError::topology(
                "a two-tip tree cannot be unrooted",
            ));
        };

        let mut nodes = self.to_raw();
        nodes[new_root].children.push(other);
        nodes[root].children.clear();
        Self::from_raw(nodes, new_root)
    }

    /// Internal nodes with exactly one child.
    pub fn unary_nodes(&self) -> usize {
        (self.n_tips()..self.n_nodes())
            .filter(|&n| self.children[n].len() == 1)
            .count()
    }

    /// Splice out every internal node with a single child.
    pub fn suppress_unary_nodes(&self) -> Result<Self> {
        self.prune(|_| true)
    }

    /// Drop tips for which `keep` is false, suppressing internal nodes left
    /// with a single child.
    pub fn prune<F>(&self, keep: F) -> Result<Self>
    where
        F: Fn(&str) -> bool,
    {
        // Reversed preorder visits every child before its parent
        let mut order = Vec::with_capacity(self.n_nodes());
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children[node].iter().copied());
        }

        let mut mapped: Vec<Option<usize>> = vec![None; self.n_nodes()];
        let mut nodes = Vec::with_capacity(self.n_nodes());
        for &node in order.iter().rev() {
            if self.is_tip(node) {
                if keep(&self.labels[node]) {
                    nodes.push(RawNode {
                        label: Some(self.labels[node].clone()),
                        children: Vec::new(),
                    });
                    mapped[node] = Some(nodes.len() - 1);
                }
                continue;
            }
            let kept: Vec<usize> = self.children[node]
                .iter()
                .filter_map(|&c| mapped[c])
                .collect();
            mapped[node] = match kept.len() {
                0 => None,
                1 => Some(kept[0]),
                _ => {
                    nodes.push(RawNode {
                        label: None,
                        children: kept,
                    });
                    Some(nodes.len() - 1)
                }
            };
        }

        let root = mapped[self.root()]
            .ok_or_else(|| PhyloFactorError::validation("pruning removed every tip"))?;
        Self::from_raw(nodes, root)
    }

    /// Serialize back to Newick (topology and tip labels only).
    pub fn to_newick(&self) -> String {
        enum Step {
            Enter(usize),
            Text(&'static str),
        }

        let mut out = String::new();
        let mut stack = vec![Step::Enter(self.root())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Text(text) => out.push_str(text),
                Step::Enter(node) if self.is_tip(node) => {
                    out.push_str(&newick::quote_label(&self.labels[node]));
                }
                Step::Enter(node) => {
                    out.push('(');
                    stack.push(Step::Text(")"));
                    for (i, &child) in self.children[node].iter().enumerate().rev() {
                        stack.push(Step::Enter(child));
                        if i > 0 {
                            stack.push(Step::Text(","));
                        }
                    }
                }
            }
        }
        out.push(';');
        out
    }
}
