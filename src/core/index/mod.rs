//! # BK-Tree Index Module
//!
//! In-memory metric trees over the 64-bit perceptual hashes, one per
//! hash kind. The metric is Hamming distance (popcount of XOR), which
//! satisfies the triangle inequality, so the classic BK-tree bound
//! applies: a node at distance d from the query only needs children
//! whose edge distance e satisfies |e - d| <= radius.
//!
//! The index is never persisted. It is rebuilt wholesale when it has
//! grown past twice its size at the last build, and on every full
//! rebuild.

use crate::core::hasher::{hamming_distance, HashKind};
use crate::error::StoreError;
use crate::store::Store;
use std::collections::HashMap;

struct Node {
    hash: u64,
    /// Several files can share one hash; they chain on the node
    file_ids: Vec<i64>,
    children: HashMap<u32, Box<Node>>,
}

impl Node {
    fn new(hash: u64, file_id: i64) -> Self {
        Self {
            hash,
            file_ids: vec![file_id],
            children: HashMap::new(),
        }
    }
}

/// One metric tree over 64-bit hashes of a single kind.
pub struct BkTree {
    kind: HashKind,
    root: Option<Box<Node>>,
    len: usize,
    len_at_build: usize,
}

impl BkTree {
    pub fn new(kind: HashKind) -> Self {
        Self {
            kind,
            root: None,
            len: 0,
            len_at_build: 0,
        }
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One root-to-leaf descent.
    pub fn insert(&mut self, file_id: i64, hash: u64) {
        self.len += 1;
        let Some(root) = self.root.as_mut() else {
            self.root = Some(Box::new(Node::new(hash, file_id)));
            return;
        };

        let mut node = root;
        loop {
            let distance = hamming_distance(hash, node.hash);
            if distance == 0 {
                node.file_ids.push(file_id);
                return;
            }
            match node.children.entry(distance) {
                std::collections::hash_map::Entry::Occupied(occupied) => {
                    node = occupied.into_mut();
                }
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(Box::new(Node::new(hash, file_id)));
                    return;
                }
            }
        }
    }

    /// Every stored (file_id, distance) with distance <= radius.
    pub fn query(&self, hash: u64, radius: u32) -> Vec<(i64, u32)> {
        let mut hits = Vec::new();
        let Some(root) = self.root.as_ref() else {
            return hits;
        };

        let mut stack = vec![root.as_ref()];
        while let Some(node) = stack.pop() {
            let distance = hamming_distance(hash, node.hash);
            if distance <= radius {
                hits.extend(node.file_ids.iter().map(|&id| (id, distance)));
            }
            for (&edge, child) in &node.children {
                if edge.abs_diff(distance) <= radius {
                    stack.push(child.as_ref());
                }
            }
        }

        hits
    }

    /// Has the tree grown more than 2x since the last full build?
    pub fn outgrown(&self) -> bool {
        self.len > self.len_at_build.saturating_mul(2)
    }

    fn mark_built(&mut self) {
        self.len_at_build = self.len;
    }
}

/// The three trees the grouping engine queries.
pub struct PerceptualIndex {
    trees: [BkTree; 3],
}

fn slot(kind: HashKind) -> usize {
    match kind {
        HashKind::Perceptual => 0,
        HashKind::Difference => 1,
        HashKind::Average => 2,
    }
}

impl PerceptualIndex {
    pub fn empty() -> Self {
        Self {
            trees: [
                BkTree::new(HashKind::Perceptual),
                BkTree::new(HashKind::Difference),
                BkTree::new(HashKind::Average),
            ],
        }
    }

    /// Full build from every feature row in the store.
    pub fn build_from_store(store: &Store) -> Result<Self, StoreError> {
        let mut index = Self::empty();
        store.for_each_feature(|feature| {
            index.insert_hashes(
                feature.file_id,
                feature.phash,
                feature.dhash,
                feature.ahash,
            );
        })?;
        for tree in &mut index.trees {
            tree.mark_built();
        }
        Ok(index)
    }

    /// Insert one file's hashes into whichever trees have a value.
    pub fn insert_hashes(
        &mut self,
        file_id: i64,
        phash: Option<u64>,
        dhash: Option<u64>,
        ahash: Option<u64>,
    ) {
        for tree in &mut self.trees {
            let hash = match tree.kind() {
                HashKind::Perceptual => phash,
                HashKind::Difference => dhash,
                HashKind::Average => ahash,
            };
            if let Some(hash) = hash {
                tree.insert(file_id, hash);
            }
        }
    }

    pub fn tree(&self, kind: HashKind) -> &BkTree {
        &self.trees[slot(kind)]
    }

    /// True when any tree has outgrown its last build.
    pub fn outgrown(&self) -> bool {
        self.trees.iter().any(BkTree::outgrown)
    }

    pub fn query(&self, kind: HashKind, hash: u64, radius: u32) -> Vec<(i64, u32)> {
        self.tree(kind).query(hash, radius)
    }
}
