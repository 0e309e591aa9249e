//! A dynamic Bounding Volume Hierarchy
//! for speeding up collision detection and other spatial queries.
//!
//! Leaves store "fat" AABBs that are larger than the objects they contain,
//! so that objects can move a little without the tree needing to be updated.

use super::{segment_separates, RayCastInput, AABB};
use crate::math::Vec2;
use crate::physics::{AABB_MARGIN, AABB_MULTIPLIER};

/// Identifier of a leaf in a [`DynamicTree`].
///
/// Node slots are reused after a proxy is destroyed, but every reuse bumps
/// the slot's generation, so an id kept past its proxy's destruction
/// no longer refers to anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProxyId {
    index: usize,
    generation: u32,
}

impl ProxyId {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

//
// Internal types
//

#[derive(Clone, Copy, Debug)]
struct Node<T> {
    aabb: AABB,
    parent: Option<usize>,
    /// Leaves have height 0, free nodes -1.
    height: i32,
    /// Bumped every time the node is freed.
    generation: u32,
    kind: NodeKind<T>,
}

#[derive(Clone, Copy, Debug)]
enum NodeKind<T> {
    Branch { left: usize, right: usize },
    Leaf { data: T, moved: bool },
    Free { next: Option<usize> },
}

impl<T> Node<T> {
    #[inline]
    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    #[inline]
    fn children(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Branch { left, right } => Some((left, right)),
            _ => None,
        }
    }
}

//
// Tree itself
//

/// A binary AABB tree with incremental insertion, removal and rebalancing.
///
/// Insertion walks down the tree choosing the child that minimizes
/// the increase in total perimeter, and the tree is kept balanced
/// with AVL-style rotations on the way back up.
#[derive(Clone, Debug)]
pub struct DynamicTree<T: Copy> {
    nodes: Vec<Node<T>>,
    root: Option<usize>,
    free_list: Option<usize>,
    leaf_count: usize,
}

impl<T: Copy> Default for DynamicTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> DynamicTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            free_list: None,
            leaf_count: 0,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.free_list = None;
        self.leaf_count = 0;
    }

    /// Number of proxies in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Height of the tree, zero for an empty tree or a single leaf.
    pub fn height(&self) -> i32 {
        self.root.map_or(0, |r| self.nodes[r].height)
    }

    /// Create a proxy for a tight AABB. The tree stores a fattened version of it.
    pub fn create_proxy(&mut self, aabb: AABB, data: T) -> ProxyId {
        let leaf = self.allocate_node(Node {
            aabb: aabb.padded(AABB_MARGIN),
            parent: None,
            height: 0,
            generation: 0,
            kind: NodeKind::Leaf { data, moved: true },
        });
        self.insert_leaf(leaf);
        self.leaf_count += 1;
        self.proxy_id(leaf)
    }

    #[inline]
    fn proxy_id(&self, idx: usize) -> ProxyId {
        ProxyId {
            index: idx,
            generation: self.nodes[idx].generation,
        }
    }

    /// Node index of a live proxy, `None` if the id is stale.
    #[inline]
    fn leaf_index(&self, id: ProxyId) -> Option<usize> {
        self.nodes
            .get(id.index)
            .filter(|n| n.is_leaf() && n.generation == id.generation)
            .map(|_| id.index)
    }

    /// Remove a proxy, returning its data if it existed.
    pub fn destroy_proxy(&mut self, id: ProxyId) -> Option<T> {
        let data = self.get_data(id)?;
        self.remove_leaf(id.index);
        self.free_node(id.index);
        self.leaf_count -= 1;
        Some(data)
    }

    /// Update the AABB of a proxy that moved by `displacement` since its last update.
    ///
    /// Returns true if the proxy needed to be reinserted,
    /// which happens when the tight AABB left the fat one
    /// or the fat one has become much bigger than it needs to be.
    pub fn move_proxy(&mut self, id: ProxyId, aabb: AABB, displacement: Vec2) -> bool {
        let Some(idx) = self.leaf_index(id) else {
            return false;
        };

        let fat_aabb = aabb
            .padded(AABB_MARGIN)
            .extended_towards(AABB_MULTIPLIER * displacement);

        let tree_aabb = self.nodes[idx].aabb;
        if tree_aabb.contains(&aabb) {
            // still fits, but check that the fat AABB isn't grossly oversized
            // e.g. after a fast-moving object slowed down
            let huge_aabb = fat_aabb.padded(4.0 * AABB_MARGIN);
            if huge_aabb.contains(&tree_aabb) {
                return false;
            }
        }

        self.remove_leaf(idx);
        self.nodes[idx].aabb = fat_aabb;
        self.insert_leaf(idx);
        if let NodeKind::Leaf { moved, .. } = &mut self.nodes[idx].kind {
            *moved = true;
        }
        true
    }

    /// Get the data stored with a proxy.
    pub fn get_data(&self, id: ProxyId) -> Option<T> {
        match self.nodes[self.leaf_index(id)?].kind {
            NodeKind::Leaf { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Get the fattened AABB of a proxy.
    pub fn get_fat_aabb(&self, id: ProxyId) -> Option<AABB> {
        self.leaf_index(id).map(|idx| self.nodes[idx].aabb)
    }

    /// Check whether the proxy has been (re)inserted since the flag was last cleared.
    pub fn was_moved(&self, id: ProxyId) -> bool {
        matches!(
            self.leaf_index(id).map(|idx| self.nodes[idx].kind),
            Some(NodeKind::Leaf { moved: true, .. })
        )
    }

    pub fn clear_moved(&mut self, id: ProxyId) {
        let Some(idx) = self.leaf_index(id) else {
            return;
        };
        if let NodeKind::Leaf { moved, .. } = &mut self.nodes[idx].kind {
            *moved = false;
        }
    }

    /// Iterate over every proxy whose fat AABB overlaps the given AABB.
    pub fn query(&self, aabb: AABB) -> AABBIter<'_, T> {
        AABBIter {
            aabb,
            stack: Vec::new(),
            nodes: &self.nodes,
            // the iterator only checks children, check the root here
            next_node: self.root.filter(|&r| self.nodes[r].aabb.overlaps(&aabb)),
        }
    }

    /// Iterate over every proxy in the tree.
    pub fn iter(&self) -> impl Iterator<Item = (ProxyId, T)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| match n.kind {
            NodeKind::Leaf { data, .. } => Some((
                ProxyId {
                    index: i,
                    generation: n.generation,
                },
                data,
            )),
            _ => None,
        })
    }

    /// Cast a ray against the proxies in the tree.
    ///
    /// The callback receives the ray clipped to the current max fraction
    /// and returns the new max fraction:
    /// 0 to stop the cast, a positive value to clip the ray there,
    /// or a negative value to ignore the proxy and continue unchanged.
    pub fn ray_cast(&self, input: &RayCastInput, mut callback: impl FnMut(&RayCastInput, ProxyId, T) -> f64) {
        let Some(root) = self.root else {
            return;
        };

        let p1 = input.p1;
        let mut sub_input = *input;
        let mut segment_aabb = AABB::from_segment(p1, sub_input.end());

        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.aabb.overlaps(&segment_aabb) {
                continue;
            }
            if segment_separates(&node.aabb, p1, sub_input.end()) {
                continue;
            }

            match node.kind {
                NodeKind::Leaf { data, .. } => {
                    let value = callback(&sub_input, self.proxy_id(idx), data);
                    if value == 0.0 {
                        return;
                    }
                    if value > 0.0 {
                        sub_input.max_fraction = value;
                        segment_aabb = AABB::from_segment(p1, sub_input.end());
                    }
                }
                NodeKind::Branch { left, right } => {
                    stack.push(left);
                    stack.push(right);
                }
                NodeKind::Free { .. } => {}
            }
        }
    }

    //
    // node pool
    //

    fn allocate_node(&mut self, node: Node<T>) -> usize {
        match self.free_list {
            Some(idx) => {
                self.free_list = match self.nodes[idx].kind {
                    NodeKind::Free { next } => next,
                    _ => None,
                };
                let generation = self.nodes[idx].generation;
                self.nodes[idx] = Node { generation, ..node };
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn free_node(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.kind = NodeKind::Free {
            next: self.free_list,
        };
        node.parent = None;
        node.height = -1;
        node.generation = node.generation.wrapping_add(1);
        self.free_list = Some(idx);
    }

    fn set_children(&mut self, idx: usize, left: usize, right: usize) {
        self.nodes[idx].kind = NodeKind::Branch { left, right };
    }

    fn replace_child(&mut self, parent: Option<usize>, old: usize, new: usize) {
        match parent {
            Some(p) => {
                if let NodeKind::Branch { left, right } = &mut self.nodes[p].kind {
                    if *left == old {
                        *left = new;
                    } else {
                        *right = new;
                    }
                }
            }
            None => self.root = Some(new),
        }
    }

    /// Recompute the AABB and height of a branch from its children.
    fn refit(&mut self, idx: usize) {
        if let Some((left, right)) = self.nodes[idx].children() {
            let (l, r) = (&self.nodes[left], &self.nodes[right]);
            let aabb = l.aabb.union(&r.aabb);
            let height = 1 + l.height.max(r.height);
            let node = &mut self.nodes[idx];
            node.aabb = aabb;
            node.height = height;
        }
    }

    //
    // insertion and removal
    //

    fn insert_leaf(&mut self, leaf: usize) {
        let Some(root) = self.root else {
            self.root = Some(leaf);
            self.nodes[leaf].parent = None;
            return;
        };

        // find the best sibling by the surface area heuristic
        let leaf_aabb = self.nodes[leaf].aabb;
        let mut idx = root;
        while let Some((left, right)) = self.nodes[idx].children() {
            let area = self.nodes[idx].aabb.perimeter();
            let combined_area = self.nodes[idx].aabb.union(&leaf_aabb).perimeter();

            // cost of creating a new parent for this node and the new leaf
            let cost = 2.0 * combined_area;
            // minimum cost of pushing the leaf further down the tree
            let inheritance_cost = 2.0 * (combined_area - area);

            let descend_cost = |child: usize| {
                let child = &self.nodes[child];
                let union_area = leaf_aabb.union(&child.aabb).perimeter();
                if child.is_leaf() {
                    union_area + inheritance_cost
                } else {
                    union_area - child.aabb.perimeter() + inheritance_cost
                }
            };
            let cost_left = descend_cost(left);
            let cost_right = descend_cost(right);

            if cost < cost_left && cost < cost_right {
                break;
            }
            idx = if cost_left < cost_right { left } else { right };
        }
        let sibling = idx;

        // create a new parent in place of the sibling
        let old_parent = self.nodes[sibling].parent;
        let new_parent = self.allocate_node(Node {
            aabb: leaf_aabb.union(&self.nodes[sibling].aabb),
            parent: old_parent,
            height: self.nodes[sibling].height + 1,
            generation: 0,
            kind: NodeKind::Branch {
                left: sibling,
                right: leaf,
            },
        });
        self.replace_child(old_parent, sibling, new_parent);
        self.nodes[sibling].parent = Some(new_parent);
        self.nodes[leaf].parent = Some(new_parent);

        // walk back up fixing heights and AABBs
        self.refit_ancestors(self.nodes[leaf].parent);
    }

    fn remove_leaf(&mut self, leaf: usize) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }

        let Some(parent) = self.nodes[leaf].parent else {
            return;
        };
        let grand_parent = self.nodes[parent].parent;
        let sibling = match self.nodes[parent].children() {
            Some((left, right)) if left == leaf => right,
            Some((left, _)) => left,
            None => return,
        };

        // the sibling takes the parent's place
        self.replace_child(grand_parent, parent, sibling);
        self.nodes[sibling].parent = grand_parent;
        self.nodes[leaf].parent = None;
        self.free_node(parent);

        self.refit_ancestors(grand_parent);
    }

    fn refit_ancestors(&mut self, start: Option<usize>) {
        let mut curr = start;
        while let Some(idx) = curr {
            let idx = self.balance(idx);
            self.refit(idx);
            curr = self.nodes[idx].parent;
        }
    }

    /// Perform a left or right rotation if node `a` is imbalanced.
    /// Returns the new root of the subtree.
    fn balance(&mut self, a: usize) -> usize {
        let Some((b, c)) = self.nodes[a].children() else {
            return a;
        };
        if self.nodes[a].height < 2 {
            return a;
        }

        let balance = self.nodes[c].height - self.nodes[b].height;

        if balance > 1 {
            // rotate c up
            let Some((f, g)) = self.nodes[c].children() else {
                return a;
            };
            let a_parent = self.nodes[a].parent;
            self.nodes[c].parent = a_parent;
            self.nodes[a].parent = Some(c);
            self.replace_child(a_parent, a, c);

            let (keep, give) = if self.nodes[f].height > self.nodes[g].height {
                (f, g)
            } else {
                (g, f)
            };
            self.set_children(c, a, keep);
            self.set_children(a, b, give);
            self.nodes[give].parent = Some(a);
            self.refit(a);
            self.refit(c);
            return c;
        }

        if balance < -1 {
            // rotate b up
            let Some((d, e)) = self.nodes[b].children() else {
                return a;
            };
            let a_parent = self.nodes[a].parent;
            self.nodes[b].parent = a_parent;
            self.nodes[a].parent = Some(b);
            self.replace_child(a_parent, a, b);

            let (keep, give) = if self.nodes[d].height > self.nodes[e].height {
                (d, e)
            } else {
                (e, d)
            };
            self.set_children(b, a, keep);
            self.set_children(a, give, c);
            self.nodes[give].parent = Some(a);
            self.refit(a);
            self.refit(b);
            return b;
        }

        a
    }

    //
    // debugging
    //

    /// Check the structural invariants of the tree:
    /// parent links, heights, bounding volumes and node accounting.
    pub fn validate(&self) -> bool {
        let mut reachable = 0;
        let structure_ok = match self.root {
            Some(root) => {
                self.nodes[root].parent.is_none() && self.validate_subtree(root, &mut reachable)
            }
            None => true,
        };

        let mut free_count = 0;
        let mut curr = self.free_list;
        while let Some(idx) = curr {
            free_count += 1;
            if free_count > self.nodes.len() {
                return false;
            }
            curr = match self.nodes[idx].kind {
                NodeKind::Free { next } => next,
                _ => return false,
            };
        }

        structure_ok && reachable + free_count == self.nodes.len()
    }

    fn validate_subtree(&self, idx: usize, reachable: &mut usize) -> bool {
        *reachable += 1;
        let node = &self.nodes[idx];
        match node.kind {
            NodeKind::Leaf { .. } => node.height == 0,
            NodeKind::Free { .. } => false,
            NodeKind::Branch { left, right } => {
                let (l, r) = (&self.nodes[left], &self.nodes[right]);
                l.parent == Some(idx)
                    && r.parent == Some(idx)
                    && node.height == 1 + l.height.max(r.height)
                    && node.aabb.contains(&l.aabb)
                    && node.aabb.contains(&r.aabb)
                    && self.validate_subtree(left, reachable)
                    && self.validate_subtree(right, reachable)
            }
        }
    }
}

//
// Iterators
//

/// An iterator that yields every proxy whose fat AABB intersects a given AABB.
#[derive(Debug)]
pub struct AABBIter<'a, T> {
    aabb: AABB,
    stack: Vec<usize>,
    nodes: &'a [Node<T>],
    next_node: Option<usize>,
}

impl<'a, T: Copy> Iterator for AABBIter<'a, T> {
    type Item = (ProxyId, T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_node = self.next_node?;

            match self.nodes[next_node].kind {
                NodeKind::Branch { left, right } => {
                    match (
                        self.aabb.overlaps(&self.nodes[left].aabb),
                        self.aabb.overlaps(&self.nodes[right].aabb),
                    ) {
                        (true, true) => {
                            // need to visit both children, push to stack to return to later
                            self.stack.push(right);
                            self.next_node = Some(left);
                        }
                        (true, false) => {
                            self.next_node = Some(left);
                        }
                        (false, true) => {
                            self.next_node = Some(right);
                        }
                        (false, false) => {
                            // nothing below this, return back up the stack
                            self.next_node = self.stack.pop();
                        }
                    }
                }
                NodeKind::Leaf { data, .. } => {
                    self.next_node = self.stack.pop();
                    let id = ProxyId {
                        index: next_node,
                        generation: self.nodes[next_node].generation,
                    };
                    return Some((id, data));
                }
                NodeKind::Free { .. } => {
                    self.next_node = self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn aabb_at(x: f64, y: f64, half: f64) -> AABB {
        AABB::new(Vec2::new(x - half, y - half), Vec2::new(x + half, y + half))
    }

    #[test]
    fn query_matches_brute_force() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut tree = DynamicTree::new();
        let mut boxes = Vec::new();
        for i in 0..300 {
            let aabb = aabb_at(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(0.1..3.0),
            );
            let id = tree.create_proxy(aabb, i);
            boxes.push((id, aabb));
        }
        assert!(tree.validate());

        for _ in 0..50 {
            let query = aabb_at(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(1.0..10.0),
            );
            let found: HashSet<usize> = tree.query(query).map(|(_, data)| data).collect();
            for (i, (id, aabb)) in boxes.iter().enumerate() {
                if aabb.overlaps(&query) {
                    assert!(found.contains(&i), "missed proxy {}", i);
                }
                // anything reported must overlap the stored fat AABB
                if found.contains(&i) {
                    assert!(tree.get_fat_aabb(*id).unwrap().overlaps(&query));
                }
            }
        }
    }

    #[test]
    fn sequential_insertion_stays_balanced() {
        let mut tree = DynamicTree::new();
        let n = 1000;
        for i in 0..n {
            tree.create_proxy(aabb_at(i as f64 * 2.0, 0.0, 0.5), i);
        }
        assert!(tree.validate());
        let bound = 2.0 * (n as f64).log2() + 2.0;
        assert!(
            (tree.height() as f64) <= bound,
            "height {} exceeds {}",
            tree.height(),
            bound
        );
    }

    #[test]
    fn move_proxy_only_reinserts_when_needed() {
        let mut tree = DynamicTree::new();
        let aabb = aabb_at(0.0, 0.0, 0.5);
        let id = tree.create_proxy(aabb, ());
        tree.clear_moved(id);

        // small move within the margin
        let nudged = aabb_at(0.05, 0.0, 0.5);
        assert!(!tree.move_proxy(id, nudged, Vec2::new(0.05, 0.0)));
        assert!(!tree.was_moved(id));

        // out of the fat aabb
        let moved = aabb_at(1.0, 0.0, 0.5);
        assert!(tree.move_proxy(id, moved, Vec2::new(0.95, 0.0)));
        assert!(tree.was_moved(id));
        let fat = tree.get_fat_aabb(id).unwrap();
        assert!(fat.contains(&moved));
        // extended in the direction of motion
        assert!(fat.max.x - moved.max.x > moved.min.x - fat.min.x);

        // stopped moving, fat box is now much too big and gets shrunk
        tree.clear_moved(id);
        assert!(tree.move_proxy(id, moved, Vec2::zero()));
        assert!((tree.get_fat_aabb(id).unwrap().width() - (1.0 + 2.0 * AABB_MARGIN)).abs() < 1e-12);
        assert!(tree.validate());
    }

    #[test]
    fn destroy_and_reuse() {
        let mut tree = DynamicTree::new();
        let ids: Vec<ProxyId> = (0..20)
            .map(|i| tree.create_proxy(aabb_at(i as f64, (i % 3) as f64, 0.4), i))
            .collect();
        for id in ids.iter().step_by(2) {
            assert!(tree.destroy_proxy(*id).is_some());
        }
        assert!(tree.validate());
        assert_eq!(tree.len(), 10);
        assert_eq!(tree.destroy_proxy(ids[0]), None);

        for i in 0..10 {
            tree.create_proxy(aabb_at(i as f64, 10.0, 0.4), 100 + i);
        }
        assert!(tree.validate());
        assert_eq!(tree.len(), 20);
        assert_eq!(tree.iter().count(), 20);

        for (id, _) in tree.iter().collect::<Vec<_>>() {
            tree.destroy_proxy(id);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert!(tree.validate());
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut tree = DynamicTree::new();
        let old = tree.create_proxy(aabb_at(0.0, 0.0, 0.5), 1);
        assert_eq!(tree.destroy_proxy(old), Some(1));

        // a single leaf needs no branch node, so the new proxy takes the same slot
        let new = tree.create_proxy(aabb_at(5.0, 0.0, 0.5), 2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);

        assert_eq!(tree.get_data(old), None);
        assert_eq!(tree.get_fat_aabb(old), None);
        assert!(!tree.was_moved(old));
        assert!(!tree.move_proxy(old, aabb_at(20.0, 0.0, 0.5), Vec2::zero()));
        assert_eq!(tree.destroy_proxy(old), None);

        assert_eq!(tree.get_data(new), Some(2));
        assert!(tree.get_fat_aabb(new).unwrap().contains(&aabb_at(5.0, 0.0, 0.5)));
        assert_eq!(tree.len(), 1);
        assert!(tree.validate());
    }

    #[test]
    fn ray_cast_visits_and_clips() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.create_proxy(aabb_at(i as f64 * 3.0, 0.0, 0.5), i);
        }
        tree.create_proxy(aabb_at(5.0, 20.0, 0.5), 99);

        let ray = RayCastInput::new(Vec2::new(-5.0, 0.0), Vec2::new(35.0, 0.0));
        let mut seen = Vec::new();
        tree.ray_cast(&ray, |_, _, data| {
            seen.push(data);
            -1.0
        });
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        // terminating immediately visits one proxy
        let mut count = 0;
        tree.ray_cast(&ray, |_, _, _| {
            count += 1;
            0.0
        });
        assert_eq!(count, 1);

        // clipping the ray at the first box hides everything behind it
        let mut seen = Vec::new();
        tree.ray_cast(&ray, |input, _, data| {
            seen.push(data);
            // distance to the front face of this box
            let x = data as f64 * 3.0 - 0.5;
            let fraction = (x - input.p1.x) / (input.p2.x - input.p1.x);
            fraction.min(input.max_fraction)
        });
        assert!(seen.contains(&0));
    }
}
