//! Broad phase collision detection
//! is responsible for detecting pairs of possibly intersecting objects
//! for further, more accurate narrow phase inspection.

use super::{bvh::AABBIter, DynamicTree, ProxyId, RayCastInput, AABB};
use crate::math::Vec2;

/// A [`DynamicTree`] plus a buffer of proxies that moved since the last pair update.
///
/// Only moved proxies are queried when looking for new pairs,
/// so objects at rest cost nothing.
#[derive(Clone, Debug)]
pub struct BroadPhase<T: Copy> {
    tree: DynamicTree<T>,
    move_buffer: Vec<ProxyId>,
    pair_buffer: Vec<(ProxyId, ProxyId)>,
}

impl<T: Copy> Default for BroadPhase<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> BroadPhase<T> {
    pub fn new() -> Self {
        Self {
            tree: DynamicTree::new(),
            move_buffer: Vec::new(),
            pair_buffer: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.move_buffer.clear();
        self.pair_buffer.clear();
    }

    pub fn create_proxy(&mut self, aabb: AABB, data: T) -> ProxyId {
        let id = self.tree.create_proxy(aabb, data);
        self.move_buffer.push(id);
        id
    }

    pub fn destroy_proxy(&mut self, id: ProxyId) -> Option<T> {
        self.move_buffer.retain(|&m| m != id);
        self.tree.destroy_proxy(id)
    }

    /// Update a proxy's AABB. It's only queried for new pairs
    /// if its fat AABB had to be updated.
    pub fn move_proxy(&mut self, id: ProxyId, aabb: AABB, displacement: Vec2) {
        if self.tree.move_proxy(id, aabb, displacement) {
            self.move_buffer.push(id);
        }
    }

    /// Force a proxy to be queried for pairs on the next update,
    /// e.g. after its collision filter changed.
    pub fn touch_proxy(&mut self, id: ProxyId) {
        self.move_buffer.push(id);
    }

    #[inline]
    pub fn get_fat_aabb(&self, id: ProxyId) -> Option<AABB> {
        self.tree.get_fat_aabb(id)
    }

    #[inline]
    pub fn get_data(&self, id: ProxyId) -> Option<T> {
        self.tree.get_data(id)
    }

    /// Check whether the fat AABBs of two proxies overlap.
    pub fn test_overlap(&self, a: ProxyId, b: ProxyId) -> bool {
        match (self.tree.get_fat_aabb(a), self.tree.get_fat_aabb(b)) {
            (Some(a), Some(b)) => a.overlaps(&b),
            _ => false,
        }
    }

    #[inline]
    pub fn proxy_count(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn tree(&self) -> &DynamicTree<T> {
        &self.tree
    }

    #[inline]
    pub fn query(&self, aabb: AABB) -> AABBIter<'_, T> {
        self.tree.query(aabb)
    }

    #[inline]
    pub fn ray_cast(
        &self,
        input: &RayCastInput,
        callback: impl FnMut(&RayCastInput, ProxyId, T) -> f64,
    ) {
        self.tree.ray_cast(input, callback)
    }

    /// Find every pair of overlapping proxies where at least one has moved
    /// since the last call, passing each pair to the callback exactly once.
    pub fn update_pairs(&mut self, mut callback: impl FnMut(T, T)) {
        self.pair_buffer.clear();

        for &query_id in &self.move_buffer {
            let Some(fat_aabb) = self.tree.get_fat_aabb(query_id) else {
                continue;
            };
            for (other_id, _) in self.tree.query(fat_aabb) {
                if other_id == query_id {
                    continue;
                }
                // if both proxies moved, only add the pair when querying the smaller one
                if self.tree.was_moved(other_id) && other_id < query_id {
                    continue;
                }
                self.pair_buffer.push((query_id.min(other_id), query_id.max(other_id)));
            }
        }

        for id in self.move_buffer.drain(..) {
            self.tree.clear_moved(id);
        }

        // a proxy can be in the move buffer more than once
        self.pair_buffer.sort_unstable();
        self.pair_buffer.dedup();

        for &(a, b) in &self.pair_buffer {
            if let (Some(data_a), Some(data_b)) = (self.tree.get_data(a), self.tree.get_data(b)) {
                callback(data_a, data_b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn aabb_at(x: f64, y: f64, half: f64) -> AABB {
        AABB::new(Vec2::new(x - half, y - half), Vec2::new(x + half, y + half))
    }

    fn collect_pairs(bp: &mut BroadPhase<usize>) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        bp.update_pairs(|a, b| pairs.push((a.min(b), a.max(b))));
        pairs
    }

    #[test]
    fn pairs_are_reported_once() {
        let mut bp = BroadPhase::new();
        bp.create_proxy(aabb_at(0.0, 0.0, 1.0), 0);
        bp.create_proxy(aabb_at(1.0, 0.0, 1.0), 1);
        bp.create_proxy(aabb_at(10.0, 0.0, 1.0), 2);
        bp.create_proxy(aabb_at(0.5, 0.5, 1.0), 3);

        let mut pairs = collect_pairs(&mut bp);
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 1), (0, 3), (1, 3)]);

        // nothing moved
        assert!(collect_pairs(&mut bp).is_empty());
    }

    #[test]
    fn moving_proxy_finds_new_pairs() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb_at(0.0, 0.0, 0.5), 0);
        bp.create_proxy(aabb_at(5.0, 0.0, 0.5), 1);
        assert!(collect_pairs(&mut bp).is_empty());

        bp.move_proxy(a, aabb_at(4.5, 0.0, 0.5), Vec2::new(4.5, 0.0));
        assert_eq!(collect_pairs(&mut bp), vec![(0, 1)]);

        // touching a proxy makes it report its existing pairs again
        bp.touch_proxy(a);
        bp.touch_proxy(a);
        assert_eq!(collect_pairs(&mut bp), vec![(0, 1)]);
    }

    #[test]
    fn destroyed_proxies_are_not_paired() {
        let mut bp = BroadPhase::new();
        let a = bp.create_proxy(aabb_at(0.0, 0.0, 1.0), 0);
        bp.create_proxy(aabb_at(0.5, 0.0, 1.0), 1);
        assert_eq!(bp.destroy_proxy(a), Some(0));
        assert!(collect_pairs(&mut bp).is_empty());
        assert_eq!(bp.proxy_count(), 1);
    }

    #[test]
    fn randomized_pairs_match_brute_force() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1234);
        let mut bp = BroadPhase::new();
        let mut ids = Vec::new();
        for i in 0..200 {
            let aabb = aabb_at(
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                rng.gen_range(0.2..2.0),
            );
            ids.push(bp.create_proxy(aabb, i));
        }
        let found: HashSet<(usize, usize)> = collect_pairs(&mut bp).into_iter().collect();

        let expected: HashSet<(usize, usize)> = ids
            .iter()
            .enumerate()
            .tuple_combinations()
            .filter(|((_, a), (_, b))| bp.test_overlap(**a, **b))
            .map(|((i, _), (j, _))| (i.min(j), i.max(j)))
            .collect();
        assert_eq!(found, expected);
    }
}
