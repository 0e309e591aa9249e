//! Collision detection: shapes and their bounding volumes,
//! the broad phase that finds potentially overlapping pairs
//! and the narrow phase that computes exact contact manifolds.

use crate::math::{self as m, Vec2};

pub mod shape;
pub use shape::{Circle, Edge, MassData, Polygon, Shape, ShapeType};

pub mod query;
pub use query::{RayCastInput, RayCastOutput};

pub mod bvh;
pub use bvh::{DynamicTree, ProxyId};

pub mod broadphase;
pub use broadphase::BroadPhase;

pub mod manifold;
pub use manifold::{ContactFeatureType, ContactId, Manifold, ManifoldKind, ManifoldPoint, WorldManifold};

pub mod narrowphase;
pub use narrowphase::collide;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct AABB {
    pub min: Vec2,
    pub max: Vec2,
}

impl AABB {
    #[inline]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn zero() -> Self {
        Self {
            min: Vec2::zero(),
            max: Vec2::zero(),
        }
    }

    /// The smallest AABB containing all the given points.
    /// Returns a zero AABB at the origin if the iterator is empty.
    pub fn from_points(points: impl IntoIterator<Item = Vec2>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::zero();
        };
        points.fold(Self::new(first, first), |acc, p| Self {
            min: acc.min.min_by_component(p),
            max: acc.max.max_by_component(p),
        })
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        0.5 * (self.min + self.max)
    }

    /// Half-widths of the box along each axis.
    #[inline]
    pub fn extents(&self) -> Vec2 {
        0.5 * (self.max - self.min)
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Used as the insertion cost of the dynamic tree.
    #[inline]
    pub fn perimeter(&self) -> f64 {
        2.0 * (self.width() + self.height())
    }

    /// Check that `min` is below `max` on both axes and all coordinates are finite.
    pub fn is_valid(&self) -> bool {
        let d = self.max - self.min;
        d.x >= 0.0
            && d.y >= 0.0
            && self.min.x.is_finite()
            && self.min.y.is_finite()
            && self.max.x.is_finite()
            && self.max.y.is_finite()
    }

    #[inline]
    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min_by_component(other.min),
            max: self.max.max_by_component(other.max),
        }
    }

    /// The overlapping region of two AABBs, if there is any.
    pub fn intersection(&self, other: &AABB) -> Option<AABB> {
        if self.overlaps(other) {
            Some(AABB {
                min: self.min.max_by_component(other.min),
                max: self.max.min_by_component(other.max),
            })
        } else {
            None
        }
    }

    /// Overlap test. Touching boundaries count as overlapping.
    #[inline]
    pub fn overlaps(&self, other: &AABB) -> bool {
        !(other.min.x > self.max.x
            || other.min.y > self.max.y
            || self.min.x > other.max.x
            || self.min.y > other.max.y)
    }

    /// Check whether `other` lies completely inside `self`.
    #[inline]
    pub fn contains(&self, other: &AABB) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    #[inline]
    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Grow the AABB by `margin` in every direction.
    #[inline]
    pub fn padded(&self, margin: f64) -> AABB {
        let pad = Vec2::new(margin, margin);
        AABB {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Stretch the AABB in the direction of `displacement`,
    /// leaving the opposite side where it is.
    pub fn extended_towards(&self, displacement: Vec2) -> AABB {
        let mut out = *self;
        if displacement.x < 0.0 {
            out.min.x += displacement.x;
        } else {
            out.max.x += displacement.x;
        }
        if displacement.y < 0.0 {
            out.min.y += displacement.y;
        } else {
            out.max.y += displacement.y;
        }
        out
    }

    /// The AABB of a segment between two points.
    #[inline]
    pub fn from_segment(p1: Vec2, p2: Vec2) -> AABB {
        AABB {
            min: p1.min_by_component(p2),
            max: p1.max_by_component(p2),
        }
    }

    /// Distance between the AABB and a point, zero if the point is inside.
    pub fn distance_to_point(&self, point: Vec2) -> f64 {
        let clamped = point.max_by_component(self.min).min_by_component(self.max);
        (point - clamped).mag()
    }

    /// Corners in counterclockwise order starting from `min`.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

/// Left-hand side of the separating axis test for a segment against an AABB,
/// shared by ray queries.
#[inline]
pub(crate) fn segment_separates(aabb: &AABB, p1: Vec2, p2: Vec2) -> bool {
    let d = p2 - p1;
    let v = m::left_normal(d).abs();
    let c = 0.5 * (p1 + p2);
    let h = aabb.extents();
    let separation = m::left_normal(d).dot(c - aabb.center()).abs() - v.dot(h);
    separation > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(x0: f64, y0: f64, x1: f64, y1: f64) -> AABB {
        AABB::new(Vec2::new(x0, y0), Vec2::new(x1, y1))
    }

    #[test]
    fn overlap_and_containment() {
        let a = aabb(0.0, 0.0, 2.0, 2.0);
        let b = aabb(1.0, 1.0, 3.0, 3.0);
        let c = aabb(2.5, 2.5, 4.0, 4.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.overlaps(&aabb(2.0, 0.0, 3.0, 1.0)), "touching edges overlap");
        assert_eq!(a.intersection(&b), Some(aabb(1.0, 1.0, 2.0, 2.0)));
        assert_eq!(a.intersection(&c), None);
        assert!(a.padded(0.5).contains(&a));
        assert!(!a.contains(&b));
        assert_eq!(a.union(&c), aabb(0.0, 0.0, 4.0, 4.0));
        assert_eq!(a.perimeter(), 8.0);
    }

    #[test]
    fn extension_follows_motion() {
        let a = aabb(0.0, 0.0, 1.0, 1.0);
        let e = a.extended_towards(Vec2::new(-2.0, 3.0));
        assert_eq!(e, aabb(-2.0, 0.0, 1.0, 4.0));
    }

    #[test]
    fn segment_separation() {
        let a = aabb(0.0, 0.0, 1.0, 1.0);
        assert!(!segment_separates(&a, Vec2::new(-1.0, 0.5), Vec2::new(2.0, 0.5)));
        assert!(segment_separates(&a, Vec2::new(-1.0, 2.5), Vec2::new(3.0, 1.5)));
    }
}
