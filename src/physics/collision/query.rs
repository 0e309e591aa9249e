//! Ray types and ray intersection against bounding boxes.

use super::AABB;
use crate::math::Vec2;

/// A ray segment from `p1` towards `p2`,
/// extending to `p1 + max_fraction * (p2 - p1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCastInput {
    pub p1: Vec2,
    pub p2: Vec2,
    pub max_fraction: f64,
}

impl RayCastInput {
    #[inline]
    pub fn new(p1: Vec2, p2: Vec2) -> Self {
        Self {
            p1,
            p2,
            max_fraction: 1.0,
        }
    }

    /// The point at the given fraction along the ray.
    #[inline]
    pub fn point_at(&self, fraction: f64) -> Vec2 {
        self.p1 + fraction * (self.p2 - self.p1)
    }

    /// The end point of the ray taking `max_fraction` into account.
    #[inline]
    pub fn end(&self) -> Vec2 {
        self.point_at(self.max_fraction)
    }
}

/// Where a ray hit a shape. The hit point is at `p1 + fraction * (p2 - p1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCastOutput {
    /// Surface normal at the hit point, in world space.
    pub normal: Vec2,
    pub fraction: f64,
}

/// Intersect a ray with an AABB using the slab method,
/// returning the fraction of the ray where it enters the box.
/// A ray starting inside the box returns zero.
pub fn ray_aabb(input: &RayCastInput, aabb: &AABB) -> Option<f64> {
    let p = input.p1;
    let d = input.p2 - input.p1;
    let mut t_min = f64::MIN;
    let mut t_max = f64::MAX;

    for (p_i, d_i, lo, hi) in [
        (p.x, d.x, aabb.min.x, aabb.max.x),
        (p.y, d.y, aabb.min.y, aabb.max.y),
    ] {
        if d_i.abs() < f64::EPSILON {
            // parallel to this slab
            if p_i < lo || hi < p_i {
                return None;
            }
        } else {
            let inv_d = 1.0 / d_i;
            let mut t1 = (lo - p_i) * inv_d;
            let mut t2 = (hi - p_i) * inv_d;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
    }

    let t = t_min.max(0.0);
    if t > input.max_fraction || t_max < 0.0 {
        return None;
    }
    Some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_box() {
        let aabb = AABB::new(Vec2::new(1.0, -1.0), Vec2::new(2.0, 1.0));
        let ray = RayCastInput::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0));
        let t = ray_aabb(&ray, &aabb).expect("should hit");
        assert!((t - 0.25).abs() < 1e-12);
        assert_eq!(ray.point_at(t), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn ray_misses_or_falls_short() {
        let aabb = AABB::new(Vec2::new(1.0, -1.0), Vec2::new(2.0, 1.0));
        let above = RayCastInput::new(Vec2::new(0.0, 2.0), Vec2::new(4.0, 2.0));
        assert_eq!(ray_aabb(&above, &aabb), None);
        let short = RayCastInput {
            max_fraction: 0.2,
            ..RayCastInput::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0))
        };
        assert_eq!(ray_aabb(&short, &aabb), None);
        let away = RayCastInput::new(Vec2::new(0.0, 0.0), Vec2::new(-4.0, 0.0));
        assert_eq!(ray_aabb(&away, &aabb), None);
    }

    #[test]
    fn ray_from_inside() {
        let aabb = AABB::new(Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0));
        let ray = RayCastInput::new(Vec2::zero(), Vec2::new(0.0, 5.0));
        assert_eq!(ray_aabb(&ray, &aabb), Some(0.0));
    }
}
