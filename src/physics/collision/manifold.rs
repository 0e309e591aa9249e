//! Contact manifolds: the persistent, local-space description of a contact
//! between two shapes, and its world-space evaluation.

use crate::math::{Pose, Vec2};
use crate::physics::MAX_MANIFOLD_POINTS;

/// Whether a contact feature is a vertex or a face (edge) of a shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContactFeatureType {
    Vertex = 0,
    Face = 1,
}

/// Identifies the pair of features on each shape that produced a contact point.
/// Used to match points between steps for warm starting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContactId {
    pub index_a: u8,
    pub index_b: u8,
    pub type_a: ContactFeatureType,
    pub type_b: ContactFeatureType,
}

impl Default for ContactId {
    fn default() -> Self {
        Self {
            index_a: 0,
            index_b: 0,
            type_a: ContactFeatureType::Vertex,
            type_b: ContactFeatureType::Vertex,
        }
    }
}

impl ContactId {
    /// All four features packed into an integer for quick comparison.
    #[inline]
    pub fn key(&self) -> u32 {
        u32::from(self.index_a)
            | u32::from(self.index_b) << 8
            | (self.type_a as u32) << 16
            | (self.type_b as u32) << 24
    }

    /// The same id seen from the other shape's point of view.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            index_a: self.index_b,
            index_b: self.index_a,
            type_a: self.type_b,
            type_b: self.type_a,
        }
    }
}

/// A single contact point in a manifold.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ManifoldPoint {
    /// Meaning depends on the manifold kind:
    /// - Circles: the center of circle B in B's local space
    /// - FaceA: the clip point in B's local space
    /// - FaceB: the clip point in A's local space
    pub local_point: Vec2,
    /// Accumulated non-penetration impulse, carried between steps.
    pub normal_impulse: f64,
    /// Accumulated friction impulse, carried between steps.
    pub tangent_impulse: f64,
    pub id: ContactId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifoldKind {
    /// Two round shapes, normal along the line between their centers.
    Circles,
    /// Reference face on shape A.
    FaceA,
    /// Reference face on shape B.
    FaceB,
}

/// Contact points between two touching shapes, in the local spaces of the shapes
/// so that they stay valid while the bodies move during position correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Manifold {
    pub kind: ManifoldKind,
    /// Normal of the reference face in its shape's local space. Unused for `Circles`.
    pub local_normal: Vec2,
    /// Circles: center of circle A in A's local space.
    /// Faces: a point on the reference face.
    pub local_point: Vec2,
    points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

impl Default for Manifold {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifold {
    /// A manifold with no points, meaning the shapes aren't touching.
    pub fn empty() -> Self {
        Self {
            kind: ManifoldKind::Circles,
            local_normal: Vec2::zero(),
            local_point: Vec2::zero(),
            points: [ManifoldPoint::default(); MAX_MANIFOLD_POINTS],
            point_count: 0,
        }
    }

    pub(crate) fn new(kind: ManifoldKind, local_normal: Vec2, local_point: Vec2) -> Self {
        Self {
            kind,
            local_normal,
            local_point,
            ..Self::empty()
        }
    }

    /// Add a point, ignoring it if the manifold is already full.
    pub(crate) fn push(&mut self, point: ManifoldPoint) {
        if self.point_count < MAX_MANIFOLD_POINTS {
            self.points[self.point_count] = point;
            self.point_count += 1;
        }
    }

    #[inline]
    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.point_count]
    }

    #[inline]
    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points[..self.point_count]
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    pub(crate) fn clear(&mut self) {
        self.point_count = 0;
    }

    /// The same manifold with the roles of shapes A and B swapped.
    pub fn flipped(&self) -> Self {
        let mut out = *self;
        match self.kind {
            ManifoldKind::Circles => {
                let mut center = out.local_point;
                if let Some(p) = out.points_mut().first_mut() {
                    std::mem::swap(&mut center, &mut p.local_point);
                }
                out.local_point = center;
            }
            ManifoldKind::FaceA => out.kind = ManifoldKind::FaceB,
            ManifoldKind::FaceB => out.kind = ManifoldKind::FaceA,
        }
        for p in out.points_mut() {
            p.id = p.id.flipped();
        }
        out
    }
}

/// A manifold evaluated in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldManifold {
    /// Unit normal pointing from shape A to shape B.
    pub normal: Vec2,
    /// Contact points midway between the two surfaces.
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Signed distance between the surfaces at each point, negative when overlapping.
    pub separations: [f64; MAX_MANIFOLD_POINTS],
    pub point_count: usize,
}

impl WorldManifold {
    /// Evaluate a manifold given the poses and collision radii of the two shapes.
    pub fn new(manifold: &Manifold, pose_a: &Pose, radius_a: f64, pose_b: &Pose, radius_b: f64) -> Self {
        let mut out = Self {
            normal: Vec2::zero(),
            points: [Vec2::zero(); MAX_MANIFOLD_POINTS],
            separations: [0.0; MAX_MANIFOLD_POINTS],
            point_count: manifold.point_count(),
        };
        if manifold.is_empty() {
            return out;
        }

        match manifold.kind {
            ManifoldKind::Circles => {
                let point_a = *pose_a * manifold.local_point;
                let point_b = *pose_b * manifold.points[0].local_point;
                out.normal = if (point_b - point_a).mag_sq() > f64::EPSILON * f64::EPSILON {
                    (point_b - point_a).normalized()
                } else {
                    Vec2::unit_x()
                };
                let c_a = point_a + radius_a * out.normal;
                let c_b = point_b - radius_b * out.normal;
                out.points[0] = 0.5 * (c_a + c_b);
                out.separations[0] = (c_b - c_a).dot(out.normal);
            }
            ManifoldKind::FaceA => {
                out.normal = pose_a.rotation * manifold.local_normal;
                let plane_point = *pose_a * manifold.local_point;
                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = *pose_b * mp.local_point;
                    let c_a = clip_point
                        + (radius_a - (clip_point - plane_point).dot(out.normal)) * out.normal;
                    let c_b = clip_point - radius_b * out.normal;
                    out.points[i] = 0.5 * (c_a + c_b);
                    out.separations[i] = (c_b - c_a).dot(out.normal);
                }
            }
            ManifoldKind::FaceB => {
                let normal = pose_b.rotation * manifold.local_normal;
                let plane_point = *pose_b * manifold.local_point;
                for (i, mp) in manifold.points().iter().enumerate() {
                    let clip_point = *pose_a * mp.local_point;
                    let c_b =
                        clip_point + (radius_b - (clip_point - plane_point).dot(normal)) * normal;
                    let c_a = clip_point - radius_a * normal;
                    out.points[i] = 0.5 * (c_a + c_b);
                    out.separations[i] = (c_a - c_b).dot(normal);
                }
                // always point from A to B
                out.normal = -normal;
            }
        }
        out
    }

    #[inline]
    pub fn points(&self) -> &[Vec2] {
        &self.points[..self.point_count]
    }

    #[inline]
    pub fn separations(&self) -> &[f64] {
        &self.separations[..self.point_count]
    }
}
