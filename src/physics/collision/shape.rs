//! Collision shapes and their geometric properties.

use super::{RayCastInput, RayCastOutput, AABB};
use crate::math::{self as m, Pose, Vec2};
use crate::physics::{PhysicsError, Result, LINEAR_SLOP, MAX_POLYGON_VERTICES, SKIN};

/// Mass properties of a shape or a body.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MassData {
    pub mass: f64,
    pub area: f64,
    /// Center of mass relative to the shape's local origin.
    pub center: Vec2,
    /// Rotational inertia about the center of mass.
    pub inertia: f64,
}

/// The geometric shape of a fixture.
///
/// Every shape is surrounded by a skin of thickness [`SKIN`][crate::physics::SKIN]
/// that counts as part of the shape for collision purposes, so that contacts are
/// generated slightly before the shapes themselves touch.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum Shape {
    Circle(Circle),
    Polygon(Polygon),
    /// A line segment. Edges have no mass and are usually attached to static bodies.
    Edge(Edge),
}

/// Tag identifying the kind of a [`Shape`] without its geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeType {
    Circle,
    Polygon,
    Edge,
}

impl Shape {
    /// Shorthand for a circle centered at the local origin.
    pub fn circle(radius: f64) -> Result<Self> {
        Circle::new(radius).map(Shape::Circle)
    }

    /// Shorthand for an axis-aligned box centered at the local origin.
    pub fn rect(width: f64, height: f64) -> Result<Self> {
        Polygon::new_box(width / 2.0, height / 2.0).map(Shape::Polygon)
    }

    /// Shorthand for a convex polygon.
    pub fn polygon(points: &[Vec2]) -> Result<Self> {
        Polygon::new(points).map(Shape::Polygon)
    }

    /// Shorthand for a line segment.
    pub fn edge(v1: Vec2, v2: Vec2) -> Result<Self> {
        Edge::new(v1, v2).map(Shape::Edge)
    }

    #[inline]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Circle(_) => ShapeType::Circle,
            Shape::Polygon(_) => ShapeType::Polygon,
            Shape::Edge(_) => ShapeType::Edge,
        }
    }

    /// Radius of the geometry itself, not including the skin.
    /// Zero for polygons and edges.
    #[inline]
    pub fn radius(&self) -> f64 {
        match self {
            Shape::Circle(c) => c.radius,
            Shape::Polygon(_) | Shape::Edge(_) => 0.0,
        }
    }

    /// Radius used in collision detection, i.e. the geometric radius plus the skin.
    #[inline]
    pub fn collision_radius(&self) -> f64 {
        self.radius() + SKIN
    }

    /// Check that the geometry is well-formed.
    /// Shapes constructed through their constructors always are,
    /// but deserialized or hand-edited ones may not be.
    pub fn validate(&self) -> Result<()> {
        match self {
            Shape::Circle(c) => Circle::check(c.center, c.radius),
            Shape::Polygon(p) => Polygon::prepare(&p.vertices).map(|_| ()),
            Shape::Edge(e) => Edge::check(e.vertices[0], e.vertices[1]),
        }
    }

    /// Compute mass, area, centroid and rotational inertia about the centroid
    /// for the given density.
    pub fn compute_mass(&self, density: f64) -> MassData {
        match self {
            Shape::Circle(c) => {
                let area = std::f64::consts::PI * c.radius * c.radius;
                let mass = density * area;
                MassData {
                    mass,
                    area,
                    center: c.center,
                    inertia: mass * 0.5 * c.radius * c.radius,
                }
            }
            Shape::Polygon(p) => p.compute_mass(density),
            Shape::Edge(e) => MassData {
                mass: 0.0,
                area: 0.0,
                center: 0.5 * (e.vertices[0] + e.vertices[1]),
                inertia: 0.0,
            },
        }
    }

    /// Bounding box of the shape (including its skin) in world space.
    pub fn compute_aabb(&self, pose: &Pose) -> AABB {
        match self {
            Shape::Circle(c) => {
                let p = *pose * c.center;
                let r = c.radius + SKIN;
                AABB::new(p - Vec2::new(r, r), p + Vec2::new(r, r))
            }
            Shape::Polygon(p) => {
                AABB::from_points(p.vertices.iter().map(|v| *pose * *v)).padded(SKIN)
            }
            Shape::Edge(e) => {
                AABB::from_segment(*pose * e.vertices[0], *pose * e.vertices[1]).padded(SKIN)
            }
        }
    }

    /// Cast a ray against the shape's geometry (without the skin).
    ///
    /// Rays starting inside a circle or polygon don't report a hit.
    pub fn ray_cast(&self, input: &RayCastInput, pose: &Pose) -> Option<RayCastOutput> {
        match self {
            Shape::Circle(c) => c.ray_cast(input, pose),
            Shape::Polygon(p) => p.ray_cast(input, pose),
            Shape::Edge(e) => e.ray_cast(input, pose),
        }
    }

    /// Check whether a world-space point is inside the shape.
    /// Always false for edges.
    pub fn test_point(&self, pose: &Pose, point: Vec2) -> bool {
        let local = pose.inv_transform_point(point);
        match self {
            Shape::Circle(c) => (local - c.center).mag_sq() <= c.radius * c.radius,
            Shape::Polygon(p) => p
                .vertices
                .iter()
                .zip(&p.normals)
                .all(|(v, n)| n.dot(local - *v) <= 0.0),
            Shape::Edge(_) => false,
        }
    }
}

impl From<Circle> for Shape {
    fn from(c: Circle) -> Self {
        Shape::Circle(c)
    }
}
impl From<Polygon> for Shape {
    fn from(p: Polygon) -> Self {
        Shape::Polygon(p)
    }
}
impl From<Edge> for Shape {
    fn from(e: Edge) -> Self {
        Shape::Edge(e)
    }
}

//
// Circle
//

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Circle {
    center: Vec2,
    radius: f64,
}

impl Circle {
    pub fn new(radius: f64) -> Result<Self> {
        Self::new_offset(Vec2::zero(), radius)
    }

    /// Create a circle whose center is offset from the body origin.
    pub fn new_offset(center: Vec2, radius: f64) -> Result<Self> {
        Self::check(center, radius)?;
        Ok(Self { center, radius })
    }

    fn check(center: Vec2, radius: f64) -> Result<()> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(PhysicsError::InvalidGeometry(format!(
                "circle radius must be positive and finite, got {radius}"
            )));
        }
        if !(center.x.is_finite() && center.y.is_finite()) {
            return Err(PhysicsError::InvalidGeometry(
                "circle center must be finite".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        self.center
    }

    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f64) -> Result<()> {
        Self::check(self.center, radius)?;
        self.radius = radius;
        Ok(())
    }

    pub fn set_center(&mut self, center: Vec2) -> Result<()> {
        Self::check(center, self.radius)?;
        self.center = center;
        Ok(())
    }

    fn ray_cast(&self, input: &RayCastInput, pose: &Pose) -> Option<RayCastOutput> {
        let position = *pose * self.center;
        let s = input.p1 - position;
        let b = s.mag_sq() - self.radius * self.radius;

        // solve the quadratic |s + t * r|^2 = radius^2 for the smaller t
        let r = input.p2 - input.p1;
        let c = s.dot(r);
        let rr = r.mag_sq();
        let sigma = c * c - rr * b;

        if sigma < 0.0 || rr < f64::EPSILON {
            return None;
        }

        let a = -(c + sigma.sqrt());
        if 0.0 <= a && a <= input.max_fraction * rr {
            let fraction = a / rr;
            Some(RayCastOutput {
                fraction,
                normal: (s + fraction * r).normalized(),
            })
        } else {
            None
        }
    }
}

//
// Polygon
//

/// A convex polygon with counterclockwise winding.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Deserialize, serde::Serialize),
    serde(try_from = "Vec<Vec2>", into = "Vec<Vec2>")
)]
pub struct Polygon {
    vertices: Vec<Vec2>,
    /// Outward normal of the edge from vertex i to vertex i + 1.
    normals: Vec<Vec2>,
    centroid: Vec2,
}

impl Polygon {
    /// Create a convex polygon from its vertices.
    ///
    /// Vertices may be given in either winding order;
    /// clockwise input is reversed.
    pub fn new(points: &[Vec2]) -> Result<Self> {
        let vertices = Self::prepare(points)?;
        Ok(Self::from_prepared(vertices))
    }

    /// Create an axis-aligned box from its half-width and half-height.
    pub fn new_box(hw: f64, hh: f64) -> Result<Self> {
        Self::new(&[
            Vec2::new(-hw, -hh),
            Vec2::new(hw, -hh),
            Vec2::new(hw, hh),
            Vec2::new(-hw, hh),
        ])
    }

    /// Create a box from its half-width and half-height,
    /// centered at `center` and rotated by `angle` in the body's local space.
    pub fn new_oriented_box(hw: f64, hh: f64, center: Vec2, angle: m::Angle) -> Result<Self> {
        let pose = Pose::new(center, angle.into());
        Self::new(&[
            pose * Vec2::new(-hw, -hh),
            pose * Vec2::new(hw, -hh),
            pose * Vec2::new(hw, hh),
            pose * Vec2::new(-hw, hh),
        ])
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2] {
        &self.vertices
    }

    #[inline]
    pub fn normals(&self) -> &[Vec2] {
        &self.normals
    }

    #[inline]
    pub fn centroid(&self) -> Vec2 {
        self.centroid
    }

    /// Replace the vertices of the polygon, validating them the same way as [`Polygon::new`].
    /// On error the polygon is left unchanged.
    pub fn set_vertices(&mut self, points: &[Vec2]) -> Result<()> {
        *self = Self::new(points)?;
        Ok(())
    }

    /// Validate the points and return them in counterclockwise order.
    fn prepare(points: &[Vec2]) -> Result<Vec<Vec2>> {
        let count = points.len();
        if count < 3 {
            return Err(PhysicsError::InvalidGeometry(format!(
                "a polygon needs at least 3 vertices, got {count}"
            )));
        }
        if count > MAX_POLYGON_VERTICES {
            return Err(PhysicsError::InvalidGeometry(format!(
                "a polygon can have at most {MAX_POLYGON_VERTICES} vertices, got {count}"
            )));
        }
        if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(PhysicsError::InvalidGeometry(
                "polygon vertices must be finite".into(),
            ));
        }

        let weld_dist_sq = (0.5 * LINEAR_SLOP) * (0.5 * LINEAR_SLOP);
        for (i, p) in points.iter().enumerate() {
            if points[i + 1..]
                .iter()
                .any(|q| (*q - *p).mag_sq() < weld_dist_sq)
            {
                return Err(PhysicsError::InvalidGeometry(
                    "polygon has duplicate vertices".into(),
                ));
            }
        }

        let signed_area: f64 = (0..count)
            .map(|i| m::cross(points[i], points[(i + 1) % count]))
            .sum::<f64>()
            * 0.5;
        let mut vertices = points.to_vec();
        if signed_area < 0.0 {
            vertices.reverse();
        }

        // every vertex must be strictly on the inner side of every edge,
        // which rejects collinear points, reflex corners and self-intersections
        for i in 0..count {
            let v1 = vertices[i];
            let edge = vertices[(i + 1) % count] - v1;
            let edge_len = edge.mag();
            for (j, v) in vertices.iter().enumerate() {
                if j == i || j == (i + 1) % count {
                    continue;
                }
                let dist_inside = m::cross(edge, *v - v1) / edge_len;
                if dist_inside <= 0.5 * LINEAR_SLOP {
                    return Err(PhysicsError::InvalidGeometry(
                        "polygon is not strictly convex".into(),
                    ));
                }
            }
        }

        Ok(vertices)
    }

    fn from_prepared(vertices: Vec<Vec2>) -> Self {
        let count = vertices.len();
        let normals = (0..count)
            .map(|i| m::right_normal(vertices[(i + 1) % count] - vertices[i]).normalized())
            .collect();
        let centroid = Self::compute_centroid(&vertices);
        Self {
            vertices,
            normals,
            centroid,
        }
    }

    fn compute_centroid(vertices: &[Vec2]) -> Vec2 {
        let origin = vertices[0];
        let mut center = Vec2::zero();
        let mut area = 0.0;
        for i in 1..vertices.len() - 1 {
            let e1 = vertices[i] - origin;
            let e2 = vertices[i + 1] - origin;
            let tri_area = 0.5 * m::cross(e1, e2);
            center += tri_area / 3.0 * (e1 + e2);
            area += tri_area;
        }
        origin + center / area
    }

    fn compute_mass(&self, density: f64) -> MassData {
        // sum over a triangle fan around the first vertex,
        // which keeps the numbers small and avoids precision loss far from the origin
        let origin = self.vertices[0];
        let count = self.vertices.len();
        let mut center = Vec2::zero();
        let mut area = 0.0;
        let mut second_moment = 0.0;
        for i in 0..count {
            let e1 = self.vertices[i] - origin;
            let e2 = self.vertices[(i + 1) % count] - origin;
            let d = m::cross(e1, e2);
            let tri_area = 0.5 * d;
            area += tri_area;
            center += tri_area / 3.0 * (e1 + e2);

            let int_x2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
            let int_y2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
            second_moment += (0.25 / 3.0 * d) * (int_x2 + int_y2);
        }

        let mass = density * area;
        let center_rel = center / area;
        // second_moment is about `origin`, shift it to the centroid
        let inertia = density * second_moment - mass * center_rel.mag_sq();
        MassData {
            mass,
            area,
            center: origin + center_rel,
            inertia: inertia.max(0.0),
        }
    }

    fn ray_cast(&self, input: &RayCastInput, pose: &Pose) -> Option<RayCastOutput> {
        let p1 = pose.inv_transform_point(input.p1);
        let p2 = pose.inv_transform_point(input.p2);
        let d = p2 - p1;

        let mut lower = 0.0;
        let mut upper = input.max_fraction;
        let mut hit_edge = None;

        for (i, (v, n)) in self.vertices.iter().zip(&self.normals).enumerate() {
            // p = p1 + t * d
            // dot(normal, p - v) = 0
            // dot(normal, p1 - v) + t * dot(normal, d) = 0
            let numerator = n.dot(*v - p1);
            let denominator = n.dot(d);

            if denominator == 0.0 {
                if numerator < 0.0 {
                    return None;
                }
            } else if denominator < 0.0 && numerator < lower * denominator {
                // entering this half-space
                lower = numerator / denominator;
                hit_edge = Some(i);
            } else if denominator > 0.0 && numerator < upper * denominator {
                // exiting this half-space
                upper = numerator / denominator;
            }

            if upper < lower {
                return None;
            }
        }

        hit_edge.map(|i| RayCastOutput {
            fraction: lower,
            normal: pose.rotation * self.normals[i],
        })
    }
}

impl TryFrom<Vec<Vec2>> for Polygon {
    type Error = PhysicsError;

    fn try_from(points: Vec<Vec2>) -> Result<Self> {
        Self::new(&points)
    }
}

impl From<Polygon> for Vec<Vec2> {
    fn from(p: Polygon) -> Self {
        p.vertices
    }
}

//
// Edge
//

/// A line segment, collidable from both sides.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Deserialize, serde::Serialize),
    serde(try_from = "[Vec2; 2]", into = "[Vec2; 2]")
)]
pub struct Edge {
    vertices: [Vec2; 2],
    /// Normals of the two sides, pointing right of `v1 -> v2` and right of `v2 -> v1`.
    normals: [Vec2; 2],
}

impl Edge {
    pub fn new(v1: Vec2, v2: Vec2) -> Result<Self> {
        Self::check(v1, v2)?;
        let n = m::right_normal(v2 - v1).normalized();
        Ok(Self {
            vertices: [v1, v2],
            normals: [n, -n],
        })
    }

    fn check(v1: Vec2, v2: Vec2) -> Result<()> {
        if !(v1.x.is_finite() && v1.y.is_finite() && v2.x.is_finite() && v2.y.is_finite()) {
            return Err(PhysicsError::InvalidGeometry(
                "edge vertices must be finite".into(),
            ));
        }
        if (v2 - v1).mag() < 0.5 * LINEAR_SLOP {
            return Err(PhysicsError::InvalidGeometry(
                "edge endpoints are too close together".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn vertices(&self) -> &[Vec2; 2] {
        &self.vertices
    }

    #[inline]
    pub fn normals(&self) -> &[Vec2; 2] {
        &self.normals
    }

    pub fn set_vertices(&mut self, v1: Vec2, v2: Vec2) -> Result<()> {
        *self = Self::new(v1, v2)?;
        Ok(())
    }

    fn ray_cast(&self, input: &RayCastInput, pose: &Pose) -> Option<RayCastOutput> {
        let p1 = pose.inv_transform_point(input.p1);
        let p2 = pose.inv_transform_point(input.p2);
        let d = p2 - p1;

        let [v1, v2] = self.vertices;
        let normal = self.normals[0];

        // q = p1 + t * d
        // dot(normal, q - v1) = 0
        let numerator = normal.dot(v1 - p1);
        let denominator = normal.dot(d);
        if denominator == 0.0 {
            return None;
        }

        let t = numerator / denominator;
        if t < 0.0 || input.max_fraction < t {
            return None;
        }

        let q = p1 + t * d;
        let r = v2 - v1;
        let s = (q - v1).dot(r) / r.mag_sq();
        if !(0.0..=1.0).contains(&s) {
            return None;
        }

        let normal = if numerator > 0.0 { -normal } else { normal };
        Some(RayCastOutput {
            fraction: t,
            normal: pose.rotation * normal,
        })
    }
}

impl TryFrom<[Vec2; 2]> for Edge {
    type Error = PhysicsError;

    fn try_from(v: [Vec2; 2]) -> Result<Self> {
        Self::new(v[0], v[1])
    }
}

impl From<Edge> for [Vec2; 2] {
    fn from(e: Edge) -> Self {
        e.vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Angle, Rot};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn unit_square() -> Polygon {
        Polygon::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ])
        .expect("valid square")
    }

    #[test]
    fn unit_square_mass() {
        let md = Shape::Polygon(unit_square()).compute_mass(1.0);
        assert!(close(md.mass, 1.0));
        assert!(close(md.area, 1.0));
        assert!(close(md.center.x, 0.5) && close(md.center.y, 0.5));
        // (w^2 + h^2) / 12 for a rectangle about its center
        assert!(close(md.inertia, 1.0 / 6.0));
    }

    #[test]
    fn convex_polygons_have_positive_mass() {
        let shapes = [
            Polygon::new_box(0.5, 2.0).unwrap(),
            Polygon::new_oriented_box(1.0, 0.25, Vec2::new(3.0, -2.0), Angle::Deg(30.0)).unwrap(),
            Polygon::new(&[
                Vec2::new(0.0, 0.0),
                Vec2::new(2.0, 0.5),
                Vec2::new(1.0, 2.0),
            ])
            .unwrap(),
            Polygon::new(
                &(0..8)
                    .map(|i| {
                        let a = i as f64 * std::f64::consts::TAU / 8.0;
                        Vec2::new(a.cos(), a.sin())
                    })
                    .collect::<Vec<_>>(),
            )
            .unwrap(),
        ];
        for p in shapes {
            let md = Shape::Polygon(p.clone()).compute_mass(2.0);
            assert!(md.area > 0.0);
            assert!(md.mass > 0.0);
            assert!(md.inertia >= 0.0);
            assert!((md.center - p.centroid()).mag() < 1e-9);
        }
    }

    #[test]
    fn circle_and_edge_mass() {
        let c = Shape::Circle(Circle::new_offset(Vec2::new(1.0, 2.0), 0.5).unwrap());
        let md = c.compute_mass(1.0);
        assert!(close(md.mass, std::f64::consts::PI * 0.25));
        assert!(close(md.inertia, md.mass * 0.125));
        assert_eq!(md.center, Vec2::new(1.0, 2.0));

        let e = Shape::edge(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0)).unwrap();
        let md = e.compute_mass(1.0);
        assert_eq!(md.mass, 0.0);
        assert_eq!(md.center, Vec2::zero());
    }

    #[test]
    fn invalid_polygons_are_rejected() {
        let too_few = Polygon::new(&[Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)]);
        assert!(matches!(too_few, Err(PhysicsError::InvalidGeometry(_))));

        let concave = Polygon::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(1.0, 0.5),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ]);
        assert!(matches!(concave, Err(PhysicsError::InvalidGeometry(_))));

        let duplicate = Polygon::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
        ]);
        assert!(duplicate.is_err());

        let collinear = Polygon::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(1.0, 1.0),
        ]);
        assert!(collinear.is_err());

        let pentagram = Polygon::new(
            &(0..5)
                .map(|i| {
                    let a = (i * 2) as f64 * std::f64::consts::TAU / 5.0;
                    Vec2::new(a.cos(), a.sin())
                })
                .collect::<Vec<_>>(),
        );
        assert!(pentagram.is_err());

        assert!(Circle::new(0.0).is_err());
        assert!(Circle::new(f64::NAN).is_err());
        assert!(Edge::new(Vec2::zero(), Vec2::zero()).is_err());
    }

    #[test]
    fn clockwise_input_is_reversed() {
        let p = Polygon::new(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
        ])
        .unwrap();
        let verts = p.vertices();
        let n = verts.len();
        for i in 0..n {
            let e1 = verts[(i + 1) % n] - verts[i];
            let e2 = verts[(i + 2) % n] - verts[(i + 1) % n];
            assert!(m::cross(e1, e2) > 0.0);
        }
        // normals point outward
        for (v, normal) in verts.iter().zip(p.normals()) {
            assert!(normal.dot(*v - p.centroid()) > 0.0);
        }
    }

    #[test]
    fn polygon_mutator_validates() {
        let mut p = unit_square();
        assert!(p.set_vertices(&[Vec2::zero(), Vec2::unit_x()]).is_err());
        assert_eq!(p, unit_square());
        p.set_vertices(&[Vec2::zero(), Vec2::new(2.0, 0.0), Vec2::new(0.0, 2.0)])
            .unwrap();
        assert_eq!(p.vertices().len(), 3);
    }

    #[test]
    fn aabbs_include_skin() {
        let pose = Pose::new(Vec2::new(1.0, 1.0), Rot::new(std::f64::consts::FRAC_PI_4));
        let square = Shape::rect(2.0, 2.0).unwrap();
        let aabb = square.compute_aabb(&pose);
        let half_diag = 2.0_f64.sqrt();
        assert!(close(aabb.max.x, 1.0 + half_diag + SKIN));
        assert!(close(aabb.min.y, 1.0 - half_diag - SKIN));

        let circle = Shape::circle(0.5).unwrap();
        let aabb = circle.compute_aabb(&pose);
        assert!(close(aabb.width(), 1.0 + 2.0 * SKIN));
    }

    #[test]
    fn point_tests() {
        let pose = Pose::new(Vec2::new(5.0, 0.0), Rot::new(0.3));
        let square = Shape::rect(2.0, 2.0).unwrap();
        assert!(square.test_point(&pose, Vec2::new(5.5, 0.5)));
        assert!(!square.test_point(&pose, Vec2::new(7.0, 0.0)));
        let circle = Shape::circle(1.0).unwrap();
        assert!(circle.test_point(&pose, Vec2::new(5.0, 0.9)));
        assert!(!circle.test_point(&pose, Vec2::new(5.0, 1.1)));
        let edge = Shape::edge(Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0)).unwrap();
        assert!(!edge.test_point(&pose, Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn ray_casts() {
        let pose = Pose::new(Vec2::new(0.0, 0.0), Rot::identity());
        let ray = RayCastInput::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0));

        let circle = Shape::circle(1.0).unwrap();
        let hit = circle.ray_cast(&ray, &pose).expect("circle hit");
        assert!(close(hit.fraction, 0.4));
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).mag() < 1e-9);

        let square = Shape::rect(2.0, 2.0).unwrap();
        let hit = square.ray_cast(&ray, &pose).expect("square hit");
        assert!(close(hit.fraction, 0.4));
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).mag() < 1e-9);

        let edge = Shape::edge(Vec2::new(0.0, -1.0), Vec2::new(0.0, 1.0)).unwrap();
        let hit = edge.ray_cast(&ray, &pose).expect("edge hit");
        assert!(close(hit.fraction, 0.5));
        assert!((hit.normal - Vec2::new(-1.0, 0.0)).mag() < 1e-9);

        // from inside, no hit
        let inside = RayCastInput::new(Vec2::zero(), Vec2::new(5.0, 0.0));
        assert!(circle.ray_cast(&inside, &pose).is_none());
        assert!(square.ray_cast(&inside, &pose).is_none());

        // too short
        let short = RayCastInput {
            max_fraction: 0.3,
            ..ray
        };
        assert!(circle.ray_cast(&short, &pose).is_none());
        assert!(square.ray_cast(&short, &pose).is_none());
        assert!(edge.ray_cast(&short, &pose).is_none());
    }
}
