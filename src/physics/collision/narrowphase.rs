//! Exact intersection tests between pairs of shapes, producing contact manifolds.

use super::{
    manifold::{ContactFeatureType, ContactId, Manifold, ManifoldKind, ManifoldPoint},
    Shape,
};
use crate::math::{self as m, Pose, Vec2};
use crate::physics::SKIN;

/// Compute the contact manifold between two shapes.
///
/// The returned manifold is empty if the shapes (including their skins) don't touch.
/// Edges never collide with other edges.
pub fn collide(shape_a: &Shape, pose_a: &Pose, shape_b: &Shape, pose_b: &Pose) -> Manifold {
    use Shape::*;
    match (shape_a, shape_b) {
        (Circle(ca), Circle(cb)) => collide_circles(ca, pose_a, cb, pose_b),
        (Polygon(_) | Edge(_), Circle(cb)) => {
            collide_convex_and_circle(&ConvexView::from_shape(shape_a), pose_a, cb, pose_b)
        }
        (Circle(ca), Polygon(_) | Edge(_)) => {
            collide_convex_and_circle(&ConvexView::from_shape(shape_b), pose_b, ca, pose_a)
                .flipped()
        }
        (Edge(_), Edge(_)) => Manifold::empty(),
        (Polygon(_) | Edge(_), Polygon(_) | Edge(_)) => collide_polygons(
            &ConvexView::from_shape(shape_a),
            pose_a,
            &ConvexView::from_shape(shape_b),
            pose_b,
        ),
    }
}

/// Common view of polygons and edges as convex vertex loops.
/// An edge is a two-vertex polygon with normals on both sides.
struct ConvexView<'a> {
    vertices: &'a [Vec2],
    normals: &'a [Vec2],
    radius: f64,
}

impl<'a> ConvexView<'a> {
    fn from_shape(shape: &'a Shape) -> Self {
        match shape {
            Shape::Polygon(p) => Self {
                vertices: p.vertices(),
                normals: p.normals(),
                radius: shape.collision_radius(),
            },
            Shape::Edge(e) => Self {
                vertices: e.vertices(),
                normals: e.normals(),
                radius: shape.collision_radius(),
            },
            // circles are handled separately in `collide`,
            // treat them as a degenerate point loop if they ever get here
            Shape::Circle(_) => Self {
                vertices: &[],
                normals: &[],
                radius: shape.collision_radius(),
            },
        }
    }

    #[inline]
    fn count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    fn next(&self, i: usize) -> usize {
        if i + 1 < self.count() {
            i + 1
        } else {
            0
        }
    }
}

//
// Circles
//

fn collide_circles(
    circle_a: &super::Circle,
    pose_a: &Pose,
    circle_b: &super::Circle,
    pose_b: &Pose,
) -> Manifold {
    let p_a = *pose_a * circle_a.center();
    let p_b = *pose_b * circle_b.center();
    let dist_sq = (p_b - p_a).mag_sq();
    let radius = circle_a.radius() + circle_b.radius() + 2.0 * SKIN;
    if dist_sq >= radius * radius {
        return Manifold::empty();
    }

    let mut manifold = Manifold::new(ManifoldKind::Circles, Vec2::zero(), circle_a.center());
    manifold.push(ManifoldPoint {
        local_point: circle_b.center(),
        ..Default::default()
    });
    manifold
}

fn collide_convex_and_circle(
    poly_a: &ConvexView<'_>,
    pose_a: &Pose,
    circle_b: &super::Circle,
    pose_b: &Pose,
) -> Manifold {
    // circle center in the polygon's frame
    let c = pose_a.inv_transform_point(*pose_b * circle_b.center());
    let radius = poly_a.radius + circle_b.radius() + SKIN;

    // find the edge with the largest separation
    let mut normal_index = 0;
    let mut separation = f64::MIN;
    for (i, (v, n)) in poly_a.vertices.iter().zip(poly_a.normals).enumerate() {
        let s = n.dot(c - *v);
        if s > radius {
            return Manifold::empty();
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }
    if poly_a.count() == 0 {
        return Manifold::empty();
    }

    let v1 = poly_a.vertices[normal_index];
    let v2 = poly_a.vertices[poly_a.next(normal_index)];
    let point = ManifoldPoint {
        local_point: circle_b.center(),
        ..Default::default()
    };

    // center inside the polygon. An edge has no inside: its two normals are opposite,
    // so a center on its line past an endpoint would land here too
    if poly_a.count() >= 3 && separation < f64::EPSILON {
        let mut manifold = Manifold::new(
            ManifoldKind::FaceA,
            poly_a.normals[normal_index],
            0.5 * (v1 + v2),
        );
        manifold.push(point);
        return manifold;
    }

    // otherwise find which Voronoi region of the edge the center is in
    let u1 = (c - v1).dot(v2 - v1);
    let u2 = (c - v2).dot(v1 - v2);
    let face_normal = poly_a.normals[normal_index];
    let vertex_normal = |offset: Vec2| {
        let (n, len) = m::normalize_or_zero(offset);
        if len > 0.0 {
            n
        } else {
            face_normal
        }
    };
    let (local_normal, local_point) = if u1 <= 0.0 {
        if (c - v1).mag_sq() > radius * radius {
            return Manifold::empty();
        }
        (vertex_normal(c - v1), v1)
    } else if u2 <= 0.0 {
        if (c - v2).mag_sq() > radius * radius {
            return Manifold::empty();
        }
        (vertex_normal(c - v2), v2)
    } else {
        let face_center = 0.5 * (v1 + v2);
        if (c - face_center).dot(face_normal) > radius {
            return Manifold::empty();
        }
        (face_normal, face_center)
    };

    let mut manifold = Manifold::new(ManifoldKind::FaceA, local_normal, local_point);
    manifold.push(point);
    manifold
}

//
// Polygons
//

/// Find the edge normal of `poly1` with the largest separation from `poly2`.
fn find_max_separation(
    poly1: &ConvexView<'_>,
    pose1: &Pose,
    poly2: &ConvexView<'_>,
    pose2: &Pose,
) -> (usize, f64) {
    // work in poly2's frame
    let rel = pose2.inv_mul(pose1);

    let mut best_index = 0;
    let mut max_separation = f64::MIN;
    for (i, (v1, n1)) in poly1.vertices.iter().zip(poly1.normals).enumerate() {
        let n = rel.rotation * *n1;
        let v1 = rel * *v1;

        let si = poly2
            .vertices
            .iter()
            .map(|v2| n.dot(*v2 - v1))
            .fold(f64::MAX, f64::min);

        if si > max_separation {
            max_separation = si;
            best_index = i;
        }
    }
    (best_index, max_separation)
}

#[derive(Clone, Copy, Debug)]
struct ClipVertex {
    v: Vec2,
    id: ContactId,
}

/// Find the edge of `poly2` most anti-parallel to the reference edge of `poly1`,
/// returned in world space.
fn find_incident_edge(
    poly1: &ConvexView<'_>,
    pose1: &Pose,
    edge1: usize,
    poly2: &ConvexView<'_>,
    pose2: &Pose,
) -> [ClipVertex; 2] {
    let normal1 = pose2
        .rotation
        .inv_rotate(pose1.rotation * poly1.normals[edge1]);

    let mut index = 0;
    let mut min_dot = f64::MAX;
    for (i, n2) in poly2.normals.iter().enumerate() {
        let dot = normal1.dot(*n2);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let i1 = index;
    let i2 = poly2.next(i1);
    let clip_vertex = |i: usize| ClipVertex {
        v: *pose2 * poly2.vertices[i],
        id: ContactId {
            index_a: edge1 as u8,
            index_b: i as u8,
            type_a: ContactFeatureType::Face,
            type_b: ContactFeatureType::Vertex,
        },
    };
    [clip_vertex(i1), clip_vertex(i2)]
}

/// Sutherland-Hodgman clipping of a segment against the half-plane
/// `dot(normal, x) <= offset`.
fn clip_segment_to_line(
    v_in: &[ClipVertex; 2],
    normal: Vec2,
    offset: f64,
    vertex_index_a: usize,
) -> Option<[ClipVertex; 2]> {
    let d0 = normal.dot(v_in[0].v) - offset;
    let d1 = normal.dot(v_in[1].v) - offset;

    let mut out = *v_in;
    let mut count = 0;
    if d0 <= 0.0 {
        out[count] = v_in[0];
        count += 1;
    }
    if d1 <= 0.0 {
        out[count] = v_in[1];
        count += 1;
    }

    // the points are on different sides of the plane
    if d0 * d1 < 0.0 {
        let interp = d0 / (d0 - d1);
        out[count] = ClipVertex {
            v: v_in[0].v + interp * (v_in[1].v - v_in[0].v),
            // vertex A is hitting edge B
            id: ContactId {
                index_a: vertex_index_a as u8,
                index_b: v_in[0].id.index_b,
                type_a: ContactFeatureType::Vertex,
                type_b: ContactFeatureType::Face,
            },
        };
        count += 1;
    }

    (count == 2).then_some(out)
}

/// Separating axis test followed by clipping.
///
/// The reference face is chosen from the shape with the larger separation.
/// Exact ties pick A's face.
fn collide_polygons(
    poly_a: &ConvexView<'_>,
    pose_a: &Pose,
    poly_b: &ConvexView<'_>,
    pose_b: &Pose,
) -> Manifold {
    let total_radius = poly_a.radius + poly_b.radius;

    let (edge_a, separation_a) = find_max_separation(poly_a, pose_a, poly_b, pose_b);
    if separation_a > total_radius {
        return Manifold::empty();
    }
    let (edge_b, separation_b) = find_max_separation(poly_b, pose_b, poly_a, pose_a);
    if separation_b > total_radius {
        return Manifold::empty();
    }

    let (poly1, pose1, poly2, pose2, edge1, kind, flip) =
        if separation_b > separation_a {
            (poly_b, pose_b, poly_a, pose_a, edge_b, ManifoldKind::FaceB, true)
        } else {
            (poly_a, pose_a, poly_b, pose_b, edge_a, ManifoldKind::FaceA, false)
        };

    let incident_edge = find_incident_edge(poly1, pose1, edge1, poly2, pose2);

    let iv1 = edge1;
    let iv2 = poly1.next(edge1);
    let local_v11 = poly1.vertices[iv1];
    let local_v12 = poly1.vertices[iv2];

    let local_tangent = (local_v12 - local_v11).normalized();
    let local_normal = m::right_normal(local_tangent);
    let plane_point = 0.5 * (local_v11 + local_v12);

    let tangent = pose1.rotation * local_tangent;
    let normal = m::right_normal(tangent);

    let v11 = *pose1 * local_v11;
    let v12 = *pose1 * local_v12;

    // face offset
    let front_offset = normal.dot(v11);
    // side offsets, extended by the skin
    let side_offset1 = -tangent.dot(v11) + total_radius;
    let side_offset2 = tangent.dot(v12) + total_radius;

    // clip the incident edge against the sides of the reference face
    let Some(clip_points1) = clip_segment_to_line(&incident_edge, -tangent, side_offset1, iv1)
    else {
        return Manifold::empty();
    };
    let Some(clip_points2) = clip_segment_to_line(&clip_points1, tangent, side_offset2, iv2)
    else {
        return Manifold::empty();
    };

    let mut manifold = Manifold::new(kind, local_normal, plane_point);
    for cp in &clip_points2 {
        let separation = normal.dot(cp.v) - front_offset;
        if separation <= total_radius {
            manifold.push(ManifoldPoint {
                local_point: pose2.inv_transform_point(cp.v),
                id: if flip { cp.id.flipped() } else { cp.id },
                ..Default::default()
            });
        }
    }
    manifold
}
