//! Sequential impulse solver for a single island.

use super::{
    collision::{ManifoldKind, WorldManifold},
    contact::{ContactEvent, ContactImpulse},
    island::Island,
    BodyType, ContactKey, ContactManager, EntitySet, JointSet, Velocity, WorldParams, LINEAR_SLOP,
    MAX_MANIFOLD_POINTS,
};
use crate::math::{self as m, Pose, Rot, Vec2};

use itertools::izip;

/// Timing of the current step.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TimeStep {
    pub dt: f64,
    pub inv_dt: f64,
    /// `dt` relative to the previous step's, used to scale warm starting impulses.
    pub dt_ratio: f64,
}

/// Position of a body's center of mass and its angle.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Position {
    pub c: Vec2,
    pub a: f64,
}

impl Position {
    /// Pose of the body origin given its local center of mass.
    #[inline]
    fn pose(&self, local_center: Vec2) -> Pose {
        let rotation = Rot::new(self.a);
        Pose::new(self.c - rotation * local_center, rotation)
    }
}

/// View into the working buffers of one island solve.
#[derive(Debug)]
pub(crate) struct DataView<'a> {
    pub step: &'a TimeStep,
    pub params: &'a WorldParams,
    pub positions: &'a mut [Position],
    pub velocities: &'a mut [Velocity],
}

//
// Contact constraints
//

#[derive(Clone, Copy, Debug, Default)]
struct ConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f64,
    tangent_impulse: f64,
    normal_mass: f64,
    tangent_mass: f64,
    velocity_bias: f64,
    /// Manifold point in the local space of the non-reference shape.
    local_point: Vec2,
}

#[derive(Clone, Copy, Debug)]
struct ContactConstraint {
    contact: ContactKey,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f64,
    inv_mass_b: f64,
    inv_i_a: f64,
    inv_i_b: f64,
    local_center_a: Vec2,
    local_center_b: Vec2,
    radius_a: f64,
    radius_b: f64,
    friction: f64,
    restitution: f64,
    normal: Vec2,
    kind: ManifoldKind,
    local_normal: Vec2,
    local_point: Vec2,
    points: [ConstraintPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

impl ContactConstraint {
    #[inline]
    fn points(&self) -> &[ConstraintPoint] {
        &self.points[..self.point_count]
    }

    #[inline]
    fn points_mut(&mut self) -> &mut [ConstraintPoint] {
        &mut self.points[..self.point_count]
    }

    /// Relative velocity of the bodies at a contact point.
    #[inline]
    fn relative_velocity(&self, velocities: &[Velocity], point: &ConstraintPoint) -> Vec2 {
        velocities[self.index_b].point_velocity(point.r_b)
            - velocities[self.index_a].point_velocity(point.r_a)
    }

    #[inline]
    fn apply_impulse(&self, velocities: &mut [Velocity], point: &ConstraintPoint, p: Vec2) {
        let v_a = &mut velocities[self.index_a];
        v_a.linear -= self.inv_mass_a * p;
        v_a.angular -= self.inv_i_a * m::cross(point.r_a, p);
        let v_b = &mut velocities[self.index_b];
        v_b.linear += self.inv_mass_b * p;
        v_b.angular += self.inv_i_b * m::cross(point.r_b, p);
    }
}

/// Gather contact constraints for the island's touching contacts,
/// carrying over last step's impulses for warm starting.
fn build_contact_constraints(
    island: &Island,
    entities: &EntitySet,
    contacts: &ContactManager,
    params: &WorldParams,
    step: &TimeStep,
) -> Vec<ContactConstraint> {
    let warm_start_scale = if params.warm_starting {
        params.warm_start_factor * step.dt_ratio
    } else {
        0.0
    };

    let mut constraints = Vec::with_capacity(island.contacts.len());
    for &key in &island.contacts {
        let Some(contact) = contacts.contacts.get(key.0) else {
            continue;
        };
        let (Some(fixture_a), Some(fixture_b), Some(body_a), Some(body_b)) = (
            entities.get_fixture(contact.fixture_a),
            entities.get_fixture(contact.fixture_b),
            entities.get_body(contact.body_a),
            entities.get_body(contact.body_b),
        ) else {
            continue;
        };
        let manifold = &contact.manifold;
        if manifold.is_empty() {
            continue;
        }

        let mut points = [ConstraintPoint::default(); MAX_MANIFOLD_POINTS];
        for (cp, mp) in points.iter_mut().zip(manifold.points()) {
            cp.normal_impulse = warm_start_scale * mp.normal_impulse;
            cp.tangent_impulse = warm_start_scale * mp.tangent_impulse;
            cp.local_point = mp.local_point;
        }

        constraints.push(ContactConstraint {
            contact: key,
            index_a: body_a.island_index,
            index_b: body_b.island_index,
            inv_mass_a: body_a.mass.inv(),
            inv_mass_b: body_b.mass.inv(),
            inv_i_a: body_a.moment_of_inertia.inv(),
            inv_i_b: body_b.moment_of_inertia.inv(),
            local_center_a: body_a.local_center,
            local_center_b: body_b.local_center,
            radius_a: fixture_a.shape.collision_radius(),
            radius_b: fixture_b.shape.collision_radius(),
            friction: contact.friction,
            restitution: contact.restitution,
            normal: Vec2::zero(),
            kind: manifold.kind,
            local_normal: manifold.local_normal,
            local_point: manifold.local_point,
            points,
            point_count: manifold.point_count(),
        });
    }
    constraints
}

/// Compute world space contact geometry, effective masses and restitution targets.
fn init_contact_velocities(
    constraints: &mut [ContactConstraint],
    contacts: &ContactManager,
    data: &DataView<'_>,
) {
    for cc in constraints {
        let Some(contact) = contacts.contacts.get(cc.contact.0) else {
            continue;
        };
        let pos_a = data.positions[cc.index_a];
        let pos_b = data.positions[cc.index_b];
        let world_manifold = WorldManifold::new(
            &contact.manifold,
            &pos_a.pose(cc.local_center_a),
            cc.radius_a,
            &pos_b.pose(cc.local_center_b),
            cc.radius_b,
        );
        cc.normal = world_manifold.normal;
        let tangent = m::right_normal(cc.normal);

        let (m_a, m_b, i_a, i_b) = (cc.inv_mass_a, cc.inv_mass_b, cc.inv_i_a, cc.inv_i_b);
        let (normal, restitution) = (cc.normal, cc.restitution);
        let threshold = data.params.restitution_threshold;
        let (v_a, v_b) = (data.velocities[cc.index_a], data.velocities[cc.index_b]);

        for (cp, &point) in cc.points_mut().iter_mut().zip(world_manifold.points()) {
            cp.r_a = point - pos_a.c;
            cp.r_b = point - pos_b.c;

            let rn_a = m::cross(cp.r_a, normal);
            let rn_b = m::cross(cp.r_b, normal);
            let k_normal = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;
            cp.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

            let rt_a = m::cross(cp.r_a, tangent);
            let rt_b = m::cross(cp.r_b, tangent);
            let k_tangent = m_a + m_b + i_a * rt_a * rt_a + i_b * rt_b * rt_b;
            cp.tangent_mass = if k_tangent > 0.0 {
                1.0 / k_tangent
            } else {
                0.0
            };

            let v_rel = normal.dot(v_b.point_velocity(cp.r_b) - v_a.point_velocity(cp.r_a));
            cp.velocity_bias = if v_rel < -threshold {
                -restitution * v_rel
            } else {
                0.0
            };
        }
    }
}

fn warm_start_contacts(constraints: &[ContactConstraint], velocities: &mut [Velocity]) {
    for cc in constraints {
        let tangent = m::right_normal(cc.normal);
        for cp in cc.points() {
            let p = cp.normal_impulse * cc.normal + cp.tangent_impulse * tangent;
            cc.apply_impulse(velocities, cp, p);
        }
    }
}

fn solve_contact_velocities(constraints: &mut [ContactConstraint], velocities: &mut [Velocity]) {
    for cc in constraints {
        let normal = cc.normal;
        let tangent = m::right_normal(normal);

        // friction first so that non-penetration wins when they disagree
        for i in 0..cc.point_count {
            let cp = cc.points[i];
            let v_t = cc.relative_velocity(velocities, &cp).dot(tangent);
            let lambda = -cp.tangent_mass * v_t;
            let max_friction = cc.friction * cp.normal_impulse;
            let new_impulse = (cp.tangent_impulse + lambda).clamp(-max_friction, max_friction);
            let lambda = new_impulse - cp.tangent_impulse;
            cc.points[i].tangent_impulse = new_impulse;
            cc.apply_impulse(velocities, &cp, lambda * tangent);
        }

        for i in 0..cc.point_count {
            let cp = cc.points[i];
            let v_n = cc.relative_velocity(velocities, &cp).dot(normal);
            let lambda = -cp.normal_mass * (v_n - cp.velocity_bias);
            let new_impulse = (cp.normal_impulse + lambda).max(0.0);
            let lambda = new_impulse - cp.normal_impulse;
            cc.points[i].normal_impulse = new_impulse;
            cc.apply_impulse(velocities, &cp, lambda * normal);
        }
    }
}

/// Push bodies apart along contact normals.
/// Returns the largest penetration found, as a negative separation.
fn solve_contact_positions(
    constraints: &[ContactConstraint],
    positions: &mut [Position],
    params: &WorldParams,
) -> f64 {
    let mut min_separation: f64 = 0.0;

    for cc in constraints {
        let (m_a, m_b, i_a, i_b) = (cc.inv_mass_a, cc.inv_mass_b, cc.inv_i_a, cc.inv_i_b);

        for cp in cc.points() {
            let pose_a = positions[cc.index_a].pose(cc.local_center_a);
            let pose_b = positions[cc.index_b].pose(cc.local_center_b);

            let (normal, point, separation) = match cc.kind {
                ManifoldKind::Circles => {
                    let point_a = pose_a * cc.local_point;
                    let point_b = pose_b * cp.local_point;
                    let (normal, _) = m::normalize_or_zero(point_b - point_a);
                    let normal = if normal == Vec2::zero() {
                        Vec2::unit_x()
                    } else {
                        normal
                    };
                    let separation = (point_b - point_a).dot(normal) - cc.radius_a - cc.radius_b;
                    (normal, 0.5 * (point_a + point_b), separation)
                }
                ManifoldKind::FaceA => {
                    let normal = pose_a.rotation * cc.local_normal;
                    let plane_point = pose_a * cc.local_point;
                    let clip_point = pose_b * cp.local_point;
                    let separation =
                        (clip_point - plane_point).dot(normal) - cc.radius_a - cc.radius_b;
                    (normal, clip_point, separation)
                }
                ManifoldKind::FaceB => {
                    let normal = pose_b.rotation * cc.local_normal;
                    let plane_point = pose_b * cc.local_point;
                    let clip_point = pose_a * cp.local_point;
                    let separation =
                        (clip_point - plane_point).dot(normal) - cc.radius_a - cc.radius_b;
                    // always point from A to B
                    (-normal, clip_point, separation)
                }
            };

            let r_a = point - positions[cc.index_a].c;
            let r_b = point - positions[cc.index_b].c;
            min_separation = min_separation.min(separation);

            // leave the slop in so that contacts persist between steps
            let c = (params.baumgarte * (separation + LINEAR_SLOP))
                .clamp(-params.max_linear_correction, 0.0);

            let rn_a = m::cross(r_a, normal);
            let rn_b = m::cross(r_b, normal);
            let k = m_a + m_b + i_a * rn_a * rn_a + i_b * rn_b * rn_b;
            let impulse = if k > 0.0 { -c / k } else { 0.0 };
            let p = impulse * normal;

            let pos_a = &mut positions[cc.index_a];
            pos_a.c -= m_a * p;
            pos_a.a -= i_a * m::cross(r_a, p);
            let pos_b = &mut positions[cc.index_b];
            pos_b.c += m_b * p;
            pos_b.a += i_b * m::cross(r_b, p);
        }
    }

    min_separation
}

//
// Island solve
//

/// Advance every body in an island by one step:
/// integrate forces, solve joints and contacts, integrate positions,
/// correct penetration and finally put the island to sleep if it's been resting.
///
/// Impulses are stored back into contact manifolds for warm starting.
/// If `post_solve_events` is given, a post-solve event with the impulses
/// is recorded for every solved contact.
pub(crate) fn solve_island(
    island: &Island,
    entities: &mut EntitySet,
    contacts: &mut ContactManager,
    joints: &mut JointSet,
    params: &WorldParams,
    step: &TimeStep,
    post_solve_events: Option<&mut Vec<ContactEvent>>,
) {
    let _span = tracy_span!("solve island", "solve_island");
    let h = step.dt;

    //
    // integrate velocities
    //

    let mut positions = Vec::with_capacity(island.bodies.len());
    let mut velocities = Vec::with_capacity(island.bodies.len());
    for &key in &island.bodies {
        let Some(body) = entities.get_body_mut(key) else {
            // keep indices aligned even if something went missing
            positions.push(Position::default());
            velocities.push(Velocity::default());
            continue;
        };
        body.center0 = body.center;
        body.angle0 = body.angle;

        let mut v = body.velocity;
        if body.body_type == BodyType::Dynamic {
            v.linear += h * (body.gravity_scale * params.gravity + body.mass.inv() * body.force);
            v.angular += h * body.moment_of_inertia.inv() * body.torque;
            // Pade approximation of exp(-damping * h), stable for large damping
            v.linear *= 1.0 / (1.0 + h * body.linear_damping);
            v.angular *= 1.0 / (1.0 + h * body.angular_damping);
        }

        positions.push(Position {
            c: body.center,
            a: body.angle,
        });
        velocities.push(v);
    }

    let mut data = DataView {
        step,
        params,
        positions: &mut positions,
        velocities: &mut velocities,
    };

    //
    // initialize constraints
    //

    let mut constraints = build_contact_constraints(island, entities, contacts, params, step);
    init_contact_velocities(&mut constraints, contacts, &data);

    for &key in &island.joints {
        if let Some(joint) = joints.get_mut(key) {
            joint.prepare(entities);
            joint.init_velocity(&mut data);
        }
    }
    if params.warm_starting {
        warm_start_contacts(&constraints, data.velocities);
    }

    //
    // solve velocities
    //

    {
        let _span = tracy_span!("solve velocities", "solve_island");
        for _ in 0..params.velocity_iterations {
            for &key in &island.joints {
                if let Some(joint) = joints.get_mut(key) {
                    joint.solve_velocity(&mut data);
                }
            }
            solve_contact_velocities(&mut constraints, data.velocities);
        }
    }

    for cc in &constraints {
        let Some(contact) = contacts.contacts.get_mut(cc.contact.0) else {
            continue;
        };
        for (mp, cp) in contact.manifold.points_mut().iter_mut().zip(cc.points()) {
            mp.normal_impulse = cp.normal_impulse;
            mp.tangent_impulse = cp.tangent_impulse;
        }
    }

    //
    // integrate positions
    //

    for (pos, vel) in izip!(&mut *data.positions, &mut *data.velocities) {
        let translation = h * vel.linear;
        if translation.mag_sq() > params.max_translation * params.max_translation {
            vel.linear *= params.max_translation / translation.mag();
        }
        let rotation = h * vel.angular;
        if rotation * rotation > params.max_rotation * params.max_rotation {
            vel.angular *= params.max_rotation / rotation.abs();
        }
        pos.c += h * vel.linear;
        pos.a += h * vel.angular;
    }

    //
    // solve positions
    //

    let mut position_solved = false;
    {
        let _span = tracy_span!("solve positions", "solve_island");
        for _ in 0..params.position_iterations {
            let min_separation = solve_contact_positions(&constraints, data.positions, params);
            let contacts_ok = min_separation >= -3.0 * LINEAR_SLOP;

            let mut joints_ok = true;
            for &key in &island.joints {
                if let Some(joint) = joints.get_mut(key) {
                    joints_ok &= joint.solve_position(&mut data);
                }
            }

            if contacts_ok && joints_ok {
                position_solved = true;
                break;
            }
        }
    }

    //
    // write back
    //

    for (&key, pos, vel) in izip!(&island.bodies, &*data.positions, &*data.velocities) {
        let Some(body) = entities.get_body_mut(key) else {
            continue;
        };
        if body.body_type == BodyType::Static {
            continue;
        }
        body.center = pos.c;
        body.angle = pos.a;
        body.velocity = *vel;
        body.synchronize_pose();
    }

    if let Some(events) = post_solve_events {
        for cc in &constraints {
            if let Some(contact) = contacts.contacts.get(cc.contact.0) {
                events.push(ContactEvent::PostSolve(
                    contact.clone(),
                    ContactImpulse::from_manifold(&contact.manifold),
                ));
            }
        }
    }

    //
    // sleep
    //

    if !params.allow_sleep {
        return;
    }
    let lin_tol_sq = params.linear_sleep_tolerance * params.linear_sleep_tolerance;
    let ang_tol_sq = params.angular_sleep_tolerance * params.angular_sleep_tolerance;
    let mut min_sleep_time = f64::MAX;
    for &key in &island.bodies {
        let Some(body) = entities.get_body_mut(key) else {
            continue;
        };
        if body.body_type == BodyType::Static {
            continue;
        }
        if !body.allow_sleep
            || body.velocity.angular * body.velocity.angular > ang_tol_sq
            || body.velocity.linear.mag_sq() > lin_tol_sq
        {
            body.sleep_time = 0.0;
            min_sleep_time = 0.0;
        } else {
            body.sleep_time += h;
            min_sleep_time = min_sleep_time.min(body.sleep_time);
        }
    }

    if min_sleep_time >= params.time_to_sleep && position_solved {
        log::debug!("island of {} bodies fell asleep", island.bodies.len());
        for &key in &island.bodies {
            if let Some(body) = entities.get_body_mut(key) {
                body.set_awake(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{collision::Shape, BodyDef, FixtureDef, PhysicsWorld};

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(WorldParams::default()).unwrap()
    }

    #[test]
    fn free_fall_matches_symplectic_euler() {
        let mut world = world();
        let body = world
            .create_body(&BodyDef::new_dynamic().with_position(Vec2::new(0.0, 10.0)))
            .unwrap();
        world
            .create_fixture(
                body,
                &FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(1.0),
            )
            .unwrap();

        let dt = 1.0 / 60.0;
        for _ in 0..10 {
            world.step(dt);
        }
        let b = world.get_body(body).unwrap();
        // v_n = n * g * dt, y_n = y_0 + g * dt^2 * n(n+1)/2
        assert!((b.velocity().linear.y + 10.0 * 10.0 * dt).abs() < 1e-9);
        let expected_y = 10.0 - 10.0 * dt * dt * 55.0;
        assert!((b.position().y - expected_y).abs() < 1e-9);
    }

    #[test]
    fn damping_and_gravity_scale() {
        let mut world = world();
        let floaty = world
            .create_body(
                &BodyDef::new_dynamic()
                    .with_gravity_scale(0.0)
                    .with_damping(1.0, 1.0)
                    .with_velocity(Velocity {
                        linear: Vec2::new(1.0, 0.0),
                        angular: 1.0,
                    }),
            )
            .unwrap();
        world
            .create_fixture(
                floaty,
                &FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(1.0),
            )
            .unwrap();

        world.step(0.1);
        let v = world.get_body(floaty).unwrap().velocity();
        assert!((v.linear.x - 1.0 / 1.1).abs() < 1e-12);
        assert_eq!(v.linear.y, 0.0);
        assert!((v.angular - 1.0 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn translation_is_capped_per_step() {
        let mut world = world();
        let fast = world
            .create_body(
                &BodyDef::new_dynamic()
                    .with_gravity_scale(0.0)
                    .with_velocity(Velocity {
                        linear: Vec2::new(1000.0, 0.0),
                        angular: 0.0,
                    }),
            )
            .unwrap();
        world.step(0.1);
        let b = world.get_body(fast).unwrap();
        assert!((b.position().x - world.params().max_translation).abs() < 1e-9);
        assert!((b.velocity().linear.x - world.params().max_translation / 0.1).abs() < 1e-9);
    }

    #[test]
    fn kinematic_bodies_ignore_gravity() {
        let mut world = world();
        let platform = world
            .create_body(&BodyDef::new_kinematic().with_velocity(Velocity {
                linear: Vec2::new(0.0, 1.0),
                angular: 0.0,
            }))
            .unwrap();
        world.step(0.5);
        let b = world.get_body(platform).unwrap();
        assert_eq!(b.velocity().linear, Vec2::new(0.0, 1.0));
        assert!((b.position().y - 0.5).abs() < 1e-12);
    }
}
