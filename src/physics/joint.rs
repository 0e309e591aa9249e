//! Joints constrain the relative motion of two bodies.

use super::{
    error::check_range, solver::DataView, BodyKey, EntitySet, PhysicsError, Result, ANGULAR_SLOP,
    LINEAR_SLOP, MAX_ANGULAR_CORRECTION,
};
use crate::math::{self as m, Mat2, Rot, Vec2};

use thunderdome as td;

/// Key type to look up a joint stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JointKey(pub(super) td::Index);

/// Type-specific parameters of a joint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JointKind {
    /// Keeps the anchor points at a distance from each other,
    /// optionally within limits and softened with a spring.
    Distance {
        /// Rest length of the spring.
        length: f64,
        min_length: f64,
        max_length: f64,
        /// Spring stiffness in N/m. Zero makes the joint rigid at `length`
        /// if the limits are equal, otherwise a rope between the limits.
        stiffness: f64,
        /// Spring damping in N*s/m.
        damping: f64,
    },
    /// Pins the anchor points together, leaving the bodies free to rotate
    /// relative to each other.
    Revolute {
        /// Angle of body B relative to body A at which the joint angle is zero.
        reference_angle: f64,
        enable_limit: bool,
        lower_angle: f64,
        upper_angle: f64,
        enable_motor: bool,
        /// Target relative angular velocity in radians per second.
        motor_speed: f64,
        max_motor_torque: f64,
    },
}

/// Everything needed to create a [`Joint`].
///
/// Use the [`distance`][Self::distance] and [`revolute`][Self::revolute]
/// constructors and the builder methods rather than filling this in by hand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointDef {
    pub body_a: BodyKey,
    pub body_b: BodyKey,
    /// Anchor point relative to body A's origin.
    pub local_anchor_a: Vec2,
    /// Anchor point relative to body B's origin.
    pub local_anchor_b: Vec2,
    /// Whether the connected bodies can collide with each other.
    pub collide_connected: bool,
    pub kind: JointKind,
    pub user_data: u64,
}

impl JointDef {
    /// A rigid distance joint between the origins of two bodies.
    pub fn distance(body_a: BodyKey, body_b: BodyKey, length: f64) -> Self {
        Self::new(
            body_a,
            body_b,
            JointKind::Distance {
                length,
                min_length: length,
                max_length: length,
                stiffness: 0.0,
                damping: 0.0,
            },
        )
    }

    /// A revolute joint pinning the origins of two bodies together.
    pub fn revolute(body_a: BodyKey, body_b: BodyKey) -> Self {
        Self::new(
            body_a,
            body_b,
            JointKind::Revolute {
                reference_angle: 0.0,
                enable_limit: false,
                lower_angle: 0.0,
                upper_angle: 0.0,
                enable_motor: false,
                motor_speed: 0.0,
                max_motor_torque: 0.0,
            },
        )
    }

    fn new(body_a: BodyKey, body_b: BodyKey, kind: JointKind) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::zero(),
            local_anchor_b: Vec2::zero(),
            collide_connected: false,
            kind,
            user_data: 0,
        }
    }

    /// Set the anchor points relative to each body's origin.
    pub fn with_anchors(mut self, local_anchor_a: Vec2, local_anchor_b: Vec2) -> Self {
        self.local_anchor_a = local_anchor_a;
        self.local_anchor_b = local_anchor_b;
        self
    }

    /// Set the anchor points from world positions using the bodies' current poses.
    ///
    /// For distance joints the length is set to the current distance between the anchors.
    /// Revolute joints use only `anchor_a`, pinning both bodies at that point,
    /// and take their current relative angle as the reference angle.
    pub fn with_world_anchors(mut self, entities: &EntitySet, anchor_a: Vec2, anchor_b: Vec2) -> Result<Self> {
        let body_a = entities
            .get_body(self.body_a)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        let body_b = entities
            .get_body(self.body_b)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;

        self.local_anchor_a = body_a.local_point(anchor_a);
        match &mut self.kind {
            JointKind::Distance {
                length,
                min_length,
                max_length,
                ..
            } => {
                self.local_anchor_b = body_b.local_point(anchor_b);
                *length = (anchor_b - anchor_a).mag().max(LINEAR_SLOP);
                *min_length = *length;
                *max_length = *length;
            }
            JointKind::Revolute { reference_angle, .. } => {
                self.local_anchor_b = body_b.local_point(anchor_a);
                *reference_angle = body_b.angle() - body_a.angle();
            }
        }
        Ok(self)
    }

    /// Let a distance joint move freely between two lengths.
    /// Has no effect on other joint types.
    pub fn with_length_limits(mut self, min: f64, max: f64) -> Self {
        if let JointKind::Distance {
            min_length,
            max_length,
            ..
        } = &mut self.kind
        {
            *min_length = min;
            *max_length = max;
        }
        self
    }

    /// Soften a distance joint into a spring.
    /// Has no effect on other joint types.
    pub fn with_spring(mut self, spring_stiffness: f64, spring_damping: f64) -> Self {
        if let JointKind::Distance {
            stiffness, damping, ..
        } = &mut self.kind
        {
            *stiffness = spring_stiffness;
            *damping = spring_damping;
        }
        self
    }

    /// Limit the relative angle of a revolute joint.
    /// Has no effect on other joint types.
    pub fn with_angle_limits(mut self, lower: f64, upper: f64) -> Self {
        if let JointKind::Revolute {
            enable_limit,
            lower_angle,
            upper_angle,
            ..
        } = &mut self.kind
        {
            *enable_limit = true;
            *lower_angle = lower;
            *upper_angle = upper;
        }
        self
    }

    /// Drive a revolute joint towards a relative angular velocity.
    /// Has no effect on other joint types.
    pub fn with_motor(mut self, speed: f64, max_torque: f64) -> Self {
        if let JointKind::Revolute {
            enable_motor,
            motor_speed,
            max_motor_torque,
            ..
        } = &mut self.kind
        {
            *enable_motor = true;
            *motor_speed = speed;
            *max_motor_torque = max_torque;
        }
        self
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.body_a == self.body_b {
            return Err(PhysicsError::InvalidConfiguration(
                "a joint must connect two different bodies".into(),
            ));
        }
        let anchors = [
            self.local_anchor_a.x,
            self.local_anchor_a.y,
            self.local_anchor_b.x,
            self.local_anchor_b.y,
        ];
        if anchors.iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidConfiguration(
                "joint anchors must be finite".into(),
            ));
        }
        match self.kind {
            JointKind::Distance {
                length,
                min_length,
                max_length,
                stiffness,
                damping,
            } => {
                check_range("length", length, 0.0, f64::MAX)?;
                check_range("min_length", min_length, 0.0, f64::MAX)?;
                check_range("max_length", max_length, min_length, f64::MAX)?;
                check_range("stiffness", stiffness, 0.0, f64::MAX)?;
                check_range("damping", damping, 0.0, f64::MAX)?;
            }
            JointKind::Revolute {
                reference_angle,
                lower_angle,
                upper_angle,
                motor_speed,
                max_motor_torque,
                ..
            } => {
                check_range("reference_angle", reference_angle, f64::MIN, f64::MAX)?;
                check_range("lower_angle", lower_angle, f64::MIN, f64::MAX)?;
                check_range("upper_angle", upper_angle, lower_angle, f64::MAX)?;
                check_range("motor_speed", motor_speed, f64::MIN, f64::MAX)?;
                check_range("max_motor_torque", max_motor_torque, 0.0, f64::MAX)?;
            }
        }
        Ok(())
    }
}

/// Per-step values computed when the joint's island is set up for solving.
#[derive(Clone, Copy, Debug, Default)]
struct SolverData {
    index_a: usize,
    index_b: usize,
    local_center_a: Vec2,
    local_center_b: Vec2,
    inv_mass_a: f64,
    inv_mass_b: f64,
    inv_i_a: f64,
    inv_i_b: f64,
    r_a: Vec2,
    r_b: Vec2,
    // distance
    u: Vec2,
    current_length: f64,
    mass: f64,
    soft_mass: f64,
    gamma: f64,
    bias: f64,
    // revolute
    axial_mass: f64,
    angle: f64,
}

/// A constraint between two bodies, created from a [`JointDef`].
#[derive(Clone, Debug)]
pub struct Joint {
    pub(crate) body_a: BodyKey,
    pub(crate) body_b: BodyKey,
    pub(crate) local_anchor_a: Vec2,
    pub(crate) local_anchor_b: Vec2,
    pub(crate) collide_connected: bool,
    pub(crate) kind: JointKind,
    pub(crate) island_flag: bool,
    pub user_data: u64,
    // accumulated impulses, carried between steps for warm starting.
    // distance joints only use the x component of the linear impulse
    impulse: Vec2,
    lower_impulse: f64,
    upper_impulse: f64,
    motor_impulse: f64,
    solver: SolverData,
}

impl Joint {
    pub(crate) fn new(def: &JointDef) -> Self {
        let mut kind = def.kind;
        if let JointKind::Distance {
            length,
            min_length,
            max_length,
            ..
        } = &mut kind
        {
            *length = length.max(LINEAR_SLOP);
            *min_length = min_length.max(LINEAR_SLOP);
            *max_length = max_length.max(*min_length);
        }
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            collide_connected: def.collide_connected,
            kind,
            island_flag: false,
            user_data: def.user_data,
            impulse: Vec2::zero(),
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            motor_impulse: 0.0,
            solver: SolverData::default(),
        }
    }

    #[inline]
    pub fn body_a(&self) -> BodyKey {
        self.body_a
    }

    #[inline]
    pub fn body_b(&self) -> BodyKey {
        self.body_b
    }

    /// The body on the other end of the joint from the given one.
    #[inline]
    pub fn other_body(&self, body: BodyKey) -> BodyKey {
        if body == self.body_a {
            self.body_b
        } else {
            self.body_a
        }
    }

    #[inline]
    pub fn collide_connected(&self) -> bool {
        self.collide_connected
    }

    #[inline]
    pub fn kind(&self) -> &JointKind {
        &self.kind
    }

    /// Change joint parameters such as motor speed or limits in place.
    #[inline]
    pub fn kind_mut(&mut self) -> &mut JointKind {
        &mut self.kind
    }

    /// World position of the anchor on body A.
    pub fn anchor_a(&self, entities: &EntitySet) -> Option<Vec2> {
        entities
            .get_body(self.body_a)
            .map(|b| b.world_point(self.local_anchor_a))
    }

    /// World position of the anchor on body B.
    pub fn anchor_b(&self, entities: &EntitySet) -> Option<Vec2> {
        entities
            .get_body(self.body_b)
            .map(|b| b.world_point(self.local_anchor_b))
    }

    /// Current angle of body B relative to body A, minus the reference angle.
    /// `None` for joints other than revolute.
    pub fn joint_angle(&self, entities: &EntitySet) -> Option<f64> {
        let JointKind::Revolute { reference_angle, .. } = self.kind else {
            return None;
        };
        let a = entities.get_body(self.body_a)?;
        let b = entities.get_body(self.body_b)?;
        Some(b.angle() - a.angle() - reference_angle)
    }

    /// Force applied on body B at the anchor during the last step.
    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        match self.kind {
            JointKind::Distance { .. } => {
                inv_dt * (self.impulse.x + self.lower_impulse - self.upper_impulse) * self.solver.u
            }
            JointKind::Revolute { .. } => inv_dt * self.impulse,
        }
    }

    /// Torque applied on body B during the last step.
    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        match self.kind {
            JointKind::Distance { .. } => 0.0,
            JointKind::Revolute { .. } => {
                inv_dt * (self.motor_impulse + self.lower_impulse - self.upper_impulse)
            }
        }
    }

    //
    // Solver
    //

    /// Cache island indices and mass properties of the connected bodies.
    pub(crate) fn prepare(&mut self, entities: &EntitySet) {
        let (Some(a), Some(b)) = (
            entities.get_body(self.body_a),
            entities.get_body(self.body_b),
        ) else {
            return;
        };
        self.solver.index_a = a.island_index;
        self.solver.index_b = b.island_index;
        self.solver.local_center_a = a.local_center;
        self.solver.local_center_b = b.local_center;
        self.solver.inv_mass_a = a.mass.inv();
        self.solver.inv_mass_b = b.mass.inv();
        self.solver.inv_i_a = a.moment_of_inertia.inv();
        self.solver.inv_i_b = b.moment_of_inertia.inv();
    }

    pub(crate) fn init_velocity(&mut self, data: &mut DataView<'_>) {
        let s = &mut self.solver;
        let (c_a, a_a) = (data.positions[s.index_a].c, data.positions[s.index_a].a);
        let (c_b, a_b) = (data.positions[s.index_b].c, data.positions[s.index_b].a);
        let (q_a, q_b) = (Rot::new(a_a), Rot::new(a_b));
        s.r_a = q_a * (self.local_anchor_a - s.local_center_a);
        s.r_b = q_b * (self.local_anchor_b - s.local_center_b);
        let (m_a, m_b, i_a, i_b) = (s.inv_mass_a, s.inv_mass_b, s.inv_i_a, s.inv_i_b);

        match self.kind {
            JointKind::Distance {
                length,
                min_length,
                max_length,
                stiffness,
                damping,
            } => {
                let (u, current_length) = m::normalize_or_zero(c_b + s.r_b - c_a - s.r_a);
                s.current_length = current_length;
                if current_length > LINEAR_SLOP {
                    s.u = u;
                } else {
                    s.u = Vec2::zero();
                    s.mass = 0.0;
                    self.impulse = Vec2::zero();
                    self.lower_impulse = 0.0;
                    self.upper_impulse = 0.0;
                }

                let cr_au = m::cross(s.r_a, s.u);
                let cr_bu = m::cross(s.r_b, s.u);
                let mut inv_mass = m_a + i_a * cr_au * cr_au + m_b + i_b * cr_bu * cr_bu;
                s.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

                if stiffness > 0.0 && min_length < max_length {
                    let c = current_length - length;
                    let h = data.step.dt;
                    let gamma = h * (damping + h * stiffness);
                    s.gamma = if gamma != 0.0 { 1.0 / gamma } else { 0.0 };
                    s.bias = c * h * stiffness * s.gamma;
                    inv_mass += s.gamma;
                    s.soft_mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };
                } else {
                    s.gamma = 0.0;
                    s.bias = 0.0;
                    s.soft_mass = s.mass;
                }
            }
            JointKind::Revolute {
                reference_angle,
                enable_limit,
                enable_motor,
                ..
            } => {
                s.axial_mass = i_a + i_b;
                let fixed_rotation = s.axial_mass == 0.0;
                if s.axial_mass > 0.0 {
                    s.axial_mass = 1.0 / s.axial_mass;
                }
                if !enable_motor || fixed_rotation {
                    self.motor_impulse = 0.0;
                }
                if !enable_limit || fixed_rotation {
                    self.lower_impulse = 0.0;
                    self.upper_impulse = 0.0;
                }
                s.angle = a_b - a_a - reference_angle;
            }
        }

        if data.params.warm_starting {
            let scale = data.params.warm_start_factor * data.step.dt_ratio;
            self.impulse *= scale;
            self.lower_impulse *= scale;
            self.upper_impulse *= scale;
            self.motor_impulse *= scale;

            let (p, axial) = match self.kind {
                JointKind::Distance { .. } => (
                    (self.impulse.x + self.lower_impulse - self.upper_impulse) * self.solver.u,
                    0.0,
                ),
                JointKind::Revolute { .. } => (
                    self.impulse,
                    self.motor_impulse + self.lower_impulse - self.upper_impulse,
                ),
            };
            self.apply_impulse(data, p, axial);
        } else {
            self.impulse = Vec2::zero();
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
            self.motor_impulse = 0.0;
        }
    }

    /// Apply a linear impulse at the anchors and an angular impulse,
    /// negative on body A and positive on body B.
    fn apply_impulse(&self, data: &mut DataView<'_>, p: Vec2, axial: f64) {
        let s = &self.solver;
        let v_a = &mut data.velocities[s.index_a];
        v_a.linear -= s.inv_mass_a * p;
        v_a.angular -= s.inv_i_a * (m::cross(s.r_a, p) + axial);
        let v_b = &mut data.velocities[s.index_b];
        v_b.linear += s.inv_mass_b * p;
        v_b.angular += s.inv_i_b * (m::cross(s.r_b, p) + axial);
    }

    pub(crate) fn solve_velocity(&mut self, data: &mut DataView<'_>) {
        match self.kind {
            JointKind::Distance {
                min_length,
                max_length,
                stiffness,
                ..
            } => self.solve_distance_velocity(data, min_length, max_length, stiffness),
            JointKind::Revolute {
                enable_limit,
                lower_angle,
                upper_angle,
                enable_motor,
                motor_speed,
                max_motor_torque,
                ..
            } => {
                let s = self.solver;
                let fixed_rotation = s.inv_i_a + s.inv_i_b == 0.0;

                if enable_motor && !fixed_rotation {
                    let c_dot = data.velocities[s.index_b].angular
                        - data.velocities[s.index_a].angular
                        - motor_speed;
                    let impulse = -s.axial_mass * c_dot;
                    let old = self.motor_impulse;
                    let max_impulse = data.step.dt * max_motor_torque;
                    self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
                    let impulse = self.motor_impulse - old;
                    self.apply_impulse(data, Vec2::zero(), impulse);
                }

                if enable_limit && !fixed_rotation {
                    // lower limit
                    {
                        let c = s.angle - lower_angle;
                        let c_dot = data.velocities[s.index_b].angular
                            - data.velocities[s.index_a].angular;
                        let impulse = -s.axial_mass * (c_dot + c.max(0.0) * data.step.inv_dt);
                        let old = self.lower_impulse;
                        self.lower_impulse = (old + impulse).max(0.0);
                        let impulse = self.lower_impulse - old;
                        self.apply_impulse(data, Vec2::zero(), impulse);
                    }
                    // upper limit, note the flipped signs
                    {
                        let c = upper_angle - s.angle;
                        let c_dot = data.velocities[s.index_a].angular
                            - data.velocities[s.index_b].angular;
                        let impulse = -s.axial_mass * (c_dot + c.max(0.0) * data.step.inv_dt);
                        let old = self.upper_impulse;
                        self.upper_impulse = (old + impulse).max(0.0);
                        let impulse = self.upper_impulse - old;
                        self.apply_impulse(data, Vec2::zero(), -impulse);
                    }
                }

                // point to point
                let v_a = data.velocities[s.index_a];
                let v_b = data.velocities[s.index_b];
                let c_dot = v_b.point_velocity(s.r_b) - v_a.point_velocity(s.r_a);
                let k = point_mass_matrix(&s, s.r_a, s.r_b);
                let impulse = m::solve_mat2(&k, -c_dot);
                self.impulse += impulse;
                self.apply_impulse(data, impulse, 0.0);
            }
        }
    }

    fn solve_distance_velocity(
        &mut self,
        data: &mut DataView<'_>,
        min_length: f64,
        max_length: f64,
        stiffness: f64,
    ) {
        let s = self.solver;
        let relative_velocity = |data: &DataView<'_>| {
            let v_a = data.velocities[s.index_a];
            let v_b = data.velocities[s.index_b];
            v_b.point_velocity(s.r_b) - v_a.point_velocity(s.r_a)
        };

        if min_length < max_length {
            if stiffness > 0.0 {
                let c_dot = s.u.dot(relative_velocity(data));
                let impulse = -s.soft_mass * (c_dot + s.bias + s.gamma * self.impulse.x);
                self.impulse.x += impulse;
                self.apply_impulse(data, impulse * s.u, 0.0);
            }

            // lower
            {
                let c = s.current_length - min_length;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = s.u.dot(relative_velocity(data));
                let impulse = -s.mass * (c_dot + bias);
                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                let impulse = self.lower_impulse - old;
                self.apply_impulse(data, impulse * s.u, 0.0);
            }
            // upper
            {
                let c = max_length - s.current_length;
                let bias = c.max(0.0) * data.step.inv_dt;
                let c_dot = -s.u.dot(relative_velocity(data));
                let impulse = -s.mass * (c_dot + bias);
                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                let impulse = self.upper_impulse - old;
                self.apply_impulse(data, -impulse * s.u, 0.0);
            }
        } else {
            // rigid
            let c_dot = s.u.dot(relative_velocity(data));
            let impulse = -s.mass * c_dot;
            self.impulse.x += impulse;
            self.apply_impulse(data, impulse * s.u, 0.0);
        }
    }

    /// Correct position drift. Returns true if the error is within tolerance.
    pub(crate) fn solve_position(&mut self, data: &mut DataView<'_>) -> bool {
        let s = self.solver;
        let (m_a, m_b, i_a, i_b) = (s.inv_mass_a, s.inv_mass_b, s.inv_i_a, s.inv_i_b);

        match self.kind {
            JointKind::Distance {
                min_length,
                max_length,
                ..
            } => {
                let pa = data.positions[s.index_a];
                let pb = data.positions[s.index_b];
                let r_a = Rot::new(pa.a) * (self.local_anchor_a - s.local_center_a);
                let r_b = Rot::new(pb.a) * (self.local_anchor_b - s.local_center_b);
                let (u, length) = m::normalize_or_zero(pb.c + r_b - pa.c - r_a);

                let c = if min_length == max_length || length < min_length {
                    length - min_length
                } else if max_length < length {
                    length - max_length
                } else {
                    return true;
                };

                let impulse = -s.mass * c;
                let p = impulse * u;
                let pa = &mut data.positions[s.index_a];
                pa.c -= m_a * p;
                pa.a -= i_a * m::cross(r_a, p);
                let pb = &mut data.positions[s.index_b];
                pb.c += m_b * p;
                pb.a += i_b * m::cross(r_b, p);

                c.abs() < LINEAR_SLOP
            }
            JointKind::Revolute {
                reference_angle,
                enable_limit,
                lower_angle,
                upper_angle,
                ..
            } => {
                let mut angular_error = 0.0;
                let fixed_rotation = i_a + i_b == 0.0;

                if enable_limit && !fixed_rotation {
                    let angle =
                        data.positions[s.index_b].a - data.positions[s.index_a].a - reference_angle;
                    let c = if (upper_angle - lower_angle).abs() < 2.0 * ANGULAR_SLOP {
                        (angle - lower_angle).clamp(-MAX_ANGULAR_CORRECTION, MAX_ANGULAR_CORRECTION)
                    } else if angle <= lower_angle {
                        (angle - lower_angle + ANGULAR_SLOP).clamp(-MAX_ANGULAR_CORRECTION, 0.0)
                    } else if angle >= upper_angle {
                        (angle - upper_angle - ANGULAR_SLOP).clamp(0.0, MAX_ANGULAR_CORRECTION)
                    } else {
                        0.0
                    };
                    let limit_impulse = -s.axial_mass * c;
                    data.positions[s.index_a].a -= i_a * limit_impulse;
                    data.positions[s.index_b].a += i_b * limit_impulse;
                    angular_error = c.abs();
                }

                let pa = data.positions[s.index_a];
                let pb = data.positions[s.index_b];
                let r_a = Rot::new(pa.a) * (self.local_anchor_a - s.local_center_a);
                let r_b = Rot::new(pb.a) * (self.local_anchor_b - s.local_center_b);
                let c = pb.c + r_b - pa.c - r_a;
                let position_error = c.mag();

                let k = point_mass_matrix(&s, r_a, r_b);
                let impulse = -m::solve_mat2(&k, c);

                let pa = &mut data.positions[s.index_a];
                pa.c -= m_a * impulse;
                pa.a -= i_a * m::cross(r_a, impulse);
                let pb = &mut data.positions[s.index_b];
                pb.c += m_b * impulse;
                pb.a += i_b * m::cross(r_b, impulse);

                position_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
            }
        }
    }
}

/// Effective mass matrix of a point to point constraint.
fn point_mass_matrix(s: &SolverData, r_a: Vec2, r_b: Vec2) -> Mat2 {
    let (m_a, m_b, i_a, i_b) = (s.inv_mass_a, s.inv_mass_b, s.inv_i_a, s.inv_i_b);
    let off_diagonal = -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y;
    m::mat2_from_rows(
        [
            m_a + m_b + i_a * r_a.y * r_a.y + i_b * r_b.y * r_b.y,
            off_diagonal,
        ],
        [
            off_diagonal,
            m_a + m_b + i_a * r_a.x * r_a.x + i_b * r_b.x * r_b.x,
        ],
    )
}

//
// Set
//

/// Manager struct holding joints inside of a physics world.
#[derive(Clone, Debug, Default)]
pub struct JointSet {
    pub(super) joints: td::Arena<Joint>,
}

impl JointSet {
    #[inline]
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Access a Joint in the physics world, if it still exists.
    #[inline]
    pub fn get(&self, key: JointKey) -> Option<&Joint> {
        self.joints.get(key.0)
    }

    /// Mutably access a Joint in the physics world, if it still exists.
    #[inline]
    pub fn get_mut(&mut self, key: JointKey) -> Option<&mut Joint> {
        self.joints.get_mut(key.0)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (JointKey, &Joint)> + '_ {
        self.joints.iter().map(|(k, j)| (JointKey(k), j))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    // insertion and removal go through PhysicsWorld to keep body joint lists in sync

    #[inline]
    pub(super) fn insert(&mut self, joint: Joint) -> JointKey {
        JointKey(self.joints.insert(joint))
    }

    #[inline]
    pub(super) fn remove(&mut self, key: JointKey) -> Option<Joint> {
        self.joints.remove(key.0)
    }

    #[inline]
    pub(super) fn clear(&mut self) {
        self.joints.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Body, BodyDef};

    fn two_bodies() -> (EntitySet, BodyKey, BodyKey) {
        let mut entities = EntitySet::new();
        let a = entities.insert_body(Body::new(&BodyDef::new_static()));
        let b = entities.insert_body(Body::new(
            &BodyDef::new_dynamic()
                .with_position(Vec2::new(2.0, 0.0))
                .with_angle(m::Angle::Rad(0.5)),
        ));
        (entities, a, b)
    }

    #[test]
    fn builders_only_touch_their_kind() {
        let (_, a, b) = two_bodies();
        let def = JointDef::distance(a, b, 2.0)
            .with_angle_limits(-1.0, 1.0)
            .with_motor(1.0, 10.0)
            .with_length_limits(1.0, 3.0);
        assert_eq!(
            def.kind,
            JointKind::Distance {
                length: 2.0,
                min_length: 1.0,
                max_length: 3.0,
                stiffness: 0.0,
                damping: 0.0,
            }
        );
        assert!(!def.collide_connected);

        let def = JointDef::revolute(a, b).with_spring(5.0, 1.0);
        assert!(matches!(
            def.kind,
            JointKind::Revolute {
                enable_limit: false,
                enable_motor: false,
                ..
            }
        ));
    }

    #[test]
    fn world_anchors() {
        let (entities, a, b) = two_bodies();
        let def = JointDef::distance(a, b, 1.0)
            .with_world_anchors(&entities, Vec2::new(0.0, 1.0), Vec2::new(2.0, 0.0))
            .unwrap();
        assert_eq!(def.local_anchor_a, Vec2::new(0.0, 1.0));
        assert!(def.local_anchor_b.mag() < 1e-12);
        let JointKind::Distance { length, .. } = def.kind else {
            panic!("wrong kind");
        };
        assert!((length - 5.0f64.sqrt()).abs() < 1e-12);

        let def = JointDef::revolute(a, b)
            .with_world_anchors(&entities, Vec2::new(1.0, 0.0), Vec2::zero())
            .unwrap();
        let joint = Joint::new(&def);
        let (anchor_a, anchor_b) = (
            joint.anchor_a(&entities).unwrap(),
            joint.anchor_b(&entities).unwrap(),
        );
        assert!((anchor_a - Vec2::new(1.0, 0.0)).mag() < 1e-12);
        assert!((anchor_b - Vec2::new(1.0, 0.0)).mag() < 1e-12);
        assert!(joint.joint_angle(&entities).unwrap().abs() < 1e-12);
    }

    #[test]
    fn validation() {
        let (_, a, b) = two_bodies();
        assert!(JointDef::distance(a, b, 1.0).validate().is_ok());
        assert!(JointDef::distance(a, a, 1.0).validate().is_err());
        assert!(JointDef::distance(a, b, 1.0)
            .with_length_limits(2.0, 1.0)
            .validate()
            .is_err());
        assert!(JointDef::distance(a, b, 1.0)
            .with_spring(-1.0, 0.0)
            .validate()
            .is_err());
        assert!(JointDef::revolute(a, b)
            .with_angle_limits(1.0, -1.0)
            .validate()
            .is_err());
        assert!(JointDef::revolute(a, b)
            .with_motor(1.0, -5.0)
            .validate()
            .is_err());
    }

    #[test]
    fn tiny_lengths_are_clamped() {
        let (_, a, b) = two_bodies();
        let joint = Joint::new(&JointDef::distance(a, b, 0.0));
        let JointKind::Distance {
            length,
            min_length,
            max_length,
            ..
        } = *joint.kind()
        else {
            panic!("wrong kind");
        };
        assert_eq!(length, LINEAR_SLOP);
        assert_eq!(min_length, LINEAR_SLOP);
        assert_eq!(max_length, LINEAR_SLOP);
    }
}
