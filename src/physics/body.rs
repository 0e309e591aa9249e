use super::{collision::MassData, ContactKey, FixtureKey, JointKey, PhysicsError, Result, Velocity};
use crate::math::{self as m, Pose, Rot, Vec2};

/// How a body responds to forces and collisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub enum BodyType {
    /// Never moves. Has infinite mass.
    #[default]
    Static,
    /// Moves according to its velocity but isn't affected by forces or collisions.
    /// Has infinite mass.
    Kinematic,
    /// Fully simulated. Mass is computed from the densities of its fixtures.
    Dynamic,
}

/// Everything needed to create a [`Body`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Deserialize, serde::Serialize),
    serde(default)
)]
pub struct BodyDef {
    pub body_type: BodyType,
    /// World position of the body's origin.
    pub position: Vec2,
    /// World angle of the body in radians.
    pub angle: f64,
    /// Velocity of the body's origin.
    pub velocity: Velocity,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub gravity_scale: f64,
    pub allow_sleep: bool,
    pub awake: bool,
    /// Prevent the body from rotating, e.g. for characters.
    pub fixed_rotation: bool,
    pub user_data: u64,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::zero(),
            angle: 0.0,
            velocity: Velocity::default(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            allow_sleep: true,
            awake: true,
            fixed_rotation: false,
            user_data: 0,
        }
    }
}

impl BodyDef {
    pub fn new(body_type: BodyType) -> Self {
        Self {
            body_type,
            ..Self::default()
        }
    }

    #[inline]
    pub fn new_static() -> Self {
        Self::new(BodyType::Static)
    }

    #[inline]
    pub fn new_kinematic() -> Self {
        Self::new(BodyType::Kinematic)
    }

    #[inline]
    pub fn new_dynamic() -> Self {
        Self::new(BodyType::Dynamic)
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_angle(mut self, angle: m::Angle) -> Self {
        self.angle = angle.rad();
        self
    }

    pub fn with_velocity(mut self, velocity: Velocity) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_gravity_scale(mut self, scale: f64) -> Self {
        self.gravity_scale = scale;
        self
    }

    pub fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    pub fn with_awake(mut self, awake: bool) -> Self {
        self.awake = awake;
        self
    }

    pub fn with_fixed_rotation(mut self, fixed_rotation: bool) -> Self {
        self.fixed_rotation = fixed_rotation;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.position.x,
            self.position.y,
            self.angle,
            self.velocity.linear.x,
            self.velocity.linear.y,
            self.velocity.angular,
            self.gravity_scale,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidConfiguration(
                "body position, angle, velocity and gravity scale must be finite".into(),
            ));
        }
        super::error::check_range("linear_damping", self.linear_damping, 0.0, f64::MAX)?;
        super::error::check_range("angular_damping", self.angular_damping, 0.0, f64::MAX)?;
        Ok(())
    }
}

/// A rigid body. Shapes are attached to it with fixtures.
///
/// The body's position is tracked at its center of mass,
/// and its origin pose (what fixtures are positioned relative to) is derived from that.
#[derive(Clone, Debug)]
pub struct Body {
    pub(crate) body_type: BodyType,
    /// Pose of the body origin.
    pub(crate) pose: Pose,
    pub(crate) local_center: Vec2,
    /// World center of mass.
    pub(crate) center: Vec2,
    pub(crate) angle: f64,
    // center and angle at the start of the step, for swept AABBs
    pub(crate) center0: Vec2,
    pub(crate) angle0: f64,
    pub(crate) velocity: Velocity,
    pub(crate) force: Vec2,
    pub(crate) torque: f64,
    pub(crate) mass: Mass,
    /// Rotational inertia about the center of mass.
    pub(crate) moment_of_inertia: Mass,
    pub linear_damping: f64,
    pub angular_damping: f64,
    pub gravity_scale: f64,
    pub(crate) fixtures: Vec<FixtureKey>,
    pub(crate) contacts: Vec<ContactKey>,
    pub(crate) joints: Vec<JointKey>,
    pub(crate) awake: bool,
    pub(crate) allow_sleep: bool,
    pub(crate) fixed_rotation: bool,
    pub(crate) sleep_time: f64,
    pub(crate) island_flag: bool,
    /// Position of the body in the island currently being solved.
    pub(crate) island_index: usize,
    pub user_data: u64,
}

impl Body {
    pub(crate) fn new(def: &BodyDef) -> Self {
        let pose = Pose::new(def.position, Rot::new(def.angle));
        let (mass, velocity) = match def.body_type {
            // dynamic bodies get a unit mass until fixtures say otherwise
            BodyType::Dynamic => (Mass::from(1.0), def.velocity),
            BodyType::Kinematic => (Mass::Infinite, def.velocity),
            BodyType::Static => (Mass::Infinite, Velocity::default()),
        };
        Self {
            body_type: def.body_type,
            pose,
            local_center: Vec2::zero(),
            center: def.position,
            angle: def.angle,
            center0: def.position,
            angle0: def.angle,
            velocity,
            force: Vec2::zero(),
            torque: 0.0,
            mass,
            moment_of_inertia: Mass::Infinite,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            fixtures: Vec::new(),
            contacts: Vec::new(),
            joints: Vec::new(),
            awake: def.awake || !def.allow_sleep,
            allow_sleep: def.allow_sleep,
            fixed_rotation: def.fixed_rotation,
            sleep_time: 0.0,
            island_flag: false,
            island_index: 0,
            user_data: def.user_data,
        }
    }

    #[inline]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Pose of the body origin in world space.
    #[inline]
    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// World position of the body origin.
    #[inline]
    pub fn position(&self) -> Vec2 {
        self.pose.translation
    }

    /// Angle of the body in radians.
    #[inline]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    #[inline]
    pub fn world_center(&self) -> Vec2 {
        self.center
    }

    /// Center of mass relative to the body origin.
    #[inline]
    pub fn local_center(&self) -> Vec2 {
        self.local_center
    }

    #[inline]
    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// Set the velocity of the center of mass. Has no effect on static bodies.
    pub fn set_velocity(&mut self, velocity: Velocity) {
        if self.body_type == BodyType::Static {
            return;
        }
        if velocity.linear.mag_sq() > 0.0 || velocity.angular != 0.0 {
            self.set_awake(true);
        }
        self.velocity = velocity;
    }

    #[inline]
    pub fn mass(&self) -> Mass {
        self.mass
    }

    /// Rotational inertia about the center of mass.
    #[inline]
    pub fn moment_of_inertia(&self) -> Mass {
        self.moment_of_inertia
    }

    #[inline]
    pub fn fixtures(&self) -> &[FixtureKey] {
        &self.fixtures
    }

    #[inline]
    pub fn joints(&self) -> &[JointKey] {
        &self.joints
    }

    #[inline]
    pub fn contacts(&self) -> &[ContactKey] {
        &self.contacts
    }

    #[inline]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Wake the body up or put it to sleep.
    /// Sleeping bodies have their velocity and forces cleared.
    pub fn set_awake(&mut self, awake: bool) {
        if self.body_type == BodyType::Static {
            return;
        }
        if awake {
            self.awake = true;
            self.sleep_time = 0.0;
        } else {
            self.awake = false;
            self.sleep_time = 0.0;
            self.velocity = Velocity::default();
            self.force = Vec2::zero();
            self.torque = 0.0;
        }
    }

    #[inline]
    pub fn allows_sleep(&self) -> bool {
        self.allow_sleep
    }

    pub fn set_allow_sleep(&mut self, allow_sleep: bool) {
        self.allow_sleep = allow_sleep;
        if !allow_sleep {
            self.set_awake(true);
        }
    }

    #[inline]
    pub fn is_fixed_rotation(&self) -> bool {
        self.fixed_rotation
    }

    /// Seconds this body has been resting.
    #[inline]
    pub fn sleep_time(&self) -> f64 {
        self.sleep_time
    }

    //
    // Forces
    //

    /// Apply a force at a world point. Only affects dynamic bodies.
    pub fn apply_force(&mut self, force: Vec2, point: Vec2, wake: bool) {
        if !self.prepare_for_force(wake) {
            return;
        }
        self.force += force;
        self.torque += m::cross(point - self.center, force);
    }

    pub fn apply_force_to_center(&mut self, force: Vec2, wake: bool) {
        if !self.prepare_for_force(wake) {
            return;
        }
        self.force += force;
    }

    pub fn apply_torque(&mut self, torque: f64, wake: bool) {
        if !self.prepare_for_force(wake) {
            return;
        }
        self.torque += torque;
    }

    /// Apply an impulse at a world point, immediately changing the velocity.
    pub fn apply_linear_impulse(&mut self, impulse: Vec2, point: Vec2, wake: bool) {
        if !self.prepare_for_force(wake) {
            return;
        }
        self.velocity.linear += self.mass.inv() * impulse;
        self.velocity.angular +=
            self.moment_of_inertia.inv() * m::cross(point - self.center, impulse);
    }

    pub fn apply_angular_impulse(&mut self, impulse: f64, wake: bool) {
        if !self.prepare_for_force(wake) {
            return;
        }
        self.velocity.angular += self.moment_of_inertia.inv() * impulse;
    }

    fn prepare_for_force(&mut self, wake: bool) -> bool {
        if self.body_type != BodyType::Dynamic {
            return false;
        }
        if wake && !self.awake {
            self.set_awake(true);
        }
        // forces on sleeping bodies are dropped
        self.awake
    }

    //
    // Coordinate helpers
    //

    #[inline]
    pub fn world_point(&self, local_point: Vec2) -> Vec2 {
        self.pose * local_point
    }

    #[inline]
    pub fn world_vector(&self, local_vector: Vec2) -> Vec2 {
        self.pose.rotation * local_vector
    }

    #[inline]
    pub fn local_point(&self, world_point: Vec2) -> Vec2 {
        self.pose.inv_transform_point(world_point)
    }

    #[inline]
    pub fn local_vector(&self, world_vector: Vec2) -> Vec2 {
        self.pose.rotation.inv_rotate(world_vector)
    }

    /// Velocity of a point on the body given in world space.
    #[inline]
    pub fn velocity_at_world_point(&self, point: Vec2) -> Vec2 {
        self.velocity.point_velocity(point - self.center)
    }

    //
    // Internals
    //

    /// Pose of the body origin at the start of the last step.
    pub(crate) fn pose0(&self) -> Pose {
        let rotation = Rot::new(self.angle0);
        Pose::new(self.center0 - rotation * self.local_center, rotation)
    }

    /// Recompute the origin pose from the center of mass and angle.
    pub(crate) fn synchronize_pose(&mut self) {
        self.pose.rotation = Rot::new(self.angle);
        self.pose.translation = self.center - self.pose.rotation * self.local_center;
    }

    /// Move the body origin, keeping the center of mass attached to it.
    pub(crate) fn set_origin(&mut self, position: Vec2, angle: f64) {
        self.pose = Pose::new(position, Rot::new(angle));
        self.center = self.pose * self.local_center;
        self.angle = angle;
        self.center0 = self.center;
        self.angle0 = angle;
    }

    /// Recompute mass, center of mass and inertia from the mass data of the fixtures.
    pub(crate) fn reset_mass(&mut self, fixture_masses: &[MassData]) {
        self.local_center = Vec2::zero();

        if self.body_type != BodyType::Dynamic {
            self.mass = Mass::Infinite;
            self.moment_of_inertia = Mass::Infinite;
            self.center = self.pose.translation;
            self.center0 = self.center;
            self.angle0 = self.angle;
            return;
        }

        let mut mass = 0.0;
        let mut local_center = Vec2::zero();
        // inertia about the body origin
        let mut inertia = 0.0;
        for md in fixture_masses {
            mass += md.mass;
            local_center += md.mass * md.center;
            inertia += md.inertia + md.mass * md.center.mag_sq();
        }

        if mass > 0.0 {
            local_center /= mass;
        } else {
            // bodies always need some mass to be simulated
            mass = 1.0;
        }
        self.mass = Mass::from(mass);

        if inertia > 0.0 && !self.fixed_rotation {
            // shift to the center of mass
            inertia -= mass * local_center.mag_sq();
            self.moment_of_inertia = if inertia > 0.0 {
                Mass::from(inertia)
            } else {
                Mass::Infinite
            };
        } else {
            self.moment_of_inertia = Mass::Infinite;
        }

        // keep the origin in place, moving the center of mass
        let old_center = self.center;
        self.local_center = local_center;
        self.center = self.pose * local_center;
        self.center0 = self.center;
        self.velocity.linear += m::cross_sv(self.velocity.angular, self.center - old_center);
    }
}

/// Mass or moment of inertia of a body, which can be infinite.
///
/// This stores both a mass value and its inverse, because calculating inverse mass
/// is expensive and needed a lot in physics calculations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mass {
    Finite { mass: f64, inverse: f64 },
    Infinite,
}

impl From<f64> for Mass {
    #[inline]
    fn from(mass: f64) -> Self {
        Mass::Finite {
            mass,
            inverse: 1.0 / mass,
        }
    }
}

impl Mass {
    /// Get the inverse of the mass, which is zero if the mass is infinite.
    #[inline]
    pub fn inv(&self) -> f64 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }

    /// Get the mass as a number, which is infinity if the mass is infinite.
    #[inline]
    pub fn value(&self) -> f64 {
        match self {
            Mass::Finite { mass, .. } => *mass,
            Mass::Infinite => f64::INFINITY,
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        matches!(self, Mass::Finite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision::Shape;

    fn dynamic_at(position: Vec2) -> Body {
        Body::new(&BodyDef::new_dynamic().with_position(position))
    }

    #[test]
    fn mass_from_fixtures() {
        let mut body = dynamic_at(Vec2::new(1.0, 2.0));
        // unit mass before any fixtures
        assert_eq!(body.mass().value(), 1.0);
        assert!(!body.moment_of_inertia().is_finite());

        let square = Shape::rect(2.0, 2.0).unwrap().compute_mass(0.5);
        body.reset_mass(&[square]);
        assert!((body.mass().value() - 2.0).abs() < 1e-12);
        // box inertia m(w^2 + h^2) / 12
        assert!((body.moment_of_inertia().value() - 2.0 * 8.0 / 12.0).abs() < 1e-12);
        assert!((body.world_center() - Vec2::new(1.0, 2.0)).mag() < 1e-12);
    }

    #[test]
    fn off_center_fixture_moves_center_of_mass() {
        let mut body = dynamic_at(Vec2::zero());
        let mut md = Shape::circle(1.0).unwrap().compute_mass(1.0);
        md.center = Vec2::new(2.0, 0.0);
        body.reset_mass(&[md]);

        assert!((body.local_center() - Vec2::new(2.0, 0.0)).mag() < 1e-12);
        assert!((body.world_center() - Vec2::new(2.0, 0.0)).mag() < 1e-12);
        assert_eq!(body.position(), Vec2::zero());
        // parallel axis shift cancels out
        assert!((body.moment_of_inertia().value() - md.inertia).abs() < 1e-9);
    }

    #[test]
    fn fixed_rotation_and_static_bodies() {
        let mut body = Body::new(&BodyDef::new_dynamic().with_fixed_rotation(true));
        body.reset_mass(&[Shape::circle(1.0).unwrap().compute_mass(1.0)]);
        assert!(body.mass().is_finite());
        assert_eq!(body.moment_of_inertia().inv(), 0.0);

        let mut ground = Body::new(&BodyDef::new_static());
        ground.reset_mass(&[Shape::circle(1.0).unwrap().compute_mass(1.0)]);
        assert_eq!(ground.mass().inv(), 0.0);
        ground.set_velocity(Velocity {
            linear: Vec2::new(1.0, 0.0),
            angular: 0.0,
        });
        assert_eq!(ground.velocity(), Velocity::default());
    }

    #[test]
    fn forces_only_affect_awake_dynamic_bodies() {
        let mut body = dynamic_at(Vec2::zero());
        body.set_awake(false);
        body.apply_force_to_center(Vec2::new(1.0, 0.0), false);
        assert_eq!(body.force, Vec2::zero());
        assert!(!body.is_awake());

        body.apply_linear_impulse(Vec2::new(2.0, 0.0), body.world_center(), true);
        assert!(body.is_awake());
        assert!((body.velocity().linear - Vec2::new(2.0, 0.0)).mag() < 1e-12);

        let mut kinematic = Body::new(&BodyDef::new_kinematic());
        kinematic.apply_force_to_center(Vec2::new(1.0, 0.0), true);
        assert_eq!(kinematic.force, Vec2::zero());
    }

    #[test]
    fn sleeping_clears_motion() {
        let mut body = dynamic_at(Vec2::zero());
        body.set_velocity(Velocity {
            linear: Vec2::new(0.0, 3.0),
            angular: 1.0,
        });
        body.set_awake(false);
        assert_eq!(body.velocity(), Velocity::default());
        body.set_allow_sleep(false);
        assert!(body.is_awake());
    }

    #[test]
    fn invalid_defs_are_rejected() {
        assert!(BodyDef::new_dynamic().validate().is_ok());
        assert!(BodyDef::new_dynamic()
            .with_position(Vec2::new(f64::NAN, 0.0))
            .validate()
            .is_err());
        assert!(matches!(
            BodyDef::new_dynamic().with_damping(-1.0, 0.0).validate(),
            Err(PhysicsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn origin_and_center_stay_consistent() {
        let mut body = dynamic_at(Vec2::zero());
        let mut md = Shape::circle(0.5).unwrap().compute_mass(1.0);
        md.center = Vec2::new(1.0, 0.0);
        body.reset_mass(&[md]);

        body.set_origin(Vec2::new(3.0, 0.0), std::f64::consts::FRAC_PI_2);
        assert!((body.world_center() - Vec2::new(3.0, 1.0)).mag() < 1e-12);

        body.angle = 0.0;
        body.synchronize_pose();
        assert!((body.position() - Vec2::new(2.0, 1.0)).mag() < 1e-12);
        assert!((body.pose0().translation - Vec2::new(3.0, 0.0)).mag() < 1e-12);
    }
}
