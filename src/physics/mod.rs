//! Rigid body physics: bodies with fixtures, contacts and joints,
//! advanced in time by a [`PhysicsWorld`].

use crate::math::{self as m, Angle, Pose, Vec2};

use std::f64::consts::PI;
use thunderdome as td;

//

pub mod body;
pub use body::{Body, BodyDef, BodyType, Mass};

pub mod collision;
use collision::{BroadPhase, RayCastInput, AABB};

pub mod command;
pub use command::{Command, CommandQueue};

pub mod contact;
use contact::ContactEvent;
pub use contact::{Contact, ContactImpulse, ContactKey, ContactManager};

pub mod entity_set;
pub use entity_set::{BodyKey, EntitySet, FixtureKey};

pub mod error;
pub use error::{PhysicsError, Result};

pub mod fixture;
pub use fixture::{Filter, Fixture, FixtureDef};

pub mod hecs_sync;
pub use hecs_sync::{HecsSyncManager, HecsSyncOptions};

mod island;
use island::Island;

pub mod joint;
pub use joint::{Joint, JointDef, JointKey, JointKind, JointSet};

pub mod listener;
pub use listener::ContactListener;

mod solver;
use solver::TimeStep;


//
// Constants
//

/// Collision and constraint tolerance in meters.
/// Chosen to be numerically significant but visually insignificant.
pub const LINEAR_SLOP: f64 = 0.005;
/// Angular tolerance in radians, 2 degrees.
pub const ANGULAR_SLOP: f64 = 2.0 / 180.0 * PI;
/// Thickness of the collision skin around every shape.
pub const SKIN: f64 = 0.5 * LINEAR_SLOP;
/// Maximum number of vertices in a polygon shape.
pub const MAX_POLYGON_VERTICES: usize = 8;
/// Maximum number of points in a contact manifold.
pub const MAX_MANIFOLD_POINTS: usize = 2;
/// Padding added to broad phase AABBs so that small movements don't cause tree updates.
pub const AABB_MARGIN: f64 = 0.1;
/// How far ahead broad phase AABBs are extended in the direction of motion,
/// as a multiple of the displacement.
pub const AABB_MULTIPLIER: f64 = 4.0;
/// Largest angular position correction applied by joints in one iteration.
pub const MAX_ANGULAR_CORRECTION: f64 = 8.0 / 180.0 * PI;

//

/// Velocity of an object.
///
// Equivalent to a Vec3 but with names for the translational and rotational part.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Deserialize, serde::Serialize))]
pub struct Velocity {
    /// Linear velocity in metres per second.
    pub linear: Vec2,
    /// Angular velocity in radians per second.
    pub angular: f64,
}

impl Default for Velocity {
    fn default() -> Self {
        Velocity {
            linear: Vec2::zero(),
            angular: 0.0,
        }
    }
}

impl Velocity {
    /// Get the linear velocity of a point offset from the center of mass.
    #[inline]
    pub fn point_velocity(&self, offset: Vec2) -> Vec2 {
        let tangent = m::left_normal(offset) * self.angular;
        self.linear + tangent
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            linear: self.linear + other.linear,
            angular: self.angular + other.angular,
        }
    }
}
impl std::ops::AddAssign for Velocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Self::Output {
        Velocity {
            linear: self.linear * rhs,
            angular: self.angular * rhs,
        }
    }
}

//
// Parameters
//

/// Global parameters of a [`PhysicsWorld`].
///
/// The defaults work well for objects sized roughly between 0.1 and 10 meters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Deserialize, serde::Serialize),
    serde(default)
)]
pub struct WorldParams {
    /// Acceleration applied to every dynamic body, scaled by its gravity scale.
    pub gravity: Vec2,
    pub velocity_iterations: usize,
    pub position_iterations: usize,
    /// Whether to start each step from the impulses of the previous one.
    pub warm_starting: bool,
    /// Scale applied to carried-over impulses when warm starting.
    pub warm_start_factor: f64,
    /// Whether resting bodies are allowed to fall asleep.
    pub allow_sleep: bool,
    /// Fraction of overlap resolved per position iteration.
    pub baumgarte: f64,
    pub max_linear_correction: f64,
    /// Relative normal speed below which collisions are treated as inelastic.
    pub restitution_threshold: f64,
    /// How long a body must be at rest before it can sleep, in seconds.
    pub time_to_sleep: f64,
    pub linear_sleep_tolerance: f64,
    pub angular_sleep_tolerance: f64,
    /// Maximum distance a body can move in one step.
    pub max_translation: f64,
    /// Maximum angle a body can rotate in one step.
    pub max_rotation: f64,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, -10.0),
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
            warm_start_factor: 1.0,
            allow_sleep: true,
            baumgarte: 0.2,
            max_linear_correction: 0.2,
            restitution_threshold: 1.0,
            time_to_sleep: 0.5,
            linear_sleep_tolerance: 0.01,
            angular_sleep_tolerance: Angle::Deg(2.0).rad(),
            max_translation: 2.0,
            max_rotation: 0.5 * PI,
        }
    }
}

impl WorldParams {
    pub fn with_gravity(mut self, gravity: Vec2) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_iterations(mut self, velocity: usize, position: usize) -> Self {
        self.velocity_iterations = velocity;
        self.position_iterations = position;
        self
    }

    pub fn with_warm_starting(mut self, enabled: bool) -> Self {
        self.warm_starting = enabled;
        self
    }

    pub fn with_warm_start_factor(mut self, factor: f64) -> Self {
        self.warm_start_factor = factor;
        self
    }

    pub fn with_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    pub fn with_baumgarte(mut self, baumgarte: f64) -> Self {
        self.baumgarte = baumgarte;
        self
    }

    pub fn with_restitution_threshold(mut self, threshold: f64) -> Self {
        self.restitution_threshold = threshold;
        self
    }

    /// Check that every parameter is finite and within its sensible range.
    pub fn validate(&self) -> Result<()> {
        use error::check_range;

        if !(self.gravity.x.is_finite() && self.gravity.y.is_finite()) {
            return Err(PhysicsError::InvalidConfiguration(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        if self.velocity_iterations == 0 {
            return Err(PhysicsError::InvalidConfiguration(
                "velocity_iterations must be at least 1".into(),
            ));
        }
        check_range("warm_start_factor", self.warm_start_factor, 0.0, 1.0)?;
        check_range("baumgarte", self.baumgarte, 0.0, 1.0)?;
        check_range("max_linear_correction", self.max_linear_correction, 0.0, f64::MAX)?;
        check_range("restitution_threshold", self.restitution_threshold, 0.0, f64::MAX)?;
        check_range("time_to_sleep", self.time_to_sleep, 0.0, f64::MAX)?;
        check_range("linear_sleep_tolerance", self.linear_sleep_tolerance, 0.0, f64::MAX)?;
        check_range("angular_sleep_tolerance", self.angular_sleep_tolerance, 0.0, f64::MAX)?;
        check_range("max_translation", self.max_translation, f64::EPSILON, f64::MAX)?;
        check_range("max_rotation", self.max_rotation, f64::EPSILON, f64::MAX)?;
        Ok(())
    }
}

//
// Queries
//

/// A fixture hit by a ray cast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub fixture: FixtureKey,
    pub body: BodyKey,
    /// Point of intersection in world space.
    pub point: Vec2,
    /// Surface normal at the point of intersection.
    pub normal: Vec2,
    /// Position of the hit along the ray, 0 at the start and 1 at the end.
    pub fraction: f64,
}

/// What a ray cast should do after reporting a hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayCastResponse {
    /// Pretend the fixture wasn't there and keep going.
    Ignore,
    /// Stop the ray cast.
    Terminate,
    /// Only look for hits closer than this one from now on.
    Clip,
    /// Keep reporting every hit.
    Continue,
}

//
// World
//

/// The physics world owns bodies, fixtures, joints and contacts
/// and advances them in time with [`step`][Self::step].
pub struct PhysicsWorld {
    params: WorldParams,
    pub(crate) entity_set: EntitySet,
    pub(crate) joint_set: JointSet,
    pub(crate) contacts: ContactManager,
    pub(crate) broad_phase: BroadPhase<FixtureKey>,
    listener: Option<Box<dyn ContactListener>>,
    commands: CommandQueue,
    events: Vec<ContactEvent>,
    island: Island,
    /// Inverse of the previous step's timestep, used to scale warm starting.
    inv_dt0: f64,
    new_fixtures: bool,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::from_valid_params(WorldParams::default())
    }
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("params", &self.params)
            .field("bodies", &self.entity_set.body_count())
            .field("fixtures", &self.entity_set.fixture_count())
            .field("joints", &self.joint_set.len())
            .field("contacts", &self.contacts.len())
            .finish()
    }
}

impl PhysicsWorld {
    /// Create an empty world with the given parameters.
    pub fn new(params: WorldParams) -> Result<Self> {
        params.validate()?;
        Ok(Self::from_valid_params(params))
    }

    fn from_valid_params(params: WorldParams) -> Self {
        Self {
            params,
            entity_set: EntitySet::new(),
            joint_set: JointSet::new(),
            contacts: ContactManager::new(),
            broad_phase: BroadPhase::new(),
            listener: None,
            commands: CommandQueue::new(),
            events: Vec::new(),
            island: Island::default(),
            inv_dt0: 0.0,
            new_fixtures: false,
        }
    }

    #[inline]
    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn set_params(&mut self, params: WorldParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    #[inline]
    pub fn gravity(&self) -> Vec2 {
        self.params.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.params.gravity = gravity;
    }

    /// Set the listener that receives contact callbacks, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl ContactListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Remove the contact listener, returning it if there was one.
    pub fn take_listener(&mut self) -> Option<Box<dyn ContactListener>> {
        self.listener.take()
    }

    /// Queue of changes to apply after the next step.
    #[inline]
    pub fn commands_mut(&mut self) -> &mut CommandQueue {
        &mut self.commands
    }

    /// Read-only access to every body and fixture in the world.
    #[inline]
    pub fn entities(&self) -> &EntitySet {
        &self.entity_set
    }

    //
    // Accessors
    //

    #[inline]
    pub fn get_body(&self, key: BodyKey) -> Option<&Body> {
        self.entity_set.get_body(key)
    }

    /// Mutably access a body.
    /// Its pose and type can only be changed through the world,
    /// see [`set_transform`][Self::set_transform] and [`set_body_type`][Self::set_body_type].
    #[inline]
    pub fn get_body_mut(&mut self, key: BodyKey) -> Option<&mut Body> {
        self.entity_set.get_body_mut(key)
    }

    #[inline]
    pub fn get_fixture(&self, key: FixtureKey) -> Option<&Fixture> {
        self.entity_set.get_fixture(key)
    }

    #[inline]
    pub fn get_fixture_mut(&mut self, key: FixtureKey) -> Option<&mut Fixture> {
        self.entity_set.get_fixture_mut(key)
    }

    #[inline]
    pub fn get_joint(&self, key: JointKey) -> Option<&Joint> {
        self.joint_set.get(key)
    }

    #[inline]
    pub fn get_joint_mut(&mut self, key: JointKey) -> Option<&mut Joint> {
        self.joint_set.get_mut(key)
    }

    #[inline]
    pub fn get_contact(&self, key: ContactKey) -> Option<&Contact> {
        self.contacts.get(key)
    }

    #[inline]
    pub fn bodies(&self) -> impl Iterator<Item = (BodyKey, &Body)> + '_ {
        self.entity_set.bodies()
    }

    #[inline]
    pub fn joints(&self) -> impl Iterator<Item = (JointKey, &Joint)> + '_ {
        self.joint_set.iter()
    }

    /// Every contact in the world, including ones that aren't touching.
    #[inline]
    pub fn contacts(&self) -> impl Iterator<Item = (ContactKey, &Contact)> + '_ {
        self.contacts.iter()
    }

    #[inline]
    pub fn body_count(&self) -> usize {
        self.entity_set.body_count()
    }

    #[inline]
    pub fn fixture_count(&self) -> usize {
        self.entity_set.fixture_count()
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joint_set.len()
    }

    #[inline]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Height of the broad phase tree, mostly useful for diagnostics.
    #[inline]
    pub fn proxy_tree_height(&self) -> i32 {
        self.broad_phase.tree().height()
    }

    //
    // Creation and destruction
    //

    pub fn create_body(&mut self, def: &BodyDef) -> Result<BodyKey> {
        def.validate()?;
        let key = self.entity_set.insert_body(Body::new(def));
        log::trace!("created {:?} body {:?}", def.body_type, key);
        Ok(key)
    }

    /// Destroy a body along with its fixtures, joints and contacts.
    pub fn destroy_body(&mut self, key: BodyKey) -> Result<Body> {
        let body = self
            .entity_set
            .get_body(key)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        let joints = body.joints.clone();
        let fixtures = body.fixtures.clone();

        for joint in joints {
            self.remove_joint(joint);
        }
        self.contacts
            .destroy_body_contacts(key, &mut self.entity_set, &mut self.events);
        for fixture_key in fixtures {
            if let Some(fixture) = self.entity_set.remove_fixture(fixture_key) {
                if let Some(proxy) = fixture.proxy {
                    self.broad_phase.destroy_proxy(proxy);
                }
            }
        }

        let body = self
            .entity_set
            .remove_body(key)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        log::debug!("destroyed body {:?}", key);
        self.dispatch_events();
        Ok(body)
    }

    /// Attach a new fixture to a body.
    /// The shape is cloned from the definition, so the definition can be reused.
    pub fn create_fixture(&mut self, body_key: BodyKey, def: &FixtureDef) -> Result<FixtureKey> {
        def.validate()?;
        let body = self
            .entity_set
            .get_body(body_key)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        let pose = body.pose;

        let mut fixture = Fixture::new(body_key, def);
        fixture.aabb = fixture.shape.compute_aabb(&pose);
        let aabb = fixture.aabb;
        let key = self.entity_set.insert_fixture(fixture);
        let proxy = self.broad_phase.create_proxy(aabb, key);

        if let Some(fixture) = self.entity_set.get_fixture_mut(key) {
            fixture.proxy = Some(proxy);
        }
        if let Some(body) = self.entity_set.get_body_mut(body_key) {
            body.fixtures.push(key);
        }
        if def.density > 0.0 {
            self.reset_mass(body_key);
        }
        if let Some(body) = self.entity_set.get_body_mut(body_key) {
            if body.body_type == BodyType::Dynamic {
                body.set_awake(true);
            }
        }
        // pairs for the new proxy are found at the start of the next step
        self.new_fixtures = true;
        Ok(key)
    }

    /// Detach a fixture from its body and destroy it.
    pub fn destroy_fixture(&mut self, key: FixtureKey) -> Result<Fixture> {
        let fixture = self
            .entity_set
            .get_fixture(key)
            .ok_or(PhysicsError::UseAfterDestroy("fixture"))?;
        let body_key = fixture.body;

        self.contacts
            .destroy_fixture_contacts(key, &mut self.entity_set, &mut self.events);
        let fixture = self
            .entity_set
            .remove_fixture(key)
            .ok_or(PhysicsError::UseAfterDestroy("fixture"))?;
        if let Some(proxy) = fixture.proxy {
            self.broad_phase.destroy_proxy(proxy);
        }
        if let Some(body) = self.entity_set.get_body_mut(body_key) {
            body.fixtures.retain(|&f| f != key);
            body.set_awake(true);
        }
        self.reset_mass(body_key);
        self.dispatch_events();
        Ok(fixture)
    }

    /// Connect two bodies with a joint.
    pub fn create_joint(&mut self, def: &JointDef) -> Result<JointKey> {
        def.validate()?;
        for key in [def.body_a, def.body_b] {
            if self.entity_set.get_body(key).is_none() {
                return Err(PhysicsError::UseAfterDestroy("body"));
            }
        }

        let key = self.joint_set.insert(Joint::new(def));
        for body_key in [def.body_a, def.body_b] {
            if let Some(body) = self.entity_set.get_body_mut(body_key) {
                body.joints.push(key);
                body.set_awake(true);
            }
        }
        if !def.collide_connected {
            self.contacts
                .flag_pair_for_filtering(def.body_a, def.body_b, &self.entity_set);
        }
        log::trace!("created joint {:?}", key);
        Ok(key)
    }

    pub fn destroy_joint(&mut self, key: JointKey) -> Result<Joint> {
        let joint = self
            .remove_joint(key)
            .ok_or(PhysicsError::UseAfterDestroy("joint"))?;
        Ok(joint)
    }

    fn remove_joint(&mut self, key: JointKey) -> Option<Joint> {
        let joint = self.joint_set.remove(key)?;
        for body_key in [joint.body_a, joint.body_b] {
            if let Some(body) = self.entity_set.get_body_mut(body_key) {
                body.joints.retain(|&j| j != key);
                body.set_awake(true);
            }
        }
        // the bodies may now collide, make the broad phase look at them again
        if !joint.collide_connected {
            self.touch_body_proxies(joint.body_a);
        }
        Some(joint)
    }

    /// Remove everything from the world. Queued commands and the listener are kept.
    pub fn clear(&mut self) {
        self.entity_set.clear();
        self.joint_set.clear();
        self.contacts.clear();
        self.broad_phase.clear();
        self.events.clear();
        self.inv_dt0 = 0.0;
        self.new_fixtures = false;
    }

    //
    // Modification
    //

    /// Teleport a body to a new position and angle, waking it up.
    pub fn set_transform(&mut self, key: BodyKey, position: Vec2, angle: f64) -> Result<()> {
        let body = self
            .entity_set
            .get_body_mut(key)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        if !(position.x.is_finite() && position.y.is_finite() && angle.is_finite()) {
            return Err(PhysicsError::InvalidConfiguration(format!(
                "body transform must be finite, got {position:?} and {angle}"
            )));
        }
        body.set_origin(position, angle);
        body.set_awake(true);
        let pose = body.pose;
        self.synchronize_fixtures(key, pose, pose);
        Ok(())
    }

    pub fn set_body_type(&mut self, key: BodyKey, body_type: BodyType) -> Result<()> {
        let body = self
            .entity_set
            .get_body_mut(key)
            .ok_or(PhysicsError::UseAfterDestroy("body"))?;
        if body.body_type == body_type {
            return Ok(());
        }
        body.body_type = body_type;
        self.reset_mass(key);

        if let Some(body) = self.entity_set.get_body_mut(key) {
            if body_type == BodyType::Static {
                body.velocity = Velocity::default();
                body.center0 = body.center;
                body.angle0 = body.angle;
            }
            body.force = Vec2::zero();
            body.torque = 0.0;
            body.set_awake(true);
        }

        // contacts need to be recreated since the set of collidable pairs changed
        self.contacts
            .destroy_body_contacts(key, &mut self.entity_set, &mut self.events);
        self.touch_body_proxies(key);
        self.dispatch_events();
        Ok(())
    }

    pub fn set_fixture_density(&mut self, key: FixtureKey, density: f64) -> Result<()> {
        error::check_range("density", density, 0.0, f64::MAX)?;
        let fixture = self
            .entity_set
            .get_fixture_mut(key)
            .ok_or(PhysicsError::UseAfterDestroy("fixture"))?;
        fixture.density = density;
        let body_key = fixture.body;
        self.reset_mass(body_key);
        if let Some(body) = self.entity_set.get_body_mut(body_key) {
            body.set_awake(true);
        }
        Ok(())
    }

    pub fn set_fixture_filter(&mut self, key: FixtureKey, filter: Filter) -> Result<()> {
        let fixture = self
            .entity_set
            .get_fixture_mut(key)
            .ok_or(PhysicsError::UseAfterDestroy("fixture"))?;
        fixture.filter = filter;
        let proxy = fixture.proxy;
        self.contacts
            .flag_fixture_for_filtering(key, &self.entity_set);
        if let Some(proxy) = proxy {
            self.broad_phase.touch_proxy(proxy);
        }
        Ok(())
    }

    pub fn set_fixture_sensor(&mut self, key: FixtureKey, is_sensor: bool) -> Result<()> {
        let fixture = self
            .entity_set
            .get_fixture_mut(key)
            .ok_or(PhysicsError::UseAfterDestroy("fixture"))?;
        if fixture.is_sensor == is_sensor {
            return Ok(());
        }
        fixture.is_sensor = is_sensor;
        let (body_key, proxy) = (fixture.body, fixture.proxy);

        // existing contacts end and get recreated with the new kind
        self.contacts
            .destroy_fixture_contacts(key, &mut self.entity_set, &mut self.events);
        if let Some(proxy) = proxy {
            self.broad_phase.touch_proxy(proxy);
        }
        if let Some(body) = self.entity_set.get_body_mut(body_key) {
            body.set_awake(true);
        }
        self.dispatch_events();
        Ok(())
    }

    fn reset_mass(&mut self, body_key: BodyKey) {
        let Some(body) = self.entity_set.bodies.get(body_key.0) else {
            return;
        };
        let mass_data: Vec<_> = body
            .fixtures
            .iter()
            .filter_map(|&f| self.entity_set.get_fixture(f))
            .filter(|f| f.density > 0.0)
            .map(|f| f.shape.compute_mass(f.density))
            .collect();
        if let Some(body) = self.entity_set.bodies.get_mut(body_key.0) {
            body.reset_mass(&mass_data);
        }
    }

    fn touch_body_proxies(&mut self, body_key: BodyKey) {
        let Some(body) = self.entity_set.get_body(body_key) else {
            return;
        };
        for &f in &body.fixtures {
            if let Some(proxy) = self.entity_set.get_fixture(f).and_then(|f| f.proxy) {
                self.broad_phase.touch_proxy(proxy);
            }
        }
    }

    /// Update the broad phase AABBs of a body's fixtures
    /// to cover its motion from `pose0` to `pose1`.
    fn synchronize_fixtures(&mut self, body_key: BodyKey, pose0: Pose, pose1: Pose) {
        let Some(body) = self.entity_set.bodies.get(body_key.0) else {
            return;
        };
        for &fixture_key in &body.fixtures {
            let Some(fixture) = self.entity_set.fixtures.get_mut(fixture_key.0) else {
                continue;
            };
            let aabb0 = fixture.shape.compute_aabb(&pose0);
            let aabb1 = fixture.shape.compute_aabb(&pose1);
            fixture.aabb = aabb0.union(&aabb1);
            let displacement = aabb1.center() - aabb0.center();
            if let Some(proxy) = fixture.proxy {
                self.broad_phase.move_proxy(proxy, fixture.aabb, displacement);
            }
        }
    }

    //
    // Queries
    //

    /// Call the callback for every fixture whose broad phase AABB overlaps the given one.
    /// Return `false` from the callback to stop the query.
    pub fn query_aabb(&self, aabb: AABB, mut callback: impl FnMut(FixtureKey) -> bool) {
        for (_, fixture) in self.broad_phase.query(aabb) {
            if !callback(fixture) {
                break;
            }
        }
    }

    /// Find every fixture containing the given point.
    pub fn query_point(&self, point: Vec2) -> Vec<FixtureKey> {
        let aabb = AABB::new(point, point);
        self.broad_phase
            .query(aabb)
            .filter(|(_, key)| {
                let Some(fixture) = self.entity_set.get_fixture(*key) else {
                    return false;
                };
                let Some(body) = self.entity_set.get_body(fixture.body) else {
                    return false;
                };
                fixture.shape.test_point(&body.pose, point)
            })
            .map(|(_, key)| key)
            .collect()
    }

    /// Cast a ray from `p1` to `p2`, reporting the fixtures it hits in no particular order.
    /// The callback's response controls how the cast continues.
    pub fn ray_cast(
        &self,
        p1: Vec2,
        p2: Vec2,
        mut callback: impl FnMut(&RayHit) -> RayCastResponse,
    ) {
        let input = RayCastInput::new(p1, p2);
        self.broad_phase
            .ray_cast(&input, |sub_input, _, fixture_key| {
                let Some(fixture) = self.entity_set.get_fixture(fixture_key) else {
                    return sub_input.max_fraction;
                };
                let Some(body) = self.entity_set.get_body(fixture.body) else {
                    return sub_input.max_fraction;
                };
                let Some(output) = fixture.shape.ray_cast(sub_input, &body.pose) else {
                    return sub_input.max_fraction;
                };
                let hit = RayHit {
                    fixture: fixture_key,
                    body: fixture.body,
                    point: sub_input.point_at(output.fraction),
                    normal: output.normal,
                    fraction: output.fraction,
                };
                match callback(&hit) {
                    RayCastResponse::Ignore => -1.0,
                    RayCastResponse::Terminate => 0.0,
                    RayCastResponse::Clip => output.fraction,
                    RayCastResponse::Continue => sub_input.max_fraction,
                }
            });
    }

    /// Find the first fixture hit by a ray from `p1` to `p2`.
    pub fn ray_cast_closest(&self, p1: Vec2, p2: Vec2) -> Option<RayHit> {
        let mut closest: Option<RayHit> = None;
        self.ray_cast(p1, p2, |hit| {
            closest = Some(*hit);
            RayCastResponse::Clip
        });
        closest
    }

    //
    // Stepping
    //

    /// Advance the simulation by `dt` seconds.
    ///
    /// Contact events are delivered to the listener at the end of the step,
    /// after which queued commands are applied.
    pub fn step(&mut self, dt: f64) {
        if !(dt > 0.0) || !dt.is_finite() {
            log::warn!("ignoring physics step with invalid timestep {dt}");
            return;
        }
        let _span = tracy_span!("physics step", "step");

        let mut listener = self.listener.take();

        if self.new_fixtures {
            self.find_new_contacts();
            self.new_fixtures = false;
        }

        {
            let _span = tracy_span!("collide", "step");
            self.contacts.collide(
                &mut self.entity_set,
                &self.joint_set,
                &self.broad_phase,
                listener.as_deref_mut(),
                &mut self.commands,
                &mut self.events,
            );
        }

        let step = TimeStep {
            dt,
            inv_dt: 1.0 / dt,
            dt_ratio: self.inv_dt0 * dt,
        };
        self.solve(&step, listener.is_some());
        self.inv_dt0 = step.inv_dt;

        for (_, body) in self.entity_set.bodies.iter_mut() {
            body.force = Vec2::zero();
            body.torque = 0.0;
        }

        self.listener = listener;
        self.dispatch_events();
        self.apply_commands();
    }

    fn find_new_contacts(&mut self) {
        let _span = tracy_span!("find new contacts", "find_new_contacts");
        let contacts = &mut self.contacts;
        let entity_set = &mut self.entity_set;
        let joint_set = &self.joint_set;
        self.broad_phase.update_pairs(|fixture_a, fixture_b| {
            contacts.add_pair(fixture_a, fixture_b, entity_set, joint_set);
        });
    }

    /// Build islands of interacting awake bodies, solve each,
    /// then update the broad phase with the new positions.
    fn solve(&mut self, step: &TimeStep, report_impulses: bool) {
        let _span = tracy_span!("solve", "solve");

        for (_, body) in self.entity_set.bodies.iter_mut() {
            body.island_flag = false;
        }
        for (_, contact) in self.contacts.contacts.iter_mut() {
            contact.island_flag = false;
        }
        for (_, joint) in self.joint_set.joints.iter_mut() {
            joint.island_flag = false;
        }

        let seeds: Vec<td::Index> = self
            .entity_set
            .bodies
            .iter()
            .filter(|(_, b)| b.awake && b.body_type != BodyType::Static)
            .map(|(k, _)| k)
            .collect();

        let mut island_count = 0;
        for seed in seeds {
            let seed = BodyKey(seed);
            if !self.island.build(
                seed,
                &mut self.entity_set,
                &mut self.contacts,
                &mut self.joint_set,
            ) {
                continue;
            }
            island_count += 1;
            solver::solve_island(
                &self.island,
                &mut self.entity_set,
                &mut self.contacts,
                &mut self.joint_set,
                &self.params,
                step,
                report_impulses.then_some(&mut self.events),
            );
            // static bodies can take part in any number of islands
            for &key in &self.island.bodies {
                if let Some(body) = self.entity_set.bodies.get_mut(key.0) {
                    if body.body_type == BodyType::Static {
                        body.island_flag = false;
                    }
                }
            }
        }
        log::trace!(
            "solved {island_count} islands, {} contacts in world",
            self.contacts.len()
        );

        let _span = tracy_span!("synchronize fixtures", "solve");
        let moved: Vec<(BodyKey, Pose, Pose)> = self
            .entity_set
            .bodies
            .iter()
            .filter(|(_, b)| b.island_flag && b.body_type != BodyType::Static)
            .map(|(k, b)| (BodyKey(k), b.pose0(), b.pose))
            .collect();
        for (key, pose0, pose1) in moved {
            self.synchronize_fixtures(key, pose0, pose1);
        }
        self.find_new_contacts();
    }

    /// Deliver buffered contact events to the listener.
    fn dispatch_events(&mut self) {
        if self.events.is_empty() {
            return;
        }
        let mut events = std::mem::take(&mut self.events);
        if let Some(listener) = self.listener.as_deref_mut() {
            let _span = tracy_span!("dispatch events", "dispatch_events");
            for event in events.drain(..) {
                let (entities, commands) = (&self.entity_set, &mut self.commands);
                match event {
                    ContactEvent::Begin(c) => listener.begin_contact(&c, entities, commands),
                    ContactEvent::End(c) => listener.end_contact(&c, entities, commands),
                    ContactEvent::SensorBegin(c) => {
                        listener.begin_sensor_overlap(&c, entities, commands)
                    }
                    ContactEvent::SensorEnd(c) => {
                        listener.end_sensor_overlap(&c, entities, commands)
                    }
                    ContactEvent::PostSolve(c, impulse) => {
                        listener.post_solve(&c, &impulse, entities, commands)
                    }
                }
            }
        }
        events.clear();
        // keep the allocation around for the next step
        self.events = events;
    }

    /// Apply every queued command right away.
    /// This happens automatically at the end of every step.
    pub fn apply_commands(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        let _span = tracy_span!("apply commands", "apply_commands");
        for command in self.commands.take() {
            if let Err(err) = command.apply(self) {
                log::warn!("queued physics command failed: {err}");
            }
        }
    }
}
