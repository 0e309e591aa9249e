//! A 2D rigid body physics engine.
//!
//! Bodies carry fixtures with convex shapes, a dynamic AABB tree finds
//! potentially colliding pairs, and a sequential impulse solver resolves
//! contacts and joints. Start from [`PhysicsWorld`].

#[macro_use]
mod util;

pub mod math;
pub use math::{uv, Angle, Pose, Rot, Unit, Vec2};

pub mod physics;
pub use physics::{
    collision::{self, Circle, Edge, Polygon, RayCastInput, RayCastOutput, Shape, AABB},
    Body, BodyDef, BodyKey, BodyType, Command, CommandQueue, Contact, ContactImpulse, ContactKey,
    ContactListener, Filter, Fixture, FixtureDef, FixtureKey, HecsSyncManager, HecsSyncOptions,
    Joint, JointDef, JointKey, JointKind, Mass, PhysicsError, PhysicsWorld, RayCastResponse,
    RayHit, Velocity, WorldParams,
};

// Re-exported hecs to guarantee versions match
pub use hecs;
