//! Deferred modifications to a [`PhysicsWorld`], for use where the world is locked,
//! like inside [`ContactListener`][super::ContactListener] callbacks.

use super::{BodyDef, BodyKey, FixtureDef, FixtureKey, JointDef, JointKey, PhysicsWorld, Result};

/// A change to apply to the world later.
pub enum Command {
    /// Create a body and attach fixtures to it.
    CreateBody { def: BodyDef, fixtures: Vec<FixtureDef> },
    DestroyBody(BodyKey),
    CreateFixture(BodyKey, FixtureDef),
    DestroyFixture(FixtureKey),
    CreateJoint(JointDef),
    DestroyJoint(JointKey),
    /// Run arbitrary code with full access to the world.
    Deferred(Box<dyn FnOnce(&mut PhysicsWorld) + Send>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateBody { def, fixtures } => f
                .debug_struct("CreateBody")
                .field("def", def)
                .field("fixtures", fixtures)
                .finish(),
            Self::DestroyBody(key) => f.debug_tuple("DestroyBody").field(key).finish(),
            Self::CreateFixture(body, def) => f
                .debug_tuple("CreateFixture")
                .field(body)
                .field(def)
                .finish(),
            Self::DestroyFixture(key) => f.debug_tuple("DestroyFixture").field(key).finish(),
            Self::CreateJoint(def) => f.debug_tuple("CreateJoint").field(def).finish(),
            Self::DestroyJoint(key) => f.debug_tuple("DestroyJoint").field(key).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl Command {
    /// Perform the change on the world.
    ///
    /// Destroying something that's already gone is an error like
    /// it would be when called directly, but the world is left intact.
    /// A body whose definition or any fixture definition is invalid isn't created at all.
    pub fn apply(self, world: &mut PhysicsWorld) -> Result<()> {
        match self {
            Self::CreateBody { def, fixtures } => {
                // check everything up front so that a bad fixture can't leave a half-built body
                def.validate()?;
                for fixture in &fixtures {
                    fixture.validate()?;
                }
                let body = world.create_body(&def)?;
                for fixture in &fixtures {
                    world.create_fixture(body, fixture)?;
                }
            }
            Self::DestroyBody(key) => {
                world.destroy_body(key)?;
            }
            Self::CreateFixture(body, def) => {
                world.create_fixture(body, &def)?;
            }
            Self::DestroyFixture(key) => {
                world.destroy_fixture(key)?;
            }
            Self::CreateJoint(def) => {
                world.create_joint(&def)?;
            }
            Self::DestroyJoint(key) => {
                world.destroy_joint(key)?;
            }
            Self::Deferred(f) => f(world),
        }
        Ok(())
    }
}

/// Commands waiting to be applied, in the order they were queued.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn create_body(&mut self, def: BodyDef, fixtures: impl IntoIterator<Item = FixtureDef>) {
        self.push(Command::CreateBody {
            def,
            fixtures: fixtures.into_iter().collect(),
        });
    }

    pub fn destroy_body(&mut self, key: BodyKey) {
        self.push(Command::DestroyBody(key));
    }

    pub fn create_fixture(&mut self, body: BodyKey, def: FixtureDef) {
        self.push(Command::CreateFixture(body, def));
    }

    pub fn destroy_fixture(&mut self, key: FixtureKey) {
        self.push(Command::DestroyFixture(key));
    }

    pub fn create_joint(&mut self, def: JointDef) {
        self.push(Command::CreateJoint(def));
    }

    pub fn destroy_joint(&mut self, key: JointKey) {
        self.push(Command::DestroyJoint(key));
    }

    /// Queue a closure to run with mutable access to the world.
    pub fn defer(&mut self, f: impl FnOnce(&mut PhysicsWorld) + Send + 'static) {
        self.push(Command::Deferred(Box::new(f)));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Remove every queued command, leaving the queue empty.
    #[inline]
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::Vec2,
        physics::{collision::Shape, PhysicsError, WorldParams},
    };

    #[test]
    fn commands_apply_in_order() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let mut queue = CommandQueue::new();
        queue.create_body(
            BodyDef::new_dynamic().with_position(Vec2::new(1.0, 2.0)),
            [FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(2.0)],
        );
        queue.defer(|world| {
            let gravity = world.gravity();
            world.set_gravity(2.0 * gravity);
        });
        assert_eq!(queue.len(), 2);

        for command in queue.take() {
            command.apply(&mut world).unwrap();
        }
        assert!(queue.is_empty());
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.fixture_count(), 1);
        assert_eq!(world.gravity(), Vec2::new(0.0, -20.0));
    }

    #[test]
    fn invalid_fixture_creates_no_body() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let mut queue = CommandQueue::new();
        queue.create_body(
            BodyDef::new_dynamic(),
            [
                FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(1.0),
                FixtureDef::new(Shape::circle(0.5).unwrap()).with_friction(-1.0),
            ],
        );

        let results: Vec<_> = queue
            .take()
            .into_iter()
            .map(|c| c.apply(&mut world))
            .collect();
        assert!(matches!(
            results[0],
            Err(PhysicsError::InvalidConfiguration(_))
        ));
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.fixture_count(), 0);
        assert_eq!(world.broad_phase.tree().len(), 0);

        // queued from a listener, the failure is logged and the world stays empty
        world.commands_mut().create_body(
            BodyDef::new_dynamic(),
            [FixtureDef::new(Shape::circle(0.5).unwrap()).with_density(-2.0)],
        );
        world.step(1.0 / 60.0);
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn destroying_twice_is_an_error() {
        let mut world = PhysicsWorld::new(WorldParams::default()).unwrap();
        let body = world.create_body(&BodyDef::new_static()).unwrap();
        let mut queue = CommandQueue::new();
        queue.destroy_body(body);
        queue.destroy_body(body);

        let results: Vec<_> = queue
            .take()
            .into_iter()
            .map(|c| c.apply(&mut world))
            .collect();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(PhysicsError::UseAfterDestroy(_))
        ));
        assert_eq!(world.body_count(), 0);
    }
}
