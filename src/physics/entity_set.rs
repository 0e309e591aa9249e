use super::{Body, Fixture};

use thunderdome as td;

/// Key type to look up a fixture stored in the physics world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixtureKey(pub(super) td::Index);

impl FixtureKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from fixtures to other things.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Key type to look up a body stored in the physics world.
///
/// When using a [`hecs`][hecs] World, this type should be stored
/// in the world instead of [`Body`][super::Body].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyKey(pub(super) td::Index);

impl BodyKey {
    /// Get the underlying [`thunderdome::Index`][thunderdome::Index] of this key.
    /// Useful for creating your own mappings from bodies to other things
    /// such as [`hecs`][hecs] entities.
    #[inline]
    pub fn index(&self) -> td::Index {
        self.0
    }
}

/// Storage for the bodies and fixtures of a physics world.
///
/// Every fixture belongs to exactly one body, and bodies list their fixtures.
/// Insertion and removal go through [`PhysicsWorld`][super::PhysicsWorld]
/// so that the broad phase and contacts stay in sync.
#[derive(Default, Debug)]
pub struct EntitySet {
    // pub fields instead of immutable accessors for the solver's sake,
    // there are invariants that can be violated with these when inserting/removing
    pub(super) bodies: td::Arena<Body>,
    pub(super) fixtures: td::Arena<Fixture>,
}

impl EntitySet {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Access a [`Body`][super::Body] in the physics world, if it still exists.
    #[inline]
    pub fn get_body(&self, body: BodyKey) -> Option<&Body> {
        self.bodies.get(body.0)
    }

    /// Mutably access a [`Body`][super::Body] in the physics world, if it still exists.
    #[inline]
    pub fn get_body_mut(&mut self, body: BodyKey) -> Option<&mut Body> {
        self.bodies.get_mut(body.0)
    }

    /// Access a [`Fixture`][super::Fixture] in the physics world, if it still exists.
    #[inline]
    pub fn get_fixture(&self, fixture: FixtureKey) -> Option<&Fixture> {
        self.fixtures.get(fixture.0)
    }

    /// Mutably access a [`Fixture`][super::Fixture] in the physics world, if it still exists.
    #[inline]
    pub fn get_fixture_mut(&mut self, fixture: FixtureKey) -> Option<&mut Fixture> {
        self.fixtures.get_mut(fixture.0)
    }

    /// Access the Body a Fixture is attached to, if the fixture still exists.
    #[inline]
    pub fn get_fixture_body(&self, fixture: FixtureKey) -> Option<&Body> {
        self.fixtures
            .get(fixture.0)
            .and_then(|f| self.bodies.get(f.body.0))
    }

    #[inline]
    pub fn bodies(&self) -> impl Iterator<Item = (BodyKey, &Body)> + '_ {
        self.bodies.iter().map(|(k, b)| (BodyKey(k), b))
    }

    #[inline]
    pub fn fixtures(&self) -> impl Iterator<Item = (FixtureKey, &Fixture)> + '_ {
        self.fixtures.iter().map(|(k, f)| (FixtureKey(k), f))
    }

    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }

    #[inline]
    pub(super) fn insert_body(&mut self, body: Body) -> BodyKey {
        BodyKey(self.bodies.insert(body))
    }

    /// Insert a fixture without attaching it to its body's fixture list.
    #[inline]
    pub(super) fn insert_fixture(&mut self, fixture: Fixture) -> FixtureKey {
        FixtureKey(self.fixtures.insert(fixture))
    }

    #[inline]
    pub(super) fn remove_body(&mut self, body: BodyKey) -> Option<Body> {
        self.bodies.remove(body.0)
    }

    #[inline]
    pub(super) fn remove_fixture(&mut self, fixture: FixtureKey) -> Option<Fixture> {
        self.fixtures.remove(fixture.0)
    }

    /// Mutably access two distinct bodies at once.
    #[inline]
    pub(super) fn get_body_pair_mut(
        &mut self,
        a: BodyKey,
        b: BodyKey,
    ) -> (Option<&mut Body>, Option<&mut Body>) {
        if a == b {
            return (self.bodies.get_mut(a.0), None);
        }
        self.bodies.get2_mut(a.0, b.0)
    }

    // not exposed to users, must use through PhysicsWorld::clear
    pub(super) fn clear(&mut self) {
        self.bodies.clear();
        self.fixtures.clear();
    }
}
